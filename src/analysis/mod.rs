//! Analysis pipeline: fact assembly, scoring, merging and orchestration.

pub mod aggregator;
pub mod engine;
pub mod facts;
pub mod progress;

pub use aggregator::{mean_quality, weakest_facts};
pub use engine::{AnalysisEngine, EngineSettings};
pub use progress::{ProgressReporter, ProgressUpdate, PROGRESS_CHANNEL_CAPACITY};
