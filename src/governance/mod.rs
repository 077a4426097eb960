//! Call governance: request admission and spend control.
//!
//! Both gates run before a generator call is dispatched. They are the only
//! shared mutable state besides the record store.

pub mod cost;
pub mod rate_limit;

pub use cost::{Budgets, CostGovernor, Reservation};
pub use rate_limit::{InMemoryRateLimiter, RateLimitPolicy, TieredRateLimiter};
