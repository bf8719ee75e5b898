//! Market data collaborators: providers, rate limiting, circuit breaking.

pub mod circuit_breaker;
pub mod csv;
pub mod provider;
pub mod rate_limit;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use csv::CsvDataProvider;
pub use provider::{DataError, DataProvider, FetchBatch, StaticDataProvider, Window};
pub use rate_limit::RateLimiter;
