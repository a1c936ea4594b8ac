pub mod completion; // model completion client
pub mod config_parser; // gateway config file
pub mod endpoints; // API endpoints
pub mod entitlement; // license key to plan tier resolution
pub mod error; // error handling
pub mod gateway_util; // utilities for gateway
pub mod kv; // key-value store backends
pub mod observability; // utilities for observability (logs, metrics)
pub mod pricing;
pub mod rate_limit; // daily per-client request limits
pub mod refine; // backlog refinement pipeline
pub mod telemetry; // usage events and summaries
#[cfg(test)]
mod testing;
pub mod tier;
