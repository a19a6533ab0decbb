//! IO modules - external system interfaces
//!
//! - `audit` - Lifecycle notice output to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod audit;
pub mod prometheus;

pub use audit::AuditLog;
