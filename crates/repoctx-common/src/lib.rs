//! Shared building blocks for the repoctx crates
//!
//! Correlation ids for tracing a job across crate boundaries, one-time
//! environment bootstrap, secret redaction for log output, and the
//! exponential backoff schedule used by both the queue resolver and the
//! embedding retry loop.

pub mod backoff;
pub mod correlation;
pub mod init;
pub mod redact;

pub use backoff::Backoff;
pub use correlation::CorrelationId;
pub use init::initialize_environment;
pub use redact::{redact_secrets, redact_url_credentials};
