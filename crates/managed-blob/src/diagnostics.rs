//! Reporting of failures nobody else will see.

use std::fmt;

use crate::caching::BlobError;

/// Receives errors that could not be recovered from, such as writes that failed even after all
/// retries.
pub trait ErrorReporter: Send + Sync + fmt::Debug {
    fn log(&self, message: &str, error: &BlobError);
}

/// Reports errors as `ERROR` level tracing events.
///
/// With the sentry tracing layer installed, these end up as Sentry events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn log(&self, message: &str, error: &BlobError) {
        tracing::error!(error = error as &dyn std::error::Error, "{}", message);
    }
}
