use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::logging::{Logger, OperationLog, OperationStatus, TracingLogger};
use crate::metrics::{Metrics, NoopMetrics, OPERATION_HISTOGRAM};
use crate::{Error, Result};

/// Wraps provider calls with a deadline, a duration histogram sample and a
/// structured log record. Shared by the filesystem and its open files.
pub(crate) struct Instrumentation {
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) metrics: Arc<dyn Metrics>,
    pub(crate) provider: String,
    pub(crate) timeout: Duration,
}

impl Instrumentation {
    pub(crate) fn new(provider: impl Into<String>, timeout: Duration) -> Self {
        Self {
            logger: Arc::new(TracingLogger),
            metrics: Arc::new(NoopMetrics),
            provider: provider.into(),
            timeout,
        }
    }

    pub(crate) fn with_logger(&self, logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            metrics: self.metrics.clone(),
            provider: self.provider.clone(),
            timeout: self.timeout,
        }
    }

    pub(crate) fn with_metrics(&self, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            logger: self.logger.clone(),
            metrics,
            provider: self.provider.clone(),
            timeout: self.timeout,
        }
    }

    /// Runs `fut` under the operation deadline and records how it went.
    /// The result is returned untouched apart from the deadline mapping.
    pub(crate) async fn observe<T, F>(
        &self,
        operation: &'static str,
        location: &str,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation,
                timeout: self.timeout,
            }),
        };
        self.record(operation, location, start.elapsed(), result.as_ref().err());
        result
    }

    fn record(
        &self,
        operation: &'static str,
        location: &str,
        duration: Duration,
        err: Option<&Error>,
    ) {
        let status = if err.is_some() {
            OperationStatus::Error
        } else {
            OperationStatus::Success
        };

        self.metrics.record_histogram(
            OPERATION_HISTOGRAM,
            duration.as_micros() as f64,
            &[
                ("type", operation),
                ("provider", self.provider.as_str()),
                ("status", status.as_str()),
            ],
        );

        self.logger.operation(&OperationLog {
            operation,
            location: location.to_string(),
            provider: self.provider.clone(),
            duration,
            status,
            message: err.map(|e| e.to_string()),
        });
    }
}
