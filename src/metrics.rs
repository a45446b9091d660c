//! Metrics capability. Only histograms are needed: one per filesystem,
//! labelled by operation type, provider and status.

/// Name of the per-operation duration histogram, in microseconds.
pub const OPERATION_HISTOGRAM: &str = "app_cloudfs_stats";

pub const OPERATION_HISTOGRAM_DESC: &str =
    "Response time of cloud filesystem operations in microseconds.";

pub const OPERATION_HISTOGRAM_BUCKETS: &[f64] = &[
    10.0, 50.0, 100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0, 500_000.0,
    1_000_000.0,
];

pub trait Metrics: Send + Sync {
    fn new_histogram(&self, name: &str, desc: &str, buckets: &[f64]);
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn new_histogram(&self, _name: &str, _desc: &str, _buckets: &[f64]) {}

    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::Metrics;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Sample {
        pub name: String,
        pub value: f64,
        pub labels: Vec<(String, String)>,
    }

    impl Sample {
        pub fn label(&self, key: &str) -> Option<&str> {
            self.labels
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }
    }

    #[derive(Default)]
    pub struct RecordingMetrics {
        pub registered: Mutex<Vec<String>>,
        pub samples: Mutex<Vec<Sample>>,
    }

    impl RecordingMetrics {
        pub fn samples_for(&self, operation: &str) -> Vec<Sample> {
            self.samples
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.label("type") == Some(operation))
                .cloned()
                .collect()
        }
    }

    impl Metrics for RecordingMetrics {
        fn new_histogram(&self, name: &str, _desc: &str, _buckets: &[f64]) {
            self.registered.lock().unwrap().push(name.to_string());
        }

        fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
            self.samples.lock().unwrap().push(Sample {
                name: name.to_string(),
                value,
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }
}
