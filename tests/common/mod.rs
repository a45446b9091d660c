#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use cloudfs::config::FsConfig;
use cloudfs::logging::{Logger, OperationLog};
use cloudfs::metrics::Metrics;
use cloudfs::{CloudFileSystem, StorageProvider};

#[derive(Default)]
pub struct CapturingLogger {
    pub lines: Mutex<Vec<String>>,
    pub operations: Mutex<Vec<OperationLog>>,
}

impl CapturingLogger {
    pub fn warnings(&self) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.starts_with("WARN"))
            .count()
    }
}

impl Logger for CapturingLogger {
    fn debug(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("DEBUG {message}"));
    }

    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("INFO {message}"));
    }

    fn warn(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("WARN {message}"));
    }

    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("ERROR {message}"));
    }

    fn operation(&self, log: &OperationLog) {
        self.operations.lock().unwrap().push(log.clone());
    }
}

#[derive(Default)]
pub struct CapturingMetrics {
    pub histograms: Mutex<Vec<String>>,
    /// `(operation, status)` per recorded sample.
    pub samples: Mutex<Vec<(String, String)>>,
}

impl Metrics for CapturingMetrics {
    fn new_histogram(&self, name: &str, _desc: &str, _buckets: &[f64]) {
        self.histograms.lock().unwrap().push(name.to_string());
    }

    fn record_histogram(&self, _name: &str, _value: f64, labels: &[(&str, &str)]) {
        let label = |key: &str| {
            labels
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .unwrap_or_default()
        };
        self.samples.lock().unwrap().push((label("type"), label("status")));
    }
}

pub fn filesystem<P: StorageProvider>(provider: P) -> CloudFileSystem<P> {
    CloudFileSystem::new(provider, FsConfig::default()).expect("default config is valid")
}

pub fn instrumented<P: StorageProvider>(
    provider: P,
) -> (CloudFileSystem<P>, Arc<CapturingLogger>, Arc<CapturingMetrics>) {
    let logger = Arc::new(CapturingLogger::default());
    let metrics = Arc::new(CapturingMetrics::default());
    let mut fs = filesystem(provider);
    fs.use_logger(logger.clone());
    fs.use_metrics(metrics.clone());
    (fs, logger, metrics)
}

pub async fn write_file<P: StorageProvider>(fs: &CloudFileSystem<P>, path: &str, data: &[u8]) {
    let mut file = fs.create(path).await.expect("create");
    file.write(data).await.expect("write");
    file.close().await.expect("close");
}

pub async fn read_file<P: StorageProvider>(fs: &CloudFileSystem<P>, path: &str) -> Vec<u8> {
    let mut file = fs.open(path).await.expect("open");
    let mut out = Vec::new();
    let mut buf = [0u8; 7];
    loop {
        let n = file.read(&mut buf).await.expect("read");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    file.close().await.expect("close");
    out
}
