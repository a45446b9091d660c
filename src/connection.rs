//! Connection state machine with a background retry task.
//!
//! `connect` never fails because the backend is down: the first failed
//! handshake moves the manager to [`ConnectionStatus::RetryingInBackground`]
//! and spawns one task that keeps retrying every `retry_interval` until it
//! succeeds or retry is disabled.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::logging::Logger;
use crate::provider::StorageProvider;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    RetryingInBackground = 3,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            3 => ConnectionStatus::RetryingInBackground,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::RetryingInBackground => "retrying",
        };
        write!(f, "{s}")
    }
}

/// Flags shared between the manager and its retry task.
#[derive(Debug, Default)]
struct ConnectionState {
    status: AtomicU8,
    retry_disabled: AtomicBool,
    warned: AtomicBool,
    stop: Notify,
}

impl ConnectionState {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    fn retry_disabled(&self) -> bool {
        self.retry_disabled.load(Ordering::SeqCst)
    }

    /// Debug on every failure, warn only the first time.
    fn record_failure(&self, logger: &dyn Logger, provider: &str, err: &Error) {
        logger.debug(&format!("connection attempt to {provider} failed: {err}"));
        if !self.warned.swap(true, Ordering::SeqCst) {
            logger.warn(&format!(
                "{provider} backend unavailable, retrying in the background: {err}"
            ));
        }
    }
}

pub struct ConnectionManager<P: StorageProvider> {
    provider: Arc<P>,
    state: Arc<ConnectionState>,
    connect_timeout: Duration,
    retry_interval: Duration,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: StorageProvider> ConnectionManager<P> {
    pub fn new(provider: Arc<P>, connect_timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            provider,
            state: Arc::new(ConnectionState::default()),
            connect_timeout,
            retry_interval,
            retry_task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn is_retrying(&self) -> bool {
        self.status() == ConnectionStatus::RetryingInBackground
    }

    pub fn is_retry_disabled(&self) -> bool {
        self.state.retry_disabled()
    }

    /// Attempts one handshake bounded by the connect timeout.
    ///
    /// Returns `Ok` both when connected and when the handshake failed and a
    /// background retry was scheduled. Only with retry disabled does a failed
    /// handshake come back as an error.
    pub async fn connect(&self, logger: Arc<dyn Logger>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let provider_name = self.provider.provider_name().to_string();
        self.state.set_status(ConnectionStatus::Connecting);

        match attempt(self.provider.as_ref(), self.connect_timeout).await {
            Ok(()) => {
                self.state.set_status(ConnectionStatus::Connected);
                logger.info(&format!("connected to {provider_name} backend"));
                Ok(())
            }
            Err(err) => {
                self.state.record_failure(logger.as_ref(), &provider_name, &err);
                if self.state.retry_disabled() {
                    self.state.set_status(ConnectionStatus::Disconnected);
                    return Err(err);
                }
                self.state.set_status(ConnectionStatus::RetryingInBackground);
                self.spawn_retry(logger);
                Ok(())
            }
        }
    }

    fn spawn_retry(&self, logger: Arc<dyn Logger>) {
        let mut slot = self.retry_task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        debug!(
            provider = self.provider.provider_name(),
            interval = ?self.retry_interval,
            "scheduling background reconnect"
        );
        *slot = Some(tokio::spawn(retry_loop(
            self.provider.clone(),
            self.state.clone(),
            logger,
            self.connect_timeout,
            self.retry_interval,
        )));
    }

    /// Enables or disables background retry. Disabling wakes a sleeping retry
    /// task so it exits without another handshake.
    pub fn set_disable_retry(&self, disabled: bool) {
        self.state.retry_disabled.store(disabled, Ordering::SeqCst);
        if disabled {
            self.state.stop.notify_one();
        }
    }

    /// Disables retry and waits for the retry task to finish.
    pub async fn shutdown(&self) {
        self.set_disable_retry(true);
        let task = self
            .retry_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("connection retry task panicked: {}", e);
                }
            }
        }
    }
}

impl<P: StorageProvider> Drop for ConnectionManager<P> {
    fn drop(&mut self) {
        let slot = self.retry_task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

impl<P: StorageProvider> std::fmt::Debug for ConnectionManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("provider", &self.provider.provider_name())
            .field("status", &self.status())
            .field("retry_disabled", &self.is_retry_disabled())
            .finish()
    }
}

async fn attempt<P: StorageProvider + ?Sized>(provider: &P, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, provider.connect()).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: "connect",
            timeout,
        }),
    }
}

async fn retry_loop<P: StorageProvider>(
    provider: Arc<P>,
    state: Arc<ConnectionState>,
    logger: Arc<dyn Logger>,
    timeout: Duration,
    interval: Duration,
) {
    let provider_name = provider.provider_name().to_string();

    loop {
        wait_for_next_attempt(&state, interval).await;

        if state.retry_disabled() {
            debug!(provider = %provider_name, "background reconnect disabled, stopping");
            if state.status() != ConnectionStatus::Connected {
                state.set_status(ConnectionStatus::Disconnected);
            }
            return;
        }
        if state.status() == ConnectionStatus::Connected {
            return;
        }

        match attempt(provider.as_ref(), timeout).await {
            Ok(()) => {
                state.set_status(ConnectionStatus::Connected);
                logger.info(&format!("connection to {provider_name} backend restored"));
                return;
            }
            Err(err) => state.record_failure(logger.as_ref(), &provider_name, &err),
        }
    }
}

/// Sleeps for `interval`, returning early only once retry is disabled.
async fn wait_for_next_attempt(state: &ConnectionState, interval: Duration) {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return,
            _ = state.stop.notified() => {
                // A permit stored by an earlier disable, with retry back on.
                if state.retry_disabled() {
                    return;
                }
            }
        }
    }
}
