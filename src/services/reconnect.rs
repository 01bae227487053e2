use crate::{
    config::ReconnectConfig,
    device_client::{DeviceState, DeviceStateClient, WifiCredentials},
};
use anyhow::Result;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::{
    ops::ControlFlow,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, oneshot},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Upper bound for `max_retries`, keep in sync with the `Validate` attribute
pub const MAX_RETRIES_LIMIT: u32 = 100;
/// Lower bound for `interval_ms`, keep in sync with the `Validate` attribute
pub const MIN_INTERVAL_MS: u64 = 250;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum ReconnectError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid reconnect options: {0}")]
    InvalidOptions(String),

    #[error("station {0} is not selectable")]
    NotSelectable(String),

    #[error("failed to fetch device state: {0}")]
    FetchFailure(String),

    #[error("failed to submit credentials: {0}")]
    SubmitFailure(String),

    #[error("device did not reconnect after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

// ============================================================================
// Structs
// ============================================================================

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectOptions {
    #[validate(minimum = 1)]
    #[validate(maximum = 100)]
    pub max_retries: u32,
    #[validate(minimum = 250)]
    pub interval_ms: u64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectOptions {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            interval_ms: config.interval_ms,
        }
    }
}

impl ReconnectOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Waiting,
    Connected,
    Exhausted,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self != SessionState::Waiting
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectOutcome {
    Connected,
    Exhausted,
}

impl ReconnectOutcome {
    /// Map the outcome onto the error taxonomy, `Exhausted` being a failure
    pub fn into_result(self, max_retries: u32) -> Result<(), ReconnectError> {
        match self {
            ReconnectOutcome::Connected => Ok(()),
            ReconnectOutcome::Exhausted => Err(ReconnectError::RetriesExhausted {
                attempts: max_retries,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Cancelled,
    Superseded,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub network: String,
    pub state: SessionState,
    pub max_retries: u32,
    pub retries_remaining: u32,
    pub interval_ms: u64,
    pub ticks: u32,
    pub fetch_failures: u32,
    pub last_state: Option<DeviceState>,
    pub cancel_reason: Option<CancelReason>,
}

struct SessionInner {
    snapshot: SessionSnapshot,
    outcome_tx: Option<oneshot::Sender<ReconnectOutcome>>,
}

/// One reconnection attempt
///
/// Tick evaluation and cancellation both take `inner`, so whichever comes
/// first decides whether an outcome is ever delivered.
struct Session {
    token: CancellationToken,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn new(
        network: String,
        options: ReconnectOptions,
    ) -> (Arc<Self>, oneshot::Receiver<ReconnectOutcome>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let session = Session {
            token: CancellationToken::new(),
            inner: Mutex::new(SessionInner {
                snapshot: SessionSnapshot {
                    id: Uuid::new_v4(),
                    network,
                    state: SessionState::Waiting,
                    max_retries: options.max_retries,
                    retries_remaining: options.max_retries,
                    interval_ms: options.interval_ms,
                    ticks: 0,
                    fetch_failures: 0,
                    last_state: None,
                    cancel_reason: None,
                },
                outcome_tx: Some(outcome_tx),
            }),
        };

        (Arc::new(session), outcome_rx)
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot.clone()
    }

    /// Apply the result of one status fetch
    ///
    /// Returns `Break` once the session is terminal and must not be polled again.
    fn record_tick(&self, fetched: Result<DeviceState>) -> ControlFlow<()> {
        let mut inner = self.lock();

        if inner.snapshot.state.is_terminal() {
            return ControlFlow::Break(());
        }

        inner.snapshot.ticks += 1;

        let connected = match fetched {
            Ok(state) => {
                let connected = state.is_connected();
                inner.snapshot.last_state = Some(state);
                connected
            }
            Err(e) => {
                inner.snapshot.fetch_failures += 1;
                warn!(
                    "session {}: {}",
                    inner.snapshot.id,
                    ReconnectError::FetchFailure(format!("{e:#}"))
                );
                false
            }
        };

        if connected {
            info!("session {}: wifi connected successfully", inner.snapshot.id);
            self.finish(&mut inner, ReconnectOutcome::Connected);
            return ControlFlow::Break(());
        }

        inner.snapshot.retries_remaining = inner.snapshot.retries_remaining.saturating_sub(1);

        if inner.snapshot.retries_remaining == 0 {
            warn!(
                "session {}: wifi not connected, retries exceeded",
                inner.snapshot.id
            );
            self.finish(&mut inner, ReconnectOutcome::Exhausted);
            return ControlFlow::Break(());
        }

        debug!(
            "session {}: wifi not connected yet, retrying ({} retries left)",
            inner.snapshot.id, inner.snapshot.retries_remaining
        );
        ControlFlow::Continue(())
    }

    fn finish(&self, inner: &mut SessionInner, outcome: ReconnectOutcome) {
        inner.snapshot.state = match outcome {
            ReconnectOutcome::Connected => SessionState::Connected,
            ReconnectOutcome::Exhausted => SessionState::Exhausted,
        };

        if let Some(outcome_tx) = inner.outcome_tx.take() {
            // receiver may already be gone, the snapshot still records the outcome
            let _ = outcome_tx.send(outcome);
        }

        self.token.cancel();
    }

    /// Stop the session without an outcome
    ///
    /// Returns `false` if the session had already terminated.
    fn cancel(&self, reason: CancelReason) -> bool {
        let mut inner = self.lock();
        self.token.cancel();

        if inner.snapshot.state.is_terminal() {
            return false;
        }

        inner.snapshot.state = SessionState::Cancelled;
        inner.snapshot.cancel_reason = Some(reason);
        inner.outcome_tx.take();

        debug!("session {}: {reason:?}", inner.snapshot.id);
        true
    }
}

/// Caller side of a running session
pub struct SessionHandle {
    session: Arc<Session>,
    outcome_rx: Option<oneshot::Receiver<ReconnectOutcome>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.session.lock().snapshot.id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Stop all future polling for this session
    ///
    /// No-op on a session that has already terminated.
    pub fn cancel(&self) {
        self.session.cancel(CancelReason::Cancelled);
    }

    /// Wait for the terminal outcome
    ///
    /// Resolves once with `Some` for a connected or exhausted session. Cancelled
    /// and superseded sessions, as well as every later call, resolve to `None`.
    pub async fn outcome(&mut self) -> Option<ReconnectOutcome> {
        self.outcome_rx.take()?.await.ok()
    }
}

/// Result of `ReconnectMonitor::start`
///
/// Polling runs whether or not the device acknowledged the submission.
pub struct Started {
    pub handle: SessionHandle,
    pub submitted: Result<(), ReconnectError>,
}

// ============================================================================
// Service
// ============================================================================

/// Confirms that the device comes back online after a WiFi change
///
/// Owns the single session slot for its device. Starting a new session
/// supersedes the previous one before the new credentials are submitted.
///
/// `submitting` serializes `start` across the device call. `latest` is only
/// held briefly, so snapshots and cancellation never wait on a submission.
pub struct ReconnectMonitor<T>
where
    T: DeviceStateClient,
{
    client: Arc<T>,
    submitting: AsyncMutex<()>,
    latest: Mutex<Option<Arc<Session>>>,
}

impl<T> ReconnectMonitor<T>
where
    T: DeviceStateClient + Send + Sync + 'static,
{
    pub fn new(client: Arc<T>) -> Self {
        Self {
            client,
            submitting: AsyncMutex::new(()),
            latest: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &T {
        &self.client
    }

    fn latest(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit credentials once and start polling for reconnection
    ///
    /// # Arguments
    /// * `credentials` - Target network, must have a non-empty id
    /// * `options` - Retry budget and poll interval
    ///
    /// # Returns
    /// `Started` with the session handle and the submission result, or an
    /// error if the preconditions fail. Nothing is submitted in that case.
    pub async fn start(
        &self,
        credentials: WifiCredentials,
        options: ReconnectOptions,
    ) -> Result<Started, ReconnectError> {
        if credentials.network_id.is_empty() {
            return Err(ReconnectError::InvalidCredentials(
                "network id is empty".to_string(),
            ));
        }

        options
            .validate()
            .map_err(|e| ReconnectError::InvalidOptions(e.to_string()))?;

        let network = credentials.network_id.as_str().to_string();
        let _submitting = self.submitting.lock().await;

        let previous = self.latest().clone();
        if let Some(previous) = previous {
            if previous.cancel(CancelReason::Superseded) {
                info!("superseding reconnect session for new credentials");
            }
        }

        let submitted = self
            .client
            .select_station(credentials)
            .await
            .map_err(|e| {
                error!("failed to submit credentials for {network}: {e:#}");
                ReconnectError::SubmitFailure(format!("{e:#}"))
            });

        let (session, outcome_rx) = Session::new(network, options);
        *self.latest() = Some(session.clone());

        let snapshot = session.snapshot();
        info!(
            "reconnect session {} started for {} ({} retries every {}ms)",
            snapshot.id, snapshot.network, options.max_retries, options.interval_ms
        );

        tokio::spawn(Self::poll(
            self.client.clone(),
            session.clone(),
            options.interval(),
        ));

        Ok(Started {
            handle: SessionHandle {
                session,
                outcome_rx: Some(outcome_rx),
            },
            submitted,
        })
    }

    /// Cancel the current session, if one is still waiting
    ///
    /// While a submission is in flight the previous session is already
    /// superseded, so this returns `false` and the new session still starts.
    pub fn cancel_active(&self) -> bool {
        match self.latest().as_ref() {
            Some(session) => session.cancel(CancelReason::Cancelled),
            None => false,
        }
    }

    /// Snapshot of the most recent session, terminal or not
    pub fn latest_snapshot(&self) -> Option<SessionSnapshot> {
        self.latest().as_ref().map(|session| session.snapshot())
    }

    async fn poll(client: Arc<T>, session: Arc<Session>, interval: Duration) {
        loop {
            tokio::select! {
                biased;
                _ = session.token.cancelled() => return,
                _ = sleep(interval) => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = session.token.cancelled() => return,
                fetched = client.state() => fetched,
            };

            if session.record_tick(fetched).is_break() {
                return;
            }
        }
    }
}
