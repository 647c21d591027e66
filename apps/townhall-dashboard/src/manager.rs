//! Keeps the visible dashboard eventually consistent with the server.
//!
//! Two independent mechanisms feed the same authoritative queries: a push
//! stream that triggers reloads by topic, and a fallback poller for the active
//! section plus a global summary refresh. Either may fail without affecting
//! the other.
//!
//! All state lives in one [`SyncManager`] owned by a single task. Timers, the
//! push reader and in-flight fetches run as spawned tasks that only post
//! [`Signal`]s into the manager's inbox; the owner applies them one at a time
//! through [`SyncManager::dispatch`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::fetch::{FetchError, SectionFetcher};
use crate::poller::{PollerRegistry, Timer};
use crate::push::{PushConnector, PushError, PushMessage, PushState};
use crate::routing::{ReloadAction, RoutingTable};
use crate::section::{Role, Section};
use crate::view::{DashboardView, Notice};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF_START: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Upper bound on the logout request made after teardown.
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the active section's fallback poller.
    pub poll_interval: Duration,
    /// Period of the summary refresh.
    pub refresh_interval: Duration,
    /// Reconnects attempted after the push stream is lost. 0 disables them.
    pub reconnect_attempts: u32,
    pub routes: RoutingTable,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            reconnect_attempts: 0,
            routes: RoutingTable::standard(),
        }
    }
}

/// Work posted to the manager's inbox.
#[derive(Debug)]
pub enum Signal {
    /// A poller or the summary refresh fired.
    Tick(ReloadAction),
    PushOpened,
    Push(PushMessage),
    /// The push stream failed or ended. `retry_in` is set when a reconnect is
    /// scheduled.
    PushLost {
        reason: String,
        retry_in: Option<Duration>,
    },
    Fetched {
        action: ReloadAction,
        result: Result<Value, FetchError>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("the {role:?} dashboard has no {section} section")]
    NotOffered { role: Role, section: Section },
    #[error("the session has been signed out")]
    SignedOut,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub fetches: u64,
    pub applied: u64,
    pub discarded: u64,
    pub failed: u64,
    pub push_events: u64,
}

struct PushTask(JoinHandle<()>);

impl PushTask {
    fn is_running(&self) -> bool {
        !self.0.is_finished()
    }
}

impl Drop for PushTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct SyncManager<F, V> {
    role: Role,
    config: SyncConfig,
    fetcher: Arc<F>,
    view: V,
    active: Option<Section>,
    pollers: PollerRegistry,
    global_refresh: Option<Timer>,
    push: Option<PushTask>,
    push_state: PushState,
    tx: mpsc::UnboundedSender<Signal>,
    rx: mpsc::UnboundedReceiver<Signal>,
    torn_down: bool,
    stats: SyncStats,
}

impl<F, V> SyncManager<F, V>
where
    F: SectionFetcher + 'static,
    V: DashboardView,
{
    pub fn new(role: Role, fetcher: Arc<F>, view: V, config: SyncConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            role,
            config,
            fetcher,
            view,
            active: None,
            pollers: PollerRegistry::new(),
            global_refresh: None,
            push: None,
            push_state: PushState::Closed,
            tx,
            rx,
            torn_down: false,
            stats: SyncStats::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn active_section(&self) -> Option<Section> {
        self.active
    }

    pub fn active_pollers(&self) -> Vec<Section> {
        self.pollers.active()
    }

    pub fn has_global_refresh(&self) -> bool {
        self.global_refresh.is_some()
    }

    pub fn push_state(&self) -> PushState {
        self.push_state
    }

    pub fn is_signed_out(&self) -> bool {
        self.torn_down
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Starts the fallback poller for `section` at the configured interval.
    pub fn start_section_poller(&mut self, section: Section) -> bool {
        self.start_section_poller_every(section, self.config.poll_interval)
    }

    /// No-op returning `false` when `section` already has a poller.
    pub fn start_section_poller_every(&mut self, section: Section, period: Duration) -> bool {
        if self.torn_down {
            return false;
        }
        let tx = self.tx.clone();
        self.pollers.start(section, period, move || {
            tx.send(Signal::Tick(ReloadAction::Section(section))).is_ok()
        })
    }

    pub fn stop_section_poller(&mut self, section: Section) -> bool {
        self.pollers.stop(section)
    }

    pub fn stop_all_section_pollers(&mut self) -> usize {
        self.pollers.stop_all()
    }

    /// Section switch: mark active and show it, stop every poller, fetch once,
    /// then start exactly one poller for the new section.
    pub fn show_section(&mut self, section: Section) -> Result<(), SyncError> {
        if self.torn_down {
            return Err(SyncError::SignedOut);
        }
        if !self.role.offers(section) {
            tracing::warn!(role = ?self.role, %section, "section not offered to this role");
            return Err(SyncError::NotOffered {
                role: self.role,
                section,
            });
        }
        self.active = Some(section);
        self.view.show_section(section);
        let stopped = self.pollers.stop_all();
        self.reload(ReloadAction::Section(section));
        self.start_section_poller(section);
        tracing::info!(%section, stopped, "section shown");
        Ok(())
    }

    /// Starts the summary refresh for the lifetime of the session.
    pub fn start_global_refresh(&mut self) -> bool {
        if self.torn_down || self.global_refresh.is_some() {
            return false;
        }
        let tx = self.tx.clone();
        self.global_refresh = Some(Timer::every(self.config.refresh_interval, move || {
            tx.send(Signal::Tick(ReloadAction::Summary)).is_ok()
        }));
        true
    }

    pub fn stop_global_refresh(&mut self) -> bool {
        match self.global_refresh.take() {
            Some(timer) => {
                timer.stop();
                true
            }
            None => false,
        }
    }

    /// Opens the push stream. Returns `false` when one is already running.
    pub fn connect_push(&mut self, connector: Arc<dyn PushConnector>) -> bool {
        if self.torn_down || self.push.as_ref().is_some_and(PushTask::is_running) {
            return false;
        }
        self.push_state = PushState::Connecting;
        let tx = self.tx.clone();
        let attempts = self.config.reconnect_attempts;
        self.push = Some(PushTask(tokio::spawn(run_push(connector, tx, attempts))));
        true
    }

    /// Waits for the next signal. Cancel safe.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    /// Applies every signal already waiting in the inbox. Returns how many.
    pub fn pump(&mut self) -> usize {
        let mut n = 0;
        while let Ok(signal) = self.rx.try_recv() {
            self.dispatch(signal);
            n += 1;
        }
        n
    }

    pub fn dispatch(&mut self, signal: Signal) {
        if self.torn_down {
            tracing::debug!(?signal, "ignoring signal after sign-out");
            return;
        }
        match signal {
            Signal::Tick(action) => self.on_tick(action),
            Signal::PushOpened => {
                self.push_state = PushState::Open;
            }
            Signal::Push(PushMessage::Ready { connection_id }) => {
                self.push_state = PushState::Open;
                tracing::info!(connection_id = ?connection_id, "push stream ready");
            }
            Signal::Push(PushMessage::Event(event)) => {
                self.stats.push_events += 1;
                let actions = self.config.routes.resolve(&event.topic).to_vec();
                tracing::debug!(
                    topic = %event.topic,
                    action = %event.action,
                    ?actions,
                    "push event"
                );
                for action in actions {
                    match action {
                        ReloadAction::Section(section) if self.active != Some(section) => {
                            tracing::debug!(%section, "section hidden; its poller reloads on show");
                        }
                        _ => self.reload(action),
                    }
                }
            }
            Signal::PushLost { reason, retry_in } => {
                tracing::warn!(%reason, ?retry_in, "push stream lost");
                match retry_in {
                    Some(delay) => {
                        self.push_state = PushState::Connecting;
                        self.view.notify(Notice::warning(format!(
                            "live updates interrupted; retrying in {}s",
                            delay.as_secs()
                        )));
                    }
                    None => {
                        self.push_state = PushState::Closed;
                        self.view.notify(Notice::warning(
                            "live updates unavailable; refreshing on a timer",
                        ));
                    }
                }
            }
            Signal::Fetched { action, result } => self.on_fetched(action, result),
        }
    }

    /// Total teardown, then a best-effort logout bounded by [`LOGOUT_TIMEOUT`].
    pub async fn sign_out(&mut self) {
        if self.torn_down {
            return;
        }
        self.teardown();
        match tokio::time::timeout(LOGOUT_TIMEOUT, self.fetcher.sign_out()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(%err, "logout request failed"),
            Err(_) => tracing::warn!(
                timeout_secs = LOGOUT_TIMEOUT.as_secs(),
                "logout request timed out"
            ),
        }
    }

    /// Stops every poller and the summary refresh, closes the push stream and
    /// drops all rendered state. Signals still queued are discarded.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        let pollers = self.pollers.stop_all();
        self.stop_global_refresh();
        self.push = None;
        self.push_state = PushState::Closed;
        self.view.clear();
        self.active = None;
        self.torn_down = true;
        while self.rx.try_recv().is_ok() {}
        tracing::info!(pollers, "dashboard signed out");
    }

    fn on_tick(&mut self, action: ReloadAction) {
        let live = match action {
            ReloadAction::Section(section) => self.pollers.is_active(section),
            ReloadAction::Summary => self.global_refresh.is_some(),
        };
        if live {
            self.reload(action);
        } else {
            tracing::debug!(?action, "tick from a stopped timer");
        }
    }

    fn reload(&mut self, action: ReloadAction) {
        self.stats.fetches += 1;
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match action {
                ReloadAction::Section(section) => fetcher.fetch_section(section).await,
                ReloadAction::Summary => fetcher.fetch_summary().await,
            };
            let _ = tx.send(Signal::Fetched { action, result });
        });
    }

    fn on_fetched(&mut self, action: ReloadAction, result: Result<Value, FetchError>) {
        if let ReloadAction::Section(section) = action {
            if self.active != Some(section) {
                self.stats.discarded += 1;
                tracing::debug!(%section, "discarding result for a section no longer shown");
                return;
            }
        }
        match result {
            Ok(body) => {
                self.stats.applied += 1;
                match action {
                    ReloadAction::Section(section) => self.view.render_section(section, &body),
                    ReloadAction::Summary => self.view.render_summary(&body),
                }
            }
            Err(err) => {
                self.stats.failed += 1;
                let what = match action {
                    ReloadAction::Section(section) => section.name(),
                    ReloadAction::Summary => "summary",
                };
                tracing::warn!(%err, what, "refresh failed; next tick retries");
                self.view
                    .notify(Notice::error(format!("could not refresh {what}: {err}")));
            }
        }
    }
}

async fn run_push(
    connector: Arc<dyn PushConnector>,
    tx: mpsc::UnboundedSender<Signal>,
    max_reconnects: u32,
) {
    let mut reconnects = 0u32;
    let mut backoff = RECONNECT_BACKOFF_START;
    loop {
        let (reason, retryable) = match connector.connect().await {
            Ok(mut stream) => {
                backoff = RECONNECT_BACKOFF_START;
                if tx.send(Signal::PushOpened).is_err() {
                    return;
                }
                let mut reason = String::from("stream ended");
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(msg) => {
                            if tx.send(Signal::Push(msg)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            reason = err.to_string();
                            break;
                        }
                    }
                }
                (reason, true)
            }
            Err(err) => {
                let retryable = !matches!(err, PushError::Unauthorized);
                (err.to_string(), retryable)
            }
        };

        if !retryable || reconnects >= max_reconnects {
            let _ = tx.send(Signal::PushLost {
                reason,
                retry_in: None,
            });
            return;
        }
        reconnects += 1;
        if tx
            .send(Signal::PushLost {
                reason,
                retry_in: Some(backoff),
            })
            .is_err()
        {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_BACKOFF_CAP);
    }
}
