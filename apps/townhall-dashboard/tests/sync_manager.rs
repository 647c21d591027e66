use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::UnboundedReceiverStream;

use townhall_dashboard::manager::LOGOUT_TIMEOUT;
use townhall_dashboard::{
    FetchError, MemoryView, NoticeLevel, PushConnector, PushError, PushMessage, PushState,
    PushStream, ReloadAction, Role, Section, SectionFetcher, SyncConfig, SyncError, SyncManager,
};
use townhall_events::{Action, DomainEvent};

const POLL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct FakeBackend {
    residents: Mutex<Vec<Value>>,
    calls: Mutex<Vec<ReloadAction>>,
    delays: Mutex<HashMap<Section, Duration>>,
    failing: AtomicBool,
    hang_logout: AtomicBool,
    logouts: AtomicUsize,
}

impl FakeBackend {
    fn calls_for(&self, action: ReloadAction) -> usize {
        self.calls.lock().iter().filter(|a| **a == action).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    fn failure(section: &str) -> FetchError {
        FetchError::Status {
            url: format!("http://backend/api/admin/{section}"),
            status: StatusCode::BAD_GATEWAY,
        }
    }
}

#[async_trait]
impl SectionFetcher for FakeBackend {
    async fn fetch_section(&self, section: Section) -> Result<Value, FetchError> {
        self.calls.lock().push(ReloadAction::Section(section));
        let delay = self.delays.lock().get(&section).copied();
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::failure(section.path()));
        }
        let items = match section {
            Section::Residents => Value::Array(self.residents.lock().clone()),
            _ => json!([]),
        };
        let mut body = serde_json::Map::new();
        body.insert(section.collection_key().to_string(), items);
        Ok(Value::Object(body))
    }

    async fn fetch_summary(&self) -> Result<Value, FetchError> {
        self.calls.lock().push(ReloadAction::Summary);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::failure("dashboard"));
        }
        Ok(json!({
            "statistics": {
                "totalResidents": self.residents.lock().len(),
                "pendingItems": 0,
                "activeSessions": 1
            },
            "recentActivity": []
        }))
    }

    async fn sign_out(&self) -> Result<(), FetchError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        if self.hang_logout.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Err(Self::failure("logout"))
    }
}

/// Hands out prepared streams in order, then refuses.
#[derive(Default)]
struct ScriptedPush {
    streams: Mutex<VecDeque<PushStream>>,
    connects: AtomicUsize,
}

impl ScriptedPush {
    fn with_channel() -> (Arc<Self>, mpsc::UnboundedSender<Result<PushMessage, PushError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let push = Self::default();
        push.streams
            .lock()
            .push_back(UnboundedReceiverStream::new(rx).boxed());
        (Arc::new(push), tx)
    }

    fn refusing() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PushConnector for ScriptedPush {
    async fn connect(&self) -> Result<PushStream, PushError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .pop_front()
            .ok_or(PushError::Status(StatusCode::SERVICE_UNAVAILABLE))
    }
}

type Manager = SyncManager<FakeBackend, MemoryView>;

fn manager(role: Role, config: SyncConfig) -> (Manager, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::default());
    let m = SyncManager::new(role, backend.clone(), MemoryView::new(), config);
    (m, backend)
}

/// Lets spawned timers and fetches run, applying whatever they post.
async fn settle(m: &mut Manager) {
    for _ in 0..16 {
        tokio::task::yield_now().await;
        m.pump();
    }
}

async fn advance(m: &mut Manager, by: Duration) {
    time::advance(by).await;
    settle(m).await;
}

fn event(topic: &str) -> Result<PushMessage, PushError> {
    Ok(PushMessage::Event(DomainEvent::new(
        topic,
        Action::Update,
        1,
        Value::Null,
    )))
}

#[tokio::test(start_paused = true)]
async fn starting_a_poller_twice_keeps_one_timer() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    assert!(m.start_section_poller(Section::Events));
    assert!(!m.start_section_poller(Section::Events));
    assert_eq!(m.active_pollers(), vec![Section::Events]);

    advance(&mut m, POLL).await;
    assert_eq!(backend.calls_for(ReloadAction::Section(Section::Events)), 1);
}

#[tokio::test(start_paused = true)]
async fn switching_sections_leaves_one_poller() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    m.show_section(Section::Residents).expect("residents");
    m.show_section(Section::Events).expect("events");
    assert_eq!(m.active_section(), Some(Section::Events));
    assert_eq!(m.active_pollers(), vec![Section::Events]);
    assert_eq!(m.view().visible(), Some(Section::Events));

    advance(&mut m, POLL).await;
    assert_eq!(backend.calls_for(ReloadAction::Section(Section::Residents)), 1);
    assert_eq!(backend.calls_for(ReloadAction::Section(Section::Events)), 2);
}

#[tokio::test(start_paused = true)]
async fn section_outside_the_role_is_rejected() {
    let (mut m, backend) = manager(Role::Resident, SyncConfig::default());
    m.show_section(Section::Profile).expect("profile");
    let err = m.show_section(Section::Users).expect_err("users is admin only");
    assert_eq!(
        err,
        SyncError::NotOffered {
            role: Role::Resident,
            section: Section::Users
        }
    );
    assert_eq!(m.active_section(), Some(Section::Profile));
    assert_eq!(m.active_pollers(), vec![Section::Profile]);
    settle(&mut m).await;
    assert_eq!(backend.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_topic_triggers_summary_reload() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    let (push, events) = ScriptedPush::with_channel();
    m.show_section(Section::Residents).expect("residents");
    assert!(m.connect_push(push));
    settle(&mut m).await;
    assert_eq!(m.push_state(), PushState::Open);

    events.send(event("unmapped-thing")).expect("push");
    settle(&mut m).await;
    assert_eq!(backend.calls_for(ReloadAction::Summary), 1);
    assert!(m.view().summary().is_some());
    assert_eq!(m.stats().push_events, 1);
}

#[tokio::test(start_paused = true)]
async fn push_reloads_the_visible_section_only() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    let (push, events) = ScriptedPush::with_channel();
    m.show_section(Section::Residents).expect("residents");
    m.connect_push(push);
    settle(&mut m).await;

    backend.residents.lock().push(json!({"id": 1, "name": "Ana"}));
    events.send(event("residents")).expect("push");
    events.send(event("events")).expect("push");
    settle(&mut m).await;

    assert_eq!(backend.calls_for(ReloadAction::Section(Section::Residents)), 2);
    assert_eq!(backend.calls_for(ReloadAction::Section(Section::Events)), 0);
    let shown = m.view().section(Section::Residents).expect("rendered");
    assert_eq!(shown["residents"].as_array().map(Vec::len), Some(1));

    // Polled refresh of the same state renders the entity once, not twice.
    advance(&mut m, POLL).await;
    let shown = m.view().section(Section::Residents).expect("rendered");
    assert_eq!(shown["residents"].as_array().map(Vec::len), Some(1));
}

#[tokio::test(start_paused = true)]
async fn users_events_refresh_section_and_summary() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    let (push, events) = ScriptedPush::with_channel();
    m.show_section(Section::Users).expect("users");
    m.connect_push(push);
    settle(&mut m).await;

    events.send(event("users")).expect("push");
    settle(&mut m).await;
    assert_eq!(backend.calls_for(ReloadAction::Section(Section::Users)), 2);
    assert_eq!(backend.calls_for(ReloadAction::Summary), 1);
}

#[tokio::test(start_paused = true)]
async fn sign_out_stops_everything() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    let (push, events) = ScriptedPush::with_channel();
    m.show_section(Section::Residents).expect("residents");
    assert!(m.start_global_refresh());
    assert!(!m.start_global_refresh());
    m.connect_push(push);
    settle(&mut m).await;
    assert!(m.view().section(Section::Residents).is_some());

    m.sign_out().await;
    assert_eq!(backend.logouts.load(Ordering::SeqCst), 1);
    assert!(m.is_signed_out());
    assert!(m.active_pollers().is_empty());
    assert!(!m.has_global_refresh());
    assert_eq!(m.push_state(), PushState::Closed);
    assert_eq!(m.active_section(), None);
    assert!(m.view().is_blank());

    settle(&mut m).await;
    let before = backend.total_calls();
    advance(&mut m, POLL * 4).await;
    assert_eq!(backend.total_calls(), before);
    assert!(events.send(event("residents")).is_err());
    assert!(m.view().is_blank());

    assert_eq!(m.show_section(Section::Events), Err(SyncError::SignedOut));
    m.sign_out().await;
    assert_eq!(backend.logouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn polling_converges_when_push_fails() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    m.show_section(Section::Residents).expect("residents");
    m.connect_push(ScriptedPush::refusing());
    settle(&mut m).await;
    assert_eq!(m.push_state(), PushState::Closed);
    assert!(m
        .view()
        .notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Warning));
    assert_eq!(m.active_pollers(), vec![Section::Residents]);

    backend.residents.lock().push(json!({"id": 7}));
    advance(&mut m, POLL).await;
    let shown = m.view().section(Section::Residents).expect("rendered");
    assert_eq!(shown["residents"][0]["id"], 7);
}

#[tokio::test(start_paused = true)]
async fn late_response_for_a_hidden_section_is_discarded() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    backend
        .delays
        .lock()
        .insert(Section::Residents, Duration::from_secs(5));
    m.show_section(Section::Residents).expect("residents");
    settle(&mut m).await;
    m.show_section(Section::Events).expect("events");
    settle(&mut m).await;
    assert!(m.view().section(Section::Events).is_some());

    advance(&mut m, Duration::from_secs(5)).await;
    assert!(m.view().section(Section::Residents).is_none());
    assert_eq!(m.stats().discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_notifies_and_keeps_polling() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    backend.failing.store(true, Ordering::SeqCst);
    m.show_section(Section::Events).expect("events");
    settle(&mut m).await;
    assert!(m
        .view()
        .notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Error && n.message.contains("events")));
    assert_eq!(m.active_pollers(), vec![Section::Events]);
    assert!(m.view().section(Section::Events).is_none());

    backend.failing.store(false, Ordering::SeqCst);
    advance(&mut m, POLL).await;
    assert!(m.view().section(Section::Events).is_some());
    assert_eq!(m.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn global_refresh_runs_regardless_of_section() {
    let (mut m, backend) = manager(Role::Official, SyncConfig::default());
    m.show_section(Section::Tasks).expect("tasks");
    m.start_global_refresh();
    advance(&mut m, POLL).await;
    m.show_section(Section::Approvals).expect("approvals");
    advance(&mut m, POLL).await;
    assert_eq!(backend.calls_for(ReloadAction::Summary), 2);
    assert!(m.view().summary().is_some());
}

#[tokio::test(start_paused = true)]
async fn reconnects_are_bounded() {
    let config = SyncConfig {
        reconnect_attempts: 2,
        ..SyncConfig::default()
    };
    let (mut m, _backend) = manager(Role::Admin, config);
    let push = ScriptedPush::refusing();
    m.connect_push(push.clone());
    settle(&mut m).await;
    assert_eq!(push.connects.load(Ordering::SeqCst), 1);
    assert_eq!(m.push_state(), PushState::Connecting);

    advance(&mut m, Duration::from_secs(1)).await;
    assert_eq!(push.connects.load(Ordering::SeqCst), 2);
    advance(&mut m, Duration::from_secs(2)).await;
    assert_eq!(push.connects.load(Ordering::SeqCst), 3);
    assert_eq!(m.push_state(), PushState::Closed);

    advance(&mut m, Duration::from_secs(60)).await;
    assert_eq!(push.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn hung_logout_does_not_block_teardown() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    backend.hang_logout.store(true, Ordering::SeqCst);
    let (push, events) = ScriptedPush::with_channel();
    m.show_section(Section::Residents).expect("residents");
    m.start_global_refresh();
    m.connect_push(push);
    settle(&mut m).await;

    let started = time::Instant::now();
    time::timeout(LOGOUT_TIMEOUT * 2, m.sign_out())
        .await
        .expect("sign-out returns once the logout times out");
    assert!(started.elapsed() >= LOGOUT_TIMEOUT);
    assert_eq!(backend.logouts.load(Ordering::SeqCst), 1);
    assert!(m.is_signed_out());
    assert!(m.active_pollers().is_empty());
    assert!(!m.has_global_refresh());
    assert_eq!(m.push_state(), PushState::Closed);

    settle(&mut m).await;
    assert!(events.send(event("residents")).is_err());
}

#[tokio::test(start_paused = true)]
async fn stream_error_after_open_falls_back_to_polling() {
    let (mut m, backend) = manager(Role::Admin, SyncConfig::default());
    let (push, events) = ScriptedPush::with_channel();
    m.show_section(Section::Residents).expect("residents");
    m.connect_push(push);
    settle(&mut m).await;
    assert_eq!(m.push_state(), PushState::Open);

    events
        .send(Err(PushError::Status(StatusCode::BAD_GATEWAY)))
        .expect("push");
    settle(&mut m).await;
    assert_eq!(m.push_state(), PushState::Closed);
    assert!(m
        .view()
        .notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Warning));
    assert_eq!(m.active_pollers(), vec![Section::Residents]);

    backend.residents.lock().push(json!({"id": 11}));
    advance(&mut m, POLL).await;
    let shown = m.view().section(Section::Residents).expect("rendered");
    assert_eq!(shown["residents"][0]["id"], 11);
}
