use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use backend_api::{
    BackendError, ChatBackend, Notification, PushEvent, StatusChannel, StatusSnapshot,
    WorkerMetrics, WorkerState, WorkerStatus,
};
use backend_mock::{MockBackend, PushScript, ScriptedReply};
use nucleus::capability::{PermissionSet, Tier};
use nucleus::context::PageSnapshot;
use nucleus::error::NucleusError;
use nucleus::session::{Message, Sender};
use nucleus::sync::{StatusBoard, SyncIndicator};
use nucleus::{Nucleus, NucleusConfig, PresentationAdapter};

#[derive(Default)]
struct AdapterTrace {
    transcripts: Mutex<Vec<Vec<Message>>>,
    boards: Mutex<Vec<StatusBoard>>,
    permissions: Mutex<Vec<PermissionSet>>,
    notifications: Mutex<Vec<String>>,
    indicators: Mutex<Vec<SyncIndicator>>,
}

impl AdapterTrace {
    fn latest_transcript(&self) -> Vec<Message> {
        lock_unpoisoned(&self.transcripts)
            .last()
            .cloned()
            .unwrap_or_default()
    }

    fn transcript_len(&self) -> usize {
        self.latest_transcript().len()
    }

    fn board_count(&self) -> usize {
        lock_unpoisoned(&self.boards).len()
    }

    fn indicators(&self) -> Vec<SyncIndicator> {
        lock_unpoisoned(&self.indicators).clone()
    }
}

impl PresentationAdapter for AdapterTrace {
    fn on_transcript_changed(&self, transcript: &[Message]) {
        lock_unpoisoned(&self.transcripts).push(transcript.to_vec());
    }

    fn on_status_changed(&self, board: &StatusBoard) {
        lock_unpoisoned(&self.boards).push(board.clone());
    }

    fn on_permissions_resolved(&self, permissions: &PermissionSet) {
        lock_unpoisoned(&self.permissions).push(permissions.clone());
    }

    fn on_notification(&self, text: &str) {
        lock_unpoisoned(&self.notifications).push(text.to_string());
    }

    fn on_sync_indicator(&self, indicator: SyncIndicator) {
        lock_unpoisoned(&self.indicators).push(indicator);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Harness {
    nucleus: Nucleus,
    mock: Arc<MockBackend>,
    adapter: Arc<AdapterTrace>,
}

fn harness(tier: &str) -> Harness {
    harness_with_config(
        tier,
        NucleusConfig {
            poll_interval: Duration::from_millis(25),
            heartbeat_interval: Duration::from_millis(20),
        },
    )
}

fn harness_with_config(tier: &str, config: NucleusConfig) -> Harness {
    let mock = Arc::new(MockBackend::new());
    let adapter = Arc::new(AdapterTrace::default());
    let chat: Arc<dyn ChatBackend> = Arc::clone(&mock) as _;
    let status: Arc<dyn StatusChannel> = Arc::clone(&mock) as _;
    let nucleus = Nucleus::with_config(
        tier,
        "dashboard",
        Arc::clone(&adapter) as Arc<dyn PresentationAdapter>,
        chat,
        status,
        config,
    );
    Harness {
        nucleus,
        mock,
        adapter,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 3s");
}

fn snapshot(agent_id: &str) -> StatusSnapshot {
    StatusSnapshot {
        agents: vec![WorkerStatus {
            agent_id: agent_id.to_string(),
            status: WorkerState::Active,
            last_active_at: Some("2026-08-30T10:00:00Z".to_string()),
            current_activity_text: Some("triaging inbox".to_string()),
            metrics: WorkerMetrics {
                tasks_completed: 12,
                efficiency_pct: 87,
            },
        }],
        active_agents: 1,
        total_agents: 7,
        system_status: "operational".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn basic_tier_exchange_round_trip() {
    let h = harness("basic");
    h.mock
        .push_reply(ScriptedReply::text("Two projects are due this week."));

    h.nucleus
        .submit("what is due?", &PageSnapshot::default())
        .unwrap();
    wait_until(|| h.adapter.transcript_len() == 2).await;

    let transcript = h.adapter.latest_transcript();
    assert_eq!(transcript[0].sender, Sender::User);
    assert_eq!(transcript[0].text, "what is due?");
    assert_eq!(transcript[1].sender, Sender::Assistant);
    assert_eq!(transcript[1].text, "Two projects are due this week.");

    let requests = h.mock.received_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tier, "basic");
    let context = requests[0].context.as_object().unwrap();
    assert!(context.contains_key("page-basic"));
    assert!(!context.contains_key("team-data"));
    assert!(!context.contains_key("memory"));
    assert_eq!(
        requests[0].permissions["allowMemory"],
        serde_json::json!(false)
    );

    let resolved = lock_unpoisoned(&h.adapter.permissions);
    assert_eq!(resolved.len(), 1);
    assert!(!resolved[0].allow_memory);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_tier_falls_back_to_basic() {
    let h = harness("platinum");
    assert_eq!(h.nucleus.tier(), Tier::Basic);
}

#[tokio::test(flavor = "multi_thread")]
async fn rapid_submissions_collapse_to_one_queued_draft() {
    let h = harness("admin");
    h.mock.push_reply(ScriptedReply::DelayedSuccess {
        delay: Duration::from_millis(120),
        text: "First answer.".to_string(),
    });
    h.mock.push_reply(ScriptedReply::text("Latest answer."));

    let page = PageSnapshot::default();
    h.nucleus.submit("first", &page).unwrap();
    wait_until(|| h.nucleus.is_busy()).await;
    h.nucleus.submit("second", &page).unwrap();
    h.nucleus.submit("third", &page).unwrap();

    wait_until(|| h.adapter.transcript_len() == 4).await;

    // The middle submission was superseded and never reached the backend.
    let requests = h.mock.received_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].message, "first");
    assert_eq!(requests[1].message, "third");

    let transcript = h.adapter.latest_transcript();
    assert_eq!(transcript[2].text, "third");
    assert_eq!(transcript[3].text, "Latest answer.");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_exchange_shows_one_notice_and_re_arms() {
    let h = harness("basic");
    h.mock
        .push_reply(ScriptedReply::Failure(BackendError::Timeout));
    h.mock.push_reply(ScriptedReply::text("Back online."));

    let page = PageSnapshot::default();
    h.nucleus.submit("hello?", &page).unwrap();
    wait_until(|| h.adapter.transcript_len() == 2).await;

    let transcript = h.adapter.latest_transcript();
    assert_eq!(
        transcript.iter().filter(|message| message.is_error).count(),
        1
    );
    assert!(!h.nucleus.is_busy());

    h.nucleus.submit("still there?", &page).unwrap();
    wait_until(|| h.adapter.transcript_len() == 4).await;
    assert_eq!(h.adapter.latest_transcript()[3].text, "Back online.");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_then_resubmit_flows_cleanly() {
    let h = harness("basic");
    h.mock.push_reply(ScriptedReply::NeverResolves);
    h.mock.push_reply(ScriptedReply::text("Second answer."));

    let page = PageSnapshot::default();
    h.nucleus.submit("never answered", &page).unwrap();
    wait_until(|| h.nucleus.is_busy()).await;

    h.nucleus.cancel();
    assert!(!h.nucleus.is_busy());

    h.nucleus.submit("try again", &page).unwrap();
    wait_until(|| h.adapter.transcript_len() == 2).await;

    let transcript = h.adapter.latest_transcript();
    assert_eq!(transcript[0].text, "try again");
    assert_eq!(transcript[1].text, "Second answer.");
}

#[tokio::test(flavor = "multi_thread")]
async fn push_refused_falls_back_to_polling() {
    let h = harness("complete");
    h.mock.push_snapshot(Ok(snapshot("triage")));

    h.nucleus.start();
    wait_until(|| h.adapter.board_count() > 0).await;

    let board = h.nucleus.status_board();
    assert!(board.workers.contains_key("triage"));
    assert_eq!(board.total_agents, 7);
    assert!(h.adapter.indicators().contains(&SyncIndicator::Polling));

    h.nucleus.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn push_stream_delivers_status_and_notifications() {
    let h = harness("complete");
    h.mock.set_push_script(PushScript::DeliverThenHold(vec![
        PushEvent::AgentStatus(snapshot("scheduler")),
        PushEvent::Notification(Notification {
            text: "maintenance at 02:00".to_string(),
        }),
    ]));

    h.nucleus.start();
    wait_until(|| h.adapter.board_count() > 0).await;

    assert!(h
        .nucleus
        .status_board()
        .workers
        .contains_key("scheduler"));
    assert!(h.adapter.indicators().contains(&SyncIndicator::Live));
    wait_until(|| !lock_unpoisoned(&h.adapter.notifications).is_empty()).await;
    assert_eq!(
        lock_unpoisoned(&h.adapter.notifications)[0],
        "maintenance at 02:00"
    );

    h.nucleus.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn quiet_stream_reads_as_live_before_any_event() {
    let h = harness("complete");
    // Connects and stays open without delivering anything.
    h.mock.set_push_script(PushScript::DeliverThenHold(vec![]));

    h.nucleus.start();
    wait_until(|| h.adapter.indicators().contains(&SyncIndicator::Live)).await;

    assert!(h.nucleus.status_board().workers.is_empty());

    h.nucleus.shutdown();
}

/// Status channel whose polls outlast the poll interval, recording how many
/// run concurrently.
struct SlowPoller {
    delay: Duration,
    in_flight: Arc<std::sync::atomic::AtomicUsize>,
    max_in_flight: Arc<std::sync::atomic::AtomicUsize>,
    completed: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait::async_trait]
impl backend_api::StatusChannel for SlowPoller {
    async fn poll_status(&self) -> Result<StatusSnapshot, BackendError> {
        use std::sync::atomic::Ordering;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(snapshot("triage"))
    }

    async fn heartbeat(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn subscribe(
        &self,
        _cancel: backend_api::CancelSignal,
        _on_connected: &mut (dyn FnMut() + Send),
        _on_event: &mut (dyn FnMut(PushEvent) + Send),
    ) -> Result<(), BackendError> {
        Err(BackendError::StreamFailed("push unavailable".to_string()))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_polls_never_overlap() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let status: Arc<dyn StatusChannel> = Arc::new(SlowPoller {
        delay: Duration::from_millis(40),
        in_flight: Arc::clone(&in_flight),
        max_in_flight: Arc::clone(&max_in_flight),
        completed: Arc::clone(&completed),
    });

    let mock = Arc::new(MockBackend::new());
    let adapter = Arc::new(AdapterTrace::default());
    let nucleus = Nucleus::with_config(
        "complete",
        "dashboard",
        Arc::clone(&adapter) as Arc<dyn PresentationAdapter>,
        Arc::clone(&mock) as Arc<dyn ChatBackend>,
        status,
        NucleusConfig {
            // Ticks fall due several times per poll; overruns must be
            // skipped, not stacked.
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(10),
        },
    );

    nucleus.start();
    wait_until(|| completed.load(Ordering::SeqCst) >= 3).await;
    nucleus.shutdown();

    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_snapshot_keeps_the_previous_board() {
    let h = harness("complete");
    h.mock.push_snapshot(Ok(snapshot("triage")));
    let mut bad = snapshot("pipeline");
    bad.agents[0].metrics.efficiency_pct = 140;
    h.mock.push_snapshot(Ok(bad));

    h.nucleus.start();
    wait_until(|| h.adapter.board_count() > 0).await;

    // Give the second (rejected) poll a chance to land.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let board = h.nucleus.status_board();
    assert!(board.workers.contains_key("triage"));
    assert!(!board.workers.contains_key("pipeline"));

    h.nucleus.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_refuses_further_submissions() {
    let h = harness("basic");
    h.nucleus.start();
    h.nucleus.shutdown();

    let result = h.nucleus.submit("anyone home?", &PageSnapshot::default());
    assert!(matches!(result, Err(NucleusError::Terminated)));
    assert_eq!(h.mock.request_count(), 0);
}
