//! Integration tests for the collector's buffering, recovery and delivery
//!
//! Transports are replaced by recording doubles so each test can see exactly
//! what would have gone over the wire.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use corona_core::store::{KeyValueStore, MemoryStore, QUEUE_STORAGE_KEY};
use corona_core::{
    BeaconTransport, Collector, CollectorConfig, CollectorSlot, DeliveryRequest, Error,
    FlushOutcome, LoaderStub, RequestTransport, SkipReason, Transports,
};
use serde_json::{json, Value};
use tokio::sync::{Notify, Semaphore};

const URL: &str = "https://collector.example/ingest";

// ============================================
// Transport doubles
// ============================================

struct RecordingBeacon {
    accept: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingBeacon {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn refusing() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn last_payload(&self) -> Value {
        let sent = self.sent.lock().unwrap();
        let (_, payload) = sent.last().expect("beacon was never called");
        serde_json::from_str(payload).unwrap()
    }
}

impl BeaconTransport for RecordingBeacon {
    fn send_beacon(&self, url: &str, payload: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), payload.to_string()));
        self.accept
    }
}

struct RecordingRequest {
    succeed: bool,
    requests: Mutex<Vec<DeliveryRequest>>,
}

impl RecordingRequest {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            succeed: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestTransport for RecordingRequest {
    async fn post(&self, request: &DeliveryRequest) -> corona_core::Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.succeed {
            Ok(())
        } else {
            Err(Error::Transport("connection refused".to_string()))
        }
    }
}

/// Request that blocks until released, to hold a flush in flight
struct GatedRequest {
    entered: Notify,
    release: Semaphore,
    bodies: Mutex<Vec<Value>>,
}

impl GatedRequest {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
            bodies: Mutex::new(Vec::new()),
        })
    }

    /// Let `count` held requests complete
    fn open(&self, count: usize) {
        self.release.add_permits(count);
    }

    fn sent_names(&self) -> Vec<Vec<String>> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .map(|body| {
                body.as_array()
                    .unwrap()
                    .iter()
                    .map(|e| e["event"].as_str().unwrap().to_string())
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl RequestTransport for GatedRequest {
    async fn post(&self, request: &DeliveryRequest) -> corona_core::Result<()> {
        let body = serde_json::from_str(&request.body).unwrap();
        self.bodies.lock().unwrap().push(body);
        self.entered.notify_one();
        self.release.acquire().await.unwrap().forget();
        Ok(())
    }
}

fn build(
    store: Arc<MemoryStore>,
    beacon: Arc<dyn BeaconTransport>,
    request: Arc<dyn RequestTransport>,
) -> Collector {
    corona_core::logging::init_test();
    Collector::new(store, Transports::new(beacon, request))
}

fn attrs(value: Value) -> Option<corona_core::Attributes> {
    value.as_object().cloned()
}

fn names(events: &[corona_core::Event]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.name().unwrap_or_default().to_string())
        .collect()
}

// ============================================
// Ordering and recovery
// ============================================

#[tokio::test]
async fn test_recovered_events_precede_new_ones_in_delivery() {
    let store = Arc::new(MemoryStore::new());

    // First construction logs but never flushes
    {
        let first = build(
            store.clone(),
            RecordingBeacon::accepting(),
            RecordingRequest::succeeding(),
        );
        first.log("old-1", None);
        first.log("old-2", None);
    }

    let beacon = RecordingBeacon::accepting();
    let second = build(store.clone(), beacon.clone(), RecordingRequest::succeeding());
    second.log("before-init", None);
    second.init(CollectorConfig::with_url(URL));
    second.log("after-init", None);

    assert_eq!(second.flush().await, FlushOutcome::Beacon { events: 4 });

    let payload = beacon.last_payload();
    let sent: Vec<&str> = payload
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap())
        .collect();
    assert_eq!(sent, vec!["old-1", "old-2", "before-init", "after-init"]);
}

#[tokio::test]
async fn test_recovery_round_trip_is_field_for_field() {
    let store = Arc::new(MemoryStore::new());
    let first = build(
        store.clone(),
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );
    first.log("click", attrs(json!({"target": "button", "nested": {"x": [1, 2]}})));
    first.log("view", attrs(json!({"page": "/home"})));
    let logged = first.pending();
    drop(first);

    let second = build(
        store,
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );
    assert_eq!(second.pending(), logged);
}

#[test]
fn test_corrupt_stored_queue_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    store.set(QUEUE_STORAGE_KEY, "not json at all").unwrap();

    let collector = build(
        store,
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );
    assert_eq!(collector.pending_count(), 0);
    assert!(collector.log("fresh", None));
}

// ============================================
// Flush behaviour
// ============================================

#[tokio::test]
async fn test_flush_with_empty_queue_touches_no_transport() {
    let beacon = RecordingBeacon::accepting();
    let request = RecordingRequest::succeeding();
    let collector = build(Arc::new(MemoryStore::new()), beacon.clone(), request.clone());
    collector.init(CollectorConfig::with_url(URL));

    assert_eq!(
        collector.flush().await,
        FlushOutcome::Skipped(SkipReason::EmptyQueue)
    );
    assert_eq!(
        collector.flush().await,
        FlushOutcome::Skipped(SkipReason::EmptyQueue)
    );
    assert_eq!(beacon.calls(), 0);
    assert!(request.requests().is_empty());
}

#[tokio::test]
async fn test_refused_beacon_falls_back_to_one_request_per_flush() {
    let beacon = RecordingBeacon::refusing();
    let request = RecordingRequest::failing();
    let collector = build(Arc::new(MemoryStore::new()), beacon.clone(), request.clone());
    collector.init(CollectorConfig::with_url(URL));
    collector.log("a", None);

    collector.flush().await;
    assert_eq!(request.requests().len(), 1);
    collector.flush().await;
    assert_eq!(request.requests().len(), 2);
    assert_eq!(beacon.calls(), 2);

    let sent = &request.requests()[0];
    assert_eq!(sent.url, URL);
    assert_eq!(sent.content_type, "application/json");
    assert!(sent.keep_alive);

    let body: Value = serde_json::from_str(&sent.body).unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["event"], "a");
}

#[tokio::test]
async fn test_successful_fallback_clears_queue_and_store() {
    let store = Arc::new(MemoryStore::new());
    let request = RecordingRequest::succeeding();
    let collector = build(store.clone(), RecordingBeacon::refusing(), request.clone());
    collector.init(CollectorConfig::with_url(URL));
    collector.log("a", None);
    collector.log("b", None);

    assert_eq!(collector.flush().await, FlushOutcome::Request { events: 2 });
    assert_eq!(collector.pending_count(), 0);
    assert_eq!(store.get(QUEUE_STORAGE_KEY).unwrap().as_deref(), Some("[]"));

    // Nothing left to redeliver after a restart
    let restarted = build(store, RecordingBeacon::accepting(), request);
    assert_eq!(restarted.pending_count(), 0);
}

#[tokio::test]
async fn test_failed_fallback_retains_queue_and_store() {
    let store = Arc::new(MemoryStore::new());
    let collector = build(
        store.clone(),
        RecordingBeacon::refusing(),
        RecordingRequest::failing(),
    );
    collector.init(CollectorConfig::with_url(URL));
    collector.log("a", attrs(json!({"n": 1})));
    collector.log("b", attrs(json!({"n": 2})));

    let before = collector.pending();
    let stored_before = store.get(QUEUE_STORAGE_KEY).unwrap();

    let outcome = collector.flush().await;
    assert!(matches!(outcome, FlushOutcome::Failed { events: 2, .. }));
    assert_eq!(collector.pending(), before);
    assert_eq!(store.get(QUEUE_STORAGE_KEY).unwrap(), stored_before);
}

#[tokio::test]
async fn test_events_logged_during_inflight_request_survive() {
    let gate = GatedRequest::new();
    let collector = Arc::new(build(
        Arc::new(MemoryStore::new()),
        RecordingBeacon::refusing(),
        gate.clone(),
    ));
    collector.init(CollectorConfig::with_url(URL));
    collector.log("first", None);
    collector.log("second", None);

    let flushing = tokio::spawn({
        let collector = collector.clone();
        async move { collector.flush().await }
    });

    gate.entered.notified().await;
    collector.log("late", None);
    gate.open(1);

    assert_eq!(flushing.await.unwrap(), FlushOutcome::Request { events: 2 });
    assert_eq!(names(&collector.pending()), vec!["late"]);
    assert_eq!(collector.stats().events_delivered, 2);
}

#[tokio::test]
async fn test_overlapping_flushes_resend_and_spare_later_events() {
    let gate = GatedRequest::new();
    let collector = Arc::new(build(
        Arc::new(MemoryStore::new()),
        RecordingBeacon::refusing(),
        gate.clone(),
    ));
    collector.init(CollectorConfig::with_url(URL));
    collector.log("a", None);
    collector.log("b", None);

    let spawn_flush =
        |collector: Arc<Collector>| tokio::spawn(async move { collector.flush().await });

    let first = spawn_flush(collector.clone());
    gate.entered.notified().await;
    collector.log("late", None);

    // The second flush re-sends what the first has not confirmed yet
    let second = spawn_flush(collector.clone());
    gate.entered.notified().await;
    collector.log("after-both", None);

    gate.open(2);
    assert_eq!(first.await.unwrap(), FlushOutcome::Request { events: 2 });
    assert_eq!(second.await.unwrap(), FlushOutcome::Request { events: 3 });

    assert_eq!(gate.sent_names(), vec![vec!["a", "b"], vec!["a", "b", "late"]]);
    assert_eq!(names(&collector.pending()), vec!["after-both"]);
    assert_eq!(collector.stats().requests_delivered, 2);
    assert_eq!(collector.stats().events_delivered, 3);
}

// ============================================
// Identity
// ============================================

#[test]
fn test_user_id_stable_and_session_id_fresh_across_constructions() {
    let store = Arc::new(MemoryStore::new());
    let first = build(
        store.clone(),
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );
    let second = build(
        store,
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );

    assert_eq!(first.user_id(), second.user_id());
    assert_ne!(first.session_id(), second.session_id());
}

#[test]
fn test_identify_persists_for_next_construction() {
    let store = Arc::new(MemoryStore::new());
    let first = build(
        store.clone(),
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );
    first.identify("account-7");

    let second = build(
        store,
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );
    assert_eq!(second.user_id(), "account-7");
}

// ============================================
// Loader replay
// ============================================

#[tokio::test]
async fn test_loader_replay_skips_unknown_methods() {
    let collector = build(
        Arc::new(MemoryStore::new()),
        RecordingBeacon::accepting(),
        RecordingRequest::succeeding(),
    );
    let stub = LoaderStub::from_json(json!([["log", "a"], ["identify", "u1"], ["bogus", "x"]]));

    collector.process_queue(stub.into_calls()).await;

    assert_eq!(collector.user_id(), "u1");
    assert_eq!(names(&collector.pending()), vec!["a"]);
}

#[tokio::test]
async fn test_stub_recorded_calls_replay_in_order() {
    let beacon = RecordingBeacon::accepting();
    let mut stub = LoaderStub::new();
    stub.record("log", [json!("early"), json!({"source": "stub"})]);
    stub.record("init", [json!({"url": URL})]);
    stub.record("flush", []);
    stub.record("log", [json!("after-flush")]);

    let mut slot = CollectorSlot::with_stub(stub);
    let collector = slot
        .install(Arc::new(build(
            Arc::new(MemoryStore::new()),
            beacon.clone(),
            RecordingRequest::succeeding(),
        )))
        .await;

    let payload = beacon.last_payload();
    assert_eq!(payload[0]["event"], "early");
    assert_eq!(payload[0]["source"], "stub");
    assert_eq!(names(&collector.pending()), vec!["after-flush"]);
}

#[tokio::test]
async fn test_slot_replays_recorded_calls_on_install() {
    let beacon = RecordingBeacon::accepting();
    let mut slot = CollectorSlot::default();

    slot.call(json!(["init", {"url": URL}]).as_array().cloned().unwrap())
        .await;
    slot.call(json!(["log", "queued"]).as_array().cloned().unwrap())
        .await;
    assert!(slot.collector().is_none());

    let collector = slot
        .install(Arc::new(build(
            Arc::new(MemoryStore::new()),
            beacon.clone(),
            RecordingRequest::succeeding(),
        )))
        .await;
    assert_eq!(collector.url().as_deref(), Some(URL));
    assert_eq!(names(&collector.pending()), vec!["queued"]);

    // Calls after install run immediately
    slot.call(json!(["flush"]).as_array().cloned().unwrap())
        .await;
    assert_eq!(beacon.calls(), 1);
    assert_eq!(collector.pending_count(), 0);
}

// ============================================
// End-to-end scenario
// ============================================

#[tokio::test]
async fn test_two_clicks_flushed_by_beacon() {
    let beacon = RecordingBeacon::accepting();
    let request = RecordingRequest::succeeding();
    let collector = build(Arc::new(MemoryStore::new()), beacon.clone(), request.clone());

    collector.init(CollectorConfig::with_url(URL));
    collector.log("click", attrs(json!({"target": "button"})));
    collector.log("click", attrs(json!({"target": "link"})));

    assert_eq!(collector.flush().await, FlushOutcome::Beacon { events: 2 });
    assert_eq!(collector.pending_count(), 0);
    assert!(request.requests().is_empty());

    let payload = beacon.last_payload();
    let events = payload.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["event"] == "click"));
    assert_eq!(events[0]["target"], "button");
    assert_eq!(events[1]["target"], "link");
}
