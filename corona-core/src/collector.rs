//! The collector: event buffer, durable mirror and delivery engine
//!
//! ## Queue lifecycle
//!
//! ```text
//! construct ──▶ recover stored queue ──▶ log() appends ──▶ flush()
//!                                             │                │
//!                                             ▼                ▼
//!                                      mirror to store   beacon ─ accepted ─▶ drop delivered
//!                                                           │
//!                                                       refused
//!                                                           ▼
//!                                                     POST fallback ─ ok ─▶ drop delivered
//!                                                           │
//!                                                         error ──▶ keep queue for next flush
//! ```
//!
//! Each queued event carries an in-memory sequence number. A successful flush
//! removes only the events up to the last sequence number it sent, so events
//! logged while a fallback request is in flight stay queued. The state lock is
//! never held across an `.await`.
//!
//! Nothing here returns an error to the caller: storage problems degrade to
//! in-memory operation and delivery problems leave events queued.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::CollectorConfig;
use crate::event::{Attributes, Event};
use crate::identity;
use crate::loader::{Command, RecordedCall};
use crate::store::{DurableMirror, KeyValueStore, USER_ID_STORAGE_KEY};
use crate::transport::{DeliveryRequest, Transports};

/// Why a flush did not touch the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No endpoint configured yet
    NoEndpoint,
    /// Nothing queued
    EmptyQueue,
}

/// What a flush did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    /// The beacon accepted the batch; delivery continues in the background
    Beacon { events: usize },
    /// The fallback request succeeded
    Request { events: usize },
    /// The fallback request failed; the batch is still queued
    Failed { events: usize, error: String },
}

impl FlushOutcome {
    /// True if the batch was handed off and removed from the queue
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Beacon { .. } | Self::Request { .. })
    }
}

/// Delivery counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Flushes that attempted a send
    pub flushes: usize,
    /// Batches accepted by the beacon
    pub beacon_handoffs: usize,
    /// Batches delivered by the fallback request
    pub requests_delivered: usize,
    /// Fallback requests that failed
    pub failures: usize,
    /// Events removed from the queue after a handoff
    pub events_delivered: usize,
}

#[derive(Debug)]
struct Queued {
    seq: u64,
    event: Event,
}

struct State {
    queue: VecDeque<Queued>,
    next_seq: u64,
    user_id: String,
    url: Option<String>,
    debug: bool,
    enabled: bool,
    stats: DeliveryStats,
}

impl State {
    fn push(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(Queued { seq, event });
    }
}

/// Telemetry collector.
///
/// One per host process; share it behind an [`Arc`].
pub struct Collector {
    store: Arc<dyn KeyValueStore>,
    transports: Transports,
    session_id: String,
    state: Mutex<State>,
}

impl Collector {
    /// Construct a collector, resolving identity and recovering unsent events.
    ///
    /// Logging works immediately; delivery waits for [`Collector::init`] to
    /// provide an endpoint.
    pub fn new(store: Arc<dyn KeyValueStore>, transports: Transports) -> Self {
        let user_id = identity::resolve_user_id(store.as_ref());
        let session_id = identity::new_session_id();

        let mut state = State {
            queue: VecDeque::new(),
            next_seq: 0,
            user_id,
            url: None,
            debug: false,
            enabled: true,
            stats: DeliveryStats::default(),
        };

        let recovered = DurableMirror::new(store.as_ref()).recover();
        if !recovered.is_empty() {
            tracing::debug!(events = recovered.len(), "Recovered events from storage");
        }
        for event in recovered {
            state.push(event);
        }

        Self {
            store,
            transports,
            session_id,
            state: Mutex::new(state),
        }
    }

    /// Apply configuration.
    ///
    /// Disabling purges the in-memory queue and the stored copy, and turns
    /// [`Collector::log`] into a no-op.
    pub fn init(&self, config: CollectorConfig) {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Collector configuration looks invalid");
        }

        let mut state = self.state();
        state.url = config.url.filter(|u| !u.is_empty());
        state.debug = config.debug;
        state.enabled = config.enabled;

        if state.debug {
            tracing::info!(url = ?state.url, enabled = state.enabled, "Collector initialized");
        }

        if !state.enabled {
            if state.debug {
                tracing::info!(purged = state.queue.len(), "Collector disabled, clearing queue");
            }
            state.queue.clear();
            self.mirror().clear();
        }
    }

    /// Queue an event.
    ///
    /// `attributes` are merged over the base fields, so a caller key such as
    /// `user_id` replaces the collector's value. Events are buffered even when
    /// no endpoint is configured yet. Returns false when the collector is
    /// disabled.
    pub fn log(&self, name: &str, attributes: Option<Attributes>) -> bool {
        let mut state = self.state();
        if !state.enabled {
            return false;
        }

        let event = Event::new(
            name,
            &state.user_id,
            &self.session_id,
            attributes.unwrap_or_default(),
        );
        if state.debug {
            tracing::info!(event = %name, fields = ?event.fields(), "Logged event");
        }

        state.push(event);
        self.sync(&state);
        true
    }

    /// Send everything queued.
    ///
    /// Tries the beacon first and falls back to an awaited POST. Queued events
    /// are dropped only once a transport confirms the handoff; on failure they
    /// stay queued for the next flush. No retries are scheduled.
    pub async fn flush(&self) -> FlushOutcome {
        let (url, payload, last_seq, count) = {
            let mut state = self.state();
            let Some(url) = state.url.clone() else {
                return FlushOutcome::Skipped(SkipReason::NoEndpoint);
            };
            let Some(last) = state.queue.back() else {
                return FlushOutcome::Skipped(SkipReason::EmptyQueue);
            };
            let last_seq = last.seq;
            let count = state.queue.len();

            let batch: Vec<&Event> = state.queue.iter().map(|q| &q.event).collect();
            let payload = match serde_json::to_string(&batch) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize event batch");
                    return FlushOutcome::Failed {
                        events: count,
                        error: e.to_string(),
                    };
                }
            };

            state.stats.flushes += 1;
            (url, payload, last_seq, count)
        };

        if self.transports.beacon.send_beacon(&url, &payload) {
            let mut state = self.state();
            state.stats.beacon_handoffs += 1;
            self.confirm_delivered(&mut state, last_seq);
            if state.debug {
                tracing::info!(events = count, "Flushed via beacon");
            }
            return FlushOutcome::Beacon { events: count };
        }

        let request = DeliveryRequest::json(&url, payload);
        let result = self.transports.request.post(&request).await;

        let mut state = self.state();
        match result {
            Ok(()) => {
                state.stats.requests_delivered += 1;
                self.confirm_delivered(&mut state, last_seq);
                if state.debug {
                    tracing::info!(events = count, "Flushed via request");
                }
                FlushOutcome::Request { events: count }
            }
            Err(e) => {
                state.stats.failures += 1;
                tracing::error!(error = %e, events = count, "Analytics flush failed");
                FlushOutcome::Failed {
                    events: count,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Replace the user id for subsequent events and persist it.
    pub fn identify(&self, user_id: &str) {
        let mut state = self.state();
        state.user_id = user_id.to_string();

        if let Err(e) = self.store.set(USER_ID_STORAGE_KEY, user_id) {
            tracing::debug!(error = %e, "Failed to persist user id");
        }
        if state.debug {
            tracing::info!(user_id = %user_id, "Identified user");
        }
    }

    /// Replay calls recorded before this collector existed, in order.
    ///
    /// Unknown or malformed calls are skipped without complaint.
    pub async fn process_queue(&self, calls: Vec<RecordedCall>) {
        if self.state().debug {
            tracing::info!(commands = calls.len(), "Processing queued commands");
        }

        for call in calls {
            match Command::parse(&call) {
                Some(command) => self.apply(command).await,
                None => tracing::trace!(call = ?call, "Skipping unrecognized queued command"),
            }
        }
    }

    /// Run one loader command against this collector.
    pub async fn apply(&self, command: Command) {
        match command {
            Command::Init(config) => self.init(config),
            Command::Log { name, attributes } => {
                self.log(&name, attributes);
            }
            Command::Flush => {
                self.flush().await;
            }
            Command::Identify(user_id) => self.identify(&user_id),
        }
    }

    pub fn user_id(&self) -> String {
        self.state().user_id.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot of queued events, oldest first
    pub fn pending(&self) -> Vec<Event> {
        self.state().queue.iter().map(|q| q.event.clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Configured endpoint, if any
    pub fn url(&self) -> Option<String> {
        self.state().url.clone()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.state().stats.clone()
    }

    /// Drop every queued event up to and including `last_seq`, then re-mirror.
    fn confirm_delivered(&self, state: &mut State, last_seq: u64) {
        let mut removed = 0;
        while state.queue.front().is_some_and(|q| q.seq <= last_seq) {
            state.queue.pop_front();
            removed += 1;
        }
        state.stats.events_delivered += removed;

        // A disable during the flush already purged the stored copy
        if state.enabled {
            self.sync(state);
        }
    }

    fn sync(&self, state: &State) {
        self.mirror().sync(state.queue.iter().map(|q| &q.event));
    }

    fn mirror(&self) -> DurableMirror<'_> {
        DurableMirror::new(self.store.as_ref())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
