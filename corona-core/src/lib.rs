//! # corona-core
//!
//! Client-side telemetry collector for Corona Analytics.
//!
//! This library provides:
//! - An event buffer that stamps each event with user and session identity
//! - A durable mirror of that buffer, recovered on the next construction
//! - Delivery through a fire-and-forget beacon with an HTTP POST fallback
//! - Replay of calls recorded before the collector was constructed
//! - A reference ingestion sink
//!
//! Delivery is best-effort and at-least-once: events are only dropped after a
//! transport accepts them, and a failed flush leaves them for the next one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use corona_core::{Collector, CollectorConfig, SqliteStore, Transports};
//!
//! # async fn run() -> corona_core::Result<()> {
//! let config = CollectorConfig::with_url("https://collector.example/ingest");
//! let store = SqliteStore::open(&corona_core::Config::store_path())?;
//! let collector = Collector::new(Arc::new(store), Transports::http(&config)?);
//! collector.init(config);
//!
//! let attributes = serde_json::json!({"target": "button"});
//! collector.log("click", attributes.as_object().cloned());
//! collector.flush().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use collector::{Collector, DeliveryStats, FlushOutcome, SkipReason};
pub use config::{CollectorConfig, Config};
pub use error::{Error, Result};
pub use event::{Attributes, Event};
pub use lifecycle::{watch_visibility, Visibility};
pub use loader::{CollectorSlot, Command, LoaderStub, RecordedCall};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use transport::{BeaconTransport, DeliveryRequest, RequestTransport, Transports};

// Public modules
pub mod collector;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod lifecycle;
pub mod loader;
pub mod logging;
pub mod sink;
pub mod store;
pub mod transport;
