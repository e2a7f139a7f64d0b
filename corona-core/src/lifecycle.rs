//! Host visibility hook
//!
//! The host reports when it is about to go away (a page turning hidden, a
//! process about to exit) and the collector flushes in response.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collector::{Collector, FlushOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

impl Collector {
    /// Flush when the host turns hidden; otherwise do nothing.
    pub async fn on_visibility_change(&self, visibility: Visibility) -> Option<FlushOutcome> {
        match visibility {
            Visibility::Hidden => Some(self.flush().await),
            Visibility::Visible => None,
        }
    }
}

/// Flush `collector` every time `visibility` changes to hidden.
///
/// The task ends when every sender is dropped.
pub fn watch_visibility(
    collector: Arc<Collector>,
    mut visibility: watch::Receiver<Visibility>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while visibility.changed().await.is_ok() {
            let current = *visibility.borrow_and_update();
            if let Some(outcome) = collector.on_visibility_change(current).await {
                tracing::debug!(?outcome, "Flushed on visibility change");
            }
        }
    })
}
