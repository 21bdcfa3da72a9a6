//! Per-document render-ready flags polled by the PDF capture process.
//!
//! `arm` starts a timer; the flag flips once the ready delay has passed. Flags
//! older than the retention window are dropped the next time a document is armed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// How long a flag is kept after it was armed.
pub const RETENTION: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
struct Flag {
    armed_at: Instant,
    ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ReadySignal {
    pub jsreport_ready_to_start: bool,
}

#[derive(Clone)]
pub struct ReadinessBoard {
    flags: Arc<RwLock<HashMap<String, Flag>>>,
    delay: Duration,
}

impl ReadinessBoard {
    pub fn new(delay: Duration) -> Self {
        Self {
            flags: Arc::new(RwLock::new(HashMap::new())),
            delay,
        }
    }

    /// Arms (or re-arms) the flag of `document_id`. It reads `false` until the
    /// ready delay has elapsed.
    pub async fn arm(&self, document_id: &str) {
        let armed_at = Instant::now();
        {
            let mut flags = self.flags.write().await;
            flags.retain(|_, flag| armed_at.duration_since(flag.armed_at) < RETENTION);
            flags.insert(
                document_id.to_string(),
                Flag {
                    armed_at,
                    ready: false,
                },
            );
        }
        debug!(document_id, delay_ms = self.delay.as_millis() as u64, "readiness armed");

        let flags = Arc::clone(&self.flags);
        let delay = self.delay;
        let document_id = document_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(flag) = flags.write().await.get_mut(&document_id) {
                // A re-arm in the meantime owns the flag now.
                if flag.armed_at == armed_at {
                    flag.ready = true;
                    info!(document_id = %document_id, "render ready");
                }
            }
        });
    }

    /// `None` when the document was never armed (or has been purged).
    pub async fn is_ready(&self, document_id: &str) -> Option<bool> {
        self.flags.read().await.get(document_id).map(|f| f.ready)
    }

    pub async fn signal(&self, document_id: &str) -> Option<ReadySignal> {
        self.is_ready(document_id).await.map(|ready| ReadySignal {
            jsreport_ready_to_start: ready,
        })
    }
}
