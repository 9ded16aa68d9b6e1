use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use conductor_core::ids::{RunId, ToolCallId};

use crate::error::RendezvousError;

type Key = (RunId, ToolCallId);

struct Slot {
    token: u64,
    tx: oneshot::Sender<serde_json::Value>,
}

/// Answer to an external submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubmitAck {
    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Process-wide pairing of frontend-tool waits with external submissions.
/// At most one wait is outstanding per `(run_id, tool_id)`.
#[derive(Default)]
pub struct RendezvousRegistry {
    pending: DashMap<Key, Slot>,
    next_token: AtomicU64,
}

impl RendezvousRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait. Fails fast if one is already pending for the key.
    pub fn register(
        self: &Arc<Self>,
        run_id: RunId,
        tool_id: ToolCallId,
    ) -> Result<PendingSubmit, RendezvousError> {
        let key = (run_id, tool_id);
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(RendezvousError::AlreadyPending {
                    run_id: key.0,
                    tool_id: key.1,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot { token, tx });
            }
        }
        debug!(run_id = %key.0, tool_id = %key.1, "rendezvous registered");

        Ok(PendingSubmit {
            registry: Arc::clone(self),
            key,
            token,
            rx,
        })
    }

    /// Register and wait in one step.
    pub async fn await_submit(
        self: &Arc<Self>,
        run_id: RunId,
        tool_id: ToolCallId,
        timeout: Duration,
    ) -> Result<serde_json::Value, RendezvousError> {
        self.register(run_id, tool_id)?.wait(timeout).await
    }

    /// Complete a pending wait. Submitting to a key with nothing pending is
    /// acknowledged with `accepted: false`, never an error.
    pub fn submit(
        &self,
        run_id: &RunId,
        tool_id: &ToolCallId,
        payload: serde_json::Value,
    ) -> SubmitAck {
        let key = (run_id.clone(), tool_id.clone());
        let Some((_, slot)) = self.pending.remove(&key) else {
            debug!(run_id = %run_id, tool_id = %tool_id, "submit with no pending request");
            return SubmitAck::rejected("no pending request");
        };
        match slot.tx.send(payload) {
            Ok(()) => SubmitAck::accepted(),
            Err(_) => {
                warn!(run_id = %run_id, tool_id = %tool_id, "submit raced with an abandoned wait");
                SubmitAck::rejected("no pending request")
            }
        }
    }

    pub fn is_pending(&self, run_id: &RunId, tool_id: &ToolCallId) -> bool {
        self.pending.contains_key(&(run_id.clone(), tool_id.clone()))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// A registered wait. Dropping it, whether completed, timed out or
/// abandoned, removes its handle from the registry unless a newer
/// registration has taken the key.
pub struct PendingSubmit {
    registry: Arc<RendezvousRegistry>,
    key: Key,
    token: u64,
    rx: oneshot::Receiver<serde_json::Value>,
}

impl PendingSubmit {
    pub async fn wait(mut self, timeout: Duration) -> Result<serde_json::Value, RendezvousError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(RendezvousError::Abandoned),
            Err(_) => Err(RendezvousError::Timeout(timeout)),
        }
    }
}

impl Drop for PendingSubmit {
    fn drop(&mut self) {
        let token = self.token;
        self.registry
            .pending
            .remove_if(&self.key, |_, slot| slot.token == token);
    }
}
