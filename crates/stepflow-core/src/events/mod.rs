//! Notification channel - process-owned fan-out of run events.
//!
//! The run orchestrator is the only writer; any number of observers
//! subscribe. Delivery is at-most-once and never blocks the writer: a slow
//! subscriber lags and loses events (it is told how many), an absent one
//! simply receives nothing. Observers recover via store snapshots.
//!
//! Lifecycle is explicit: the channel is opened by whoever owns the process
//! state, subscribers `subscribe`/`unsubscribe` (or drop their
//! [`Subscription`]), and `close` ends every stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::models::step::StepStatus;
use crate::models::workflow::WorkflowStatus;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Workflow,
    Step,
}

/// Status carried by a run event. Workflow events use running and the
/// terminal states; step events use running, completed and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl EventStatus {
    pub fn as_step_status(&self) -> StepStatus {
        match self {
            Self::Running => StepStatus::Running,
            Self::Completed => StepStatus::Completed,
            // A step never reports cancelled; treat it as the failure it is.
            Self::Failed | Self::Cancelled => StepStatus::Failed,
        }
    }

    pub fn as_workflow_status(&self) -> WorkflowStatus {
        match self {
            Self::Running => WorkflowStatus::Running,
            Self::Completed => WorkflowStatus::Completed,
            Self::Failed => WorkflowStatus::Failed,
            Self::Cancelled => WorkflowStatus::Cancelled,
        }
    }
}

/// A single state transition during a run. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub workflow_id: String,
    pub run_id: u64,
    pub scope: EventScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn workflow(workflow_id: &str, run_id: u64, status: EventStatus) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            run_id,
            scope: EventScope::Workflow,
            step_id: None,
            order: None,
            status,
            output: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn step(
        workflow_id: &str,
        run_id: u64,
        step_id: &str,
        order: u32,
        status: EventStatus,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            run_id,
            scope: EventScope::Step,
            step_id: Some(step_id.to_string()),
            order: Some(order),
            status,
            output: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_workflow_scoped(&self) -> bool {
        self.scope == EventScope::Workflow
    }
}

/// Bookkeeping for one attached observer.
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    pub id: String,
    pub name: String,
    pub subscribed_at: DateTime<Utc>,
}

struct ChannelInner {
    sender: Option<broadcast::Sender<RunEvent>>,
    subscribers: HashMap<String, SubscriberInfo>,
}

/// Thread-safe broadcast channel for run events.
#[derive(Clone)]
pub struct NotificationChannel {
    inner: Arc<Mutex<ChannelInner>>,
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::open(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationChannel {
    /// Open a channel buffering up to `capacity` events per subscriber.
    pub fn open(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                sender: Some(sender),
                subscribers: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelInner> {
        // A panicking subscriber must not take the channel down with it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Publish ────────────────────────────────────────────────────────

    /// Publish an event to every current subscriber. Best-effort: returns
    /// the number of receivers it was queued for, 0 if none or closed.
    pub fn publish(&self, event: RunEvent) -> usize {
        let sender = self.lock().sender.clone();
        let Some(sender) = sender else {
            tracing::warn!(
                "[Channel] Dropping {:?} event for workflow {}: channel closed",
                event.status,
                event.workflow_id
            );
            return 0;
        };
        match sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(
                    "[Channel] No subscribers for {:?} event of workflow {}",
                    event.status,
                    event.workflow_id
                );
                0
            }
        }
    }

    // ─── Subscriptions ──────────────────────────────────────────────────

    /// Attach a new observer. Returns `None` if the channel has been closed.
    pub fn subscribe(&self, name: &str) -> Option<Subscription> {
        let mut inner = self.lock();
        let receiver = inner.sender.as_ref()?.subscribe();
        let info = SubscriberInfo {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            subscribed_at: Utc::now(),
        };
        inner.subscribers.insert(info.id.clone(), info.clone());
        tracing::debug!("[Channel] Subscriber {} ({}) attached", info.id, info.name);
        Some(Subscription {
            id: info.id,
            receiver,
            channel: self.clone(),
        })
    }

    /// Detach an observer by id. Returns whether it was attached.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self.lock().subscribers.remove(subscription_id).is_some();
        if removed {
            tracing::debug!("[Channel] Subscriber {} detached", subscription_id);
        }
        removed
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.lock().subscribers.values().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Close the channel. Subscribers drain what is queued, then see the end
    /// of the stream; later publishes are dropped.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.sender = None;
        inner.subscribers.clear();
        tracing::info!("[Channel] Closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().sender.is_none()
    }
}

/// Outcome of waiting for the next event on a subscription.
#[derive(Debug)]
pub enum Received {
    Event(RunEvent),
    /// The subscriber fell behind and `n` events were dropped for it.
    Lagged(u64),
    Closed,
}

/// A live attachment to the notification channel. Detaches on drop.
pub struct Subscription {
    id: String,
    receiver: broadcast::Receiver<RunEvent>,
    channel: NotificationChannel,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Received {
        match self.receiver.recv().await {
            Ok(event) => Received::Event(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("[Channel] Subscriber {} lagged by {} events", self.id, n);
                Received::Lagged(n)
            }
            Err(broadcast::error::RecvError::Closed) => Received::Closed,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Received> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Received::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Received::Lagged(n)),
            Err(broadcast::error::TryRecvError::Closed) => Some(Received::Closed),
            Err(broadcast::error::TryRecvError::Empty) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unsubscribe(&self.id);
    }
}
