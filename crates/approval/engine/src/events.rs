//! Event publisher for approval domain events
//!
//! Publishing is fire-and-forget. Notification and audit consumers
//! subscribe to the broadcast channel; the engine never waits on them.

use approval_types::{ApprovalEvent, ApprovalEventEnvelope, TenantId, UserId};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Broadcasts approval events to any number of subscribers
#[derive(Clone, Debug)]
pub struct EventPublisher {
    sender: broadcast::Sender<ApprovalEventEnvelope>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an envelope
    pub fn publish(&self, envelope: ApprovalEventEnvelope) {
        tracing::debug!(
            event = envelope.event.name(),
            instance_id = %envelope.event.instance_id(),
            tenant = %envelope.tenant_id,
            "Approval event"
        );
        // Broadcast (ignore errors if no receivers)
        let _ = self.sender.send(envelope);
    }

    /// Wrap an event in an envelope and publish it
    pub fn emit(
        &self,
        tenant_id: &TenantId,
        actor: Option<&UserId>,
        event: ApprovalEvent,
        at: DateTime<Utc>,
    ) {
        self.publish(ApprovalEventEnvelope::new(
            tenant_id.clone(),
            actor.cloned(),
            event,
            at,
        ));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
