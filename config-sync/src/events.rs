use crate::types::{ChangeRecord, ConfigVersion, GatewayName};
use tokio::sync::mpsc;

/// Changes made through a write scoped to one gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayChangeEvent {
    pub gateway: GatewayName,
    pub changes: Vec<ChangeRecord>,
}

/// A batch of changes that may span several gateways.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiGatewayChangeEvent {
    pub changes: Vec<ChangeRecord>,
}

/// Explicit config version bumps; each one reloads a whole bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialReloadEvent {
    pub versions: Vec<ConfigVersion>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    Gateway(GatewayChangeEvent),
    MultiGateway(MultiGatewayChangeEvent),
    PartialReload(PartialReloadEvent),
}

/// Hands change events to the rest of the system. Fire and forget.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, event: ChangeEvent);
}

pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, topic: &str, event: ChangeEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!(topic, "Dropping change event, no consumer is running");
        }
    }
}

/// A publisher whose events are received on the returned channel.
pub fn channel_publisher() -> (ChannelPublisher, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelPublisher { tx }, rx)
}
