pub mod twilio;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::Channel;

#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    pub external_id: Option<String>,
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<DeliveryReceipt>;
}

/// Configured adapters by channel. Dispatching to an unconfigured channel is
/// a send failure, not a panic.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Channel, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(channel, adapter);
    }

    pub fn resolve(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn configured(&self) -> Vec<Channel> {
        self.adapters.keys().copied().collect()
    }
}
