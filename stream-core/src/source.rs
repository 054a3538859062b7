use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::{
    channel::{ChannelManager, ChannelOutput, ChannelRequest},
    decoder::DecoderFactory,
    error::{Error, Result},
    frame::ElementId,
};

fn default_start_timeout_secs() -> u64 {
    120
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    /// Channels started with the engine, in the same shape as a start request.
    #[serde(default)]
    pub channels: Vec<serde_json::Value>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout_secs(),
            channels: Vec::new(),
        }
    }
}

impl SourceConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| Error::config(format!("source: {}", e)))
    }
}

/// Entry element of a graph. Owns the channel manager whose workers feed its output.
pub struct SourceElement {
    id: ElementId,
    manager: ChannelManager,
    autostart: Vec<ChannelRequest>,
}

impl SourceElement {
    pub fn new(
        id: ElementId,
        config: &SourceConfig,
        decoders: Arc<dyn DecoderFactory>,
        output: ChannelOutput,
    ) -> Result<Self> {
        let autostart = config
            .channels
            .iter()
            .cloned()
            .map(ChannelRequest::from_value)
            .collect::<Result<Vec<_>>>()?;
        let manager = ChannelManager::with_start_timeout(
            decoders,
            output,
            Duration::from_secs(config.start_timeout_secs.max(1)),
        );
        Ok(Self {
            id,
            manager,
            autostart,
        })
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    /// Starts the configured channels. Failures are logged; the engine keeps running.
    pub async fn autostart(&self) {
        for request in &self.autostart {
            let stream_id = request.channel_id;
            if let Err(e) = self.manager.start(request.clone()).await {
                log::error!("source {}: autostart of channel {} failed: {}", self.id, stream_id, e);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        log::info!("source {} stopped all channels", self.id);
    }
}
