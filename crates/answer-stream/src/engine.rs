use std::sync::Arc;

use crate::config::EngineConfig;
use crate::conversation::{Conversation, ConversationConfig};
use crate::errors::EngineError;
use crate::http::HttpTransport;
use crate::transport::TransportAdapter;

pub(crate) struct EngineInner {
    pub(crate) transport: Arc<dyn TransportAdapter>,
    pub(crate) config: EngineConfig,
}

/// Entry point for creating conversations.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Starts a builder for choosing a transport and configuration.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Builds an engine over [`HttpTransport`] with config read from the
    /// environment.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::builder()
            .transport(Arc::new(HttpTransport::from_env()?))
            .config(EngineConfig::from_env()?)
            .build()
    }

    /// Creates a new conversation with an empty history.
    pub fn conversation(&self, config: ConversationConfig) -> Conversation {
        Conversation::new(self.inner.clone(), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

/// Builder used to assemble an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    transport: Option<Arc<dyn TransportAdapter>>,
    config: Option<EngineConfig>,
}

impl EngineBuilder {
    /// Sets the transport carrying requests to the backend.
    pub fn transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Validates the configuration and builds the engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        let transport = self
            .transport
            .ok_or_else(|| EngineError::Config("a transport must be registered".into()))?;
        let config = self
            .config
            .ok_or_else(|| EngineError::Config("an engine config is required".into()))?;
        config.validate()?;
        Ok(Engine {
            inner: Arc::new(EngineInner { transport, config }),
        })
    }
}
