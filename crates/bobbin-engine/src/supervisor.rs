//! One engine per live conversation.
//!
//! The supervisor is a factory plus registry keyed by conversation id. It
//! guarantees at most one engine per conversation at any moment, removes
//! entries when their engine reports `Completed`, and persists nothing
//! itself.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use bobbin_core::config::EngineConfig;
use bobbin_core::types::ConversationId;
use bobbin_store::ConversationStore;

use crate::engine::{spawn_engine, EngineCommand, EngineHandle};
use crate::events::EngineEvent;
use crate::provider::ProviderRegistry;
use crate::tool::Tool;

pub struct Supervisor {
    store: Arc<dyn ConversationStore>,
    providers: Arc<ProviderRegistry>,
    tools: Vec<Arc<dyn Tool>>,
    config: EngineConfig,
    default_model: String,
    engines: Arc<DashMap<ConversationId, EngineHandle>>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        providers: Arc<ProviderRegistry>,
        tools: Vec<Arc<dyn Tool>>,
        config: EngineConfig,
        default_model: String,
    ) -> Self {
        Self {
            store,
            providers,
            tools,
            config,
            default_model,
            engines: Arc::new(DashMap::new()),
        }
    }

    /// Return the live engine for `conversation_id`, creating and starting
    /// one if none exists. The dashmap entry API serialises concurrent
    /// callers, so two tabs asking at once still share one engine.
    pub fn get_or_create(&self, conversation_id: &ConversationId) -> EngineHandle {
        let handle = self
            .engines
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                info!(conversation = %conversation_id, "starting engine");
                let handle = spawn_engine(
                    conversation_id.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.providers),
                    self.tools.clone(),
                    self.config.clone(),
                    self.default_model.clone(),
                );
                handle.command(EngineCommand::Initialize);
                watch_for_completion(Arc::clone(&self.engines), handle.clone());
                handle
            })
            .clone();
        handle
    }

    /// Whether a conversation currently has a live engine.
    pub fn is_live(&self, conversation_id: &ConversationId) -> bool {
        self.engines.contains_key(conversation_id)
    }

    /// Drop the registry entry for a conversation. The actor itself winds
    /// down once the last outstanding handle is gone.
    pub fn dispose(&self, conversation_id: &ConversationId) {
        if self.engines.remove(conversation_id).is_some() {
            debug!(conversation = %conversation_id, "engine disposed");
        }
    }

    pub fn live_count(&self) -> usize {
        self.engines.len()
    }
}

/// Watch the engine's event stream and drop the registry entry when the
/// engine completes a turn.
fn watch_for_completion(
    engines: Arc<DashMap<ConversationId, EngineHandle>>,
    handle: EngineHandle,
) {
    tokio::spawn(async move {
        let conversation_id = handle.conversation_id().clone();
        let (snapshot, mut rx) = handle.subscribe();
        if snapshot.iter().any(|e| matches!(e, EngineEvent::Completed)) {
            engines.remove(&conversation_id);
            return;
        }
        loop {
            match rx.recv().await {
                Ok(EngineEvent::Completed) => {
                    debug!(conversation = %conversation_id, "engine completed — evicting");
                    engines.remove(&conversation_id);
                    return;
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
