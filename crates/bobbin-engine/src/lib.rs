//! bobbin-engine — the in-process conversation engine.
//!
//! Each live conversation is owned by one actor that loads history from the
//! store, drives the provider→tool loop, forks threads on edit/delete, and
//! publishes every step on a replayable event stream. The [`Supervisor`]
//! keeps the one-engine-per-conversation invariant.

pub mod convert;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod provider;
pub mod providers;
pub mod supervisor;
pub mod tool;

pub use engine::{spawn_engine, EngineCommand, EngineHandle};
pub use error::EngineError;
pub use events::EngineEvent;
pub use executor::{execute_batch, BatchOutcome};
pub use provider::{
    ChatProvider, ChatRequest, ChatResponse, ProviderError, ProviderRegistry, ToolCallSpec,
    ToolDefinition,
};
pub use supervisor::Supervisor;
pub use tool::{Tool, ToolContext, ToolOutput};
