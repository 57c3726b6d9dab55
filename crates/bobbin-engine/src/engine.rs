//! The per-conversation engine actor for in-process chat providers.
//!
//! One engine owns one conversation's current thread while it is live. All
//! state lives on the actor task; commands arrive on an unbounded channel
//! and events leave through a replayable [`EventBus`]. The LLM→tool loop
//! runs as a child task so the actor stays responsive to `Interrupt` and
//! re-`Initialize` while a turn is in flight.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bobbin_core::config::{EngineConfig, EVENT_RING_CAPACITY};
use bobbin_core::entities::{AgentDefinition, Conversation, Project, Thread};
use bobbin_core::events::EventBus;
use bobbin_core::message::{unresolved_tool_calls, ContentItem, Message};
use bobbin_core::types::{ConversationId, MessageId, Role, ThreadId};
use bobbin_store::error::Result as StoreResult;
use bobbin_store::ConversationStore;

use crate::convert::to_provider_messages;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::executor::execute_batch;
use crate::provider::{ChatProvider, ChatRequest, ProviderRegistry};
use crate::tool::{to_definitions, Tool, ToolContext};

/// Commands accepted by a conversation engine.
#[derive(Debug)]
pub enum EngineCommand {
    /// Load (or reload) conversation state. Must be the first command; a
    /// repeat reloads without duplicating history and cancels a running loop.
    Initialize,
    /// Append a user message and launch the LLM loop.
    SendUserMessage { items: Vec<ContentItem> },
    /// Swap the conversation's agent definition.
    SwitchDefinition { definition: AgentDefinition },
    /// Fork the thread with `message_id` replaced by new content.
    EditMessage {
        message_id: MessageId,
        new_content: Vec<ContentItem>,
    },
    /// Fork the thread with the listed messages removed.
    DeleteMessages { ids: Vec<MessageId> },
    /// Cancel the running loop, if any.
    Interrupt,
}

/// Cheap cloneable handle to a live engine.
#[derive(Clone)]
pub struct EngineHandle {
    conversation_id: ConversationId,
    commands: mpsc::UnboundedSender<EngineCommand>,
    events: Arc<EventBus<EngineEvent>>,
}

impl EngineHandle {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Enqueue a command. Returns false if the engine has shut down.
    pub fn command(&self, command: EngineCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Replay snapshot plus live tail of the engine's event stream.
    pub fn subscribe(&self) -> (Vec<EngineEvent>, broadcast::Receiver<EngineEvent>) {
        self.events.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Spawn an engine actor for `conversation_id` and return its handle.
///
/// The actor runs until every handle is dropped; `Initialize` must be sent
/// before anything else.
pub fn spawn_engine(
    conversation_id: ConversationId,
    store: Arc<dyn ConversationStore>,
    providers: Arc<ProviderRegistry>,
    tools: Vec<Arc<dyn Tool>>,
    config: EngineConfig,
    default_model: String,
) -> EngineHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (loop_tx, loop_rx) = mpsc::unbounded_channel();
    let events = Arc::new(EventBus::new(EVENT_RING_CAPACITY));

    let actor = EngineActor {
        conversation_id: conversation_id.clone(),
        store,
        providers,
        tools,
        config,
        default_model,
        events: Arc::clone(&events),
        conversation: None,
        project: None,
        definition: None,
        thread: None,
        messages: Vec::new(),
        next_position: 0,
        running: false,
        generation: 0,
        cancel: CancellationToken::new(),
        loop_tx,
    };
    tokio::spawn(actor.run(command_rx, loop_rx));

    EngineHandle {
        conversation_id,
        commands: command_tx,
        events,
    }
}

// ---------------------------------------------------------------------------
// Actor internals
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum LoopResult {
    Completed,
    Interrupted,
    Failed(String),
}

struct LoopOutcome {
    generation: u64,
    messages: Vec<Message>,
    next_position: u32,
    result: LoopResult,
}

struct EngineActor {
    conversation_id: ConversationId,
    store: Arc<dyn ConversationStore>,
    providers: Arc<ProviderRegistry>,
    tools: Vec<Arc<dyn Tool>>,
    config: EngineConfig,
    default_model: String,
    events: Arc<EventBus<EngineEvent>>,

    conversation: Option<Conversation>,
    project: Option<Project>,
    definition: Option<AgentDefinition>,
    thread: Option<Thread>,
    messages: Vec<Message>,
    next_position: u32,

    running: bool,
    /// Bumped on every loop launch and every re-initialise; outcomes from a
    /// stale generation are dropped instead of clobbering reloaded state.
    generation: u64,
    cancel: CancellationToken,
    loop_tx: mpsc::UnboundedSender<LoopOutcome>,
}

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut loop_rx: mpsc::UnboundedReceiver<LoopOutcome>,
    ) {
        loop {
            tokio::select! {
                Some(outcome) = loop_rx.recv() => self.finish_loop(outcome),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }
        // Handle dropped: cancel whatever is still in flight.
        self.cancel.cancel();
        debug!(conversation = %self.conversation_id, "engine actor stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Initialize => self.initialize(),
            EngineCommand::SendUserMessage { items } => self.send_user_message(items),
            EngineCommand::SwitchDefinition { definition } => self.switch_definition(definition),
            EngineCommand::EditMessage {
                message_id,
                new_content,
            } => self.edit_message(message_id, new_content),
            EngineCommand::DeleteMessages { ids } => self.delete_messages(ids),
            EngineCommand::Interrupt => self.interrupt(),
        }
    }

    // -- lifecycle ---------------------------------------------------------

    fn initialize(&mut self) {
        if self.running {
            info!(conversation = %self.conversation_id, "re-initialise cancels running loop");
            self.cancel.cancel();
            self.running = false;
        }
        self.generation += 1;

        if let Err(e) = self.try_initialize() {
            self.fail(e.to_string());
        }
    }

    fn try_initialize(&mut self) -> Result<(), EngineError> {
        let conversation = self
            .store
            .find_conversation(&self.conversation_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "conversation",
                id: self.conversation_id.to_string(),
            })?;
        let project = self
            .store
            .find_project(&conversation.project_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "project",
                id: conversation.project_id.to_string(),
            })?;
        let definition = self
            .store
            .find_agent_definition(&conversation.agent_definition_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "agent definition",
                id: conversation.agent_definition_id.to_string(),
            })?;
        let thread = self
            .store
            .find_thread(&conversation.current_thread_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "thread",
                id: conversation.current_thread_id.to_string(),
            })?;

        let mut messages = self
            .store
            .find_messages_in_thread(&conversation.id, &thread.id)?;
        let mut position = messages.len() as u32;

        self.repair_orphans(&thread.id, &mut messages, &mut position)?;

        info!(
            conversation = %conversation.id,
            thread = %thread.id,
            messages = messages.len(),
            "engine initialised"
        );

        self.conversation = Some(conversation);
        self.project = Some(project);
        self.thread = Some(thread);
        self.messages = messages;
        self.next_position = position;

        self.definition = Some(definition.clone());
        self.events.publish(EngineEvent::Initialized);
        self.events
            .publish(EngineEvent::DefinitionSwitched { definition });
        self.publish_state();
        Ok(())
    }

    fn interrupt(&mut self) {
        if self.running {
            info!(conversation = %self.conversation_id, "interrupting running loop");
            self.cancel.cancel();
        } else {
            debug!("interrupt with no loop running — ignored");
        }
    }

    fn switch_definition(&mut self, definition: AgentDefinition) {
        if self.conversation.is_none() {
            self.warn_event("engine not initialised; cannot switch definition");
            return;
        }
        let result = self
            .store
            .save_agent_definition(&definition)
            .and_then(|_| {
                self.store
                    .update_agent_definition(&self.conversation_id, &definition.id)
            });
        if let Err(e) = result {
            self.fail(e.to_string());
            return;
        }
        if let Some(conversation) = &mut self.conversation {
            conversation.agent_definition_id = definition.id.clone();
        }
        info!(definition = %definition.name, "definition switched");
        self.definition = Some(definition.clone());
        self.events
            .publish(EngineEvent::DefinitionSwitched { definition });
    }

    // -- the turn ----------------------------------------------------------

    fn send_user_message(&mut self, items: Vec<ContentItem>) {
        if self.conversation.is_none() {
            self.warn_event("engine not initialised; dropping user message");
            return;
        }
        if self.running {
            self.warn_event("a turn is already running; dropping user message");
            return;
        }
        let Some(thread_id) = self.thread.as_ref().map(|t| t.id.clone()) else {
            self.warn_event("engine has no current thread; dropping user message");
            return;
        };

        // Close any unresolved tool calls left by a crashed or interrupted
        // previous run before the provider sees the history again.
        let mut messages = std::mem::take(&mut self.messages);
        let mut position = self.next_position;
        let repaired = self.repair_orphans(&thread_id, &mut messages, &mut position);
        self.messages = messages;
        self.next_position = position;
        if let Err(e) = repaired {
            self.fail(e.to_string());
            return;
        }

        let user_message = Message::new(self.conversation_id.clone(), Role::User, items);
        if let Err(e) = self.append_message(&thread_id, user_message) {
            self.fail(e.to_string());
            return;
        }
        self.publish_state();

        self.launch_loop(thread_id);
    }

    fn launch_loop(&mut self, thread_id: ThreadId) {
        let (Some(definition), Some(project)) = (&self.definition, &self.project) else {
            self.warn_event("engine missing definition or project; cannot run loop");
            return;
        };

        let provider = match self.providers.resolve(definition.provider) {
            Ok(p) => p,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        let tools: Vec<Arc<dyn Tool>> = self
            .tools
            .iter()
            .filter(|t| definition.allows_tool(t.name()))
            .cloned()
            .collect();

        self.running = true;
        self.generation += 1;
        self.cancel = CancellationToken::new();

        let params = LoopParams {
            generation: self.generation,
            conversation_id: self.conversation_id.clone(),
            thread_id,
            messages: self.messages.clone(),
            next_position: self.next_position,
            provider,
            tools,
            ctx: Arc::new(ToolContext {
                project_path: project.path.clone(),
            }),
            system: definition.assembled_system_prompt(),
            model: definition
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            max_iterations: self.config.max_iterations,
            max_tokens: self.config.max_tokens,
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            cancel: self.cancel.clone(),
        };
        let outcome_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            let outcome = run_llm_loop(params).await;
            let _ = outcome_tx.send(outcome);
        });
    }

    fn finish_loop(&mut self, outcome: LoopOutcome) {
        if outcome.generation != self.generation {
            debug!("dropping outcome from a superseded loop");
            return;
        }
        self.running = false;
        self.messages = outcome.messages;
        self.next_position = outcome.next_position;

        match outcome.result {
            LoopResult::Completed => self.events.publish(EngineEvent::Completed),
            LoopResult::Interrupted => self.events.publish(EngineEvent::Interrupted),
            LoopResult::Failed(message) => self.fail(message),
        }
    }

    // -- forking -----------------------------------------------------------

    fn edit_message(&mut self, message_id: MessageId, new_content: Vec<ContentItem>) {
        if self.running {
            self.warn_event("cannot edit while a turn is running");
            return;
        }
        let Some(position) = self.messages.iter().position(|m| m.id == message_id) else {
            self.warn_event(format!("message not in current thread: {message_id}"));
            return;
        };

        if let Err(e) = self.try_edit(position, new_content) {
            self.fail(e.to_string());
        }
    }

    fn try_edit(&mut self, position: usize, new_content: Vec<ContentItem>) -> StoreResult<()> {
        let origin_id = match &self.thread {
            Some(t) => t.id.clone(),
            None => return Ok(()),
        };
        let original = self.messages[position].clone();

        let new_thread = Thread::forked(
            self.conversation_id.clone(),
            origin_id.clone(),
            position as u32,
        );
        self.store.save_thread(&new_thread)?;

        // Copy the prefix [0..position) into the fork at the same positions.
        let mut new_messages: Vec<Message> = self.messages[..position].to_vec();
        for (index, message) in new_messages.iter().enumerate() {
            self.store
                .add_thread_message(&new_thread.id, &message.id, index as u32)?;
        }
        let mut next_position = new_messages.len() as u32;

        // A prefix that ends in an assistant turn with unanswered calls gets
        // the synthetic error results before the edited message lands.
        self.repair_orphans(&new_thread.id, &mut new_messages, &mut next_position)?;

        let edited = original.edited_copy(new_content);
        self.store.save_message(&edited)?;
        self.store
            .add_thread_message(&new_thread.id, &edited.id, next_position)?;
        next_position += 1;
        self.events.publish(EngineEvent::MessageEmitted {
            message: edited.clone(),
        });
        new_messages.push(edited);

        self.adopt_thread(new_thread, origin_id, new_messages, next_position)
    }

    fn delete_messages(&mut self, ids: Vec<MessageId>) {
        if self.running {
            self.warn_event("cannot delete while a turn is running");
            return;
        }
        let Some(first_position) = self.messages.iter().position(|m| ids.contains(&m.id)) else {
            self.warn_event("none of the listed messages are in the current thread");
            return;
        };

        if let Err(e) = self.try_delete(&ids, first_position) {
            self.fail(e.to_string());
        }
    }

    fn try_delete(&mut self, ids: &[MessageId], first_position: usize) -> StoreResult<()> {
        let origin_id = match &self.thread {
            Some(t) => t.id.clone(),
            None => return Ok(()),
        };

        let new_thread = Thread::forked(
            self.conversation_id.clone(),
            origin_id.clone(),
            first_position as u32,
        );
        self.store.save_thread(&new_thread)?;

        // Keep everything not listed, preserving relative order.
        let mut new_messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| !ids.contains(&m.id))
            .cloned()
            .collect();
        for (index, message) in new_messages.iter().enumerate() {
            self.store
                .add_thread_message(&new_thread.id, &message.id, index as u32)?;
        }
        let mut next_position = new_messages.len() as u32;

        self.repair_orphans(&new_thread.id, &mut new_messages, &mut next_position)?;

        self.adopt_thread(new_thread, origin_id, new_messages, next_position)
    }

    /// Repoint the conversation at the forked thread and emit the fork
    /// events. The origin thread is left untouched.
    fn adopt_thread(
        &mut self,
        new_thread: Thread,
        origin_id: ThreadId,
        messages: Vec<Message>,
        next_position: u32,
    ) -> StoreResult<()> {
        self.store
            .update_current_thread(&self.conversation_id, &new_thread.id)?;
        if let Some(conversation) = &mut self.conversation {
            conversation.current_thread_id = new_thread.id.clone();
        }

        info!(
            origin = %origin_id,
            fork = %new_thread.id,
            messages = messages.len(),
            "thread forked"
        );

        let new_thread_id = new_thread.id.clone();
        self.thread = Some(new_thread);
        self.messages = messages;
        self.next_position = next_position;

        self.events.publish(EngineEvent::ThreadForked {
            new_thread_id,
            origin_thread_id: origin_id,
        });
        self.publish_state();
        Ok(())
    }

    // -- helpers -----------------------------------------------------------

    /// Synthesise one error tool-result message per unanswered tool call in
    /// `messages`, persisting and emitting each.
    fn repair_orphans(
        &self,
        thread_id: &ThreadId,
        messages: &mut Vec<Message>,
        position: &mut u32,
    ) -> StoreResult<()> {
        for (call_id, tool_name) in unresolved_tool_calls(messages) {
            warn!(call_id = %call_id, tool = %tool_name, "repairing orphaned tool call");
            let repair = Message::new(
                self.conversation_id.clone(),
                Role::User,
                vec![ContentItem::interrupted_tool_result(&call_id, &tool_name)],
            );
            self.store.save_message(&repair)?;
            self.store
                .add_thread_message(thread_id, &repair.id, *position)?;
            *position += 1;
            self.events.publish(EngineEvent::MessageEmitted {
                message: repair.clone(),
            });
            messages.push(repair);
        }
        Ok(())
    }

    /// Persist a fresh message at the next position and emit it.
    fn append_message(&mut self, thread_id: &ThreadId, message: Message) -> StoreResult<()> {
        self.store.save_message(&message)?;
        self.store
            .add_thread_message(thread_id, &message.id, self.next_position)?;
        self.next_position += 1;
        self.events.publish(EngineEvent::MessageEmitted {
            message: message.clone(),
        });
        self.messages.push(message);
        Ok(())
    }

    fn publish_state(&self) {
        self.events.publish(EngineEvent::StateChanged {
            messages: Arc::new(self.messages.clone()),
        });
    }

    fn warn_event(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(conversation = %self.conversation_id, "{message}");
        self.events.publish(EngineEvent::Warning { message });
    }

    fn fail(&self, message: String) {
        error!(conversation = %self.conversation_id, "{message}");
        self.events.publish(EngineEvent::Error { message });
    }
}

// ---------------------------------------------------------------------------
// The LLM loop (runs as a child task)
// ---------------------------------------------------------------------------

struct LoopParams {
    generation: u64,
    conversation_id: ConversationId,
    thread_id: ThreadId,
    messages: Vec<Message>,
    next_position: u32,
    provider: Arc<dyn ChatProvider>,
    tools: Vec<Arc<dyn Tool>>,
    ctx: Arc<ToolContext>,
    system: String,
    model: String,
    max_iterations: usize,
    max_tokens: u32,
    store: Arc<dyn ConversationStore>,
    events: Arc<EventBus<EngineEvent>>,
    cancel: CancellationToken,
}

async fn run_llm_loop(mut p: LoopParams) -> LoopOutcome {
    let mut messages = std::mem::take(&mut p.messages);
    let mut position = p.next_position;
    let tool_defs = to_definitions(&p.tools);

    let outcome = |messages: Vec<Message>, position: u32, result: LoopResult| LoopOutcome {
        generation: p.generation,
        messages,
        next_position: position,
        result,
    };

    for iteration in 0..p.max_iterations {
        let request = ChatRequest {
            model: p.model.clone(),
            system: p.system.clone(),
            messages: to_provider_messages(&messages),
            tools: tool_defs.clone(),
            max_tokens: p.max_tokens,
        };
        debug!(iteration, model = %p.model, "llm loop iteration");

        let response = tokio::select! {
            _ = p.cancel.cancelled() => {
                return outcome(messages, position, LoopResult::Interrupted);
            }
            response = p.provider.send(&request) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => return outcome(messages, position, LoopResult::Failed(e.to_string())),
        };

        let calls = response.tool_calls();

        let mut assistant = Message::assistant(p.conversation_id.clone(), response.items.clone());
        assistant.provider_meta = response_meta(&response);
        if let Err(e) = append(&p, &mut messages, &mut position, assistant) {
            return outcome(messages, position, LoopResult::Failed(e.to_string()));
        }

        if calls.is_empty() {
            info!(iteration, "llm loop complete — no more tool calls");
            return outcome(messages, position, LoopResult::Completed);
        }

        let batch = execute_batch(&p.tools, &calls, Arc::clone(&p.ctx), &p.cancel).await;
        let return_direct = batch.return_direct;

        // All of a batch's results land in one user-role message, even when
        // the batch was cut short by cancellation.
        let results = Message::new(p.conversation_id.clone(), Role::User, batch.items);
        if let Err(e) = append(&p, &mut messages, &mut position, results) {
            return outcome(messages, position, LoopResult::Failed(e.to_string()));
        }

        if p.cancel.is_cancelled() {
            return outcome(messages, position, LoopResult::Interrupted);
        }
        if return_direct {
            info!(iteration, "tool requested return-direct — loop ends");
            return outcome(messages, position, LoopResult::Completed);
        }
    }

    warn!(
        max_iterations = p.max_iterations,
        "llm loop hit maximum iterations"
    );
    p.events.publish(EngineEvent::Warning {
        message: format!("loop stopped after {} iterations", p.max_iterations),
    });
    outcome(messages, position, LoopResult::Completed)
}

/// Persist the message, index it, emit it — write lands before the event.
fn append(
    p: &LoopParams,
    messages: &mut Vec<Message>,
    position: &mut u32,
    message: Message,
) -> StoreResult<()> {
    p.store.save_message(&message)?;
    p.store
        .add_thread_message(&p.thread_id, &message.id, *position)?;
    *position += 1;
    p.events.publish(EngineEvent::MessageEmitted {
        message: message.clone(),
    });
    messages.push(message);
    p.events.publish(EngineEvent::StateChanged {
        messages: Arc::new(messages.clone()),
    });
    Ok(())
}

fn response_meta(response: &crate::provider::ChatResponse) -> Option<serde_json::Value> {
    let mut meta = serde_json::Map::new();
    if !response.stop_reason.is_empty() {
        meta.insert(
            "stop_reason".to_string(),
            serde_json::Value::String(response.stop_reason.clone()),
        );
    }
    if let Some(usage) = &response.usage {
        meta.insert("usage".to_string(), usage.clone());
    }
    meta.insert(
        "model".to_string(),
        serde_json::Value::String(response.model.clone()),
    );
    Some(serde_json::Value::Object(meta))
}
