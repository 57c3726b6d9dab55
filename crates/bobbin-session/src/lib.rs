//! bobbin-session — the subprocess-backed conversation session.
//!
//! A session owns one streaming CLI child process and one actor task that
//! multiplexes three prioritised inputs: the priority channel (interrupt,
//! force-send), the subprocess stream, and queued user commands. Which
//! inputs are live depends on the lifecycle state; user commands queue while
//! a response is in flight and drain when the turn completes.

pub mod error;
pub mod events;
pub mod session;
pub mod transport;

pub use error::SessionError;
pub use events::SessionEvent;
pub use session::{spawn_session, PriorityCommand, SessionCommand, SessionHandle};
pub use transport::{ClaudeTransport, SessionTransport, SpawnOptions, StreamItem};
