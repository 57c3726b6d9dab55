//! Subprocess transport: spawn the streaming CLI child, feed its stdin,
//! frame its stdout into wire records, and stop it with a bounded grace
//! period.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use bobbin_core::config::ClaudeConfig;
use bobbin_wire::{decode_line, encode_line, ControlRequestRecord, StreamRecord, UserRecord};

use crate::error::{Result, SessionError};

/// Buffered stream items between the reader task and the session actor.
const STREAM_BUFFER: usize = 256;

/// Extra system-prompt fragment asking the assistant to wrap replies in the
/// speech-ready JSON envelope.
const STRUCTURED_OUTPUT_PROMPT: &str = "Always answer with a single JSON object of the shape \
{\"full_text\": string, \"tts_text\": string, \"voice_tone\": string} where full_text is the \
complete answer, tts_text is a short speakable version, and voice_tone is one word.";

/// Per-start options for the subprocess.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Child working directory.
    pub project_path: PathBuf,
    /// Overrides the configured model.
    pub model: Option<String>,
    /// Ask the assistant to wrap output in the speech-ready JSON envelope.
    pub structured_output: bool,
    /// Bind the child to a pre-existing session id for history continuity.
    pub resume_session_id: Option<String>,
    /// Prepended to the assembled system prompt.
    pub system_prompt: Option<String>,
}

/// One item from the subprocess output stream.
#[derive(Debug)]
pub enum StreamItem {
    /// A decoded record, with the raw line kept for debugging.
    Record { record: StreamRecord, raw: String },
    /// A line that was not valid JSON. The session surfaces an error and
    /// keeps going.
    Malformed { error: String, raw: String },
    /// The stream ended; the child is gone or closing.
    Exit,
}

/// Lifecycle owner of one child process.
#[async_trait]
pub trait SessionTransport: Send {
    async fn start(&mut self, options: &SpawnOptions) -> Result<()>;

    /// The output stream. Available once after `start`.
    fn take_stream(&mut self) -> Option<mpsc::Receiver<StreamItem>>;

    /// Write one encoded `user` record terminated by a newline.
    async fn send_user(&mut self, text: &str, session_id: &str) -> Result<()>;

    /// Write one encoded control record.
    async fn send_control(&mut self, request: &ControlRequestRecord) -> Result<()>;

    /// Ask the child to stop; force-kill after the configured grace period.
    async fn stop(&mut self) -> Result<()>;
}

/// Spawns and drives the `claude` CLI in stream-json mode.
pub struct ClaudeTransport {
    config: ClaudeConfig,
    stop_grace: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stream: Option<mpsc::Receiver<StreamItem>>,
}

impl ClaudeTransport {
    pub fn new(config: ClaudeConfig, stop_grace_ms: u64) -> Self {
        Self {
            config,
            stop_grace: Duration::from_millis(stop_grace_ms),
            child: None,
            stdin: None,
            stream: None,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SessionError::Transport("child stdin is not open".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Build the argument list for one spawn. Kept separate so the flag set is
/// testable without a child process.
fn build_args(config: &ClaudeConfig, options: &SpawnOptions) -> Vec<String> {
    let mut args = vec![
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    if let Some(model) = options.model.as_ref().or(config.model.as_ref()) {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(session_id) = &options.resume_session_id {
        args.push("--resume".to_string());
        args.push(session_id.clone());
    }

    let mut system_fragments: Vec<&str> = Vec::new();
    if let Some(prompt) = &options.system_prompt {
        system_fragments.push(prompt);
    }
    if options.structured_output {
        system_fragments.push(STRUCTURED_OUTPUT_PROMPT);
    }
    if !system_fragments.is_empty() {
        args.push("--append-system-prompt".to_string());
        args.push(system_fragments.join("\n\n"));
    }

    if let Some(mode) = &config.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(mode.clone());
    }
    if !config.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(config.allowed_tools.join(","));
    }

    args
}

#[async_trait]
impl SessionTransport for ClaudeTransport {
    async fn start(&mut self, options: &SpawnOptions) -> Result<()> {
        let args = build_args(&self.config, options);
        debug!(command = %self.config.command, ?args, cwd = %options.project_path.display(), "spawning subprocess");

        let mut child = Command::new(&self.config.command)
            .args(&args)
            .current_dir(&options.project_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SessionError::Unavailable(format!(
                        "'{}' not found — install the CLI first",
                        self.config.command
                    ))
                } else {
                    SessionError::Unavailable(format!("failed to spawn subprocess: {e}"))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Transport("child stdout is not piped".to_string()))?;
        self.stdin = child.stdin.take();

        // Drain stderr into the log so child diagnostics are never lost.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "subprocess", "{line}");
                }
            });
        }

        // The reader task frames stdout and decodes each line; the actor
        // consumes the channel at its own pace.
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(next) = lines.next().await {
                let item = match next {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => match decode_line(&line) {
                        Ok(record) => StreamItem::Record { record, raw: line },
                        Err(e) => StreamItem::Malformed {
                            error: e.to_string(),
                            raw: line,
                        },
                    },
                    Err(e) => StreamItem::Malformed {
                        error: e.to_string(),
                        raw: String::new(),
                    },
                };
                if tx.send(item).await.is_err() {
                    return; // session gone
                }
            }
            let _ = tx.send(StreamItem::Exit).await;
            debug!("subprocess stream ended");
        });

        self.stream = Some(rx);
        self.child = Some(child);
        Ok(())
    }

    fn take_stream(&mut self) -> Option<mpsc::Receiver<StreamItem>> {
        self.stream.take()
    }

    async fn send_user(&mut self, text: &str, session_id: &str) -> Result<()> {
        let record = StreamRecord::User(UserRecord::text(text, session_id));
        let line = encode_line(&record)?;
        self.write_line(&line).await
    }

    async fn send_control(&mut self, request: &ControlRequestRecord) -> Result<()> {
        let record = StreamRecord::ControlRequest(request.clone());
        let line = encode_line(&record)?;
        self.write_line(&line).await
    }

    async fn stop(&mut self) -> Result<()> {
        // Closing stdin signals the child to wind down.
        self.stdin.take();

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let exited = tokio::select! {
            status = child.wait() => {
                debug!(?status, "subprocess exited within grace period");
                true
            }
            _ = tokio::time::sleep(self.stop_grace) => false,
        };
        if !exited {
            warn!(
                grace_ms = self.stop_grace.as_millis() as u64,
                "subprocess did not exit — killing"
            );
            child.kill().await?;
        }
        Ok(())
    }
}
