//! The multiplexed client socket: one per browser tab, many sessions each.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::config::timing;
use crate::diff::compute_word_diff;
use crate::error::{AppError, AppResult};
use crate::llm::CorrectionMode;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::pty::probe;
use crate::replay::{self, Injector, ReplayPhase};
use crate::session::{Outbound, SessionTarget};
use crate::transcript::format_transcript;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let client_id = params.client_id.filter(|id| !id.trim().is_empty());
    ws.on_upgrade(move |socket| async move {
        match client_id {
            Some(client_id) => serve_client(socket, state, client_id).await,
            None => reject(socket).await,
        }
    })
}

/// Close a socket that arrived without a client identity.
async fn reject(mut socket: WebSocket) {
    let err = AppError::ProtocolViolation("clientId query parameter is required".into());
    tracing::warn!(error = %err, "Refusing socket");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Owned(err.to_string()),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn serve_client(socket: WebSocket, state: AppState, client_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.to_json())).await.is_err() {
                break;
            }
        }
    });

    let connection_id = state.registry.connect(&client_id, tx.clone());
    tracing::info!(client_id = %client_id, connection_id, "Socket attached");
    let handler = ClientHandler::new(state.clone(), client_id.clone(), tx);

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => handler.handle_text(&text),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "Socket read failed");
                break;
            }
        }
    }

    // File watches outlive the socket; the reaper releases them.
    if !state.registry.disconnect(&client_id, connection_id) {
        tracing::debug!(client_id = %client_id, connection_id, "Stale socket closed");
    }
    drop(handler);
    writer.abort();
}

/// Executable name of the assistant launch command, e.g. `claude`.
fn assistant_program(command: &str) -> &str {
    let first = command.split_whitespace().next().unwrap_or(command);
    Path::new(first)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(first)
}

/// Dispatches one socket's inbound messages. Every failure becomes a
/// reply on the same socket.
pub struct ClientHandler {
    state: AppState,
    client_id: String,
    tx: Outbound,
}

impl ClientHandler {
    pub fn new(state: AppState, client_id: String, tx: Outbound) -> Self {
        Self { state, client_id, tx }
    }

    fn reply(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg);
    }

    pub fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle(msg),
            Err(e) => {
                tracing::warn!(client_id = %self.client_id, error = %e, "Undecodable message");
                self.reply(ServerMessage::Error {
                    message: format!("invalid message: {}", e),
                });
            }
        }
    }

    /// Anything that waits on a process runs on its own task so keystrokes
    /// are never queued behind it.
    pub fn handle(&self, msg: ClientMessage) {
        let registry = &self.state.registry;
        let client_id = self.client_id.as_str();

        let result: AppResult<()> = match msg {
            ClientMessage::CreateSession { name } => registry.create_session(client_id, name, None).map(drop),
            ClientMessage::SwitchSession { session_id } => registry.switch_session(client_id, &session_id),
            ClientMessage::CloseSession { session_id } => registry.close_session(client_id, &session_id),
            ClientMessage::RenameSession { session_id, name } => {
                registry.rename_session(client_id, &session_id, &name)
            }
            ClientMessage::Input { session_id, data } => registry.input(client_id, &session_id, &data),
            ClientMessage::Resize {
                session_id,
                cols,
                rows,
            } => registry.resize(client_id, &session_id, cols, rows),
            ClientMessage::CheckClaudeRunning => {
                self.check_assistant();
                Ok(())
            }
            ClientMessage::CorrectEnglish {
                session_id,
                text,
                mode,
            } => {
                self.correct(session_id, text, mode);
                Ok(())
            }
            ClientMessage::GetCwd { session_id } => {
                self.get_cwd(&session_id);
                Ok(())
            }
            ClientMessage::ListDirectory { path, show_hidden } => {
                self.list_directory(path, show_hidden);
                Ok(())
            }
            ClientMessage::ReadFile { path } => {
                self.read_file(path);
                Ok(())
            }
            ClientMessage::WatchFile { path } => {
                self.watch_file(path);
                Ok(())
            }
            ClientMessage::UnwatchFile { path } => {
                self.state.watches.unwatch(client_id, &path);
                Ok(())
            }
            ClientMessage::BringBack {
                recording_id,
                use_summary,
            } => {
                self.bring_back(recording_id, use_summary);
                Ok(())
            }
            ClientMessage::CancelBringBack => {
                registry.cancel_replay(client_id);
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!(client_id, code = e.code(), error = %e, "Message failed");
            self.reply(ServerMessage::Error { message: e.to_string() });
        }
    }

    fn check_assistant(&self) {
        let registry = &self.state.registry;
        let pid = registry
            .active_session(&self.client_id)
            .and_then(|id| registry.session_pid(&self.client_id, &id).ok().flatten());
        let program = assistant_program(&self.state.settings.assistant_command).to_string();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let running = probe::descendant_running(pid, &program, timing::PROBE_TIMEOUT).await;
            let _ = tx.send(ServerMessage::ClaudeRunningStatus { running });
        });
    }

    fn correct(&self, session_id: String, text: String, mode: Option<String>) {
        let llm = self.state.llm.clone();
        let tx = self.tx.clone();
        let client_id = self.client_id.clone();
        tokio::spawn(async move {
            let mode = CorrectionMode::parse(mode.as_deref());
            let reply = match llm.correct(&text, mode).await {
                Ok(corrected) => ServerMessage::CorrectionResult {
                    session_id,
                    diff: compute_word_diff(&text, &corrected),
                    original: text,
                    corrected,
                },
                Err(e) => {
                    if e.is_timeout() {
                        tracing::warn!(client_id = %client_id, "Correction timed out");
                    } else {
                        tracing::warn!(client_id = %client_id, error = %e, "Correction failed");
                    }
                    ServerMessage::CorrectionError {
                        session_id,
                        original: text,
                        error: e.to_string(),
                    }
                }
            };
            let _ = tx.send(reply);
        });
    }

    /// Unknown sessions and failed probes both answer with a directory
    /// rather than an error.
    fn get_cwd(&self, session_id: &str) {
        let registry = &self.state.registry;
        let root = self.state.access.root().to_path_buf();
        let fallback = registry
            .session_cwd(&self.client_id, session_id)
            .unwrap_or_else(|_| root.clone());
        let pid = registry.session_pid(&self.client_id, session_id).ok().flatten();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let cwd = probe::cwd_or(pid, &fallback, timing::PROBE_TIMEOUT).await;
            let _ = tx.send(ServerMessage::CwdResult {
                cwd: cwd.display().to_string(),
                home: root.display().to_string(),
            });
        });
    }

    fn list_directory(&self, path: String, show_hidden: bool) {
        let reply = match self.state.access.list_directory(&path, show_hidden) {
            Ok((resolved, entries)) => ServerMessage::DirectoryListing {
                path: resolved.display().to_string(),
                entries: Some(entries),
                error: None,
            },
            Err(e) => ServerMessage::DirectoryListing {
                path,
                entries: None,
                error: Some(e.to_string()),
            },
        };
        self.reply(reply);
    }

    fn read_file(&self, path: String) {
        let reply = match self.state.access.read_file(&path) {
            Ok((resolved, content)) => ServerMessage::FileContent {
                name: resolved.file_name().map(|n| n.to_string_lossy().to_string()),
                path: resolved.display().to_string(),
                content: Some(content),
                error: None,
            },
            Err(e) => ServerMessage::FileContent {
                path,
                content: None,
                error: Some(e.to_string()),
                name: None,
            },
        };
        self.reply(reply);
    }

    fn watch_file(&self, path: String) {
        if let Err(e) = self.state.watches.watch(&self.client_id, &path) {
            self.reply(ServerMessage::FileUpdate {
                path,
                content: None,
                error: Some(e.to_string()),
            });
        }
    }

    /// Replaces any bring-back already running for this client.
    fn bring_back(&self, recording_id: String, use_summary: bool) {
        let (replay_id, cancel) = self.state.registry.begin_replay(&self.client_id);
        let state = self.state.clone();
        let client_id = self.client_id.clone();
        tokio::spawn(async move {
            let phase = run_bring_back(&state, &client_id, &recording_id, use_summary, cancel).await;
            state.registry.finish_replay(&client_id, replay_id);
            tracing::info!(client_id = %client_id, recording_id = %recording_id, ?phase, "Bring-back finished");
        });
    }
}

/// Session name, starting directory and context text for a bring-back.
/// Without a cached summary the transcript is used even if a summary
/// was asked for.
fn prepare_bring_back(state: &AppState, recording_id: &str, use_summary: bool) -> AppResult<(String, PathBuf, String)> {
    let store = state.registry.store();
    let recording = store.load(recording_id)?;
    let summary = if use_summary {
        store.load_summary(recording_id)?
    } else {
        None
    };
    let context = match summary {
        Some(summary) => replay::context_from_summary(&summary),
        None => {
            if use_summary {
                tracing::info!(recording_id, "No cached summary, replaying transcript");
            }
            let segments = state.classifier.classify(&recording.events);
            replay::context_from_transcript(&format_transcript(&segments))
        }
    };

    let cwd = PathBuf::from(&recording.cwd);
    let cwd = if cwd.is_dir() {
        cwd
    } else {
        state.settings.root.clone()
    };
    Ok((format!("{} (restored)", recording.session_name), cwd, context))
}

async fn run_bring_back(
    state: &AppState,
    client_id: &str,
    recording_id: &str,
    use_summary: bool,
    cancel: CancellationToken,
) -> ReplayPhase {
    let registry = state.registry.clone();
    let report = |phase: ReplayPhase| {
        tracing::debug!(client_id, recording_id, ?phase, "Bring-back phase");
        registry.send(
            client_id,
            ServerMessage::BringBackStatus {
                recording_id: recording_id.to_string(),
                state: phase,
            },
        );
    };

    let prepared = {
        let state = state.clone();
        let recording_id = recording_id.to_string();
        tokio::task::spawn_blocking(move || prepare_bring_back(&state, &recording_id, use_summary))
            .await
            .map_err(|e| AppError::Storage(format!("bring-back task failed: {}", e)))
            .and_then(|prepared| prepared)
    };
    let (name, cwd, context) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::warn!(client_id, recording_id, error = %e, "Bring-back could not start");
            report(ReplayPhase::Failed);
            return ReplayPhase::Failed;
        }
    };
    if cancel.is_cancelled() {
        report(ReplayPhase::Cancelled);
        return ReplayPhase::Cancelled;
    }

    let session_id = match registry.create_session(client_id, Some(name), Some(cwd)) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(client_id, recording_id, error = %e, "Bring-back session failed to start");
            report(ReplayPhase::Failed);
            return ReplayPhase::Failed;
        }
    };
    let target = SessionTarget::new(registry.clone(), client_id, &session_id);
    Injector::new(&target, cancel)
        .run(&state.settings.assistant_command, &context, report)
        .await
}
