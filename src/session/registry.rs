use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::config::{replay, timing, Settings};
use crate::error::{AppError, AppResult};
use crate::protocol::ServerMessage;
use crate::pty::{OutputSink, PtyEvent, PtySpawner, SpawnRequest};
use crate::recording::RecordingStore;
use crate::replay::ReplayTarget;

/// Sender half of a socket's outbound queue.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

const DEFAULT_SESSION_NAME: &str = "Main";

/// The socket currently attached to a client. `id` distinguishes
/// successive connections so a stale disconnect cannot detach a newer one.
struct Connection {
    id: u64,
    tx: Outbound,
}

/// A bring-back in flight; `id` tells it apart from one that replaced it.
struct ActiveReplay {
    id: u64,
    cancel: CancellationToken,
}

/// Everything the server keeps for one browser profile. Survives socket
/// disconnects; only the reaper discards it.
struct ClientRecord {
    client_id: String,
    sessions: IndexMap<String, Session>,
    active: Option<String>,
    last_seen: Instant,
    connection: Option<Connection>,
    replay: Option<ActiveReplay>,
}

impl ClientRecord {
    fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            sessions: IndexMap::new(),
            active: None,
            last_seen: Instant::now(),
            connection: None,
            replay: None,
        }
    }

    /// Send to the live socket, if any. Nothing is queued for absent sockets.
    fn send(&self, msg: ServerMessage) {
        if let Some(conn) = &self.connection {
            let _ = conn.tx.send(msg);
        }
    }

    fn session_mut(&mut self, session_id: &str) -> AppResult<&mut Session> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::UnknownSession(session_id.to_string()))
    }

    /// Make `session_id` active, then clear and redraw its history. Runs
    /// under the client lock so no other output interleaves.
    fn switch_to(&mut self, session_id: &str) -> AppResult<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| AppError::UnknownSession(session_id.to_string()))?;
        let history = session.history.replay();
        self.active = Some(session_id.to_string());
        self.send(ServerMessage::SessionSwitched {
            id: session_id.to_string(),
        });
        self.send(ServerMessage::Clear {
            session_id: session_id.to_string(),
        });
        if !history.is_empty() {
            self.send(ServerMessage::Output {
                session_id: session_id.to_string(),
                data: history,
            });
        }
        Ok(())
    }

    fn on_pty_event(&mut self, session_id: &str, event: PtyEvent) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        match event {
            PtyEvent::Output(data) => {
                session.on_output(&data);
                if self.active.as_deref() == Some(session_id) {
                    self.send(ServerMessage::Output {
                        session_id: session_id.to_string(),
                        data,
                    });
                }
            }
            PtyEvent::Exited => {
                if let Some(recording_id) = session.on_exit() {
                    self.send(ServerMessage::RecordingStopped {
                        session_id: session_id.to_string(),
                        recording_id,
                    });
                }
            }
        }
    }

    fn close_all(&mut self) {
        for (_, mut session) in self.sessions.drain(..) {
            session.close();
        }
        self.active = None;
        if let Some(replay) = self.replay.take() {
            replay.cancel.cancel();
        }
    }
}

/// Owns every client's sessions. Mutations for one client are serialized
/// by that client's lock; different clients never contend beyond the
/// brief map lookup.
pub struct Registry {
    clients: Mutex<HashMap<String, Arc<Mutex<ClientRecord>>>>,
    spawner: Arc<dyn PtySpawner>,
    store: RecordingStore,
    settings: Arc<Settings>,
    next_connection: AtomicU64,
    next_replay: AtomicU64,
}

impl Registry {
    pub fn new(settings: Arc<Settings>, spawner: Arc<dyn PtySpawner>, store: RecordingStore) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            spawner,
            store,
            settings,
            next_connection: AtomicU64::new(1),
            next_replay: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &RecordingStore {
        &self.store
    }

    fn record(&self, client_id: &str) -> Arc<Mutex<ClientRecord>> {
        self.clients
            .lock()
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientRecord::new(client_id))))
            .clone()
    }

    fn existing(&self, client_id: &str) -> Option<Arc<Mutex<ClientRecord>>> {
        self.clients.lock().get(client_id).cloned()
    }

    /// Spawn a shell and add it to `record`, announcing it and making it
    /// the active session.
    fn spawn_into(
        &self,
        weak: Weak<Mutex<ClientRecord>>,
        record: &mut ClientRecord,
        name: String,
        cwd: PathBuf,
    ) -> AppResult<String> {
        let id = uuid::Uuid::new_v4().to_string();

        let sink_id = id.clone();
        let sink: OutputSink = Box::new(move |event| {
            if let Some(record) = weak.upgrade() {
                record.lock().on_pty_event(&sink_id, event);
            }
        });
        let request = SpawnRequest::new(self.settings.shell.clone(), cwd.clone());
        let pty = self
            .spawner
            .spawn(request, sink)
            .map_err(|e| AppError::Pty(format!("{:#}", e)))?;

        let recorder = if self.settings.record {
            match self.store.start_recording(&id, &name, &cwd) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Recording disabled for session");
                    None
                }
            }
        } else {
            None
        };

        let session = Session::new(id.clone(), name.clone(), cwd, self.settings.history_cap, pty, recorder);
        let recording_id = session.recording_id().map(str::to_string);
        record.sessions.insert(id.clone(), session);

        tracing::info!(client_id = %record.client_id, session_id = %id, name = %name, "Session created");
        record.send(ServerMessage::SessionCreated {
            id: id.clone(),
            name,
        });
        if let Some(recording_id) = recording_id {
            record.send(ServerMessage::RecordingStarted {
                session_id: id.clone(),
                recording_id,
            });
        }
        record.switch_to(&id)?;
        Ok(id)
    }

    /// Attach a socket. A new client gets a default session; a returning
    /// one gets its sessions announced and the active one redrawn.
    /// Returns the connection id to pass to [`Registry::disconnect`].
    pub fn connect(&self, client_id: &str, tx: Outbound) -> u64 {
        let arc = self.record(client_id);
        let weak = Arc::downgrade(&arc);
        let mut record = arc.lock();

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        if record.connection.is_some() {
            tracing::info!(client_id, "Replacing existing connection");
        }
        record.connection = Some(Connection { id, tx });
        record.last_seen = Instant::now();

        if record.sessions.is_empty() {
            tracing::info!(client_id, "New client");
            let root = self.settings.root.clone();
            if let Err(e) = self.spawn_into(weak, &mut record, DEFAULT_SESSION_NAME.to_string(), root) {
                tracing::error!(client_id, error = %e, "Failed to start default session");
                record.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
            return id;
        }

        tracing::info!(client_id, sessions = record.sessions.len(), "Client reconnected");
        for session in record.sessions.values() {
            record.send(ServerMessage::SessionCreated {
                id: session.id.clone(),
                name: session.name.clone(),
            });
        }
        let active = record
            .active
            .clone()
            .filter(|id| record.sessions.contains_key(id))
            .or_else(|| record.sessions.keys().next().cloned());
        if let Some(active) = active {
            if let Err(e) = record.switch_to(&active) {
                tracing::warn!(client_id, error = %e, "Failed to restore active session");
            }
        }
        id
    }

    /// Detach a socket. Ignored if a newer connection already took over;
    /// returns whether this connection was the attached one.
    pub fn disconnect(&self, client_id: &str, connection_id: u64) -> bool {
        let Some(arc) = self.existing(client_id) else {
            return false;
        };
        let mut record = arc.lock();
        if record.connection.as_ref().map(|c| c.id) != Some(connection_id) {
            return false;
        }
        record.connection = None;
        record.last_seen = Instant::now();
        tracing::info!(client_id, "Client disconnected");
        true
    }

    pub fn create_session(&self, client_id: &str, name: Option<String>, cwd: Option<PathBuf>) -> AppResult<String> {
        let arc = self.record(client_id);
        let weak = Arc::downgrade(&arc);
        let mut record = arc.lock();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Shell {}", record.sessions.len() + 1));
        let cwd = cwd.unwrap_or_else(|| self.settings.root.clone());
        self.spawn_into(weak, &mut record, name, cwd)
    }

    pub fn switch_session(&self, client_id: &str, session_id: &str) -> AppResult<()> {
        self.record(client_id).lock().switch_to(session_id)
    }

    /// Kill and drop a session. The last session is replaced by a fresh
    /// default one; closing the active session activates another.
    pub fn close_session(&self, client_id: &str, session_id: &str) -> AppResult<()> {
        let arc = self.record(client_id);
        let weak = Arc::downgrade(&arc);
        let mut record = arc.lock();

        let mut session = record
            .sessions
            .shift_remove(session_id)
            .ok_or_else(|| AppError::UnknownSession(session_id.to_string()))?;
        let recording_id = session.close();
        tracing::info!(client_id, session_id, "Session closed");
        record.send(ServerMessage::SessionClosed {
            id: session_id.to_string(),
        });
        if let Some(recording_id) = recording_id {
            record.send(ServerMessage::RecordingStopped {
                session_id: session_id.to_string(),
                recording_id,
            });
        }

        if record.sessions.is_empty() {
            record.active = None;
            self.spawn_into(weak, &mut record, DEFAULT_SESSION_NAME.to_string(), self.settings.root.clone())?;
        } else if record.active.as_deref() == Some(session_id) {
            if let Some(next) = record.sessions.keys().next().cloned() {
                record.switch_to(&next)?;
            }
        }
        Ok(())
    }

    pub fn rename_session(&self, client_id: &str, session_id: &str, name: &str) -> AppResult<()> {
        let arc = self.record(client_id);
        let mut record = arc.lock();
        record.session_mut(session_id)?.name = name.to_string();
        record.send(ServerMessage::SessionRenamed {
            id: session_id.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn input(&self, client_id: &str, session_id: &str, data: &str) -> AppResult<()> {
        self.record(client_id).lock().session_mut(session_id)?.input(data)
    }

    pub fn resize(&self, client_id: &str, session_id: &str, cols: u16, rows: u16) -> AppResult<()> {
        self.record(client_id)
            .lock()
            .session_mut(session_id)?
            .resize(cols, rows)
    }

    /// Deliver a message to the client's live socket, if any.
    pub fn send(&self, client_id: &str, msg: ServerMessage) {
        if let Some(arc) = self.existing(client_id) {
            arc.lock().send(msg);
        }
    }

    #[cfg(test)]
    pub fn session_ids(&self, client_id: &str) -> Vec<String> {
        self.existing(client_id)
            .map(|arc| arc.lock().sessions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_session(&self, client_id: &str) -> Option<String> {
        self.existing(client_id)?.lock().active.clone()
    }

    /// PID of a session's shell, for process probes.
    pub fn session_pid(&self, client_id: &str, session_id: &str) -> AppResult<Option<u32>> {
        let arc = self
            .existing(client_id)
            .ok_or_else(|| AppError::UnknownSession(session_id.to_string()))?;
        let mut record = arc.lock();
        Ok(record.session_mut(session_id)?.pid())
    }

    pub fn session_cwd(&self, client_id: &str, session_id: &str) -> AppResult<PathBuf> {
        let arc = self
            .existing(client_id)
            .ok_or_else(|| AppError::UnknownSession(session_id.to_string()))?;
        let mut record = arc.lock();
        Ok(record.session_mut(session_id)?.cwd.clone())
    }

    /// Register a new bring-back for the client, cancelling any in flight.
    /// Returns its id for [`Registry::finish_replay`] and its token.
    pub fn begin_replay(&self, client_id: &str) -> (u64, CancellationToken) {
        let id = self.next_replay.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = self.record(client_id).lock().replay.replace(ActiveReplay {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        (id, cancel)
    }

    /// Forget a completed bring-back, unless a newer one replaced it.
    pub fn finish_replay(&self, client_id: &str, replay_id: u64) {
        if let Some(arc) = self.existing(client_id) {
            let mut record = arc.lock();
            if record.replay.as_ref().is_some_and(|r| r.id == replay_id) {
                record.replay = None;
            }
        }
    }

    pub fn cancel_replay(&self, client_id: &str) {
        if let Some(arc) = self.existing(client_id) {
            if let Some(replay) = arc.lock().replay.take() {
                replay.cancel.cancel();
            }
        }
    }

    #[cfg(test)]
    pub fn replay_in_flight(&self, client_id: &str) -> bool {
        self.existing(client_id).is_some_and(|arc| arc.lock().replay.is_some())
    }

    /// Drop clients whose socket has been gone longer than the retention
    /// window, killing their shells. Returns the reaped client ids.
    pub fn reap(&self, now: Instant) -> Vec<String> {
        let retention = self.settings.retention;
        let mut clients = self.clients.lock();
        let expired: Vec<String> = clients
            .iter()
            .filter(|(_, arc)| {
                let record = arc.lock();
                record.connection.is_none() && now.saturating_duration_since(record.last_seen) >= retention
            })
            .map(|(id, _)| id.clone())
            .collect();

        for client_id in &expired {
            if let Some(arc) = clients.remove(client_id) {
                let mut record = arc.lock();
                tracing::info!(client_id = %client_id, sessions = record.sessions.len(), "Reaping idle client");
                record.close_all();
            }
        }
        expired
    }

    /// Periodic reaper until `shutdown` fires. `on_reap` runs for each
    /// discarded client, outside the registry locks.
    pub fn spawn_reaper<F>(self: &Arc<Self>, shutdown: CancellationToken, on_reap: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&str) + Send + 'static,
    {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(timing::REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let reaped = registry.reap(Instant::now());
                        if !reaped.is_empty() {
                            tracing::info!(reaped = reaped.len(), "Reaper sweep");
                        }
                        for client_id in &reaped {
                            on_reap(client_id);
                        }
                    }
                }
            }
        })
    }
}

/// A session seen through the registry, as a bring-back target.
pub struct SessionTarget {
    registry: Arc<Registry>,
    client_id: String,
    session_id: String,
}

impl SessionTarget {
    pub fn new(registry: Arc<Registry>, client_id: &str, session_id: &str) -> Self {
        Self {
            registry,
            client_id: client_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    fn with_session<T>(&self, f: impl FnOnce(&Session) -> T) -> Option<T> {
        let arc = self.registry.existing(&self.client_id)?;
        let record = arc.lock();
        record.sessions.get(&self.session_id).map(f)
    }
}

impl ReplayTarget for SessionTarget {
    fn mark(&self) -> u64 {
        self.with_session(|s| s.history.mark()).unwrap_or(0)
    }

    fn output_since(&self, mark: u64) -> String {
        self.with_session(|s| s.history.since(mark, replay::SCREEN_TAIL_BYTES))
            .unwrap_or_default()
    }

    fn send(&self, data: &str) -> AppResult<()> {
        self.registry.input(&self.client_id, &self.session_id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::fake::FakeSpawner;
    use std::time::Duration;

    struct Harness {
        registry: Arc<Registry>,
        spawner: FakeSpawner,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(Settings::for_tests(dir.path()));
        let spawner = FakeSpawner::default();
        let store = RecordingStore::new(settings.data_dir.join("recordings"));
        let registry = Arc::new(Registry::new(settings, Arc::new(spawner.clone()), store));
        Harness {
            registry,
            spawner,
            _dir: dir,
        }
    }

    fn socket() -> (Outbound, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn outputs(messages: &[ServerMessage]) -> String {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Output { data, .. } => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_connect_creates_main() {
        let h = harness();
        let (tx, mut rx) = socket();
        h.registry.connect("c1", tx);

        let messages = drain(&mut rx);
        let ServerMessage::SessionCreated { id, name } = &messages[0] else {
            panic!("expected session-created, got {:?}", messages[0]);
        };
        assert_eq!(name, "Main");
        assert!(matches!(&messages[1], ServerMessage::RecordingStarted { session_id, .. } if session_id == id));
        assert!(matches!(&messages[2], ServerMessage::SessionSwitched { id: switched } if switched == id));
        assert_eq!(h.spawner.count(), 1);
        assert_eq!(h.registry.active_session("c1").as_ref(), Some(id));
    }

    #[test]
    fn test_reconnect_restores_sessions_and_history() {
        let h = harness();
        let (tx, _rx) = socket();
        let conn = h.registry.connect("c1", tx);
        let second = h.registry.create_session("c1", Some("build".into()), None).unwrap();
        let before = h.registry.session_ids("c1");

        h.registry.disconnect("c1", conn);
        h.spawner.emit(1, "compiling\r\n");
        h.spawner.emit(1, "done\r\n");

        let (tx, mut rx) = socket();
        h.registry.connect("c1", tx);
        let messages = drain(&mut rx);

        let announced: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::SessionCreated { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(announced, before);
        assert_eq!(h.registry.active_session("c1"), Some(second.clone()));
        assert!(messages.contains(&ServerMessage::Clear { session_id: second.clone() }));
        assert_eq!(outputs(&messages), "compiling\r\ndone\r\n");
        assert_eq!(h.spawner.count(), 2);
    }

    #[test]
    fn test_stale_disconnect_keeps_new_socket() {
        let h = harness();
        let (tx1, _rx1) = socket();
        let first = h.registry.connect("c1", tx1);
        let (tx2, mut rx2) = socket();
        h.registry.connect("c1", tx2);
        drain(&mut rx2);

        assert!(!h.registry.disconnect("c1", first));
        h.spawner.emit(0, "still here");
        assert_eq!(outputs(&drain(&mut rx2)), "still here");
    }

    #[test]
    fn test_output_only_forwarded_for_active_session() {
        let h = harness();
        let (tx, mut rx) = socket();
        h.registry.connect("c1", tx);
        let main = h.registry.session_ids("c1")[0].clone();
        h.registry.create_session("c1", None, None).unwrap();
        drain(&mut rx);

        h.spawner.emit(0, "background");
        h.spawner.emit(1, "foreground");
        assert_eq!(outputs(&drain(&mut rx)), "foreground");

        h.registry.switch_session("c1", &main).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages[0], ServerMessage::SessionSwitched { id: main.clone() });
        assert_eq!(messages[1], ServerMessage::Clear { session_id: main.clone() });
        assert_eq!(outputs(&messages), "background");
    }

    #[test]
    fn test_closing_last_session_creates_main() {
        let h = harness();
        let (tx, mut rx) = socket();
        h.registry.connect("c1", tx);

        for _ in 0..3 {
            let ids = h.registry.session_ids("c1");
            assert_eq!(ids.len(), 1);
            h.registry.close_session("c1", &ids[0]).unwrap();
            assert_eq!(h.registry.session_ids("c1").len(), 1);
        }
        assert_eq!(h.spawner.count(), 4);
        assert!(h.spawner.shell(0).lock().killed);

        let messages = drain(&mut rx);
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::RecordingStopped { .. })));
    }

    #[test]
    fn test_closing_active_switches_to_remaining() {
        let h = harness();
        let (tx, _rx) = socket();
        h.registry.connect("c1", tx);
        let main = h.registry.session_ids("c1")[0].clone();
        let other = h.registry.create_session("c1", None, None).unwrap();

        h.registry.close_session("c1", &other).unwrap();
        assert_eq!(h.registry.active_session("c1"), Some(main));
        assert!(matches!(
            h.registry.close_session("c1", &other),
            Err(AppError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_input_and_resize_pass_through() {
        let h = harness();
        let (tx, _rx) = socket();
        h.registry.connect("c1", tx);
        let id = h.registry.session_ids("c1")[0].clone();

        h.registry.input("c1", &id, "echo hi\r").unwrap();
        h.registry.resize("c1", &id, 120, 40).unwrap();
        assert_eq!(h.spawner.written(0), "echo hi\r");
        assert_eq!(h.spawner.shell(0).lock().size, Some((120, 40)));
        assert!(matches!(h.registry.input("c1", "nope", "x"), Err(AppError::UnknownSession(_))));
    }

    #[test]
    fn test_history_is_bounded_per_session() {
        let h = harness();
        let (tx, _rx) = socket();
        h.registry.connect("c1", tx);
        for i in 0..50 {
            h.spawner.emit(0, &format!("{};", i));
        }
        let cap = h.registry.settings().history_cap;
        let arc = h.registry.existing("c1").unwrap();
        let record = arc.lock();
        let session = record.sessions.values().next().unwrap();
        assert!(session.history.len() <= cap);
        assert!(session.history.replay().ends_with("49;"));
    }

    #[test]
    fn test_exit_finalizes_recording() {
        let h = harness();
        let (tx, mut rx) = socket();
        h.registry.connect("c1", tx);
        let id = h.registry.session_ids("c1")[0].clone();
        h.spawner.emit(0, "bye");
        h.spawner.exit(0);

        let messages = drain(&mut rx);
        let recording_id = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::RecordingStopped { session_id, recording_id } if *session_id == id => {
                    Some(recording_id.clone())
                }
                _ => None,
            })
            .unwrap();
        let recording = h.registry.store().load(&recording_id).unwrap();
        assert!(recording.ended_at.is_some());
        assert_eq!(recording.events.len(), 1);

        h.registry.input("c1", &id, "ignored").unwrap();
        assert_eq!(h.spawner.written(0), "");
    }

    #[test]
    fn test_reaper_spares_connected_clients() {
        let h = harness();
        let (tx1, _rx1) = socket();
        let conn = h.registry.connect("gone", tx1);
        let (tx2, _rx2) = socket();
        h.registry.connect("here", tx2);
        h.registry.disconnect("gone", conn);

        let later = Instant::now() + h.registry.settings().retention + Duration::from_secs(1);
        assert!(h.registry.reap(Instant::now()).is_empty());
        assert_eq!(h.registry.reap(later), vec!["gone".to_string()]);
        assert!(h.spawner.shell(0).lock().killed);
        assert!(!h.spawner.shell(1).lock().killed);
        assert!(h.registry.session_ids("gone").is_empty());
        assert_eq!(h.registry.session_ids("here").len(), 1);
    }

    #[test]
    fn test_new_replay_cancels_previous() {
        let h = harness();
        let (_, first) = h.registry.begin_replay("c1");
        let (_, second) = h.registry.begin_replay("c1");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        h.registry.cancel_replay("c1");
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_finished_replay_is_forgotten() {
        let h = harness();
        let (old_id, _) = h.registry.begin_replay("c1");
        let (new_id, current) = h.registry.begin_replay("c1");

        h.registry.finish_replay("c1", old_id);
        assert!(h.registry.replay_in_flight("c1"));

        h.registry.finish_replay("c1", new_id);
        assert!(!h.registry.replay_in_flight("c1"));
        h.registry.cancel_replay("c1");
        assert!(!current.is_cancelled());
    }

    #[test]
    fn test_session_target_sees_new_output_only() {
        let h = harness();
        let (tx, _rx) = socket();
        h.registry.connect("c1", tx);
        let id = h.registry.session_ids("c1")[0].clone();
        let target = SessionTarget::new(h.registry.clone(), "c1", &id);

        h.spawner.emit(0, "old ");
        let mark = target.mark();
        h.spawner.emit(0, "new");
        assert_eq!(target.output_since(mark), "new");
        target.send("x").unwrap();
        assert_eq!(h.spawner.written(0), "x");
    }
}
