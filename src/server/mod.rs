//! HTTP and WebSocket surface.

mod http;
mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::files::{FileAccess, FileSystem, WatchManager};
use crate::llm::LlmClient;
use crate::pty::PtySpawner;
use crate::recording::RecordingStore;
use crate::session::Registry;
use crate::transcript::Classifier;

/// Everything a handler needs, cloned into each request.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<Registry>,
    pub access: Arc<FileAccess>,
    pub watches: Arc<WatchManager>,
    pub llm: Arc<LlmClient>,
    pub classifier: Arc<Classifier>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, spawner: Arc<dyn PtySpawner>, fs: Arc<dyn FileSystem>) -> Self {
        let store = RecordingStore::new(settings.data_dir.join("recordings"));
        let registry = Arc::new(Registry::new(settings.clone(), spawner, store));
        let access = Arc::new(FileAccess::new(settings.root.clone(), fs));
        let watches = WatchManager::new(access.clone(), registry.clone());
        let llm = Arc::new(LlmClient::new(settings.llm_command.clone(), settings.llm_timeout));
        let classifier = Arc::new(Classifier::new(settings.classifier.clone()));
        Self {
            settings,
            registry,
            access,
            watches,
            llm,
            classifier,
        }
    }

    /// Run recording-store work (directory walks, JSON-lines reads) on the
    /// blocking pool.
    pub async fn with_store<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RecordingStore) -> AppResult<T> + Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || work(registry.store()))
            .await
            .map_err(|e| AppError::Storage(format!("store task failed: {}", e)))?
    }

    /// Reap idle clients periodically. A reaped client's file watches go
    /// with it.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let watches = self.watches.clone();
        self.registry
            .spawn_reaper(shutdown, move |client_id| watches.unwatch_all(client_id))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/api/file", get(http::stream_file))
        .route("/api/recordings", get(http::list_recordings))
        .route(
            "/api/recordings/:id",
            get(http::get_recording).delete(http::delete_recording),
        )
        .route("/api/recordings/:id/transcript", get(http::get_transcript))
        .route(
            "/api/recordings/:id/summary",
            get(http::get_summary).post(http::generate_summary),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use super::*;
    use crate::files::RealFs;
    use crate::pty::fake::FakeSpawner;

    pub fn state_with(settings: Settings) -> (AppState, FakeSpawner) {
        let spawner = FakeSpawner::default();
        let state = AppState::new(Arc::new(settings), Arc::new(spawner.clone()), Arc::new(RealFs));
        (state, spawner)
    }

    pub fn state(root: &Path) -> (AppState, FakeSpawner) {
        state_with(Settings::for_tests(root))
    }
}
