use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::{
    chunker::Chunker,
    comparator::Comparator,
    config::AppConfig,
    fda_watch::FdaWatcher,
    llm::{Embedder, LanguageModel},
    reference_index::{ReferenceIndex, ReferenceStore},
    session_index::SessionStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: SessionStore,
    pub reference: ReferenceIndex,
    pub comparator: Comparator,
    pub sop_chunker: Chunker,
    pub fda_watcher: FdaWatcher,
    pub status: Arc<Mutex<Status>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub last_fda_check: Option<String>,
}

impl AppState {
    /// Ensambla los componentes del pipeline a partir de la configuración.
    pub fn build(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        reference_store: Arc<dyn ReferenceStore>,
    ) -> Result<Self> {
        let sop_chunker = Chunker::new(config.sop_chunking.clone())?;
        let reference_chunker = Chunker::new(config.reference_chunking.clone())?;

        let sessions = SessionStore::new(embedder.clone(), config.session_max_entries, config.session_idle);
        let reference = ReferenceIndex::new(reference_store, embedder, reference_chunker);
        let comparator = Comparator::new(sessions.clone(), reference.clone(), llm);
        let fda_watcher = FdaWatcher::new(config.fda_watch.clone(), reference.clone(), config.request_timeout)?;

        Ok(Self {
            config,
            sessions,
            reference,
            comparator,
            sop_chunker,
            fda_watcher,
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
                last_fda_check: None,
            })),
        })
    }

    /// Marca el servidor como ocupado con un mensaje.
    pub fn set_busy(&self, message: impl Into<String>) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        status.is_busy = true;
        status.message = message.into();
    }

    pub fn set_idle(&self, message: impl Into<String>) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        status.is_busy = false;
        status.message = message.into();
    }

    pub fn status_snapshot(&self) -> Status {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Marca el servidor como ocupado hasta que el guard se cierre o se suelte.
    pub fn busy(&self, message: impl Into<String>) -> BusyGuard<'_> {
        self.set_busy(message);
        BusyGuard { state: self, finished: false }
    }
}

/// Deja el estado en reposo aunque la petición se cancele a mitad.
pub struct BusyGuard<'a> {
    state: &'a AppState,
    finished: bool,
}

impl BusyGuard<'_> {
    pub fn finish(mut self, message: impl Into<String>) {
        self.finished = true;
        self.state.set_idle(message);
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.set_idle("Operación interrumpida.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reference_index::InMemoryReferenceStore,
        testing::{HashingEmbedder, ScriptedModel},
    };

    fn state() -> AppState {
        let cfg = AppConfig::from_lookup(|key| match key {
            "REFERENCE_BACKEND" => Some("memory".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::build(
            cfg,
            Arc::new(HashingEmbedder::default()),
            Arc::new(ScriptedModel::new("unused")),
            Arc::new(InMemoryReferenceStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn finished_guard_keeps_its_message() {
        let state = state();
        let guard = state.busy("Indexando...");
        assert!(state.status_snapshot().is_busy);
        guard.finish("Listo.");

        let status = state.status_snapshot();
        assert!(!status.is_busy);
        assert_eq!(status.message, "Listo.");
    }

    #[tokio::test]
    async fn cancelled_operation_releases_busy_status() {
        let state = state();
        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            let _guard = task_state.busy("Indexando...");
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        while !state.status_snapshot().is_busy {
            tokio::task::yield_now().await;
        }

        handle.abort();
        let _ = handle.await;

        let status = state.status_snapshot();
        assert!(!status.is_busy);
        assert_eq!(status.message, "Operación interrumpida.");
    }
}
