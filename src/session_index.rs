//! Índices de similitud efímeros, uno por sesión de usuario.
//!
//! Cada subida de SOP construye un [`SessionIndex`] inmutable que se publica de
//! una sola vez en el [`SessionStore`]. Las búsquedas trabajan sobre un
//! `Arc` del índice, así que una reconstrucción concurrente nunca deja ver un
//! índice a medio construir.
//!
//! El almacén expulsa sesiones por capacidad y por inactividad; una sesión
//! expulsada se comporta igual que una que nunca se construyó.

use std::{cmp::Ordering, sync::Arc, time::Duration};

use moka::future::Cache;
use tracing::{debug, info};

use crate::{
    error::{PipelineError, Result},
    ingest,
    llm::Embedder,
    models::{Chunk, EmbeddedChunk, ScoredChunk},
};

/// Similitud coseno. Devuelve 0.0 si alguno de los vectores es nulo.
pub(crate) fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Ordena por score descendente y se queda con los `k` primeros.
pub(crate) fn top_k<T>(mut scored: Vec<T>, k: usize, score: impl Fn(&T) -> f64) -> Vec<T> {
    scored.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Índice en memoria de los chunks de un único documento SOP.
#[derive(Debug, Default)]
pub struct SessionIndex {
    entries: Vec<EmbeddedChunk>,
}

impl SessionIndex {
    pub fn new(entries: Vec<EmbeddedChunk>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Los `k` chunks más parecidos al vector, por similitud descendente.
    pub fn search(&self, query: &[f64], k: usize) -> Vec<ScoredChunk> {
        let scored = self
            .entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(&e.vector, query),
            })
            .collect();
        top_k(scored, k, |s| s.score)
    }
}

/// Almacén de índices de sesión con expulsión por capacidad e inactividad.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache<String, Arc<SessionIndex>>,
    embedder: Arc<dyn Embedder>,
}

impl SessionStore {
    pub fn new(embedder: Arc<dyn Embedder>, max_entries: u64, idle: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_idle(idle)
            .build();
        Self { cache, embedder }
    }

    /// Construye el índice de la sesión y sustituye al anterior, si existía.
    ///
    /// Los embeddings se calculan antes de tocar el almacén: si fallan, la
    /// sesión conserva su índice previo.
    pub async fn build(&self, session_id: &str, chunks: Vec<Chunk>) -> Result<usize> {
        let embedded = ingest::embed_chunks(self.embedder.as_ref(), chunks).await?;
        let index = Arc::new(SessionIndex::new(embedded));
        let count = index.len();
        self.cache.insert(session_id.to_string(), index).await;
        info!("Índice de sesión '{session_id}' construido con {count} chunks.");
        Ok(count)
    }

    /// Busca los `k` chunks de la sesión más parecidos a la consulta.
    pub async fn lookup(&self, session_id: &str, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let index = self
            .cache
            .get(session_id)
            .await
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
        if index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query).await?;
        let hits = index.search(&query_vec, k);
        debug!("Sesión '{session_id}': {} coincidencias para la consulta", hits.len());
        Ok(hits)
    }

    /// Una sesión expulsada por inactividad cuenta como inexistente.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.cache.get(session_id).await.is_some()
    }

    /// Elimina una sesión. Devuelve `false` si no existía.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.cache.remove(session_id).await.is_some()
    }

    /// Número aproximado de sesiones vivas.
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}
