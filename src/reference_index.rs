//! Índice de referencia compartido con los trozos de las guías de la FDA.
//!
//! [`ReferenceIndex`] orquesta la ingesta (extraer → trocear en ventanas →
//! vectorizar → insertar) y las búsquedas. El almacenamiento real lo hace un
//! [`ReferenceStore`]: Neo4j en producción (`vector_store`) o memoria.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    chunker::Chunker,
    error::{PipelineError, Result},
    ingest::{self, IngestionSummary},
    llm::Embedder,
    models::{ReferenceEntry, ReferenceRecord, ScoredEntry},
    session_index::{cosine_similarity, top_k},
};

/// Backend de almacenamiento vectorial para las entradas de referencia.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn upsert(&self, records: &[ReferenceRecord]) -> Result<()>;

    /// Las `k` entradas más parecidas al vector, por similitud descendente.
    async fn query(&self, vector: &[f64], k: usize) -> Result<Vec<ScoredEntry>>;

    /// Entradas de una etiqueta, ordenadas por posición.
    async fn by_label(&self, label: &str) -> Result<Vec<ReferenceEntry>>;

    async fn health_check(&self) -> Result<()>;
}

/// Almacén en memoria. Útil en desarrollo y en tests; se pierde al reiniciar.
#[derive(Default)]
pub struct InMemoryReferenceStore {
    records: RwLock<HashMap<String, ReferenceRecord>>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn upsert(&self, records: &[ReferenceRecord]) -> Result<()> {
        let mut store = self.records.write().await;
        for record in records {
            store.insert(record.entry.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f64], k: usize) -> Result<Vec<ScoredEntry>> {
        let store = self.records.read().await;
        let scored = store
            .values()
            .map(|r| ScoredEntry {
                entry: r.entry.clone(),
                score: cosine_similarity(&r.vector, vector),
            })
            .collect();
        Ok(top_k(scored, k, |s| s.score))
    }

    async fn by_label(&self, label: &str) -> Result<Vec<ReferenceEntry>> {
        let store = self.records.read().await;
        let mut entries: Vec<ReferenceEntry> = store
            .values()
            .filter(|r| r.entry.source == label)
            .map(|r| r.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.chunk_index.cmp(&b.chunk_index).then_with(|| a.created_at.cmp(&b.created_at)));
        Ok(entries)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Fachada del índice de referencia: ingesta y búsqueda semántica.
#[derive(Clone)]
pub struct ReferenceIndex {
    store: Arc<dyn ReferenceStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
}

impl ReferenceIndex {
    pub fn new(store: Arc<dyn ReferenceStore>, embedder: Arc<dyn Embedder>, chunker: Chunker) -> Self {
        Self { store, embedder, chunker }
    }

    /// Ingiere un documento completo bajo `label`.
    ///
    /// Cada chunk recibe un identificador nuevo: reingerir el mismo documento
    /// crea entradas duplicadas.
    pub async fn ingest(&self, bytes: Vec<u8>, filename: &str, label: &str) -> Result<IngestionSummary> {
        let text = ingest::extract_text(bytes, filename).await?;
        self.ingest_text(&text, label).await
    }

    /// Ingiere texto ya extraído.
    pub async fn ingest_text(&self, text: &str, label: &str) -> Result<IngestionSummary> {
        let chunks = ingest::chunk_text(&self.chunker, text);
        if chunks.is_empty() {
            return Err(PipelineError::ExtractionFailed(format!(
                "'{label}': el documento no produjo ningún chunk"
            )));
        }

        let embedded = ingest::embed_chunks(self.embedder.as_ref(), chunks).await?;
        let created_at = Utc::now().to_rfc3339();
        let records: Vec<ReferenceRecord> = embedded
            .into_iter()
            .map(|e| ReferenceRecord {
                entry: ReferenceEntry {
                    id: Uuid::new_v4().to_string(),
                    source: label.to_string(),
                    chunk_index: e.chunk.index,
                    text: e.chunk.text,
                    created_at: created_at.clone(),
                },
                vector: e.vector,
            })
            .collect();

        self.store.upsert(&records).await?;

        let summary = IngestionSummary {
            label: label.to_string(),
            characters: text.chars().count(),
            chunks_created: records.len(),
        };
        info!("Referencia ingerida: {summary}");
        Ok(summary)
    }

    /// Las `k` entradas de referencia más relevantes para la consulta.
    pub async fn lookup(&self, query: &str, k: usize) -> Result<Vec<ScoredEntry>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let hits = self.store.query(&vector, k).await?;
        debug!("Referencia: {} coincidencias para la consulta", hits.len());
        Ok(hits)
    }

    pub async fn entries_by_label(&self, label: &str) -> Result<Vec<ReferenceEntry>> {
        self.store.by_label(label).await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}
