//! Integración con Neo4j como vector store para los `:ReferenceChunk`.
//!
//! Cada entrada de referencia es un nodo con su texto, etiqueta de origen,
//! posición y embedding; la búsqueda usa `db.index.vector.queryNodes`.

use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{query, Graph, Row};

use crate::{
    error::{PipelineError, Result},
    models::{ReferenceEntry, ReferenceRecord, ScoredEntry},
    reference_index::ReferenceStore,
};

pub const REFERENCE_INDEX_NAME: &str = "referenceChunkIndex";

pub struct Neo4jReferenceStore {
    graph: Arc<Graph>,
    index_name: String,
}

impl Neo4jReferenceStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph, index_name: REFERENCE_INDEX_NAME.to_string() }
    }
}

fn entry_from_row(row: &Row) -> Result<ReferenceEntry> {
    let field = |name: &str| PipelineError::ServiceUnavailable(format!("Falta campo '{name}' en resultado de Neo4j"));
    let chunk_index: i64 = row.get("chunk_index").ok_or_else(|| field("chunk_index"))?;
    Ok(ReferenceEntry {
        id: row.get("id").ok_or_else(|| field("id"))?,
        source: row.get("source").ok_or_else(|| field("source"))?,
        chunk_index: usize::try_from(chunk_index).map_err(|_| field("chunk_index"))?,
        text: row.get("text").ok_or_else(|| field("text"))?,
        created_at: row.get("created_at").unwrap_or_default(),
    })
}

#[async_trait]
impl ReferenceStore for Neo4jReferenceStore {
    async fn upsert(&self, records: &[ReferenceRecord]) -> Result<()> {
        let tx = self.graph.start_txn().await?;
        for record in records {
            let entry = &record.entry;
            tx.run(
                query(
                    "MERGE (c:ReferenceChunk {id: $id})
                     SET c.source = $source, c.chunk_index = $chunk_index, c.text = $text,
                         c.embedding = $embedding, c.created_at = $created_at",
                )
                .param("id", entry.id.clone())
                .param("source", entry.source.clone())
                .param("chunk_index", entry.chunk_index as i64)
                .param("text", entry.text.clone())
                .param("embedding", record.vector.clone())
                .param("created_at", entry.created_at.clone()),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f64], k: usize) -> Result<Vec<ScoredEntry>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                     YIELD node, score
                     RETURN node.id AS id, node.source AS source, node.chunk_index AS chunk_index,
                            node.text AS text, node.created_at AS created_at, score
                     ORDER BY score DESC",
                )
                .param("index_name", self.index_name.clone())
                .param("k", k as i64)
                .param("embedding", vector.to_vec()),
            )
            .await?;

        let mut output = Vec::new();
        while let Some(row) = cursor.next().await? {
            let score: f64 = row
                .get("score")
                .ok_or_else(|| PipelineError::ServiceUnavailable("Falta campo 'score' en resultado de Neo4j".into()))?;
            output.push(ScoredEntry { entry: entry_from_row(&row)?, score });
        }
        output.truncate(k);
        Ok(output)
    }

    async fn by_label(&self, label: &str) -> Result<Vec<ReferenceEntry>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (c:ReferenceChunk {source: $source})
                     RETURN c.id AS id, c.source AS source, c.chunk_index AS chunk_index,
                            c.text AS text, c.created_at AS created_at
                     ORDER BY chunk_index, created_at",
                )
                .param("source", label),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = cursor.next().await? {
            entries.push(entry_from_row(&row)?);
        }
        Ok(entries)
    }

    async fn health_check(&self) -> Result<()> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }
}
