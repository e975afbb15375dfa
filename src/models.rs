//! Modelos de dominio: chunks, entradas del índice de referencia y resultados de comparación.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Trozo contiguo de texto con su posición dentro del documento de origen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Chunk con su embedding ya calculado.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f64>,
}

/// Resultado de una búsqueda en el índice de sesión.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Trozo de una guía de la FDA persistido en el índice de referencia.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: String,
    /// Etiqueta de origen (p. ej. `user_FDA-2024` o `fda_guidance`).
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    pub created_at: String,
}

/// Entrada de referencia junto con su vector, tal y como se inserta en el backend.
#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub entry: ReferenceEntry,
    pub vector: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    pub entry: ReferenceEntry,
    pub score: f64,
}

/// Un hallazgo concreto de la comparación SOP ↔ FDA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PotentialIssue {
    /// Brecha de cumplimiento concreta, en una frase accionable.
    pub issue: String,
    /// Categoría, p. ej. "Equipment Calibration Requirements".
    pub category: String,
    /// Requisito FDA relacionado con este hallazgo.
    pub fda_requirement: String,
    /// Parte del SOP relacionada con este hallazgo.
    pub sop_detail: String,
}

/// Salida estructurada de una comparación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonResult {
    pub title: String,
    pub fda_requirement_summary: String,
    pub user_summary: String,
    pub potential_issues: Vec<PotentialIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
}

/// Elemento de checklist derivado de un hallazgo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub action: String,
}
