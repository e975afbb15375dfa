//! Ingesta de documentos: extracción de texto, troceado y embeddings.
//!
//! Lo usan tanto el índice de sesión (SOP subido por el usuario) como el índice
//! de referencia (guías FDA), para que ambos caminos troceen y vectoricen igual.

use std::fmt;

use mime_guess::{mime, MimeGuess};
use tracing::{debug, warn};

use crate::{
    chunker::Chunker,
    error::{PipelineError, Result},
    llm::Embedder,
    models::{Chunk, EmbeddedChunk},
};

/// Tamaño máximo de lote por llamada al servicio de embeddings.
const EMBED_BATCH_SIZE: usize = 64;

/// Resumen de una operación de ingesta.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestionSummary {
    pub label: String,
    pub characters: usize,
    pub chunks_created: usize,
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}': {} caracteres extraídos, {} chunks creados.",
            self.label, self.characters, self.chunks_created
        )
    }
}

/// Extrae el texto plano de un documento subido, conservando el orden de páginas.
///
/// - PDF (por cabecera `%PDF` o por extensión): `pdf_extract`.
/// - Texto (`text/*` o sin tipo conocido): se exige UTF-8 válido.
///
/// Todo ocurre en memoria, no quedan ficheros temporales que limpiar.
pub async fn extract_text(bytes: Vec<u8>, filename: &str) -> Result<String> {
    let guess = MimeGuess::from_path(filename).first();
    let is_pdf = bytes.starts_with(b"%PDF")
        || guess.as_ref().is_some_and(|m| m.subtype() == mime::PDF);

    let text = if is_pdf {
        // pdf_extract es CPU-bound y puede entrar en pánico con PDFs corruptos.
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| PipelineError::ExtractionFailed(format!("{filename}: el extractor PDF abortó: {e}")))?
            .map_err(|e| PipelineError::ExtractionFailed(format!("{filename}: {e}")))?
    } else {
        match guess {
            Some(m) if m.type_() != mime::TEXT => {
                return Err(PipelineError::ExtractionFailed(format!(
                    "{filename}: tipo de fichero no soportado ({m})"
                )));
            }
            _ => String::from_utf8(bytes)
                .map_err(|_| PipelineError::ExtractionFailed(format!("{filename}: el fichero no es texto UTF-8")))?,
        }
    };

    let text = text.replace("\r\n", "\n");
    if text.trim().is_empty() {
        warn!("Documento sin texto extraíble: {filename}");
        return Err(PipelineError::ExtractionFailed(format!(
            "{filename}: el documento no contiene texto extraíble"
        )));
    }
    Ok(text)
}

/// Trocea un texto con la política indicada.
pub fn chunk_text(chunker: &Chunker, text: &str) -> Vec<Chunk> {
    chunker.chunks(text).collect()
}

/// Calcula los embeddings de una lista de chunks, en lotes y preservando el orden.
pub async fn embed_chunks(embedder: &dyn Embedder, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
    let mut embedded = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(PipelineError::EmbeddingService(format!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                vectors.len(),
                batch.len()
            )));
        }
        embedded.extend(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddedChunk { chunk, vector }),
        );
    }
    debug!("{} chunks vectorizados", embedded.len());
    Ok(embedded)
}
