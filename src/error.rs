//! Taxonomía de errores del pipeline de comparación (SOP ↔ guías FDA).

use axum::{http::StatusCode, Json};
use serde_json::json;
use thiserror::Error;

/// Errores que puede producir el pipeline de extracción, indexado y comparación.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// El documento no se pudo leer o no contiene texto extraíble.
    #[error("No se pudo extraer texto del documento: {0}")]
    ExtractionFailed(String),

    /// Parámetros de configuración incoherentes (p. ej. solapamiento >= tamaño de chunk).
    #[error("Configuración inválida: {0}")]
    InvalidConfiguration(String),

    /// Fallo del servicio de embeddings (autenticación, rate-limit, transporte, timeout).
    #[error("Error del servicio de embeddings: {0}")]
    EmbeddingService(String),

    /// El índice de referencia no está disponible.
    #[error("Índice de referencia no disponible: {0}")]
    ServiceUnavailable(String),

    #[error("Sesión '{0}' no encontrada o expirada. Sube primero tu documento SOP.")]
    SessionNotFound(String),

    /// Error "blando": la recuperación no devolvió nada comparable.
    #[error("{0}")]
    NoMatchFound(String),

    /// Fallo del LLM o salida que no respeta el esquema esperado.
    #[error("Error del modelo de lenguaje: {0}")]
    LanguageModel(String),

    /// Petición HTTP mal formada.
    #[error("{0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Código HTTP con el que se expone cada variante.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            Self::ExtractionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::EmbeddingService(_) | Self::LanguageModel(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoMatchFound(_) => StatusCode::OK,
        }
    }

    /// Los errores blandos se degradan a una respuesta legible en vez de fallar.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NoMatchFound(_))
    }
}

impl From<neo4rs::Error> for PipelineError {
    fn from(err: neo4rs::Error) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

/// Convierte un error del pipeline en la respuesta JSON que devuelven los handlers.
pub fn error_response(err: PipelineError) -> (StatusCode, Json<serde_json::Value>) {
    (err.status_code(), Json(json!({ "error": err.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            PipelineError::SessionNotFound("s1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PipelineError::ServiceUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PipelineError::InvalidConfiguration("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::LanguageModel("bad json".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn only_no_match_is_soft() {
        assert!(PipelineError::NoMatchFound("nada".into()).is_soft());
        assert!(!PipelineError::EmbeddingService("429".into()).is_soft());
    }

    #[test]
    fn session_not_found_mentions_the_id() {
        let msg = PipelineError::SessionNotFound("abc-123".into()).to_string();
        assert!(msg.contains("abc-123"));
    }
}
