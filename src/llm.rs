//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El resto de la aplicación sólo ve los traits [`Embedder`] y [`LanguageModel`],
//! de forma que los tests pueden sustituir el proveedor real.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use tracing::debug;

use crate::config::{AppConfig, LlmProvider};
use crate::error::{PipelineError, Result};

/// Convierte textos en vectores de dimensión fija, uno por entrada y en el mismo orden.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::EmbeddingService("No se pudo generar embedding de la query".into()))
    }
}

/// Completa un prompt y devuelve el texto generado.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout: Duration,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            timeout: cfg.request_timeout,
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        debug!(model = model_name, batch = texts.len(), "Calculando embeddings");
        let embeddings = with_deadline(self.timeout, embedding_model.embed_texts(texts.to_vec()))
            .await
            .map_err(PipelineError::EmbeddingService)?
            .map_err(|e| PipelineError::EmbeddingService(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(PipelineError::EmbeddingService(format!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn complete_with_openai(&self, preamble: &str, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).preamble(preamble).build();

        debug!(model = model_name, prompt_len = prompt.len(), "Llamando al LLM");
        let answer = with_deadline(self.timeout, async { agent.prompt(prompt).await })
            .await
            .map_err(PipelineError::LanguageModel)?
            .map_err(|e| PipelineError::LanguageModel(e.to_string()))?;
        Ok(answer)
    }
}

#[async_trait]
impl Embedder for LlmManager {
    /// Nota: sólo implementado para OpenAI. Para otros proveedores
    /// se podrían añadir ramas adicionales al `match`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(PipelineError::EmbeddingService(format!(
                "Proveedor LLM {other:?} aún no implementado para embeddings"
            ))),
        }
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(preamble, prompt).await,
            ref other => Err(PipelineError::LanguageModel(format!(
                "Proveedor LLM {other:?} aún no implementado para chat"
            ))),
        }
    }
}

/// Limita la duración de una llamada externa. El error externo es el mensaje de timeout.
async fn with_deadline<F, T>(timeout: Duration, fut: F) -> std::result::Result<T, String>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| format!("la llamada superó el límite de {}s", timeout.as_secs()))
}

/// Limpia la respuesta del LLM para quedarse sólo con el objeto JSON.
pub fn strip_json_fences(response: &str) -> &str {
    let trimmed = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"title\": \"x\"}\n```";
        assert_eq!(strip_json_fences(raw), "{\"title\": \"x\"}");
    }

    #[test]
    fn strips_surrounding_prose() {
        let raw = "Here is the analysis:\n{\"a\": {\"b\": 1}}\nHope it helps.";
        assert_eq!(strip_json_fences(raw), "{\"a\": {\"b\": 1}}");
    }

    #[test]
    fn leaves_non_json_untouched() {
        assert_eq!(strip_json_fences("  no json here "), "no json here");
    }

    #[tokio::test]
    async fn deadline_reports_timeout() {
        let result = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(result.unwrap_err().contains("límite"));
    }

    #[tokio::test]
    async fn unimplemented_provider_fails_with_typed_errors() {
        let manager = LlmManager {
            provider: LlmProvider::Ollama,
            embedding_model: String::new(),
            chat_model: String::new(),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            manager.embed_batch(&["hola".to_string()]).await,
            Err(PipelineError::EmbeddingService(_))
        ));
        assert!(matches!(
            manager.complete("", "hola").await,
            Err(PipelineError::LanguageModel(_))
        ));
        // Sin textos no se llama al proveedor.
        assert!(manager.embed_batch(&[]).await.unwrap().is_empty());
    }
}
