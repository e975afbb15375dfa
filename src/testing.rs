//! Dobles de prueba deterministas para el embedder y el LLM.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::llm::{Embedder, LanguageModel};

const DIMENSIONS: usize = 64;

/// Embedder "bolsa de palabras": cada palabra suma 1 en un cubo elegido por hash.
/// Textos que comparten palabras quedan cerca en similitud coseno.
#[derive(Debug, Default)]
pub struct HashingEmbedder {
    pub calls: Mutex<usize>,
}

impl HashingEmbedder {
    pub fn vector_for(text: &str) -> Vec<f64> {
        let mut v = vec![0.0; DIMENSIONS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3));
            v[(hash % DIMENSIONS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        *self.calls.lock().unwrap() += 1;
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

/// Embedder que siempre falla, para comprobar la propagación de errores.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Err(PipelineError::EmbeddingService("401 invalid api key".into()))
    }
}

/// LLM guionizado: devuelve siempre la misma respuesta y guarda los prompts recibidos.
pub struct ScriptedModel {
    response: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into(), prompts: Mutex::new(Vec::new()) }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.response.clone())
    }
}
