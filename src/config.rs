//! Carga y gestión de configuración de la aplicación (servidor, LLM, índices y vigilancia FDA).

use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};

use crate::chunker::{Chunker, ChunkingPolicy};

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Backend del índice de referencia (guías FDA).
#[derive(Clone, Debug, PartialEq)]
pub enum ReferenceBackend {
    Neo4j,
    /// Índice en memoria: útil en desarrollo, se pierde al reiniciar.
    Memory,
}

impl ReferenceBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("Backend de referencia no soportado: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neo4j => "neo4j",
            Self::Memory => "memory",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Parámetros del vigilante de la página de guías de la FDA.
#[derive(Clone, Debug)]
pub struct FdaWatchConfig {
    pub enabled: bool,
    pub page_url: String,
    pub pdf_url: String,
    pub state_file: String,
    pub interval: Duration,
    pub reference_label: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub cors_allowed_origin: Option<String>,
    pub max_upload_bytes: usize,

    pub reference_backend: ReferenceBackend,
    pub neo4j: Option<Neo4jConfig>,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub embedding_dimensions: usize,
    pub request_timeout: Duration,

    pub sop_chunking: ChunkingPolicy,
    pub reference_chunking: ChunkingPolicy,

    pub session_max_entries: u64,
    pub session_idle: Duration,

    pub fda_watch: FdaWatchConfig,
}

const DEFAULT_FDA_PAGE_URL: &str = "https://www.fda.gov/regulatory-information/search-fda-guidance-documents/core-patient-reported-outcomes-cancer-clinical-trials";
const DEFAULT_FDA_PDF_URL: &str = "https://www.fda.gov/media/149994/download";

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Carga la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server_addr = get_or("SERVER_ADDR", "127.0.0.1:5050");
        let cors_allowed_origin = lookup("CORS_ALLOWED_ORIGIN").filter(|s| !s.trim().is_empty());
        let max_upload_bytes = parse_or(&lookup, "MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?;

        let reference_backend = ReferenceBackend::from_str(&get_or("REFERENCE_BACKEND", "neo4j"))?;
        let neo4j = match reference_backend {
            ReferenceBackend::Neo4j => {
                let uri = lookup("NEO4J_URI").ok_or_else(|| anyhow!("Falta NEO4J_URI en el entorno"))?;
                let user = lookup("NEO4J_USER").ok_or_else(|| anyhow!("Falta NEO4J_USER en el entorno"))?;
                let password = lookup("NEO4J_PASSWORD")
                    .ok_or_else(|| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;
                Some(Neo4jConfig { uri, user, password })
            }
            ReferenceBackend::Memory => None,
        };

        let llm_provider = LlmProvider::from_str(&get_or("LLM_PROVIDER", "openai"))?;
        // rig lee la clave del entorno; la comprobamos aquí para fallar al arrancar.
        if llm_provider == LlmProvider::OpenAI && lookup("OPENAI_API_KEY").is_none() {
            return Err(anyhow!("Falta OPENAI_API_KEY en el entorno"));
        }
        let llm_embedding_model = get_or("LLM_EMBEDDING_MODEL", "text-embedding-3-small");
        let llm_chat_model = get_or("LLM_CHAT_MODEL", "gpt-4o");
        let embedding_dimensions = parse_or(&lookup, "EMBEDDING_DIMENSIONS", 1536)?;
        let request_timeout = Duration::from_secs(positive_or(&lookup, "REQUEST_TIMEOUT_SECS", 30)?);

        let sop_chunking = ChunkingPolicy::Paragraph {
            min_chars: parse_or(&lookup, "SOP_MIN_PARAGRAPH_CHARS", 30)?,
            max_chars: parse_or(&lookup, "SOP_MAX_CHUNK_CHARS", 4000)?,
        };
        let reference_chunking = ChunkingPolicy::Windowed {
            chunk_size: parse_or(&lookup, "REFERENCE_CHUNK_WORDS", 1000)?,
            overlap: parse_or(&lookup, "REFERENCE_CHUNK_OVERLAP", 200)?,
        };
        // Validamos ahora para no descubrir el error en la primera subida.
        Chunker::new(sop_chunking.clone()).context("Chunking de SOP mal configurado")?;
        Chunker::new(reference_chunking.clone()).context("Chunking de referencia mal configurado")?;

        let session_max_entries = positive_or(&lookup, "SESSION_MAX_ENTRIES", 1000)?;
        let session_idle = Duration::from_secs(positive_or(&lookup, "SESSION_IDLE_SECS", 3600)?);

        let fda_watch = FdaWatchConfig {
            enabled: parse_or(&lookup, "FDA_WATCH_ENABLED", false)?,
            page_url: get_or("FDA_PAGE_URL", DEFAULT_FDA_PAGE_URL),
            pdf_url: get_or("FDA_PDF_URL", DEFAULT_FDA_PDF_URL),
            state_file: get_or("FDA_STATE_FILE", "stored_upload_date.txt"),
            interval: Duration::from_secs(positive_or(&lookup, "FDA_CHECK_INTERVAL_SECS", 86_400)?),
            reference_label: get_or("FDA_REFERENCE_LABEL", "fda_guidance"),
        };
        url::Url::parse(&fda_watch.page_url).context("FDA_PAGE_URL no es una URL válida")?;
        url::Url::parse(&fda_watch.pdf_url).context("FDA_PDF_URL no es una URL válida")?;

        Ok(Self {
            server_addr,
            cors_allowed_origin,
            max_upload_bytes,
            reference_backend,
            neo4j,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            embedding_dimensions,
            request_timeout,
            sop_chunking,
            reference_chunking,
            session_max_entries,
            session_idle,
            fda_watch,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}

/// Como `parse_or`, pero rechaza el cero (intervalos, timeouts y capacidades).
fn positive_or<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if value == 0 {
        return Err(anyhow!("{key} debe ser mayor que cero"));
    }
    Ok(value)
}
