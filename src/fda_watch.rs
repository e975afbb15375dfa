//! Vigilancia de la página de una guía de la FDA.
//!
//! Lee la fecha "Content current as of" de la página, la compara con la última
//! fecha guardada y, si ha cambiado, descarga el PDF y lo ingiere en el índice
//! de referencia. La fecha sólo se actualiza cuando la ingesta termina bien.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{app_state::Status, config::FdaWatchConfig, reference_index::ReferenceIndex};

/// Fecha conocida de la revisión ingerida inicialmente.
pub const BASELINE_DATE: &str = "10/17/2024";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WatchOutcome {
    Unchanged { date: String },
    Updated { previous: String, current: String, chunks: usize },
}

#[derive(Clone)]
pub struct FdaWatcher {
    client: reqwest::Client,
    cfg: FdaWatchConfig,
    reference: ReferenceIndex,
    date_pattern: Regex,
    // Una sola comprobación a la vez: manual y periódica comparten el fichero de estado.
    check_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FdaWatcher {
    pub fn new(cfg: FdaWatchConfig, reference: ReferenceIndex, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.fda.gov/"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("No se pudo crear el cliente HTTP de la vigilancia FDA")?;

        Ok(Self {
            client,
            cfg,
            reference,
            date_pattern: content_date_pattern().context("Patrón de fecha inválido")?,
            check_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn interval(&self) -> Duration {
        self.cfg.interval
    }

    /// Una pasada completa: fecha de la página → comparación → descarga e ingesta.
    pub async fn check_once(&self) -> Result<WatchOutcome> {
        let _running = self.check_lock.lock().await;
        let stored = match self.read_stored_date().await? {
            Some(date) => date,
            None => {
                self.write_stored_date(BASELINE_DATE).await?;
                info!("📅 Fecha inicializada a {BASELINE_DATE}");
                BASELINE_DATE.to_string()
            }
        };

        let current = self.fetch_page_date().await?;
        info!("🗓️ Fecha publicada en la página de la FDA: {current} (guardada: {stored})");

        if current == stored {
            return Ok(WatchOutcome::Unchanged { date: current });
        }

        info!("📢 Cambio detectado: {stored} -> {current}. Descargando {}", self.cfg.pdf_url);
        let bytes = self
            .client
            .get(&self.cfg.pdf_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("Falló la descarga del documento de la FDA")?
            .bytes()
            .await
            .context("Falló la lectura del documento de la FDA")?;

        // Sin extensión: el tipo se decide por la cabecera del propio fichero.
        let summary = self
            .reference
            .ingest(bytes.to_vec(), "fda_latest", &self.cfg.reference_label)
            .await
            .context("Falló la ingesta del documento de la FDA")?;

        self.write_stored_date(&current).await?;
        info!("✅ Guía de la FDA actualizada. {summary}");

        Ok(WatchOutcome::Updated {
            previous: stored,
            current,
            chunks: summary.chunks_created,
        })
    }

    /// Bucle periódico. Los errores se registran y no detienen la vigilancia.
    pub async fn run_periodic(self, status: Arc<Mutex<Status>>) {
        let mut ticker = tokio::time::interval(self.cfg.interval);
        loop {
            ticker.tick().await;
            let outcome = self.check_once().await;
            let mut status = match status.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match outcome {
                Ok(WatchOutcome::Unchanged { date }) => {
                    status.last_fda_check = Some(format!("Sin cambios ({date})"));
                }
                Ok(WatchOutcome::Updated { current, chunks, .. }) => {
                    status.last_fda_check = Some(format!("Actualizada a {current} ({chunks} chunks)"));
                }
                Err(err) => {
                    error!("Error en la vigilancia de la FDA: {err:#}");
                    status.last_fda_check = Some(format!("Error: {err}"));
                }
            }
        }
    }

    async fn fetch_page_date(&self) -> Result<String> {
        let html = self
            .client
            .get(&self.cfg.page_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("No se pudo obtener la página de la FDA")?
            .text()
            .await
            .context("No se pudo leer la página de la FDA")?;

        parse_content_date(&self.date_pattern, &html).ok_or_else(|| {
            warn!("⚠️ No se encontró la fecha 'Content current as of' en la página");
            anyhow!("La página de la FDA no contiene la fecha 'Content current as of'")
        })
    }

    fn state_path(&self) -> PathBuf {
        PathBuf::from(&self.cfg.state_file)
    }

    async fn read_stored_date(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.state_path()).await {
            Ok(content) => {
                let date = content.trim().to_string();
                Ok((!date.is_empty()).then_some(date))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("No se pudo leer {}", self.cfg.state_file)),
        }
    }

    async fn write_stored_date(&self, date: &str) -> Result<()> {
        tokio::fs::write(self.state_path(), date)
            .await
            .with_context(|| format!("No se pudo escribir {}", self.cfg.state_file))
    }
}

fn content_date_pattern() -> std::result::Result<Regex, regex::Error> {
    // La fecha suele ir dentro de un <time>, así que se toleran etiquetas intermedias.
    Regex::new(r"Content current as of:?\s*(?:<[^>]*>\s*)*(\d{1,2}/\d{1,2}/\d{4})")
}

fn parse_content_date(pattern: &Regex, html: &str) -> Option<String> {
    pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chunker::Chunker, reference_index::InMemoryReferenceStore, testing::HashingEmbedder};
    use axum::{routing::get, Router};

    #[test]
    fn parses_plain_and_tagged_dates() {
        let re = content_date_pattern().unwrap();
        assert_eq!(
            parse_content_date(&re, "<p>Content current as of: 10/17/2024</p>").as_deref(),
            Some("10/17/2024")
        );
        assert_eq!(
            parse_content_date(
                &re,
                "Content current as of:</h2>\n  <p><time datetime=\"2025-01-03\">01/03/2025</time></p>"
            )
            .as_deref(),
            Some("01/03/2025")
        );
        assert_eq!(parse_content_date(&re, "<p>No date here</p>"), None);
    }

    async fn serve(date: &'static str) -> String {
        let app = Router::new()
            .route(
                "/page",
                get(move || async move { format!("<html><p>Content current as of:</p><time>{date}</time></html>") }),
            )
            .route("/doc", get(|| async { "Calibration must occur every 30 days." }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn watcher(base: &str, state_file: PathBuf) -> (FdaWatcher, ReferenceIndex) {
        let reference = ReferenceIndex::new(
            Arc::new(InMemoryReferenceStore::new()),
            Arc::new(HashingEmbedder::default()),
            Chunker::windowed(1000, 200).unwrap(),
        );
        let cfg = FdaWatchConfig {
            enabled: true,
            page_url: format!("{base}/page"),
            pdf_url: format!("{base}/doc"),
            state_file: state_file.to_string_lossy().to_string(),
            interval: Duration::from_secs(3600),
            reference_label: "fda_guidance".to_string(),
        };
        let watcher = FdaWatcher::new(cfg, reference.clone(), Duration::from_secs(5)).unwrap();
        (watcher, reference)
    }

    fn temp_state_file() -> PathBuf {
        std::env::temp_dir().join(format!("fda-date-{}.txt", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn new_revision_is_downloaded_and_ingested_once() {
        let base = serve("01/03/2025").await;
        let state = temp_state_file();
        let (watcher, reference) = watcher(&base, state.clone());

        let first = watcher.check_once().await.unwrap();
        assert_eq!(
            first,
            WatchOutcome::Updated {
                previous: BASELINE_DATE.to_string(),
                current: "01/03/2025".to_string(),
                chunks: 1,
            }
        );
        assert_eq!(tokio::fs::read_to_string(&state).await.unwrap(), "01/03/2025");
        assert_eq!(reference.entries_by_label("fda_guidance").await.unwrap().len(), 1);

        let second = watcher.check_once().await.unwrap();
        assert_eq!(second, WatchOutcome::Unchanged { date: "01/03/2025".to_string() });
        assert_eq!(reference.entries_by_label("fda_guidance").await.unwrap().len(), 1);

        let _ = tokio::fs::remove_file(&state).await;
    }

    #[tokio::test]
    async fn concurrent_checks_ingest_a_revision_once() {
        let base = serve("01/03/2025").await;
        let state = temp_state_file();
        let (watcher, reference) = watcher(&base, state.clone());
        let other = watcher.clone();

        let (a, b) = tokio::join!(watcher.check_once(), other.check_once());
        let outcomes = [a.unwrap(), b.unwrap()];

        let updated = outcomes.iter().filter(|o| matches!(o, WatchOutcome::Updated { .. })).count();
        assert_eq!(updated, 1);
        assert!(outcomes.contains(&WatchOutcome::Unchanged { date: "01/03/2025".to_string() }));
        assert_eq!(reference.entries_by_label("fda_guidance").await.unwrap().len(), 1);

        let _ = tokio::fs::remove_file(&state).await;
    }

    #[tokio::test]
    async fn baseline_date_means_no_download() {
        let base = serve(BASELINE_DATE).await;
        let state = temp_state_file();
        let (watcher, reference) = watcher(&base, state.clone());

        let outcome = watcher.check_once().await.unwrap();
        assert_eq!(outcome, WatchOutcome::Unchanged { date: BASELINE_DATE.to_string() });
        assert!(reference.entries_by_label("fda_guidance").await.unwrap().is_empty());

        let _ = tokio::fs::remove_file(&state).await;
    }

    #[tokio::test]
    async fn unreachable_page_is_an_error_and_keeps_the_stored_date() {
        let state = temp_state_file();
        tokio::fs::write(&state, "05/05/2024").await.unwrap();
        let (watcher, _) = watcher("http://127.0.0.1:9", state.clone());

        assert!(watcher.check_once().await.is_err());
        assert_eq!(tokio::fs::read_to_string(&state).await.unwrap(), "05/05/2024");

        let _ = tokio::fs::remove_file(&state).await;
    }
}
