// Módulos de la aplicación
mod api;
mod app_state;
mod chunker;
mod comparator;
mod config;
mod error;
mod fda_watch;
mod ingest;
mod llm;
mod models;
mod neo4j_client;
mod reference_index;
mod session_index;
mod vector_store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    app_state::AppState,
    config::ReferenceBackend,
    llm::LlmManager,
    reference_index::{InMemoryReferenceStore, ReferenceStore},
    vector_store::{Neo4jReferenceStore, REFERENCE_INDEX_NAME},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Elegir el almacén de referencia (Neo4j o memoria)
    let reference_store: Arc<dyn ReferenceStore> = match (&cfg.reference_backend, &cfg.neo4j) {
        (ReferenceBackend::Neo4j, Some(neo4j_cfg)) => {
            let graph = neo4j_client::connect_from_config(neo4j_cfg)
                .await
                .context("Error conectando a Neo4j")?;
            neo4j_client::ensure_schema(&graph, REFERENCE_INDEX_NAME, cfg.embedding_dimensions)
                .await
                .context("Error asegurando el esquema de Neo4j")?;
            Arc::new(Neo4jReferenceStore::new(Arc::new(graph)))
        }
        _ => {
            warn!("Usando el índice de referencia en memoria: los documentos no sobreviven a un reinicio.");
            Arc::new(InMemoryReferenceStore::new())
        }
    };

    // 4. Inicializar gestor de LLMs (embeddings y chat)
    let llm_manager = Arc::new(LlmManager::from_config(&cfg));

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState::build(cfg, llm_manager.clone(), llm_manager, reference_store)
        .context("Error inicializando el estado de la aplicación")?;

    // 6. Vigilancia periódica de la guía de la FDA
    if app_state.config.fda_watch.enabled {
        info!(
            "👀 Vigilancia de la FDA activa cada {}s: {}",
            app_state.fda_watcher.interval().as_secs(),
            app_state.config.fda_watch.page_url
        );
        tokio::spawn(app_state.fda_watcher.clone().run_periodic(app_state.status.clone()));
    }

    // 7. Configurar el router de la API
    let cors = match &app_state.config.cors_allowed_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("CORS_ALLOWED_ORIGIN inválido: {origin}"))?,
            )
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };
    let app = api::create_router(app_state.clone()).layer(cors);

    // 8. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
