use crate::config::Neo4jConfig;
use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

pub async fn connect_from_config(cfg: &Neo4jConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea el constraint de unicidad de `:ReferenceChunk(id)` y el índice vectorial
/// sobre `:ReferenceChunk(embedding)` si todavía no existen.
pub async fn ensure_schema(graph: &Graph, index_name: &str, dimensions: usize) -> Result<()> {
    graph
        .run(query(
            "CREATE CONSTRAINT reference_chunk_id IF NOT EXISTS
             FOR (c:ReferenceChunk)
             REQUIRE c.id IS UNIQUE",
        ))
        .await?;

    // ¿Ya existe el índice? Usamos la sintaxis moderna SHOW VECTOR INDEXES.
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", index_name),
        )
        .await?;

    if cursor.next().await?.is_some() {
        info!("Índice vectorial '{index_name}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {index_name}
FOR (c:ReferenceChunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{index_name}' creado ({dimensions} dimensiones).");
    Ok(())
}
