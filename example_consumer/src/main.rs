//! Example consumer: serves the declarations in `GATEWAY_ENTITIES_PATH` over HTTP.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! With `DATABASE_URL` set, records live in PostgreSQL; otherwise in memory.

use crud_gateway::store::pg::ensure_database_exists;
use crud_gateway::{
    ApiContext, BearerTokens, DocumentStore, EntityDeclaration, Gateway, GatewayConfig, Grant, MemoryStore, Method,
    PgStore, Principal,
};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Demo tokens: `Bearer admin` and `Bearer guest`.
fn demo_tokens() -> BearerTokens {
    BearerTokens::new()
        .with("admin", Principal::new("00000000-0000-4000-8000-000000000001").with_level("admin"))
        .with("guest", Principal::new("00000000-0000-4000-8000-000000000002").with_level("guest"))
}

/// Hooks for the `note` entity when it is declared on disk: guests write only the text.
fn note_hooks() -> EntityDeclaration {
    EntityDeclaration::new("note").access(Method::Create, |ctx: &mut ApiContext| match ctx.user() {
        Some(u) if u.has_level("admin") => Grant::Unrestricted,
        Some(_) => Grant::fields(["text"]),
        None => Grant::Denied,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("crud_gateway=info,tower_http=info")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    let store: Arc<dyn DocumentStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            ensure_database_exists(&url).await?;
            Arc::new(PgStore::connect(&url, &config.store_schema).await?)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let mut builder = Gateway::builder().store(store).authenticator(Arc::new(demo_tokens()));
    if std::path::Path::new(&config.entities_path).join("note.json").exists() {
        builder = builder.attach(note_hooks());
    }
    let gateway = builder.entities_dir(config.entities_path.clone()).config(config).build();

    // Build the registry up front so declaration errors surface at startup.
    gateway.registry().initialize().await?;

    let app = gateway.router();
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("gateway listening on http://{}{}", listener.local_addr()?, gateway.config().prefix);
    axum::serve(listener, app).await?;
    Ok(())
}
