use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stride_api::{build_router, config::Config, state::AppState};
use stride_engine::RunEngine;
use stride_llm::GatewayFactory;
use stride_persist::StoreBuilder;
use stride_tools::{InMemoryScriptStore, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting Stride API server");
    tracing::info!("Config loaded: {}:{}", config.server.host, config.server.port);

    let store = StoreBuilder::new()
        .maybe_mongodb_uri(config.mongodb_uri.clone())
        .database(&config.storage.database)
        .build()
        .await?;
    tracing::info!(backend = store.backend(), "Store ready");

    let gateway = GatewayFactory::create_gateway(config.llm.provider(&config.openai_api_key))?;
    tracing::info!(
        gateway = gateway.name(),
        max_retries = config.llm.retry.max_retries,
        "LLM gateway ready"
    );

    let tools = ToolRegistry::with_builtins(
        gateway.clone(),
        &config.tools.generation_model,
        Arc::new(InMemoryScriptStore::new()),
        &config.tools.policies,
    )?;
    tracing::info!(tools = ?tools.names(), "Tool registry ready");

    let engine = RunEngine::builder()
        .store(store)
        .gateway(gateway)
        .tools(Arc::new(tools))
        .config(config.engine.clone())
        .build()?;
    let sweeper = engine.spawn_sweeper();

    let state = Arc::new(AppState::new(config.clone(), engine.clone()));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped accepting connections, stopping run engine");
    engine.shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}
