use std::sync::Arc;

use clap::Parser;
use m3u_relay::catalog::Catalog;
use m3u_relay::config::Settings;
use m3u_relay::relay::{redact, ProviderRegistry, RelayClient};
use m3u_relay::store::{restore_catalog, FileStore, KeyValueStore};
use m3u_relay::{create_app, load_provider, AppState};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Fetch the last selected provider once before serving
    #[arg(long)]
    refresh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let settings = Settings::load(&args.config)?;
    info!(
        "Configuration loaded from {}: {} providers, timeout {} ms, store {}",
        args.config,
        settings.providers.len(),
        settings.relay.timeout_ms,
        settings.store.path.display()
    );
    for (id, provider) in &settings.providers {
        info!("Provider {} ({}) -> {}", id, provider.name, redact(&provider.url));
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&settings.store.path));
    let catalog = restore_catalog(store.as_ref())
        .unwrap_or_else(|| Catalog::new(settings.relay.default_provider.clone()));

    let relay = RelayClient::new(settings.relay.timeout(), settings.relay.user_agent.clone())?;
    let state = AppState::new(
        settings.server.api_key.clone(),
        ProviderRegistry::new(settings.providers.clone()),
        settings.relay.default_provider.clone(),
        relay,
        store,
    )
    .with_catalog(catalog);
    let state = Arc::new(state);

    if args.refresh {
        let selected = state.catalog.read().await.selected_provider.clone();
        let provider = if state.providers.contains(&selected) {
            selected
        } else {
            state.default_provider.clone()
        };
        if let Err(e) = load_provider(&state, &provider).await {
            error!("Startup refresh of {} failed, serving stored catalog: {}", provider, e);
        }
    }

    info!(
        "Catalog holds {} channels",
        state.catalog.read().await.channels.len()
    );

    let app = create_app(state, &settings.server.allowed_origins);

    let port = args.port.unwrap_or(settings.server.port);
    let addr = format!("{}:{}", settings.server.host, port);
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
