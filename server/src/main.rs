use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use eventhub_server::config::{Config, StoreBackend};
use eventhub_server::gateway::{SharedGateway, StripeGateway};
use eventhub_server::routes::create_routes;
use eventhub_server::services::PaymentService;
use eventhub_server::state::AppState;
use eventhub_server::store::{MemoryStore, PgStore, SharedStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Expires abandoned checkouts on a fixed interval.
fn spawn_payment_sweep(payments: Arc<PaymentService>, every: Duration, ttl: chrono::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = payments.sweep_expired(Utc::now(), ttl).await {
                tracing::error!(error = %e, "Pending payment sweep failed");
            }
        }
    });
}

async fn open_store(config: &Config) -> Result<SharedStore, BoxError> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let store =
                PgStore::connect(&config.database_url, config.database_max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("eventhub_server=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    if config.stripe_webhook_secret.is_empty() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET is not set, payment webhooks will be rejected");
    }

    let store = open_store(&config).await?;
    let gateway: SharedGateway = Arc::new(StripeGateway::new(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
    )?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, store, gateway);

    if let Some(admin_id) = state.config.bootstrap_admin_id {
        state.profiles.bootstrap_admin(admin_id).await?;
    }

    spawn_payment_sweep(
        state.payments.clone(),
        state.config.payment_sweep_interval,
        state.config.pending_payment_ttl,
    );

    let app = create_routes(state);

    tracing::info!("Server running at http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
