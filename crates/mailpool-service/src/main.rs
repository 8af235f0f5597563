//! Mailpool service entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailpool_core::UserId;
use mailpool_service::{create_router, AppState, ServiceConfig, StaticVerifier};
use mailpool_store::PgStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mailpool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mailpool service");

    let config = ServiceConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        admin_configured = %config.admin_api_key.is_some(),
        callbacks_signed = %config.payment_callback_secret.is_some(),
        "Service configuration loaded"
    );

    let store = PgStore::connect(&config.database_url).await?;
    store.migrate().await?;

    let verifier = dev_verifier_from_env();
    let state = AppState::new(Arc::new(store), config.clone(), Arc::new(verifier));

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the credential table from `DEV_USERS` (`email:password:id,…`).
///
/// A production deployment replaces this with a verifier backed by the
/// identity provider; the static table exists for local development.
fn dev_verifier_from_env() -> StaticVerifier {
    let mut verifier = StaticVerifier::new();
    let Ok(spec) = std::env::var("DEV_USERS") else {
        tracing::warn!("DEV_USERS not set - no credentials will verify");
        return verifier;
    };

    for entry in spec.split(',') {
        let mut parts = entry.splitn(3, ':');
        let (Some(email), Some(password), Some(id)) = (parts.next(), parts.next(), parts.next())
        else {
            tracing::warn!(entry, "skipping malformed DEV_USERS entry");
            continue;
        };
        let Ok(user_id) = id.trim().parse::<i64>() else {
            tracing::warn!(entry, "skipping DEV_USERS entry with non-integer id");
            continue;
        };
        verifier = verifier.with_user(email.trim(), password, UserId::new(user_id));
    }
    verifier
}
