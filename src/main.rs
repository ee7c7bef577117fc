use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use furnish_orders as api;
use api::collaborators::{InMemoryAddressBook, InMemoryCarts, InMemoryCatalog};
use api::notifications::{LogNotifier, Notifier, WebhookNotifier};
use api::services::{checkout::CheckoutSettings, invoicing::DigestInvoiceIssuer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Operator/access log
    let base_logger = api::logging::setup_logger(api::logging::LoggerConfig::default());

    // Init events: outbox relay -> channel -> customer notifications
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);

    let notifier: Arc<dyn Notifier> = match cfg.notification_webhook_url.as_deref() {
        Some(url) => {
            info!("Customer notifications delivered to {}", url);
            Arc::new(
                WebhookNotifier::new(url, Duration::from_secs(10))
                    .context("failed to build notification client")?,
            )
        }
        None => {
            warn!("notification_webhook_url not configured; notifications are only logged");
            Arc::new(LogNotifier::new(
                base_logger.new(slog::o!("component" => "notifications")),
            ))
        }
    };
    tokio::spawn(api::events::process_events(event_rx, notifier));
    api::events::outbox::start_worker(
        db_arc.clone(),
        event_sender,
        cfg.outbox_poll_interval(),
        cfg.outbox_batch_size,
        cfg.outbox_retention(),
    );

    // Storefront collaborators
    let collaborators = api::handlers::Collaborators {
        carts: Arc::new(InMemoryCarts::new()),
        catalog: Arc::new(InMemoryCatalog::from_lead_times(&cfg.lead_times)),
        addresses: Arc::new(InMemoryAddressBook::new()),
        invoices: Arc::new(DigestInvoiceIssuer),
    };

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        collaborators,
        CheckoutSettings::from(&cfg),
    );

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc.clone(),
        config: cfg.clone(),
        auth: Arc::new(api::auth::AuthService::new(cfg.jwt_secret.clone())),
        services,
    };

    let app = api::handlers::router(app_state, base_logger);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    info!("furnish-orders listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
