use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use outbox_dispatcher::clients::{setup_aws_clients, setup_db_pool, setup_sentry};
use outbox_dispatcher::config::Config;
use outbox_dispatcher::lock::provision_lock_rows;
use outbox_dispatcher::messaging::AwsBroker;
use outbox_dispatcher::shutdown::{first_to_stop, shutdown_signal, Stopped};
use outbox_dispatcher::{routes, Dispatcher, PgOutboxStore};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing(with_sentry: bool) {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .with(with_sentry.then(|| sentry::integrations::tracing::layer()))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // --- Configuration ---
    let config = Config::load()?;

    let sentry_guard = setup_sentry(&config);
    init_tracing(sentry_guard.is_some());
    info!("Configuration loaded.");
    // --- End Configuration ---

    // 1. Connect to the Database
    info!("Connecting to database...");
    let db_pool = setup_db_pool(&config).await?;
    info!("Database connection established.");

    let topics = config.topics()?;
    if config.provision_lock_rows {
        let business_types: Vec<_> = topics.business_types().collect();
        let mut conn = db_pool.acquire().await?;
        provision_lock_rows(&mut conn, &business_types).await?;
        info!(business_types = business_types.len(), "Lock rows provisioned.");
    }

    // 2. Setup the AWS clients
    info!("Setting up AWS clients...");
    let (sqs_client, sns_client) = setup_aws_clients(&config).await;
    info!("AWS clients established.");

    // 3. Wire the dispatcher; store and broker are built once and handed in.
    let dispatcher = Arc::new(Dispatcher::new(
        PgOutboxStore::new(db_pool.clone(), config.lock_timeout()),
        AwsBroker::new(sqs_client, sns_client),
        topics,
        config.dispatcher_settings(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    // Spawn the health check server
    let pool_data = web::Data::new(db_pool);
    let health_server = HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", config.health_port))? // Binds to all interfaces
    .disable_signals()
    .run();
    let server_handle = health_server.handle();
    let mut server_task = tokio::spawn(health_server);
    info!(port = config.health_port, "Health check server running.");

    match first_to_stop(shutdown_signal(), &mut dispatcher_handle, &mut server_task).await {
        Stopped::Signal => {
            let _ = shutdown_tx.send(true);
            server_handle.stop(true).await;
            dispatcher_handle.await?;
            server_task.await??;
        }
        Stopped::Dispatcher(joined) => {
            error!("Dispatcher stopped unexpectedly.");
            server_handle.stop(true).await;
            joined?;
            server_task.await??;
            return Err("dispatcher stopped unexpectedly".into());
        }
        Stopped::Server(joined) => {
            error!("Health check server stopped unexpectedly.");
            let _ = shutdown_tx.send(true);
            dispatcher_handle.await?;
            joined??;
            return Err("health check server stopped unexpectedly".into());
        }
    }

    info!("Dispatcher shut down.");
    Ok(())
}
