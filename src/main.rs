use {
    jaaiye::{
        AppState,
        adapters::auth::AuthKeys,
        config::{Config, StoreBackend},
        domain::store::Store,
        infra::{memory::MemoryStore, postgres::PgStore},
        services::{
            calendar::LogCalendarSync,
            dispatcher::{WEBHOOK_QUEUE_CAPACITY, WebhookDispatcher, run_webhook_worker},
            notifications::{
                EMAIL_QUEUE_CAPACITY, EmailQueue, HttpMailer, LogMailer, Mailer, run_email_worker,
            },
            payments::PaymentService,
            poller::run_poller,
            reconciliation::Reconciler,
            ticket_issuance::TicketIssuer,
            ticket_token::TicketSigner,
            webhook_processor::WebhookProcessor,
        },
    },
    sqlx::postgres::PgPoolOptions,
    std::{error::Error, sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL must be set")?;
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(3))
                .connect(database_url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let providers = jaaiye::provider_registry(&config, &client);
    if providers.is_empty() {
        tracing::warn!("no payment provider configured");
    }
    let enabled: Vec<_> = providers.enabled().iter().map(|p| p.kind().as_str()).collect();
    tracing::info!(providers = ?enabled, "payment providers enabled");

    let (emails, email_rx) = EmailQueue::new(EMAIL_QUEUE_CAPACITY);
    let mailer: Arc<dyn Mailer> = match &config.email {
        Some(email) => Arc::new(HttpMailer::new(
            client.clone(),
            email.api_url.clone(),
            email.api_key.clone(),
            email.from.clone(),
        )),
        None => {
            tracing::warn!("email delivery not configured, confirmations will be logged only");
            Arc::new(LogMailer)
        }
    };

    let issuer = TicketIssuer::new(
        Arc::clone(&store),
        TicketSigner::new(&config.ticket_token_secret),
    );
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        issuer.clone(),
        emails,
        Arc::new(LogCalendarSync),
    );
    let payments = PaymentService::new(providers.clone(), Arc::clone(&store), reconciler.clone());
    let (dispatcher, webhook_rx) = WebhookDispatcher::new(Arc::clone(&store), WEBHOOK_QUEUE_CAPACITY);
    let processor = WebhookProcessor::new(Arc::clone(&store), reconciler.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = [
        tokio::spawn(run_email_worker(email_rx, mailer, shutdown_rx.clone())),
        tokio::spawn(run_webhook_worker(
            webhook_rx,
            providers.clone(),
            processor,
            Arc::clone(&store),
            shutdown_rx.clone(),
        )),
        tokio::spawn(run_poller(
            Arc::clone(&store),
            providers,
            reconciler,
            config.poll_interval,
            shutdown_rx,
        )),
    ];

    let state = AppState {
        payments,
        issuer,
        dispatcher,
        auth: Arc::new(AuthKeys::new(&config.jwt_secret)),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, jaaiye::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "background worker panicked");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
