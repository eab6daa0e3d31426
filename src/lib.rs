pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    adapters::{
        auth::AuthKeys, flutterwave::FlutterwaveProvider, monnify::MonnifyProvider,
        payaza::PayazaProvider, payments_api, paystack::PaystackProvider, tickets_api, webhook,
    },
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{get, post},
    },
    config::Config,
    services::{
        dispatcher::WebhookDispatcher,
        payments::{PaymentService, ProviderRegistry},
        ticket_issuance::TicketIssuer,
    },
    std::{sync::Arc, time::Duration},
    tower_http::{timeout::TimeoutLayer, trace::TraceLayer},
};

/// Gateway webhooks are a few KB; anything larger is not a gateway.
const BODY_LIMIT_BYTES: usize = 64 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub payments: PaymentService,
    pub issuer: TicketIssuer,
    pub dispatcher: WebhookDispatcher,
    pub auth: Arc<AuthKeys>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhooks/{provider}", post(webhook::receive_webhook))
        .route(
            "/api/v1/payments/{provider}/init",
            post(payments_api::init_payment),
        )
        .route(
            "/api/v1/payments/register",
            post(payments_api::register_transaction),
        )
        .route(
            "/api/v1/payments/{provider}/verify/{reference}",
            get(payments_api::verify_payment),
        )
        .route("/api/v1/tickets/verify", post(tickets_api::verify_ticket))
        .route("/api/v1/tickets/{id}/cancel", post(tickets_api::cancel_ticket))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Adapters for every gateway that has credentials configured.
pub fn provider_registry(config: &Config, client: &reqwest::Client) -> ProviderRegistry {
    let redirect = config.payment_redirect_url.clone();
    let mut registry = ProviderRegistry::new();

    if let Some(settings) = &config.paystack {
        registry.register(Arc::new(PaystackProvider::new(
            client.clone(),
            settings.clone(),
            redirect.clone(),
        )));
    }
    if let Some(settings) = &config.flutterwave {
        registry.register(Arc::new(FlutterwaveProvider::new(
            client.clone(),
            settings.clone(),
            redirect.clone(),
        )));
    }
    if let Some(settings) = &config.monnify {
        registry.register(Arc::new(MonnifyProvider::new(
            client.clone(),
            settings.clone(),
            redirect.clone(),
        )));
    }
    if let Some(settings) = &config.payaza {
        registry.register(Arc::new(PayazaProvider::new(
            client.clone(),
            settings.clone(),
            redirect,
        )));
    }

    registry
}
