pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::middleware::from_fn;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use config::Config;
use services::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
}

pub struct Application {
    port: u16,
    listener: tokio::net::TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        db.run_migrations().await?;

        services::metrics::init_metrics();

        let state = AppState {
            db,
            config: config.clone(),
        };

        let router = Router::new()
            .route("/health", get(handlers::health))
            .route("/ready", get(handlers::ready))
            .route("/metrics", get(handlers::metrics))
            // Candidate discovery
            .route("/candidates", get(handlers::candidates::list_candidates))
            // Merge groups
            .route("/merge-groups", post(handlers::merge::create_merge_group))
            .route("/merge-groups/:id", delete(handlers::merge::ungroup))
            // Payment requests
            .route(
                "/payment-requests",
                post(handlers::requests::submit_payments),
            )
            .route(
                "/payment-requests/:id",
                get(handlers::requests::get_payment_request),
            )
            .route(
                "/payment-requests/:id/approve",
                post(handlers::requests::approve_request),
            )
            .route(
                "/payment-requests/:id/reject",
                post(handlers::requests::reject_request),
            )
            .route(
                "/payment-requests/:id/revert",
                post(handlers::requests::revert_request),
            )
            .route(
                "/payment-requests/:id/attachments",
                post(handlers::requests::register_attachment),
            )
            // Confirmations
            .route(
                "/confirmations",
                post(handlers::confirmations::create_confirmation)
                    .get(handlers::confirmations::list_confirmations),
            )
            .route(
                "/confirmations/:id",
                get(handlers::confirmations::get_confirmation)
                    .delete(handlers::confirmations::revert_confirmation),
            )
            .route(
                "/confirmations/:id/remittance-settings",
                put(handlers::confirmations::update_remittance_settings),
            )
            .route(
                "/confirmations/:id/remittance-groups",
                get(handlers::confirmations::remittance_groups),
            )
            .route(
                "/confirmations/:id/export",
                get(handlers::confirmations::export_csv),
            )
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state);

        // Bind here so port 0 resolves to the actual port for tests.
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("Listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
