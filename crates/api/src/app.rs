use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use domain::services::{ChangeFeed, PinStore, SubscriptionRegistry, TimedPinStore};
use persistence::repositories::{PinRepository, ProjectRepository};
use persistence::PgPinStore;
use shared::jwt::{JwtConfig, JwtError};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, security_headers_middleware, trace_id,
};
use crate::routes::{auth, frontend, health, insights, pins, projects, shell};
use crate::services::AuthService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtConfig>,
    pub auth: AuthService,
    pub projects: ProjectRepository,
    pub pins: PinRepository,
    /// Owns the change feed; used to close a deleted project's streams.
    pub pin_store: PgPinStore,
    /// `pin_store` with the configured write timeout applied.
    pub store: Arc<dyn PinStore>,
    /// Open pin streams per user, cancelled on logout.
    pub streams: Arc<SubscriptionRegistry<Uuid>>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> Result<Self, JwtError> {
        let jwt = Arc::new(config.jwt.build()?);
        let feed = Arc::new(ChangeFeed::new(config.store.feed_capacity));
        let pin_store = PgPinStore::new(pool.clone(), feed, config.store.subscription_buffer);
        let store: Arc<dyn PinStore> = Arc::new(TimedPinStore::new(
            Arc::new(pin_store.clone()),
            config.store.write_timeout(),
        ));

        Ok(Self {
            auth: AuthService::new(pool.clone(), jwt.clone()),
            projects: ProjectRepository::new(pool.clone()),
            pins: PinRepository::new(pool.clone()),
            pool,
            config: Arc::new(config),
            jwt,
            pin_store,
            store,
            streams: Arc::new(SubscriptionRegistry::new()),
        })
    }
}

pub fn create_app(config: Config, pool: PgPool) -> Result<Router, JwtError> {
    let state = AppState::new(config, pool)?;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let config = state.config.clone();

    let cors = if config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Handlers authenticate through the `UserAuth` extractor.
    let api_routes = Router::new()
        .route("/api/v1/auth/signup", post(auth::signup))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/me", get(auth::me))
        .route(
            "/api/v1/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/v1/projects/:project_id",
            patch(projects::rename_project).delete(projects::delete_project),
        )
        .route(
            "/api/v1/projects/:project_id/pins",
            get(pins::list_pins).post(pins::create_pin),
        )
        .route("/api/v1/projects/:project_id/pins/stream", get(pins::stream_pins))
        .route(
            "/api/v1/projects/:project_id/pins/:pin_id",
            put(pins::put_pin).delete(pins::delete_pin),
        )
        .route("/api/v1/projects/:project_id/summary", get(insights::summary))
        .route("/api/v1/projects/:project_id/contacts", get(insights::contacts))
        .route("/api/v1/projects/:project_id/nearby", get(insights::nearby))
        .route("/api/v1/shell", get(shell::resolve));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    let frontend_routes = Router::new()
        .route("/", get(frontend::root_redirect))
        .fallback(frontend::serve_frontend);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(frontend_routes)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
