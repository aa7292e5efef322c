//! # storyctl: personalized children's stories
//!
//! `storyctl` is the backend for a service that writes illustrated stories for a specific child.
//! Parents keep a profile of the child (name, age, favourite things, personality, family, comfort
//! items and photos); a story is generated from that profile around a fear or challenge the child
//! is facing, in a chosen tone.
//!
//! ## Request Flow
//!
//! `POST /api/v1/stories/generate` runs the whole chain:
//!
//! 1. The **usage gate** ([`metering`]) locks the account's subscription, rolls the billing period
//!    over if needed and decides whether the story may be generated and how it is billed.
//! 2. The **generation pipeline** ([`generation`]) builds a character reference from the profile's
//!    photos, writes the story with one structured text-model call, and illustrates every scene
//!    concurrently. Each step degrades to a fallback instead of failing.
//! 3. The story is stored and the matching usage counter is updated in one transaction. If the
//!    allowance was used up by a concurrent request in the meantime, nothing is stored or charged.
//!
//! Everything else is CRUD around it: accounts ([`auth`]), child profiles and their sub-resources,
//! the story library, and subscriptions with checkout through a pluggable
//! [`PaymentProvider`](payment_providers::PaymentProvider).
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); persistence is PostgreSQL through
//! SQLx repositories ([`db`]). Model providers sit behind the traits in [`generation`] so tests
//! substitute fakes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use storyctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = storyctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     storyctl::telemetry::init_telemetry(config.log_format)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run automatically on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! storyctl::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod generation;
pub mod metering;
mod openapi;
pub mod payment_providers;
pub mod storybook;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{self, HeaderValue};
use axum::{
    Json, Router,
    routing::{get, patch, post, put},
};
use bon::Builder;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
use config::CorsOrigin;
use generation::client::OpenAiClient;
use generation::pipeline::StoryPipeline;
use openapi::ApiDoc;
use payment_providers::PaymentProvider;
pub use types::{ProfileId, StoryId, UserId};

/// Multipart framing around an uploaded photo
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .pipeline(pipeline)
///     .maybe_payment_provider(provider)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub pipeline: StoryPipeline,
    /// Checkout endpoints answer 501 when unset
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
}

/// Get the storyctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to PostgreSQL and run migrations
#[instrument(skip_all)]
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database.pool;
    let non_zero = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(non_zero(settings.idle_timeout_secs))
        .max_lifetime(non_zero(settings.max_lifetime_secs))
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;
    info!("Database migrations applied");
    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            // Origins never carry the trailing slash `Url` adds
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut exposed = vec![http::header::LOCATION];
    for name in &config.auth.security.cors.exposed_headers {
        let header = name.parse::<http::HeaderName>()?;
        if !exposed.contains(&header) {
            exposed.push(header);
        }
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .expose_headers(exposed);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router with all endpoints and middleware.
///
/// - Account routes at `/authentication/*`
/// - The versioned API at `/api/v1/*`
/// - `/healthz`, the OpenAPI document at `/api-docs/openapi.json` and the docs UI at `/docs`
/// - CORS and request tracing
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth, comfort_items, family_members, personality_traits, photos, profiles, stories, subscriptions, users};

    let auth_routes = Router::new()
        .route("/authentication/register", post(auth::register))
        .route("/authentication/login", post(auth::login))
        .route("/authentication/logout", post(auth::logout))
        .with_state(state.clone());

    let upload_limit = state.config.photos.max_upload_bytes + UPLOAD_OVERHEAD_BYTES;

    let api_routes = Router::new()
        // Account
        .route(
            "/users/current",
            get(users::get_current_user)
                .patch(users::update_current_user)
                .delete(users::delete_current_user),
        )
        // Child profiles
        .route("/profiles", get(profiles::list_profiles).post(profiles::create_profile))
        .route(
            "/profiles/{id}",
            get(profiles::get_profile)
                .patch(profiles::update_profile)
                .delete(profiles::delete_profile),
        )
        .route("/profiles/{id}/character-reference", get(profiles::get_character_reference))
        // Profile sub-resources
        .route(
            "/profiles/{id}/family-members",
            get(family_members::list_family_members).post(family_members::create_family_member),
        )
        .route(
            "/profiles/{id}/family-members/{member_id}",
            patch(family_members::update_family_member).delete(family_members::delete_family_member),
        )
        .route(
            "/profiles/{id}/comfort-items",
            get(comfort_items::list_comfort_items).post(comfort_items::create_comfort_item),
        )
        .route(
            "/profiles/{id}/comfort-items/{item_id}",
            patch(comfort_items::update_comfort_item).delete(comfort_items::delete_comfort_item),
        )
        .route(
            "/profiles/{id}/personality-traits",
            get(personality_traits::list_personality_traits).put(personality_traits::replace_personality_traits),
        )
        // Photos
        .route(
            "/profiles/{id}/photos",
            get(photos::list_photos).post(photos::upload_photo).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/profiles/{id}/photos/{photo_id}", axum::routing::delete(photos::delete_photo))
        .route("/profiles/{id}/photos/{photo_id}/primary", put(photos::set_primary_photo))
        .route("/photos/{photo_id}/content", get(photos::get_photo_content))
        .route(
            "/photos/analyze-character",
            post(photos::analyze_character_photo).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Stories
        .route("/stories/generate", post(stories::generate_story))
        .route("/stories", get(stories::list_stories))
        .route("/stories/templates", get(stories::list_story_templates))
        .route("/stories/{id}", get(stories::get_story).delete(stories::delete_story))
        .route("/stories/{id}/favorite", put(stories::toggle_favorite))
        .route("/stories/{id}/rating", post(stories::rate_story))
        .route("/stories/{id}/pdf", get(stories::export_story_pdf))
        // Subscription and billing
        .route("/subscription", get(subscriptions::get_subscription))
        .route("/subscription/plans", get(subscriptions::list_plans))
        .route("/subscription/usage", get(subscriptions::get_usage))
        .route("/subscription/features/{feature}", get(subscriptions::check_feature_access))
        .route("/subscription/checkout", post(subscriptions::create_checkout))
        .route("/subscription/checkout/{session_id}", patch(subscriptions::process_checkout))
        .route("/subscription/cancel", post(subscriptions::cancel_subscription))
        .route("/subscription/reactivate", post(subscriptions::reactivate_subscription))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(auth_routes)
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;

    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Initialization**: connects to the database, runs migrations, builds the model client and
///    payment provider
/// 2. **Serving**: binds to the configured address and serves HTTP requests
/// 3. **Shutdown**: stops accepting connections when the shutdown signal resolves, then closes the
///    database pool
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting storyctl with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;

        let client = Arc::new(OpenAiClient::new(config.generation.clone())?);
        let pipeline = StoryPipeline::new(client.clone(), client.clone(), client, &config.generation);

        let payment_provider = config.payment.clone().map(payment_providers::create_provider);
        if payment_provider.is_none() {
            info!("No payment provider configured; checkout endpoints are disabled");
        }

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .pipeline(pipeline)
            .maybe_payment_provider(payment_provider)
            .build();

        let router = build_router(app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "storyctl listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
