use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{any, get, post};
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::api::{model_handler, record_handler, ApiRegistry};
use crate::config::Settings;
use crate::db::{ConnectionConfig, ConnectionPool, DatabaseRegistry};
use crate::error::AppError;
use crate::fields::{create_field, FieldAttributes, FieldKind};
use crate::handlers;
use crate::handlers::auth::AuthBackend;
use crate::logging::LoggerRegistry;
use crate::middleware::{auth_required, db_required, request_context, security_headers};
use crate::models::ModelDefinition;
use crate::session::{SessionStore, SESSION_MAX_AGE};

/// Request body cap for the whole surface.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Shared application state, wired once at the composition root. There are
/// no process-wide singletons; tests construct private instances.
pub struct AppState {
    pub settings: Settings,
    pub logging: LoggerRegistry,
    pub session_store: Arc<dyn SessionStore>,
    pub db: Arc<DatabaseRegistry>,
    pub api: Arc<ApiRegistry>,
    pub auth: Arc<dyn AuthBackend>,
}

/// Build the full router: public endpoints, authenticated endpoints and the
/// RPC surface, wrapped in the request-context, security-header and CORS
/// layers.
pub fn create_router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/auth/login", post(handlers::auth::login))
        .route("/db/list", get(handlers::database::list_databases));

    let protected = Router::new()
        .route("/health/detailed", get(handlers::health::detailed_health))
        .route(
            "/auth/logout",
            post(handlers::auth::logout).get(handlers::auth::logout),
        )
        .route("/auth/session", get(handlers::auth::session_info))
        .route("/session", get(handlers::session::get_session))
        .route("/session/clear", post(handlers::session::clear_session))
        .route("/session/set", post(handlers::session::set_session))
        .route("/db/set", post(handlers::database::set_database))
        .route_layer(from_fn(auth_required));

    let api = Router::new()
        .route("/api/call", post(handlers::api::call_method))
        .route(
            "/api/models/{model}/methods",
            get(handlers::api::get_model_methods),
        )
        .route(
            "/api/models/{model}/methods/{method}",
            get(handlers::api::get_method_info),
        )
        .route(
            "/api/models/{model}/{method}",
            any(handlers::api::call_model_method),
        )
        .route(
            "/api/models/{model}/{ids}/{method}",
            any(handlers::api::call_record_method),
        )
        .route_layer(from_fn(db_required))
        .route_layer(from_fn(auth_required));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(api)
        .layer(from_fn(security_headers))
        .layer(from_fn_with_state(state.clone(), request_context))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the server: spawn the maintenance loops, bind and serve with
/// graceful shutdown on ctrl-c.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let logger = state.logging.logger("goodoo.server");

    spawn_session_sweeper(state.clone());
    spawn_registry_cleanup(state.clone());

    let app = create_router(state.clone());

    let addr = SocketAddr::from((
        state.settings.host.parse::<std::net::IpAddr>()?,
        state.settings.port,
    ));

    logger.info(format!("Starting server on {}", addr));
    logger.info(format!("Session store: {}", state.settings.session_dir));
    if !state.settings.default_db.is_empty() {
        logger.info(format!("Default database: {}", state.settings.default_db));
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    logger.info("Server stopped gracefully");
    state.logging.close();
    Ok(())
}

/// Hourly TTL sweep over the session directory.
fn spawn_session_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let logger = state.logging.logger("goodoo.session.sweep");
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match state.session_store.cleanup(SESSION_MAX_AGE) {
                Ok(0) => logger.debug("Session cleanup completed"),
                Ok(removed) => logger.info(format!("Session cleanup removed {} sessions", removed)),
                Err(err) => logger.error(format!("Session cleanup failed: {}", err)),
            }
        }
    });
}

/// Periodically close database handles idle longer than thirty minutes.
fn spawn_registry_cleanup(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            state.db.cleanup_inactive(Duration::from_secs(30 * 60)).await;
        }
    });
}

/// Wire the default composition: pool, registry (with the default database
/// registered when configured) and the demo `partner` API so the RPC surface
/// is exercisable out of the box.
pub async fn build_state(
    settings: Settings,
    logging: LoggerRegistry,
    session_store: Arc<dyn SessionStore>,
    auth: Arc<dyn AuthBackend>,
) -> Result<Arc<AppState>> {
    let pool = Arc::new(ConnectionPool::new(settings.db_maxconn as usize));
    let db = Arc::new(DatabaseRegistry::new(pool));

    if !settings.default_db.is_empty() {
        let mut config = ConnectionConfig::from_env_defaults(&settings);
        config.database = settings.default_db.clone();
        db.register(&settings.default_db, config)
            .await
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    }

    let api = Arc::new(ApiRegistry::new(&logging));
    register_demo_api(&api);

    Ok(Arc::new(AppState {
        settings,
        logging,
        session_store,
        db,
        api,
        auth,
    }))
}

/// Demo `partner` model and methods used by the default wiring.
pub fn register_demo_api(api: &ApiRegistry) {
    let mut partner = ModelDefinition::new("partner", "");
    partner.add_field(
        "name",
        create_field(
            FieldKind::Char,
            FieldAttributes {
                required: true,
                ..FieldAttributes::default()
            },
        ),
    );
    partner.add_field("email", create_field(FieldKind::Char, FieldAttributes::default()));
    partner.add_field(
        "active",
        create_field(FieldKind::Boolean, FieldAttributes::default()),
    );
    api.register_model(partner);

    api.new_method(
        "partner",
        "search",
        model_handler(|_ctx, args| async move {
            let domain = args.first().cloned().unwrap_or(Value::Array(Vec::new()));
            Ok(json!({"ids": [], "domain": domain}))
        }),
    )
    .model()
    .returns("partner")
    .help("Search partners matching a domain")
    .register();

    api.new_method(
        "partner",
        "create",
        model_handler(|_ctx, args| async move {
            let count = args.iter().filter(|a| a.is_object()).count().max(1);
            Ok(json!((1..=count as i64).collect::<Vec<i64>>()))
        }),
    )
    .model_create()
    .constrains(&["name", "email"])
    .help("Create partners from value mappings")
    .register();

    api.new_method(
        "partner",
        "archive",
        record_handler(|_ctx, _ids, _args| async move { Ok(json!(true)) }),
    )
    .on_change(&["active"])
    .help("Archive the given partner records")
    .register();

    api.new_method(
        "partner",
        "purge",
        model_handler(|_ctx, _args| async move { Ok(json!(true)) }),
    )
    .model()
    .groups(&["base.group_admin"])
    .help("Remove archived partners")
    .register();

    api.new_method(
        "partner",
        "recompute",
        model_handler(|_ctx, _args| async move { Ok(Value::Null) }),
    )
    .private()
    .depends(&["name"])
    .register();
}

impl AppState {
    /// Borrow a live handle for the request's database.
    pub async fn request_db(&self, ctx: &crate::request::RequestCtx) -> Result<sqlx::PgPool, AppError> {
        let Some(db_name) = ctx.db_name() else {
            return Err(AppError::Validation("Database required".to_string()));
        };
        self.db.connection(&db_name).await
    }
}
