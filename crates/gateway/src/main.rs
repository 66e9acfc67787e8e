//! Achievo API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Authentication and authorization
//! - Rate limiting
//! - Request routing
//! - Observability (logging, metrics, tracing)

mod extract;
mod handlers;
mod middleware;

use achievo_common::{
    accounts::AccountsService,
    achievements::{AchievementRepository, AchievementService},
    auth::JwtManager,
    config::AppConfig,
    db::{DbPool, PgContentStore, Repository},
    metrics,
    notifications::{NotificationDispatcher, NotificationService},
    statistics::StatisticsService,
    store::{ContentStore, RelationalStore},
    AppError,
};
use anyhow::Context;
use axum::{
    error_handling::HandleErrorLayer,
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    BoxError, Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::{limit::ConcurrencyLimitLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: Arc<JwtManager>,
    pub achievements: AchievementService,
    pub statistics: StatisticsService,
    pub accounts: AccountsService,
    pub notifications: NotificationService,
    pub relational: Arc<dyn RelationalStore>,
    pub contents: Arc<dyn ContentStore>,
}

impl AppState {
    /// Wire every service onto the two stores
    pub fn new(
        config: Arc<AppConfig>,
        relational: Arc<dyn RelationalStore>,
        contents: Arc<dyn ContentStore>,
    ) -> Self {
        let jwt = Arc::new(JwtManager::new(
            config.jwt_secret(),
            config.auth.jwt_expiration_secs,
        ));
        let repo = AchievementRepository::new(contents.clone(), relational.clone());
        let notifier = NotificationDispatcher::new(relational.clone());

        Self {
            achievements: AchievementService::new(repo.clone(), relational.clone(), notifier),
            statistics: StatisticsService::new(repo, relational.clone()),
            accounts: AccountsService::new(relational.clone(), jwt.clone()),
            notifications: NotificationService::new(relational.clone()),
            config,
            jwt,
            relational,
            contents,
        }
    }
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config);

    info!(
        service = %config.observability.service_name,
        "Starting Achievo API Gateway v{}",
        achievo_common::VERSION
    );

    if config.uses_fallback_secret() {
        warn!("No JWT secret configured, using the development fallback secret");
    }

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .install()
            .context("failed to install the metrics exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }
    metrics::register_metrics();

    // Initialize store connections
    let pool = DbPool::new(&config.database)
        .await
        .context("failed to connect to the relational store")?;
    let contents = PgContentStore::connect(&config.document_store)
        .await
        .context("failed to connect to the document store")?;

    let config = Arc::new(config);
    let state = AppState::new(
        config.clone(),
        Arc::new(Repository::new(pool)),
        Arc::new(contents),
    );

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let auth_routes = Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh))
        .route("/profile", get(handlers::auth::profile));

    let achievement_routes = Router::new()
        .route(
            "/",
            post(handlers::achievements::create).get(handlers::achievements::list_mine),
        )
        .route(
            "/{id}",
            get(handlers::achievements::detail).delete(handlers::achievements::delete),
        )
        .route("/{id}/submit", post(handlers::achievements::submit))
        .route("/{id}/verify", post(handlers::achievements::verify));

    let admin_routes = Router::new()
        .route(
            "/users",
            get(handlers::admin::list_users).post(handlers::admin::create_user),
        )
        .route(
            "/users/{id}",
            put(handlers::admin::update_user).delete(handlers::admin::deactivate_user),
        )
        .route("/roles", get(handlers::admin::list_roles))
        .route("/students", post(handlers::admin::create_student))
        .route("/students/{id}/advisor", put(handlers::admin::set_advisor))
        .route("/lecturers", post(handlers::admin::create_lecturer))
        .route("/achievements", get(handlers::admin::all_achievements));

    // API routes
    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/achievements", achievement_routes)
        .nest("/admin", admin_routes)
        .route(
            "/lecturer/achievements",
            get(handlers::lecturer::advisee_achievements),
        )
        .route("/reports/statistics", get(handlers::reports::statistics))
        .route("/notifications", get(handlers::notifications::list))
        .route(
            "/notifications/{id}/read",
            post(handlers::notifications::mark_read),
        )
        .route_layer(from_fn(middleware::metrics::track_requests));

    let mut app = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api/v1", api_routes);

    if state.config.rate_limit.enabled {
        let limit = middleware::rate_limit::RateLimit::new(&state.config.rate_limit);
        app = app.layer(from_fn_with_state(limit, middleware::rate_limit::rate_limit));
    }

    // Compose the app
    app.layer(ConcurrencyLimitLayer::new(
        state.config.server.max_concurrent_requests.max(1),
    ))
    .layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_middleware_error))
            .layer(TimeoutLayer::new(state.config.request_timeout())),
    )
    .layer(CompressionLayer::new())
    .layer(TraceLayer::new_for_http())
    .layer(cors)
    .layer(request_id)
    .layer(propagate_id)
    .with_state(state)
}

/// Turn errors from the tower middleware stack into API errors
async fn handle_middleware_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::ServiceUnavailable {
            message: "request timed out".to_string(),
        }
    } else {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use achievo_common::auth::hash_password;
    use achievo_common::store::memory::{MemoryContentStore, MemoryRelationalStore};
    use achievo_common::store::{DirectoryStore, NewLecturer, NewStudent, NewUser};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        router: Router,
        store: Arc<MemoryRelationalStore>,
    }

    impl TestApp {
        fn new(config: AppConfig) -> Self {
            let store = Arc::new(MemoryRelationalStore::seeded());
            let state = AppState::new(
                Arc::new(config),
                store.clone(),
                Arc::new(MemoryContentStore::new()),
            );
            Self {
                router: create_router(state),
                store,
            }
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn user(&self, role: &str, username: &str) -> Uuid {
            let role = self.store.find_role_by_name(role).await.unwrap().unwrap();
            self.store
                .create_user(NewUser {
                    username: username.into(),
                    email: format!("{}@campus.test", username),
                    password_hash: hash_password("password123").unwrap(),
                    full_name: username.to_uppercase(),
                    role_id: role.id,
                })
                .await
                .unwrap()
                .id
        }

        async fn login(&self, username: &str) -> String {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/api/v1/auth/login",
                    None,
                    Some(json!({"credential": username, "password": "password123"})),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            body["token"].as_str().unwrap().to_string()
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new(AppConfig::default());
        let (status, body) = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = app.call(Method::GET, "/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["document_store"]["status"], "up");
    }

    #[tokio::test]
    async fn test_missing_and_bad_tokens() {
        let app = TestApp::new(AppConfig::default());

        let (status, body) = app.call(Method::GET, "/api/v1/achievements", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, body) = app
            .call(Method::GET, "/api/v1/achievements", Some("not-a-jwt"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_verification_workflow_over_http() {
        let app = TestApp::new(AppConfig::default());

        let lecturer_user = app.user("lecturer", "dosen").await;
        let lecturer = app
            .store
            .create_lecturer(NewLecturer {
                user_id: lecturer_user,
                lecturer_number: "L-1".into(),
                department: "Informatics".into(),
            })
            .await
            .unwrap();
        let student_user = app.user("student", "sari").await;
        app.store
            .create_student(NewStudent {
                user_id: student_user,
                student_number: "S-1".into(),
                program_study: "Informatics".into(),
                academic_year: "2022".into(),
                advisor_id: Some(lecturer.id),
            })
            .await
            .unwrap();

        let student = app.login("sari").await;
        let advisor = app.login("dosen").await;

        let (status, created) = app
            .call(
                Method::POST,
                "/api/v1/achievements",
                Some(&student),
                Some(json!({
                    "achievement_type": "competition",
                    "title": "X",
                    "description": "Y",
                    "details": {"level": "nasional"}
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", created);
        assert_eq!(created["status"], "draft");
        let id = created["reference_id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                Method::POST,
                &format!("/api/v1/achievements/{}/submit", id),
                Some(&student),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "submitted");

        let (status, inbox) = app
            .call(Method::GET, "/api/v1/notifications", Some(&advisor), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(inbox.as_array().unwrap().len(), 1);
        assert_eq!(inbox[0]["type"], "achievement_submitted");

        let (status, body) = app
            .call(
                Method::POST,
                &format!("/api/v1/achievements/{}/verify", id),
                Some(&advisor),
                Some(json!({"action": "reject"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = app
            .call(
                Method::POST,
                &format!("/api/v1/achievements/{}/verify", id),
                Some(&advisor),
                Some(json!({"action": "approve"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "verified");

        let (status, body) = app
            .call(
                Method::DELETE,
                &format!("/api/v1/achievements/{}", id),
                Some(&student),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "PRECONDITION_FAILED");

        let (status, report) = app
            .call(Method::GET, "/api/v1/reports/statistics", Some(&advisor), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["summary"]["verified_achievements"], 1);
        assert_eq!(report["competition_levels"][0]["level"], "nasional");
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let app = TestApp::new(AppConfig::default());
        app.user("student", "sari").await;
        app.user("admin", "root").await;

        let student = app.login("sari").await;
        let (status, body) = app
            .call(Method::GET, "/api/v1/admin/users", Some(&student), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let admin = app.login("root").await;
        let (status, body) = app
            .call(Method::GET, "/api/v1/admin/users?per_page=1", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert!(body["data"][0].get("password_hash").is_none());

        let (status, body) = app
            .call(
                Method::POST,
                "/api/v1/admin/users",
                Some(&admin),
                Some(json!({
                    "username": "sari",
                    "email": "another@campus.test",
                    "password": "password123",
                    "full_name": "Sari Again",
                    "role": "student"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_excess() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = TestApp::new(config);

        let (status, _) = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_malformed_requests_get_error_bodies() {
        let app = TestApp::new(AppConfig::default());
        app.user("student", "sari").await;
        let token = app.login("sari").await;

        let (status, body) = app
            .call(
                Method::POST,
                "/api/v1/achievements",
                Some(&token),
                Some(json!({"title": "x"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "MISSING_FIELD");
        assert_eq!(body["error"]["details"]["field"], "achievement_type");

        let (status, body) = app
            .call(
                Method::POST,
                "/api/v1/achievements",
                Some(&token),
                Some(json!({"achievement_type": 7, "title": "x", "description": "y"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FORMAT");

        // No body and no JSON content type
        let (status, body) = app
            .call(Method::POST, "/api/v1/achievements", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FORMAT");

        let (status, body) = app
            .call(Method::GET, "/api/v1/achievements/not-a-uuid", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FORMAT");

        let (status, body) = app
            .call(Method::GET, "/api/v1/achievements?page=abc", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn test_out_of_range_page_is_validation_error() {
        let app = TestApp::new(AppConfig::default());
        app.user("admin", "root").await;
        let admin = app.login("root").await;

        let (status, body) = app
            .call(
                Method::GET,
                "/api/v1/admin/achievements?page=18446744073709551615",
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["field"], "page");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_service_unavailable() {
        let err = handle_middleware_error(Box::new(tower::timeout::error::Elapsed::new())).await;
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = handle_middleware_error("boom".into()).await;
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
