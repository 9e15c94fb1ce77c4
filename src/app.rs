use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::SecurityConfig;
use crate::database::DatabaseManager;
use crate::handlers::{protected, public};
use crate::middleware::{jwt_auth_middleware, require_permission, validate_company_middleware, validate_user_middleware};
use crate::permissions::Resource;
use crate::realtime::websocket::realtime_ws;
use crate::state::AppState;

/// The complete HTTP surface: public routes, the authenticated `/api` tree
/// and the realtime socket
pub fn app(state: AppState) -> Router {
    let max_body = state.config.api.max_request_size_bytes;
    let cors = cors_layer(&state.config.security);

    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .merge(auth_public_routes())
        // Protected
        .merge(protected_routes(state.clone()))
        // Global middleware
        .layer(DefaultBodyLimit::max(max_body))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_public_routes() -> Router<AppState> {
    use public::auth;

    Router::new()
        .route("/auth/register", post(auth::register_post))
        .route("/auth/login", post(auth::login_post))
}

/// Everything under `/api` runs jwt → company → user, in that order
fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(auth_routes())
        .merge(company_routes())
        .merge(user_routes())
        .merge(project_routes())
        .merge(task_routes())
        .merge(lead_routes())
        .merge(document_routes(Resource::Invoice, "/api/invoices"))
        .merge(document_routes(Resource::Quote, "/api/quotes"))
        .merge(quote_routes())
        .merge(payment_routes())
        .merge(conversation_routes())
        .merge(message_routes())
        .merge(realtime_routes())
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), jwt_auth_middleware))
                .layer(from_fn_with_state(state.clone(), validate_company_middleware))
                .layer(from_fn_with_state(state, validate_user_middleware)),
        )
}

fn auth_routes() -> Router<AppState> {
    use protected::auth;

    Router::new()
        .route("/api/auth/whoami", get(auth::session_whoami))
        .route("/api/auth/refresh", post(auth::session_refresh))
}

fn company_routes() -> Router<AppState> {
    use protected::company;

    Router::new()
        .route(
            "/api/company",
            get(company::get).patch(company::patch).delete(company::delete),
        )
        .route_layer(from_fn_with_state(Resource::Company, require_permission))
}

fn user_routes() -> Router<AppState> {
    use protected::users;

    Router::new()
        .route("/api/users", get(users::users_get).post(users::users_post))
        .route(
            "/api/users/:id",
            get(users::user_get).patch(users::user_patch).delete(users::user_delete),
        )
        .route_layer(from_fn_with_state(Resource::User, require_permission))
}

fn project_routes() -> Router<AppState> {
    use protected::projects;

    Router::new()
        .route("/api/projects", get(projects::projects_get).post(projects::projects_post))
        .route(
            "/api/projects/:id",
            get(projects::project_get)
                .patch(projects::project_patch)
                .delete(projects::project_delete),
        )
        .route("/api/projects/:id/members", get(projects::project_members_get))
        .route(
            "/api/projects/:id/members/:user_id",
            post(projects::project_member_post).delete(projects::project_member_delete),
        )
        .route_layer(from_fn_with_state(Resource::Project, require_permission))
}

fn task_routes() -> Router<AppState> {
    use protected::tasks;

    Router::new()
        .route("/api/tasks", get(tasks::tasks_get).post(tasks::tasks_post))
        .route(
            "/api/tasks/:id",
            get(tasks::task_get).patch(tasks::task_patch).delete(tasks::task_delete),
        )
        .route_layer(from_fn_with_state(Resource::Task, require_permission))
}

fn lead_routes() -> Router<AppState> {
    use protected::leads;

    Router::new()
        .route("/api/leads", get(leads::leads_get).post(leads::leads_post))
        .route(
            "/api/leads/:id",
            get(leads::lead_get).patch(leads::lead_patch).delete(leads::lead_delete),
        )
        .route_layer(from_fn_with_state(Resource::Lead, require_permission))
}

/// Invoices and quotes share handlers; the resource picks the document kind
fn document_routes(resource: Resource, base: &str) -> Router<AppState> {
    use protected::invoices;

    let mut router = Router::new()
        .route(base, get(invoices::documents_get).post(invoices::documents_post))
        .route(
            &format!("{}/:id", base),
            get(invoices::document_get)
                .patch(invoices::document_patch)
                .delete(invoices::document_delete),
        )
        .route(&format!("{}/:id/items", base), put(invoices::document_items_put));
    if resource == Resource::Invoice {
        router = router.route(&format!("{}/:id/payments", base), get(invoices::invoice_payments_get));
    }
    router.route_layer(from_fn_with_state(resource, require_permission))
}

fn quote_routes() -> Router<AppState> {
    use protected::invoices;

    Router::new()
        .route("/api/quotes/:id/convert", post(invoices::quote_convert))
        .route_layer(from_fn_with_state(Resource::Quote, require_permission))
}

fn payment_routes() -> Router<AppState> {
    use protected::payments;

    Router::new()
        .route("/api/payments", get(payments::payments_get).post(payments::payments_post))
        .route(
            "/api/payments/:id",
            get(payments::payment_get).delete(payments::payment_delete),
        )
        .route_layer(from_fn_with_state(Resource::Payment, require_permission))
}

fn conversation_routes() -> Router<AppState> {
    use protected::conversations;

    Router::new()
        .route(
            "/api/conversations",
            get(conversations::conversations_get).post(conversations::conversations_post),
        )
        .route(
            "/api/conversations/:id",
            get(conversations::conversation_get)
                .patch(conversations::conversation_patch)
                .delete(conversations::conversation_delete),
        )
        .route("/api/conversations/:id/members", post(conversations::conversation_member_post))
        .route(
            "/api/conversations/:id/members/:user_id",
            axum::routing::delete(conversations::conversation_member_delete),
        )
        .route("/api/conversations/:id/read", post(conversations::conversation_read))
        .route_layer(from_fn_with_state(Resource::Conversation, require_permission))
}

fn message_routes() -> Router<AppState> {
    use protected::conversations;

    Router::new()
        .route(
            "/api/conversations/:id/messages",
            get(conversations::messages_get).post(conversations::messages_post),
        )
        .route(
            "/api/conversations/:id/messages/:message_id",
            axum::routing::patch(conversations::message_patch).delete(conversations::message_delete),
        )
        .route_layer(from_fn_with_state(Resource::Message, require_permission))
}

/// The socket handshake is a GET, so this checks read access to conversations
fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/api/realtime", get(realtime_ws))
        .route_layer(from_fn_with_state(Resource::Conversation, require_permission))
}

/// `*` allows any origin; otherwise only the listed ones
fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if security.cors_origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "BizHub API",
            "version": version,
            "description": "Multi-tenant business management API",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "public_auth": "/auth/register, /auth/login (public - token acquisition)",
                "auth": "/api/auth/whoami, /api/auth/refresh (protected)",
                "company": "/api/company (protected)",
                "users": "/api/users[/:id] (protected)",
                "projects": "/api/projects[/:id[/members[/:user_id]]] (protected)",
                "tasks": "/api/tasks[/:id] (protected)",
                "leads": "/api/leads[/:id] (protected)",
                "invoices": "/api/invoices[/:id[/items|/payments]] (protected)",
                "quotes": "/api/quotes[/:id[/items|/convert]] (protected)",
                "payments": "/api/payments[/:id] (protected)",
                "conversations": "/api/conversations[/:id[/members|/messages|/read]] (protected)",
                "realtime": "/api/realtime (protected, websocket)",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "realtime_rooms": state.hub.room_count().await,
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                    }
                })),
            )
        }
    }
}
