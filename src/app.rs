use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{AuthzResolver, PermissionCatalog, RoleDirectory};
use crate::config::AuthConfig;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::routes::{auth, health, issues, menus, projects, rbac};
use crate::tokens::TokenCodec;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub cfg: Arc<AuthConfig>,
    pub tokens: Arc<TokenCodec>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, cfg: Arc<AuthConfig>, event_bus: EventBus) -> Self {
        let tokens = Arc::new(TokenCodec::new(&cfg));
        Self {
            pool,
            cfg,
            tokens,
            event_bus,
        }
    }

    /// Policy core over the live store; cheap to construct per use, holds no
    /// cross-request state.
    pub fn resolver(&self) -> AuthzResolver {
        AuthzResolver::new(self.pool.clone(), self.cfg.clone())
    }

    pub fn directory(&self) -> RoleDirectory {
        RoleDirectory::new(self.pool.clone())
    }

    pub fn catalog(&self) -> PermissionCatalog {
        PermissionCatalog::new(self.pool.clone())
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let cfg = Arc::new(AuthConfig::from_env()?);
    Ok(create_app_with_config(pool, cfg))
}

pub fn create_app_with_config(pool: SqlitePool, cfg: Arc<AuthConfig>) -> Router {
    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, cfg, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/me", get(auth::me));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route("/:id", get(projects::get_project).put(projects::update_project))
        .route("/:id/members", get(projects::list_members).post(projects::add_member))
        .route("/:id/members/:user_id", delete(projects::remove_member))
        .route(
            "/:id/members/:user_id/roles/:role_id",
            delete(projects::revoke_member_role),
        );

    // Issues are scoped to a project: /projects/:project_id/issues
    let issue_routes = Router::new()
        .route("/", get(issues::list_issues).post(issues::create_issue))
        .route("/:id", get(issues::get_issue).put(issues::update_issue));

    Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/projects", project_routes)
        .nest("/projects/:project_id/issues", issue_routes)
        // cross-project issue listing, scoped by visibility tier
        .route("/issues", get(issues::list_all_issues))
        .nest("/rbac", rbac::routes())
        .route("/menus", get(menus::my_menu_tree))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
