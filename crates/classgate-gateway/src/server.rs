//! Gateway server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use classgate_core::{Config, PublicUser, SessionStore, SledStore};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::GatewayError;
use crate::auth::{
    Argon2Hasher, AuthError, AuthService, BootstrapResult, BootstrapService,
    CompleteInvitationRequest, CreateInvitationRequest, CredentialHasher, CurrentIdentity,
    InvitationCreated, InvitationDetails, InvitationService, LoginResponse, OwnershipGuard,
    RoleGuard, SetupStatus, TokenPair, TokenService, optional_auth, require_auth,
    require_ownership, require_role,
};
use crate::rate_limit::{IdentityRateLimiter, RateLimitState, RoleQuotas, rate_limit};

/// Services shared across handlers.
#[derive(Debug)]
pub struct AppState {
    /// Login, refresh, logout.
    pub auth: Arc<AuthService>,
    /// Invitation onboarding.
    pub invitations: Arc<InvitationService>,
    /// Admin bootstrap.
    pub bootstrap: Arc<BootstrapService>,
    /// Token issuing and validation.
    pub tokens: Arc<TokenService>,
}

impl AppState {
    /// Wire every service from validated config.
    ///
    /// # Errors
    ///
    /// Returns error if the token service cannot be built.
    pub fn from_config(config: &Config, store: Arc<dyn SessionStore>) -> Result<Self, AuthError> {
        let tokens = Arc::new(TokenService::from_config(config)?);
        let hasher: Arc<dyn CredentialHasher> = Arc::new(Argon2Hasher::new());

        let auth = AuthService::new(
            Arc::clone(&store),
            Arc::clone(&tokens),
            Arc::clone(&hasher),
            config.jwt.access_token_ttl(),
            config.jwt.refresh_token_ttl(),
        )?;
        let invitations = InvitationService::new(
            Arc::clone(&store),
            Arc::clone(&tokens),
            Arc::clone(&hasher),
            config.jwt.invitation_ttl(),
            config.invitations.base_url.clone(),
        );
        let bootstrap = BootstrapService::new(
            store,
            Arc::clone(&tokens),
            hasher,
            config.admin_private_key_path(),
            config.admin_public_key_path(),
        );

        Ok(Self {
            auth: Arc::new(auth),
            invitations: Arc::new(invitations),
            bootstrap: Arc::new(bootstrap),
            tokens,
        })
    }
}

/// Gateway server.
#[derive(Debug)]
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
    limiter: Arc<IdentityRateLimiter>,
}

impl Gateway {
    /// Create a gateway backed by the sled store in `server.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns error if config is invalid or the store cannot be opened.
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let store = SledStore::open(&config.server.data_dir)
            .map_err(|e| GatewayError::Server(format!("open store: {e}")))?;

        Self::with_store(config, Arc::new(store))
    }

    /// Create a gateway over any store.
    ///
    /// # Errors
    ///
    /// Returns error if config is invalid or services cannot be built.
    pub fn with_store(config: Config, store: Arc<dyn SessionStore>) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let state = AppState::from_config(&config, store)
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let limiter = Arc::new(IdentityRateLimiter::new(config.rate_limit.window()));

        Ok(Self {
            config,
            state: Arc::new(state),
            limiter,
        })
    }

    /// Shared services.
    #[must_use]
    pub const fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the HTTP router.
    pub fn router(&self) -> Router {
        let rate = RateLimitState {
            limiter: Arc::clone(&self.limiter),
            quotas: RoleQuotas::from(&self.config.rate_limit),
        };
        build_router(Arc::clone(&self.state), rate)
    }

    /// Serve until `shutdown` resolves, then stop the rate limit sweeper.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the server fails.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.bind_address, self.config.server.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        match self.state.bootstrap.status() {
            Ok(status) if !status.initialized => {
                tracing::warn!("System not initialized; run `classgate init-admin` or POST /bootstrap/init");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not read setup status"),
        }

        let app = self.router();
        let sweeper = self
            .limiter
            .start_sweeper(self.config.rate_limit.sweep_interval());

        tracing::info!("Gateway API listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        sweeper.stop().await;
        served.map_err(|e| GatewayError::Server(e.to_string()))
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Routes with their middleware stacks. Layers listed last run first, so
/// each stack reads bottom-up: auth, then role/ownership, then rate limit.
fn build_router(state: Arc<AppState>, rate: RateLimitState) -> Router {
    let limited = || from_fn_with_state(rate.clone(), rate_limit);

    let public = Router::new()
        .route("/bootstrap/init", post(bootstrap_init))
        .route("/bootstrap/status", get(bootstrap_status))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/invite/{token}", get(invitation_details))
        .route("/invite/{token}/complete", post(complete_invitation))
        .route_layer(limited())
        .route_layer(from_fn_with_state(Arc::clone(&state.auth), optional_auth));

    let signed_in = Router::new()
        .route("/auth/logout", post(logout))
        .route_layer(limited())
        .route_layer(from_fn_with_state(Arc::clone(&state.auth), require_auth));

    let admin = Router::new()
        .route("/admin/invite", post(create_invitation))
        .route_layer(limited())
        .route_layer(from_fn_with_state(RoleGuard::admin(), require_role))
        .route_layer(from_fn_with_state(Arc::clone(&state.auth), require_auth));

    let owner = Router::new()
        .route("/users/{id}", get(user_profile))
        .route_layer(limited())
        .route_layer(from_fn_with_state(OwnershipGuard::new("id"), require_ownership))
        .route_layer(from_fn_with_state(Arc::clone(&state.auth), require_auth));

    Router::new()
        .route("/health", get(health_handler))
        .merge(public)
        .merge(signed_in)
        .merge(admin)
        .merge(owner)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run a service call off the async workers; password hashing is slow.
async fn blocking<T, F>(f: F) -> Result<T, AuthError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Internal(format!("worker failed: {e}")))?
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn bootstrap_init(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BootstrapResult>, AuthError> {
    let bootstrap = Arc::clone(&state.bootstrap);
    blocking(move || bootstrap.initialize_admin()).await.map(Json)
}

async fn bootstrap_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SetupStatus>, AuthError> {
    state.bootstrap.status().map(Json)
}

/// Login request body.
#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let auth = Arc::clone(&state.auth);
    blocking(move || auth.login(&request.username, &request.password))
        .await
        .map(Json)
}

/// Refresh request body.
#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    state
        .auth
        .refresh_access_token(&request.refresh_token)
        .map(Json)
}

#[derive(Debug, Serialize)]
struct LogoutResponse {
    revoked: usize,
}

async fn logout(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<LogoutResponse>, AuthError> {
    let revoked = state.auth.logout(&identity.user_id)?;
    Ok(Json(LogoutResponse { revoked }))
}

async fn create_invitation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<Json<InvitationCreated>, AuthError> {
    state.invitations.create_invitation(&request).map(Json)
}

async fn invitation_details(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<InvitationDetails>, AuthError> {
    state.invitations.get_invitation_details(&token).map(Json)
}

async fn complete_invitation(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(request): Json<CompleteInvitationRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AuthError> {
    let invitations = Arc::clone(&state.invitations);
    let user = blocking(move || invitations.complete_invitation(&token, &request)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn user_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, AuthError> {
    state.auth.current_user(&id).map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PASSWORD, SECRET};
    use axum::{body::Body, http::Request, http::header::AUTHORIZATION};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct Harness {
        _dir: tempfile::TempDir,
        app: Router,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();
        config.jwt.secret = Some(String::from_utf8(SECRET.to_vec()).unwrap());

        let store = Arc::new(SledStore::temporary().unwrap());
        let gateway = Gateway::with_store(config, store).unwrap();
        Harness {
            app: gateway.router(),
            _dir: dir,
        }
    }

    impl Harness {
        async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            let body = match body {
                Some(json) => {
                    request = request.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };

            let response = self
                .app
                .clone()
                .oneshot(request.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }
    }

    fn text(value: &Value, field: &str) -> String {
        value[field].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = h.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_bootstrap_once() {
        let h = harness();

        let (_, body) = h.send("GET", "/bootstrap/status", None, None).await;
        assert_eq!(body["initialized"], false);

        let (status, body) = h.send("POST", "/bootstrap/init", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["admin_token"].is_string());
        assert!(body.get("private_key").is_none());

        let (status, body) = h.send("POST", "/bootstrap/init", None, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");

        let (_, body) = h.send("GET", "/bootstrap/status", None, None).await;
        assert_eq!(body["initialized"], true);
    }

    #[tokio::test]
    async fn test_onboarding_flow() {
        let h = harness();

        let (_, body) = h.send("POST", "/bootstrap/init", None, None).await;
        let admin = text(&body, "admin_token");

        let invite = json!({
            "email": "grace@school.example",
            "first_name": "Grace",
            "last_name": "Hopper",
            "role": "teacher",
            "department": "Computing",
        });
        let (status, _) = h.send("POST", "/admin/invite", None, Some(invite.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = h.send("POST", "/admin/invite", Some(&admin), Some(invite)).await;
        assert_eq!(status, StatusCode::OK);
        let invitation = text(&body, "token");
        assert!(text(&body, "link").ends_with(&format!("/invite/{invitation}")));

        let (status, body) = h.send("GET", &format!("/invite/{invitation}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "teacher");
        assert!(body.get("token").is_none());

        let credentials = json!({ "username": "ghopper", "password": PASSWORD });
        let complete = format!("/invite/{invitation}/complete");
        let (status, body) = h.send("POST", &complete, None, Some(credentials.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let user_id = text(&body, "id");
        assert!(body.get("password_hash").is_none());

        let (status, _) = h.send("POST", &complete, None, Some(credentials.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h.send("POST", "/auth/login", None, Some(credentials)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], user_id.as_str());
        let access = text(&body, "access_token");
        let refresh_token = text(&body, "refresh_token");

        let (status, _) = h
            .send("GET", &format!("/users/{user_id}"), Some(&access), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = h.send("GET", "/users/someone-else", Some(&access), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = h
            .send("GET", &format!("/users/{user_id}"), Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let teacher_invite = json!({
            "email": "x@school.example",
            "first_name": "X",
            "last_name": "Y",
            "role": "student",
            "teacher_id": "t1",
        });
        let (status, _) = h
            .send("POST", "/admin/invite", Some(&access), Some(teacher_invite))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let refresh_body = json!({ "refresh_token": refresh_token });
        let (status, body) = h
            .send("POST", "/auth/refresh", None, Some(refresh_body.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refresh_token"], refresh_token.as_str());

        let (status, body) = h.send("POST", "/auth/logout", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["revoked"], 1);

        let (status, _) = h.send("POST", "/auth/refresh", None, Some(refresh_body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_failure_shape() {
        let h = harness();
        let (status, body) = h
            .send(
                "POST",
                "/auth/login",
                None,
                Some(json!({ "username": "nobody", "password": "whatever" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config::default();
        let store = Arc::new(SledStore::temporary().unwrap());
        assert!(matches!(
            Gateway::with_store(config, store),
            Err(GatewayError::Config(_))
        ));
    }
}
