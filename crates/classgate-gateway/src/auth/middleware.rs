//! Authentication middleware for axum.
//!
//! `require_auth`/`optional_auth` validate the bearer token once and attach
//! a typed [`Identity`] to the request extensions. `require_role` and
//! `require_ownership` read that identity and never look at tokens.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use classgate_core::Role;

use super::AuthError;
use super::jwt::{Claims, TokenKind, TokenService};
use super::service::AuthService;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User ID (token subject).
    pub user_id: String,
    /// Role from the token.
    pub role: Role,
    /// Access or admin.
    pub kind: TokenKind,
}

impl Identity {
    /// Check if the caller is an admin.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            kind: claims.kind,
        }
    }
}

fn authenticate(auth: &AuthService, parts: &Parts) -> Result<Identity, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::Unauthorized("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| AuthError::Unauthorized("invalid Authorization header".to_string()))?;

    let token = TokenService::extract_bearer(header).ok_or_else(|| {
        AuthError::Unauthorized("invalid Authorization header format".to_string())
    })?;

    auth.validate_token(token).map(Identity::from)
}

/// Reject requests without a valid access or admin token.
///
/// # Errors
///
/// Returns `Unauthorized` before the inner service runs.
pub async fn require_auth(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = request.into_parts();
    let identity = authenticate(&auth, &parts)?;
    parts.extensions.insert(identity);

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Attach an identity when a valid token is present; never rejects.
pub async fn optional_auth(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    match authenticate(&auth, &parts) {
        Ok(identity) => {
            parts.extensions.insert(identity);
        }
        Err(e) => tracing::debug!(error = %e, "Continuing anonymously"),
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Roles allowed through [`require_role`].
#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Vec<Role>,
}

impl RoleGuard {
    /// Allow the given roles.
    pub fn new(allowed: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Allow admins only.
    #[must_use]
    pub fn admin() -> Self {
        Self::new([Role::Admin])
    }

    /// Check a role.
    #[must_use]
    pub fn allows(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }
}

/// Reject callers whose role is not allowed. Must run after an auth layer.
///
/// # Errors
///
/// Returns `Unauthorized` without an identity, `Forbidden` for other roles.
pub async fn require_role(
    State(guard): State<RoleGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| AuthError::Unauthorized("authentication required".to_string()))?;

    if !guard.allows(identity.role) {
        return Err(AuthError::Forbidden(format!(
            "role {} may not access this resource",
            identity.role
        )));
    }

    Ok(next.run(request).await)
}

/// Path parameter that must equal the caller's user ID.
#[derive(Debug, Clone)]
pub struct OwnershipGuard {
    param: &'static str,
}

impl OwnershipGuard {
    /// Compare the caller against the path parameter `param`.
    #[must_use]
    pub const fn new(param: &'static str) -> Self {
        Self { param }
    }
}

/// Let admins and the resource owner through. Must be installed with
/// `route_layer` so path parameters are available.
///
/// # Errors
///
/// Returns `Unauthorized` without an identity, `Forbidden` for a
/// different user, and `Internal` if the route has no such parameter.
pub async fn require_ownership(
    State(guard): State<OwnershipGuard>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| AuthError::Unauthorized("authentication required".to_string()))?;

    if !identity.is_admin() {
        let owner = params
            .iter()
            .find_map(|(name, value)| (name == guard.param).then_some(value))
            .ok_or_else(|| {
                tracing::error!(param = guard.param, "Ownership guard on route without parameter");
                AuthError::Internal("route misconfigured".to_string())
            })?;

        if owner != identity.user_id {
            return Err(AuthError::Forbidden(
                "resource belongs to another user".to_string(),
            ));
        }
    }

    Ok(next.run(request).await)
}

/// Extractor for the authenticated identity.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AuthError::Unauthorized("authentication required".to_string()))
    }
}

/// Extractor for an identity that may be absent.
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Identity>().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use axum::{Router, body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get};
    use std::time::Duration;
    use tower::ServiceExt;

    const HOUR: Duration = Duration::from_secs(3600);

    struct Fixture {
        auth: Arc<AuthService>,
        tokens: Arc<TokenService>,
    }

    fn fixture() -> Fixture {
        let tokens = testing::tokens_with_admin_keys();
        let auth = Arc::new(testing::auth_service(testing::store(), tokens.clone()));
        Fixture { auth, tokens }
    }

    impl Fixture {
        fn bearer(&self, user_id: &str, role: Role, kind: TokenKind) -> String {
            let issued = self.tokens.issue(user_id, role, kind, HOUR).unwrap();
            format!("Bearer {}", issued.token)
        }
    }

    async fn status(app: Router, uri: &str, authorization: Option<&str>) -> StatusCode {
        let mut request = axum::http::Request::builder().uri(uri);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    fn protected(auth: Arc<AuthService>) -> Router {
        Router::new()
            .route(
                "/me",
                get(|CurrentIdentity(identity): CurrentIdentity| async move { identity.user_id }),
            )
            .route_layer(from_fn_with_state(auth, require_auth))
    }

    #[tokio::test]
    async fn test_require_auth() {
        let f = fixture();
        let app = protected(f.auth.clone());

        let access = f.bearer("u1", Role::Student, TokenKind::Access);
        let admin = f.bearer("a1", Role::Admin, TokenKind::Admin);
        let refresh = f.bearer("u1", Role::Student, TokenKind::Refresh);
        let invitation = f.bearer("x@y.z", Role::Student, TokenKind::Invitation);

        assert_eq!(status(app.clone(), "/me", Some(&access)).await, StatusCode::OK);
        assert_eq!(status(app.clone(), "/me", Some(&admin)).await, StatusCode::OK);
        for bad in [
            None,
            Some("Basic dXNlcjpwYXNz"),
            Some("Bearer garbage"),
            Some(refresh.as_str()),
            Some(invitation.as_str()),
        ] {
            assert_eq!(
                status(app.clone(), "/me", bad).await,
                StatusCode::UNAUTHORIZED,
                "{bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_optional_auth() {
        let f = fixture();
        let app = Router::new()
            .route(
                "/whoami",
                get(|MaybeIdentity(identity): MaybeIdentity| async move {
                    identity.map_or_else(|| "anonymous".to_string(), |i| i.user_id)
                }),
            )
            .route_layer(from_fn_with_state(f.auth.clone(), optional_auth));

        let access = f.bearer("u1", Role::Teacher, TokenKind::Access);
        assert_eq!(status(app.clone(), "/whoami", Some(&access)).await, StatusCode::OK);
        assert_eq!(
            status(app.clone(), "/whoami", Some("Bearer garbage")).await,
            StatusCode::OK
        );
        assert_eq!(status(app, "/whoami", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_require_role() {
        let f = fixture();
        let app = Router::new()
            .route("/admin", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(RoleGuard::admin(), require_role))
            .route_layer(from_fn_with_state(f.auth.clone(), require_auth));

        let admin = f.bearer("a1", Role::Admin, TokenKind::Admin);
        let teacher = f.bearer("t1", Role::Teacher, TokenKind::Access);

        assert_eq!(status(app.clone(), "/admin", Some(&admin)).await, StatusCode::OK);
        assert_eq!(
            status(app.clone(), "/admin", Some(&teacher)).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(status(app, "/admin", None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_role_without_auth_layer() {
        let app = Router::new()
            .route("/admin", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(RoleGuard::admin(), require_role));

        assert_eq!(status(app, "/admin", None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_ownership() {
        let f = fixture();
        let app = Router::new()
            .route("/users/{id}", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(OwnershipGuard::new("id"), require_ownership))
            .route_layer(from_fn_with_state(f.auth.clone(), require_auth));

        let owner = f.bearer("u1", Role::Student, TokenKind::Access);
        let admin = f.bearer("a1", Role::Admin, TokenKind::Admin);

        assert_eq!(status(app.clone(), "/users/u1", Some(&owner)).await, StatusCode::OK);
        assert_eq!(
            status(app.clone(), "/users/u2", Some(&owner)).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(status(app, "/users/u2", Some(&admin)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ownership_param_missing() {
        let f = fixture();
        let app = Router::new()
            .route("/users/{user}", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(OwnershipGuard::new("id"), require_ownership))
            .route_layer(from_fn_with_state(f.auth.clone(), require_auth));

        let owner = f.bearer("u1", Role::Student, TokenKind::Access);
        assert_eq!(
            status(app, "/users/u1", Some(&owner)).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_role_guard() {
        let guard = RoleGuard::new([Role::Teacher, Role::Admin]);
        assert!(guard.allows(Role::Teacher));
        assert!(guard.allows(Role::Admin));
        assert!(!guard.allows(Role::Student));
    }
}
