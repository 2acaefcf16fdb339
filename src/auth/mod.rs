/*!
 * # Authentication
 *
 * Email and password identities for restaurant staff. A successful sign-in
 * issues an HS256 JWT carrying the user's roles and store ids; sign-out
 * revokes the token id until the token would have expired anyway.
 *
 * Kitchen and admin routes are wrapped with [`AuthRouterExt::with_store_auth`],
 * which validates the bearer token, places an [`AuthUser`] in the request
 * extensions and rejects `:store_id` paths the user holds no grant for.
 */

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, FromRef, FromRequestParts, Path, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    entities::{auth_user, profile, user_role, AppRole},
    ApiResponse,
};

/// Claim structure for session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<AppRole>,
    pub store_ids: Vec<Uuid>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated user data extracted from a validated token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<AppRole>,
    pub store_ids: Vec<Uuid>,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthUser {
    pub fn has_role(&self, role: AppRole) -> bool {
        self.roles.contains(&role)
    }

    /// Only stores named by a role grant are reachable.
    pub fn can_access_store(&self, store_id: Uuid) -> bool {
        self.store_ids.contains(&store_id)
    }

    pub fn require_store(&self, store_id: Uuid) -> Result<(), AuthError> {
        if self.can_access_store(store_id) {
            Ok(())
        } else {
            Err(AuthError::StoreForbidden(store_id))
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id,
            email: self.email.clone(),
            full_name: self.name.clone(),
            roles: self.roles.clone(),
            store_ids: self.store_ids.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(AuthError::InvalidToken)?;
        Ok(Self {
            user_id,
            email: claims.email,
            name: claims.name,
            roles: claims.roles,
            store_ids: claims.store_ids,
            token_id: claims.jti,
            expires_at,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub session_ttl: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        session_ttl: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            session_ttl,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            config.auth_audience.clone(),
            config.auth_issuer.clone(),
            Duration::from_secs(config.jwt_expiration_secs),
        )
    }
}

/// What the current session says about its user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionSnapshot {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub roles: Vec<AppRole>,
    pub store_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the token expires
    pub expires_in: i64,
    pub user: SessionSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SignUpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 2, max = 100, message = "Full name must be 2 to 100 characters"))]
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// The user a session is issued for
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub roles: Vec<AppRole>,
    pub store_ids: Vec<Uuid>,
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::InternalError(format!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Issues, validates and revokes session tokens
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
    pub db: Arc<DatabaseConnection>,
    revoked: Arc<DashMap<String, DateTime<Utc>>>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            db,
            revoked: Arc::new(DashMap::new()),
        }
    }

    /// Creates the credential and profile rows, then signs the new user in.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<Session, AuthError> {
        request
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let email = normalize_email(&request.email);
        let full_name = request.full_name.trim().to_string();
        let password_hash = hash_password(&request.password)?;

        let txn = self.db.begin().await?;
        let existing = auth_user::Entity::find()
            .filter(auth_user::Column::Email.eq(email.clone()))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let user = auth_user::ActiveModel {
            id: sea_orm::Set(user_id),
            email: sea_orm::Set(email.clone()),
            password_hash: sea_orm::Set(password_hash),
            created_at: sea_orm::Set(now),
            updated_at: sea_orm::Set(now),
        };
        if let Err(e) = auth_user::Entity::insert(user).exec(&txn).await {
            return Err(match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => AuthError::EmailTaken,
                _ => e.into(),
            });
        }

        let profile = profile::ActiveModel {
            id: sea_orm::Set(user_id),
            email: sea_orm::Set(Some(email.clone())),
            full_name: sea_orm::Set(Some(full_name.clone())),
            avatar_url: sea_orm::Set(None),
            created_at: sea_orm::Set(now),
            updated_at: sea_orm::Set(now),
        };
        profile::Entity::insert(profile).exec(&txn).await?;
        txn.commit().await?;

        info!(user_id = %user_id, "user signed up");
        self.issue(Identity {
            user_id,
            email,
            full_name: Some(full_name),
            roles: Vec::new(),
            store_ids: Vec::new(),
        })
    }

    /// Verifies credentials and issues a session. Unknown email and wrong
    /// password are indistinguishable to the caller.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn sign_in(&self, request: SignInRequest) -> Result<Session, AuthError> {
        request
            .validate()
            .map_err(|_| AuthError::InvalidCredentials)?;

        let email = normalize_email(&request.email);
        let Some(user) = auth_user::Entity::find()
            .filter(auth_user::Column::Email.eq(email))
            .one(&*self.db)
            .await?
        else {
            debug!("sign-in for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(&request.password, &user.password_hash) {
            warn!(user_id = %user.id, "sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let identity = self.load_identity(user).await?;
        info!(user_id = %identity.user_id, "user signed in");
        self.issue(identity)
    }

    /// Revokes the session's token id until its natural expiry.
    pub fn sign_out(&self, user: &AuthUser) {
        self.revoke(&user.token_id, user.expires_at);
        info!(user_id = %user.user_id, "user signed out");
    }

    async fn load_identity(&self, user: auth_user::Model) -> Result<Identity, AuthError> {
        let full_name = profile::Entity::find_by_id(user.id)
            .one(&*self.db)
            .await?
            .and_then(|p| p.full_name);

        let grants = user_role::Entity::find()
            .filter(user_role::Column::UserId.eq(user.id))
            .all(&*self.db)
            .await?;
        let mut roles: Vec<AppRole> = Vec::new();
        for grant in &grants {
            if !roles.contains(&grant.role) {
                roles.push(grant.role);
            }
        }
        debug!(user_id = %user.id, roles = ?roles, "loaded role grants");
        let store_ids: BTreeSet<Uuid> = grants.iter().filter_map(|g| g.store_id).collect();

        Ok(Identity {
            user_id: user.id,
            email: user.email,
            full_name,
            roles,
            store_ids: store_ids.into_iter().collect(),
        })
    }

    /// Signs a token for `identity`
    pub fn issue(&self, identity: Identity) -> Result<Session, AuthError> {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.config.session_ttl)
            .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;
        let expires_at = now + ttl;

        let claims = Claims {
            sub: identity.user_id.to_string(),
            email: identity.email.clone(),
            name: identity.full_name.clone(),
            roles: identity.roles.clone(),
            store_ids: identity.store_ids.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;

        let user = AuthUser::try_from(claims)?.snapshot();
        Ok(Session {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: ttl.num_seconds(),
            user,
        })
    }

    /// Validates signature, expiry, issuer and audience, then the revocation list
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        if self.is_revoked(&claims.jti) {
            return Err(AuthError::RevokedToken);
        }

        Ok(claims)
    }

    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        AuthUser::try_from(self.validate_token(token)?)
    }

    pub fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) {
        self.revoked.insert(jti.to_string(), expires_at);
        self.prune_revoked();
    }

    fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains_key(jti)
    }

    fn prune_revoked(&self) {
        let now = Utc::now();
        self.revoked.retain(|_, expiry| *expiry > now);
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Email is already registered")]
    EmailTaken,

    #[error("No access to store {0}")]
    StoreForbidden(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbErr> for AuthError {
    fn from(err: DbErr) -> Self {
        AuthError::DatabaseError(err.to_string())
    }
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingAuth
            | Self::InvalidCredentials
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::RevokedToken => StatusCode::UNAUTHORIZED,
            Self::StoreForbidden(_) => StatusCode::FORBIDDEN,
            Self::EmailTaken => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::TokenCreation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAuth => "AUTH_MISSING",
            Self::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::RevokedToken => "AUTH_REVOKED_TOKEN",
            Self::TokenCreation(_) => "AUTH_TOKEN_CREATION_FAILED",
            Self::EmailTaken => "AUTH_EMAIL_TAKEN",
            Self::StoreForbidden(_) => "AUTH_STORE_FORBIDDEN",
            Self::Validation(_) => "AUTH_VALIDATION_FAILED",
            Self::DatabaseError(_) => "AUTH_DATABASE_ERROR",
            Self::InternalError(_) => "AUTH_INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::MissingAuth => "Authentication required".to_string(),
            Self::InvalidToken => "Invalid authentication token".to_string(),
            Self::RevokedToken => "Authentication token has been revoked".to_string(),
            Self::TokenCreation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                error!(error = %self, "authentication failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Authentication middleware that validates the bearer token
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication service not available",
            )
                .into_response();
        }
    };

    match extract_auth_from_headers(request.headers(), &auth_service) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Rejects requests whose `:store_id` is outside the session's grants.
/// Must run inside [`auth_middleware`].
pub async fn store_access_middleware(
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<AuthUser>() else {
        return AuthError::MissingAuth.into_response();
    };
    // Unparseable ids fall through to the handler's own path rejection
    if let Some(store_id) = params
        .get("store_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        if let Err(err) = user.require_store(store_id) {
            warn!(user_id = %user.user_id, store_id = %store_id, "store access denied");
            return err.into_response();
        }
    }
    next.run(request).await
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingAuth)?;
    auth_service.authenticate(token)
}

/// Authentication routes, mounted under `/auth`
pub fn auth_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    Arc<AuthService>: FromRef<S>,
{
    let session_routes = Router::new()
        .route("/signout", post(sign_out_handler))
        .route("/session", get(session_handler))
        .with_auth();

    Router::new()
        .route("/signup", post(sign_up_handler))
        .route("/signin", post(sign_in_handler))
        .merge(session_routes)
        .layer(DefaultBodyLimit::max(1024 * 64))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = Session),
        (status = 400, description = "Invalid sign-up data"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn sign_up_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Session>>), AuthError> {
    let session = auth_service.sign_up(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signin",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = Session),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn sign_in_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<ApiResponse<Session>>, AuthError> {
    let session = auth_service.sign_in(request).await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signout",
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Missing or invalid session")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn sign_out_handler(
    State(auth_service): State<Arc<AuthService>>,
    auth_user: AuthUser,
) -> Json<ApiResponse<()>> {
    auth_service.sign_out(&auth_user);
    Json(ApiResponse::success_with_message((), "Signed out"))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/session",
    responses(
        (status = 200, description = "Current session", body = SessionSnapshot),
        (status = 401, description = "Missing or invalid session")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn session_handler(auth_user: AuthUser) -> Json<ApiResponse<SessionSnapshot>> {
    Json(ApiResponse::success(auth_user.snapshot()))
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_store_auth(self) -> Self;
}

impl<S> AuthRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.route_layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_store_auth(self) -> Self {
        // Last layer added runs first: authenticate, then check the store
        self.route_layer(axum::middleware::from_fn(store_access_middleware))
            .with_auth()
    }
}
