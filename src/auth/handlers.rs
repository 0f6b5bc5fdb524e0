use axum::{
    extract::{FromRef, Multipart, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            is_valid_email, AccountResponse, AccountUpdateRequest, AuthResponse,
            ForgotPasswordRequest, ImageUploadResponse, LoginQuery, LoginRequest, MeResponse,
            MessageResponse, PublicUser, RefreshRequest, RegisterRequest, ResetPasswordRequest,
        },
        email::{reset_mail_body, RESET_SUBJECT},
        jwt::{AuthUser, JwtKeys},
        oauth,
        password::{hash_password, verify_password},
        repo::{AccountUpdate, ProviderProfile, User},
        reset::ResetTokens,
    },
    config::GoogleConfig,
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/google", get(google_login))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/account", get(get_account).put(update_account))
        .route("/account/image", post(upload_account_image))
}

/// Only same-site destinations are honored; everything else falls back to
/// the landing page.
fn sanitize_next(next: Option<String>) -> String {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") => n,
        _ => "/".to_string(),
    }
}

fn auth_response(
    keys: &JwtKeys,
    user: User,
    remember: bool,
    redirect_to: Option<String>,
) -> Result<AuthResponse, AppError> {
    let (access_token, refresh_token) = keys.issue_pair(user.id, remember)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        redirect_to,
        user: PublicUser {
            id: user.id,
            username: user.username,
            email: user.email,
        },
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.normalize();
    let errors = payload.validate();
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    // Early exit only; the unique constraints decide races.
    if User::find_by_username(&state.db, &payload.username)
        .await?
        .is_some()
    {
        warn!(username = %payload.username, "username already registered");
        return Err(AppError::validation("username", "already taken"));
    }
    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::validation("email", "already taken"));
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create(&state.db, &payload.username, &payload.email, &hash).await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    let keys = JwtKeys::from_ref(&state);
    Ok(Json(auth_response(&keys, user, false, None)?))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.email = payload.email.trim().to_lowercase();

    let user = match User::find_by_email(&state.db, &payload.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %payload.email, "login unknown email");
            return Err(AppError::Unauthorized("invalid credentials"));
        }
    };

    if !verify_password(&payload.password, &user.password_hash) {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized("invalid credentials"));
    }

    info!(user_id = %user.id, remember = payload.remember, "user logged in");
    let keys = JwtKeys::from_ref(&state);
    let redirect_to = Some(sanitize_next(query.next));
    Ok(Json(auth_response(
        &keys,
        user,
        payload.remember,
        redirect_to,
    )?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|_| AppError::Unauthorized("invalid refresh token"))?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or(AppError::Unauthorized("user not found"))?;

    Ok(Json(auth_response(&keys, user, true, None)?))
}

#[instrument]
pub async fn logout(AuthUser(user_id): AuthUser) -> StatusCode {
    // Tokens are stateless; the client discards them on this signal.
    info!(user_id, "user logged out");
    StatusCode::NO_CONTENT
}

fn google_config(state: &AppState) -> Result<&GoogleConfig, AppError> {
    state
        .config
        .google
        .as_ref()
        .ok_or_else(|| AppError::ProviderExchange("identity provider not configured".into()))
}

#[instrument(skip(state))]
pub async fn google_login(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let cfg = google_config(&state)?;
    let meta = oauth::discover(&state.http, &cfg.discovery_url).await?;
    let url = oauth::authorization_url(&meta, cfg)?;
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, serde::Deserialize)]
pub struct CallbackQuery {
    pub code: String,
}

#[instrument(skip(state, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<AuthResponse>, AppError> {
    let cfg = google_config(&state)?;
    let meta = oauth::discover(&state.http, &cfg.discovery_url).await?;
    let access_token = oauth::exchange_code(&meta, cfg, &query.code).await?;
    let identity = oauth::fetch_identity(&state.http, &meta, &access_token).await?;

    if !identity.email_verified {
        warn!(email = %identity.email, "provider email not verified");
        return Err(AppError::validation(
            "email",
            "email not available or not verified by the provider",
        ));
    }

    let user = match User::find_by_email(&state.db, &identity.email).await? {
        Some(existing) => {
            info!(user_id = %existing.id, "provider login for existing user");
            existing
        }
        None => {
            // The local credential is never used for provider-authenticated
            // users, but the column is non-null, so fill it with something
            // unguessable.
            let throwaway = format!(
                "{}{}",
                OffsetDateTime::now_utc().unix_timestamp_nanos(),
                state.config.jwt.secret
            );
            let password_hash = hash_password(&throwaway)?;

            let base = identity
                .name
                .clone()
                .unwrap_or_else(|| identity.email.split('@').next().unwrap_or("user").to_string());
            let username = if User::find_by_username(&state.db, &base).await?.is_some() {
                format!("{}-{}", base, hex::encode(rand::random::<[u8; 2]>()))
            } else {
                base
            };

            let profile = ProviderProfile {
                username,
                email: identity.email.clone(),
                password_hash,
                given_name: identity.given_name.clone(),
                family_name: identity.family_name.clone(),
                profile_pic: identity.picture.clone(),
                locale: identity.locale.clone(),
            };
            let created = User::create_from_provider(&state.db, &profile).await?;
            info!(user_id = %created.id, "user created from provider identity");
            created
        }
    };

    let keys = JwtKeys::from_ref(&state);
    Ok(Json(auth_response(
        &keys,
        user,
        false,
        Some("/".to_string()),
    )?))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = payload.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::validation("email", "invalid email address"));
    }

    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::validation("email", "no account with that email"))?;

    let tokens = ResetTokens::from_config(&state.config.reset);
    let token = tokens.issue(&user);
    let body = reset_mail_body(&state.config.app_url, &token);

    // Delivery failure propagates; the caller must not be told to check
    // their inbox when nothing was sent.
    state.mailer.send(&user.email, RESET_SUBJECT, &body).await?;

    info!(user_id = %user.id, "password reset mail sent");
    Ok(Json(MessageResponse {
        message: "Check your email for the link to reset your password".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let errors = payload.validate();
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let invalid = || AppError::validation("token", "invalid or expired reset token");

    let tokens = ResetTokens::from_config(&state.config.reset);
    let user_id = tokens.user_id(&payload.token).ok_or_else(invalid)?;
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(invalid)?;
    if !tokens.verify_for(&payload.token, &user, OffsetDateTime::now_utc()) {
        warn!(user_id = %user.id, "reset token failed verification");
        return Err(invalid());
    }

    let hash = hash_password(&payload.password)?;
    User::update_password(&state.db, user.id, &hash).await?;

    info!(user_id = %user.id, "password reset completed");
    Ok(Json(MessageResponse {
        message: "Your password has been updated, you can now log in".into(),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, AppError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::Unauthorized("user not found"))?;
    let roles = User::role_names(&state.db, user.id).await?;

    Ok(Json(MeResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        roles,
    }))
}

fn account_response(user: User) -> AccountResponse {
    AccountResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        given_name: user.given_name,
        family_name: user.family_name,
        locale: user.locale,
        image_name: user.image_name,
        profile_pic: user.profile_pic,
    }
}

#[instrument(skip(state))]
pub async fn get_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<AccountResponse>, AppError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::Unauthorized("user not found"))?;
    Ok(Json(account_response(user)))
}

#[instrument(skip(state, payload))]
pub async fn update_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(mut payload): Json<AccountUpdateRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    payload.normalize();
    let errors = payload.validate();
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let current = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::Unauthorized("user not found"))?;

    // Uniqueness checks exclude the caller's own record.
    if payload.username != current.username
        && User::find_by_username(&state.db, &payload.username)
            .await?
            .is_some()
    {
        return Err(AppError::validation("username", "already taken"));
    }
    if payload.email != current.email
        && User::find_by_email(&state.db, &payload.email).await?.is_some()
    {
        return Err(AppError::validation("email", "already taken"));
    }

    let update = AccountUpdate {
        username: payload.username,
        email: payload.email,
        given_name: payload.given_name,
        family_name: payload.family_name,
        locale: payload.locale,
    };
    let updated = User::update_account(&state.db, user_id, &update).await?;

    info!(user_id = %updated.id, "account updated");
    Ok(Json(account_response(updated)))
}

/// Pull the `picture` field out of the upload. A malformed or truncated
/// body is a read error, not a missing field.
async fn picture_field(mut multipart: Multipart) -> Result<Option<(Bytes, String)>, AppError> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("read upload: {e}")))?;
        let Some(field) = field else {
            return Ok(None);
        };
        if field.name() != Some("picture") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("read upload: {e}")))?;
        return Ok(Some((data, content_type)));
    }
}

#[instrument(skip(state, multipart))]
pub async fn upload_account_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<Json<ImageUploadResponse>, AppError> {
    let (data, content_type) = picture_field(multipart)
        .await?
        .ok_or_else(|| AppError::validation("picture", "file is required"))?;

    let image_name = state.images.store(data, &content_type).await?;
    User::update_image(&state.db, user_id, &image_name).await?;

    info!(user_id, image_name = %image_name, "profile image updated");
    Ok(Json(ImageUploadResponse { image_name }))
}
