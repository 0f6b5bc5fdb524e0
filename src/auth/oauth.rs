//! Delegated-authentication exchange with the identity provider.
//!
//! Endpoints are fetched from the provider's well-known discovery document
//! on every call; callers may cache the metadata but nothing here requires
//! them to. All failures surface as `AppError::ProviderExchange` with the
//! detail kept server-side.

use std::time::Duration;

use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;

use crate::config::GoogleConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

/// What the provider asserts about the logged-in person. `email_verified`
/// defaults to false so an absent claim is treated as unverified.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderIdentity {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

pub async fn discover(
    http: &reqwest::Client,
    discovery_url: &str,
) -> Result<ProviderMetadata, AppError> {
    let response = http
        .get(discovery_url)
        .send()
        .await
        .map_err(|e| AppError::ProviderExchange(format!("discovery request: {e}")))?
        .error_for_status()
        .map_err(|e| AppError::ProviderExchange(format!("discovery status: {e}")))?;
    response
        .json::<ProviderMetadata>()
        .await
        .map_err(|e| AppError::ProviderExchange(format!("discovery body: {e}")))
}

fn client_for(meta: &ProviderMetadata, cfg: &GoogleConfig) -> Result<BasicClient, AppError> {
    let auth_url = AuthUrl::new(meta.authorization_endpoint.clone())
        .map_err(|e| AppError::ProviderExchange(format!("authorization endpoint: {e}")))?;
    let token_url = TokenUrl::new(meta.token_endpoint.clone())
        .map_err(|e| AppError::ProviderExchange(format!("token endpoint: {e}")))?;
    let redirect = RedirectUrl::new(cfg.redirect_uri.clone())
        .map_err(|e| AppError::ProviderExchange(format!("redirect uri: {e}")))?;
    Ok(BasicClient::new(
        ClientId::new(cfg.client_id.clone()),
        Some(ClientSecret::new(cfg.client_secret.clone())),
        auth_url,
        Some(token_url),
    )
    .set_redirect_uri(redirect))
}

/// The URL the end user's browser is sent to, asking for identity, email
/// and profile.
pub fn authorization_url(
    meta: &ProviderMetadata,
    cfg: &GoogleConfig,
) -> Result<String, AppError> {
    let client = client_for(meta, cfg)?;
    let (url, _csrf) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("openid".to_string()))
        .add_scope(Scope::new("email".to_string()))
        .add_scope(Scope::new("profile".to_string()))
        .url();
    Ok(url.to_string())
}

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-to-server exchange of the one-time authorization code for a
/// bearer access token.
pub async fn exchange_code(
    meta: &ProviderMetadata,
    cfg: &GoogleConfig,
    code: &str,
) -> Result<String, AppError> {
    exchange_code_with_timeout(meta, cfg, code, EXCHANGE_TIMEOUT).await
}

// The oauth2 crate drives its own http client for this call, so the
// deadline is enforced from outside; a stalled token endpoint must not
// hang the callback.
async fn exchange_code_with_timeout(
    meta: &ProviderMetadata,
    cfg: &GoogleConfig,
    code: &str,
    deadline: Duration,
) -> Result<String, AppError> {
    let client = client_for(meta, cfg)?;
    let exchange = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .request_async(oauth2::reqwest::async_http_client);
    let token = tokio::time::timeout(deadline, exchange)
        .await
        .map_err(|_| AppError::ProviderExchange("token exchange: timed out".into()))?
        .map_err(|e| AppError::ProviderExchange(format!("token exchange: {e}")))?;
    Ok(token.access_token().secret().clone())
}

pub async fn fetch_identity(
    http: &reqwest::Client,
    meta: &ProviderMetadata,
    access_token: &str,
) -> Result<ProviderIdentity, AppError> {
    let response = http
        .get(&meta.userinfo_endpoint)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| AppError::ProviderExchange(format!("userinfo request: {e}")))?
        .error_for_status()
        .map_err(|e| AppError::ProviderExchange(format!("userinfo status: {e}")))?;
    response
        .json::<ProviderIdentity>()
        .await
        .map_err(|e| AppError::ProviderExchange(format!("userinfo body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn google_cfg(redirect: &str) -> GoogleConfig {
        GoogleConfig {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            discovery_url: "unused-in-these-tests".into(),
            redirect_uri: redirect.into(),
        }
    }

    fn metadata(base: &str) -> ProviderMetadata {
        ProviderMetadata {
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/token"),
            userinfo_endpoint: format!("{base}/userinfo"),
        }
    }

    #[tokio::test]
    async fn discovery_parses_well_known_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://accounts.example.com",
                "authorization_endpoint": "https://accounts.example.com/o/auth",
                "token_endpoint": "https://accounts.example.com/token",
                "userinfo_endpoint": "https://accounts.example.com/userinfo",
                "jwks_uri": "https://accounts.example.com/certs"
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let meta = discover(
            &http,
            &format!("{}/.well-known/openid-configuration", server.uri()),
        )
        .await
        .expect("discovery should parse");
        assert_eq!(meta.token_endpoint, "https://accounts.example.com/token");
    }

    #[tokio::test]
    async fn discovery_failure_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let err = discover(&http, &server.uri()).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderExchange(_)));
    }

    #[test]
    fn authorization_url_carries_redirect_and_scopes() {
        let meta = metadata("https://accounts.example.com");
        let cfg = google_cfg("https://blog.example.com/api/v1/auth/google/callback");
        let url = authorization_url(&meta, &cfg).expect("url");
        assert!(url.starts_with("https://accounts.example.com/authorize"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("redirect_uri="));
        assert!(url.contains("openid"));
        assert!(url.contains("email"));
        assert!(url.contains("profile"));
    }

    #[tokio::test]
    async fn exchange_code_returns_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "provider-access-token",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let meta = metadata(&server.uri());
        let cfg = google_cfg("https://blog.example.com/callback");
        let token = exchange_code(&meta, &cfg, "one-time-code")
            .await
            .expect("exchange should succeed");
        assert_eq!(token, "provider-access-token");
    }

    #[tokio::test]
    async fn stalled_token_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({
                        "access_token": "too-late",
                        "token_type": "bearer"
                    })),
            )
            .mount(&server)
            .await;

        let meta = metadata(&server.uri());
        let cfg = google_cfg("https://blog.example.com/callback");
        let err =
            exchange_code_with_timeout(&meta, &cfg, "one-time-code", Duration::from_millis(200))
                .await
                .unwrap_err();
        assert!(matches!(err, AppError::ProviderExchange(_)));
    }

    #[tokio::test]
    async fn exchange_rejects_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let meta = metadata(&server.uri());
        let cfg = google_cfg("https://blog.example.com/callback");
        let err = exchange_code(&meta, &cfg, "stale-code").await.unwrap_err();
        assert!(matches!(err, AppError::ProviderExchange(_)));
    }

    #[tokio::test]
    async fn fetch_identity_parses_userinfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "carol@example.com",
                "email_verified": true,
                "name": "Carol Jones",
                "given_name": "Carol",
                "family_name": "Jones",
                "picture": "https://img.example.com/carol.jpg",
                "locale": "en"
            })))
            .mount(&server)
            .await;

        let meta = metadata(&server.uri());
        let identity = fetch_identity(&reqwest::Client::new(), &meta, "tok")
            .await
            .expect("identity should parse");
        assert_eq!(identity.email, "carol@example.com");
        assert!(identity.email_verified);
        assert_eq!(identity.given_name.as_deref(), Some("Carol"));
    }

    #[tokio::test]
    async fn missing_email_verified_claim_defaults_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "dave@example.com"
            })))
            .mount(&server)
            .await;

        let meta = metadata(&server.uri());
        let identity = fetch_identity(&reqwest::Client::new(), &meta, "tok")
            .await
            .expect("identity should parse");
        assert!(!identity.email_verified);
    }

    #[tokio::test]
    async fn unparseable_userinfo_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let meta = metadata(&server.uri());
        let err = fetch_identity(&reqwest::Client::new(), &meta, "tok")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProviderExchange(_)));
    }
}
