use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetTokenConfig {
    pub secret: String,
    pub ttl_minutes: i64,
}

/// Identity provider credentials. Endpoints come from the discovery document,
/// not from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub discovery_url: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub app_url: String,
    pub image_dir: String,
    pub jwt: JwtConfig,
    pub reset: ResetTokenConfig,
    pub google: Option<GoogleConfig>,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let app_url =
            std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:8080".into());
        let image_dir =
            std::env::var("IMAGE_DIR").unwrap_or_else(|_| "./profile_pics".into());

        let jwt_secret = std::env::var("JWT_SECRET")?;
        let jwt = JwtConfig {
            secret: jwt_secret.clone(),
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "quill".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "quill-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };

        let reset = ResetTokenConfig {
            secret: std::env::var("RESET_TOKEN_SECRET").unwrap_or(jwt_secret),
            ttl_minutes: std::env::var("RESET_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(30),
        };

        let google = match (
            std::env::var("GOOGLE_CLIENT_ID").ok(),
            std::env::var("GOOGLE_CLIENT_SECRET").ok(),
        ) {
            (Some(client_id), Some(client_secret)) => Some(GoogleConfig {
                client_id,
                client_secret,
                discovery_url: std::env::var("GOOGLE_DISCOVERY_URL").unwrap_or_else(|_| {
                    "https://accounts.google.com/.well-known/openid-configuration".into()
                }),
                redirect_uri: std::env::var("GOOGLE_REDIRECT_URI")
                    .unwrap_or_else(|_| format!("{}/api/v1/auth/google/callback", app_url)),
            }),
            _ => None,
        };

        let smtp = match std::env::var("SMTP_HOST").ok() {
            Some(host) => Some(SmtpConfig {
                host,
                port: std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(587),
                username: std::env::var("SMTP_USERNAME")?,
                password: std::env::var("SMTP_PASSWORD")?,
                from: std::env::var("SMTP_FROM")
                    .unwrap_or_else(|_| "noreply@quill.local".into()),
            }),
            None => None,
        };

        Ok(Self {
            database_url,
            app_url,
            image_dir,
            jwt,
            reset,
            google,
            smtp,
        })
    }
}
