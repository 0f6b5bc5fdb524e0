use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};

use crate::auth::repo::User;
use crate::config::ResetTokenConfig;

type HmacSha256 = Hmac<Sha256>;

/// How many bytes of the current password hash get mixed into the MAC. A
/// password change rotates the hash, so every outstanding token for that
/// user stops verifying: the token is effectively single-use.
const HASH_BINDING_LEN: usize = 16;

/// Issues and checks password-reset tokens.
///
/// Token layout, base64url without padding:
/// `{user_id}.{expires_unix}.{nonce_hex}.{mac_hex}` where the MAC covers the
/// first three parts plus a fragment of the user's current password hash.
#[derive(Clone)]
pub struct ResetTokens {
    secret: String,
    ttl: Duration,
}

#[derive(Debug)]
struct Parsed {
    user_id: i64,
    expires_unix: i64,
    nonce: String,
    mac: String,
}

impl ResetTokens {
    pub fn new(secret: impl Into<String>, ttl_minutes: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub fn from_config(cfg: &ResetTokenConfig) -> Self {
        Self::new(cfg.secret.clone(), cfg.ttl_minutes)
    }

    pub fn issue(&self, user: &User) -> String {
        let expires = OffsetDateTime::now_utc() + self.ttl;
        let nonce = hex::encode(rand::random::<[u8; 16]>());
        let payload = format!("{}.{}.{}", user.id, expires.unix_timestamp(), nonce);
        let mac = self.mac(&payload, &user.password_hash);
        URL_SAFE_NO_PAD.encode(format!("{payload}.{mac}"))
    }

    /// Extract the referenced user id without trusting the token yet; the
    /// caller looks the user up and then calls `verify_for`. Malformed input
    /// yields `None`, never an error.
    pub fn user_id(&self, token: &str) -> Option<i64> {
        parse(token).map(|p| p.user_id)
    }

    /// Full check of a token against the user it claims to reference.
    pub fn verify_for(&self, token: &str, user: &User, now: OffsetDateTime) -> bool {
        let Some(parsed) = parse(token) else {
            return false;
        };
        if parsed.user_id != user.id {
            return false;
        }
        let payload = format!(
            "{}.{}.{}",
            parsed.user_id, parsed.expires_unix, parsed.nonce
        );
        let expected = self.mac(&payload, &user.password_hash);
        if !bool::from(expected.as_bytes().ct_eq(parsed.mac.as_bytes())) {
            return false;
        }
        parsed.expires_unix >= now.unix_timestamp()
    }

    fn mac(&self, payload: &str, password_hash: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac.update(b".");
        let binding = password_hash.as_bytes();
        mac.update(&binding[..binding.len().min(HASH_BINDING_LEN)]);
        hex::encode(mac.finalize().into_bytes())
    }
}

fn parse(token: &str) -> Option<Parsed> {
    let raw = URL_SAFE_NO_PAD.decode(token).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let mut parts = text.split('.');
    let user_id = parts.next()?.parse::<i64>().ok()?;
    let expires_unix = parts.next()?.parse::<i64>().ok()?;
    let nonce = parts.next()?.to_string();
    let mac = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }
    Some(Parsed {
        user_id,
        expires_unix,
        nonce,
        mac,
    })
}
