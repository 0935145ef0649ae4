//! Internal service credential minting.
//!
//! Each dispatch carries a short-lived HMAC-SHA256 signed credential to the
//! backend: compact three-segment form with `sub`, `tenant_id`, and
//! `internal=true` claims, valid for at most five minutes. The signing
//! secret never appears in logs or debug output.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::error::EngineError;

type HmacSha256 = Hmac<Sha256>;

/// Hard ceiling on internal credential lifetime, seconds.
const MAX_TTL_SECS: i64 = 300;

/// Opaque signing secret that never appears in logs.
///
/// Debug output always shows `__REDACTED__` so the secret cannot leak
/// through error messages or debug formatting.
#[derive(Clone)]
pub struct SigningSecret(String);

impl SigningSecret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// Mints internal service credentials for outbound backend calls.
pub struct CredentialSigner {
    secret: SigningSecret,
}

impl CredentialSigner {
    /// Build a signer over the shared backend secret.
    pub fn new(secret: SigningSecret) -> Self {
        Self { secret }
    }

    /// Mint a credential carrying `sub`, `tenant_id`, and `internal=true`.
    ///
    /// `ttl_secs` is clamped to five minutes.
    pub fn mint(
        &self,
        user_id: Option<&str>,
        tenant_id: uuid::Uuid,
        ttl_secs: u64,
    ) -> Result<String, EngineError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl_secs).unwrap_or(MAX_TTL_SECS).min(MAX_TTL_SECS);
        let header = json!({ "alg": "HS256", "typ": "JWT" });
        let claims = json!({
            "sub": user_id,
            "tenant_id": tenant_id,
            "internal": true,
            "iat": now,
            "exp": now.saturating_add(ttl),
        });

        let head = URL_SAFE_NO_PAD.encode(header.to_string());
        let body = URL_SAFE_NO_PAD.encode(claims.to_string());
        let signing_input = format!("{head}.{body}");

        let mut mac = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
            .map_err(|e| EngineError::Execution {
                message: format!("credential signing failed: {e}"),
                operation: None,
            })?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify a credential's signature and expiry. Used by tests and by
    /// hosts that loop a credential back through the engine.
    pub fn verify(&self, token: &str) -> bool {
        let mut segments = token.split('.');
        let (Some(head), Some(body), Some(sig), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return false;
        };

        let signing_input = format!("{head}.{body}");
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.expose().as_bytes()) else {
            return false;
        };
        mac.update(signing_input.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        if expected != sig {
            return false;
        }

        let Ok(decoded) = URL_SAFE_NO_PAD.decode(body) else {
            return false;
        };
        let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&decoded) else {
            return false;
        };
        claims
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .is_some_and(|exp| exp > Utc::now().timestamp())
    }
}
