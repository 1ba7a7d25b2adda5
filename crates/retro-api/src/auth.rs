use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use tracing::{debug, info};

use retro_db::Database;
use retro_gateway::Authenticator;
use retro_types::api::Claims;

/// How long an issued session token stays valid.
pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Issues and checks session tokens. Every user signs with their own random
/// secret, so rotating one user's secret never affects another.
#[derive(Clone)]
pub struct Identity {
    db: Arc<Database>,
    audience: String,
}

impl Identity {
    pub fn new(db: Arc<Database>, audience: impl Into<String>) -> Self {
        Self {
            db,
            audience: audience.into(),
        }
    }

    /// Make sure `username` exists and return a fresh token for it. An
    /// existing user keeps their secret, so earlier tokens stay valid.
    pub fn add_user(&self, username: &str) -> Result<String, AuthError> {
        self.db.ensure_user(username, &generate_secret())?;
        let token = self.issue_token(username)?;
        info!("Issued session token for {}", username);
        Ok(token)
    }

    pub fn issue_token(&self, username: &str) -> Result<String, AuthError> {
        self.issue_token_with_ttl(username, Duration::hours(TOKEN_TTL_HOURS))
    }

    fn issue_token_with_ttl(&self, username: &str, ttl: Duration) -> Result<String, AuthError> {
        let secret = self.secret_for(username)?;
        let now = Utc::now();
        let claims = Claims {
            sub: username.to_string(),
            aud: self.audience.clone(),
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }

    /// Check that `token` was issued to `username`, carries our audience and
    /// has not expired.
    pub fn verify_token(&self, username: &str, token: &str) -> Result<Claims, AuthError> {
        let secret = self.secret_for(username)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        validation.sub = Some(username.to_string());

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }

    fn secret_for(&self, username: &str) -> Result<String, AuthError> {
        self.db
            .get_user(username)?
            .map(|user| user.secret)
            .ok_or_else(|| AuthError::UnknownUser(username.to_string()))
    }
}

impl Authenticator for Identity {
    fn verify(&self, username: &str, token: &str) -> bool {
        match self.verify_token(username, token) {
            Ok(_) => true,
            Err(e) => {
                debug!("Rejected token for {:?}: {}", username, e);
                false
            }
        }
    }
}

/// 32 random bytes, base64 encoded.
fn generate_secret() -> String {
    STANDARD.encode(rand::random::<[u8; 32]>())
}
