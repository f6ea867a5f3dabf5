// MedGuard
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Bearer token issuance, validation, rotation and revocation
//!
//! Access and refresh tokens share one HS256 key and one validation path,
//! parameterized by the expected [`TokenKind`]. Expiry is checked against the
//! injected [`Clock`] rather than by `jsonwebtoken`, so that every time-based
//! decision in the core agrees on what "now" is.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use metrics::counter;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::context::ClientInfo;
use crate::error::{GuardError, GuardResult, StoreResult};
use crate::models::{RevokedToken, Role, Session, User};
use crate::store::{SessionStore, TokenBlacklist, UserStore};

/// Header carrying an emergency grant's access token
pub const EMERGENCY_TOKEN_HEADER: &str = "X-Emergency-Access-Token";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    pub email: String,

    pub role: Role,

    /// Per-token random identifier
    pub jti: String,

    /// Token kind
    #[serde(rename = "type")]
    pub kind: TokenKind,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Freshly minted token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Precise reason a token was rejected. Logged, never surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Malformed,
    BadSignature,
    WrongIssuer,
    Expired,
    WrongKind,
    Revoked,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::WrongIssuer => "wrong_issuer",
            TokenRejection::Expired => "expired",
            TokenRejection::WrongKind => "wrong_kind",
            TokenRejection::Revoked => "revoked",
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 hex digest used as the blacklist key
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Hex-encode `len` bytes from the system CSPRNG
pub(crate) fn random_hex(len: usize) -> GuardResult<String> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| GuardError::unexpected("Failed to generate random bytes"))?;
    Ok(hex::encode(bytes))
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(auth_header: &str) -> GuardResult<&str> {
    match auth_header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(GuardError::TokenInvalidOrExpired),
    }
}

/// Token service
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    users: Arc<dyn UserStore>,
    blacklist: Arc<dyn TokenBlacklist>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(config: &Config, users: Arc<dyn UserStore>, blacklist: Arc<dyn TokenBlacklist>, sessions: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.jwt_issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_exp = false;
        validation.validate_nbf = false;

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
            users,
            blacklist,
            sessions,
            clock,
        }
    }

    fn sign(&self, user: &User, kind: TokenKind, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> GuardResult<String> {
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            jti: Uuid::new_v4().to_string(),
            kind,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| GuardError::unexpected(format!("Failed to sign token: {}", e)))
    }

    /// Mint an access and refresh token for a user
    pub fn issue(&self, user: &User) -> GuardResult<IssuedTokens> {
        let now = self.clock.now();
        let access_expires_at = now + self.access_ttl;
        let refresh_expires_at = now + self.refresh_ttl;

        let tokens = IssuedTokens {
            access_token: self.sign(user, TokenKind::Access, now, access_expires_at)?,
            refresh_token: self.sign(user, TokenKind::Refresh, now, refresh_expires_at)?,
            access_expires_at,
            refresh_expires_at,
        };

        debug!(user_id = %user.id, "Issued token pair");
        Ok(tokens)
    }

    /// Verify signature and issuer only
    fn decode_signed(&self, token: &str) -> Result<Claims, TokenRejection> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                ErrorKind::InvalidIssuer => TokenRejection::WrongIssuer,
                _ => TokenRejection::Malformed,
            })
    }

    /// Run every check and report the precise outcome.
    ///
    /// The outer error is a blacklist lookup failure, which callers must
    /// treat as a rejection.
    pub async fn inspect(&self, token: &str, expected: TokenKind) -> GuardResult<Result<Claims, TokenRejection>> {
        let claims = match self.decode_signed(token) {
            Ok(claims) => claims,
            Err(rejection) => return Ok(Err(rejection)),
        };

        if claims.exp <= self.clock.now().timestamp() {
            return Ok(Err(TokenRejection::Expired));
        }

        if claims.kind != expected {
            return Ok(Err(TokenRejection::WrongKind));
        }

        if claims.user_id().is_none() {
            return Ok(Err(TokenRejection::Malformed));
        }

        let revoked = self.blacklist.is_revoked(&token_hash(token)).await.map_err(|e| {
            warn!(error = %e, "Blacklist lookup failed, rejecting token");
            GuardError::unexpected(format!("Blacklist lookup failed: {}", e))
        })?;
        if revoked {
            return Ok(Err(TokenRejection::Revoked));
        }

        Ok(Ok(claims))
    }

    /// Validate a token of the expected kind. Every rejection is
    /// `TokenInvalidOrExpired`; the cause goes to the log.
    pub async fn validate(&self, token: &str, expected: TokenKind) -> GuardResult<Claims> {
        match self.inspect(token, expected).await? {
            Ok(claims) => Ok(claims),
            Err(rejection) => {
                warn!(cause = %rejection, expected = ?expected, "Token rejected");
                Err(GuardError::TokenInvalidOrExpired)
            }
        }
    }

    pub async fn validate_access(&self, token: &str) -> GuardResult<Claims> {
        self.validate(token, TokenKind::Access).await
    }

    /// Rotate a refresh token into a new pair. The presented token is single use.
    pub async fn refresh(&self, refresh_token: &str) -> GuardResult<IssuedTokens> {
        let claims = self.validate(refresh_token, TokenKind::Refresh).await?;
        let user_id = claims.user_id().ok_or(GuardError::TokenInvalidOrExpired)?;

        let user = match self.users.user_by_id(user_id).await? {
            Some(user) => user,
            None => {
                warn!(user_id = %user_id, cause = "unknown_user", "Refresh rejected");
                return Err(GuardError::TokenInvalidOrExpired);
            }
        };
        if !user.active {
            warn!(user_id = %user_id, cause = "inactive", "Refresh rejected");
            return Err(GuardError::AccountInactive);
        }

        match self.blacklist_claims(refresh_token, &claims).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = %user_id, cause = "replayed", "Refresh token already rotated");
                return Err(GuardError::TokenInvalidOrExpired);
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to revoke rotated refresh token"),
        }

        let tokens = self.issue(&user)?;
        info!(user_id = %user_id, "Refresh token rotated");
        Ok(tokens)
    }

    async fn blacklist_claims(&self, token: &str, claims: &Claims) -> StoreResult<bool> {
        let user_id = claims.user_id().unwrap_or(Uuid::nil());
        let inserted = self
            .blacklist
            .insert_revoked(RevokedToken {
                token_hash: token_hash(token),
                user_id,
                expires_at: claims.expires_at(),
                revoked_at: self.clock.now(),
            })
            .await?;

        if inserted {
            let kind = match claims.kind {
                TokenKind::Access => "access",
                TokenKind::Refresh => "refresh",
            };
            counter!("medguard_tokens_revoked_total", 1, "kind" => kind);
        }
        Ok(inserted)
    }

    fn revocable_claims(&self, token: &str) -> GuardResult<Claims> {
        self.decode_signed(token).map_err(|rejection| {
            warn!(cause = %rejection, "Refusing to revoke unverifiable token");
            GuardError::TokenInvalidOrExpired
        })
    }

    /// Blacklist a signed token until its natural expiry. Idempotent.
    pub async fn revoke(&self, token: &str) -> GuardResult<()> {
        let claims = self.revocable_claims(token)?;
        self.revoke_claims(token, &claims).await
    }

    /// Like [`revoke`](Self::revoke), but only for a token whose subject is `owner`
    pub async fn revoke_owned(&self, token: &str, owner: Uuid) -> GuardResult<()> {
        let claims = self.revocable_claims(token)?;
        if claims.user_id() != Some(owner) {
            warn!(owner = %owner, subject = %claims.sub, "Refusing to revoke another user's token");
            return Err(GuardError::TokenInvalidOrExpired);
        }
        self.revoke_claims(token, &claims).await
    }

    async fn revoke_claims(&self, token: &str, claims: &Claims) -> GuardResult<()> {
        if !self.blacklist_claims(token, claims).await? {
            debug!(user = %claims.sub, "Token was already revoked");
        }
        Ok(())
    }

    /// Open an informational session record for a login
    pub async fn create_session(&self, user_id: Uuid, client: &ClientInfo) -> GuardResult<Session> {
        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            session_id: random_hex(32)?,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: now + self.refresh_ttl,
            created_at: now,
            last_activity: now,
        };
        self.sessions.insert_session(session.clone()).await?;
        Ok(session)
    }

    /// Record activity on a session. Returns `false` for unknown sessions.
    pub async fn touch_session(&self, session_id: &str) -> GuardResult<bool> {
        Ok(self.sessions.touch_session(session_id, self.clock.now()).await?)
    }

    /// Unexpired sessions of a user
    pub async fn active_sessions(&self, user_id: Uuid) -> GuardResult<Vec<Session>> {
        let now = self.clock.now();
        let mut sessions: Vec<Session> = self.sessions.sessions_for_user(user_id).await?.into_iter().filter(|s| s.expires_at > now).collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    /// Drop every session of a user, forcing re-authentication
    pub async fn invalidate_all_sessions(&self, user_id: Uuid) -> GuardResult<u64> {
        let removed = self.sessions.delete_sessions_for_user(user_id).await?;
        info!(user_id = %user_id, removed, "Invalidated all sessions");
        Ok(removed)
    }
}
