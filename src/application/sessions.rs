//! Account and session management.
//!
//! Sessions are bearer tokens of the form `qs_<prefix>_<secret>`. Only the
//! SHA-256 of the secret is stored; lookup goes through the indexed prefix and
//! the hashes are compared in constant time. Passwords are Argon2id PHC
//! strings.

use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
    password_hash::{PasswordHasher, SaltString},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CreateSessionParams, CreateUserParams, RepoError, SessionsRepo, UsersRepo,
};
use crate::domain::entities::UserRecord;

const TOKEN_TAG: &str = "qs";
const MIN_SECRET_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 150;

#[derive(Debug, Error)]
pub enum SignupError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error("invalid username: {reason}")]
    InvalidUsername { reason: &'static str },
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("failed to hash password")]
    Hashing,
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Error)]
pub enum SessionAuthError {
    #[error("invalid session token")]
    Invalid,
}

/// The user a valid session cookie resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub session_id: Uuid,
}

/// A freshly minted session: the record's id plus the one-time full token.
#[derive(Debug, Clone)]
pub struct SessionIssued {
    pub session_id: Uuid,
    pub token: String,
}

#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn UsersRepo>,
    sessions: Arc<dyn SessionsRepo>,
}

impl SessionService {
    pub fn new(users: Arc<dyn UsersRepo>, sessions: Arc<dyn SessionsRepo>) -> Self {
        Self { users, sessions }
    }

    pub async fn signup(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(UserRecord, SessionIssued), SignupError> {
        let username = validate_username(username)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SignupError::WeakPassword);
        }

        let password_hash = hash_password(password).map_err(|_| SignupError::Hashing)?;
        let user = self
            .users
            .create_user(CreateUserParams {
                username: username.to_string(),
                password_hash,
            })
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { .. } => SignupError::UsernameTaken,
                other => SignupError::Repo(other),
            })?;

        let issued = self.open_session(user.id).await?;
        tracing::info!(user = %user.username, "account created");
        Ok((user, issued))
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(UserRecord, SessionIssued), LoginError> {
        let user = self
            .users
            .find_by_username(username.trim())
            .await?
            .ok_or(LoginError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash) {
            metrics::counter!("quaderno_login_failure_total").increment(1);
            return Err(LoginError::InvalidCredentials);
        }

        let issued = self.open_session(user.id).await?;
        tracing::info!(user = %user.username, "login succeeded");
        Ok((user, issued))
    }

    /// Resolve a session cookie to its user. Any malformed, unknown, or
    /// mismatched token yields the same opaque failure.
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, SessionAuthError> {
        let parsed = parse_token(token).ok_or(SessionAuthError::Invalid)?;
        let record = self
            .sessions
            .find_by_prefix(&parsed.prefix)
            .await
            .map_err(|_| SessionAuthError::Invalid)?
            .ok_or(SessionAuthError::Invalid)?;

        let hashed_input = hash_secret(&parsed.secret);
        if record
            .hashed_secret
            .as_bytes()
            .ct_eq(hashed_input.as_bytes())
            .unwrap_u8()
            == 0
        {
            return Err(SessionAuthError::Invalid);
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await
            .map_err(|_| SessionAuthError::Invalid)?
            .ok_or(SessionAuthError::Invalid)?;

        // best-effort last_seen update; do not block the request
        let sessions = self.sessions.clone();
        let session_id = record.id;
        tokio::spawn(async move {
            let _ = sessions
                .update_last_seen(session_id, OffsetDateTime::now_utc())
                .await;
        });

        Ok(AuthenticatedUser {
            user_id: user.id,
            username: user.username,
            session_id: record.id,
        })
    }

    /// Invalidate the session behind a token. Unknown tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<(), RepoError> {
        let Some(parsed) = parse_token(token) else {
            return Ok(());
        };
        if let Some(record) = self.sessions.find_by_prefix(&parsed.prefix).await? {
            self.sessions.delete_session(record.id).await?;
        }
        Ok(())
    }

    pub async fn open_session(&self, user_id: Uuid) -> Result<SessionIssued, RepoError> {
        let prefix = generate_prefix();
        let secret = generate_secret();
        let token = format!("{TOKEN_TAG}_{prefix}_{secret}");
        let record = self
            .sessions
            .insert_session(CreateSessionParams {
                token_prefix: prefix,
                hashed_secret: hash_secret(&secret),
                user_id,
            })
            .await?;
        metrics::counter!("quaderno_sessions_opened_total").increment(1);
        Ok(SessionIssued {
            session_id: record.id,
            token,
        })
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(rand::thread_rng());
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn validate_username(raw: &str) -> Result<&str, SignupError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(SignupError::InvalidUsername {
            reason: "must not be empty",
        });
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(SignupError::InvalidUsername {
            reason: "too long",
        });
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | '+'))
    {
        return Err(SignupError::InvalidUsername {
            reason: "contains unsupported characters",
        });
    }
    Ok(username)
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_prefix() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn parse_token(token: &str) -> Option<ParsedToken> {
    let mut parts = token.splitn(3, '_');
    let tag = parts.next()?;
    if tag != TOKEN_TAG {
        return None;
    }
    let prefix = parts.next()?;
    let secret = parts.next()?;
    if secret.len() < MIN_SECRET_LEN || prefix.is_empty() {
        return None;
    }
    Some(ParsedToken {
        prefix: prefix.to_string(),
        secret: secret.to_string(),
    })
}

struct ParsedToken {
    prefix: String,
    secret: String,
}
