//! Token-based identity service
//!
//! Identities live in memory. Access tokens are HS256 JWTs carrying the
//! identity id; passwords are stored as Argon2 PHC strings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tokio::sync::RwLock;

use super::{Claims, IdentityService, User};
use crate::error::IdentityError;
use crate::room::{naming, DEFAULT_MAX_NAME_ATTEMPTS};

/// Default access token lifetime
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct StoredUser {
    user: User,
    password_hash: Option<String>,
}

/// In-memory identity store with JWT access tokens
pub struct TokenIdentityService {
    users: RwLock<HashMap<u64, StoredUser>>,
    next_id: AtomicU64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    max_name_attempts: usize,
}

impl TokenIdentityService {
    pub fn new(secret: &[u8], token_ttl: Duration) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_ttl,
            max_name_attempts: DEFAULT_MAX_NAME_ATTEMPTS,
        }
    }

    /// Set the bound on random name attempts for anonymous identities
    pub fn with_name_attempts(mut self, attempts: usize) -> Self {
        self.max_name_attempts = attempts;
        self
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[async_trait]
impl IdentityService for TokenIdentityService {
    async fn validate_token(&self, token: &str) -> Result<Claims, IdentityError> {
        if token.is_empty() {
            return Err(IdentityError::InvalidToken);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                IdentityError::InvalidToken
            })
    }

    async fn issue_token(&self, user_id: u64) -> Result<String, IdentityError> {
        let claims = Claims {
            user_id,
            exp: Self::now_secs() + self.token_ttl.as_secs(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::Backend(e.to_string()))
    }

    async fn user(&self, user_id: u64) -> Result<User, IdentityError> {
        self.users
            .read()
            .await
            .get(&user_id)
            .map(|stored| stored.user.clone())
            .ok_or(IdentityError::UnknownUser(user_id))
    }

    async fn create_anonymous_identity(&self) -> Result<(User, String), IdentityError> {
        let user = {
            let mut users = self.users.write().await;
            let name = naming::unique_name(self.max_name_attempts, |candidate| {
                users.values().any(|stored| stored.user.name == candidate)
            });

            let user = User::new(self.next_id.fetch_add(1, Ordering::Relaxed), name);
            users.insert(
                user.id,
                StoredUser {
                    user: user.clone(),
                    password_hash: None,
                },
            );
            user
        };

        let token = self.issue_token(user.id).await?;
        tracing::info!(user_id = user.id, name = %user.name, "Anonymous identity created");
        Ok((user, token))
    }

    async fn update_name(&self, user_id: u64, name: &str) -> Result<User, IdentityError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IdentityError::NameUnavailable("name is empty".into()));
        }

        let mut users = self.users.write().await;
        let taken = users
            .values()
            .any(|stored| stored.user.id != user_id && stored.user.name == name);
        if taken {
            return Err(IdentityError::NameUnavailable(name.to_owned()));
        }

        let stored = users
            .get_mut(&user_id)
            .ok_or(IdentityError::UnknownUser(user_id))?;
        stored.user.name = name.to_owned();
        Ok(stored.user.clone())
    }

    async fn update_password(&self, user_id: u64, password: &str) -> Result<User, IdentityError> {
        if !self.users.read().await.contains_key(&user_id) {
            return Err(IdentityError::UnknownUser(user_id));
        }

        let password = password.to_owned();
        let hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
        })
        .await
        .map_err(|e| IdentityError::Backend(e.to_string()))?
        .map_err(|e| IdentityError::Backend(e.to_string()))?;

        let mut users = self.users.write().await;
        let stored = users
            .get_mut(&user_id)
            .ok_or(IdentityError::UnknownUser(user_id))?;
        stored.password_hash = Some(hash);
        stored.user.has_password = true;
        Ok(stored.user.clone())
    }

    async fn validate_name_password(&self, name: &str, password: &str) -> Result<User, IdentityError> {
        let (user, hash) = {
            let users = self.users.read().await;
            let stored = users
                .values()
                .find(|stored| stored.user.name == name)
                .ok_or(IdentityError::InvalidCredentials)?;
            let hash = stored
                .password_hash
                .clone()
                .ok_or(IdentityError::InvalidCredentials)?;
            (stored.user.clone(), hash)
        };

        let password = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&hash)
                .map(|parsed| {
                    Argon2::default()
                        .verify_password(password.as_bytes(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false)
        })
        .await
        .map_err(|e| IdentityError::Backend(e.to_string()))?;

        if verified {
            Ok(user)
        } else {
            Err(IdentityError::InvalidCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    fn service() -> TokenIdentityService {
        TokenIdentityService::new(SECRET, DEFAULT_TOKEN_TTL)
    }

    #[tokio::test]
    async fn test_token_round_trip() {
        let service = service();
        let token = service.issue_token(42).await.unwrap();

        let claims = service.validate_token(&token).await.unwrap();
        assert_eq!(claims.user_id, 42);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let service = service();
        let claims = Claims {
            user_id: 1,
            exp: 1_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(
            service.validate_token(&token).await,
            Err(IdentityError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn test_foreign_and_empty_tokens_rejected() {
        let service = service();
        let foreign = TokenIdentityService::new(b"other-secret", DEFAULT_TOKEN_TTL)
            .issue_token(1)
            .await
            .unwrap();

        assert!(service.validate_token(&foreign).await.is_err());
        assert!(service.validate_token("").await.is_err());
        assert!(service.validate_token("garbage").await.is_err());
    }

    #[tokio::test]
    async fn test_anonymous_identities_have_distinct_names() {
        let service = service();
        let (a, token) = service.create_anonymous_identity().await.unwrap();
        let (b, _) = service.create_anonymous_identity().await.unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.name, b.name);
        assert!(!a.has_password);
        assert_eq!(service.validate_token(&token).await.unwrap().user_id, a.id);
    }

    #[tokio::test]
    async fn test_update_name_rejects_empty_and_taken() {
        let service = service();
        let (a, _) = service.create_anonymous_identity().await.unwrap();
        let (b, _) = service.create_anonymous_identity().await.unwrap();

        assert!(matches!(
            service.update_name(a.id, "  ").await,
            Err(IdentityError::NameUnavailable(_))
        ));
        assert!(matches!(
            service.update_name(a.id, &b.name).await,
            Err(IdentityError::NameUnavailable(_))
        ));
        assert_eq!(service.update_name(a.id, "Ann").await.unwrap().name, "Ann");
    }

    #[tokio::test]
    async fn test_password_login() {
        let service = service();
        let (user, _) = service.create_anonymous_identity().await.unwrap();
        let updated = service.update_password(user.id, "otter#42go").await.unwrap();
        assert!(updated.has_password);

        let found = service
            .validate_name_password(&user.name, "otter#42go")
            .await
            .unwrap();
        assert_eq!(found.id, user.id);

        assert_eq!(
            service.validate_name_password(&user.name, "wrong#42go").await,
            Err(IdentityError::InvalidCredentials)
        );
        assert_eq!(
            service.validate_name_password("Nobody", "otter#42go").await,
            Err(IdentityError::InvalidCredentials)
        );
    }
}
