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

//! Password hashing and credential verification

use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{GuardError, GuardResult};
use crate::models::User;
use crate::store::UserStore;

const SPECIAL_CHARACTERS: &str = "!@#$%^&*()-_+=";

/// Argon2id hasher
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    /// Hash verified against for unknown accounts so timing does not reveal them
    decoy_hash: String,
}

impl PasswordHasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> GuardResult<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None).map_err(|e| GuardError::unexpected(format!("Invalid argon2 parameters: {}", e)))?;

        let mut hasher = Self {
            params,
            decoy_hash: String::new(),
        };
        hasher.decoy_hash = hasher.hash("decoy-password-never-matches")?;
        Ok(hasher)
    }

    pub fn from_config(config: &Config) -> GuardResult<Self> {
        Self::new(config.argon2_memory_kib, config.argon2_iterations, config.argon2_parallelism)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string
    pub fn hash(&self, password: &str) -> GuardResult<String> {
        let mut salt_bytes = [0u8; 16];
        SystemRandom::new()
            .fill(&mut salt_bytes)
            .map_err(|_| GuardError::unexpected("Failed to generate password salt"))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| GuardError::unexpected(format!("Failed to encode password salt: {}", e)))?;

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| GuardError::unexpected(format!("Failed to hash password: {}", e)))
    }

    /// Check a password against a stored PHC string. Malformed hashes never match.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self.argon2().verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    fn burn_decoy(&self, password: &str) {
        let _ = self.verify(password, &self.decoy_hash);
    }
}

/// Reject passwords that are short or miss a character class
pub fn validate_password_strength(password: &str) -> GuardResult<()> {
    if password.chars().count() < 8 {
        return Err(GuardError::validation("password must be at least 8 characters long"));
    }

    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| SPECIAL_CHARACTERS.contains(c));

    if !(has_upper && has_lower && has_digit && has_special) {
        return Err(GuardError::validation(
            "password must contain at least one uppercase letter, one lowercase letter, one digit, and one special character",
        ));
    }

    Ok(())
}

/// Looks up accounts and checks their passwords
pub struct CredentialStore {
    users: Arc<dyn UserStore>,
    hasher: PasswordHasher,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserStore>, hasher: PasswordHasher) -> Self {
        Self { users, hasher }
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Verify an email and password pair.
    ///
    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> GuardResult<User> {
        let user = match self.users.user_by_email(email).await? {
            Some(user) => user,
            None => {
                self.hasher.burn_decoy(password);
                debug!(cause = "unknown_email", "Credential check failed");
                return Err(GuardError::InvalidCredentials);
            }
        };

        if user.password_hash.is_empty() {
            self.hasher.burn_decoy(password);
            warn!(user_id = %user.id, cause = "no_local_password", "Credential check failed");
            return Err(GuardError::InvalidCredentials);
        }

        if !self.hasher.verify(password, &user.password_hash) {
            warn!(user_id = %user.id, cause = "wrong_password", "Credential check failed");
            return Err(GuardError::InvalidCredentials);
        }

        if !user.active {
            warn!(user_id = %user.id, cause = "inactive", "Credential check failed");
            return Err(GuardError::AccountInactive);
        }

        Ok(user)
    }

    /// Load a user that must exist and be active
    pub async fn find_active(&self, user_id: Uuid) -> GuardResult<User> {
        let user = self.users.user_by_id(user_id).await?.ok_or_else(|| GuardError::not_found("user not found"))?;
        if !user.active {
            return Err(GuardError::AccountInactive);
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn test_hasher() -> PasswordHasher {
        PasswordHasher::new(1024, 1, 1).unwrap()
    }

    async fn store_with(hasher: &PasswordHasher, active: bool, password: Option<&str>) -> (Arc<MemoryStore>, User) {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "doctor@example.org".to_string(),
            name: "Dr. Grey".to_string(),
            password_hash: password.map(|p| hasher.hash(p).unwrap()).unwrap_or_default(),
            role: Role::Doctor,
            active,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_user(user.clone()).await.unwrap();
        (store, user)
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = test_hasher();
        let hash = hasher.hash("Correct-Horse1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Correct-Horse1", &hash));
        assert!(!hasher.verify("correct-horse1", &hash));
        assert!(!hasher.verify("Correct-Horse1", "not-a-phc-string"));
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Sh0rt!").is_err());
        assert!(validate_password_strength("alllowercase1!").is_err());
        assert!(validate_password_strength("NoDigitsHere!").is_err());
        assert!(validate_password_strength("NoSpecial123").is_err());
        assert!(validate_password_strength("Valid-Pass1").is_ok());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let hasher = test_hasher();
        let (store, user) = store_with(&hasher, true, Some("Valid-Pass1")).await;
        let credentials = CredentialStore::new(store, hasher);

        let found = credentials.authenticate("doctor@example.org", "Valid-Pass1").await.unwrap();
        assert_eq!(found.id, user.id);

        assert_eq!(credentials.authenticate("doctor@example.org", "Wrong-Pass1").await, Err(GuardError::InvalidCredentials));
        assert_eq!(credentials.authenticate("nobody@example.org", "Valid-Pass1").await, Err(GuardError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_inactive_account() {
        let hasher = test_hasher();
        let (store, user) = store_with(&hasher, false, Some("Valid-Pass1")).await;
        let credentials = CredentialStore::new(store, hasher);

        assert_eq!(credentials.authenticate("doctor@example.org", "Valid-Pass1").await, Err(GuardError::AccountInactive));
        assert_eq!(credentials.find_active(user.id).await, Err(GuardError::AccountInactive));
    }

    #[tokio::test]
    async fn test_external_account_has_no_password() {
        let hasher = test_hasher();
        let (store, _) = store_with(&hasher, true, None).await;
        let credentials = CredentialStore::new(store, hasher);

        assert_eq!(credentials.authenticate("doctor@example.org", "").await, Err(GuardError::InvalidCredentials));
    }
}
