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

//! Configuration management for the security core

use crate::error::ConfigError;
use crate::models::Role;
use chrono::Duration;
use std::env;

const MIN_SECRET_LEN: usize = 32;

/// Configuration for the security core
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret shared by access and refresh tokens
    pub jwt_secret: String,

    /// `iss` claim written into and required from every token
    pub jwt_issuer: String,

    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,

    /// Refresh token lifetime in seconds
    pub refresh_token_ttl_secs: i64,

    /// Lifetime of an emergency grant in seconds
    pub emergency_access_secs: i64,

    /// Minimum justification length (characters) for an emergency request
    pub emergency_min_justification: usize,

    /// Interval between housekeeping sweeps in seconds
    pub sweep_interval_secs: u64,

    /// Lifetime of a pending identity-provider authorization state
    pub auth_state_ttl_secs: i64,

    /// Role given to users provisioned on first identity-provider login
    pub external_default_role: Role,

    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count
    pub argon2_iterations: u32,

    /// Argon2 lanes
    pub argon2_parallelism: u32,

    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: "medguard".to_string(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            emergency_access_secs: 60 * 60,
            emergency_min_justification: 20,
            sweep_interval_secs: 60 * 60,
            auth_state_ttl_secs: 15 * 60,
            external_default_role: Role::Nurse,
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            argon2_parallelism: 1,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            jwt_secret: env::var("MEDGUARD_JWT_SECRET").unwrap_or_default(),

            jwt_issuer: env::var("MEDGUARD_JWT_ISSUER").unwrap_or(defaults.jwt_issuer),

            access_token_ttl_secs: parse_var("MEDGUARD_ACCESS_TOKEN_TTL_SECS", defaults.access_token_ttl_secs),

            refresh_token_ttl_secs: parse_var("MEDGUARD_REFRESH_TOKEN_TTL_SECS", defaults.refresh_token_ttl_secs),

            emergency_access_secs: parse_var("MEDGUARD_EMERGENCY_ACCESS_SECS", defaults.emergency_access_secs),

            emergency_min_justification: parse_var("MEDGUARD_EMERGENCY_MIN_JUSTIFICATION", defaults.emergency_min_justification),

            sweep_interval_secs: parse_var("MEDGUARD_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),

            auth_state_ttl_secs: parse_var("MEDGUARD_AUTH_STATE_TTL_SECS", defaults.auth_state_ttl_secs),

            external_default_role: match env::var("MEDGUARD_EXTERNAL_DEFAULT_ROLE") {
                Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    key: "MEDGUARD_EXTERNAL_DEFAULT_ROLE",
                    reason: format!("unknown role '{}'", value),
                })?,
                Err(_) => defaults.external_default_role,
            },

            argon2_memory_kib: parse_var("MEDGUARD_ARGON2_MEMORY_KIB", defaults.argon2_memory_kib),

            argon2_iterations: parse_var("MEDGUARD_ARGON2_ITERATIONS", defaults.argon2_iterations),

            argon2_parallelism: parse_var("MEDGUARD_ARGON2_PARALLELISM", defaults.argon2_parallelism),

            log_filter: env::var("MEDGUARD_LOG_FILTER").unwrap_or(defaults.log_filter),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the core cannot run safely with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("MEDGUARD_JWT_SECRET"));
        }
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                key: "MEDGUARD_JWT_SECRET",
                reason: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }
        if self.jwt_issuer.trim().is_empty() {
            return Err(invalid("MEDGUARD_JWT_ISSUER", "must not be empty"));
        }
        if self.access_token_ttl_secs <= 0 {
            return Err(invalid("MEDGUARD_ACCESS_TOKEN_TTL_SECS", "must be positive"));
        }
        if self.refresh_token_ttl_secs <= self.access_token_ttl_secs {
            return Err(invalid("MEDGUARD_REFRESH_TOKEN_TTL_SECS", "must exceed the access token lifetime"));
        }
        if self.emergency_access_secs <= 0 {
            return Err(invalid("MEDGUARD_EMERGENCY_ACCESS_SECS", "must be positive"));
        }
        if self.emergency_min_justification == 0 {
            return Err(invalid("MEDGUARD_EMERGENCY_MIN_JUSTIFICATION", "must be positive"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("MEDGUARD_SWEEP_INTERVAL_SECS", "must be positive"));
        }
        if self.auth_state_ttl_secs <= 0 {
            return Err(invalid("MEDGUARD_AUTH_STATE_TTL_SECS", "must be positive"));
        }
        argon2::Params::new(self.argon2_memory_kib, self.argon2_iterations, self.argon2_parallelism, None)
            .map_err(|e| invalid("MEDGUARD_ARGON2_MEMORY_KIB", &e.to_string()))?;

        Ok(())
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl_secs)
    }

    pub fn emergency_access_duration(&self) -> Duration {
        Duration::seconds(self.emergency_access_secs)
    }

    pub fn auth_state_ttl(&self) -> Duration {
        Duration::seconds(self.auth_state_ttl_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.to_string() }
}
