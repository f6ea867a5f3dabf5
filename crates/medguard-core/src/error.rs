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

//! Error handling for the security core
//!
//! Authentication and authorization failures carry their precise cause in the
//! `Display` output for logs, but [`GuardError::public_message`] collapses them
//! into a uniform message for callers on the other side of the wire.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors returned by every core operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Token is invalid or expired")]
    TokenInvalidOrExpired,

    #[error("Insufficient role: {message}")]
    InsufficientRole { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Already exists: {message}")]
    AlreadyExists { message: String },

    #[error("State conflict: {message}")]
    StateConflict { message: String },

    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

impl GuardError {
    pub fn insufficient_role(message: impl Into<String>) -> Self {
        GuardError::InsufficientRole { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        GuardError::NotFound { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GuardError::ValidationFailed { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        GuardError::StateConflict { message: message.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        GuardError::Unexpected { message: message.into() }
    }

    /// Message that is safe to hand to an external caller
    pub fn public_message(&self) -> String {
        match self {
            GuardError::InvalidCredentials | GuardError::AccountInactive | GuardError::TokenInvalidOrExpired => "authentication failed".to_string(),
            GuardError::InsufficientRole { .. } => "access denied".to_string(),
            GuardError::NotFound { message }
            | GuardError::ValidationFailed { message }
            | GuardError::AlreadyExists { message }
            | GuardError::StateConflict { message } => message.clone(),
            GuardError::Unexpected { .. } => "internal error".to_string(),
        }
    }

    /// HTTP status the transport layer should use for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::InvalidCredentials | GuardError::AccountInactive | GuardError::TokenInvalidOrExpired => 401,
            GuardError::InsufficientRole { .. } => 403,
            GuardError::NotFound { .. } => 404,
            GuardError::ValidationFailed { .. } => 422,
            GuardError::AlreadyExists { .. } | GuardError::StateConflict { .. } => 409,
            GuardError::Unexpected { .. } => 500,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            GuardError::InvalidCredentials | GuardError::AccountInactive | GuardError::TokenInvalidOrExpired => "unauthorized",
            GuardError::InsufficientRole { .. } => "forbidden",
            GuardError::NotFound { .. } => "not_found",
            GuardError::ValidationFailed { .. } => "validation_failed",
            GuardError::AlreadyExists { .. } => "already_exists",
            GuardError::StateConflict { .. } => "state_conflict",
            GuardError::Unexpected { .. } => "internal_error",
        }
    }
}

/// Errors reported by store backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Duplicate {entity}: {field} already taken")]
    Duplicate { entity: &'static str, field: &'static str },

    #[error("Storage backend error: {message}")]
    Backend { message: String },
}

impl From<StoreError> for GuardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { entity, field } => GuardError::AlreadyExists {
                message: format!("{} with this {} already exists", entity, field),
            },
            StoreError::Backend { message } => GuardError::Unexpected { message },
        }
    }
}

/// Configuration loading failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// RFC 7807 Problem Details body for a [`GuardError`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type
    #[serde(rename = "type")]
    pub problem_type: String,

    /// A short, human-readable summary of the problem type
    pub title: String,

    /// The HTTP status code the transport should use
    pub status: u16,

    /// Uniform, non-revealing explanation
    pub detail: String,

    /// A URI reference that identifies the specific occurrence
    pub instance: String,

    /// Additional extension members
    #[serde(flatten)]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl ProblemDetails {
    pub fn new(error: &GuardError, instance: String) -> Self {
        let status = error.status_code();

        Self {
            problem_type: format!("https://medguard.dev/problems/{}", error.error_type()),
            title: Self::status_to_title(status).to_string(),
            status,
            detail: error.public_message(),
            instance,
            extensions: HashMap::new(),
        }
    }

    pub fn with_extension(mut self, key: String, value: serde_json::Value) -> Self {
        self.extensions.insert(key, value);
        self
    }

    fn status_to_title(status: u16) -> &'static str {
        match status {
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            409 => "Conflict",
            422 => "Unprocessable Entity",
            500 => "Internal Server Error",
            _ => "Unknown Error",
        }
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
pub type StoreResult<T> = Result<T, StoreError>;
