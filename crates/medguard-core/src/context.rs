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

//! Per-request caller identity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::models::Role;
use crate::tokens::Claims;

/// Network origin of a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Authenticated caller, required by every audited operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub actor_id: Uuid,
    pub role: Role,
    pub client: ClientInfo,
    /// Value of the emergency access header, if presented
    pub emergency_token: Option<String>,
}

impl RequestContext {
    pub fn new(actor_id: Uuid, role: Role, client: ClientInfo) -> Self {
        Self {
            actor_id,
            role,
            client,
            emergency_token: None,
        }
    }

    /// Build from validated access-token claims
    pub fn from_claims(claims: &Claims, client: ClientInfo) -> GuardResult<Self> {
        let actor_id = claims.user_id().ok_or(GuardError::TokenInvalidOrExpired)?;
        Ok(Self::new(actor_id, claims.role, client))
    }

    pub fn with_emergency_token(mut self, token: impl Into<String>) -> Self {
        self.emergency_token = Some(token.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
