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

//! Identity-provider authorization states, kept in the shared store

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{GuardError, GuardResult};
use crate::models::AuthState;
use crate::store::AuthStateStore;
use crate::tokens::random_hex;

pub struct AuthStateService {
    store: Arc<dyn AuthStateStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl AuthStateService {
    pub fn new(store: Arc<dyn AuthStateStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Start an authorization round trip
    pub async fn issue(&self, provider: &str, redirect_to: &str) -> GuardResult<AuthState> {
        let now = self.clock.now();
        let state = AuthState {
            state: random_hex(32)?,
            provider: provider.to_string(),
            redirect_to: redirect_to.to_string(),
            expires_at: now + self.ttl,
            created_at: now,
        };
        self.store.insert_auth_state(state.clone()).await?;

        debug!(provider, "Issued authorization state");
        Ok(state)
    }

    /// Redeem a state value. Single use.
    pub async fn consume(&self, state: &str) -> GuardResult<AuthState> {
        let stored = self.store.take_auth_state(state).await?.ok_or_else(|| {
            warn!(cause = "unknown", "Authorization state rejected");
            GuardError::validation("invalid or expired authorization state")
        })?;

        if stored.expires_at <= self.clock.now() {
            warn!(cause = "expired", provider = %stored.provider, "Authorization state rejected");
            return Err(GuardError::validation("invalid or expired authorization state"));
        }

        Ok(stored)
    }

    /// Sweep pass
    pub async fn purge_expired(&self) -> GuardResult<u64> {
        Ok(self.store.purge_auth_states(self.clock.now()).await?)
    }
}
