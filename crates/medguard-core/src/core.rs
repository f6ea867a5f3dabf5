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

//! Service wiring

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::audit::AuditPipeline;
use crate::auth_state::AuthStateService;
use crate::clock::Clock;
use crate::config::Config;
use crate::context::{ClientInfo, RequestContext};
use crate::credentials::{CredentialStore, PasswordHasher};
use crate::emergency::EmergencyAccessManager;
use crate::error::{GuardError, GuardResult};
use crate::patients::PatientService;
use crate::records::RecordService;
use crate::store::Stores;
use crate::sweep::Sweeper;
use crate::tokens::{TokenService, extract_bearer_token};
use crate::users::UserService;

/// Every service, built over one set of stores and one clock
pub struct SecurityCore {
    pub config: Config,
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<CredentialStore>,
    pub audit: Arc<AuditPipeline>,
    pub emergency: Arc<EmergencyAccessManager>,
    pub patients: Arc<PatientService>,
    pub records: Arc<RecordService>,
    pub users: Arc<UserService>,
    pub auth_states: Arc<AuthStateService>,
    pub sweeper: Arc<Sweeper>,
}

impl SecurityCore {
    pub fn new(config: Config, stores: Stores, clock: Arc<dyn Clock>) -> GuardResult<Self> {
        config.validate().map_err(|e| GuardError::validation(e.to_string()))?;

        let hasher = PasswordHasher::from_config(&config)?;
        let credentials = Arc::new(CredentialStore::new(stores.users.clone(), hasher));
        let tokens = Arc::new(TokenService::new(
            &config,
            stores.users.clone(),
            stores.blacklist.clone(),
            stores.sessions.clone(),
            clock.clone(),
        ));
        let audit = Arc::new(AuditPipeline::new(stores.audit.clone(), stores.security_events.clone(), stores.patients.clone(), clock.clone()));
        let emergency = Arc::new(EmergencyAccessManager::new(&config, stores.grants.clone(), stores.patients.clone(), audit.clone(), clock.clone()));
        let patients = Arc::new(PatientService::new(
            stores.patients.clone(),
            stores.records.clone(),
            audit.clone(),
            emergency.clone(),
            clock.clone(),
        ));
        let records = Arc::new(RecordService::new(
            stores.records.clone(),
            stores.patients.clone(),
            audit.clone(),
            emergency.clone(),
            clock.clone(),
        ));
        let users = Arc::new(UserService::new(
            stores.users.clone(),
            credentials.clone(),
            tokens.clone(),
            audit.clone(),
            clock.clone(),
            config.external_default_role,
        ));
        let auth_states = Arc::new(AuthStateService::new(stores.auth_states.clone(), clock.clone(), config.auth_state_ttl()));
        let sweeper = Arc::new(Sweeper::new(stores.blacklist, stores.sessions, emergency.clone(), auth_states.clone(), clock));

        info!(issuer = %config.jwt_issuer, "Security core initialized");

        Ok(Self {
            config,
            tokens,
            credentials,
            audit,
            emergency,
            patients,
            records,
            users,
            auth_states,
            sweeper,
        })
    }

    /// Turn request headers into a caller context.
    ///
    /// `authorization` is the raw `Authorization` header; `emergency_token`
    /// is the value of the emergency access header, if any.
    pub async fn authenticate(&self, authorization: &str, emergency_token: Option<&str>, client: ClientInfo) -> GuardResult<RequestContext> {
        let token = extract_bearer_token(authorization)?;
        let claims = self.tokens.validate_access(token).await?;
        let ctx = RequestContext::from_claims(&claims, client)?;

        Ok(match emergency_token {
            Some(value) if !value.trim().is_empty() => ctx.with_emergency_token(value.trim()),
            _ => ctx,
        })
    }

    /// Start the periodic sweep at the configured interval
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.sweeper.clone().spawn(self.config.sweep_interval())
    }
}
