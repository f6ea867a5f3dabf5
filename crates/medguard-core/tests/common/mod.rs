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

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use medguard_core::store::{AuditStore, SecurityEventStore, TokenBlacklist};
use medguard_core::users::LoginOutcome;
use medguard_core::{
    AuditFilter, AuditLogEntry, ClientInfo, Config, ManualClock, MedicalRecord, MemoryStore, NewPatient, NewRecord, NewUser, Page, RequestContext, RevokedToken,
    Role, SecurityCore, SecurityEvent, SecurityEventFilter, Severity, StoreError, StoreResult, Stores, User,
};
use std::sync::Arc;
use uuid::Uuid;

pub const PASSWORD: &str = "Corr3ct!Horse";
pub const JUSTIFICATION: &str = "unresponsive on arrival, need allergy and medication history";

pub fn test_config() -> Config {
    Config {
        jwt_secret: "integration-secret-with-plenty-of-entropy-0123456789".to_string(),
        argon2_memory_kib: 1024,
        argon2_iterations: 1,
        ..Config::default()
    }
}

pub fn client() -> ClientInfo {
    ClientInfo::new("203.0.113.10", "ward-terminal/2.1")
}

pub fn ctx(role: Role) -> RequestContext {
    RequestContext::new(Uuid::new_v4(), role, client())
}

pub struct Harness {
    pub core: SecurityCore,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(test_config(), |stores| stores)
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, |stores| stores)
    }

    /// Swap individual stores before wiring, e.g. to inject failures
    pub fn build(config: Config, customize: impl FnOnce(Stores) -> Stores) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let stores = customize(Stores::from_backend(store.clone()));
        let core = SecurityCore::new(config, stores, clock.clone()).unwrap();
        Self { core, store, clock }
    }

    pub async fn create_user(&self, email: &str, role: Role) -> User {
        self.core
            .users
            .create_user(
                NewUser {
                    email: email.to_string(),
                    name: format!("{} user", role),
                    password: PASSWORD.to_string(),
                    role,
                },
                &ctx(Role::Admin),
            )
            .await
            .unwrap()
    }

    pub async fn login(&self, email: &str) -> LoginOutcome {
        self.core.users.login(email, PASSWORD, &client()).await.unwrap()
    }

    /// Authenticate the way a transport layer would, from the raw header
    pub async fn context_for(&self, outcome: &LoginOutcome) -> RequestContext {
        let header = format!("Bearer {}", outcome.tokens.access_token);
        self.core.authenticate(&header, None, client()).await.unwrap()
    }

    pub async fn admit_patient(&self, doctor: &RequestContext, government_id: &str) -> Uuid {
        let (id, _) = self
            .core
            .patients
            .create(
                NewPatient {
                    first_name: "Alex".to_string(),
                    last_name: "Rivera".to_string(),
                    date_of_birth: NaiveDate::from_ymd_opt(1984, 3, 14).unwrap(),
                    phone: Some("+1 555 0100".to_string()),
                    address: None,
                    emergency_contact: None,
                    government_id: government_id.to_string(),
                },
                doctor,
            )
            .await
            .unwrap();
        id
    }

    pub async fn add_record(&self, doctor: &RequestContext, patient_id: Uuid, severity: Severity) -> MedicalRecord {
        self.core
            .records
            .create(
                NewRecord {
                    patient_id,
                    diagnosis: "Anaphylaxis".to_string(),
                    treatment: "Epinephrine 0.5mg IM".to_string(),
                    notes: "Responded within minutes".to_string(),
                    medications: "Epinephrine".to_string(),
                    severity,
                },
                doctor,
            )
            .await
            .unwrap()
    }

    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        let filter = AuditFilter {
            page: Page::new(Page::MAX_LIMIT, 0),
            ..AuditFilter::default()
        };
        self.store.query_audit(&filter).await.unwrap()
    }

    pub async fn security_events(&self) -> Vec<SecurityEvent> {
        let filter = SecurityEventFilter {
            page: Page::new(Page::MAX_LIMIT, 0),
            ..SecurityEventFilter::default()
        };
        self.store.query_security_events(&filter).await.unwrap()
    }
}

fn backend_down() -> StoreError {
    StoreError::Backend {
        message: "connection refused".to_string(),
    }
}

/// Audit store that rejects every write
pub struct FailingAudit;

#[async_trait]
impl AuditStore for FailingAudit {
    async fn append_audit(&self, _entry: AuditLogEntry) -> StoreResult<()> {
        Err(backend_down())
    }

    async fn query_audit(&self, _filter: &AuditFilter) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(Vec::new())
    }

    async fn audit_in_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(Vec::new())
    }
}

/// Token blacklist whose backend is unreachable
pub struct FailingBlacklist;

#[async_trait]
impl TokenBlacklist for FailingBlacklist {
    async fn insert_revoked(&self, _token: RevokedToken) -> StoreResult<bool> {
        Err(backend_down())
    }

    async fn is_revoked(&self, _token_hash: &str) -> StoreResult<bool> {
        Err(backend_down())
    }

    async fn purge_revoked_tokens(&self, _now: DateTime<Utc>) -> StoreResult<u64> {
        Err(backend_down())
    }
}

/// Blacklist that answers lookups but cannot record new revocations
#[derive(Default)]
pub struct ReadOnlyBlacklist(MemoryStore);

#[async_trait]
impl TokenBlacklist for ReadOnlyBlacklist {
    async fn insert_revoked(&self, _token: RevokedToken) -> StoreResult<bool> {
        Err(backend_down())
    }

    async fn is_revoked(&self, token_hash: &str) -> StoreResult<bool> {
        self.0.is_revoked(token_hash).await
    }

    async fn purge_revoked_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.0.purge_revoked_tokens(now).await
    }
}
