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

//! Persistence seams
//!
//! Each entity gets its own trait so a deployment can back them with
//! different systems. Every conditional update is a single atomic
//! operation in the backend; services never read-modify-write across
//! two calls where a race would matter.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{
    AuditFilter, AuditLogEntry, AuthState, EmergencyGrant, GrantQuery, GrantStatus, MedicalRecord, Page, Patient, PatientQuery, RevokedToken, SecurityEvent,
    SecurityEventFilter, Session, User,
};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. `Duplicate` when the email is taken.
    async fn insert_user(&self, user: User) -> StoreResult<()>;

    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Replace a stored user. Returns `false` if it does not exist.
    async fn update_user(&self, user: User) -> StoreResult<bool>;

    async fn list_users(&self, page: Page) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Insert a patient. `Duplicate` when the government id is taken.
    async fn insert_patient(&self, patient: Patient) -> StoreResult<()>;

    async fn patient_by_id(&self, id: Uuid) -> StoreResult<Option<Patient>>;

    /// Replace a stored patient. Returns `false` if it does not exist.
    async fn update_patient(&self, patient: Patient) -> StoreResult<bool>;

    /// Non-deleted patients matching the query, ordered by last name
    async fn search_patients(&self, query: &PatientQuery) -> StoreResult<Vec<Patient>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_record(&self, record: MedicalRecord) -> StoreResult<()>;

    async fn record_by_id(&self, id: Uuid) -> StoreResult<Option<MedicalRecord>>;

    /// Records of one patient, most recent first
    async fn records_for_patient(&self, patient_id: Uuid) -> StoreResult<Vec<MedicalRecord>>;

    async fn update_record(&self, record: MedicalRecord) -> StoreResult<bool>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one entry. Entries are never updated.
    async fn append_audit(&self, entry: AuditLogEntry) -> StoreResult<()>;

    /// Entries matching the filter, most recent first, paged
    async fn query_audit(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditLogEntry>>;

    /// Every entry in `[start, end]`
    async fn audit_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<AuditLogEntry>>;
}

#[async_trait]
pub trait SecurityEventStore: Send + Sync {
    async fn insert_security_event(&self, event: SecurityEvent) -> StoreResult<()>;

    async fn security_event_by_id(&self, id: Uuid) -> StoreResult<Option<SecurityEvent>>;

    /// Mark an unresolved event resolved. `None` if missing or already resolved.
    async fn resolve_security_event(&self, id: Uuid, resolver: Uuid, at: DateTime<Utc>) -> StoreResult<Option<SecurityEvent>>;

    /// Events matching the filter, most recent first, paged
    async fn query_security_events(&self, filter: &SecurityEventFilter) -> StoreResult<Vec<SecurityEvent>>;
}

/// Field changes applied by a grant transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantTransition {
    /// `→ Active`, optionally stamping `used_at`
    Activate { used_at: Option<DateTime<Utc>> },
    /// `→ Used`
    Consume { used_at: DateTime<Utc> },
    /// `→ Revoked`
    Revoke { by: Uuid, at: DateTime<Utc> },
}

impl GrantTransition {
    pub fn target(&self) -> GrantStatus {
        match self {
            GrantTransition::Activate { .. } => GrantStatus::Active,
            GrantTransition::Consume { .. } => GrantStatus::Used,
            GrantTransition::Revoke { .. } => GrantStatus::Revoked,
        }
    }

    pub fn apply(&self, grant: &mut EmergencyGrant) {
        grant.status = self.target();
        match *self {
            GrantTransition::Activate { used_at } => {
                if used_at.is_some() {
                    grant.used_at = used_at;
                }
            }
            GrantTransition::Consume { used_at } => grant.used_at = Some(used_at),
            GrantTransition::Revoke { by, at } => {
                grant.revoked_by = Some(by);
                grant.revoked_at = Some(at);
            }
        }
    }
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert a grant unless the same (requester, patient) pair already has a
    /// live one at `now`. Check and insert are one atomic step.
    async fn insert_grant(&self, grant: EmergencyGrant, now: DateTime<Utc>) -> StoreResult<()>;

    async fn grant_by_id(&self, id: Uuid) -> StoreResult<Option<EmergencyGrant>>;

    async fn grant_by_token(&self, access_token: &str) -> StoreResult<Option<EmergencyGrant>>;

    /// Apply `transition` only if the stored status is one of `expected`.
    /// Returns the updated grant, or `None` when the status did not match.
    async fn transition_grant(&self, id: Uuid, expected: &[GrantStatus], transition: GrantTransition) -> StoreResult<Option<EmergencyGrant>>;

    /// Move every pending or active grant with `expires_at <= now` to `Expired`
    async fn expire_grants(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Grants matching the query, most recent first
    async fn list_grants(&self, query: &GrantQuery) -> StoreResult<Vec<EmergencyGrant>>;
}

#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Insert a blacklist row. Returns `false` if the hash was already present.
    async fn insert_revoked(&self, token: RevokedToken) -> StoreResult<bool>;

    async fn is_revoked(&self, token_hash: &str) -> StoreResult<bool>;

    /// Drop rows whose natural expiry is at or before `now`
    async fn purge_revoked_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> StoreResult<()>;

    /// Bump `last_activity`. Returns `false` for unknown sessions.
    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn sessions_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Session>>;

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> StoreResult<u64>;

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait AuthStateStore: Send + Sync {
    async fn insert_auth_state(&self, state: AuthState) -> StoreResult<()>;

    /// Remove and return the state row in one step
    async fn take_auth_state(&self, state: &str) -> StoreResult<Option<AuthState>>;

    async fn purge_auth_states(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Store handles consumed by the services
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub patients: Arc<dyn PatientStore>,
    pub records: Arc<dyn RecordStore>,
    pub audit: Arc<dyn AuditStore>,
    pub security_events: Arc<dyn SecurityEventStore>,
    pub grants: Arc<dyn GrantStore>,
    pub blacklist: Arc<dyn TokenBlacklist>,
    pub sessions: Arc<dyn SessionStore>,
    pub auth_states: Arc<dyn AuthStateStore>,
}

impl Stores {
    /// Back every store with one shared [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }

    /// Back every store with one backend implementing all traits
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: UserStore + PatientStore + RecordStore + AuditStore + SecurityEventStore + GrantStore + TokenBlacklist + SessionStore + AuthStateStore + 'static,
    {
        Self {
            users: backend.clone(),
            patients: backend.clone(),
            records: backend.clone(),
            audit: backend.clone(),
            security_events: backend.clone(),
            grants: backend.clone(),
            blacklist: backend.clone(),
            sessions: backend.clone(),
            auth_states: backend,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_security_events(mut self, events: Arc<dyn SecurityEventStore>) -> Self {
        self.security_events = events;
        self
    }

    pub fn with_blacklist(mut self, blacklist: Arc<dyn TokenBlacklist>) -> Self {
        self.blacklist = blacklist;
        self
    }
}
