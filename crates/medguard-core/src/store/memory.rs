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

//! In-memory backend for every store trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AuditStore, AuthStateStore, GrantStore, GrantTransition, PatientStore, RecordStore, SecurityEventStore, SessionStore, TokenBlacklist, UserStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AuditFilter, AuditLogEntry, AuthState, EmergencyGrant, GrantQuery, GrantStatus, MedicalRecord, Page, Patient, PatientQuery, RevokedToken, SecurityEvent,
    SecurityEventFilter, Session, User,
};

/// Process-local store. Single-instance only; horizontally scaled
/// deployments need a shared backend behind the same traits.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    user_emails: DashMap<String, Uuid>,
    patients: DashMap<Uuid, Patient>,
    patient_government_ids: DashMap<String, Uuid>,
    records: DashMap<Uuid, MedicalRecord>,
    audit: RwLock<Vec<AuditLogEntry>>,
    security_events: RwLock<Vec<SecurityEvent>>,
    grants: RwLock<HashMap<Uuid, EmergencyGrant>>,
    revoked_tokens: DashMap<String, RevokedToken>,
    sessions: DashMap<String, Session>,
    auth_states: DashMap<String, AuthState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paged<T>(items: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    items.skip(page.offset).take(page.limit).collect()
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: User) -> StoreResult<()> {
        match self.user_emails.entry(user.email.to_lowercase()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate { entity: "user", field: "email" }),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                self.users.insert(user.id, user);
                Ok(())
            }
        }
    }

    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let id = match self.user_emails.get(&email.to_lowercase()) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn update_user(&self, user: User) -> StoreResult<bool> {
        match self.users.get_mut(&user.id) {
            Some(mut stored) => {
                *stored = user;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_users(&self, page: Page) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(paged(users.into_iter(), page))
    }
}

#[async_trait]
impl PatientStore for MemoryStore {
    async fn insert_patient(&self, patient: Patient) -> StoreResult<()> {
        let government_id = patient.government_id.clone().unwrap_or_default();
        match self.patient_government_ids.entry(government_id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                entity: "patient",
                field: "government id",
            }),
            Entry::Vacant(slot) => {
                slot.insert(patient.id);
                self.patients.insert(patient.id, patient);
                Ok(())
            }
        }
    }

    async fn patient_by_id(&self, id: Uuid) -> StoreResult<Option<Patient>> {
        Ok(self.patients.get(&id).map(|p| p.clone()))
    }

    async fn update_patient(&self, patient: Patient) -> StoreResult<bool> {
        match self.patients.get_mut(&patient.id) {
            Some(mut stored) => {
                *stored = patient;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn search_patients(&self, query: &PatientQuery) -> StoreResult<Vec<Patient>> {
        let needle = query.name.as_ref().map(|n| n.to_lowercase());
        let mut found: Vec<Patient> = self
            .patients
            .iter()
            .filter(|p| !p.is_deleted())
            .filter(|p| match &needle {
                Some(n) => p.first_name.to_lowercase().contains(n) || p.last_name.to_lowercase().contains(n),
                None => true,
            })
            .filter(|p| match &query.government_id {
                Some(id) => p.government_id.as_deref() == Some(id.as_str()),
                None => true,
            })
            .map(|p| p.clone())
            .collect();
        found.sort_by(|a, b| a.last_name.cmp(&b.last_name).then_with(|| a.first_name.cmp(&b.first_name)));
        Ok(paged(found.into_iter(), query.page))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_record(&self, record: MedicalRecord) -> StoreResult<()> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn record_by_id(&self, id: Uuid) -> StoreResult<Option<MedicalRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn records_for_patient(&self, patient_id: Uuid) -> StoreResult<Vec<MedicalRecord>> {
        let mut records: Vec<MedicalRecord> = self.records.iter().filter(|r| r.patient_id == patient_id).map(|r| r.clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update_record(&self, record: MedicalRecord) -> StoreResult<bool> {
        match self.records.get_mut(&record.id) {
            Some(mut stored) => {
                *stored = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: AuditLogEntry) -> StoreResult<()> {
        self.audit.write().push(entry);
        Ok(())
    }

    async fn query_audit(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditLogEntry>> {
        let log = self.audit.read();
        Ok(paged(log.iter().rev().filter(|e| filter.matches(e)).cloned(), filter.page))
    }

    async fn audit_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<AuditLogEntry>> {
        let log = self.audit.read();
        Ok(log.iter().filter(|e| e.created_at >= start && e.created_at <= end).cloned().collect())
    }
}

#[async_trait]
impl SecurityEventStore for MemoryStore {
    async fn insert_security_event(&self, event: SecurityEvent) -> StoreResult<()> {
        self.security_events.write().push(event);
        Ok(())
    }

    async fn security_event_by_id(&self, id: Uuid) -> StoreResult<Option<SecurityEvent>> {
        Ok(self.security_events.read().iter().find(|e| e.id == id).cloned())
    }

    async fn resolve_security_event(&self, id: Uuid, resolver: Uuid, at: DateTime<Utc>) -> StoreResult<Option<SecurityEvent>> {
        let mut events = self.security_events.write();
        match events.iter_mut().find(|e| e.id == id && !e.resolved) {
            Some(event) => {
                event.resolved = true;
                event.resolved_by = Some(resolver);
                event.resolved_at = Some(at);
                Ok(Some(event.clone()))
            }
            None => Ok(None),
        }
    }

    async fn query_security_events(&self, filter: &SecurityEventFilter) -> StoreResult<Vec<SecurityEvent>> {
        let events = self.security_events.read();
        Ok(paged(events.iter().rev().filter(|e| filter.matches(e)).cloned(), filter.page))
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn insert_grant(&self, grant: EmergencyGrant, now: DateTime<Utc>) -> StoreResult<()> {
        let mut grants = self.grants.write();
        let conflict = grants
            .values()
            .any(|g| g.requester_id == grant.requester_id && g.patient_id == grant.patient_id && g.is_live(now));
        if conflict {
            return Err(StoreError::Duplicate {
                entity: "emergency grant",
                field: "requester and patient",
            });
        }
        if grants.values().any(|g| g.access_token == grant.access_token) {
            return Err(StoreError::Duplicate {
                entity: "emergency grant",
                field: "access token",
            });
        }
        grants.insert(grant.id, grant);
        Ok(())
    }

    async fn grant_by_id(&self, id: Uuid) -> StoreResult<Option<EmergencyGrant>> {
        Ok(self.grants.read().get(&id).cloned())
    }

    async fn grant_by_token(&self, access_token: &str) -> StoreResult<Option<EmergencyGrant>> {
        Ok(self.grants.read().values().find(|g| g.access_token == access_token).cloned())
    }

    async fn transition_grant(&self, id: Uuid, expected: &[GrantStatus], transition: GrantTransition) -> StoreResult<Option<EmergencyGrant>> {
        let mut grants = self.grants.write();
        match grants.get_mut(&id) {
            Some(grant) if expected.contains(&grant.status) => {
                transition.apply(grant);
                Ok(Some(grant.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut grants = self.grants.write();
        let mut expired = 0;
        for grant in grants.values_mut() {
            if matches!(grant.status, GrantStatus::Pending | GrantStatus::Active) && grant.expires_at <= now {
                grant.status = GrantStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_grants(&self, query: &GrantQuery) -> StoreResult<Vec<EmergencyGrant>> {
        let mut found: Vec<EmergencyGrant> = self.grants.read().values().filter(|g| query.matches(g)).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[async_trait]
impl TokenBlacklist for MemoryStore {
    async fn insert_revoked(&self, token: RevokedToken) -> StoreResult<bool> {
        match self.revoked_tokens.entry(token.token_hash.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(token);
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, token_hash: &str) -> StoreResult<bool> {
        Ok(self.revoked_tokens.contains_key(token_hash))
    }

    async fn purge_revoked_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let before = self.revoked_tokens.len();
        self.revoked_tokens.retain(|_, t| t.expires_at > now);
        Ok((before - self.revoked_tokens.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        self.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.last_activity = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Session>> {
        Ok(self.sessions.iter().filter(|s| s.user_id == user_id).map(|s| s.clone()).collect())
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - self.sessions.len()) as u64)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        Ok((before - self.sessions.len()) as u64)
    }
}

#[async_trait]
impl AuthStateStore for MemoryStore {
    async fn insert_auth_state(&self, state: AuthState) -> StoreResult<()> {
        self.auth_states.insert(state.state.clone(), state);
        Ok(())
    }

    async fn take_auth_state(&self, state: &str) -> StoreResult<Option<AuthState>> {
        Ok(self.auth_states.remove(state).map(|(_, s)| s))
    }

    async fn purge_auth_states(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let before = self.auth_states.len();
        self.auth_states.retain(|_, s| s.expires_at > now);
        Ok((before - self.auth_states.len()) as u64)
    }
}
