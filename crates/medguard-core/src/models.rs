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

//! Data models shared by the core services and store backends

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::context::ClientInfo;

/// The three mutually exclusive roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full-access clinician
    Doctor,
    /// Restricted-access clinician
    Nurse,
    /// Administrator, never sees clinical content
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Nurse => "nurse",
            Role::Admin => "admin",
        }
    }

    pub fn is_clinician(&self) -> bool {
        match self {
            Role::Doctor | Role::Nurse => true,
            Role::Admin => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doctor" => Ok(Role::Doctor),
            "nurse" => Ok(Role::Nurse),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Argon2 PHC string; empty for identity-provider accounts
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for administrator-driven account creation
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
}

/// Partial account update. Self-service callers may only set `name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

/// Identity asserted by an external provider on first login
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalIdentity {
    pub provider: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    /// Sensitive, unique across patients. Cleared for restricted viewers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub government_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Patient {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub government_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
}

/// Patient search criteria
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientQuery {
    /// Case-insensitive match on first or last name
    pub name: Option<String>,
    /// Exact government identifier
    pub government_id: Option<String>,
    #[serde(default)]
    pub page: Page,
}

/// Record severity, ordered low to critical
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// Owning full-access clinician
    pub author_id: Uuid,
    pub diagnosis: String,
    pub treatment: String,
    pub notes: String,
    pub medications: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecord {
    pub patient_id: Uuid,
    pub diagnosis: String,
    pub treatment: String,
    pub notes: String,
    pub medications: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordUpdate {
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub notes: Option<String>,
    pub medications: Option<String>,
    pub severity: Option<Severity>,
}

/// Patient together with the records the caller may see
#[derive(Debug, Clone, Serialize)]
pub struct PatientChart {
    pub patient: Patient,
    pub records: Vec<MedicalRecord>,
    pub emergency_override: bool,
}

/// Audit action kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Login,
    Logout,
    View,
    Create,
    Update,
    Delete,
    EmergencyRequest,
    EmergencyAccess,
    UnauthorizedAccess,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::View => "VIEW",
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::EmergencyRequest => "EMERGENCY_REQUEST",
            AuditAction::EmergencyAccess => "EMERGENCY_ACCESS",
            AuditAction::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, AuditAction::EmergencyRequest | AuditAction::EmergencyAccess)
    }
}

/// Append-only audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: Uuid,
    /// Absent for failed logins against unknown accounts
    pub actor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub record_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource: String,
    pub ip_address: String,
    pub user_agent: String,
    pub emergency_use: bool,
    pub justification: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Create a successful entry. The pipeline stamps `created_at` on write.
    pub fn new(action: AuditAction, resource: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: None,
            patient_id: None,
            record_id: None,
            action,
            resource: resource.into(),
            ip_address: String::new(),
            user_agent: String::new(),
            emergency_use: false,
            justification: None,
            success: true,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_patient(mut self, patient_id: Uuid) -> Self {
        self.patient_id = Some(patient_id);
        self
    }

    pub fn with_record(mut self, record_id: Uuid) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn with_client(mut self, client: &ClientInfo) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    /// Mark as emergency use with the justification that unlocked it
    pub fn with_emergency(mut self, justification: impl Into<String>) -> Self {
        self.emergency_use = true;
        self.justification = Some(justification.into());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }
}

/// Audit entry as returned to a reader, with the subject patient sanitized for them
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogView {
    pub entry: AuditLogEntry,
    pub patient: Option<Patient>,
}

/// Offset pagination. Deserialized pages are clamped like [`Page::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PageParams")]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

#[derive(Deserialize)]
struct PageParams {
    #[serde(default = "default_page_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_page_limit() -> usize {
    Page::default().limit
}

impl From<PageParams> for Page {
    fn from(params: PageParams) -> Self {
        Page::new(params.limit, params.offset)
    }
}

impl Page {
    pub const MAX_LIMIT: usize = 200;

    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

/// Audit search criteria
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub success: Option<bool>,
    pub emergency_only: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: Page,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.actor_id.is_none_or(|id| entry.actor_id == Some(id))
            && self.patient_id.is_none_or(|id| entry.patient_id == Some(id))
            && self.action.is_none_or(|action| entry.action == action)
            && self.success.is_none_or(|success| entry.success == success)
            && (!self.emergency_only || entry.emergency_use)
            && self.start.is_none_or(|start| entry.created_at >= start)
            && self.end.is_none_or(|end| entry.created_at <= end)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AuditStatistics {
    pub total_logs: u64,
    pub failed_actions: u64,
    pub emergency_events: u64,
    pub unique_users: u64,
    pub actions_by_type: BTreeMap<AuditAction, u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    FailedLogin,
    SuspiciousActivity,
    UnauthorizedAccess,
    EmergencyAccess,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Low => "low",
            EventSeverity::Medium => "medium",
            EventSeverity::High => "high",
            EventSeverity::Critical => "critical",
        }
    }
}

/// Alertable event derived from an audit entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub kind: SecurityEventKind,
    pub severity: EventSeverity,
    pub user_id: Option<Uuid>,
    pub ip_address: String,
    pub description: String,
    /// Entry this event was derived from
    pub audit_log_id: Uuid,
    pub resource: String,
    pub resolved: bool,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityEventFilter {
    pub resolved: Option<bool>,
    pub kind: Option<SecurityEventKind>,
    pub min_severity: Option<EventSeverity>,
    #[serde(default)]
    pub page: Page,
}

impl SecurityEventFilter {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        self.resolved.is_none_or(|resolved| event.resolved == resolved)
            && self.kind.is_none_or(|kind| event.kind == kind)
            && self.min_severity.is_none_or(|min| event.severity >= min)
    }
}

/// Emergency grant lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Pending,
    Active,
    Used,
    Expired,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Pending => "pending",
            GrantStatus::Active => "active",
            GrantStatus::Used => "used",
            GrantStatus::Expired => "expired",
            GrantStatus::Revoked => "revoked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GrantStatus::Used | GrantStatus::Expired | GrantStatus::Revoked)
    }
}

/// Break-glass grant for one (requester, patient) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencyGrant {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub patient_id: Uuid,
    pub justification: String,
    /// 64 hex characters, presented in the emergency header
    #[serde(skip_serializing)]
    pub access_token: String,
    pub status: GrantStatus,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl EmergencyGrant {
    /// The only gate for emergency override: active, unexpired and unrevoked
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.expires_at > now && self.revoked_at.is_none()
    }

    /// Pending or active and not yet past expiry
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, GrantStatus::Pending | GrantStatus::Active) && self.expires_at > now
    }

    /// Status with expiry applied at `now`, ahead of the sweep
    pub fn effective_status(&self, now: DateTime<Utc>) -> GrantStatus {
        match self.status {
            GrantStatus::Pending | GrantStatus::Active if self.expires_at <= now => GrantStatus::Expired,
            status => status,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantQuery {
    pub requester_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<GrantStatus>,
}

impl GrantQuery {
    pub fn matches(&self, grant: &EmergencyGrant) -> bool {
        self.requester_id.is_none_or(|id| grant.requester_id == id)
            && self.patient_id.is_none_or(|id| grant.patient_id == id)
            && self.status.is_none_or(|status| grant.status == status)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GrantStatistics {
    pub total_requests: u64,
    pub active_sessions: u64,
    pub requests_by_status: BTreeMap<GrantStatus, u64>,
    pub average_duration_minutes: f64,
}

/// Blacklist row for a revoked bearer token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevokedToken {
    /// SHA-256 hex of the token text
    pub token_hash: String,
    pub user_id: Uuid,
    /// The token's own `exp`
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub session_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Pending identity-provider authorization, keyed by its random state value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthState {
    pub state: String,
    pub provider: String,
    pub redirect_to: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
