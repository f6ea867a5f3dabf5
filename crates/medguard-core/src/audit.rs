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

//! Audit trail and security event derivation

use chrono::{DateTime, Utc};
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::context::{ClientInfo, RequestContext};
use crate::error::{GuardError, GuardResult};
use crate::models::{
    AuditAction, AuditFilter, AuditLogEntry, AuditLogView, AuditStatistics, EventSeverity, Page, Patient, SecurityEvent, SecurityEventFilter, SecurityEventKind,
};
use crate::sanitizer::{can_administer, can_review_audit, sanitize_patient};
use crate::store::{AuditStore, PatientStore, SecurityEventStore};

/// Build the security event an audit entry triggers, if any
pub fn derive_security_event(entry: &AuditLogEntry) -> Option<SecurityEvent> {
    let (kind, severity, description) = match entry.action {
        AuditAction::UnauthorizedAccess => (
            SecurityEventKind::UnauthorizedAccess,
            EventSeverity::High,
            format!("Unauthorized access attempt on {}", entry.resource),
        ),
        AuditAction::EmergencyRequest | AuditAction::EmergencyAccess => (
            SecurityEventKind::EmergencyAccess,
            EventSeverity::Medium,
            format!("Emergency access {} on {}", if entry.action == AuditAction::EmergencyRequest { "requested" } else { "used" }, entry.resource),
        ),
        AuditAction::Login if !entry.success => (
            SecurityEventKind::FailedLogin,
            EventSeverity::Medium,
            format!("Failed login: {}", entry.error_message.as_deref().unwrap_or("unknown reason")),
        ),
        action if !entry.success => (
            SecurityEventKind::SuspiciousActivity,
            EventSeverity::Medium,
            format!("Failed {} on {}", action.as_str(), entry.resource),
        ),
        _ => return None,
    };

    Some(SecurityEvent {
        id: Uuid::new_v4(),
        kind,
        severity,
        user_id: entry.actor_id,
        ip_address: entry.ip_address.clone(),
        description,
        audit_log_id: entry.id,
        resource: entry.resource.clone(),
        resolved: false,
        resolved_by: None,
        resolved_at: None,
        created_at: entry.created_at,
    })
}

/// Append-only audit writer and its gated read paths
pub struct AuditPipeline {
    audit: Arc<dyn AuditStore>,
    events: Arc<dyn SecurityEventStore>,
    patients: Arc<dyn PatientStore>,
    clock: Arc<dyn Clock>,
}

impl AuditPipeline {
    pub fn new(audit: Arc<dyn AuditStore>, events: Arc<dyn SecurityEventStore>, patients: Arc<dyn PatientStore>, clock: Arc<dyn Clock>) -> Self {
        Self { audit, events, patients, clock }
    }

    /// Append an entry and derive its security event.
    ///
    /// Fails only if the entry itself cannot be stored. A lost derived event
    /// is logged and the entry stands.
    pub async fn record(&self, mut entry: AuditLogEntry) -> GuardResult<AuditLogEntry> {
        entry.created_at = self.clock.now();

        self.audit.append_audit(entry.clone()).await.map_err(|e| {
            error!(
                audit_id = %entry.id,
                action = entry.action.as_str(),
                error = %e,
                "Failed to write audit entry"
            );
            GuardError::unexpected(format!("Audit write failed: {}", e))
        })?;

        if entry.success {
            info!(
                actor = ?entry.actor_id,
                action = entry.action.as_str(),
                resource = %entry.resource,
                patient_id = ?entry.patient_id,
                emergency = entry.emergency_use,
                "Audit"
            );
        } else {
            warn!(
                actor = ?entry.actor_id,
                action = entry.action.as_str(),
                resource = %entry.resource,
                patient_id = ?entry.patient_id,
                client_ip = %entry.ip_address,
                error = ?entry.error_message,
                "Audit failure"
            );
        }

        if let Some(event) = derive_security_event(&entry) {
            let severity = event.severity;
            match self.events.insert_security_event(event).await {
                Ok(()) => {
                    counter!("medguard_security_events_total", 1, "severity" => severity.as_str());
                }
                Err(e) => error!(audit_id = %entry.id, error = %e, "Failed to store derived security event"),
            }
        }

        Ok(entry)
    }

    pub async fn log_user_action(&self, ctx: &RequestContext, action: AuditAction, resource: &str) -> GuardResult<AuditLogEntry> {
        self.record(AuditLogEntry::new(action, resource).with_actor(ctx.actor_id).with_client(&ctx.client)).await
    }

    pub async fn log_login(&self, user_id: Uuid, client: &ClientInfo) -> GuardResult<AuditLogEntry> {
        self.record(AuditLogEntry::new(AuditAction::Login, "auth").with_actor(user_id).with_client(client)).await
    }

    /// Failed login. `user_id` is known only when the email matched an account.
    pub async fn log_failed_login(&self, user_id: Option<Uuid>, client: &ClientInfo, reason: &str) -> GuardResult<AuditLogEntry> {
        let mut entry = AuditLogEntry::new(AuditAction::Login, "auth").with_client(client).failed(reason);
        entry.actor_id = user_id;
        self.record(entry).await
    }

    pub async fn log_patient_access(&self, ctx: &RequestContext, patient_id: Uuid, action: AuditAction, emergency: Option<&str>) -> GuardResult<AuditLogEntry> {
        let mut entry = AuditLogEntry::new(action, "patient").with_actor(ctx.actor_id).with_patient(patient_id).with_client(&ctx.client);
        if let Some(justification) = emergency {
            entry = entry.with_emergency(justification);
        }
        self.record(entry).await
    }

    pub async fn log_record_access(&self, ctx: &RequestContext, patient_id: Uuid, record_id: Uuid, action: AuditAction, emergency: Option<&str>) -> GuardResult<AuditLogEntry> {
        let mut entry = AuditLogEntry::new(action, "medical_record")
            .with_actor(ctx.actor_id)
            .with_patient(patient_id)
            .with_record(record_id)
            .with_client(&ctx.client);
        if let Some(justification) = emergency {
            entry = entry.with_emergency(justification);
        }
        self.record(entry).await
    }

    pub async fn log_emergency(&self, ctx: &RequestContext, patient_id: Uuid, action: AuditAction, justification: &str) -> GuardResult<AuditLogEntry> {
        self.record(
            AuditLogEntry::new(action, "emergency_access")
                .with_actor(ctx.actor_id)
                .with_patient(patient_id)
                .with_client(&ctx.client)
                .with_emergency(justification),
        )
        .await
    }

    pub async fn log_unauthorized(&self, ctx: &RequestContext, resource: &str, patient_id: Option<Uuid>, reason: &str) -> GuardResult<AuditLogEntry> {
        let mut entry = AuditLogEntry::new(AuditAction::UnauthorizedAccess, resource)
            .with_actor(ctx.actor_id)
            .with_client(&ctx.client)
            .failed(reason);
        entry.patient_id = patient_id;
        self.record(entry).await
    }

    /// Audit a permission rejection and return the error to propagate
    pub async fn reject(&self, ctx: &RequestContext, resource: &str, patient_id: Option<Uuid>, reason: &str) -> GuardError {
        if let Err(e) = self.log_unauthorized(ctx, resource, patient_id, reason).await {
            error!(actor = %ctx.actor_id, resource, error = %e, "Failed to audit rejected request");
        }
        warn!(actor = %ctx.actor_id, role = %ctx.role, resource, cause = reason, "Request rejected");
        GuardError::insufficient_role(reason)
    }

    /// Mark a security event resolved. One way; admin only.
    pub async fn resolve(&self, event_id: Uuid, ctx: &RequestContext) -> GuardResult<SecurityEvent> {
        if !can_administer(ctx.role) {
            return Err(self.reject(ctx, "security_event", None, "resolve_requires_admin").await);
        }

        let existing = self
            .events
            .security_event_by_id(event_id)
            .await?
            .ok_or_else(|| GuardError::not_found("security event not found"))?;
        if existing.resolved {
            return Err(GuardError::conflict("security event is already resolved"));
        }

        let resolved = self
            .events
            .resolve_security_event(event_id, ctx.actor_id, self.clock.now())
            .await?
            .ok_or_else(|| GuardError::conflict("security event is already resolved"))?;

        info!(event_id = %event_id, resolver = %ctx.actor_id, "Security event resolved");
        Ok(resolved)
    }

    /// Attach each entry's patient, sanitized for the reader
    async fn views(&self, entries: Vec<AuditLogEntry>, ctx: &RequestContext) -> GuardResult<Vec<AuditLogView>> {
        let mut patients: HashMap<Uuid, Option<Patient>> = HashMap::new();
        let mut views = Vec::with_capacity(entries.len());

        for entry in entries {
            let patient = match entry.patient_id {
                Some(id) => {
                    if !patients.contains_key(&id) {
                        let found = self.patients.patient_by_id(id).await?;
                        patients.insert(id, found.and_then(|p| sanitize_patient(&p, ctx.role)));
                    }
                    patients.get(&id).cloned().flatten()
                }
                None => None,
            };
            views.push(AuditLogView { entry, patient });
        }

        Ok(views)
    }

    /// Audit trail of one user. Self or admin.
    pub async fn logs_for_user(&self, user_id: Uuid, ctx: &RequestContext, page: Page) -> GuardResult<Vec<AuditLogView>> {
        if ctx.actor_id != user_id && !can_administer(ctx.role) {
            return Err(self.reject(ctx, "audit_logs", None, "other_users_audit_trail").await);
        }

        let filter = AuditFilter {
            actor_id: Some(user_id),
            page,
            ..AuditFilter::default()
        };
        let entries = self.audit.query_audit(&filter).await?;
        self.views(entries, ctx).await
    }

    /// Audit trail touching one patient. Clinicians and admins.
    pub async fn logs_for_patient(&self, patient_id: Uuid, ctx: &RequestContext, page: Page) -> GuardResult<Vec<AuditLogView>> {
        if !can_review_audit(ctx.role) {
            return Err(self.reject(ctx, "audit_logs", Some(patient_id), "audit_review_denied").await);
        }

        let filter = AuditFilter {
            patient_id: Some(patient_id),
            page,
            ..AuditFilter::default()
        };
        let entries = self.audit.query_audit(&filter).await?;
        self.views(entries, ctx).await
    }

    /// Filtered search. Non-admins are confined to their own rows.
    pub async fn search(&self, mut filter: AuditFilter, ctx: &RequestContext) -> GuardResult<Vec<AuditLogView>> {
        if !can_review_audit(ctx.role) {
            return Err(self.reject(ctx, "audit_logs", None, "audit_review_denied").await);
        }
        if !can_administer(ctx.role) {
            filter.actor_id = Some(ctx.actor_id);
        }

        let entries = self.audit.query_audit(&filter).await?;
        self.views(entries, ctx).await
    }

    /// Aggregate counts over `[start, end]`. Admin only.
    pub async fn statistics(&self, start: DateTime<Utc>, end: DateTime<Utc>, ctx: &RequestContext) -> GuardResult<AuditStatistics> {
        if !can_administer(ctx.role) {
            return Err(self.reject(ctx, "audit_statistics", None, "statistics_require_admin").await);
        }
        if start > end {
            return Err(GuardError::validation("start must not be after end"));
        }

        let entries = self.audit.audit_in_range(start, end).await?;
        let mut stats = AuditStatistics::default();
        let mut users = HashSet::new();

        for entry in &entries {
            stats.total_logs += 1;
            if !entry.success {
                stats.failed_actions += 1;
            }
            if entry.emergency_use || entry.action.is_emergency() {
                stats.emergency_events += 1;
            }
            if let Some(actor) = entry.actor_id {
                users.insert(actor);
            }
            *stats.actions_by_type.entry(entry.action).or_insert(0) += 1;
        }
        stats.unique_users = users.len() as u64;

        Ok(stats)
    }

    /// Derived security events, most recent first. Admin only.
    pub async fn security_events(&self, filter: SecurityEventFilter, ctx: &RequestContext) -> GuardResult<Vec<SecurityEvent>> {
        if !can_administer(ctx.role) {
            return Err(self.reject(ctx, "security_events", None, "security_events_require_admin").await);
        }
        Ok(self.events.query_security_events(&filter).await?)
    }
}
