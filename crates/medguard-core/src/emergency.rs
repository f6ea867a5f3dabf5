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

//! Break-glass access grants
//!
//! ```text
//! Pending ──activate──▶ Active ──consume──▶ Used
//!    │                    │
//!    ├──revoke──▶ Revoked ◀┤
//!    └──sweep───▶ Expired ◀┘
//! ```
//!
//! Requests are activated as soon as they are audited. Every transition is a
//! conditional update on the stored status, and [`EmergencyGrant::is_active`]
//! is the only test that unlocks emergency override.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditPipeline;
use crate::clock::Clock;
use crate::config::Config;
use crate::context::RequestContext;
use crate::error::{GuardError, GuardResult, StoreError};
use crate::models::{AuditAction, AuditLogEntry, EmergencyGrant, GrantQuery, GrantStatistics, GrantStatus};
use crate::sanitizer::can_administer;
use crate::store::{GrantStore, GrantTransition, PatientStore};
use crate::tokens::random_hex;

const RESOURCE: &str = "emergency_access";

pub struct EmergencyAccessManager {
    grants: Arc<dyn GrantStore>,
    patients: Arc<dyn PatientStore>,
    audit: Arc<AuditPipeline>,
    clock: Arc<dyn Clock>,
    duration: Duration,
    min_justification: usize,
}

impl EmergencyAccessManager {
    pub fn new(config: &Config, grants: Arc<dyn GrantStore>, patients: Arc<dyn PatientStore>, audit: Arc<AuditPipeline>, clock: Arc<dyn Clock>) -> Self {
        Self {
            grants,
            patients,
            audit,
            clock,
            duration: config.emergency_access_duration(),
            min_justification: config.emergency_min_justification,
        }
    }

    async fn load(&self, grant_id: Uuid) -> GuardResult<EmergencyGrant> {
        self.grants.grant_by_id(grant_id).await?.ok_or_else(|| GuardError::not_found("emergency grant not found"))
    }

    /// Requester or admin
    async fn authorize_holder(&self, grant: &EmergencyGrant, ctx: &RequestContext, reason: &str) -> GuardResult<()> {
        if grant.requester_id == ctx.actor_id || can_administer(ctx.role) {
            Ok(())
        } else {
            Err(self.audit.reject(ctx, RESOURCE, Some(grant.patient_id), reason).await)
        }
    }

    /// Request break-glass access to a patient.
    ///
    /// The grant is written `Pending`, audited, then activated. If the audit
    /// write fails the grant is revoked before the error is returned.
    pub async fn request(&self, patient_id: Uuid, justification: &str, ctx: &RequestContext) -> GuardResult<EmergencyGrant> {
        if !ctx.role.is_clinician() {
            return Err(self.audit.reject(ctx, RESOURCE, Some(patient_id), "emergency_requires_clinician").await);
        }

        let justification = justification.trim();
        if justification.chars().count() < self.min_justification {
            return Err(GuardError::validation(format!("justification must be at least {} characters", self.min_justification)));
        }

        match self.patients.patient_by_id(patient_id).await? {
            Some(patient) if !patient.is_deleted() => {}
            _ => return Err(GuardError::not_found("patient not found")),
        }

        let now = self.clock.now();
        let grant = EmergencyGrant {
            id: Uuid::new_v4(),
            requester_id: ctx.actor_id,
            patient_id,
            justification: justification.to_string(),
            access_token: random_hex(32)?,
            status: GrantStatus::Pending,
            expires_at: now + self.duration,
            used_at: None,
            revoked_at: None,
            revoked_by: None,
            created_at: now,
        };

        match self.grants.insert_grant(grant.clone(), now).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { field: "requester and patient", .. }) => {
                return Err(GuardError::validation("an active emergency grant already exists for this patient"));
            }
            Err(e) => return Err(e.into()),
        }
        counter!("medguard_emergency_grants_requested_total", 1);

        if let Err(e) = self.audit.log_emergency(ctx, patient_id, AuditAction::EmergencyRequest, justification).await {
            error!(grant_id = %grant.id, error = %e, "Emergency request could not be audited, revoking grant");
            let revoke = GrantTransition::Revoke { by: ctx.actor_id, at: now };
            if let Err(e) = self.grants.transition_grant(grant.id, &[GrantStatus::Pending], revoke).await {
                error!(grant_id = %grant.id, error = %e, "Failed to revoke unaudited emergency grant");
            }
            return Err(GuardError::unexpected("emergency request could not be audited"));
        }

        let activated = self
            .grants
            .transition_grant(grant.id, &[GrantStatus::Pending], GrantTransition::Activate { used_at: None })
            .await?
            .ok_or_else(|| GuardError::conflict("emergency grant changed before activation"))?;

        warn!(
            grant_id = %activated.id,
            requester = %ctx.actor_id,
            patient_id = %patient_id,
            expires_at = %activated.expires_at,
            "Emergency access granted"
        );
        Ok(activated)
    }

    /// Activate a pending grant. Re-activating a live active grant returns it unchanged.
    pub async fn activate(&self, grant_id: Uuid, ctx: &RequestContext) -> GuardResult<EmergencyGrant> {
        let grant = self.load(grant_id).await?;
        self.authorize_holder(&grant, ctx, "not_grant_holder").await?;

        let now = self.clock.now();
        if grant.is_active(now) {
            return Ok(grant);
        }
        if grant.status != GrantStatus::Pending {
            return Err(GuardError::conflict(format!("emergency grant is {}", grant.effective_status(now).as_str())));
        }
        if grant.expires_at <= now {
            return Err(GuardError::conflict("emergency grant has expired"));
        }

        let activated = self
            .grants
            .transition_grant(grant_id, &[GrantStatus::Pending], GrantTransition::Activate { used_at: Some(now) })
            .await?
            .ok_or_else(|| GuardError::conflict("emergency grant is no longer pending"))?;

        if let Err(e) = self.audit.log_emergency(ctx, grant.patient_id, AuditAction::EmergencyAccess, &grant.justification).await {
            error!(grant_id = %grant_id, error = %e, "Emergency activation could not be audited, revoking grant");
            let revoke = GrantTransition::Revoke { by: ctx.actor_id, at: now };
            if let Err(e) = self.grants.transition_grant(grant_id, &[GrantStatus::Active], revoke).await {
                error!(grant_id = %grant_id, error = %e, "Failed to revoke unaudited emergency grant");
            }
            return Err(GuardError::unexpected("emergency activation could not be audited"));
        }

        info!(grant_id = %grant_id, actor = %ctx.actor_id, "Emergency grant activated");
        Ok(activated)
    }

    /// Close an active grant after use
    pub async fn consume(&self, grant_id: Uuid, ctx: &RequestContext) -> GuardResult<EmergencyGrant> {
        let grant = self.load(grant_id).await?;
        self.authorize_holder(&grant, ctx, "not_grant_holder").await?;

        let now = self.clock.now();
        if !grant.is_active(now) {
            return Err(GuardError::conflict(format!("emergency grant is {}", grant.effective_status(now).as_str())));
        }

        let used = self
            .grants
            .transition_grant(grant_id, &[GrantStatus::Active], GrantTransition::Consume { used_at: now })
            .await?
            .ok_or_else(|| GuardError::conflict("emergency grant is no longer active"))?;

        let entry = AuditLogEntry::new(AuditAction::Update, "emergency_access_consumed")
            .with_actor(ctx.actor_id)
            .with_patient(grant.patient_id)
            .with_client(&ctx.client);
        if let Err(e) = self.audit.record(entry).await {
            error!(grant_id = %grant_id, error = %e, "Failed to audit emergency grant consumption");
        }

        info!(grant_id = %grant_id, actor = %ctx.actor_id, "Emergency grant consumed");
        Ok(used)
    }

    /// Revoke a pending or active grant. Irreversible.
    pub async fn revoke(&self, grant_id: Uuid, ctx: &RequestContext) -> GuardResult<EmergencyGrant> {
        let grant = self.load(grant_id).await?;
        self.authorize_holder(&grant, ctx, "not_grant_holder").await?;

        if !matches!(grant.status, GrantStatus::Pending | GrantStatus::Active) {
            return Err(GuardError::conflict(format!("emergency grant is already {}", grant.status.as_str())));
        }

        let now = self.clock.now();
        let revoked = self
            .grants
            .transition_grant(
                grant_id,
                &[GrantStatus::Pending, GrantStatus::Active],
                GrantTransition::Revoke { by: ctx.actor_id, at: now },
            )
            .await?
            .ok_or_else(|| GuardError::conflict("emergency grant is no longer revocable"))?;

        let entry = AuditLogEntry::new(AuditAction::Update, "emergency_access_revoked")
            .with_actor(ctx.actor_id)
            .with_patient(grant.patient_id)
            .with_client(&ctx.client);
        if let Err(e) = self.audit.record(entry).await {
            error!(grant_id = %grant_id, error = %e, "Failed to audit emergency grant revocation");
        }

        info!(grant_id = %grant_id, revoked_by = %ctx.actor_id, "Emergency grant revoked");
        Ok(revoked)
    }

    /// Sweep pass: move lapsed pending and active grants to `Expired`
    pub async fn expire_stale(&self) -> GuardResult<u64> {
        Ok(self.grants.expire_grants(self.clock.now()).await?)
    }

    /// The grant behind the caller's emergency header, if it is active for this patient
    pub async fn active_grant_for(&self, ctx: &RequestContext, patient_id: Uuid) -> Option<EmergencyGrant> {
        let token = ctx.emergency_token.as_deref()?;

        match self.grants.grant_by_token(token).await {
            Ok(Some(grant)) if grant.requester_id == ctx.actor_id && grant.patient_id == patient_id && grant.is_active(self.clock.now()) => Some(grant),
            Ok(_) => {
                warn!(actor = %ctx.actor_id, patient_id = %patient_id, "Emergency token not valid for this request");
                None
            }
            Err(e) => {
                warn!(actor = %ctx.actor_id, error = %e, "Emergency token lookup failed");
                None
            }
        }
    }

    /// Whether the caller holds an active override for this patient
    pub async fn resolve_override(&self, ctx: &RequestContext, patient_id: Uuid) -> bool {
        self.active_grant_for(ctx, patient_id).await.is_some()
    }

    async fn list(&self, query: GrantQuery) -> GuardResult<Vec<EmergencyGrant>> {
        let now = self.clock.now();
        let mut grants = self.grants.list_grants(&query).await?;
        for grant in &mut grants {
            grant.status = grant.effective_status(now);
        }
        Ok(grants)
    }

    /// Grants requested by a user. Self or admin.
    pub async fn grants_for_user(&self, user_id: Uuid, ctx: &RequestContext) -> GuardResult<Vec<EmergencyGrant>> {
        if user_id != ctx.actor_id && !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "other_users_grants").await);
        }
        self.list(GrantQuery {
            requester_id: Some(user_id),
            ..GrantQuery::default()
        })
        .await
    }

    /// Grants on a patient. Admin only.
    pub async fn grants_for_patient(&self, patient_id: Uuid, ctx: &RequestContext) -> GuardResult<Vec<EmergencyGrant>> {
        if !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, Some(patient_id), "grant_listing_requires_admin").await);
        }
        self.list(GrantQuery {
            patient_id: Some(patient_id),
            ..GrantQuery::default()
        })
        .await
    }

    /// Currently usable grants. Admin only.
    pub async fn active_grants(&self, ctx: &RequestContext) -> GuardResult<Vec<EmergencyGrant>> {
        if !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "grant_listing_requires_admin").await);
        }
        let now = self.clock.now();
        let grants = self
            .grants
            .list_grants(&GrantQuery {
                status: Some(GrantStatus::Active),
                ..GrantQuery::default()
            })
            .await?;
        Ok(grants.into_iter().filter(|g| g.is_active(now)).collect())
    }

    /// Usage statistics for grants created in `[start, end]`. Admin only.
    pub async fn statistics(&self, start: DateTime<Utc>, end: DateTime<Utc>, ctx: &RequestContext) -> GuardResult<GrantStatistics> {
        if !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "statistics_require_admin").await);
        }

        let now = self.clock.now();
        let all = self.grants.list_grants(&GrantQuery::default()).await?;
        let mut stats = GrantStatistics {
            active_sessions: all.iter().filter(|g| g.is_active(now)).count() as u64,
            ..GrantStatistics::default()
        };

        let mut closed_minutes = Vec::new();
        for grant in all.iter().filter(|g| g.created_at >= start && g.created_at <= end) {
            stats.total_requests += 1;
            let status = grant.effective_status(now);
            *stats.requests_by_status.entry(status).or_insert(0) += 1;

            if status.is_terminal() {
                let ended = grant.revoked_at.unwrap_or(grant.expires_at);
                closed_minutes.push((ended - grant.created_at).num_minutes() as f64);
            }
        }
        if !closed_minutes.is_empty() {
            stats.average_duration_minutes = closed_minutes.iter().sum::<f64>() / closed_minutes.len() as f64;
        }

        Ok(stats)
    }
}
