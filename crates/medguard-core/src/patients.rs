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

//! Patient reads and writes behind role checks, sanitization and audit

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::AuditPipeline;
use crate::clock::Clock;
use crate::context::RequestContext;
use crate::emergency::EmergencyAccessManager;
use crate::error::{GuardError, GuardResult};
use crate::models::{AuditAction, AuditLogEntry, NewPatient, Patient, PatientChart, PatientQuery, PatientUpdate};
use crate::sanitizer::{can_access, can_create, can_delete, can_modify, can_search_sensitive, sanitize_patient, sanitize_record};
use crate::store::{PatientStore, RecordStore};

const RESOURCE: &str = "patient";

pub struct PatientService {
    patients: Arc<dyn PatientStore>,
    records: Arc<dyn RecordStore>,
    audit: Arc<AuditPipeline>,
    emergency: Arc<EmergencyAccessManager>,
    clock: Arc<dyn Clock>,
}

impl PatientService {
    pub fn new(
        patients: Arc<dyn PatientStore>,
        records: Arc<dyn RecordStore>,
        audit: Arc<AuditPipeline>,
        emergency: Arc<EmergencyAccessManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            patients,
            records,
            audit,
            emergency,
            clock,
        }
    }

    async fn load(&self, patient_id: Uuid) -> GuardResult<Patient> {
        match self.patients.patient_by_id(patient_id).await? {
            Some(patient) if !patient.is_deleted() => Ok(patient),
            _ => Err(GuardError::not_found("patient not found")),
        }
    }

    /// Audit a completed write. The write already happened, so a lost entry is logged only.
    async fn audit_write(&self, ctx: &RequestContext, patient_id: Uuid, action: AuditAction) {
        if let Err(e) = self.audit.log_patient_access(ctx, patient_id, action, None).await {
            error!(patient_id = %patient_id, action = action.as_str(), error = %e, "Failed to audit patient write");
        }
    }

    /// Register a patient. Returns the new id and the caller's view of it,
    /// which is `None` for administrators.
    pub async fn create(&self, input: NewPatient, ctx: &RequestContext) -> GuardResult<(Uuid, Option<Patient>)> {
        if !can_create(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "patient_creation_denied").await);
        }

        if input.first_name.trim().is_empty() || input.last_name.trim().is_empty() {
            return Err(GuardError::validation("first and last name are required"));
        }
        if input.government_id.trim().is_empty() {
            return Err(GuardError::validation("government id is required"));
        }

        let now = self.clock.now();
        let patient = Patient {
            id: Uuid::new_v4(),
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            date_of_birth: input.date_of_birth,
            phone: input.phone,
            address: input.address,
            emergency_contact: input.emergency_contact,
            government_id: Some(input.government_id.trim().to_string()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let patient_id = patient.id;

        self.patients.insert_patient(patient.clone()).await?;
        self.audit_write(ctx, patient_id, AuditAction::Create).await;

        info!(patient_id = %patient_id, actor = %ctx.actor_id, "Patient created");
        Ok((patient_id, sanitize_patient(&patient, ctx.role)))
    }

    /// Read one patient, sanitized for the caller
    pub async fn get(&self, patient_id: Uuid, ctx: &RequestContext) -> GuardResult<Patient> {
        if !can_access(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, Some(patient_id), "patient_access_denied").await);
        }

        let patient = self.load(patient_id).await?;
        let grant = self.emergency.active_grant_for(ctx, patient_id).await;
        self.audit
            .log_patient_access(ctx, patient_id, AuditAction::View, grant.as_ref().map(|g| g.justification.as_str()))
            .await?;

        sanitize_patient(&patient, ctx.role).ok_or_else(|| GuardError::insufficient_role("patient_access_denied"))
    }

    /// Patient with every record the caller may see, under one audit entry
    pub async fn chart(&self, patient_id: Uuid, ctx: &RequestContext) -> GuardResult<PatientChart> {
        if !can_access(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, Some(patient_id), "patient_access_denied").await);
        }

        let patient = self.load(patient_id).await?;
        let records = self.records.records_for_patient(patient_id).await?;
        let grant = self.emergency.active_grant_for(ctx, patient_id).await;
        let emergency_override = grant.is_some();

        self.audit
            .log_patient_access(ctx, patient_id, AuditAction::View, grant.as_ref().map(|g| g.justification.as_str()))
            .await?;

        let patient = sanitize_patient(&patient, ctx.role).ok_or_else(|| GuardError::insufficient_role("patient_access_denied"))?;
        let records = records.iter().filter_map(|r| sanitize_record(r, ctx.role, emergency_override)).collect();

        Ok(PatientChart {
            patient,
            records,
            emergency_override,
        })
    }

    /// Search by name or, for full-access clinicians, by government id
    pub async fn search(&self, query: PatientQuery, ctx: &RequestContext) -> GuardResult<Vec<Patient>> {
        if !can_access(ctx.role) {
            return Err(self.audit.reject(ctx, "patient_search", None, "patient_access_denied").await);
        }
        if query.government_id.is_some() && !can_search_sensitive(ctx.role) {
            return Err(self.audit.reject(ctx, "patient_search", None, "sensitive_search_denied").await);
        }

        let found = self.patients.search_patients(&query).await?;

        self.audit
            .record(AuditLogEntry::new(AuditAction::View, "patient_search").with_actor(ctx.actor_id).with_client(&ctx.client))
            .await?;

        Ok(found.iter().filter_map(|p| sanitize_patient(p, ctx.role)).collect())
    }

    /// Update demographics
    pub async fn update(&self, patient_id: Uuid, changes: PatientUpdate, ctx: &RequestContext) -> GuardResult<Patient> {
        if !can_modify(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, Some(patient_id), "patient_update_denied").await);
        }

        let mut patient = self.load(patient_id).await?;
        if let Some(first_name) = changes.first_name {
            if first_name.trim().is_empty() {
                return Err(GuardError::validation("first name must not be empty"));
            }
            patient.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = changes.last_name {
            if last_name.trim().is_empty() {
                return Err(GuardError::validation("last name must not be empty"));
            }
            patient.last_name = last_name.trim().to_string();
        }
        if changes.phone.is_some() {
            patient.phone = changes.phone;
        }
        if changes.address.is_some() {
            patient.address = changes.address;
        }
        if changes.emergency_contact.is_some() {
            patient.emergency_contact = changes.emergency_contact;
        }
        patient.updated_at = self.clock.now();

        if !self.patients.update_patient(patient.clone()).await? {
            return Err(GuardError::not_found("patient not found"));
        }
        self.audit_write(ctx, patient_id, AuditAction::Update).await;

        sanitize_patient(&patient, ctx.role).ok_or_else(|| GuardError::insufficient_role("patient_access_denied"))
    }

    /// Administrative soft delete
    pub async fn delete(&self, patient_id: Uuid, ctx: &RequestContext) -> GuardResult<()> {
        if !can_delete(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, Some(patient_id), "patient_delete_denied").await);
        }

        let mut patient = self.load(patient_id).await?;
        let now = self.clock.now();
        patient.deleted_at = Some(now);
        patient.updated_at = now;

        if !self.patients.update_patient(patient).await? {
            return Err(GuardError::not_found("patient not found"));
        }
        self.audit_write(ctx, patient_id, AuditAction::Delete).await;

        info!(patient_id = %patient_id, actor = %ctx.actor_id, "Patient deleted");
        Ok(())
    }
}
