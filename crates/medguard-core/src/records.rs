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

//! Medical record access

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::AuditPipeline;
use crate::clock::Clock;
use crate::context::RequestContext;
use crate::emergency::EmergencyAccessManager;
use crate::error::{GuardError, GuardResult};
use crate::models::{AuditAction, AuditLogEntry, MedicalRecord, NewRecord, RecordUpdate};
use crate::sanitizer::{can_access, can_author_records, sanitize_record};
use crate::store::{PatientStore, RecordStore};

const RESOURCE: &str = "medical_record";

pub struct RecordService {
    records: Arc<dyn RecordStore>,
    patients: Arc<dyn PatientStore>,
    audit: Arc<AuditPipeline>,
    emergency: Arc<EmergencyAccessManager>,
    clock: Arc<dyn Clock>,
}

impl RecordService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        patients: Arc<dyn PatientStore>,
        audit: Arc<AuditPipeline>,
        emergency: Arc<EmergencyAccessManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            patients,
            audit,
            emergency,
            clock,
        }
    }

    async fn require_patient(&self, patient_id: Uuid) -> GuardResult<()> {
        match self.patients.patient_by_id(patient_id).await? {
            Some(patient) if !patient.is_deleted() => Ok(()),
            _ => Err(GuardError::not_found("patient not found")),
        }
    }

    async fn load(&self, record_id: Uuid) -> GuardResult<MedicalRecord> {
        self.records.record_by_id(record_id).await?.ok_or_else(|| GuardError::not_found("medical record not found"))
    }

    async fn audit_write(&self, ctx: &RequestContext, record: &MedicalRecord, action: AuditAction) {
        if let Err(e) = self.audit.log_record_access(ctx, record.patient_id, record.id, action, None).await {
            error!(record_id = %record.id, action = action.as_str(), error = %e, "Failed to audit record write");
        }
    }

    /// Author a record. Full-access clinicians only; the caller becomes the owning author.
    pub async fn create(&self, input: NewRecord, ctx: &RequestContext) -> GuardResult<MedicalRecord> {
        if !can_author_records(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, Some(input.patient_id), "record_authoring_denied").await);
        }
        if input.diagnosis.trim().is_empty() {
            return Err(GuardError::validation("diagnosis is required"));
        }
        self.require_patient(input.patient_id).await?;

        let now = self.clock.now();
        let record = MedicalRecord {
            id: Uuid::new_v4(),
            patient_id: input.patient_id,
            author_id: ctx.actor_id,
            diagnosis: input.diagnosis,
            treatment: input.treatment,
            notes: input.notes,
            medications: input.medications,
            severity: input.severity,
            created_at: now,
            updated_at: now,
        };

        self.records.insert_record(record.clone()).await?;
        self.audit_write(ctx, &record, AuditAction::Create).await;

        info!(record_id = %record.id, patient_id = %record.patient_id, author = %ctx.actor_id, "Medical record created");
        Ok(record)
    }

    /// Read one record, redacted as the caller's role and emergency override require
    pub async fn get(&self, record_id: Uuid, ctx: &RequestContext) -> GuardResult<MedicalRecord> {
        if !can_access(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "record_access_denied").await);
        }

        let record = self.load(record_id).await?;
        self.require_patient(record.patient_id).await?;
        let grant = self.emergency.active_grant_for(ctx, record.patient_id).await;

        self.audit
            .log_record_access(ctx, record.patient_id, record.id, AuditAction::View, grant.as_ref().map(|g| g.justification.as_str()))
            .await?;

        sanitize_record(&record, ctx.role, grant.is_some()).ok_or_else(|| GuardError::insufficient_role("record_access_denied"))
    }

    /// All records of a patient, most recent first, under one audit entry
    pub async fn list_for_patient(&self, patient_id: Uuid, ctx: &RequestContext) -> GuardResult<Vec<MedicalRecord>> {
        if !can_access(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, Some(patient_id), "record_access_denied").await);
        }
        self.require_patient(patient_id).await?;

        let records = self.records.records_for_patient(patient_id).await?;
        let grant = self.emergency.active_grant_for(ctx, patient_id).await;

        let mut entry = AuditLogEntry::new(AuditAction::View, RESOURCE)
            .with_actor(ctx.actor_id)
            .with_patient(patient_id)
            .with_client(&ctx.client);
        if let Some(grant) = &grant {
            entry = entry.with_emergency(grant.justification.as_str());
        }
        self.audit.record(entry).await?;

        Ok(records.iter().filter_map(|r| sanitize_record(r, ctx.role, grant.is_some())).collect())
    }

    /// Update a record. Only its owning author may.
    pub async fn update(&self, record_id: Uuid, changes: RecordUpdate, ctx: &RequestContext) -> GuardResult<MedicalRecord> {
        if !can_author_records(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "record_authoring_denied").await);
        }

        let mut record = self.load(record_id).await?;
        self.require_patient(record.patient_id).await?;
        if record.author_id != ctx.actor_id {
            return Err(self.audit.reject(ctx, RESOURCE, Some(record.patient_id), "not_owning_author").await);
        }

        if let Some(diagnosis) = changes.diagnosis {
            if diagnosis.trim().is_empty() {
                return Err(GuardError::validation("diagnosis must not be empty"));
            }
            record.diagnosis = diagnosis;
        }
        if let Some(treatment) = changes.treatment {
            record.treatment = treatment;
        }
        if let Some(notes) = changes.notes {
            record.notes = notes;
        }
        if let Some(medications) = changes.medications {
            record.medications = medications;
        }
        if let Some(severity) = changes.severity {
            record.severity = severity;
        }
        record.updated_at = self.clock.now();

        if !self.records.update_record(record.clone()).await? {
            return Err(GuardError::not_found("medical record not found"));
        }
        self.audit_write(ctx, &record, AuditAction::Update).await;

        Ok(record)
    }
}
