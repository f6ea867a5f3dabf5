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

mod common;

use common::{FailingAudit, Harness, JUSTIFICATION, ctx, test_config};
use medguard_core::sanitizer::REDACTION_MARKER;
use medguard_core::store::RecordStore;
use medguard_core::{
    AuditAction, AuditFilter, Clock, EventSeverity, GuardError, PatientQuery, PatientUpdate, RecordUpdate, RequestContext, Role, SecurityEventKind, Severity,
};
use std::sync::Arc;

#[tokio::test]
async fn test_nurse_sees_critical_record_only_under_emergency_grant() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "123-45-6789").await;
    h.add_record(&doctor, patient_id, Severity::Critical).await;
    h.add_record(&doctor, patient_id, Severity::Low).await;

    let chart = h.core.patients.chart(patient_id, &nurse).await.unwrap();
    assert!(!chart.emergency_override);
    let critical = chart.records.iter().find(|r| r.severity == Severity::Critical).unwrap();
    assert_eq!(critical.diagnosis, REDACTION_MARKER);
    assert_eq!(critical.treatment, REDACTION_MARKER);
    assert_eq!(critical.medications, REDACTION_MARKER);
    assert_eq!(critical.notes, "Responded within minutes");
    let routine = chart.records.iter().find(|r| r.severity == Severity::Low).unwrap();
    assert_eq!(routine.diagnosis, "Anaphylaxis");

    let grant = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();
    let nurse_with_grant = nurse.clone().with_emergency_token(grant.access_token.clone());

    let chart = h.core.patients.chart(patient_id, &nurse_with_grant).await.unwrap();
    assert!(chart.emergency_override);
    assert!(chart.records.iter().all(|r| r.diagnosis == "Anaphylaxis"));
    assert_eq!(chart.patient.government_id, None);

    let entries = h.audit_entries().await;
    let latest = &entries[0];
    assert!(latest.emergency_use);
    assert_eq!(latest.justification.as_deref(), Some(JUSTIFICATION));

    // The token is bound to its requester
    let other_nurse = ctx(Role::Nurse).with_emergency_token(grant.access_token.clone());
    let records = h.core.records.list_for_patient(patient_id, &other_nurse).await.unwrap();
    assert!(records.iter().any(|r| r.diagnosis == REDACTION_MARKER));

    // Expiry is checked live, before any sweep runs
    h.clock.advance(test_config().emergency_access_duration() + chrono::Duration::seconds(1));
    let records = h.core.records.list_for_patient(patient_id, &nurse_with_grant).await.unwrap();
    assert!(records.iter().any(|r| r.diagnosis == REDACTION_MARKER));
}

#[tokio::test]
async fn test_nurse_never_receives_government_id() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "987-65-4321").await;

    assert_eq!(h.core.patients.get(patient_id, &doctor).await.unwrap().government_id.as_deref(), Some("987-65-4321"));
    assert_eq!(h.core.patients.get(patient_id, &nurse).await.unwrap().government_id, None);

    let grant = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();
    let nurse_with_grant = nurse.with_emergency_token(grant.access_token);
    assert_eq!(h.core.patients.get(patient_id, &nurse_with_grant).await.unwrap().government_id, None);

    let found = h
        .core
        .patients
        .search(
            PatientQuery {
                name: Some("rivera".to_string()),
                ..PatientQuery::default()
            },
            &nurse_with_grant,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].government_id, None);

    let updated = h
        .core
        .patients
        .update(
            patient_id,
            PatientUpdate {
                phone: Some("+1 555 0199".to_string()),
                ..PatientUpdate::default()
            },
            &nurse_with_grant,
        )
        .await
        .unwrap();
    assert_eq!(updated.government_id, None);
}

#[tokio::test]
async fn test_admin_is_refused_clinical_data() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let admin = ctx(Role::Admin);
    let patient_id = h.admit_patient(&doctor, "111-22-3333").await;
    let record = h.add_record(&doctor, patient_id, Severity::Medium).await;

    let (created_id, view) = h
        .core
        .patients
        .create(
            medguard_core::NewPatient {
                first_name: "Jo".to_string(),
                last_name: "Park".to_string(),
                date_of_birth: chrono::NaiveDate::from_ymd_opt(1990, 7, 2).unwrap(),
                phone: None,
                address: None,
                emergency_contact: None,
                government_id: "444-55-6666".to_string(),
            },
            &admin,
        )
        .await
        .unwrap();
    assert!(view.is_none());
    assert!(h.core.patients.get(created_id, &doctor).await.is_ok());

    assert!(matches!(h.core.patients.get(patient_id, &admin).await, Err(GuardError::InsufficientRole { .. })));
    assert!(matches!(h.core.patients.chart(patient_id, &admin).await, Err(GuardError::InsufficientRole { .. })));
    assert!(matches!(h.core.records.get(record.id, &admin).await, Err(GuardError::InsufficientRole { .. })));
    assert!(matches!(
        h.core.emergency.request(patient_id, JUSTIFICATION, &admin).await,
        Err(GuardError::InsufficientRole { .. })
    ));
}

#[tokio::test]
async fn test_each_successful_read_writes_one_audit_entry() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "222-33-4444").await;
    let record = h.add_record(&doctor, patient_id, Severity::High).await;
    h.add_record(&doctor, patient_id, Severity::Low).await;

    let mut seen = h.audit_entries().await.len();

    h.core.patients.get(patient_id, &nurse).await.unwrap();
    seen = expect_one_view(&h, seen, &nurse).await;

    h.core.patients.chart(patient_id, &nurse).await.unwrap();
    seen = expect_one_view(&h, seen, &nurse).await;

    h.core.records.get(record.id, &nurse).await.unwrap();
    seen = expect_one_view(&h, seen, &nurse).await;

    h.core.records.list_for_patient(patient_id, &nurse).await.unwrap();
    expect_one_view(&h, seen, &nurse).await;
}

async fn expect_one_view(h: &Harness, seen: usize, reader: &RequestContext) -> usize {
    let entries = h.audit_entries().await;
    assert_eq!(entries.len(), seen + 1);
    assert!(entries[0].success);
    assert_eq!(entries[0].action, AuditAction::View);
    assert_eq!(entries[0].actor_id, Some(reader.actor_id));
    entries.len()
}

#[tokio::test]
async fn test_rejection_writes_failed_entry_and_high_severity_event() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "333-44-5555").await;

    let entries_before = h.audit_entries().await.len();
    let events_before = h.security_events().await.len();

    let denied = h
        .core
        .records
        .create(
            medguard_core::NewRecord {
                patient_id,
                diagnosis: "Sprain".to_string(),
                treatment: String::new(),
                notes: String::new(),
                medications: String::new(),
                severity: Severity::Low,
            },
            &nurse,
        )
        .await;
    assert!(matches!(denied, Err(GuardError::InsufficientRole { .. })));

    let entries = h.audit_entries().await;
    assert_eq!(entries.len(), entries_before + 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].action, AuditAction::UnauthorizedAccess);
    assert_eq!(entries[0].patient_id, Some(patient_id));

    let events = h.security_events().await;
    assert_eq!(events.len(), events_before + 1);
    assert_eq!(events[0].kind, SecurityEventKind::UnauthorizedAccess);
    assert_eq!(events[0].severity, EventSeverity::High);
    assert_eq!(events[0].audit_log_id, entries[0].id);
    assert_eq!(events[0].user_id, Some(nurse.actor_id));
}

#[tokio::test]
async fn test_government_id_search_requires_full_access() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    h.admit_patient(&doctor, "555-66-7777").await;
    let query = PatientQuery {
        government_id: Some("555-66-7777".to_string()),
        ..PatientQuery::default()
    };

    assert!(matches!(
        h.core.patients.search(query.clone(), &nurse).await,
        Err(GuardError::InsufficientRole { .. })
    ));

    let found = h.core.patients.search(query, &doctor).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].government_id.as_deref(), Some("555-66-7777"));
}

#[tokio::test]
async fn test_duplicate_government_id_is_refused() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    h.admit_patient(&doctor, "666-77-8888").await;

    let again = h
        .core
        .patients
        .create(
            medguard_core::NewPatient {
                first_name: "Other".to_string(),
                last_name: "Person".to_string(),
                date_of_birth: chrono::NaiveDate::from_ymd_opt(2001, 1, 1).unwrap(),
                phone: None,
                address: None,
                emergency_contact: None,
                government_id: "666-77-8888".to_string(),
            },
            &doctor,
        )
        .await;
    assert!(matches!(again, Err(GuardError::AlreadyExists { .. })));
}

#[tokio::test]
async fn test_only_owning_author_updates_record() {
    let h = Harness::new();
    let author = ctx(Role::Doctor);
    let colleague = ctx(Role::Doctor);
    let patient_id = h.admit_patient(&author, "777-88-9999").await;
    let record = h.add_record(&author, patient_id, Severity::Medium).await;
    assert_eq!(record.author_id, author.actor_id);

    let change = RecordUpdate {
        treatment: Some("Antihistamines, observation for 4h".to_string()),
        ..RecordUpdate::default()
    };

    let denied = h.core.records.update(record.id, change.clone(), &colleague).await;
    assert!(matches!(denied, Err(GuardError::InsufficientRole { ref message }) if message == "not_owning_author"));

    let updated = h.core.records.update(record.id, change, &author).await.unwrap();
    assert_eq!(updated.treatment, "Antihistamines, observation for 4h");
    assert_eq!(updated.diagnosis, record.diagnosis);
}

#[tokio::test]
async fn test_soft_deleted_patient_disappears() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let admin = ctx(Role::Admin);
    let patient_id = h.admit_patient(&doctor, "888-99-0000").await;
    let record = h.add_record(&doctor, patient_id, Severity::Critical).await;

    assert!(matches!(h.core.patients.delete(patient_id, &doctor).await, Err(GuardError::InsufficientRole { .. })));
    h.core.patients.delete(patient_id, &admin).await.unwrap();

    assert!(matches!(h.core.patients.get(patient_id, &doctor).await, Err(GuardError::NotFound { .. })));
    assert!(matches!(h.core.records.get(record.id, &doctor).await, Err(GuardError::NotFound { .. })));
    assert!(matches!(
        h.core.records.list_for_patient(patient_id, &doctor).await,
        Err(GuardError::NotFound { .. })
    ));
    let changes = RecordUpdate {
        notes: Some("amended after discharge".to_string()),
        ..RecordUpdate::default()
    };
    assert!(matches!(h.core.records.update(record.id, changes, &doctor).await, Err(GuardError::NotFound { .. })));
    assert_eq!(h.store.record_by_id(record.id).await.unwrap().unwrap().notes, record.notes);
    let found = h
        .core
        .patients
        .search(
            PatientQuery {
                name: Some("Rivera".to_string()),
                ..PatientQuery::default()
            },
            &doctor,
        )
        .await
        .unwrap();
    assert!(found.is_empty());
    assert!(matches!(
        h.core.emergency.request(patient_id, JUSTIFICATION, &doctor).await,
        Err(GuardError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_sensitive_read_fails_closed_without_audit() {
    let h = Harness::build(test_config(), |stores| stores.with_audit(Arc::new(FailingAudit)));
    let doctor = ctx(Role::Doctor);
    let patient_id = h.admit_patient(&doctor, "999-00-1111").await;

    assert!(matches!(h.core.patients.get(patient_id, &doctor).await, Err(GuardError::Unexpected { .. })));
    assert!(matches!(h.core.records.list_for_patient(patient_id, &doctor).await, Err(GuardError::Unexpected { .. })));
}

#[tokio::test]
async fn test_audit_review_is_confined_for_clinicians() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let admin = ctx(Role::Admin);
    let patient_id = h.admit_patient(&doctor, "121-21-2121").await;
    h.core.patients.get(patient_id, &nurse).await.unwrap();

    let filter = AuditFilter {
        actor_id: Some(doctor.actor_id),
        ..AuditFilter::default()
    };
    let nurse_view = h.core.audit.search(filter.clone(), &nurse).await.unwrap();
    assert!(!nurse_view.is_empty());
    assert!(nurse_view.iter().all(|v| v.entry.actor_id == Some(nurse.actor_id)));
    assert!(nurse_view.iter().all(|v| v.patient.as_ref().is_none_or(|p| p.government_id.is_none())));

    let admin_view = h.core.audit.search(filter, &admin).await.unwrap();
    assert!(admin_view.iter().all(|v| v.entry.actor_id == Some(doctor.actor_id)));
    assert!(admin_view.iter().all(|v| v.patient.is_none()));

    assert!(matches!(
        h.core.audit.logs_for_user(doctor.actor_id, &nurse, Default::default()).await,
        Err(GuardError::InsufficientRole { .. })
    ));
    let own = h.core.audit.logs_for_patient(patient_id, &doctor, Default::default()).await.unwrap();
    assert_eq!(own.len(), 2);
}

#[tokio::test]
async fn test_statistics_and_event_review_require_admin() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let admin = ctx(Role::Admin);
    let patient_id = h.admit_patient(&doctor, "131-31-3131").await;
    h.core.patients.get(patient_id, &doctor).await.unwrap();
    let _ = h.core.patients.get(patient_id, &admin).await;

    let start = h.clock.now() - chrono::Duration::hours(1);
    let end = h.clock.now() + chrono::Duration::hours(1);

    assert!(matches!(h.core.audit.statistics(start, end, &doctor).await, Err(GuardError::InsufficientRole { .. })));
    assert!(matches!(
        h.core.audit.security_events(Default::default(), &doctor).await,
        Err(GuardError::InsufficientRole { .. })
    ));

    let stats = h.core.audit.statistics(start, end, &admin).await.unwrap();
    assert_eq!(stats.total_logs, h.audit_entries().await.len() as u64);
    assert_eq!(stats.actions_by_type.get(&AuditAction::View), Some(&1));
    assert_eq!(stats.failed_actions, 3);

    let events = h.core.audit.security_events(Default::default(), &admin).await.unwrap();
    let unresolved = events.iter().find(|e| e.kind == SecurityEventKind::UnauthorizedAccess).unwrap();
    let resolved = h.core.audit.resolve(unresolved.id, &admin).await.unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_by, Some(admin.actor_id));
    assert!(matches!(h.core.audit.resolve(unresolved.id, &admin).await, Err(GuardError::StateConflict { .. })));
}
