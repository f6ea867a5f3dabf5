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

use chrono::Duration;
use common::{FailingAudit, FailingBlacklist, Harness, JUSTIFICATION, ctx, test_config};
use medguard_core::store::GrantStore;
use medguard_core::{AuditAction, Clock, EventSeverity, GrantQuery, GrantStatus, GuardError, Role, SecurityEventKind};
use std::sync::Arc;

fn grant_lifetime() -> Duration {
    test_config().emergency_access_duration()
}

#[tokio::test]
async fn test_second_live_grant_conflicts_until_first_is_revoked() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "100-20-3000").await;

    let first = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();
    assert_eq!(first.status, GrantStatus::Active);
    assert_eq!(first.expires_at, first.created_at + grant_lifetime());

    let again = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await;
    assert!(matches!(again, Err(GuardError::ValidationFailed { .. })));

    // The pair is per requester
    assert!(h.core.emergency.request(patient_id, JUSTIFICATION, &doctor).await.is_ok());

    let revoked = h.core.emergency.revoke(first.id, &nurse).await.unwrap();
    assert_eq!(revoked.status, GrantStatus::Revoked);
    assert_eq!(revoked.revoked_by, Some(nurse.actor_id));

    let second = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();
    assert_ne!(second.access_token, first.access_token);
    assert!(matches!(h.core.emergency.revoke(first.id, &nurse).await, Err(GuardError::StateConflict { .. })));
}

#[tokio::test]
async fn test_lapsed_grant_frees_the_pair_before_sweep() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "100-20-3001").await;

    let grant = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();
    h.clock.advance(grant_lifetime() + Duration::seconds(1));

    let stored = h.store.grant_by_id(grant.id).await.unwrap().unwrap();
    assert_eq!(stored.status, GrantStatus::Active);
    assert!(!stored.is_active(h.clock.now()));

    let holder = nurse.clone().with_emergency_token(grant.access_token.clone());
    assert!(!h.core.emergency.resolve_override(&holder, patient_id).await);
    assert!(h.core.emergency.active_grants(&ctx(Role::Admin)).await.unwrap().is_empty());

    let listed = h.core.emergency.grants_for_user(nurse.actor_id, &nurse).await.unwrap();
    assert_eq!(listed[0].status, GrantStatus::Expired);

    assert!(matches!(h.core.emergency.consume(grant.id, &nurse).await, Err(GuardError::StateConflict { .. })));
    assert!(h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.is_ok());

    let report = h.core.sweeper.run_once().await;
    assert_eq!(report.grants_expired, 1);
    let stored = h.store.grant_by_id(grant.id).await.unwrap().unwrap();
    assert_eq!(stored.status, GrantStatus::Expired);
}

#[tokio::test]
async fn test_request_is_validated_and_audited() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let patient_id = h.admit_patient(&doctor, "100-20-3002").await;

    let short = h.core.emergency.request(patient_id, "   need it now      ", &doctor).await;
    assert!(matches!(short, Err(GuardError::ValidationFailed { .. })));
    let unknown = h.core.emergency.request(uuid::Uuid::new_v4(), JUSTIFICATION, &doctor).await;
    assert!(matches!(unknown, Err(GuardError::NotFound { .. })));

    h.core.emergency.request(patient_id, JUSTIFICATION, &doctor).await.unwrap();

    let entries = h.audit_entries().await;
    let latest = &entries[0];
    assert_eq!(latest.action, AuditAction::EmergencyRequest);
    assert_eq!(latest.patient_id, Some(patient_id));
    assert!(latest.emergency_use);
    assert_eq!(latest.justification.as_deref(), Some(JUSTIFICATION));

    let events = h.security_events().await;
    let event = &events[0];
    assert_eq!(event.kind, SecurityEventKind::EmergencyAccess);
    assert_eq!(event.severity, EventSeverity::Medium);
}

#[tokio::test]
async fn test_unaudited_request_leaves_no_usable_grant() {
    let h = Harness::build(test_config(), |stores| stores.with_audit(Arc::new(FailingAudit)));
    let doctor = ctx(Role::Doctor);
    let patient_id = h.admit_patient(&doctor, "100-20-3003").await;

    let result = h.core.emergency.request(patient_id, JUSTIFICATION, &doctor).await;
    assert!(matches!(result, Err(GuardError::Unexpected { .. })));

    let grants = h.store.list_grants(&GrantQuery::default()).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].status, GrantStatus::Revoked);
    assert!(!grants[0].is_active(h.clock.now()));
}

#[tokio::test]
async fn test_grant_lifecycle_through_consume() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let stranger = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "100-20-3004").await;

    let grant = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();

    let unchanged = h.core.emergency.activate(grant.id, &nurse).await.unwrap();
    assert_eq!(unchanged, grant);

    assert!(matches!(h.core.emergency.consume(grant.id, &stranger).await, Err(GuardError::InsufficientRole { .. })));
    assert!(matches!(h.core.emergency.revoke(grant.id, &stranger).await, Err(GuardError::InsufficientRole { .. })));

    h.clock.advance(Duration::minutes(10));
    let used = h.core.emergency.consume(grant.id, &nurse).await.unwrap();
    assert_eq!(used.status, GrantStatus::Used);
    assert_eq!(used.used_at, Some(h.clock.now()));

    let holder = nurse.clone().with_emergency_token(grant.access_token);
    assert!(!h.core.emergency.resolve_override(&holder, patient_id).await);
    assert!(matches!(h.core.emergency.activate(grant.id, &nurse).await, Err(GuardError::StateConflict { .. })));
    assert!(matches!(h.core.emergency.revoke(grant.id, &nurse).await, Err(GuardError::StateConflict { .. })));
}

#[tokio::test]
async fn test_admin_may_revoke_and_list() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let admin = ctx(Role::Admin);
    let patient_id = h.admit_patient(&doctor, "100-20-3005").await;

    let grant = h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();
    assert_eq!(h.core.emergency.active_grants(&admin).await.unwrap().len(), 1);
    assert!(matches!(h.core.emergency.active_grants(&nurse).await, Err(GuardError::InsufficientRole { .. })));
    assert!(matches!(
        h.core.emergency.grants_for_patient(patient_id, &doctor).await,
        Err(GuardError::InsufficientRole { .. })
    ));
    assert!(matches!(
        h.core.emergency.grants_for_user(nurse.actor_id, &doctor).await,
        Err(GuardError::InsufficientRole { .. })
    ));

    let revoked = h.core.emergency.revoke(grant.id, &admin).await.unwrap();
    assert_eq!(revoked.revoked_by, Some(admin.actor_id));

    let on_patient = h.core.emergency.grants_for_patient(patient_id, &admin).await.unwrap();
    assert_eq!(on_patient.len(), 1);
    assert_eq!(on_patient[0].status, GrantStatus::Revoked);
}

#[tokio::test]
async fn test_grant_statistics() {
    let h = Harness::new();
    let doctor = ctx(Role::Doctor);
    let admin = ctx(Role::Admin);
    let first = h.admit_patient(&doctor, "100-20-3006").await;
    let second = h.admit_patient(&doctor, "100-20-3007").await;
    let start = h.clock.now();

    let revoked = h.core.emergency.request(first, JUSTIFICATION, &doctor).await.unwrap();
    h.clock.advance(Duration::minutes(30));
    h.core.emergency.revoke(revoked.id, &doctor).await.unwrap();
    h.core.emergency.request(second, JUSTIFICATION, &doctor).await.unwrap();

    let end = h.clock.now();
    assert!(matches!(h.core.emergency.statistics(start, end, &doctor).await, Err(GuardError::InsufficientRole { .. })));

    let stats = h.core.emergency.statistics(start, end, &admin).await.unwrap();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.active_sessions, 1);
    assert_eq!(stats.requests_by_status.get(&GrantStatus::Revoked), Some(&1));
    assert_eq!(stats.requests_by_status.get(&GrantStatus::Active), Some(&1));
    assert_eq!(stats.average_duration_minutes, 30.0);
}

#[tokio::test]
async fn test_sweep_continues_past_failing_pass() {
    let h = Harness::build(test_config(), |stores| stores.with_blacklist(Arc::new(FailingBlacklist)));
    let doctor = ctx(Role::Doctor);
    let nurse = ctx(Role::Nurse);
    let patient_id = h.admit_patient(&doctor, "100-20-3008").await;
    h.core.emergency.request(patient_id, JUSTIFICATION, &nurse).await.unwrap();
    h.core.auth_states.issue("google", "/").await.unwrap();

    h.clock.advance(Duration::days(1));
    let report = h.core.sweeper.run_once().await;

    assert!(!report.is_clean());
    assert_eq!(report.failed_passes, vec!["revoked_tokens"]);
    assert_eq!(report.grants_expired, 1);
    assert_eq!(report.auth_states_purged, 1);
}
