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

//! Role-conditioned filtering of clinical data
//!
//! Capability predicates answer "may this role attempt the operation" and are
//! checked first; sanitization shapes what a permitted caller gets back. A
//! `None` from a sanitizer means access denied, never not found.

use crate::models::{MedicalRecord, Patient, Role, Severity};

/// Replacement text for fields a restricted viewer may not read
pub const REDACTION_MARKER: &str = "[RESTRICTED - Doctor Only]";

pub fn sanitize_patient(patient: &Patient, role: Role) -> Option<Patient> {
    match role {
        Role::Doctor => Some(patient.clone()),
        Role::Nurse => Some(Patient {
            government_id: None,
            ..patient.clone()
        }),
        Role::Admin => None,
    }
}

pub fn sanitize_record(record: &MedicalRecord, role: Role, emergency_override: bool) -> Option<MedicalRecord> {
    match role {
        Role::Doctor => Some(record.clone()),
        Role::Nurse if record.severity == Severity::Critical && !emergency_override => Some(MedicalRecord {
            diagnosis: REDACTION_MARKER.to_string(),
            treatment: REDACTION_MARKER.to_string(),
            medications: REDACTION_MARKER.to_string(),
            ..record.clone()
        }),
        Role::Nurse => Some(record.clone()),
        Role::Admin => None,
    }
}

/// May read patient data
pub fn can_access(role: Role) -> bool {
    match role {
        Role::Doctor | Role::Nurse => true,
        Role::Admin => false,
    }
}

/// May update patient demographics
pub fn can_modify(role: Role) -> bool {
    match role {
        Role::Doctor | Role::Nurse => true,
        Role::Admin => false,
    }
}

/// May register patients
pub fn can_create(role: Role) -> bool {
    match role {
        Role::Doctor | Role::Admin => true,
        Role::Nurse => false,
    }
}

/// May soft-delete patients
pub fn can_delete(role: Role) -> bool {
    match role {
        Role::Admin => true,
        Role::Doctor | Role::Nurse => false,
    }
}

/// May create and update medical records
pub fn can_author_records(role: Role) -> bool {
    match role {
        Role::Doctor => true,
        Role::Nurse | Role::Admin => false,
    }
}

/// May search patients by government identifier
pub fn can_search_sensitive(role: Role) -> bool {
    match role {
        Role::Doctor => true,
        Role::Nurse | Role::Admin => false,
    }
}

/// May read audit logs. Non-admins only see their own rows.
pub fn can_review_audit(role: Role) -> bool {
    match role {
        Role::Doctor | Role::Nurse | Role::Admin => true,
    }
}

/// May manage accounts, security events and system-wide statistics
pub fn can_administer(role: Role) -> bool {
    match role {
        Role::Admin => true,
        Role::Doctor | Role::Nurse => false,
    }
}
