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

//! MedGuard security core
//!
//! Role-scoped access to patient data for doctors, nurses and
//! administrators: bearer token lifecycle, per-role sanitization,
//! break-glass emergency grants and an append-only audit trail with
//! derived security events. Transport and persistence live outside; the
//! core is reached through [`SecurityCore`] and the traits in [`store`].

pub mod audit;
pub mod auth_state;
pub mod clock;
pub mod config;
pub mod context;
pub mod core;
pub mod credentials;
pub mod emergency;
pub mod error;
pub mod models;
pub mod patients;
pub mod records;
pub mod sanitizer;
pub mod store;
pub mod sweep;
pub mod telemetry;
pub mod tokens;
pub mod users;

pub use crate::core::SecurityCore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::{ClientInfo, RequestContext};
pub use error::{ConfigError, GuardError, GuardResult, ProblemDetails, StoreError, StoreResult};
pub use models::*;
pub use store::{MemoryStore, Stores};
pub use tokens::{Claims, EMERGENCY_TOKEN_HEADER, IssuedTokens, TokenKind, TokenRejection};
