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

//! Periodic housekeeping
//!
//! Every pass only touches rows that are already past their expiry, so
//! passes are idempotent and their order does not matter.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::auth_state::AuthStateService;
use crate::clock::Clock;
use crate::emergency::EmergencyAccessManager;
use crate::error::{GuardError, GuardResult};
use crate::store::{SessionStore, TokenBlacklist};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub revoked_tokens_purged: u64,
    pub sessions_purged: u64,
    pub grants_expired: u64,
    pub auth_states_purged: u64,
    /// Passes that failed and were skipped
    pub failed_passes: Vec<&'static str>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed_passes.is_empty()
    }
}

pub struct Sweeper {
    blacklist: Arc<dyn TokenBlacklist>,
    sessions: Arc<dyn SessionStore>,
    emergency: Arc<EmergencyAccessManager>,
    auth_states: Arc<AuthStateService>,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub fn new(
        blacklist: Arc<dyn TokenBlacklist>,
        sessions: Arc<dyn SessionStore>,
        emergency: Arc<EmergencyAccessManager>,
        auth_states: Arc<AuthStateService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blacklist,
            sessions,
            emergency,
            auth_states,
            clock,
        }
    }

    fn tally(report: &mut SweepReport, pass: &'static str, result: GuardResult<u64>) -> u64 {
        match result {
            Ok(count) => {
                counter!("medguard_sweep_rows_total", count, "pass" => pass);
                count
            }
            Err(e) => {
                error!(pass, error = %e, "Sweep pass failed");
                counter!("medguard_sweep_failures_total", 1, "pass" => pass);
                report.failed_passes.push(pass);
                0
            }
        }
    }

    /// Run every pass once. A failing pass does not stop the others.
    pub async fn run_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let result = self.blacklist.purge_revoked_tokens(now).await.map_err(GuardError::from);
        report.revoked_tokens_purged = Self::tally(&mut report, "revoked_tokens", result);

        let result = self.sessions.purge_expired_sessions(now).await.map_err(GuardError::from);
        report.sessions_purged = Self::tally(&mut report, "sessions", result);

        let result = self.emergency.expire_stale().await;
        report.grants_expired = Self::tally(&mut report, "emergency_grants", result);

        let result = self.auth_states.purge_expired().await;
        report.auth_states_purged = Self::tally(&mut report, "auth_states", result);

        info!(
            revoked_tokens = report.revoked_tokens_purged,
            sessions = report.sessions_purged,
            grants_expired = report.grants_expired,
            auth_states = report.auth_states_purged,
            failed = report.failed_passes.len(),
            "Sweep finished"
        );
        report
    }

    /// Run the sweep on a fixed period until the handle is aborted
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
