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

//! Account lifecycle: login, logout, provisioning and administration

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditPipeline;
use crate::clock::Clock;
use crate::context::{ClientInfo, RequestContext};
use crate::credentials::{CredentialStore, validate_password_strength};
use crate::error::{GuardError, GuardResult, StoreError};
use crate::models::{AuditAction, AuditLogEntry, ExternalIdentity, NewUser, Page, Role, Session, User, UserUpdate};
use crate::sanitizer::can_administer;
use crate::store::UserStore;
use crate::tokens::{IssuedTokens, TokenService};

const RESOURCE: &str = "user";

/// Result of a successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: IssuedTokens,
    #[serde(skip_serializing)]
    pub session: Session,
}

pub struct UserService {
    users: Arc<dyn UserStore>,
    credentials: Arc<CredentialStore>,
    tokens: Arc<TokenService>,
    audit: Arc<AuditPipeline>,
    clock: Arc<dyn Clock>,
    external_default_role: Role,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        credentials: Arc<CredentialStore>,
        tokens: Arc<TokenService>,
        audit: Arc<AuditPipeline>,
        clock: Arc<dyn Clock>,
        external_default_role: Role,
    ) -> Self {
        Self {
            users,
            credentials,
            tokens,
            audit,
            clock,
            external_default_role,
        }
    }

    async fn load(&self, user_id: Uuid) -> GuardResult<User> {
        self.users.user_by_id(user_id).await?.ok_or_else(|| GuardError::not_found("user not found"))
    }

    async fn save(&self, user: User) -> GuardResult<()> {
        if !self.users.update_user(user).await? {
            return Err(GuardError::not_found("user not found"));
        }
        Ok(())
    }

    async fn audit_best_effort(&self, entry: AuditLogEntry) {
        let action = entry.action;
        if let Err(e) = self.audit.record(entry).await {
            error!(action = action.as_str(), error = %e, "Failed to write audit entry");
        }
    }

    async fn invalidate_sessions(&self, user_id: Uuid) {
        if let Err(e) = self.tokens.invalidate_all_sessions(user_id).await {
            error!(user_id = %user_id, error = %e, "Failed to invalidate sessions");
        }
    }

    /// Stamp last login, mint tokens and open a session
    async fn complete_login(&self, mut user: User, client: &ClientInfo) -> GuardResult<LoginOutcome> {
        let now = self.clock.now();
        user.last_login = Some(now);
        user.updated_at = now;
        self.save(user.clone()).await?;

        let tokens = self.tokens.issue(&user)?;
        let session = self.tokens.create_session(user.id, client).await?;

        if let Err(e) = self.audit.log_login(user.id, client).await {
            error!(user_id = %user.id, error = %e, "Failed to audit login");
        }

        info!(user_id = %user.id, role = %user.role, "User logged in");
        Ok(LoginOutcome { user, tokens, session })
    }

    /// Password login. Every failure is audited and reads the same to the caller.
    pub async fn login(&self, email: &str, password: &str, client: &ClientInfo) -> GuardResult<LoginOutcome> {
        let user = match self.credentials.authenticate(email, password).await {
            Ok(user) => user,
            Err(e @ (GuardError::InvalidCredentials | GuardError::AccountInactive)) => {
                let known = self.users.user_by_email(email).await.ok().flatten().map(|u| u.id);
                let reason = match &e {
                    GuardError::AccountInactive => "account inactive",
                    _ => "invalid credentials",
                };
                if let Err(audit_err) = self.audit.log_failed_login(known, client, reason).await {
                    error!(error = %audit_err, "Failed to audit failed login");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.complete_login(user, client).await
    }

    /// Rotate a refresh token
    pub async fn refresh(&self, refresh_token: &str) -> GuardResult<IssuedTokens> {
        self.tokens.refresh(refresh_token).await
    }

    /// Revoke the caller's tokens and drop every session.
    ///
    /// The access token must belong to the caller. A refresh token that does
    /// not is left alone.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>, ctx: &RequestContext) -> GuardResult<()> {
        self.tokens.revoke_owned(access_token, ctx.actor_id).await?;

        if let Some(refresh_token) = refresh_token {
            if let Err(e) = self.tokens.revoke_owned(refresh_token, ctx.actor_id).await {
                warn!(user_id = %ctx.actor_id, error = %e, "Failed to revoke refresh token on logout");
            }
        }

        self.invalidate_sessions(ctx.actor_id).await;
        self.audit_best_effort(AuditLogEntry::new(AuditAction::Logout, "auth").with_actor(ctx.actor_id).with_client(&ctx.client))
            .await;

        info!(user_id = %ctx.actor_id, "User logged out");
        Ok(())
    }

    /// Create an account. Admin only.
    pub async fn create_user(&self, input: NewUser, ctx: &RequestContext) -> GuardResult<User> {
        if !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "user_management_requires_admin").await);
        }

        let email = input.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(GuardError::validation("a valid email address is required"));
        }
        if input.name.trim().is_empty() {
            return Err(GuardError::validation("name is required"));
        }
        validate_password_strength(&input.password)?;

        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            name: input.name.trim().to_string(),
            password_hash: self.credentials.hasher().hash(&input.password)?,
            role: input.role,
            active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        self.users.insert_user(user.clone()).await?;

        self.audit_best_effort(AuditLogEntry::new(AuditAction::Create, RESOURCE).with_actor(ctx.actor_id).with_client(&ctx.client))
            .await;

        info!(user_id = %user.id, role = %user.role, created_by = %ctx.actor_id, "User created");
        Ok(user)
    }

    /// Log in through an identity provider, creating the account on first sight
    pub async fn provision_external_user(&self, identity: ExternalIdentity, client: &ClientInfo) -> GuardResult<LoginOutcome> {
        let email = identity.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(GuardError::validation("identity provider returned no usable email"));
        }

        let user = match self.users.user_by_email(&email).await? {
            Some(user) => user,
            None => {
                let now = self.clock.now();
                let user = User {
                    id: Uuid::new_v4(),
                    email: email.clone(),
                    name: identity.name.trim().to_string(),
                    password_hash: String::new(),
                    role: self.external_default_role,
                    active: true,
                    last_login: None,
                    created_at: now,
                    updated_at: now,
                };
                match self.users.insert_user(user.clone()).await {
                    Ok(()) => {
                        info!(user_id = %user.id, provider = %identity.provider, role = %user.role, "Provisioned external user");
                        user
                    }
                    // Lost a race with a concurrent first login
                    Err(StoreError::Duplicate { .. }) => self
                        .users
                        .user_by_email(&email)
                        .await?
                        .ok_or_else(|| GuardError::unexpected("provisioned user vanished"))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if !user.active {
            if let Err(e) = self.audit.log_failed_login(Some(user.id), client, "account inactive").await {
                error!(error = %e, "Failed to audit failed login");
            }
            return Err(GuardError::AccountInactive);
        }

        self.complete_login(user, client).await
    }

    /// Self or admin
    pub async fn get_user(&self, user_id: Uuid, ctx: &RequestContext) -> GuardResult<User> {
        if user_id != ctx.actor_id && !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "other_users_profile").await);
        }
        self.load(user_id).await
    }

    /// Admin only
    pub async fn list_users(&self, page: Page, ctx: &RequestContext) -> GuardResult<Vec<User>> {
        if !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "user_management_requires_admin").await);
        }
        Ok(self.users.list_users(page).await?)
    }

    /// Self-service may change the name only. Admins may also change role and
    /// active flag; deactivation drops the user's sessions.
    pub async fn update_user(&self, user_id: Uuid, changes: UserUpdate, ctx: &RequestContext) -> GuardResult<User> {
        let is_admin = can_administer(ctx.role);
        if user_id != ctx.actor_id && !is_admin {
            return Err(self.audit.reject(ctx, RESOURCE, None, "other_users_profile").await);
        }
        if !is_admin && (changes.role.is_some() || changes.active.is_some()) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "self_service_name_only").await);
        }
        if user_id == ctx.actor_id && changes.active == Some(false) {
            return Err(GuardError::validation("cannot deactivate your own account"));
        }

        let mut user = self.load(user_id).await?;
        let was_active = user.active;

        if let Some(name) = changes.name {
            if name.trim().is_empty() {
                return Err(GuardError::validation("name must not be empty"));
            }
            user.name = name.trim().to_string();
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(active) = changes.active {
            user.active = active;
        }
        user.updated_at = self.clock.now();
        self.save(user.clone()).await?;

        if was_active && !user.active {
            self.invalidate_sessions(user_id).await;
        }
        self.audit_best_effort(AuditLogEntry::new(AuditAction::Update, RESOURCE).with_actor(ctx.actor_id).with_client(&ctx.client))
            .await;

        Ok(user)
    }

    /// Change the caller's own password and sign out everywhere
    pub async fn change_password(&self, current: &str, new_password: &str, ctx: &RequestContext) -> GuardResult<()> {
        let mut user = self.credentials.find_active(ctx.actor_id).await?;

        if user.password_hash.is_empty() || !self.credentials.hasher().verify(current, &user.password_hash) {
            self.audit_best_effort(
                AuditLogEntry::new(AuditAction::Update, "password")
                    .with_actor(ctx.actor_id)
                    .with_client(&ctx.client)
                    .failed("current password is incorrect"),
            )
            .await;
            return Err(GuardError::InvalidCredentials);
        }
        validate_password_strength(new_password)?;

        user.password_hash = self.credentials.hasher().hash(new_password)?;
        user.updated_at = self.clock.now();
        self.save(user).await?;

        self.invalidate_sessions(ctx.actor_id).await;
        self.audit_best_effort(AuditLogEntry::new(AuditAction::Update, "password").with_actor(ctx.actor_id).with_client(&ctx.client))
            .await;

        info!(user_id = %ctx.actor_id, "Password changed");
        Ok(())
    }

    /// Deactivate another account. Admin only.
    pub async fn deactivate_user(&self, user_id: Uuid, ctx: &RequestContext) -> GuardResult<()> {
        if !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, RESOURCE, None, "user_management_requires_admin").await);
        }
        if user_id == ctx.actor_id {
            return Err(GuardError::validation("cannot deactivate your own account"));
        }

        let mut user = self.load(user_id).await?;
        user.active = false;
        user.updated_at = self.clock.now();
        self.save(user).await?;

        self.invalidate_sessions(user_id).await;
        self.audit_best_effort(AuditLogEntry::new(AuditAction::Update, "user_deactivated").with_actor(ctx.actor_id).with_client(&ctx.client))
            .await;

        info!(user_id = %user_id, deactivated_by = %ctx.actor_id, "User deactivated");
        Ok(())
    }

    /// Unexpired sessions of a user. Self or admin.
    pub async fn sessions(&self, user_id: Uuid, ctx: &RequestContext) -> GuardResult<Vec<Session>> {
        if user_id != ctx.actor_id && !can_administer(ctx.role) {
            return Err(self.audit.reject(ctx, "sessions", None, "other_users_sessions").await);
        }
        self.tokens.active_sessions(user_id).await
    }
}
