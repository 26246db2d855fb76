//! User storage
//!
//! Tables: users, webauthn_registrations

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gate_core::traits::Id;
use gate_core::types::UserStatus;
use gate_core::GateResult;
use gate_models::{LockoutOutcome, User, UserStore, WebAuthnRegistration};
use sqlx::{FromRow, PgPool};

use crate::repository::{RepositoryError, RepositoryResult};

/// User status constants
pub mod status {
    pub const ACTIVE: i32 = 1;
    pub const BLOCKED: i32 = 2;
    pub const DEACTIVATED: i32 = 3;
}

fn status_from_i32(value: i32) -> UserStatus {
    match value {
        status::ACTIVE => UserStatus::Active,
        status::DEACTIVATED => UserStatus::Deactivated,
        _ => UserStatus::Blocked,
    }
}

/// User database entity
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub login: String,
    pub mail: String,
    pub admin: bool,
    pub status: i32,
    pub encrypted_password: String,
    pub otp_secret: Option<String>,
    pub otp_required_for_login: bool,
    pub failed_attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub require_two_factor_from_group: bool,
    pub group_grace_period_hours: Option<i64>,
    pub otp_grace_period_started_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// WebAuthn registration database entity
#[derive(Debug, Clone, FromRow)]
pub struct WebAuthnRegistrationRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub credential_xid: String,
    pub public_key: String,
    pub counter: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WebAuthnRegistrationRow> for WebAuthnRegistration {
    type Error = RepositoryError;

    fn try_from(row: WebAuthnRegistrationRow) -> Result<Self, Self::Error> {
        let counter = u32::try_from(row.counter).map_err(|_| {
            RepositoryError::Corrupt(format!(
                "webauthn_registrations.counter {} out of range for id {}",
                row.counter, row.id
            ))
        })?;
        Ok(WebAuthnRegistration {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            credential_id: row.credential_xid,
            public_key: row.public_key,
            counter,
            created_at: Some(row.created_at),
        })
    }
}

impl UserRow {
    fn into_user(self, registrations: Vec<WebAuthnRegistration>) -> User {
        User {
            id: self.id,
            login: self.login,
            mail: self.mail,
            admin: self.admin,
            status: status_from_i32(self.status),
            encrypted_password: self.encrypted_password,
            otp_secret: self.otp_secret,
            otp_enabled: self.otp_required_for_login,
            webauthn_registrations: registrations,
            failed_attempts: self.failed_attempts,
            locked_until: self.locked_at,
            confirmed_at: self.confirmed_at,
            require_two_factor_from_group: self.require_two_factor_from_group,
            group_grace_period_hours: self.group_grace_period_hours,
            otp_grace_period_started_at: self.otp_grace_period_started_at,
            last_sign_in_at: self.last_sign_in_at,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }
}

const USER_COLUMNS: &str = r#"
    id, login, mail, admin, status, encrypted_password, otp_secret,
    otp_required_for_login, failed_attempts, locked_at, confirmed_at,
    require_two_factor_from_group, group_grace_period_hours,
    otp_grace_period_started_at, last_sign_in_at, created_at, updated_at
"#;

/// PostgreSQL-backed [`UserStore`]
///
/// `locked_at` holds the end of the lockout window.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn registrations_for(&self, user_id: Id) -> RepositoryResult<Vec<WebAuthnRegistration>> {
        let rows = sqlx::query_as::<_, WebAuthnRegistrationRow>(
            r#"
            SELECT id, user_id, name, credential_xid, public_key, counter, created_at
            FROM webauthn_registrations
            WHERE user_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WebAuthnRegistration::try_from).collect()
    }

    async fn load(&self, row: Option<UserRow>) -> RepositoryResult<Option<User>> {
        match row {
            Some(row) => {
                let registrations = self.registrations_for(row.id).await?;
                Ok(Some(row.into_user(registrations)))
            }
            None => Ok(None),
        }
    }

    async fn failed_attempt(
        &self,
        user_id: Id,
        now: DateTime<Utc>,
        maximum_attempts: i32,
        lock_duration: Duration,
    ) -> RepositoryResult<LockoutOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent failures for the same user
        let current: Option<(i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT failed_attempts, locked_at FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (failed_attempts, locked_until) =
            current.ok_or_else(|| RepositoryError::NotFound(user_id.to_string()))?;

        let outcome = LockoutOutcome::apply(
            failed_attempts,
            locked_until,
            now,
            maximum_attempts,
            lock_duration,
        );

        sqlx::query(
            "UPDATE users SET failed_attempts = $1, locked_at = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(outcome.failed_attempts)
        .bind(outcome.locked_until)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find(&self, id: Id) -> GateResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(self.load(row).await?)
    }

    async fn find_by_login(&self, login: &str) -> GateResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE LOWER(login) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(self.load(row).await?)
    }

    async fn record_failed_attempt(
        &self,
        user_id: Id,
        now: DateTime<Utc>,
        maximum_attempts: i32,
        lock_duration: Duration,
    ) -> GateResult<LockoutOutcome> {
        Ok(self
            .failed_attempt(user_id, now, maximum_attempts, lock_duration)
            .await?)
    }

    async fn record_success(&self, user_id: Id, now: DateTime<Utc>) -> GateResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET failed_attempts = 0, locked_at = NULL, last_sign_in_at = $1, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(user_id.to_string()).into());
        }
        Ok(())
    }

    async fn advance_webauthn_counter(
        &self,
        registration_id: Id,
        expected_previous: u32,
        new_counter: u32,
    ) -> GateResult<bool> {
        let result = sqlx::query(
            "UPDATE webauthn_registrations SET counter = $1 WHERE id = $2 AND counter = $3",
        )
        .bind(i64::from(new_counter))
        .bind(registration_id)
        .bind(i64::from(expected_previous))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn begin_otp_grace_period(
        &self,
        user_id: Id,
        now: DateTime<Utc>,
    ) -> GateResult<DateTime<Utc>> {
        let started: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET otp_grace_period_started_at = COALESCE(otp_grace_period_started_at, $1)
            WHERE id = $2
            RETURNING otp_grace_period_started_at
            "#,
        )
        .bind(now)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(started.ok_or_else(|| RepositoryError::NotFound(user_id.to_string()))?)
    }
}
