//! Postgres implementations of the user and session stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_gate_access::store::StoreResult;
use fern_gate_access::{
    AccountStatus, ClientInfo, PermissionLevel, ProjectPermission, Role, ScopeGrant, Session,
    SessionId, SessionStore, StoreError, TokenSet, User, UserStore,
};
use fern_gate_core::UserId;
use sqlx::{FromRow, PgPool};

const USER_COLUMNS: &str = "id, email, name, picture, email_verified, role, status, groups, \
                            created_at, updated_at, last_login_at";

const SESSION_COLUMNS: &str = "id, user_id, access_token, refresh_token, id_token, ip_address, \
                               user_agent, is_active, created_at, expires_at, last_activity";

/// Maps a driver error.
///
/// Unique violations become `Conflict`. Foreign key violations mean the
/// referenced user is missing and become `NotFound`.
fn store_error(entity: &'static str, key: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            entity,
            key: key.to_string(),
        },
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound {
            entity: "user",
            key: key.to_string(),
        },
        _ => StoreError::Unavailable {
            details: e.to_string(),
        },
    }
}

fn not_found(entity: &'static str, key: &str) -> StoreError {
    StoreError::NotFound {
        entity,
        key: key.to_string(),
    }
}

fn corrupt(entity: &'static str, details: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable {
        details: format!("invalid {entity} row: {details}"),
    }
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: Option<String>,
    picture: Option<String>,
    email_verified: bool,
    role: String,
    status: String,
    groups: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_user(self) -> User {
        User::with_all_fields(
            UserId::new(self.id),
            self.email,
            self.name,
            self.picture,
            self.email_verified,
            Role::from_name(&self.role),
            AccountStatus::from_name(&self.status),
            self.groups,
            self.created_at,
            self.updated_at,
            self.last_login_at,
        )
    }
}

#[derive(FromRow)]
struct ScopeRow {
    id: String,
    user_id: String,
    scope: String,
    granted_by: String,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl ScopeRow {
    fn try_into_grant(self) -> Result<ScopeGrant, StoreError> {
        Ok(ScopeGrant {
            id: self.id.parse().map_err(|e| corrupt("scope", e))?,
            user_id: UserId::new(self.user_id),
            scope: self.scope,
            granted_by: UserId::new(self.granted_by),
            granted_at: self.granted_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(FromRow)]
struct PermissionRow {
    id: String,
    user_id: String,
    project_id: String,
    level: String,
    granted_by: String,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl PermissionRow {
    fn try_into_permission(self) -> Result<ProjectPermission, StoreError> {
        Ok(ProjectPermission {
            id: self.id.parse().map_err(|e| corrupt("permission", e))?,
            user_id: UserId::new(self.user_id),
            project_id: self.project_id,
            level: self
                .level
                .parse::<PermissionLevel>()
                .map_err(|e| corrupt("permission", e))?,
            granted_by: UserId::new(self.granted_by),
            granted_at: self.granted_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    ip_address: String,
    user_agent: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl SessionRow {
    /// `owner` is the current user record, standing in for the snapshot the
    /// session was created with.
    fn into_session(self, owner: Option<User>) -> Session {
        let tokens = TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            expires_in: None,
        };
        Session::with_all_fields(
            SessionId::new(self.id),
            UserId::new(self.user_id),
            owner,
            tokens,
            ClientInfo::new(self.ip_address, self.user_agent),
            self.is_active,
            self.created_at,
            self.expires_at,
            self.last_activity,
        )
    }
}

/// Postgres-backed `UserStore`.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, column: &str, key: &str) -> StoreResult<User> {
        fetch_user(&self.pool, column, key)
            .await?
            .ok_or_else(|| not_found("user", key).into())
    }
}

async fn fetch_user(pool: &PgPool, column: &str, key: &str) -> Result<Option<User>, StoreError> {
    let row: Option<UserRow> =
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"))
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(|e| store_error("user", key, e))?;

    Ok(row.map(UserRow::into_user))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, picture, email_verified, role, status, groups,
                               created_at, updated_at, last_login_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id().as_str())
        .bind(user.email())
        .bind(user.name())
        .bind(user.picture())
        .bind(user.email_verified())
        .bind(user.role().as_str())
        .bind(user.status().as_str())
        .bind(user.groups().to_vec())
        .bind(user.created_at())
        .bind(user.updated_at())
        .bind(user.last_login_at())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("user", user.id().as_str(), e))?;

        Ok(())
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, name = $3, picture = $4, email_verified = $5, role = $6,
                status = $7, groups = $8, updated_at = $9, last_login_at = $10
            WHERE id = $1
            "#,
        )
        .bind(user.id().as_str())
        .bind(user.email())
        .bind(user.name())
        .bind(user.picture())
        .bind(user.email_verified())
        .bind(user.role().as_str())
        .bind(user.status().as_str())
        .bind(user.groups().to_vec())
        .bind(user.updated_at())
        .bind(user.last_login_at())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("user", user.id().as_str(), e))?;

        if result.rows_affected() == 0 {
            return Err(not_found("user", user.id().as_str()).into());
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> StoreResult<User> {
        self.fetch_one_where("id", id.as_str()).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<User> {
        self.fetch_one_where("email", email).await
    }

    async fn set_groups(&self, id: &UserId, groups: &[String]) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET groups = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_str())
            .bind(groups.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("user", id.as_str(), e))?;

        if result.rows_affected() == 0 {
            return Err(not_found("user", id.as_str()).into());
        }
        Ok(())
    }

    async fn grant_scope(&self, grant: &ScopeGrant) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_scopes (id, user_id, scope, granted_by, granted_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(grant.id.to_string())
        .bind(grant.user_id.as_str())
        .bind(&grant.scope)
        .bind(grant.granted_by.as_str())
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("scope", &grant.scope, e))?;

        Ok(())
    }

    async fn revoke_scope(&self, user_id: &UserId, scope: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM user_scopes WHERE user_id = $1 AND scope = $2")
            .bind(user_id.as_str())
            .bind(scope)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("scope", scope, e))?;

        Ok(result.rows_affected())
    }

    async fn list_scopes(&self, user_id: &UserId) -> StoreResult<Vec<ScopeGrant>> {
        let rows: Vec<ScopeRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, scope, granted_by, granted_at, expires_at
            FROM user_scopes
            WHERE user_id = $1
            ORDER BY granted_at
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("scope", user_id.as_str(), e))?;

        Ok(rows
            .into_iter()
            .map(ScopeRow::try_into_grant)
            .collect::<Result<_, _>>()?)
    }

    async fn grant_project_permission(&self, permission: &ProjectPermission) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO project_permissions
                (id, user_id, project_id, level, granted_by, granted_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(permission.id.to_string())
        .bind(permission.user_id.as_str())
        .bind(&permission.project_id)
        .bind(permission.level.as_str())
        .bind(permission.granted_by.as_str())
        .bind(permission.granted_at)
        .bind(permission.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("permission", &permission.project_id, e))?;

        Ok(())
    }

    async fn list_project_permissions(
        &self,
        user_id: &UserId,
    ) -> StoreResult<Vec<ProjectPermission>> {
        let rows: Vec<PermissionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, project_id, level, granted_by, granted_at, expires_at
            FROM project_permissions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("permission", user_id.as_str(), e))?;

        Ok(rows
            .into_iter()
            .map(PermissionRow::try_into_permission)
            .collect::<Result<_, _>>()?)
    }

    async fn update_last_login(&self, id: &UserId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("user", id.as_str(), e))?;

        if result.rows_affected() == 0 {
            return Err(not_found("user", id.as_str()).into());
        }
        Ok(())
    }
}

/// Postgres-backed `SessionStore`.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches the owner record to a fetched row.
    async fn hydrate(&self, row: SessionRow) -> StoreResult<Session> {
        let owner = fetch_user(&self.pool, "id", &row.user_id).await?;
        Ok(row.into_session(owner))
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, access_token, refresh_token, id_token, ip_address,
                                  user_agent, is_active, created_at, expires_at, last_activity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id().as_str())
        .bind(session.access_token())
        .bind(session.tokens().refresh_token.as_deref())
        .bind(session.id_token())
        .bind(&session.client().ip)
        .bind(&session.client().user_agent)
        .bind(session.is_active())
        .bind(session.created_at())
        .bind(session.expires_at())
        .bind(session.last_activity())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("session", &session.id().redacted(), e))?;

        Ok(())
    }

    async fn find(&self, id: &SessionId) -> StoreResult<Session> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("session", &id.redacted(), e))?;

        match row {
            Some(row) => self.hydrate(row).await,
            None => Err(not_found("session", &id.redacted()).into()),
        }
    }

    async fn find_active(&self, id: &SessionId, now: DateTime<Utc>) -> StoreResult<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE id = $1 AND is_active AND expires_at > $2"
        ))
        .bind(id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("session", &id.redacted(), e))?;

        match row {
            Some(row) => self.hydrate(row).await,
            None => Err(not_found("session", &id.redacted()).into()),
        }
    }

    async fn update_activity(&self, id: &SessionId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sessions SET last_activity = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("session", &id.redacted(), e))?;

        if result.rows_affected() == 0 {
            return Err(not_found("session", &id.redacted()).into());
        }
        Ok(())
    }

    async fn invalidate(&self, id: &SessionId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sessions SET is_active = FALSE WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("session", &id.redacted(), e))?;

        if result.rows_affected() == 0 {
            return Err(not_found("session", &id.redacted()).into());
        }
        Ok(())
    }

    async fn invalidate_all(&self, user_id: &UserId) -> StoreResult<u64> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = FALSE WHERE user_id = $1 AND is_active")
                .bind(user_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("session", user_id.as_str(), e))?;

        Ok(result.rows_affected())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("session", "expired", e))?;

        Ok(result.rows_affected())
    }

    async fn list_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND is_active AND expires_at > $2 \
             ORDER BY created_at"
        ))
        .bind(user_id.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("session", user_id.as_str(), e))?;

        let owner = if rows.is_empty() {
            None
        } else {
            fetch_user(&self.pool, "id", user_id.as_str()).await?
        };
        Ok(rows
            .into_iter()
            .map(|row| row.into_session(owner.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = include_str!("../../migrations/20250301000000_initial_schema.sql");

    fn table<'a>(schema: &'a str, name: &str) -> &'a str {
        let start = schema
            .find(&format!("CREATE TABLE {name} ("))
            .expect("table present");
        let end = schema[start..].find(");").expect("table end");
        &schema[start..start + end]
    }

    #[test]
    fn grants_do_not_require_an_existing_user() {
        assert!(!table(SCHEMA, "user_scopes").contains("REFERENCES"));
        assert!(!table(SCHEMA, "project_permissions").contains("REFERENCES"));
        assert!(table(SCHEMA, "sessions").contains("REFERENCES users(id)"));
    }

    fn session_row(user_id: &str) -> SessionRow {
        let now = Utc::now();
        SessionRow {
            id: "s1".to_string(),
            user_id: user_id.to_string(),
            access_token: "at".to_string(),
            refresh_token: None,
            id_token: Some("idt".to_string()),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test-agent".to_string(),
            is_active: true,
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            last_activity: now,
        }
    }

    #[test]
    fn session_row_carries_owner_record() {
        let owner = User::new(UserId::new("u1"), "u1@example.com");

        let session = session_row("u1").into_session(Some(owner));

        assert_eq!(session.user_id().as_str(), "u1");
        assert_eq!(
            session.cached_user().map(User::email),
            Some("u1@example.com")
        );
        assert_eq!(session.id_token(), Some("idt"));
        assert_eq!(session.client().user_agent, "test-agent");
        assert!(session.is_valid());
    }
}
