//! Postgres-backed store.
//!
//! Atomicity comes from single statements: token redemption is
//! `DELETE ... RETURNING`, and every session-set mutation is one `UPDATE`
//! over the array column, so concurrent callers serialize on the row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::theme::CustomTheme;
use crate::auth::token::{EphemeralToken, TokenPayload, TokenPurpose};

use super::{CreateOutcome, TokenStore, UserRecord, UserStore, WriteOutcome};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the pool settings the service runs with.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("failed to connect to database")?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = %operation,
        db.statement = %statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<UserRecord> {
    let custom_themes: String = row.get("custom_themes");
    let custom_themes: Vec<CustomTheme> =
        serde_json::from_str(&custom_themes).context("malformed custom_themes column")?;
    Ok(UserRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_verified: row.get("is_verified"),
        active_sessions: row.get("active_sessions"),
        theme: row.get("theme"),
        custom_themes,
        created_at: row.get("created_at"),
    })
}

const USER_COLUMNS: &str = r"
    id, name, email, password_hash, is_verified, active_sessions,
    theme, custom_themes::text AS custom_themes, created_at
";

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: UserRecord) -> Result<CreateOutcome> {
        let query = r"
            INSERT INTO users
                (id, name, email, password_hash, is_verified, active_sessions,
                 theme, custom_themes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb, $9)
        ";
        let custom_themes =
            serde_json::to_string(&user.custom_themes).context("serialize custom_themes")?;
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.is_verified)
            .bind(&user.active_sessions)
            .bind(&user.theme)
            .bind(custom_themes)
            .bind(user.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::DuplicateEmail),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by email")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_name(&self, id: Uuid, name: &str) -> Result<bool> {
        let query = "UPDATE users SET name = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update name")?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit_email(&self, id: Uuid, email: &str) -> Result<WriteOutcome> {
        let query = "UPDATE users SET email = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(email)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(WriteOutcome::Applied),
            Ok(_) => Ok(WriteOutcome::Missing),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
            Err(err) => Err(err).context("failed to commit email change"),
        }
    }

    async fn update_password(&self, id: Uuid, hash: &str, mark_verified: bool) -> Result<bool> {
        let query = r"
            UPDATE users
            SET password_hash = $2,
                is_verified = is_verified OR $3
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(hash)
            .bind(mark_verified)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_session(&self, id: Uuid, jti: &str) -> Result<bool> {
        let query = r"
            UPDATE users
            SET active_sessions = array_append(active_sessions, $2)
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(jti)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to append session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_session(&self, id: Uuid, jti: &str) -> Result<bool> {
        let query = r"
            UPDATE users
            SET active_sessions = array_remove(active_sessions, $2)
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(jti)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to remove session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn retain_session(&self, id: Uuid, jti: &str) -> Result<bool> {
        let query = "UPDATE users SET active_sessions = ARRAY[$2] WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(jti)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to retain session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_sessions(&self, id: Uuid) -> Result<bool> {
        let query = "UPDATE users SET active_sessions = '{}' WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to clear sessions")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_themes(
        &self,
        id: Uuid,
        theme: &str,
        custom_themes: &[CustomTheme],
    ) -> Result<bool> {
        let query = "UPDATE users SET theme = $2, custom_themes = $3::jsonb WHERE id = $1";
        let custom_themes =
            serde_json::to_string(custom_themes).context("serialize custom_themes")?;
        let result = sqlx::query(query)
            .bind(id)
            .bind(theme)
            .bind(custom_themes)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update themes")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<UserRecord>> {
        let query = format!(
            r"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::uuid IS NULL OR id > $1)
            ORDER BY id ASC
            LIMIT $2
            "
        );
        let rows = sqlx::query(&query)
            .bind(after)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list users")?;
        rows.iter().map(user_from_row).collect()
    }
}

fn token_from_row(row: &sqlx::postgres::PgRow) -> Result<EphemeralToken> {
    let purpose: String = row.get("purpose");
    let purpose = TokenPurpose::parse(&purpose)
        .with_context(|| format!("unknown token purpose {purpose:?}"))?;
    let pending_email: Option<String> = row.get("pending_email");
    let captcha_answer: Option<i64> = row.get("captcha_answer");
    let payload = match (pending_email, captcha_answer) {
        (Some(email), _) => TokenPayload::PendingEmail(email),
        (None, Some(answer)) => TokenPayload::CaptchaAnswer(answer),
        (None, None) => TokenPayload::None,
    };
    let expires_at: DateTime<Utc> = row.get("expires_at");
    Ok(EphemeralToken {
        purpose,
        owner: row.get("owner_id"),
        payload,
        expires_at,
    })
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, id_hash: Vec<u8>, token: EphemeralToken) -> Result<()> {
        let query = r"
            INSERT INTO ephemeral_tokens
                (token_hash, purpose, owner_id, pending_email, captcha_answer, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let pending_email = token.payload.pending_email().map(ToString::to_string);
        let captcha_answer = token.payload.captcha_answer();
        sqlx::query(query)
            .bind(id_hash)
            .bind(token.purpose.as_str())
            .bind(token.owner)
            .bind(pending_email)
            .bind(captcha_answer)
            .bind(token.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert ephemeral token")?;
        Ok(())
    }

    async fn redeem(
        &self,
        id_hash: &[u8],
        purposes: &[TokenPurpose],
    ) -> Result<Option<EphemeralToken>> {
        // Delete-returning makes the read-and-consume a single atomic
        // statement; losers of a concurrent race see zero rows.
        let query = r"
            DELETE FROM ephemeral_tokens
            WHERE token_hash = $1
              AND purpose = ANY($2)
              AND expires_at > NOW()
            RETURNING purpose, owner_id, pending_email, captcha_answer, expires_at
        ";
        let purposes: Vec<String> = purposes
            .iter()
            .map(|purpose| purpose.as_str().to_string())
            .collect();
        let row = sqlx::query(query)
            .bind(id_hash)
            .bind(purposes)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to redeem ephemeral token")?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn peek(&self, id_hash: &[u8]) -> Result<Option<EphemeralToken>> {
        let query = r"
            SELECT purpose, owner_id, pending_email, captcha_answer, expires_at
            FROM ephemeral_tokens
            WHERE token_hash = $1
              AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(id_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to peek ephemeral token")?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = "DELETE FROM ephemeral_tokens WHERE expires_at <= NOW()";
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to purge expired tokens")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
