//! Postgres-backed CIAM repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::role::Role;
use super::secret::hash_api_key;
use crate::models::auth::{OneTimeSecret, UserLookup, UserRecord};
use crate::ports::{CiamRepository, RepositoryError};
use crate::uuid::uuidv7;

type UserRow = (String, Option<String>, Option<String>, bool, i16);

#[derive(Debug, Clone)]
pub struct PgCiamRepository {
    pool: PgPool,
}

impl PgCiamRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn role_from_db(role: i16) -> Result<Role, RepositoryError> {
    u8::try_from(role)
        .ok()
        .and_then(|id| Role::try_from(id).ok())
        .ok_or_else(|| RepositoryError::Integrity(format!("unknown role id {role}")))
}

/// User ids are UUIDs; anything else cannot name a stored user.
fn parse_user_id(user_id: &str) -> Option<Uuid> {
    Uuid::parse_str(user_id).ok()
}

#[async_trait]
impl CiamRepository for PgCiamRepository {
    async fn create_user(&self, user: &UserRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, email, fingerprint, is_active, role) \
             VALUES ($1::uuid, $2, $3, $4, $5)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.fingerprint)
        .bind(user.is_active)
        .bind(i16::from(user.role.id()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_user(&self, user_id: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let Some(id) = parse_user_id(user_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id::text, email, fingerprint, is_active, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(id, email, fingerprint, is_active, role)| {
            Ok(UserRecord {
                id,
                email,
                fingerprint,
                is_active,
                role: role_from_db(role)?,
            })
        })
        .transpose()
    }

    async fn lookup_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserLookup>, RepositoryError> {
        let row = sqlx::query_as::<_, (String, bool)>(
            "SELECT id::text, is_active FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, is_active)| UserLookup { id, is_active }))
    }

    async fn lookup_user_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<UserLookup>, RepositoryError> {
        let row = sqlx::query_as::<_, (String, bool)>(
            "SELECT id::text, is_active FROM users \
             WHERE fingerprint = $1 AND role = $2 \
             ORDER BY created_at LIMIT 1",
        )
        .bind(fingerprint)
        .bind(i16::from(Role::AnonymUser.id()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, is_active)| UserLookup { id, is_active }))
    }

    async fn update_user_set_active(&self, user_id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1::uuid")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::Integrity(format!("user {user_id} not found")));
        }
        Ok(())
    }

    async fn write_one_time_secret(&self, secret: &OneTimeSecret) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_auth_secrets (user_id, secret, issued_at) \
             VALUES ($1::uuid, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET secret = EXCLUDED.secret, issued_at = EXCLUDED.issued_at",
        )
        .bind(&secret.user_id)
        .bind(&secret.secret)
        .bind(secret.issued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_one_time_secret(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimeSecret>, RepositoryError> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT secret, issued_at FROM user_auth_secrets WHERE user_id = $1::uuid",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(secret, issued_at)| OneTimeSecret {
            user_id: user_id.to_string(),
            secret,
            issued_at,
        }))
    }

    async fn delete_one_time_secret(
        &self,
        user_id: &str,
        secret: &str,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM user_auth_secrets WHERE user_id = $1::uuid AND secret = $2")
                .bind(user_id)
                .bind(secret)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_daily_successful_results_timestamps(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, RepositoryError> {
        let rows = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT created_at FROM successful_requests \
             WHERE user_id = $1::uuid AND created_at >= $2 \
             ORDER BY created_at",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_active_user_id_by_active_token_id(
        &self,
        token: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT u.id::text FROM api_tokens t \
             JOIN users u ON u.id = t.user_id \
             WHERE t.token_hash = $1 AND t.is_active AND u.is_active",
        )
        .bind(hash_api_key(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_successful_request(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO successful_requests (id, user_id, created_at) VALUES ($1, $2::uuid, $3)",
        )
        .bind(uuidv7())
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ids_from_db() {
        assert_eq!(role_from_db(0).unwrap(), Role::AnonymUser);
        assert_eq!(role_from_db(1).unwrap(), Role::RegisteredUser);
        assert!(matches!(role_from_db(9), Err(RepositoryError::Integrity(_))));
        assert!(matches!(role_from_db(-1), Err(RepositoryError::Integrity(_))));
    }

    #[test]
    fn non_uuid_user_ids_are_not_queried() {
        assert!(parse_user_id("ghost").is_none());
        assert!(parse_user_id("").is_none());
        assert!(parse_user_id("0c3c5a6e-97a4-4a47-9c0d-3f1b5a1c2d3e").is_some());
    }
}
