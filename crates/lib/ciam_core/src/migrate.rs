//! Database migrations embedded from `ciam_core/migrations/`.

use sqlx::PgPool;

/// Bring the CIAM schema up to date.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
