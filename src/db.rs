//! Database module
//!
//! Connectivity and schema checks. The schema itself is applied from the
//! SQL files in migrations/.

use sqlx::PgPool;

/// Tables the service reads and writes
const REQUIRED_TABLES: [&str; 4] = ["accounts", "transactions", "stream_messages", "consumer_offsets"];

/// Constraints that back the one-account-per-holder and unique-number rules
const REQUIRED_CONSTRAINTS: [&str; 2] = [
    "accounts_account_holder_id_key",
    "accounts_account_number_key",
];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables and unique constraints exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    for constraint in REQUIRED_CONSTRAINTS {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.table_constraints
                WHERE table_schema = 'public'
                  AND table_name = 'accounts'
                  AND constraint_name = $1
                  AND constraint_type = 'UNIQUE'
            )
            "#,
        )
        .bind(constraint)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(
                "Required unique constraint '{}' is missing on accounts",
                constraint
            );
            return Ok(false);
        }
    }

    tracing::info!("Database schema verified");
    Ok(true)
}
