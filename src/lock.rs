use std::time::Duration;

use sqlx::PgConnection;
use tracing::{debug, instrument};

use crate::error::OutboxError;
use crate::models::BusinessType;

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Blocks until the lock row for `business_type` is held by the current
/// transaction, or `timeout` elapses.
///
/// There is no release: the row lock is dropped by Postgres when the
/// surrounding transaction commits or rolls back. Must be called on a
/// connection that is inside a transaction, otherwise the lock is released
/// as soon as the statement finishes.
#[instrument(skip(conn), fields(business_type = %business_type))]
pub async fn acquire_for_update(
    conn: &mut PgConnection,
    business_type: BusinessType,
    timeout: Duration,
) -> Result<(), OutboxError> {
    // `SET LOCAL` takes no bind parameters, set_config(.., true) is the same thing.
    sqlx::query("SELECT set_config('lock_timeout', $1, true)")
        .bind(format!("{}ms", timeout.as_millis().max(1)))
        .execute(&mut *conn)
        .await?;

    let locked = sqlx::query_scalar::<_, BusinessType>(
        r#"
        SELECT business_type
        FROM core.outbox_lock
        WHERE business_type = $1
        FOR UPDATE
        "#,
    )
        .bind(business_type)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_lock_error(e, business_type, timeout))?;

    match locked {
        Some(_) => {
            debug!("Lock acquired.");
            Ok(())
        }
        None => Err(OutboxError::LockNotProvisioned(business_type)),
    }
}

fn map_lock_error(err: sqlx::Error, business_type: BusinessType, waited: Duration) -> OutboxError {
    let timed_out = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == LOCK_NOT_AVAILABLE);

    if timed_out {
        OutboxError::LockTimeout { business_type, waited }
    } else {
        OutboxError::Persistence(err)
    }
}

/// Inserts lock rows for the given business types. Run once at startup when
/// `PROVISION_LOCK_ROWS` is set; the dispatch cycle never creates them.
pub async fn provision_lock_rows(
    conn: &mut PgConnection,
    business_types: &[BusinessType],
) -> Result<(), OutboxError> {
    for business_type in business_types {
        sqlx::query(
            r#"
            INSERT INTO core.outbox_lock (business_type)
            VALUES ($1)
            ON CONFLICT (business_type) DO NOTHING
            "#,
        )
            .bind(*business_type)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
