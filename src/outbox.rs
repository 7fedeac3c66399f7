use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use crate::error::OutboxError;
use crate::models::{now_micros, BusinessType, DeadLetter, OutboxMessage};

/// Rows per INSERT statement; 3 binds per row keeps us well under the
/// 65535 bind parameter limit.
const MAX_ROWS_PER_INSERT: usize = 1000;

/// Stages one outbox row per payload for `business_type`.
///
/// Must be called inside the transaction that mutates the business data the
/// messages announce, before it commits. On error the caller's transaction
/// must be rolled back. An empty `payloads` is a no-op.
#[instrument(skip(conn, payloads), fields(business_type = %business_type, count = payloads.len()))]
pub async fn enqueue<P: AsRef<[u8]>>(
    conn: &mut PgConnection,
    business_type: BusinessType,
    payloads: &[P],
) -> Result<(), OutboxError> {
    if payloads.is_empty() {
        return Ok(());
    }

    let created_at = now_micros();

    for chunk in payloads.chunks(MAX_ROWS_PER_INSERT) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO core.outbox_message (business_type, payload, created_at) ",
        );
        builder.push_values(chunk, |mut row, payload| {
            row.push_bind(business_type)
                .push_bind(payload.as_ref().to_vec())
                .push_bind(created_at);
        });

        builder.build().execute(&mut *conn).await?;
    }

    debug!("Messages enqueued.");
    Ok(())
}

/// Returns the head of the queue for `business_type`.
///
/// Only meaningful after the caller holds the business type's lock row in
/// the same transaction.
#[instrument(skip(conn), fields(business_type = %business_type))]
pub async fn peek_oldest(
    conn: &mut PgConnection,
    business_type: BusinessType,
) -> Result<Option<OutboxMessage>, OutboxError> {
    let message = sqlx::query_as::<_, OutboxMessage>(
        r#"
        SELECT id, business_type, payload, created_at, attempts
        FROM core.outbox_message
        WHERE business_type = $1
        ORDER BY created_at, id
        LIMIT 1
        "#,
    )
        .bind(business_type)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(message)
}

/// Removes a delivered message. Deleting an id that is already gone is not an error.
#[instrument(skip(conn))]
pub async fn delete_by_id(conn: &mut PgConnection, id: i64) -> Result<(), OutboxError> {
    let result = sqlx::query("DELETE FROM core.outbox_message WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        debug!("Message was already deleted.");
    }

    Ok(())
}

/// Bumps the attempt counter of a message whose publish failed and returns
/// the new count. Returns 0 when the row no longer exists.
#[instrument(skip(conn, error))]
pub async fn record_failed_attempt(
    conn: &mut PgConnection,
    id: i64,
    error: &str,
) -> Result<i32, OutboxError> {
    let attempts = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE core.outbox_message
        SET attempts = attempts + 1,
            last_error = $2
        WHERE id = $1
        RETURNING attempts
        "#,
    )
        .bind(id)
        .bind(error)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(attempts.unwrap_or(0))
}

/// Moves a message from the queue into `core.outbox_dead_letter` in one statement.
#[instrument(skip(conn, error))]
pub async fn move_to_dead_letter(
    conn: &mut PgConnection,
    id: i64,
    error: &str,
) -> Result<(), OutboxError> {
    sqlx::query(
        r#"
        WITH moved AS (
            DELETE FROM core.outbox_message
            WHERE id = $1
            RETURNING id, business_type, payload, created_at, attempts
        )
        INSERT INTO core.outbox_dead_letter
            (message_id, business_type, payload, created_at, attempts, last_error)
        SELECT id, business_type, payload, created_at, attempts, $2
        FROM moved
        "#,
    )
        .bind(id)
        .bind(error)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Number of messages waiting for `business_type`.
pub async fn pending_count(
    conn: &mut PgConnection,
    business_type: BusinessType,
) -> Result<i64, OutboxError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM core.outbox_message WHERE business_type = $1",
    )
        .bind(business_type)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}

/// Dead letters for `business_type`, oldest first.
pub async fn list_dead_letters(
    conn: &mut PgConnection,
    business_type: BusinessType,
    limit: i64,
) -> Result<Vec<DeadLetter>, OutboxError> {
    let dead_letters = sqlx::query_as::<_, DeadLetter>(
        r#"
        SELECT id, message_id, business_type, payload, created_at, attempts, last_error, dead_lettered_at
        FROM core.outbox_dead_letter
        WHERE business_type = $1
        ORDER BY dead_lettered_at, id
        LIMIT $2
        "#,
    )
        .bind(business_type)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

    Ok(dead_letters)
}

/// Puts a dead letter back on its queue, at the tail with a fresh timestamp
/// and a reset attempt counter. Returns the new message id, or `None` if the
/// dead letter does not exist.
#[instrument(skip(conn))]
pub async fn requeue_dead_letter(
    conn: &mut PgConnection,
    dead_letter_id: i64,
) -> Result<Option<i64>, OutboxError> {
    let message_id = sqlx::query_scalar::<_, i64>(
        r#"
        WITH revived AS (
            DELETE FROM core.outbox_dead_letter
            WHERE id = $1
            RETURNING business_type, payload
        )
        INSERT INTO core.outbox_message (business_type, payload, created_at)
        SELECT business_type, payload, $2
        FROM revived
        RETURNING id
        "#,
    )
        .bind(dead_letter_id)
        .bind(now_micros())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(message_id)
}
