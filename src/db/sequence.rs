use sqlx::PgConnection;

/// Next value of a named counter.
///
/// The counter row is locked with `FOR UPDATE` before it is incremented, so
/// concurrent callers in different transactions never observe the same value.
/// Must be called inside a transaction; the lock is held until it ends.
pub async fn next_value(conn: &mut PgConnection, name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT INTO sequence_counter (name, value) VALUES ($1, 0) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(&mut *conn)
        .await?;

    let current = sqlx::query_scalar::<_, i64>(
        "SELECT value FROM sequence_counter WHERE name = $1 FOR UPDATE",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    let next = current + 1;
    sqlx::query("UPDATE sequence_counter SET value = $2 WHERE name = $1")
        .bind(name)
        .bind(next)
        .execute(conn)
        .await?;

    tracing::debug!(counter = name, value = next, "sequence advanced");
    Ok(next)
}
