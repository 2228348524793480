use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppResult;

/// Connect to Postgres and run any pending migrations.
pub async fn connect(config: &Config) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await.map_err(sqlx::Error::from)?;
    Ok(pool)
}

/// Best-effort activity trail. A failed insert must never fail the calling
/// flow, so the error is logged and swallowed here.
pub async fn log_activity(pool: &PgPool, action: &str, details: &str, user_id: Option<i32>) {
    let result = sqlx::query(
        "INSERT INTO activity_logs (action, details, user_id) VALUES ($1, $2, $3)",
    )
    .bind(action)
    .bind(details)
    .bind(user_id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        error!("failed to record activity {action:?}: {e}");
    }
}
