use chrono::{Months, NaiveDate};
use sqlx::{PgPool, Postgres, Transaction};

use crate::auth::today;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{MembershipDetail, UserMembership};

/// Membership expiry: start date plus the plan's commitment in months,
/// clamped to the last day of the month when the start day does not exist
/// in the target month (e.g. Jan 31 + 1 month = Feb 28/29).
pub fn expiry_date(start: NaiveDate, months: i32) -> NaiveDate {
    start
        .checked_add_months(Months::new(months.max(0) as u32))
        .unwrap_or(start)
}

/// The user's current membership, if it is active and unexpired.
pub async fn active_membership(
    pool: &PgPool,
    user_id: i32,
) -> AppResult<Option<UserMembership>> {
    let membership = sqlx::query_as(
        "SELECT * FROM user_memberships
         WHERE user_id = $1 AND status = 'active' AND end_date >= $2",
    )
    .bind(user_id)
    .bind(today())
    .fetch_optional(pool)
    .await?;
    Ok(membership)
}

/// Active membership joined with its plan, for the member dashboard.
pub async fn membership_detail(
    pool: &PgPool,
    user_id: i32,
) -> AppResult<Option<MembershipDetail>> {
    let detail = sqlx::query_as(
        "SELECT um.id, um.plan_id, um.start_date, um.end_date, um.status,
                mp.name AS plan_name, mp.price
         FROM user_memberships um
         JOIN membership_plans mp ON um.plan_id = mp.id
         WHERE um.user_id = $1 AND um.status = 'active'",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(detail)
}

/// Insert a new active membership inside an open transaction. End date is
/// always derived from the plan's stored duration.
pub async fn insert_membership(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    plan_id: i32,
) -> AppResult<i32> {
    let duration: Option<(i32,)> =
        sqlx::query_as("SELECT duration FROM membership_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&mut **tx)
            .await?;
    let Some((duration,)) = duration else {
        return Err(AppError::NotFound("Membership plan"));
    };

    let start = today();
    let end = expiry_date(start, duration);

    // The partial unique index on (user_id) WHERE status = 'active' is the
    // backstop for concurrent purchases: the loser of the race surfaces here
    // as a constraint violation rather than a second active row.
    let inserted: Result<(i32,), sqlx::Error> = sqlx::query_as(
        "INSERT INTO user_memberships (user_id, plan_id, start_date, end_date, status)
         VALUES ($1, $2, $3, $4, 'active')
         RETURNING id",
    )
    .bind(user_id)
    .bind(plan_id)
    .bind(start)
    .bind(end)
    .fetch_one(&mut **tx)
    .await;

    match inserted {
        Ok((id,)) => Ok(id),
        Err(sqlx::Error::Database(e))
            if e.constraint() == Some("user_memberships_one_active_per_user") =>
        {
            Err(AppError::AlreadyActive)
        }
        Err(e) => Err(e.into()),
    }
}

/// Public pricing-page flow: refuse while an unexpired active membership
/// exists, otherwise create the new one.
pub async fn purchase_plan(pool: &PgPool, user_id: i32, plan_id: i32) -> AppResult<i32> {
    if active_membership(pool, user_id).await?.is_some() {
        return Err(AppError::AlreadyActive);
    }

    let mut tx = pool.begin().await?;
    let id = insert_membership(&mut tx, user_id, plan_id).await?;
    tx.commit().await?;

    db::log_activity(
        pool,
        "membership_purchase",
        &format!("user {user_id} purchased plan {plan_id}"),
        Some(user_id),
    )
    .await;
    Ok(id)
}

/// Member upgrade/renewal flow: supersede whatever is active in the same
/// transaction that activates the new membership, so the one-active-per-user
/// invariant holds even mid-change.
pub async fn change_plan(pool: &PgPool, user_id: i32, plan_id: i32) -> AppResult<i32> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE user_memberships SET status = 'expired'
         WHERE user_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    let id = insert_membership(&mut tx, user_id, plan_id).await?;
    tx.commit().await?;

    db::log_activity(
        pool,
        "membership_change",
        &format!("user {user_id} switched to plan {plan_id}"),
        Some(user_id),
    )
    .await;
    Ok(id)
}

/// Plans with live members cannot be removed.
pub async fn delete_plan(pool: &PgPool, plan_id: i32) -> AppResult<()> {
    let (active_members,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_memberships WHERE plan_id = $1 AND status = 'active'",
    )
    .bind(plan_id)
    .fetch_one(pool)
    .await?;

    if active_members > 0 {
        return Err(AppError::PlanInUse);
    }

    let result = sqlx::query("DELETE FROM membership_plans WHERE id = $1")
        .bind(plan_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Membership plan"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn expiry_adds_plan_duration_in_months() {
        assert_eq!(expiry_date(date(2025, 3, 15), 1), date(2025, 4, 15));
        assert_eq!(expiry_date(date(2025, 3, 15), 12), date(2026, 3, 15));
        assert_eq!(expiry_date(date(2025, 11, 30), 3), date(2026, 2, 28));
    }

    #[test]
    fn expiry_clamps_at_month_end() {
        assert_eq!(expiry_date(date(2025, 1, 31), 1), date(2025, 2, 28));
        assert_eq!(expiry_date(date(2024, 1, 31), 1), date(2024, 2, 29));
        assert_eq!(expiry_date(date(2025, 8, 31), 1), date(2025, 9, 30));
    }

    #[test]
    fn expiry_with_nonpositive_duration_is_the_start_date() {
        assert_eq!(expiry_date(date(2025, 3, 15), 0), date(2025, 3, 15));
        assert_eq!(expiry_date(date(2025, 3, 15), -2), date(2025, 3, 15));
    }
}
