use sqlx::PgPool;

use crate::auth::today;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::membership;
use crate::models::{BookingDetail, ScheduleEntry};

/// Book a seat in a scheduled class.
///
/// The capacity check and the insert run inside one transaction that locks
/// the schedule row, so concurrent attempts against the same schedule are
/// serialized and a class can never be oversold. Double-booking is refused
/// here and additionally enforced by a partial unique index on
/// (user_id, schedule_id) WHERE status = 'booked'.
pub async fn attempt_booking(pool: &PgPool, user_id: i32, schedule_id: i32) -> AppResult<i32> {
    if membership::active_membership(pool, user_id).await?.is_none() {
        return Err(AppError::NoActiveMembership);
    }

    let mut tx = pool.begin().await?;

    // Locking the schedule row serializes bookings per schedule until commit.
    let capacity: Option<(i32,)> = sqlx::query_as(
        "SELECT c.capacity
         FROM schedules s
         JOIN classes c ON c.id = s.class_id
         WHERE s.id = $1
         FOR UPDATE OF s",
    )
    .bind(schedule_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((capacity,)) = capacity else {
        return Err(AppError::NotFound("Schedule"));
    };

    let (existing,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bookings
         WHERE user_id = $1 AND schedule_id = $2 AND status = 'booked'",
    )
    .bind(user_id)
    .bind(schedule_id)
    .fetch_one(&mut *tx)
    .await?;
    if existing > 0 {
        return Err(AppError::AlreadyBooked);
    }

    let (booked,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bookings WHERE schedule_id = $1 AND status = 'booked'",
    )
    .bind(schedule_id)
    .fetch_one(&mut *tx)
    .await?;
    if booked >= i64::from(capacity) {
        return Err(AppError::ClassFull);
    }

    let (booking_id,): (i32,) = sqlx::query_as(
        "INSERT INTO bookings (user_id, schedule_id, booking_date, status)
         VALUES ($1, $2, $3, 'booked')
         RETURNING id",
    )
    .bind(user_id)
    .bind(schedule_id)
    .bind(today())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    info!("user {user_id} booked schedule {schedule_id} (booking {booking_id})");
    db::log_activity(
        pool,
        "booking",
        &format!("user {user_id} booked schedule {schedule_id}"),
        Some(user_id),
    )
    .await;
    Ok(booking_id)
}

/// Cancel one of the user's bookings. Idempotent: only rows still in
/// `booked` are touched, so cancelling an already-cancelled booking changes
/// nothing and still reports success.
pub async fn cancel_booking(pool: &PgPool, user_id: i32, booking_id: i32) -> AppResult<()> {
    sqlx::query(
        "UPDATE bookings SET status = 'cancelled'
         WHERE id = $1 AND user_id = $2 AND status = 'booked'",
    )
    .bind(booking_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a schedule together with its bookings, all-or-nothing.
pub async fn delete_schedule(pool: &PgPool, schedule_id: i32) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM bookings WHERE schedule_id = $1")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Schedule"));
    }

    tx.commit().await?;
    Ok(())
}

/// Delete a class together with all of its schedules and their bookings,
/// all-or-nothing.
pub async fn delete_class(pool: &PgPool, class_id: i32) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM bookings
         WHERE schedule_id IN (SELECT id FROM schedules WHERE class_id = $1)",
    )
    .bind(class_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM schedules WHERE class_id = $1")
        .bind(class_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM classes WHERE id = $1")
        .bind(class_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Class"));
    }

    tx.commit().await?;
    info!("deleted class {class_id} with its schedules and bookings");
    Ok(())
}

/// Trainers with assigned classes cannot be removed; the check happens
/// before any mutation.
pub async fn delete_trainer(pool: &PgPool, trainer_id: i32) -> AppResult<()> {
    let (assigned,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM classes WHERE trainer_id = $1")
            .bind(trainer_id)
            .fetch_one(pool)
            .await?;
    if assigned > 0 {
        return Err(AppError::TrainerHasClasses);
    }

    let result = sqlx::query("DELETE FROM trainers WHERE id = $1")
        .bind(trainer_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Trainer"));
    }
    Ok(())
}

/// Every schedule of every active class, with trainer and live booked count,
/// ordered for the weekly timetable.
pub async fn weekly_schedule(pool: &PgPool) -> AppResult<Vec<ScheduleEntry>> {
    let entries = sqlx::query_as(
        "SELECT s.id, s.class_id, s.day_of_week, s.start_time, s.end_time, s.room,
                c.name AS class_name, c.capacity,
                t.name AS trainer_name,
                (SELECT COUNT(*) FROM bookings b
                 WHERE b.schedule_id = s.id AND b.status = 'booked') AS booked_count
         FROM schedules s
         JOIN classes c ON s.class_id = c.id
         LEFT JOIN trainers t ON c.trainer_id = t.id
         WHERE c.status = 'active'
         ORDER BY array_position(ARRAY['Monday','Tuesday','Wednesday','Thursday',
                                       'Friday','Saturday','Sunday'], s.day_of_week),
                  s.start_time",
    )
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

/// One page of a member's booking history, newest first.
pub async fn user_bookings(
    pool: &PgPool,
    user_id: i32,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<BookingDetail>> {
    let bookings = sqlx::query_as(
        "SELECT b.id, b.booking_date, b.status,
                c.name AS class_name, s.day_of_week, s.start_time, s.end_time, s.room,
                t.name AS trainer_name
         FROM bookings b
         JOIN schedules s ON b.schedule_id = s.id
         JOIN classes c ON s.class_id = c.id
         LEFT JOIN trainers t ON c.trainer_id = t.id
         WHERE b.user_id = $1
         ORDER BY b.booking_date DESC, s.start_time ASC
         LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(bookings)
}

pub async fn count_user_bookings(pool: &PgPool, user_id: i32) -> AppResult<i64> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(total)
}
