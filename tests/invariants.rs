//! Database-backed invariant tests.
//!
//! These run against a real Postgres pointed at by DATABASE_URL and are
//! ignored by default so the unit suite stays green without one:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/fitclub_test cargo test -- --ignored
//! ```

use chrono::NaiveTime;
use fitclub::admin::{self, ClassUpdate, TrainerUpdate};
use fitclub::auth::{self, ProfileUpdate, Registration};
use fitclub::booking;
use fitclub::error::AppError;
use fitclub::membership;
use fitclub::Config;
use sqlx::PgPool;
use uuid::Uuid;

async fn pool() -> PgPool {
    let config = Config::from_env().expect("DATABASE_URL must point at a test database");
    fitclub::db::connect(&config).await.expect("connect + migrate")
}

async fn create_user(pool: &PgPool) -> i32 {
    let email = format!("{}@test.invalid", Uuid::new_v4().simple());
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO users (name, email, password, role, status)
         VALUES ('Test Member', $1, 'x', 'member', 'active') RETURNING id",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

async fn create_plan(pool: &PgPool, duration: i32) -> i32 {
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO membership_plans (name, duration, price, status)
         VALUES ('Test Plan', $1, 29.99, 'active') RETURNING id",
    )
    .bind(duration)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

async fn create_member_with_plan(pool: &PgPool) -> i32 {
    let user_id = create_user(pool).await;
    let plan_id = create_plan(pool, 12).await;
    membership::purchase_plan(pool, user_id, plan_id).await.unwrap();
    user_id
}

async fn create_class(pool: &PgPool, capacity: i32) -> i32 {
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO classes (name, duration, capacity, status)
         VALUES ('Test Class', 60, $1, 'active') RETURNING id",
    )
    .bind(capacity)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

async fn create_schedule(pool: &PgPool, class_id: i32) -> i32 {
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO schedules (class_id, day_of_week, start_time, end_time, room)
         VALUES ($1, 'Monday', '09:00', '10:00', 'Studio A') RETURNING id",
    )
    .bind(class_id)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

async fn create_trainer(pool: &PgPool) -> (i32, String) {
    let email = format!("{}@test.invalid", Uuid::new_v4().simple());
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO trainers (name, email, status)
         VALUES ('Test Trainer', $1, 'active') RETURNING id",
    )
    .bind(&email)
    .fetch_one(pool)
    .await
    .unwrap();
    (id, email)
}

async fn booked_count(pool: &PgPool, schedule_id: i32) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bookings WHERE schedule_id = $1 AND status = 'booked'",
    )
    .bind(schedule_id)
    .fetch_one(pool)
    .await
    .unwrap();
    count
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn capacity_holds_under_concurrent_booking_attempts() {
    let pool = pool().await;
    let class_id = create_class(&pool, 1).await;
    let schedule_id = create_schedule(&pool, class_id).await;

    let mut users = Vec::new();
    for _ in 0..8 {
        users.push(create_member_with_plan(&pool).await);
    }

    let mut tasks = Vec::new();
    for user_id in users {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            booking::attempt_booking(&pool, user_id, schedule_id).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1, "exactly one booking may win a 1-seat class");
    assert_eq!(booked_count(&pool, schedule_id).await, 1);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn booking_without_membership_is_refused_with_no_row() {
    let pool = pool().await;
    let user_id = create_user(&pool).await;
    let class_id = create_class(&pool, 10).await;
    let schedule_id = create_schedule(&pool, class_id).await;

    let err = booking::attempt_booking(&pool, user_id, schedule_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoActiveMembership));
    assert_eq!(booked_count(&pool, schedule_id).await, 0);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn full_class_rejects_the_next_attempt() {
    let pool = pool().await;
    let class_id = create_class(&pool, 2).await;
    let schedule_id = create_schedule(&pool, class_id).await;

    for _ in 0..2 {
        let user_id = create_member_with_plan(&pool).await;
        booking::attempt_booking(&pool, user_id, schedule_id).await.unwrap();
    }

    let late_user = create_member_with_plan(&pool).await;
    let err = booking::attempt_booking(&pool, late_user, schedule_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ClassFull));
    assert_eq!(booked_count(&pool, schedule_id).await, 2);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn double_booking_the_same_schedule_is_refused() {
    let pool = pool().await;
    let user_id = create_member_with_plan(&pool).await;
    let class_id = create_class(&pool, 10).await;
    let schedule_id = create_schedule(&pool, class_id).await;

    booking::attempt_booking(&pool, user_id, schedule_id).await.unwrap();
    let err = booking::attempt_booking(&pool, user_id, schedule_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyBooked));
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn cancelling_twice_is_a_no_op() {
    let pool = pool().await;
    let user_id = create_member_with_plan(&pool).await;
    let class_id = create_class(&pool, 10).await;
    let schedule_id = create_schedule(&pool, class_id).await;
    let booking_id = booking::attempt_booking(&pool, user_id, schedule_id).await.unwrap();

    booking::cancel_booking(&pool, user_id, booking_id).await.unwrap();
    booking::cancel_booking(&pool, user_id, booking_id).await.unwrap();

    let (status,): (String,) = sqlx::query_as("SELECT status FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "cancelled");
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn at_most_one_active_membership_per_user() {
    let pool = pool().await;
    let user_id = create_user(&pool).await;
    let plan_a = create_plan(&pool, 3).await;
    let plan_b = create_plan(&pool, 12).await;

    membership::purchase_plan(&pool, user_id, plan_a).await.unwrap();

    // The public purchase flow refuses while a membership is live.
    let err = membership::purchase_plan(&pool, user_id, plan_b).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyActive));

    // The upgrade flow supersedes instead.
    membership::change_plan(&pool, user_id, plan_b).await.unwrap();

    let (active,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_memberships WHERE user_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active, 1);

    let current = membership::active_membership(&pool, user_id).await.unwrap().unwrap();
    assert_eq!(current.plan_id, plan_b);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn deleting_a_class_removes_all_schedules_and_bookings() {
    let pool = pool().await;
    let class_id = create_class(&pool, 10).await;
    let first = create_schedule(&pool, class_id).await;
    let second = create_schedule(&pool, class_id).await;

    for schedule_id in [first, second] {
        let user_id = create_member_with_plan(&pool).await;
        booking::attempt_booking(&pool, user_id, schedule_id).await.unwrap();
    }

    booking::delete_class(&pool, class_id).await.unwrap();

    let (schedules,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM schedules WHERE class_id = $1")
            .bind(class_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(schedules, 0);

    let (bookings,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bookings WHERE schedule_id IN ($1, $2)",
    )
    .bind(first)
    .bind(second)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(bookings, 0);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn trainer_with_assigned_classes_cannot_be_deleted() {
    let pool = pool().await;
    let email = format!("{}@test.invalid", Uuid::new_v4().simple());
    let (trainer_id,): (i32,) = sqlx::query_as(
        "INSERT INTO trainers (name, email, status)
         VALUES ('Test Trainer', $1, 'active') RETURNING id",
    )
    .bind(email)
    .fetch_one(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO classes (name, duration, capacity, trainer_id, status)
         VALUES ('Assigned Class', 45, 10, $1, 'active')",
    )
    .bind(trainer_id)
    .execute(&pool)
    .await
    .unwrap();

    let err = booking::delete_trainer(&pool, trainer_id).await.unwrap_err();
    assert!(matches!(err, AppError::TrainerHasClasses));

    // Refused before any mutation: the trainer row is still there.
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trainers WHERE id = $1")
        .bind(trainer_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn rejected_profile_update_writes_nothing() {
    let pool = pool().await;
    let email = format!("{}@test.invalid", Uuid::new_v4().simple());
    let user_id = auth::register(
        &pool,
        "test-pepper",
        Registration {
            name: "Original Name".into(),
            email: email.clone(),
            password: "password123".into(),
            confirm_password: "password123".into(),
            phone: None,
            membership_plan: None,
        },
    )
    .await
    .unwrap();

    // A too-short password must fail the whole update, not just its half.
    let err = auth::update_profile(
        &pool,
        "test-pepper",
        user_id,
        ProfileUpdate {
            name: "Changed Name".into(),
            email: email.clone(),
            phone: Some("0123456789".into()),
            password: Some("short".into()),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let (name, phone): (String, Option<String>) =
        sqlx::query_as("SELECT name, phone FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "Original Name");
    assert_eq!(phone, None);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn concurrent_purchases_leave_one_active_membership() {
    let pool = pool().await;
    let user_id = create_user(&pool).await;
    let plan_id = create_plan(&pool, 12).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            membership::purchase_plan(&pool, user_id, plan_id).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1, "exactly one purchase may win");

    let (active,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_memberships WHERE user_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active, 1);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn editing_a_class_reassigns_and_unassigns_its_trainer() {
    let pool = pool().await;
    let (trainer_a, _) = create_trainer(&pool).await;
    let (trainer_b, _) = create_trainer(&pool).await;
    let (class_id,): (i32,) = sqlx::query_as(
        "INSERT INTO classes (name, duration, capacity, trainer_id, status)
         VALUES ('Test Class', 60, 10, $1, 'active') RETURNING id",
    )
    .bind(trainer_a)
    .fetch_one(&pool)
    .await
    .unwrap();

    let update = |trainer_id| ClassUpdate {
        id: class_id,
        name: "Test Class".into(),
        description: None,
        duration: 45,
        capacity: 12,
        trainer_id,
        image: None,
    };

    admin::update_class(&pool, update(Some(trainer_b))).await.unwrap();
    let (tid, capacity): (Option<i32>, i32) =
        sqlx::query_as("SELECT trainer_id, capacity FROM classes WHERE id = $1")
            .bind(class_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(tid, Some(trainer_b));
    assert_eq!(capacity, 12);

    admin::update_class(&pool, update(None)).await.unwrap();
    let (tid,): (Option<i32>,) =
        sqlx::query_as("SELECT trainer_id FROM classes WHERE id = $1")
            .bind(class_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(tid, None);
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn trainer_email_collisions_are_refused() {
    let pool = pool().await;
    let (_, taken_email) = create_trainer(&pool).await;
    let (other_id, other_email) = create_trainer(&pool).await;

    // The add flow sees the address as taken before inserting.
    assert!(admin::trainer_email_taken(&pool, &taken_email, None).await.unwrap());

    let update = |email: &str| TrainerUpdate {
        id: other_id,
        name: "Test Trainer".into(),
        email: email.to_string(),
        phone: None,
        specialization: Some("Yoga".into()),
        bio: None,
        photo: None,
    };

    // Moving onto someone else's address is refused.
    let err = admin::update_trainer(&pool, update(&taken_email)).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateEmail));

    // Keeping your own address is not a collision.
    admin::update_trainer(&pool, update(&other_email)).await.unwrap();
    let (spec,): (Option<String>,) =
        sqlx::query_as("SELECT specialization FROM trainers WHERE id = $1")
            .bind(other_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(spec.as_deref(), Some("Yoga"));
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn editing_a_schedule_moves_the_slot() {
    let pool = pool().await;
    let class_id = create_class(&pool, 10).await;
    let schedule_id = create_schedule(&pool, class_id).await;

    admin::update_schedule(
        &pool,
        schedule_id,
        "Friday",
        NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        "Studio B",
    )
    .await
    .unwrap();

    let (day, start, room): (String, NaiveTime, String) = sqlx::query_as(
        "SELECT day_of_week, start_time, room FROM schedules WHERE id = $1",
    )
    .bind(schedule_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(day, "Friday");
    assert_eq!(start, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
    assert_eq!(room, "Studio B");
}

#[tokio::test]
#[ignore = "requires a running postgres; set DATABASE_URL"]
async fn plan_with_active_members_cannot_be_deleted() {
    let pool = pool().await;
    let user_id = create_user(&pool).await;
    let plan_id = create_plan(&pool, 6).await;
    membership::purchase_plan(&pool, user_id, plan_id).await.unwrap();

    let err = membership::delete_plan(&pool, plan_id).await.unwrap_err();
    assert!(matches!(err, AppError::PlanInUse));
}
