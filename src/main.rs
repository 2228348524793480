use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use dotenvy::dotenv;

use fitclub::session::{session_middleware, SessionStore};
use fitclub::{admin, db, pages, AppState, Config};

extern crate pretty_env_logger;
#[macro_use]
extern crate log;

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();

    let config = Config::from_env().expect("DATABASE_URL not set");
    let pool = db::connect(&config)
        .await
        .expect("Failed to connect to DB");

    let state = AppState {
        pool,
        sessions: SessionStore::new(),
        config: Arc::new(config),
    };

    // The multipart ceiling leaves headroom over the 5MB image limit for the
    // rest of the form body.
    let body_limit = state.config.max_upload_bytes + 64 * 1024;

    let app = Router::new()
        .route("/", get(pages::home))
        .route("/login", get(pages::login_page).post(pages::login_submit))
        .route("/register", get(pages::register_page).post(pages::register_submit))
        .route("/logout", post(pages::logout))
        .route("/schedule", get(pages::schedule_page))
        .route("/schedule/book", post(pages::book_class))
        .route("/pricing", get(pages::pricing_page))
        .route("/pricing/purchase", post(pages::purchase_plan))
        .route("/member/bookings", get(pages::my_bookings))
        .route("/member/bookings/cancel", post(pages::cancel_booking))
        .route("/member/membership", get(pages::membership_page).post(pages::change_membership))
        .route("/member/profile", get(pages::profile_page).post(pages::update_profile))
        .route("/admin/trainers", get(admin::trainers_page))
        .route("/admin/trainers/add", post(admin::add_trainer))
        .route("/admin/trainers/edit", post(admin::edit_trainer))
        .route("/admin/trainers/delete", post(admin::delete_trainer))
        .route("/admin/trainers/status", post(admin::trainer_status))
        .route("/admin/classes", get(admin::classes_page))
        .route("/admin/classes/add", post(admin::add_class))
        .route("/admin/classes/edit", post(admin::edit_class))
        .route("/admin/classes/delete", post(admin::delete_class))
        .route("/admin/classes/:id/schedules", get(admin::class_schedules_page))
        .route("/admin/schedules/add", post(admin::add_schedule))
        .route("/admin/schedules/edit", post(admin::edit_schedule))
        .route("/admin/schedules/delete", post(admin::delete_schedule))
        .route("/admin/plans", get(admin::plans_page))
        .route("/admin/plans/add", post(admin::add_plan))
        .route("/admin/plans/delete", post(admin::delete_plan))
        .route("/admin/plans/status", post(admin::plan_status))
        .route("/admin/members", get(admin::members_page))
        .route("/admin/members/status", post(admin::member_status))
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr)
        .await
        .expect("Failed to bind");
    info!("fitclub listening on {}", state.config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
