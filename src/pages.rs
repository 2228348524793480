use axum::extract::{Extension, Query, State};
use axum::response::{Html, Redirect};
use axum::Form;
use serde::Deserialize;

use crate::auth::{self, ProfileUpdate, Registration};
use crate::booking;
use crate::error::AppError;
use crate::membership;
use crate::models::{MembershipPlan, DAYS_OF_WEEK};
use crate::session::{csrf_field, flash_redirect, verify_csrf, FlashKind, SessionId};
use crate::AppState;

pub const BOOKINGS_PER_PAGE: i64 = 10;

/// Row offset for a 1-based page number; out-of-range input saturates
/// instead of overflowing.
fn page_offset(page: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(BOOKINGS_PER_PAGE)
}

/// Minimal HTML escaping for values interpolated into pages.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_flashes(flashes: &[crate::session::Flash]) -> String {
    flashes
        .iter()
        .map(|f| {
            let class = match f.kind {
                FlashKind::Success => "success",
                FlashKind::Error => "error",
            };
            format!(
                "<p class=\"flash {class}\">{}</p>\n",
                escape_html(&f.text)
            )
        })
        .collect()
}

/// Wraps a page body in the shared shell and drains pending flash messages.
async fn page(state: &AppState, sid: &SessionId, title: &str, body: String) -> Html<String> {
    let (flashes, logged_in) = state
        .sessions
        .with(&sid.0, |s| (s.take_flashes(), s.is_logged_in()))
        .await;
    let nav = if logged_in {
        "<a href=\"/schedule\">Schedule</a> <a href=\"/pricing\">Pricing</a> \
         <a href=\"/member/bookings\">My Bookings</a> <a href=\"/member/membership\">Membership</a> \
         <a href=\"/member/profile\">Profile</a>"
    } else {
        "<a href=\"/schedule\">Schedule</a> <a href=\"/pricing\">Pricing</a> \
         <a href=\"/login\">Login</a> <a href=\"/register\">Register</a>"
    };
    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>{title} - Fitclub</title></head><body>\n\
         <nav>{nav}</nav>\n<h1>{title}</h1>\n{flashes}\n{body}\n</body></html>",
        title = escape_html(title),
        flashes = render_flashes(&flashes),
    ))
}

/// Turn an operation failure into a flash + redirect. Internal errors are
/// logged here and shown generically; a missing login bounces to the login
/// page instead of the fallback target.
async fn fail_redirect(state: &AppState, sid: &SessionId, err: AppError, back: &str) -> Redirect {
    if err.is_internal() {
        error!("request failed: {err:?}");
    }
    let to = if matches!(&err, AppError::LoginRequired) {
        "/login"
    } else {
        back
    };
    flash_redirect(state, sid, FlashKind::Error, err.user_message(), to).await
}

pub async fn home() -> Redirect {
    Redirect::to("/schedule")
}

// ---------------------------------------------------------------------------
// Login / logout

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub csrf_token: String,
}

pub async fn login_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Html<String> {
    let csrf = csrf_field(&state, &sid).await;
    let body = format!(
        "<form method=\"post\" action=\"/login\">{csrf}\
         <label>Email <input type=\"email\" name=\"email\" required></label>\
         <label>Password <input type=\"password\" name=\"password\" required></label>\
         <button type=\"submit\">Login</button></form>"
    );
    page(&state, &sid, "Login", body).await
}

pub async fn login_submit(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<LoginForm>,
) -> Redirect {
    if let Err(e) = verify_csrf(&state, &sid, &form.csrf_token).await {
        return fail_redirect(&state, &sid, e, "/login").await;
    }
    match auth::login(&state.pool, &state.config.password_pepper, &form.email, &form.password).await
    {
        Ok(user) => {
            let is_admin = user.role == "admin";
            state
                .sessions
                .with(&sid.0, |s| s.log_in(user.id, &user.role))
                .await;
            let to = if is_admin { "/admin/trainers" } else { "/schedule" };
            flash_redirect(&state, &sid, FlashKind::Success, "Welcome back!", to).await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/login").await,
    }
}

#[derive(Debug, Deserialize)]
pub struct CsrfForm {
    pub csrf_token: String,
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<CsrfForm>,
) -> Redirect {
    if verify_csrf(&state, &sid, &form.csrf_token).await.is_ok() {
        state.sessions.destroy(&sid.0).await;
    }
    Redirect::to("/login")
}

// ---------------------------------------------------------------------------
// Registration

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub membership_plan: Option<i32>,
    pub csrf_token: String,
}

pub async fn register_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Html<String> {
    let csrf = csrf_field(&state, &sid).await;
    let body = format!(
        "<form method=\"post\" action=\"/register\">{csrf}\
         <label>Name <input type=\"text\" name=\"name\" required></label>\
         <label>Email <input type=\"email\" name=\"email\" required></label>\
         <label>Password <input type=\"password\" name=\"password\" required></label>\
         <label>Confirm Password <input type=\"password\" name=\"confirm_password\" required></label>\
         <label>Phone <input type=\"tel\" name=\"phone\"></label>\
         <button type=\"submit\">Register</button></form>"
    );
    page(&state, &sid, "Register", body).await
}

pub async fn register_submit(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<RegisterForm>,
) -> Redirect {
    if let Err(e) = verify_csrf(&state, &sid, &form.csrf_token).await {
        return fail_redirect(&state, &sid, e, "/register").await;
    }
    let registration = Registration {
        name: form.name,
        email: form.email,
        password: form.password,
        confirm_password: form.confirm_password,
        phone: form.phone,
        membership_plan: form.membership_plan,
    };
    match auth::register(&state.pool, &state.config.password_pepper, registration).await {
        Ok(_) => {
            flash_redirect(
                &state,
                &sid,
                FlashKind::Success,
                "Registration successful! Please login.",
                "/login",
            )
            .await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/register").await,
    }
}

// ---------------------------------------------------------------------------
// Schedule + booking

pub async fn schedule_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    let entries = booking::weekly_schedule(&state.pool).await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::new();
    for day in DAYS_OF_WEEK {
        let day_entries: Vec<_> = entries.iter().filter(|e| e.day_of_week == day).collect();
        body.push_str(&format!("<h2>{day}</h2>\n"));
        if day_entries.is_empty() {
            body.push_str(&format!("<p>No classes scheduled for {day}.</p>\n"));
            continue;
        }
        body.push_str("<table><tr><th>Time</th><th>Class</th><th>Trainer</th><th>Room</th><th>Availability</th><th></th></tr>\n");
        for entry in day_entries {
            let spots = entry.spots_left();
            let book_button = if spots > 0 {
                format!(
                    "<form method=\"post\" action=\"/schedule/book\">{csrf}\
                     <input type=\"hidden\" name=\"schedule_id\" value=\"{}\">\
                     <button type=\"submit\">Book Now</button></form>",
                    entry.id
                )
            } else {
                "<em>Full</em>".to_string()
            };
            body.push_str(&format!(
                "<tr><td>{} - {}</td><td>{}</td><td>{}</td><td>{}</td><td>{spots} spots left</td><td>{book_button}</td></tr>\n",
                entry.start_time.format("%H:%M"),
                entry.end_time.format("%H:%M"),
                escape_html(&entry.class_name),
                escape_html(entry.trainer_name.as_deref().unwrap_or("TBA")),
                escape_html(&entry.room),
            ));
        }
        body.push_str("</table>\n");
    }

    Ok(page(&state, &sid, "Class Schedule", body).await)
}

#[derive(Debug, Deserialize)]
pub struct BookForm {
    pub schedule_id: i32,
    pub csrf_token: String,
}

pub async fn book_class(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<BookForm>,
) -> Redirect {
    let result = async {
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        let user_id = auth::require_login(&state, &sid).await?;
        booking::attempt_booking(&state.pool, user_id, form.schedule_id).await
    }
    .await;

    match result {
        Ok(_) => {
            flash_redirect(
                &state,
                &sid,
                FlashKind::Success,
                "Class booked successfully!",
                "/schedule",
            )
            .await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/schedule").await,
    }
}

// ---------------------------------------------------------------------------
// Pricing + membership purchase

pub async fn pricing_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    let plans: Vec<MembershipPlan> = sqlx::query_as(
        "SELECT * FROM membership_plans WHERE status = 'active' ORDER BY price ASC",
    )
    .fetch_all(&state.pool)
    .await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::new();
    for plan in &plans {
        let features: String = plan
            .feature_list()
            .iter()
            .map(|f| format!("<li>{}</li>", escape_html(f)))
            .collect();
        body.push_str(&format!(
            "<section><h2>{}</h2><p>${:.2}/month</p><p>{} months commitment</p><ul>{features}</ul>\
             <form method=\"post\" action=\"/pricing/purchase\">{csrf}\
             <input type=\"hidden\" name=\"plan_id\" value=\"{}\">\
             <button type=\"submit\">Select Plan</button></form></section>\n",
            escape_html(&plan.name),
            plan.price,
            plan.duration,
            plan.id,
        ));
    }

    Ok(page(&state, &sid, "Membership Plans", body).await)
}

#[derive(Debug, Deserialize)]
pub struct PurchaseForm {
    pub plan_id: i32,
    pub csrf_token: String,
}

pub async fn purchase_plan(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<PurchaseForm>,
) -> Redirect {
    let result = async {
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        let user_id = auth::require_login(&state, &sid).await?;
        membership::purchase_plan(&state.pool, user_id, form.plan_id).await
    }
    .await;

    match result {
        Ok(_) => {
            flash_redirect(
                &state,
                &sid,
                FlashKind::Success,
                "Membership purchased successfully!",
                "/member/membership",
            )
            .await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/pricing").await,
    }
}

// ---------------------------------------------------------------------------
// Member area

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<i64>,
}

pub async fn my_bookings(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let user_id = auth::require_login(&state, &sid).await?;
    let current_page = query.page.unwrap_or(1).max(1);
    let offset = page_offset(current_page);

    let total = booking::count_user_bookings(&state.pool, user_id).await?;
    let bookings = booking::user_bookings(&state.pool, user_id, BOOKINGS_PER_PAGE, offset).await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::from(
        "<table><tr><th>Date</th><th>Class</th><th>Slot</th><th>Room</th><th>Trainer</th><th>Status</th><th></th></tr>\n",
    );
    for b in &bookings {
        let cancel = if b.status == "booked" {
            format!(
                "<form method=\"post\" action=\"/member/bookings/cancel\">{csrf}\
                 <input type=\"hidden\" name=\"booking_id\" value=\"{}\">\
                 <button type=\"submit\">Cancel</button></form>",
                b.id
            )
        } else {
            String::new()
        };
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{} {} - {}</td><td>{}</td><td>{}</td><td>{}</td><td>{cancel}</td></tr>\n",
            b.booking_date,
            escape_html(&b.class_name),
            b.day_of_week,
            b.start_time.format("%H:%M"),
            b.end_time.format("%H:%M"),
            escape_html(&b.room),
            escape_html(b.trainer_name.as_deref().unwrap_or("TBA")),
            escape_html(&b.status),
        ));
    }
    body.push_str("</table>\n");

    let total_pages = (total + BOOKINGS_PER_PAGE - 1) / BOOKINGS_PER_PAGE;
    if total_pages > 1 {
        body.push_str("<p>");
        for p in 1..=total_pages {
            body.push_str(&format!("<a href=\"/member/bookings?page={p}\">{p}</a> "));
        }
        body.push_str("</p>");
    }

    Ok(page(&state, &sid, "My Bookings", body).await)
}

#[derive(Debug, Deserialize)]
pub struct CancelForm {
    pub booking_id: i32,
    pub csrf_token: String,
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<CancelForm>,
) -> Redirect {
    let result = async {
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        let user_id = auth::require_login(&state, &sid).await?;
        booking::cancel_booking(&state.pool, user_id, form.booking_id).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(
                &state,
                &sid,
                FlashKind::Success,
                "Booking cancelled successfully!",
                "/member/bookings",
            )
            .await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/member/bookings").await,
    }
}

pub async fn membership_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    let user_id = auth::require_login(&state, &sid).await?;
    let current = membership::membership_detail(&state.pool, user_id).await?;
    let plans: Vec<MembershipPlan> =
        sqlx::query_as("SELECT * FROM membership_plans WHERE status = 'active' ORDER BY price ASC")
            .fetch_all(&state.pool)
            .await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = match &current {
        Some(m) => format!(
            "<p>Current plan: <strong>{}</strong> (${:.2}/month), valid until {}.</p>",
            escape_html(&m.plan_name),
            m.price,
            m.end_date,
        ),
        None => "<p>You have no active membership.</p>".to_string(),
    };

    body.push_str("<h2>Change plan</h2>\n");
    for plan in &plans {
        body.push_str(&format!(
            "<form method=\"post\" action=\"/member/membership\">{csrf}\
             <input type=\"hidden\" name=\"plan_id\" value=\"{}\">\
             <button type=\"submit\">{} (${:.2}, {} months)</button></form>\n",
            plan.id,
            escape_html(&plan.name),
            plan.price,
            plan.duration,
        ));
    }

    Ok(page(&state, &sid, "My Membership", body).await)
}

pub async fn change_membership(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<PurchaseForm>,
) -> Redirect {
    let result = async {
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        let user_id = auth::require_login(&state, &sid).await?;
        membership::change_plan(&state.pool, user_id, form.plan_id).await
    }
    .await;

    match result {
        Ok(_) => {
            flash_redirect(
                &state,
                &sid,
                FlashKind::Success,
                "Membership updated successfully!",
                "/member/membership",
            )
            .await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/member/membership").await,
    }
}

pub async fn profile_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    let user_id = auth::require_login(&state, &sid).await?;
    let user = auth::get_user_by_id(&state.pool, user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    let csrf = csrf_field(&state, &sid).await;

    let body = format!(
        "<form method=\"post\" action=\"/member/profile\">{csrf}\
         <label>Name <input type=\"text\" name=\"name\" value=\"{}\" required></label>\
         <label>Email <input type=\"email\" name=\"email\" value=\"{}\" required></label>\
         <label>Phone <input type=\"tel\" name=\"phone\" value=\"{}\"></label>\
         <label>New Password <input type=\"password\" name=\"password\"></label>\
         <button type=\"submit\">Save</button></form>",
        escape_html(&user.name),
        escape_html(&user.email),
        escape_html(user.phone.as_deref().unwrap_or("")),
    );

    Ok(page(&state, &sid, "My Profile", body).await)
}

#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub csrf_token: String,
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<ProfileForm>,
) -> Redirect {
    let result = async {
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        let user_id = auth::require_login(&state, &sid).await?;
        let update = ProfileUpdate {
            name: form.name,
            email: form.email,
            phone: form.phone,
            password: form.password,
        };
        auth::update_profile(&state.pool, &state.config.password_pepper, user_id, update).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(
                &state,
                &sid,
                FlashKind::Success,
                "Profile updated successfully!",
                "/member/profile",
            )
            .await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/member/profile").await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offset_saturates_on_extreme_page_numbers() {
        assert_eq!(page_offset(1), 0);
        assert_eq!(page_offset(3), 2 * BOOKINGS_PER_PAGE);
        assert_eq!(page_offset(0), 0);
        assert_eq!(page_offset(-7), 0);
        assert_eq!(page_offset(i64::MAX), i64::MAX);
    }

    #[test]
    fn html_escaping_covers_the_special_characters() {
        assert_eq!(
            escape_html("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("Tom & \"Jerry\""), "Tom &amp; &quot;Jerry&quot;");
        assert_eq!(escape_html("plain text"), "plain text");
    }
}
