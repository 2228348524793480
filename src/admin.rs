use std::collections::HashMap;

use axum::extract::{Extension, Multipart, Path, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use chrono::NaiveTime;
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth;
use crate::booking;
use crate::error::{AppError, AppResult};
use crate::membership;
use crate::models::{Class, MembershipPlan, Schedule, Trainer, User, DAYS_OF_WEEK};
use crate::pages::escape_html;
use crate::session::{csrf_field, flash_redirect, verify_csrf, FlashKind, SessionId};
use crate::upload;
use crate::AppState;

async fn fail_redirect(state: &AppState, sid: &SessionId, err: AppError, back: &str) -> Redirect {
    if err.is_internal() {
        error!("admin request failed: {err:?}");
    }
    let to = match &err {
        AppError::LoginRequired | AppError::AdminRequired => "/login",
        _ => back,
    };
    flash_redirect(state, sid, FlashKind::Error, err.user_message(), to).await
}

async fn admin_page(state: &AppState, sid: &SessionId, title: &str, body: String) -> Html<String> {
    let flashes = state.sessions.with(&sid.0, |s| s.take_flashes()).await;
    let rendered: String = flashes
        .iter()
        .map(|f| format!("<p class=\"flash\">{}</p>\n", escape_html(&f.text)))
        .collect();
    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>{title} - Fitclub Admin</title></head><body>\n\
         <nav><a href=\"/admin/trainers\">Trainers</a> <a href=\"/admin/classes\">Classes</a> \
         <a href=\"/admin/plans\">Plans</a> <a href=\"/admin/members\">Members</a></nav>\n\
         <h1>{title}</h1>\n{rendered}\n{body}\n</body></html>",
        title = escape_html(title),
    ))
}

/// Collected fields of a multipart form: text values plus at most one file.
struct UploadForm {
    fields: HashMap<String, String>,
    file: Option<(String, Vec<u8>)>,
}

impl UploadForm {
    fn text(&self, name: &str) -> AppResult<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Validation(format!("Please enter {name}.")))
    }

    fn optional(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> AppResult<T> {
        self.text(name)?
            .trim()
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid value for {name}.")))
    }
}

async fn read_multipart(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm {
        fields: HashMap::new(),
        file: None,
    };
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) if !filename.is_empty() => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::Validation("File size exceeds limit".into()))?;
                form.file = Some((filename, data.to_vec()));
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Malformed field: {e}")))?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}

/// Store the uploaded image, if any, under the configured upload directory.
fn store_upload(state: &AppState, form: &UploadForm) -> AppResult<Option<String>> {
    match &form.file {
        Some((filename, data)) => {
            let name = upload::save_image(
                &state.config.upload_dir,
                filename,
                data,
                state.config.max_upload_bytes,
            )?;
            Ok(Some(name))
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Trainers

/// Trainer emails are unique; `exclude` lets an edit keep its own address.
pub async fn trainer_email_taken(
    pool: &PgPool,
    email: &str,
    exclude: Option<i32>,
) -> AppResult<bool> {
    let existing: Option<(i32,)> = sqlx::query_as(
        "SELECT id FROM trainers WHERE email = $1 AND ($2::int IS NULL OR id <> $2)",
    )
    .bind(email)
    .bind(exclude)
    .fetch_optional(pool)
    .await?;
    Ok(existing.is_some())
}

pub async fn trainers_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    auth::require_admin(&state, &sid).await?;
    let trainers: Vec<Trainer> = sqlx::query_as("SELECT * FROM trainers ORDER BY name ASC")
        .fetch_all(&state.pool)
        .await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::from("<table><tr><th>Name</th><th>Email</th><th>Specialization</th><th>Status</th><th></th></tr>\n");
    for t in &trainers {
        let toggled = if t.status == "active" { "inactive" } else { "active" };
        body.push_str(&format!(
            "<tr><td>{name}</td><td>{email}</td><td>{}</td><td>{}</td><td>\
             <form method=\"post\" action=\"/admin/trainers/status\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <input type=\"hidden\" name=\"new_status\" value=\"{toggled}\">\
             <button type=\"submit\">Set {toggled}</button></form>\
             <form method=\"post\" action=\"/admin/trainers/delete\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <button type=\"submit\">Delete</button></form>\
             <details><summary>Edit</summary>\
             <form method=\"post\" action=\"/admin/trainers/edit\" enctype=\"multipart/form-data\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <label>Name <input type=\"text\" name=\"name\" value=\"{name}\" required></label>\
             <label>Email <input type=\"email\" name=\"email\" value=\"{email}\" required></label>\
             <label>Phone <input type=\"tel\" name=\"phone\" value=\"{phone}\"></label>\
             <label>Specialization <input type=\"text\" name=\"specialization\" value=\"{spec}\"></label>\
             <label>Bio <textarea name=\"bio\">{bio}</textarea></label>\
             <label>Photo <input type=\"file\" name=\"photo\" accept=\".jpg,.jpeg,.png\"></label>\
             <button type=\"submit\">Save</button></form></details></td></tr>\n",
            escape_html(t.specialization.as_deref().unwrap_or("-")),
            escape_html(&t.status),
            name = escape_html(&t.name),
            email = escape_html(&t.email),
            phone = escape_html(t.phone.as_deref().unwrap_or("")),
            spec = escape_html(t.specialization.as_deref().unwrap_or("")),
            bio = escape_html(t.bio.as_deref().unwrap_or("")),
            id = t.id,
        ));
    }
    body.push_str("</table>\n<h2>Add trainer</h2>\n");
    body.push_str(&format!(
        "<form method=\"post\" action=\"/admin/trainers/add\" enctype=\"multipart/form-data\">{csrf}\
         <label>Name <input type=\"text\" name=\"name\" required></label>\
         <label>Email <input type=\"email\" name=\"email\" required></label>\
         <label>Phone <input type=\"tel\" name=\"phone\"></label>\
         <label>Specialization <input type=\"text\" name=\"specialization\"></label>\
         <label>Bio <textarea name=\"bio\"></textarea></label>\
         <label>Photo <input type=\"file\" name=\"photo\" accept=\".jpg,.jpeg,.png\"></label>\
         <button type=\"submit\">Add Trainer</button></form>"
    ));

    Ok(admin_page(&state, &sid, "Trainer Management", body).await)
}

pub async fn add_trainer(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    multipart: Multipart,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        let form = read_multipart(multipart).await?;
        verify_csrf(&state, &sid, form.optional("csrf_token").unwrap_or("")).await?;

        let email = form.text("email")?.trim().to_lowercase();
        if !auth::validate_email(&email) {
            return Err(AppError::Validation("Please enter a valid email.".into()));
        }
        if trainer_email_taken(&state.pool, &email, None).await? {
            return Err(AppError::DuplicateEmail);
        }
        let photo = store_upload(&state, &form)?;

        sqlx::query(
            "INSERT INTO trainers (name, email, phone, specialization, bio, photo, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'active')",
        )
        .bind(form.text("name")?.trim())
        .bind(&email)
        .bind(form.optional("phone"))
        .bind(form.optional("specialization"))
        .bind(form.optional("bio"))
        .bind(photo)
        .execute(&state.pool)
        .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Trainer added successfully!", "/admin/trainers").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/trainers").await,
    }
}

/// Replacement field set for an existing trainer. A `None` photo keeps the
/// stored one.
#[derive(Debug)]
pub struct TrainerUpdate {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub bio: Option<String>,
    pub photo: Option<String>,
}

pub async fn update_trainer(pool: &PgPool, update: TrainerUpdate) -> AppResult<()> {
    if trainer_email_taken(pool, &update.email, Some(update.id)).await? {
        return Err(AppError::DuplicateEmail);
    }
    let result = sqlx::query(
        "UPDATE trainers
         SET name = $1, email = $2, phone = $3, specialization = $4, bio = $5,
             photo = COALESCE($6, photo)
         WHERE id = $7",
    )
    .bind(&update.name)
    .bind(&update.email)
    .bind(&update.phone)
    .bind(&update.specialization)
    .bind(&update.bio)
    .bind(&update.photo)
    .bind(update.id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Trainer"));
    }
    Ok(())
}

pub async fn edit_trainer(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    multipart: Multipart,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        let form = read_multipart(multipart).await?;
        verify_csrf(&state, &sid, form.optional("csrf_token").unwrap_or("")).await?;

        let email = form.text("email")?.trim().to_lowercase();
        if !auth::validate_email(&email) {
            return Err(AppError::Validation("Please enter a valid email.".into()));
        }
        let update = TrainerUpdate {
            id: form.parsed("id")?,
            name: form.text("name")?.trim().to_string(),
            email,
            phone: form.optional("phone").map(str::to_string),
            specialization: form.optional("specialization").map(str::to_string),
            bio: form.optional("bio").map(str::to_string),
            photo: store_upload(&state, &form)?,
        };
        update_trainer(&state.pool, update).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Trainer updated successfully!", "/admin/trainers").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/trainers").await,
    }
}

#[derive(Debug, Deserialize)]
pub struct IdForm {
    pub id: i32,
    pub csrf_token: String,
}

pub async fn delete_trainer(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<IdForm>,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        booking::delete_trainer(&state.pool, form.id).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Trainer deleted successfully!", "/admin/trainers").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/trainers").await,
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub id: i32,
    pub new_status: String,
    pub csrf_token: String,
}

async fn set_status(
    state: &AppState,
    sid: &SessionId,
    table: &'static str,
    form: &StatusForm,
) -> AppResult<()> {
    auth::require_admin(state, sid).await?;
    verify_csrf(state, sid, &form.csrf_token).await?;
    if form.new_status != "active" && form.new_status != "inactive" {
        return Err(AppError::Validation("Invalid status.".into()));
    }
    // Table name comes from a fixed set of call sites, never from input.
    let query = format!("UPDATE {table} SET status = $1 WHERE id = $2");
    let result = sqlx::query(&query)
        .bind(&form.new_status)
        .bind(form.id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Record"));
    }
    Ok(())
}

pub async fn trainer_status(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<StatusForm>,
) -> Redirect {
    match set_status(&state, &sid, "trainers", &form).await {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Trainer status updated successfully!", "/admin/trainers").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/trainers").await,
    }
}

// ---------------------------------------------------------------------------
// Classes

pub async fn classes_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    auth::require_admin(&state, &sid).await?;
    let classes: Vec<Class> = sqlx::query_as("SELECT * FROM classes ORDER BY name ASC")
        .fetch_all(&state.pool)
        .await?;
    let trainers: Vec<Trainer> =
        sqlx::query_as("SELECT * FROM trainers WHERE status = 'active' ORDER BY name ASC")
            .fetch_all(&state.pool)
            .await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::from(
        "<table><tr><th>Name</th><th>Duration</th><th>Capacity</th><th>Status</th><th></th></tr>\n",
    );
    for c in &classes {
        let edit_options: String = trainers
            .iter()
            .map(|t| {
                let selected = if c.trainer_id == Some(t.id) { " selected" } else { "" };
                format!(
                    "<option value=\"{}\"{selected}>{}</option>",
                    t.id,
                    escape_html(&t.name)
                )
            })
            .collect();
        body.push_str(&format!(
            "<tr><td>{name}</td><td>{duration} min</td><td>{capacity}</td><td>{}</td><td>\
             <a href=\"/admin/classes/{id}/schedules\">Schedules</a>\
             <form method=\"post\" action=\"/admin/classes/delete\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <button type=\"submit\">Delete</button></form>\
             <details><summary>Edit</summary>\
             <form method=\"post\" action=\"/admin/classes/edit\" enctype=\"multipart/form-data\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <label>Name <input type=\"text\" name=\"name\" value=\"{name}\" required></label>\
             <label>Description <textarea name=\"description\">{description}</textarea></label>\
             <label>Duration (minutes) <input type=\"number\" name=\"duration\" value=\"{duration}\" required></label>\
             <label>Capacity <input type=\"number\" name=\"capacity\" value=\"{capacity}\" required></label>\
             <label>Trainer <select name=\"trainer_id\"><option value=\"\">TBA</option>{edit_options}</select></label>\
             <label>Image <input type=\"file\" name=\"image\" accept=\".jpg,.jpeg,.png\"></label>\
             <button type=\"submit\">Save</button></form></details></td></tr>\n",
            escape_html(&c.status),
            name = escape_html(&c.name),
            description = escape_html(c.description.as_deref().unwrap_or("")),
            duration = c.duration,
            capacity = c.capacity,
            id = c.id,
        ));
    }
    body.push_str("</table>\n<h2>Add class</h2>\n");
    let trainer_options: String = trainers
        .iter()
        .map(|t| format!("<option value=\"{}\">{}</option>", t.id, escape_html(&t.name)))
        .collect();
    body.push_str(&format!(
        "<form method=\"post\" action=\"/admin/classes/add\" enctype=\"multipart/form-data\">{csrf}\
         <label>Name <input type=\"text\" name=\"name\" required></label>\
         <label>Description <textarea name=\"description\"></textarea></label>\
         <label>Duration (minutes) <input type=\"number\" name=\"duration\" required></label>\
         <label>Capacity <input type=\"number\" name=\"capacity\" required></label>\
         <label>Trainer <select name=\"trainer_id\"><option value=\"\">TBA</option>{trainer_options}</select></label>\
         <label>Image <input type=\"file\" name=\"image\" accept=\".jpg,.jpeg,.png\"></label>\
         <button type=\"submit\">Add Class</button></form>"
    ));

    Ok(admin_page(&state, &sid, "Class Management", body).await)
}

pub async fn add_class(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    multipart: Multipart,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        let form = read_multipart(multipart).await?;
        verify_csrf(&state, &sid, form.optional("csrf_token").unwrap_or("")).await?;

        let duration: i32 = form.parsed("duration")?;
        let capacity: i32 = form.parsed("capacity")?;
        if duration <= 0 || capacity <= 0 {
            return Err(AppError::Validation(
                "Duration and capacity must be positive.".into(),
            ));
        }
        let trainer_id: Option<i32> = match form.optional("trainer_id") {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| AppError::Validation("Invalid trainer.".into()))?,
            ),
            None => None,
        };
        let image = store_upload(&state, &form)?;

        sqlx::query(
            "INSERT INTO classes (name, description, duration, capacity, trainer_id, image, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'active')",
        )
        .bind(form.text("name")?.trim())
        .bind(form.optional("description"))
        .bind(duration)
        .bind(capacity)
        .bind(trainer_id)
        .bind(image)
        .execute(&state.pool)
        .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Class added successfully!", "/admin/classes").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/classes").await,
    }
}

/// Replacement field set for an existing class. `trainer_id: None` unassigns
/// the trainer; a `None` image keeps the stored one.
#[derive(Debug)]
pub struct ClassUpdate {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub duration: i32,
    pub capacity: i32,
    pub trainer_id: Option<i32>,
    pub image: Option<String>,
}

pub async fn update_class(pool: &PgPool, update: ClassUpdate) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE classes
         SET name = $1, description = $2, duration = $3, capacity = $4,
             trainer_id = $5, image = COALESCE($6, image)
         WHERE id = $7",
    )
    .bind(&update.name)
    .bind(&update.description)
    .bind(update.duration)
    .bind(update.capacity)
    .bind(update.trainer_id)
    .bind(&update.image)
    .bind(update.id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Class"));
    }
    Ok(())
}

pub async fn edit_class(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    multipart: Multipart,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        let form = read_multipart(multipart).await?;
        verify_csrf(&state, &sid, form.optional("csrf_token").unwrap_or("")).await?;

        let duration: i32 = form.parsed("duration")?;
        let capacity: i32 = form.parsed("capacity")?;
        if duration <= 0 || capacity <= 0 {
            return Err(AppError::Validation(
                "Duration and capacity must be positive.".into(),
            ));
        }
        let trainer_id: Option<i32> = match form.optional("trainer_id") {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| AppError::Validation("Invalid trainer.".into()))?,
            ),
            None => None,
        };
        let update = ClassUpdate {
            id: form.parsed("id")?,
            name: form.text("name")?.trim().to_string(),
            description: form.optional("description").map(str::to_string),
            duration,
            capacity,
            trainer_id,
            image: store_upload(&state, &form)?,
        };
        update_class(&state.pool, update).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Class updated successfully!", "/admin/classes").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/classes").await,
    }
}

pub async fn delete_class(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<IdForm>,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        booking::delete_class(&state.pool, form.id).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Class deleted successfully!", "/admin/classes").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/classes").await,
    }
}

// ---------------------------------------------------------------------------
// Schedules

pub async fn class_schedules_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Path(class_id): Path<i32>,
) -> Result<Response, AppError> {
    auth::require_admin(&state, &sid).await?;

    let class: Option<Class> = sqlx::query_as("SELECT * FROM classes WHERE id = $1")
        .bind(class_id)
        .fetch_optional(&state.pool)
        .await?;
    let Some(class) = class else {
        // A stale link to a deleted class goes back to the listing.
        let redirect =
            flash_redirect(&state, &sid, FlashKind::Error, "Class not found.", "/admin/classes")
                .await;
        return Ok(redirect.into_response());
    };

    let schedules: Vec<Schedule> = sqlx::query_as(
        "SELECT * FROM schedules WHERE class_id = $1
         ORDER BY array_position(ARRAY['Monday','Tuesday','Wednesday','Thursday',
                                       'Friday','Saturday','Sunday'], day_of_week),
                  start_time",
    )
    .bind(class_id)
    .fetch_all(&state.pool)
    .await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::from("<table><tr><th>Day</th><th>Time</th><th>Room</th><th></th></tr>\n");
    for s in &schedules {
        let edit_days: String = DAYS_OF_WEEK
            .iter()
            .map(|d| {
                let selected = if *d == s.day_of_week { " selected" } else { "" };
                format!("<option{selected}>{d}</option>")
            })
            .collect();
        body.push_str(&format!(
            "<tr><td>{}</td><td>{start} - {end}</td><td>{room}</td><td>\
             <form method=\"post\" action=\"/admin/schedules/delete\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <button type=\"submit\">Delete</button></form>\
             <details><summary>Edit</summary>\
             <form method=\"post\" action=\"/admin/schedules/edit\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <input type=\"hidden\" name=\"class_id\" value=\"{class_id}\">\
             <label>Day <select name=\"day_of_week\">{edit_days}</select></label>\
             <label>Start <input type=\"time\" name=\"start_time\" value=\"{start}\" required></label>\
             <label>End <input type=\"time\" name=\"end_time\" value=\"{end}\" required></label>\
             <label>Room <input type=\"text\" name=\"room\" value=\"{room}\" required></label>\
             <button type=\"submit\">Save</button></form></details></td></tr>\n",
            s.day_of_week,
            start = s.start_time.format("%H:%M"),
            end = s.end_time.format("%H:%M"),
            room = escape_html(&s.room),
            id = s.id,
        ));
    }
    body.push_str("</table>\n<h2>Add schedule</h2>\n");
    let day_options: String = DAYS_OF_WEEK
        .iter()
        .map(|d| format!("<option>{d}</option>"))
        .collect();
    body.push_str(&format!(
        "<form method=\"post\" action=\"/admin/schedules/add\">{csrf}\
         <input type=\"hidden\" name=\"class_id\" value=\"{class_id}\">\
         <label>Day <select name=\"day_of_week\">{day_options}</select></label>\
         <label>Start <input type=\"time\" name=\"start_time\" required></label>\
         <label>End <input type=\"time\" name=\"end_time\" required></label>\
         <label>Room <input type=\"text\" name=\"room\" required></label>\
         <button type=\"submit\">Add Schedule</button></form>"
    ));

    let title = format!("Schedules - {}", class.name);
    Ok(admin_page(&state, &sid, &title, body).await.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ScheduleForm {
    pub class_id: i32,
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub room: String,
    pub csrf_token: String,
}

fn parse_time(raw: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| AppError::Validation("Invalid time.".into()))
}

pub async fn add_schedule(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<ScheduleForm>,
) -> Redirect {
    let back = format!("/admin/classes/{}/schedules", form.class_id);
    let result = async {
        auth::require_admin(&state, &sid).await?;
        verify_csrf(&state, &sid, &form.csrf_token).await?;

        if !DAYS_OF_WEEK.contains(&form.day_of_week.as_str()) {
            return Err(AppError::Validation("Invalid day of week.".into()));
        }
        let start = parse_time(&form.start_time)?;
        let end = parse_time(&form.end_time)?;
        if end <= start {
            return Err(AppError::Validation("End time must be after start time.".into()));
        }
        if form.room.trim().is_empty() {
            return Err(AppError::Validation("Please enter room.".into()));
        }

        let class_exists: Option<(i32,)> = sqlx::query_as("SELECT id FROM classes WHERE id = $1")
            .bind(form.class_id)
            .fetch_optional(&state.pool)
            .await?;
        if class_exists.is_none() {
            return Err(AppError::NotFound("Class"));
        }

        sqlx::query(
            "INSERT INTO schedules (class_id, day_of_week, start_time, end_time, room)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(form.class_id)
        .bind(&form.day_of_week)
        .bind(start)
        .bind(end)
        .bind(form.room.trim())
        .execute(&state.pool)
        .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Schedule added successfully!", &back).await
        }
        Err(e) => fail_redirect(&state, &sid, e, &back).await,
    }
}

pub async fn update_schedule(
    pool: &PgPool,
    schedule_id: i32,
    day_of_week: &str,
    start: NaiveTime,
    end: NaiveTime,
    room: &str,
) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE schedules
         SET day_of_week = $1, start_time = $2, end_time = $3, room = $4
         WHERE id = $5",
    )
    .bind(day_of_week)
    .bind(start)
    .bind(end)
    .bind(room)
    .bind(schedule_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Schedule"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ScheduleEditForm {
    pub id: i32,
    pub class_id: i32,
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub room: String,
    pub csrf_token: String,
}

pub async fn edit_schedule(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<ScheduleEditForm>,
) -> Redirect {
    let back = format!("/admin/classes/{}/schedules", form.class_id);
    let result = async {
        auth::require_admin(&state, &sid).await?;
        verify_csrf(&state, &sid, &form.csrf_token).await?;

        if !DAYS_OF_WEEK.contains(&form.day_of_week.as_str()) {
            return Err(AppError::Validation("Invalid day of week.".into()));
        }
        let start = parse_time(&form.start_time)?;
        let end = parse_time(&form.end_time)?;
        if end <= start {
            return Err(AppError::Validation("End time must be after start time.".into()));
        }
        if form.room.trim().is_empty() {
            return Err(AppError::Validation("Please enter room.".into()));
        }

        update_schedule(
            &state.pool,
            form.id,
            &form.day_of_week,
            start,
            end,
            form.room.trim(),
        )
        .await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Schedule updated successfully!", &back).await
        }
        Err(e) => fail_redirect(&state, &sid, e, &back).await,
    }
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<IdForm>,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        verify_csrf(&state, &sid, &form.csrf_token).await?;

        // Refuse while live bookings exist; the cascade itself stays generic.
        let (booked,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bookings WHERE schedule_id = $1 AND status = 'booked'",
        )
        .bind(form.id)
        .fetch_one(&state.pool)
        .await?;
        if booked > 0 {
            return Err(AppError::Validation(
                "Cannot delete a schedule with active bookings.".into(),
            ));
        }
        booking::delete_schedule(&state.pool, form.id).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Schedule deleted successfully!", "/admin/classes").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/classes").await,
    }
}

// ---------------------------------------------------------------------------
// Membership plans

pub async fn plans_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    auth::require_admin(&state, &sid).await?;
    let plans: Vec<MembershipPlan> =
        sqlx::query_as("SELECT * FROM membership_plans ORDER BY price ASC")
            .fetch_all(&state.pool)
            .await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::from(
        "<table><tr><th>Name</th><th>Duration</th><th>Price</th><th>Status</th><th></th></tr>\n",
    );
    for p in &plans {
        let toggled = if p.status == "active" { "inactive" } else { "active" };
        body.push_str(&format!(
            "<tr><td>{}</td><td>{} months</td><td>${:.2}</td><td>{}</td><td>\
             <form method=\"post\" action=\"/admin/plans/status\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <input type=\"hidden\" name=\"new_status\" value=\"{toggled}\">\
             <button type=\"submit\">Set {toggled}</button></form>\
             <form method=\"post\" action=\"/admin/plans/delete\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <button type=\"submit\">Delete</button></form></td></tr>\n",
            escape_html(&p.name),
            p.duration,
            p.price,
            escape_html(&p.status),
            id = p.id,
        ));
    }
    body.push_str("</table>\n<h2>Add plan</h2>\n");
    body.push_str(&format!(
        "<form method=\"post\" action=\"/admin/plans/add\">{csrf}\
         <label>Name <input type=\"text\" name=\"name\" required></label>\
         <label>Description <textarea name=\"description\"></textarea></label>\
         <label>Duration (months) <input type=\"number\" name=\"duration\" required></label>\
         <label>Price <input type=\"number\" step=\"0.01\" name=\"price\" required></label>\
         <label>Features (one per line) <textarea name=\"features\"></textarea></label>\
         <button type=\"submit\">Add Plan</button></form>"
    ));

    Ok(admin_page(&state, &sid, "Membership Plans", body).await)
}

#[derive(Debug, Deserialize)]
pub struct PlanForm {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub duration: i32,
    pub price: f64,
    #[serde(default)]
    pub features: Option<String>,
    pub csrf_token: String,
}

/// One feature per textarea line, stored as a JSON array.
fn encode_features(raw: Option<&str>) -> Option<String> {
    let features: Vec<&str> = raw?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if features.is_empty() {
        return None;
    }
    serde_json::to_string(&features).ok()
}

pub async fn add_plan(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<PlanForm>,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        verify_csrf(&state, &sid, &form.csrf_token).await?;

        if form.name.trim().is_empty() {
            return Err(AppError::Validation("Please enter name.".into()));
        }
        if form.duration <= 0 {
            return Err(AppError::Validation("Duration must be positive.".into()));
        }
        if form.price < 0.0 {
            return Err(AppError::Validation("Price cannot be negative.".into()));
        }

        sqlx::query(
            "INSERT INTO membership_plans (name, description, duration, price, features, status)
             VALUES ($1, $2, $3, $4, $5, 'active')",
        )
        .bind(form.name.trim())
        .bind(form.description.as_deref().filter(|d| !d.trim().is_empty()))
        .bind(form.duration)
        .bind(form.price)
        .bind(encode_features(form.features.as_deref()))
        .execute(&state.pool)
        .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Membership plan added successfully!", "/admin/plans").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/plans").await,
    }
}

pub async fn delete_plan(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<IdForm>,
) -> Redirect {
    let result = async {
        auth::require_admin(&state, &sid).await?;
        verify_csrf(&state, &sid, &form.csrf_token).await?;
        membership::delete_plan(&state.pool, form.id).await
    }
    .await;

    match result {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Membership plan deleted successfully!", "/admin/plans").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/plans").await,
    }
}

pub async fn plan_status(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<StatusForm>,
) -> Redirect {
    match set_status(&state, &sid, "membership_plans", &form).await {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Plan status updated successfully!", "/admin/plans").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/plans").await,
    }
}

// ---------------------------------------------------------------------------
// Members

pub async fn members_page(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    auth::require_admin(&state, &sid).await?;
    let members: Vec<User> =
        sqlx::query_as("SELECT * FROM users WHERE role = 'member' ORDER BY join_date DESC")
            .fetch_all(&state.pool)
            .await?;
    let csrf = csrf_field(&state, &sid).await;

    let mut body = String::from(
        "<table><tr><th>Name</th><th>Email</th><th>Joined</th><th>Status</th><th></th></tr>\n",
    );
    for m in &members {
        let toggled = if m.status == "active" { "inactive" } else { "active" };
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>\
             <form method=\"post\" action=\"/admin/members/status\">{csrf}\
             <input type=\"hidden\" name=\"id\" value=\"{}\">\
             <input type=\"hidden\" name=\"new_status\" value=\"{toggled}\">\
             <button type=\"submit\">Set {toggled}</button></form></td></tr>\n",
            escape_html(&m.name),
            escape_html(&m.email),
            m.join_date.date(),
            escape_html(&m.status),
            m.id,
        ));
    }
    body.push_str("</table>\n");

    Ok(admin_page(&state, &sid, "Member Management", body).await)
}

pub async fn member_status(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<StatusForm>,
) -> Redirect {
    match set_status(&state, &sid, "users", &form).await {
        Ok(()) => {
            flash_redirect(&state, &sid, FlashKind::Success, "Member status updated successfully!", "/admin/members").await
        }
        Err(e) => fail_redirect(&state, &sid, e, "/admin/members").await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_encode_one_item_per_line() {
        assert_eq!(
            encode_features(Some("Gym access\n  Sauna  \n\nPool")).as_deref(),
            Some(r#"["Gym access","Sauna","Pool"]"#)
        );
        assert_eq!(encode_features(Some("   \n")), None);
        assert_eq!(encode_features(None), None);
    }

    #[test]
    fn time_parsing_accepts_both_forms() {
        assert_eq!(
            parse_time("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time("18:00:00").unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap()
        );
        assert!(parse_time("9am").is_err());
    }
}
