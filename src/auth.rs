use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher as _, PasswordVerifier as _};
use chrono::Local;
use sqlx::PgPool;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::membership;
use crate::models::User;
use crate::session::SessionId;
use crate::AppState;

/// Fields accepted by the registration form.
#[derive(Debug)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub phone: Option<String>,
    /// Optional plan picked during sign-up; creates the first membership.
    pub membership_plan: Option<i32>,
}

/// Hash a password with the application pepper appended to the plaintext.
/// The pepper lives in configuration, not the database, so a leaked hash
/// table alone is not enough to mount an offline attack.
pub fn hash_password(password: &str, pepper: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let peppered = format!("{password}{pepper}");
    let hash = Argon2::default().hash_password(peppered.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, pepper: &str, stored: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(stored)?;
    let peppered = format!("{password}{pepper}");
    match Argon2::default().verify_password(peppered.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn validate_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

fn validate_registration(reg: &Registration) -> AppResult<()> {
    if reg.name.trim().is_empty() {
        return Err(AppError::Validation("Please enter your name.".into()));
    }
    if !validate_email(reg.email.trim()) {
        return Err(AppError::Validation("Please enter a valid email.".into()));
    }
    if reg.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must have at least 8 characters.".into(),
        ));
    }
    if reg.password != reg.confirm_password {
        return Err(AppError::Validation("Passwords did not match.".into()));
    }
    if let Some(phone) = reg.phone.as_deref() {
        let phone = phone.trim();
        if !phone.is_empty() && !(phone.len() == 10 && phone.chars().all(|c| c.is_ascii_digit())) {
            return Err(AppError::Validation(
                "Please enter a valid phone number.".into(),
            ));
        }
    }
    Ok(())
}

pub async fn email_exists(pool: &PgPool, email: &str) -> AppResult<bool> {
    let existing: Option<(i32,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(existing.is_some())
}

/// Create a new member account. The user row and the optional initial
/// membership are committed as one transaction.
pub async fn register(pool: &PgPool, pepper: &str, reg: Registration) -> AppResult<i32> {
    validate_registration(&reg)?;
    let email = reg.email.trim().to_lowercase();

    if email_exists(pool, &email).await? {
        return Err(AppError::DuplicateEmail);
    }

    let hashed = hash_password(&reg.password, pepper)?;
    let phone = reg
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let mut tx = pool.begin().await?;

    let (user_id,): (i32,) = sqlx::query_as(
        "INSERT INTO users (name, email, password, phone, role, status)
         VALUES ($1, $2, $3, $4, 'member', 'active')
         RETURNING id",
    )
    .bind(reg.name.trim())
    .bind(&email)
    .bind(&hashed)
    .bind(phone)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(plan_id) = reg.membership_plan {
        membership::insert_membership(&mut tx, user_id, plan_id).await?;
    }

    tx.commit().await?;

    info!("registered user {user_id} ({email})");
    db::log_activity(pool, "register", &format!("new member {email}"), Some(user_id)).await;
    Ok(user_id)
}

/// Verify credentials and return the user row to put into the session.
pub async fn login(pool: &PgPool, pepper: &str, email: &str, password: &str) -> AppResult<User> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?;

    let Some(user) = user else {
        return Err(AppError::InvalidCredentials);
    };
    if user.status != "active" {
        return Err(AppError::AccountInactive);
    }
    if !verify_password(password, pepper, &user.password)? {
        return Err(AppError::InvalidCredentials);
    }

    db::log_activity(pool, "login", &format!("{} logged in", user.email), Some(user.id)).await;
    Ok(user)
}

/// Active users only; inactive accounts behave as if they do not exist.
pub async fn get_user_by_id(pool: &PgPool, user_id: i32) -> AppResult<Option<User>> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1 AND status = 'active'")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Fields a member may change about themselves. Everything else (role,
/// status, join date) is admin-only.
#[derive(Debug)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: Option<String>,
}

pub async fn update_profile(
    pool: &PgPool,
    pepper: &str,
    user_id: i32,
    update: ProfileUpdate,
) -> AppResult<()> {
    if update.name.trim().is_empty() {
        return Err(AppError::Validation("Please enter your name.".into()));
    }
    let email = update.email.trim().to_lowercase();
    if !validate_email(&email) {
        return Err(AppError::Validation("Please enter a valid email.".into()));
    }

    // Every field is validated and hashed before the first write, so a bad
    // password cannot leave a half-applied update behind.
    let new_password = match update.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) if password.len() < 8 => {
            return Err(AppError::Validation(
                "Password must have at least 8 characters.".into(),
            ));
        }
        Some(password) => Some(hash_password(password, pepper)?),
        None => None,
    };

    let current = get_user_by_id(pool, user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    if email != current.email && email_exists(pool, &email).await? {
        return Err(AppError::DuplicateEmail);
    }

    let phone = update
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    sqlx::query(
        "UPDATE users SET name = $1, email = $2, phone = $3,
                password = COALESCE($4, password)
         WHERE id = $5",
    )
    .bind(update.name.trim())
    .bind(&email)
    .bind(phone)
    .bind(new_password)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Session says logged in, or the request is bounced to the login page.
pub async fn require_login(state: &AppState, sid: &SessionId) -> AppResult<i32> {
    state
        .sessions
        .with(&sid.0, |s| s.user_id)
        .await
        .ok_or(AppError::LoginRequired)
}

/// Admin check re-queries the role from the database rather than trusting
/// the copy stored in the session at login time.
pub async fn require_admin(state: &AppState, sid: &SessionId) -> AppResult<i32> {
    let user_id = require_login(state, sid).await?;
    let role: Option<(String,)> =
        sqlx::query_as("SELECT role FROM users WHERE id = $1 AND status = 'active'")
            .bind(user_id)
            .fetch_optional(&state.pool)
            .await?;
    match role {
        Some((role,)) if role == "admin" => Ok(user_id),
        _ => Err(AppError::AdminRequired),
    }
}

pub fn today() -> chrono::NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse", "pepper").unwrap();
        assert!(verify_password("correct horse", "pepper", &hash).unwrap());
        assert!(!verify_password("wrong horse", "pepper", &hash).unwrap());
    }

    #[test]
    fn pepper_participates_in_the_hash() {
        let hash = hash_password("secret-pass", "pepper-a").unwrap();
        assert!(!verify_password("secret-pass", "pepper-b", &hash).unwrap());
    }

    #[test]
    fn two_hashes_of_the_same_password_differ() {
        let a = hash_password("secret-pass", "pepper").unwrap();
        let b = hash_password("secret-pass", "pepper").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("jane@example.com"));
        assert!(validate_email("j.doe+gym@mail.co.uk"));
        assert!(!validate_email("janeexample.com"));
        assert!(!validate_email("jane@nodot"));
        assert!(!validate_email("@example.com"));
        assert!(!validate_email("jane doe@example.com"));
    }

    fn reg() -> Registration {
        Registration {
            name: "Jane Doe".into(),
            email: "jane@example.com".into(),
            password: "password123".into(),
            confirm_password: "password123".into(),
            phone: None,
            membership_plan: None,
        }
    }

    #[test]
    fn registration_validation_rules() {
        assert!(validate_registration(&reg()).is_ok());

        let mut r = reg();
        r.password = "short".into();
        r.confirm_password = "short".into();
        assert!(matches!(
            validate_registration(&r),
            Err(AppError::Validation(_))
        ));

        let mut r = reg();
        r.confirm_password = "different123".into();
        assert!(validate_registration(&r).is_err());

        let mut r = reg();
        r.phone = Some("12345".into());
        assert!(validate_registration(&r).is_err());

        let mut r = reg();
        r.phone = Some("0123456789".into());
        assert!(validate_registration(&r).is_ok());
    }
}
