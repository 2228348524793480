use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Every failure a request handler can surface.
///
/// The variants mirror what the user actually sees: validation problems are
/// shown inline, conflicts and capacity failures become flash messages, and
/// persistence errors are logged server-side and reported generically.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is not active")]
    AccountInactive,

    #[error("Please login to continue")]
    LoginRequired,

    #[error("Admin access required")]
    AdminRequired,

    #[error("Invalid form submission, please try again")]
    CsrfMismatch,

    #[error("Active membership required to book classes")]
    NoActiveMembership,

    #[error("This class is full")]
    ClassFull,

    #[error("You have already booked this class")]
    AlreadyBooked,

    #[error("You already have an active membership")]
    AlreadyActive,

    #[error("Cannot delete plan with active members")]
    PlanInUse,

    #[error("Cannot delete trainer with assigned classes")]
    TrainerHasClasses,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed")]
    PasswordHash(argon2::password_hash::Error),
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(e: argon2::password_hash::Error) -> Self {
        AppError::PasswordHash(e)
    }
}

impl AppError {
    /// Message safe to show the user. Internal failures never leak details.
    pub fn user_message(&self) -> String {
        if self.is_internal() {
            "Something went wrong. Please try again later.".to_string()
        } else {
            self.to_string()
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::PasswordHash(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::CsrfMismatch => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateEmail
            | AppError::AlreadyBooked
            | AppError::AlreadyActive
            | AppError::PlanInUse
            | AppError::TrainerHasClasses
            | AppError::ClassFull => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::AccountInactive
            | AppError::LoginRequired => StatusCode::UNAUTHORIZED,
            AppError::AdminRequired | AppError::NoActiveMembership => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::PasswordHash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            error!("request failed: {self:?}");
        }
        (self.status_code(), self.user_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_map_to_409() {
        assert_eq!(AppError::ClassFull.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::AlreadyBooked.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::DuplicateEmail.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::PlanInUse.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn database_errors_never_leak_details() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_message().contains("Pool"));
        assert!(err.user_message().contains("try again"));
    }

    #[test]
    fn user_facing_errors_keep_their_message() {
        assert_eq!(
            AppError::NoActiveMembership.user_message(),
            "Active membership required to book classes"
        );
    }
}
