use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub role: String,
    pub join_date: NaiveDateTime,
    pub status: String,
}

#[derive(Debug, FromRow)]
pub struct Trainer {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub bio: Option<String>,
    pub photo: Option<String>,
    pub status: String,
}

#[derive(Debug, FromRow)]
pub struct MembershipPlan {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    /// Commitment length in months.
    pub duration: i32,
    pub price: f64,
    /// JSON array of feature strings, stored as text.
    pub features: Option<String>,
    pub status: String,
}

impl MembershipPlan {
    /// Decode the stored feature list; a missing or malformed column is an
    /// empty list, not an error.
    pub fn feature_list(&self) -> Vec<String> {
        self.features
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, FromRow)]
pub struct UserMembership {
    pub id: i32,
    pub user_id: i32,
    pub plan_id: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
}

#[derive(Debug, FromRow)]
pub struct Class {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    /// Session length in minutes.
    pub duration: i32,
    pub capacity: i32,
    pub trainer_id: Option<i32>,
    pub image: Option<String>,
    pub status: String,
}

#[derive(Debug, FromRow)]
pub struct Schedule {
    pub id: i32,
    pub class_id: i32,
    pub day_of_week: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: String,
}

#[derive(Debug, FromRow)]
pub struct Booking {
    pub id: i32,
    pub user_id: i32,
    pub schedule_id: i32,
    pub booking_date: NaiveDate,
    pub status: String,
}

/// One row of the public schedule page: schedule joined with its class,
/// trainer, and live booked count.
#[derive(Debug, FromRow)]
pub struct ScheduleEntry {
    pub id: i32,
    pub class_id: i32,
    pub day_of_week: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: String,
    pub class_name: String,
    pub capacity: i32,
    pub trainer_name: Option<String>,
    pub booked_count: i64,
}

impl ScheduleEntry {
    pub fn spots_left(&self) -> i64 {
        i64::from(self.capacity) - self.booked_count
    }
}

/// A member's booking joined with class and schedule details.
#[derive(Debug, FromRow)]
pub struct BookingDetail {
    pub id: i32,
    pub booking_date: NaiveDate,
    pub status: String,
    pub class_name: String,
    pub day_of_week: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: String,
    pub trainer_name: Option<String>,
}

/// A user's membership joined with the plan it references.
#[derive(Debug, FromRow)]
pub struct MembershipDetail {
    pub id: i32,
    pub plan_id: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
    pub plan_name: String,
    pub price: f64,
}

pub const DAYS_OF_WEEK: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(features: Option<&str>) -> MembershipPlan {
        MembershipPlan {
            id: 1,
            name: "Basic".to_string(),
            description: None,
            duration: 3,
            price: 29.99,
            features: features.map(str::to_string),
            status: "active".to_string(),
        }
    }

    #[test]
    fn feature_list_decodes_json_array() {
        let p = plan(Some(r#"["Gym access", "2 classes per week"]"#));
        assert_eq!(p.feature_list(), vec!["Gym access", "2 classes per week"]);
    }

    #[test]
    fn feature_list_tolerates_missing_or_malformed() {
        assert!(plan(None).feature_list().is_empty());
        assert!(plan(Some("not json")).feature_list().is_empty());
    }
}
