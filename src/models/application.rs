use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub id: i64,
    pub offer_id: i64,
    pub class_ref: i64,
    pub student_ref: i64,
    pub student_absent: bool,
    pub finalized_at: Option<DateTime<Utc>>,
    pub finalized_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentAnswer {
    pub id: i64,
    pub application_id: i64,
    pub booklet_item_id: i64,
    pub selected_option: Option<String>,
    pub is_correct: bool,
}

impl StudentAnswer {
    /// Normalized letter, or `None` when the answer was cleared.
    pub fn selected_letter(&self) -> Option<String> {
        self.selected_option
            .as_deref()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    None,
    Recognized,
    Finalized,
    Absent,
}
