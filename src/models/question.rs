use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Option letters in canonical order. A version with `n` options uses the first `n`.
pub const OPTION_LETTERS: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: i64,
    pub private: bool,
    pub deleted: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionVersion {
    pub id: i64,
    pub question_id: i64,
    pub version_number: i32,
    pub title: String,
    pub command: String,
    pub support_text: Option<String>,
    pub support_image: Option<String>,
    pub image_reference: Option<String>,
    pub subject_id: i64,
    pub descriptor_id: Option<i64>,
    pub skill_id: Option<i64>,
    pub annulled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionOption {
    pub id: i64,
    pub question_version_id: i64,
    pub letter: String,
    pub option_text: Option<String>,
    pub option_image: Option<String>,
    pub correct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionWithOptions {
    #[serde(flatten)]
    pub version: QuestionVersion,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionDetail {
    #[serde(flatten)]
    pub question: Question,
    /// Ascending by version number; the last entry is the latest version.
    pub versions: Vec<VersionWithOptions>,
}

impl QuestionDetail {
    pub fn latest(&self) -> Option<&VersionWithOptions> {
        self.versions.last()
    }
}
