use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booklet {
    pub id: i64,
    pub name: String,
    pub deleted: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookletItem {
    pub id: i64,
    pub booklet_id: i64,
    pub question_version_id: i64,
    pub question_id: i64,
    #[sqlx(rename = "item_order")]
    pub order: i32,
}

/// A booklet item joined with the pinned version data needed for answering and reporting.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookletItemView {
    pub id: i64,
    pub booklet_id: i64,
    #[sqlx(rename = "item_order")]
    pub order: i32,
    pub question_id: i64,
    pub question_version_id: i64,
    pub version_number: i32,
    pub title: String,
    pub command: String,
    pub subject_id: i64,
    pub subject_name: Option<String>,
    pub annulled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookletDetail {
    #[serde(flatten)]
    pub booklet: Booklet,
    pub items_count: usize,
    pub items: Vec<BookletItemView>,
}
