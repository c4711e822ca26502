use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::application::ApplicationStatus;
use crate::models::booklet::BookletItemView;
use crate::services::grading_service::AnswerSummary;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SyncStudent {
    #[validate(range(min = 1, message = "student_ref must be a positive id"))]
    pub student_ref: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SyncApplicationsPayload {
    #[validate(range(min = 1, message = "class_ref must be a positive id"))]
    pub class_ref: i64,
    #[validate(nested)]
    pub students: Vec<SyncStudent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AnswerPayload {
    #[validate(range(min = 1, message = "booklet_item must be a positive id"))]
    pub booklet_item: i64,
    #[serde(default)]
    pub selected_option: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SubmitAnswersPayload {
    #[validate(nested)]
    pub answers: Vec<AnswerPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarkAbsentPayload {
    pub student_absent: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ApplicationsQuery {
    pub class_ref: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationRow {
    pub application_id: i64,
    pub class_ref: i64,
    pub student_ref: i64,
    pub student_name: String,
    pub student_absent: bool,
    pub finalized_at: Option<DateTime<Utc>>,
    pub correct: usize,
    pub wrong: usize,
    pub blank: usize,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferApplicationsResponse {
    pub offer_id: i64,
    pub class_ref: Option<i64>,
    pub items_total: usize,
    pub applications: Vec<ApplicationRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerSlot {
    pub booklet_item: i64,
    pub selected_option: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerSheet {
    pub application_id: i64,
    pub offer_id: i64,
    pub booklet_id: i64,
    pub student_absent: bool,
    pub finalized_at: Option<DateTime<Utc>>,
    pub finalized_by: Option<i64>,
    pub items_total: usize,
    pub booklet_items: Vec<BookletItemView>,
    pub answers: Vec<AnswerSlot>,
    pub summary: AnswerSummary,
}
