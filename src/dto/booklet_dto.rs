use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateBookletPayload {
    #[validate(length(min = 1, max = 150, message = "Name must have 1 to 150 characters"))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddQuestionPayload {
    #[validate(range(min = 1, message = "question_id must be a positive id"))]
    pub question_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ItemPlacement {
    pub question_version: i64,
    pub order: i32,
}
