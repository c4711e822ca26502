use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::trim_optional_string;

/// One answer option as submitted. `letter` may be omitted, in which case it is
/// inferred from the option's position.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OptionPayload {
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub letter: Option<String>,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub option_text: Option<String>,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub option_image: Option<String>,
    #[serde(default)]
    pub correct: bool,
}

/// Content of a question version: everything that creating version N+1 replaces.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct QuestionContentPayload {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "Command is required"))]
    pub command: String,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub support_text: Option<String>,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub support_image: Option<String>,
    #[serde(default, deserialize_with = "trim_optional_string")]
    #[validate(length(max = 500))]
    pub image_reference: Option<String>,
    #[validate(range(min = 1, message = "subject_id must be a positive id"))]
    pub subject_id: i64,
    #[validate(range(min = 1))]
    pub descriptor_id: Option<i64>,
    #[validate(range(min = 1))]
    pub skill_id: Option<i64>,
    pub options: Vec<OptionPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateQuestionPayload {
    #[serde(default)]
    pub private: bool,
    #[serde(flatten)]
    #[validate(nested)]
    pub content: QuestionContentPayload,
}

/// Flags that change in place without creating a new version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PatchQuestionPayload {
    pub private: Option<bool>,
    pub annulled: Option<bool>,
}

/// Matches title, command, support text or subject name.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QuestionQuery {
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub search: Option<String>,
}
