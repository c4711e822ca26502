use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::trim_optional_string;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OfferPayload {
    #[validate(range(min = 1, message = "booklet must be a positive id"))]
    pub booklet: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, deserialize_with = "trim_optional_string")]
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OfferQuery {
    /// Matches description or booklet name.
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub search: Option<String>,
    pub booklet: Option<i64>,
    /// `upcoming`, `open` or `closed`.
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub status: Option<String>,
}
