pub mod application_dto;
pub mod booklet_dto;
pub mod offer_dto;
pub mod question_dto;
pub mod report_dto;

use serde::Deserialize;

/// Trims strings and turns empty ones into `None`.
pub(crate) fn trim_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}
