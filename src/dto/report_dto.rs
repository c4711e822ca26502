use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

use crate::error::{Error, Result};
use crate::models::application::ApplicationStatus;

/// Raw query string; refs are parsed by hand so malformed values get a field-level error.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    pub class_ref: Option<String>,
    pub school_ref: Option<String>,
    pub serie: Option<String>,
}

/// Which applications of an offer a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportScope {
    All,
    Class(i64),
    Roster {
        school_ref: Option<i64>,
        serie: Option<i64>,
    },
}

impl ReportQuery {
    /// An explicit class wins over school/serie.
    pub fn scope(&self) -> Result<ReportScope> {
        if let Some(class_ref) = parse_ref("class_ref", self.class_ref.as_deref())? {
            return Ok(ReportScope::Class(class_ref));
        }
        let school_ref = parse_ref("school_ref", self.school_ref.as_deref())?;
        let serie = parse_ref("serie", self.serie.as_deref())?;
        if let Some(serie) = serie {
            if serie < 1 {
                return Err(Error::invalid("serie", "Provide a valid serie"));
            }
        }
        if school_ref.is_none() && serie.is_none() {
            Ok(ReportScope::All)
        } else {
            Ok(ReportScope::Roster { school_ref, serie })
        }
    }

    /// School/serie only; the class rollup ignores `class_ref`.
    pub fn roster_scope(&self) -> Result<ReportScope> {
        let without_class = ReportQuery {
            class_ref: None,
            ..self.clone()
        };
        without_class.scope()
    }
}

fn parse_ref(field: &str, raw: Option<&str>) -> Result<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| Error::invalid(field, format!("Provide a valid {}", field))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StudentReportRow {
    pub application_id: i64,
    pub student_ref: i64,
    pub name: String,
    pub class_ref: i64,
    pub correct: usize,
    pub wrong: usize,
    pub blank: usize,
    pub total: usize,
    pub correct_pct: f64,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ItemReportRow {
    pub booklet_item_id: i64,
    pub order: i32,
    pub question_id: i64,
    pub question_version_id: i64,
    pub version_number: i32,
    pub subject_name: Option<String>,
    pub annulled: bool,
    pub total_answered: usize,
    pub correct_count: usize,
    pub wrong_count: usize,
    pub blank_count: usize,
    pub correct_pct: f64,
    pub wrong_pct: f64,
    pub blank_pct: f64,
    pub most_marked_option: Option<String>,
    pub option_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct DistributionBucket {
    pub correct: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AccuracyBucket {
    pub range: String,
    pub count_students: usize,
    pub pct_students: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReportTotals {
    pub students_total: usize,
    pub absent: usize,
    pub finalized: usize,
    pub in_progress: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OfferReport {
    pub offer_id: i64,
    pub items_total: usize,
    pub students_total: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub finalized_count: usize,
    pub in_progress_count: usize,
    pub avg_correct: f64,
    pub avg_correct_pct: f64,
    pub totals: ReportTotals,
    pub accuracy_buckets: Vec<AccuracyBucket>,
    pub distribution: Vec<DistributionBucket>,
    pub students: Vec<StudentReportRow>,
    pub items: Vec<ItemReportRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ClassRollupRow {
    pub class_id: i64,
    pub class_name: String,
    pub total_students: usize,
    pub accuracy_percent: f64,
    pub absent_count: usize,
    pub absent_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OfferFinalization {
    pub offer_id: i64,
    pub label: String,
    pub finalized_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecentOffer {
    pub offer_id: i64,
    pub label: String,
    pub booklet_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OverviewReport {
    pub offers_active: usize,
    pub offers_closed: usize,
    pub offers_total: usize,
    pub applications_total: usize,
    pub answered_total: usize,
    pub finalized_total: usize,
    pub absent_total: usize,
    pub finalization_rate_pct: f64,
    pub top_offers_finalization: Vec<OfferFinalization>,
    pub accuracy_buckets_overall: Vec<AccuracyBucket>,
    pub recent_offers: Vec<RecentOffer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(class_ref: Option<&str>, school_ref: Option<&str>, serie: Option<&str>) -> ReportQuery {
        ReportQuery {
            class_ref: class_ref.map(str::to_string),
            school_ref: school_ref.map(str::to_string),
            serie: serie.map(str::to_string),
        }
    }

    #[test]
    fn class_ref_takes_precedence() {
        let scope = query(Some("901001"), Some("1101"), Some("1")).scope().unwrap();
        assert_eq!(scope, ReportScope::Class(901001));
    }

    #[test]
    fn school_and_serie_resolve_through_roster() {
        let scope = query(None, Some("1101"), Some("2")).scope().unwrap();
        assert_eq!(
            scope,
            ReportScope::Roster {
                school_ref: Some(1101),
                serie: Some(2)
            }
        );
        assert_eq!(query(None, Some(""), None).scope().unwrap(), ReportScope::All);
    }

    #[test]
    fn malformed_refs_are_field_errors() {
        let err = query(Some("abc"), None, None).scope().unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "class_ref"));
        let err = query(None, None, Some("0")).scope().unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "serie"));
    }

    #[test]
    fn rollup_scope_ignores_class() {
        let scope = query(Some("5"), None, None).roster_scope().unwrap();
        assert_eq!(scope, ReportScope::All);
    }
}
