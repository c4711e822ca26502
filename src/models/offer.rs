use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Offer {
    pub id: i64,
    pub booklet_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
    pub deleted: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Upcoming,
    Open,
    Closed,
}

impl OfferStatus {
    /// The window is inclusive on both ends.
    pub fn at(start_date: NaiveDate, end_date: NaiveDate, today: NaiveDate) -> Self {
        if today < start_date {
            OfferStatus::Upcoming
        } else if today > end_date {
            OfferStatus::Closed
        } else {
            OfferStatus::Open
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upcoming" => Some(OfferStatus::Upcoming),
            "open" => Some(OfferStatus::Open),
            "closed" => Some(OfferStatus::Closed),
            _ => None,
        }
    }
}

impl Offer {
    pub fn status(&self, today: NaiveDate) -> OfferStatus {
        OfferStatus::at(self.start_date, self.end_date, today)
    }

    pub fn is_open(&self, today: NaiveDate) -> bool {
        self.status(today) == OfferStatus::Open
    }

    pub fn label(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => format!("Oferta #{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferView {
    #[serde(flatten)]
    pub offer: Offer,
    pub booklet_name: String,
    pub status: OfferStatus,
}
