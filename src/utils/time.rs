use chrono::{DateTime, NaiveDate, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Calendar date used for offer windows.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
