use chrono::NaiveDate;
use sqlx::PgPool;
use validator::Validate;

use crate::dto::offer_dto::{OfferPayload, OfferQuery};
use crate::error::{Error, Result};
use crate::middleware::auth::Principal;
use crate::models::offer::{Offer, OfferStatus, OfferView};
use crate::utils::time;

const NOT_OWNER: &str = "You can only change offers you created";

pub fn validate_window(start_date: NaiveDate, end_date: NaiveDate) -> Result<()> {
    if end_date < start_date {
        return Err(Error::invalid(
            "end_date",
            "end_date must be on or after start_date",
        ));
    }
    Ok(())
}

fn validate_payload(payload: &OfferPayload) -> Result<String> {
    payload.validate()?;
    validate_window(payload.start_date, payload.end_date)?;
    match payload.description.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => Ok(d.to_string()),
        _ => Err(Error::invalid("description", "Description is required")),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OfferRow {
    #[sqlx(flatten)]
    offer: Offer,
    booklet_name: String,
}

impl OfferRow {
    fn into_view(self, today: NaiveDate) -> OfferView {
        let status = self.offer.status(today);
        OfferView {
            offer: self.offer,
            booklet_name: self.booklet_name,
            status,
        }
    }
}

#[derive(Clone)]
pub struct OfferService {
    pool: PgPool,
}

impl OfferService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, principal: &Principal, payload: OfferPayload) -> Result<OfferView> {
        let description = validate_payload(&payload)?;
        self.ensure_live_booklet(payload.booklet).await?;

        let offer = sqlx::query_as::<_, Offer>(
            r#"INSERT INTO offers (booklet_id, start_date, end_date, description, deleted, created_by)
               VALUES ($1, $2, $3, $4, FALSE, $5)
               RETURNING *"#,
        )
        .bind(payload.booklet)
        .bind(payload.start_date)
        .bind(payload.end_date)
        .bind(description)
        .bind(principal.user_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(offer_id = offer.id, booklet_id = offer.booklet_id, "offer created");
        self.get(principal, offer.id).await
    }

    pub async fn update(
        &self,
        principal: &Principal,
        offer_id: i64,
        payload: OfferPayload,
    ) -> Result<OfferView> {
        let description = validate_payload(&payload)?;
        let offer = self.get_owned(principal, offer_id).await?;
        self.ensure_live_booklet(payload.booklet).await?;
        if payload.booklet != offer.booklet_id && self.has_answers(offer.id).await? {
            return Err(Error::State(
                "Answers were already recorded for this offer; its booklet cannot be changed"
                    .to_string(),
            ));
        }

        sqlx::query(
            r#"UPDATE offers
               SET booklet_id = $1, start_date = $2, end_date = $3, description = $4
               WHERE id = $5"#,
        )
        .bind(payload.booklet)
        .bind(payload.start_date)
        .bind(payload.end_date)
        .bind(description)
        .bind(offer_id)
        .execute(&self.pool)
        .await?;

        self.get(principal, offer_id).await
    }

    pub async fn get(&self, principal: &Principal, offer_id: i64) -> Result<OfferView> {
        let row = sqlx::query_as::<_, OfferRow>(
            r#"SELECT o.*, b.name AS booklet_name
               FROM offers o
               JOIN booklets b ON b.id = o.booklet_id
               WHERE o.id = $1 AND o.deleted = FALSE"#,
        )
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Offer not found".to_string()))?;
        principal.ensure_owner(row.offer.created_by, NOT_OWNER)?;
        Ok(row.into_view(time::today()))
    }

    /// The offer itself, after the ownership check every offer-scoped operation needs.
    pub async fn get_owned(&self, principal: &Principal, offer_id: i64) -> Result<Offer> {
        let offer = sqlx::query_as::<_, Offer>(
            "SELECT * FROM offers WHERE id = $1 AND deleted = FALSE",
        )
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Offer not found".to_string()))?;
        principal.ensure_owner(offer.created_by, NOT_OWNER)?;
        Ok(offer)
    }

    pub async fn list(&self, principal: &Principal, query: OfferQuery) -> Result<Vec<OfferView>> {
        let status = match query.status.as_deref() {
            None => None,
            Some(raw) => Some(OfferStatus::parse(raw).ok_or_else(|| {
                Error::invalid("status", "status must be upcoming, open or closed")
            })?),
        };
        let pattern = query.search.map(|s| format!("%{}%", s));

        let rows = sqlx::query_as::<_, OfferRow>(
            r#"SELECT o.*, b.name AS booklet_name
               FROM offers o
               JOIN booklets b ON b.id = o.booklet_id
               WHERE o.deleted = FALSE
                 AND ($1 OR o.created_by = $2)
                 AND ($3::bigint IS NULL OR o.booklet_id = $3)
                 AND ($4::text IS NULL OR o.description ILIKE $4 OR b.name ILIKE $4)
               ORDER BY o.start_date DESC, o.id DESC"#,
        )
        .bind(principal.is_superuser)
        .bind(principal.user_id)
        .bind(query.booklet)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        let today = time::today();
        Ok(rows
            .into_iter()
            .map(|row| row.into_view(today))
            .filter(|view| status.map_or(true, |s| view.status == s))
            .collect())
    }

    pub async fn delete(&self, principal: &Principal, offer_id: i64) -> Result<()> {
        let offer = self.get_owned(principal, offer_id).await?;
        sqlx::query("UPDATE offers SET deleted = TRUE WHERE id = $1")
            .bind(offer.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn has_answers(&self, offer_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(
                   SELECT 1 FROM student_answers sa
                   JOIN applications a ON a.id = sa.application_id
                   WHERE a.offer_id = $1
               )"#,
        )
        .bind(offer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn ensure_live_booklet(&self, booklet_id: i64) -> Result<()> {
        let live: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM booklets WHERE id = $1 AND deleted = FALSE)",
        )
        .bind(booklet_id)
        .fetch_one(&self.pool)
        .await?;
        if live {
            Ok(())
        } else {
            Err(Error::invalid("booklet", "Booklet not found"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn payload(start: NaiveDate, end: NaiveDate, description: Option<&str>) -> OfferPayload {
        OfferPayload {
            booklet: 1,
            start_date: start,
            end_date: end,
            description: description.map(str::to_string),
        }
    }

    #[test]
    fn end_before_start_is_rejected_on_end_date() {
        let err = validate_window(d(2026, 3, 10), d(2026, 3, 9)).unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "end_date"));
        assert!(validate_window(d(2026, 3, 10), d(2026, 3, 10)).is_ok());
    }

    #[test]
    fn description_is_required() {
        let err = validate_payload(&payload(d(2026, 3, 1), d(2026, 3, 2), None)).unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "description"));
        let ok = validate_payload(&payload(d(2026, 3, 1), d(2026, 3, 2), Some(" Diagnóstica ")));
        assert_eq!(ok.unwrap(), "Diagnóstica");
    }
}
