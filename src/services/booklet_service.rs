use std::collections::HashSet;

use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::dto::booklet_dto::{CreateBookletPayload, ItemPlacement};
use crate::error::{Error, Result};
use crate::middleware::auth::Principal;
use crate::models::booklet::{Booklet, BookletDetail, BookletItem, BookletItemView};

const NOT_OWNER: &str = "You can only change booklets you created";

const ITEM_VIEW_SQL: &str = r#"
    SELECT bi.id, bi.booklet_id, bi.item_order, bi.question_id, bi.question_version_id,
           v.version_number, v.title, v.command, v.subject_id, s.name AS subject_name, v.annulled
    FROM booklet_items bi
    JOIN question_versions v ON v.id = bi.question_version_id
    LEFT JOIN subjects s ON s.id = v.subject_id
    WHERE bi.booklet_id = $1
    ORDER BY bi.item_order, bi.id
"#;

/// Rejects placements that repeat a version or an order value.
pub fn check_placements(items: &[ItemPlacement]) -> Result<()> {
    let mut versions = HashSet::new();
    let mut orders = HashSet::new();
    for item in items {
        if item.order < 1 {
            return Err(Error::invalid("order", "Item order must be a positive integer"));
        }
        if !versions.insert(item.question_version) {
            return Err(Error::invalid(
                "question_version",
                format!("Question version {} appears more than once", item.question_version),
            ));
        }
        if !orders.insert(item.order) {
            return Err(Error::invalid(
                "order",
                format!("Order {} appears more than once", item.order),
            ));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct BookletService {
    pool: PgPool,
}

impl BookletService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, principal: &Principal, payload: CreateBookletPayload) -> Result<Booklet> {
        payload.validate()?;
        let name = payload.name.trim();
        if name.is_empty() {
            return Err(Error::invalid("name", "Name is required"));
        }
        let booklet = sqlx::query_as::<_, Booklet>(
            "INSERT INTO booklets (name, deleted, created_by) VALUES ($1, FALSE, $2) RETURNING *",
        )
        .bind(name)
        .bind(principal.user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(booklet)
    }

    pub async fn get(&self, principal: &Principal, booklet_id: i64) -> Result<BookletDetail> {
        let booklet = self.fetch_owned(principal, booklet_id).await?;
        let items = load_item_views(&self.pool, booklet.id).await?;
        Ok(BookletDetail {
            booklet,
            items_count: items.len(),
            items,
        })
    }

    pub async fn list(&self, principal: &Principal) -> Result<Vec<Booklet>> {
        let booklets = sqlx::query_as::<_, Booklet>(
            r#"SELECT * FROM booklets
               WHERE deleted = FALSE AND ($1 OR created_by = $2)
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(principal.is_superuser)
        .bind(principal.user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(booklets)
    }

    pub async fn delete(&self, principal: &Principal, booklet_id: i64) -> Result<()> {
        let booklet = self.fetch_owned(principal, booklet_id).await?;
        sqlx::query("UPDATE booklets SET deleted = TRUE WHERE id = $1")
            .bind(booklet.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_items(&self, principal: &Principal, booklet_id: i64) -> Result<Vec<BookletItemView>> {
        let booklet = self.fetch_owned(principal, booklet_id).await?;
        load_item_views(&self.pool, booklet.id).await
    }

    /// Appends the question's latest version at the end of the booklet.
    pub async fn add_question(
        &self,
        principal: &Principal,
        booklet_id: i64,
        question_id: i64,
    ) -> Result<BookletItem> {
        let mut tx = self.pool.begin().await?;
        let booklet = lock_booklet(&mut *tx, booklet_id).await?;
        principal.ensure_owner(booklet.created_by, NOT_OWNER)?;

        let question: Option<(bool, i64)> = sqlx::query_as(
            "SELECT private, created_by FROM questions WHERE id = $1 AND deleted = FALSE",
        )
        .bind(question_id)
        .fetch_optional(&mut *tx)
        .await?;
        match question {
            Some((private, created_by)) if !private || principal.owns(created_by) => {}
            _ => return Err(Error::NotFound("Question not found".to_string())),
        }

        let already_present: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM booklet_items WHERE booklet_id = $1 AND question_id = $2)",
        )
        .bind(booklet_id)
        .bind(question_id)
        .fetch_one(&mut *tx)
        .await?;
        if already_present {
            return Err(Error::State(
                "This question is already part of the booklet".to_string(),
            ));
        }

        let latest_version: Option<i64> = sqlx::query_scalar(
            r#"SELECT id FROM question_versions
               WHERE question_id = $1
               ORDER BY version_number DESC
               LIMIT 1"#,
        )
        .bind(question_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(version_id) = latest_version else {
            return Err(Error::State("Question has no version to add".to_string()));
        };

        let next_order: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(item_order), 0) + 1 FROM booklet_items WHERE booklet_id = $1",
        )
        .bind(booklet_id)
        .fetch_one(&mut *tx)
        .await?;

        let item = sqlx::query_as::<_, BookletItem>(
            r#"INSERT INTO booklet_items (booklet_id, question_version_id, question_id, item_order)
               VALUES ($1, $2, $3, $4)
               RETURNING *"#,
        )
        .bind(booklet_id)
        .bind(version_id)
        .bind(question_id)
        .bind(next_order)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(booklet_id, question_id, order = next_order, "question added to booklet");
        Ok(item)
    }

    /// Replaces every item of the booklet with `items` in one transaction.
    pub async fn replace_items(
        &self,
        principal: &Principal,
        booklet_id: i64,
        items: Vec<ItemPlacement>,
    ) -> Result<Vec<BookletItemView>> {
        check_placements(&items)?;

        let mut tx = self.pool.begin().await?;
        let booklet = lock_booklet(&mut *tx, booklet_id).await?;
        principal.ensure_owner(booklet.created_by, NOT_OWNER)?;

        let has_answers: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(
                   SELECT 1 FROM student_answers sa
                   JOIN booklet_items bi ON bi.id = sa.booklet_item_id
                   WHERE bi.booklet_id = $1
               )"#,
        )
        .bind(booklet_id)
        .fetch_one(&mut *tx)
        .await?;
        if has_answers {
            return Err(Error::State(
                "Answers were already recorded for this booklet; its items cannot be replaced"
                    .to_string(),
            ));
        }

        let version_ids: Vec<i64> = items.iter().map(|i| i.question_version).collect();
        let owners: Vec<(i64, i64)> = sqlx::query_as(
            r#"SELECT v.id, v.question_id FROM question_versions v
               JOIN questions q ON q.id = v.question_id
               WHERE v.id = ANY($1) AND q.deleted = FALSE
                 AND ($2 OR q.private = FALSE OR q.created_by = $3)"#,
        )
        .bind(&version_ids)
        .bind(principal.is_superuser)
        .bind(principal.user_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut seen_questions = HashSet::new();
        let mut rows = Vec::with_capacity(items.len());
        for item in &items {
            let Some((_, question_id)) = owners.iter().find(|(id, _)| *id == item.question_version) else {
                return Err(Error::NotFound(format!(
                    "Question version {} not found",
                    item.question_version
                )));
            };
            if !seen_questions.insert(*question_id) {
                return Err(Error::invalid(
                    "question_version",
                    format!("Question {} appears more than once", question_id),
                ));
            }
            rows.push((item.question_version, *question_id, item.order));
        }

        sqlx::query("DELETE FROM booklet_items WHERE booklet_id = $1")
            .bind(booklet_id)
            .execute(&mut *tx)
            .await?;
        for (version_id, question_id, order) in rows {
            sqlx::query(
                r#"INSERT INTO booklet_items (booklet_id, question_version_id, question_id, item_order)
                   VALUES ($1, $2, $3, $4)"#,
            )
            .bind(booklet_id)
            .bind(version_id)
            .bind(question_id)
            .bind(order)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(booklet_id, items = items.len(), "booklet items replaced");
        load_item_views(&self.pool, booklet_id).await
    }

    async fn fetch_owned(&self, principal: &Principal, booklet_id: i64) -> Result<Booklet> {
        let booklet = sqlx::query_as::<_, Booklet>(
            "SELECT * FROM booklets WHERE id = $1 AND deleted = FALSE",
        )
        .bind(booklet_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Booklet not found".to_string()))?;
        principal.ensure_owner(booklet.created_by, NOT_OWNER)?;
        Ok(booklet)
    }
}

async fn lock_booklet(conn: &mut PgConnection, booklet_id: i64) -> Result<Booklet> {
    sqlx::query_as::<_, Booklet>(
        "SELECT * FROM booklets WHERE id = $1 AND deleted = FALSE FOR UPDATE",
    )
    .bind(booklet_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound("Booklet not found".to_string()))
}

/// Items of a booklet joined with their pinned version, in booklet order.
pub async fn load_item_views<'e, E>(executor: E, booklet_id: i64) -> Result<Vec<BookletItemView>>
where
    E: sqlx::PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, BookletItemView>(ITEM_VIEW_SQL)
        .bind(booklet_id)
        .fetch_all(executor)
        .await?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(question_version: i64, order: i32) -> ItemPlacement {
        ItemPlacement {
            question_version,
            order,
        }
    }

    #[test]
    fn accepts_distinct_placements() {
        assert!(check_placements(&[place(10, 1), place(11, 2), place(12, 3)]).is_ok());
        assert!(check_placements(&[]).is_ok());
    }

    #[test]
    fn rejects_repeated_versions() {
        let err = check_placements(&[place(10, 1), place(10, 2)]).unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "question_version"));
    }

    #[test]
    fn rejects_repeated_orders() {
        let err = check_placements(&[place(10, 1), place(11, 1)]).unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "order"));
    }

    #[test]
    fn rejects_non_positive_orders() {
        assert!(check_placements(&[place(10, 0)]).is_err());
    }
}
