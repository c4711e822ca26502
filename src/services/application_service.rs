use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::dto::application_dto::{
    AnswerSheet, AnswerSlot, ApplicationRow, MarkAbsentPayload, OfferApplicationsResponse,
    SubmitAnswersPayload, SyncApplicationsPayload,
};
use crate::error::{Error, Result};
use crate::middleware::auth::Principal;
use crate::models::application::{Application, StudentAnswer};
use crate::models::booklet::BookletItemView;
use crate::models::offer::Offer;
use crate::models::question::QuestionOption;
use crate::services::booklet_service::load_item_views;
use crate::services::grading_service::GradingService;
use crate::services::roster_service::{self, RosterProvider};
use crate::utils::time;

const NOT_OWNER: &str = "You can only manage applications of offers you created";

/// Finalization fields after an answer batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finalization {
    pub finalized_at: Option<DateTime<Utc>>,
    pub finalized_by: Option<i64>,
}

/// A complete answer set finalizes the application; anything less clears it.
pub fn recompute_finalization(
    answered: usize,
    items_total: usize,
    actor: i64,
    now: DateTime<Utc>,
) -> Finalization {
    if GradingService::is_complete(answered, items_total) {
        Finalization {
            finalized_at: Some(now),
            finalized_by: Some(actor),
        }
    } else {
        Finalization {
            finalized_at: None,
            finalized_by: None,
        }
    }
}

/// One slot per booklet item, in booklet order, plus the summary.
pub fn build_answer_sheet(
    application: &Application,
    offer: &Offer,
    items: Vec<BookletItemView>,
    answers: &[StudentAnswer],
) -> AnswerSheet {
    let by_item: HashMap<i64, &StudentAnswer> =
        answers.iter().map(|a| (a.booklet_item_id, a)).collect();
    let slots = items
        .iter()
        .map(|item| match by_item.get(&item.id) {
            Some(answer) => AnswerSlot {
                booklet_item: item.id,
                selected_option: answer.selected_letter(),
                is_correct: answer.is_correct,
            },
            None => AnswerSlot {
                booklet_item: item.id,
                selected_option: None,
                is_correct: false,
            },
        })
        .collect();
    let item_ids: HashSet<i64> = items.iter().map(|i| i.id).collect();
    let summary = GradingService::summarize(
        answers,
        &item_ids,
        application.student_absent,
        application.finalized_at.is_some(),
    );

    AnswerSheet {
        application_id: application.id,
        offer_id: offer.id,
        booklet_id: offer.booklet_id,
        student_absent: application.student_absent,
        finalized_at: application.finalized_at,
        finalized_by: application.finalized_by,
        items_total: items.len(),
        booklet_items: items,
        answers: slots,
        summary,
    }
}

fn application_row(
    application: &Application,
    answers: &[StudentAnswer],
    item_ids: &HashSet<i64>,
    student_name: String,
) -> ApplicationRow {
    let summary = GradingService::summarize(
        answers,
        item_ids,
        application.student_absent,
        application.finalized_at.is_some(),
    );
    ApplicationRow {
        application_id: application.id,
        class_ref: application.class_ref,
        student_ref: application.student_ref,
        student_name,
        student_absent: application.student_absent,
        finalized_at: application.finalized_at,
        correct: summary.correct,
        wrong: summary.wrong,
        blank: summary.blank,
        status: summary.status,
    }
}

#[derive(Debug, FromRow)]
struct ItemOption {
    booklet_item_id: i64,
    #[sqlx(flatten)]
    option: QuestionOption,
}

#[derive(Clone)]
pub struct ApplicationService {
    pool: PgPool,
    roster: Arc<dyn RosterProvider>,
}

impl ApplicationService {
    pub fn new(pool: PgPool, roster: Arc<dyn RosterProvider>) -> Self {
        Self { pool, roster }
    }

    /// Creates the applications that are missing for `class_ref`; existing ones keep
    /// their answers and finalization.
    pub async fn sync_students(
        &self,
        principal: &Principal,
        offer_id: i64,
        payload: SyncApplicationsPayload,
    ) -> Result<OfferApplicationsResponse> {
        payload.validate()?;
        let offer = self.owned_offer(principal, offer_id).await?;

        let mut tx = self.pool.begin().await?;
        let mut created = 0u64;
        for student in &payload.students {
            let result = sqlx::query(
                r#"INSERT INTO applications (offer_id, class_ref, student_ref, student_absent)
                   VALUES ($1, $2, $3, FALSE)
                   ON CONFLICT (offer_id, class_ref, student_ref) DO NOTHING"#,
            )
            .bind(offer.id)
            .bind(payload.class_ref)
            .bind(student.student_ref)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }
        tx.commit().await?;
        tracing::info!(offer_id, class_ref = payload.class_ref, created, "students synced");

        let names: HashMap<i64, String> = payload
            .students
            .iter()
            .filter_map(|s| {
                s.name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|n| (s.student_ref, n.to_string()))
            })
            .collect();

        let item_ids = booklet_item_ids(&self.pool, offer.booklet_id).await?;
        let (applications, answers) = self.load_applications(offer.id, Some(payload.class_ref)).await?;
        let rows = applications
            .iter()
            .map(|app| {
                let name = names
                    .get(&app.student_ref)
                    .cloned()
                    .unwrap_or_else(|| format!("Aluno {}", app.student_ref));
                application_row(app, answers_of(&answers, app.id), &item_ids, name)
            })
            .collect();

        Ok(OfferApplicationsResponse {
            offer_id: offer.id,
            class_ref: Some(payload.class_ref),
            items_total: item_ids.len(),
            applications: rows,
        })
    }

    pub async fn list_applications(
        &self,
        principal: &Principal,
        offer_id: i64,
        class_ref: Option<i64>,
    ) -> Result<OfferApplicationsResponse> {
        let offer = self.owned_offer(principal, offer_id).await?;
        let item_ids = booklet_item_ids(&self.pool, offer.booklet_id).await?;
        let (applications, answers) = self.load_applications(offer.id, class_ref).await?;

        let mut class_refs: Vec<i64> = applications.iter().map(|a| a.class_ref).collect();
        class_refs.sort_unstable();
        class_refs.dedup();
        let names = roster_service::student_names(self.roster.as_ref(), principal, class_refs).await;

        let rows = applications
            .iter()
            .map(|app| {
                let name = roster_service::student_display_name(&names, app.class_ref, app.student_ref);
                application_row(app, answers_of(&answers, app.id), &item_ids, name)
            })
            .collect();

        Ok(OfferApplicationsResponse {
            offer_id: offer.id,
            class_ref,
            items_total: item_ids.len(),
            applications: rows,
        })
    }

    pub async fn get_answers(&self, principal: &Principal, application_id: i64) -> Result<AnswerSheet> {
        let application = fetch_application(&self.pool, application_id, false).await?;
        let offer = fetch_offer(&self.pool, application.offer_id).await?;
        principal.ensure_owner(offer.created_by, NOT_OWNER)?;
        self.answer_sheet(&application, &offer).await
    }

    /// Upserts a batch of answers and recomputes finalization, atomically.
    pub async fn submit_answers(
        &self,
        principal: &Principal,
        application_id: i64,
        payload: SubmitAnswersPayload,
    ) -> Result<AnswerSheet> {
        payload.validate()?;

        let mut tx = self.pool.begin().await?;
        let application = fetch_application(&mut *tx, application_id, true).await?;
        let offer = fetch_offer(&mut *tx, application.offer_id).await?;
        principal.ensure_owner(offer.created_by, NOT_OWNER)?;
        if !offer.is_open(time::today()) {
            return Err(Error::State(
                "Answers can only be recorded while the offer is open".to_string(),
            ));
        }

        let keys = correct_letters(&mut *tx, offer.booklet_id).await?;
        let item_ids: Vec<i64> = keys.keys().copied().collect();

        for answer in &payload.answers {
            let Some(correct_letter) = keys.get(&answer.booklet_item) else {
                return Err(Error::State(format!(
                    "booklet_item {} does not belong to the offer's booklet",
                    answer.booklet_item
                )));
            };
            let selected = GradingService::normalize_selected_option(answer.selected_option.as_deref())?;
            let is_correct = GradingService::score(selected.as_deref(), correct_letter.as_deref());

            sqlx::query(
                r#"
                INSERT INTO student_answers (application_id, booklet_item_id, selected_option, is_correct)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (application_id, booklet_item_id)
                DO UPDATE SET selected_option = EXCLUDED.selected_option,
                              is_correct = EXCLUDED.is_correct,
                              updated_at = NOW()
                "#,
            )
            .bind(application.id)
            .bind(answer.booklet_item)
            .bind(selected)
            .bind(is_correct)
            .execute(&mut *tx)
            .await?;
        }

        let answered: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM student_answers
               WHERE application_id = $1
                 AND booklet_item_id = ANY($2)
                 AND selected_option IS NOT NULL
                 AND TRIM(selected_option) <> ''"#,
        )
        .bind(application.id)
        .bind(&item_ids)
        .fetch_one(&mut *tx)
        .await?;

        let finalization = recompute_finalization(
            answered.max(0) as usize,
            item_ids.len(),
            principal.user_id,
            time::now(),
        );
        sqlx::query("UPDATE applications SET finalized_at = $1, finalized_by = $2 WHERE id = $3")
            .bind(finalization.finalized_at)
            .bind(finalization.finalized_by)
            .bind(application.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        match (application.finalized_at.is_some(), finalization.finalized_at.is_some()) {
            (false, true) => tracing::info!(application_id, "application finalized"),
            (true, false) => tracing::info!(application_id, "application finalization cleared"),
            _ => {}
        }

        let application = fetch_application(&self.pool, application_id, false).await?;
        self.answer_sheet(&application, &offer).await
    }

    /// Absence wins over finalization; answers are kept.
    pub async fn mark_absent(
        &self,
        principal: &Principal,
        application_id: i64,
        payload: MarkAbsentPayload,
    ) -> Result<AnswerSheet> {
        let Some(student_absent) = payload.student_absent else {
            return Err(Error::invalid("student_absent", "student_absent is required"));
        };

        let mut tx = self.pool.begin().await?;
        let application = fetch_application(&mut *tx, application_id, true).await?;
        let offer = fetch_offer(&mut *tx, application.offer_id).await?;
        principal.ensure_owner(offer.created_by, NOT_OWNER)?;

        if student_absent {
            sqlx::query(
                r#"UPDATE applications
                   SET student_absent = TRUE, finalized_at = NULL, finalized_by = NULL
                   WHERE id = $1"#,
            )
            .bind(application.id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("UPDATE applications SET student_absent = FALSE WHERE id = $1")
                .bind(application.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!(application_id, student_absent, "absence updated");

        let application = fetch_application(&self.pool, application_id, false).await?;
        self.answer_sheet(&application, &offer).await
    }

    async fn answer_sheet(&self, application: &Application, offer: &Offer) -> Result<AnswerSheet> {
        let items = load_item_views(&self.pool, offer.booklet_id).await?;
        let answers = sqlx::query_as::<_, StudentAnswer>(
            "SELECT * FROM student_answers WHERE application_id = $1 ORDER BY booklet_item_id",
        )
        .bind(application.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(build_answer_sheet(application, offer, items, &answers))
    }

    async fn owned_offer(&self, principal: &Principal, offer_id: i64) -> Result<Offer> {
        let offer = fetch_offer(&self.pool, offer_id).await?;
        principal.ensure_owner(offer.created_by, NOT_OWNER)?;
        Ok(offer)
    }

    async fn load_applications(
        &self,
        offer_id: i64,
        class_ref: Option<i64>,
    ) -> Result<(Vec<Application>, HashMap<i64, Vec<StudentAnswer>>)> {
        let applications = sqlx::query_as::<_, Application>(
            r#"SELECT * FROM applications
               WHERE offer_id = $1 AND ($2::bigint IS NULL OR class_ref = $2)
               ORDER BY class_ref, student_ref, id"#,
        )
        .bind(offer_id)
        .bind(class_ref)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = applications.iter().map(|a| a.id).collect();
        let answers = sqlx::query_as::<_, StudentAnswer>(
            "SELECT * FROM student_answers WHERE application_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_application: HashMap<i64, Vec<StudentAnswer>> = HashMap::new();
        for answer in answers {
            by_application.entry(answer.application_id).or_default().push(answer);
        }
        Ok((applications, by_application))
    }
}

fn answers_of(answers: &HashMap<i64, Vec<StudentAnswer>>, application_id: i64) -> &[StudentAnswer] {
    answers.get(&application_id).map(Vec::as_slice).unwrap_or(&[])
}

async fn fetch_application<'e, E>(executor: E, application_id: i64, lock: bool) -> Result<Application>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = if lock {
        "SELECT * FROM applications WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM applications WHERE id = $1"
    };
    sqlx::query_as::<_, Application>(sql)
        .bind(application_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound("Application not found".to_string()))
}

async fn fetch_offer<'e, E>(executor: E, offer_id: i64) -> Result<Offer>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = $1 AND deleted = FALSE")
        .bind(offer_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound("Offer not found".to_string()))
}

async fn booklet_item_ids<'e, E>(executor: E, booklet_id: i64) -> Result<HashSet<i64>>
where
    E: sqlx::PgExecutor<'e>,
{
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM booklet_items WHERE booklet_id = $1")
        .bind(booklet_id)
        .fetch_all(executor)
        .await?;
    Ok(ids.into_iter().collect())
}

/// Answer key per booklet item, from the version each item pins.
async fn correct_letters(conn: &mut PgConnection, booklet_id: i64) -> Result<HashMap<i64, Option<String>>> {
    let item_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM booklet_items WHERE booklet_id = $1")
        .bind(booklet_id)
        .fetch_all(&mut *conn)
        .await?;
    let rows = sqlx::query_as::<_, ItemOption>(
        r#"
        SELECT bi.id AS booklet_item_id, o.id, o.question_version_id, o.letter,
               o.option_text, o.option_image, o.correct
        FROM booklet_items bi
        JOIN question_options o ON o.question_version_id = bi.question_version_id
        WHERE bi.booklet_id = $1
        "#,
    )
    .bind(booklet_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut options: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
    for row in rows {
        options.entry(row.booklet_item_id).or_default().push(row.option);
    }
    Ok(item_ids
        .into_iter()
        .map(|id| {
            let key = options
                .get(&id)
                .and_then(|opts| GradingService::correct_letter(opts));
            (id, key)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::application::ApplicationStatus;
    use chrono::{NaiveDate, TimeZone};

    fn application(absent: bool, finalized: bool) -> Application {
        Application {
            id: 10,
            offer_id: 3,
            class_ref: 901001,
            student_ref: 7001,
            student_absent: absent,
            finalized_at: finalized.then(|| Utc.with_ymd_and_hms(2026, 3, 12, 10, 0, 0).unwrap()),
            finalized_by: finalized.then_some(1),
        }
    }

    fn offer() -> Offer {
        Offer {
            id: 3,
            booklet_id: 5,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            description: Some("Diagnóstica".to_string()),
            deleted: false,
            created_by: 1,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    fn item(id: i64, order: i32) -> BookletItemView {
        BookletItemView {
            id,
            booklet_id: 5,
            order,
            question_id: id * 10,
            question_version_id: id * 100,
            version_number: 1,
            title: format!("Q{}", order),
            command: "Marque a alternativa correta".to_string(),
            subject_id: 1,
            subject_name: Some("Matemática".to_string()),
            annulled: false,
        }
    }

    fn answer(item: i64, selected: Option<&str>, is_correct: bool) -> StudentAnswer {
        StudentAnswer {
            id: item,
            application_id: 10,
            booklet_item_id: item,
            selected_option: selected.map(str::to_string),
            is_correct,
        }
    }

    #[test]
    fn complete_answer_set_finalizes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap();
        let done = recompute_finalization(2, 2, 7, now);
        assert_eq!(done.finalized_at, Some(now));
        assert_eq!(done.finalized_by, Some(7));

        let partial = recompute_finalization(1, 2, 7, now);
        assert_eq!(partial.finalized_at, None);
        assert_eq!(partial.finalized_by, None);

        let empty_booklet = recompute_finalization(0, 0, 7, now);
        assert_eq!(empty_booklet.finalized_at, None);
    }

    #[test]
    fn answer_sheet_has_one_slot_per_item() {
        let items = vec![item(1, 1), item(2, 2), item(3, 3)];
        let answers = vec![answer(1, Some("a"), true), answer(3, Some("C"), false)];
        let sheet = build_answer_sheet(&application(false, false), &offer(), items, &answers);

        assert_eq!(sheet.items_total, 3);
        assert_eq!(sheet.answers.len(), 3);
        assert_eq!(sheet.answers[0].selected_option.as_deref(), Some("A"));
        assert!(sheet.answers[0].is_correct);
        assert_eq!(sheet.answers[1].selected_option, None);
        assert!(!sheet.answers[1].is_correct);
        assert_eq!(sheet.summary.correct, 1);
        assert_eq!(sheet.summary.wrong, 1);
        assert_eq!(sheet.summary.blank, 1);
        assert_eq!(sheet.summary.status, ApplicationStatus::Recognized);
    }

    #[test]
    fn absent_sheet_reports_absent_status() {
        let answers = vec![answer(1, Some("A"), true)];
        let sheet = build_answer_sheet(&application(true, false), &offer(), vec![item(1, 1)], &answers);
        assert_eq!(sheet.summary.status, ApplicationStatus::Absent);
        assert!(sheet.student_absent);
    }

    #[test]
    fn row_uses_stored_finalization() {
        let row = application_row(&application(false, true), &[], &HashSet::from([1, 2]), "Ana".to_string());
        assert_eq!(row.status, ApplicationStatus::Finalized);
        assert_eq!(row.blank, 2);
        assert_eq!(row.student_name, "Ana");
    }
}
