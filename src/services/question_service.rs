use std::collections::HashMap;

use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::dto::question_dto::{
    CreateQuestionPayload, OptionPayload, PatchQuestionPayload, QuestionContentPayload,
};
use crate::error::{Error, Result};
use crate::middleware::auth::Principal;
use crate::models::question::{
    Question, QuestionDetail, QuestionOption, QuestionVersion, VersionWithOptions, MAX_OPTIONS,
    MIN_OPTIONS, OPTION_LETTERS,
};

const NOT_OWNER: &str = "You can only change questions you created";

/// An option after letter inference and content checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalOption {
    pub letter: char,
    pub option_text: Option<String>,
    pub option_image: Option<String>,
    pub correct: bool,
}

/// Validates raw option payloads and returns them with canonical letters.
///
/// Letters may be omitted and are then inferred by position. Taken together the
/// letters must be exactly `A..` for the option count, in any order; options are
/// returned sorted by letter. Every option carries text or an image, never both,
/// and exactly one is correct.
pub fn normalize_options(raw: &[OptionPayload]) -> Result<Vec<CanonicalOption>> {
    if raw.len() < MIN_OPTIONS || raw.len() > MAX_OPTIONS {
        return Err(Error::invalid(
            "options",
            format!(
                "A question needs between {} and {} options, got {}",
                MIN_OPTIONS,
                MAX_OPTIONS,
                raw.len()
            ),
        ));
    }

    let mut seen: Vec<char> = Vec::with_capacity(raw.len());
    let mut options = Vec::with_capacity(raw.len());
    for (idx, payload) in raw.iter().enumerate() {
        let expected = OPTION_LETTERS[idx];
        let letter = match payload.letter.as_deref().map(str::trim) {
            None | Some("") => expected,
            Some(given) => {
                let upper = given.to_ascii_uppercase();
                let mut chars = upper.chars();
                let letter = match (chars.next(), chars.next()) {
                    (Some(c), None) if OPTION_LETTERS.contains(&c) => c,
                    _ => {
                        return Err(Error::invalid(
                            "options",
                            format!("Invalid option letter '{}'", given),
                        ))
                    }
                };
                if seen.contains(&letter) {
                    return Err(Error::invalid(
                        "options",
                        format!("Duplicate option letter '{}'", letter),
                    ));
                }
                letter
            }
        };
        if !OPTION_LETTERS[..raw.len()].contains(&letter) {
            return Err(Error::invalid(
                "options",
                format!(
                    "Option letters must be A..{} for {} options; found '{}'",
                    OPTION_LETTERS[raw.len() - 1],
                    raw.len(),
                    letter
                ),
            ));
        }
        seen.push(letter);

        let text = non_blank(payload.option_text.as_deref());
        let image = non_blank(payload.option_image.as_deref());
        match (&text, &image) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid(
                    "option",
                    format!("Option {} must have text or an image, not both", letter),
                ))
            }
            (None, None) => {
                return Err(Error::invalid(
                    "option",
                    format!("Option {} must have text or an image", letter),
                ))
            }
            _ => {}
        }

        options.push(CanonicalOption {
            letter,
            option_text: text,
            option_image: image,
            correct: payload.correct,
        });
    }

    options.sort_by_key(|o| o.letter);

    let correct_count = options.iter().filter(|o| o.correct).count();
    if correct_count != 1 {
        return Err(Error::invalid(
            "options",
            format!("Exactly one option must be correct, got {}", correct_count),
        ));
    }

    Ok(options)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn validate_content(content: &QuestionContentPayload) -> Result<Vec<CanonicalOption>> {
    content.validate()?;
    if content.title.trim().is_empty() {
        return Err(Error::invalid("title", "Title is required"));
    }
    if content.command.trim().is_empty() {
        return Err(Error::invalid("command", "Command is required"));
    }
    normalize_options(&content.options)
}

#[derive(Clone)]
pub struct QuestionService {
    pool: PgPool,
}

impl QuestionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_question(
        &self,
        principal: &Principal,
        payload: CreateQuestionPayload,
    ) -> Result<QuestionDetail> {
        payload.validate()?;
        let options = validate_content(&payload.content)?;

        let mut tx = self.pool.begin().await?;
        let question = sqlx::query_as::<_, Question>(
            r#"INSERT INTO questions (private, deleted, created_by)
               VALUES ($1, FALSE, $2)
               RETURNING *"#,
        )
        .bind(payload.private)
        .bind(principal.user_id)
        .fetch_one(&mut *tx)
        .await?;
        let version = insert_version(&mut *tx, question.id, &payload.content, &options).await?;
        tx.commit().await?;

        tracing::info!(question_id = question.id, user_id = principal.user_id, "question created");
        Ok(QuestionDetail {
            question,
            versions: vec![version],
        })
    }

    /// Appends version N+1; earlier versions are never touched.
    pub async fn create_version(
        &self,
        principal: &Principal,
        question_id: i64,
        content: QuestionContentPayload,
    ) -> Result<VersionWithOptions> {
        let options = validate_content(&content)?;

        let mut tx = self.pool.begin().await?;
        let question = sqlx::query_as::<_, Question>(
            "SELECT * FROM questions WHERE id = $1 AND deleted = FALSE FOR UPDATE",
        )
        .bind(question_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("Question not found".to_string()))?;
        principal.ensure_owner(question.created_by, NOT_OWNER)?;

        let version = insert_version(&mut *tx, question.id, &content, &options).await?;
        tx.commit().await?;

        tracing::info!(
            question_id,
            version_number = version.version.version_number,
            "question version created"
        );
        Ok(version)
    }

    /// Content edits always go through a new version.
    pub async fn update(
        &self,
        principal: &Principal,
        question_id: i64,
        content: QuestionContentPayload,
    ) -> Result<QuestionDetail> {
        self.create_version(principal, question_id, content).await?;
        self.get_question(principal, question_id).await
    }

    pub async fn patch(
        &self,
        principal: &Principal,
        question_id: i64,
        payload: PatchQuestionPayload,
    ) -> Result<QuestionDetail> {
        let mut tx = self.pool.begin().await?;
        let question = sqlx::query_as::<_, Question>(
            "SELECT * FROM questions WHERE id = $1 AND deleted = FALSE FOR UPDATE",
        )
        .bind(question_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("Question not found".to_string()))?;
        principal.ensure_owner(question.created_by, NOT_OWNER)?;

        if let Some(private) = payload.private {
            sqlx::query("UPDATE questions SET private = $1 WHERE id = $2")
                .bind(private)
                .bind(question_id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(annulled) = payload.annulled {
            let result = sqlx::query(
                r#"UPDATE question_versions SET annulled = $1
                   WHERE id = (
                       SELECT id FROM question_versions
                       WHERE question_id = $2
                       ORDER BY version_number DESC
                       LIMIT 1
                   )"#,
            )
            .bind(annulled)
            .bind(question_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(Error::State("Question has no version to annul".to_string()));
            }
        }
        tx.commit().await?;

        self.get_question(principal, question_id).await
    }

    pub async fn delete_question(&self, principal: &Principal, question_id: i64) -> Result<()> {
        let question = self.fetch_live(question_id).await?;
        principal.ensure_owner(question.created_by, NOT_OWNER)?;

        let in_use: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM booklet_items WHERE question_id = $1)",
        )
        .bind(question_id)
        .fetch_one(&self.pool)
        .await?;
        if in_use {
            return Err(Error::State(
                "This question is used by a booklet and cannot be removed".to_string(),
            ));
        }

        sqlx::query("UPDATE questions SET deleted = TRUE WHERE id = $1")
            .bind(question_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_question(&self, principal: &Principal, question_id: i64) -> Result<QuestionDetail> {
        let question = self.fetch_live(question_id).await?;
        if question.private && !principal.owns(question.created_by) {
            return Err(Error::NotFound("Question not found".to_string()));
        }
        let mut details = self.load_details(vec![question]).await?;
        details
            .pop()
            .ok_or_else(|| Error::NotFound("Question not found".to_string()))
    }

    pub async fn list_questions(
        &self,
        principal: &Principal,
        search: Option<String>,
    ) -> Result<Vec<QuestionDetail>> {
        let pattern = search.map(|s| format!("%{}%", s));
        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT q.* FROM questions q
            WHERE q.deleted = FALSE
              AND ($1 OR q.private = FALSE OR q.created_by = $2)
              AND ($3::text IS NULL OR EXISTS (
                  SELECT 1 FROM question_versions v
                  LEFT JOIN subjects s ON s.id = v.subject_id
                  WHERE v.question_id = q.id
                    AND (v.title ILIKE $3 OR v.command ILIKE $3
                         OR v.support_text ILIKE $3 OR s.name ILIKE $3)
              ))
            ORDER BY q.created_at DESC, q.id DESC
            "#,
        )
        .bind(principal.is_superuser)
        .bind(principal.user_id)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        self.load_details(questions).await
    }

    async fn fetch_live(&self, question_id: i64) -> Result<Question> {
        sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1 AND deleted = FALSE")
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Question not found".to_string()))
    }

    async fn load_details(&self, questions: Vec<Question>) -> Result<Vec<QuestionDetail>> {
        let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
        let versions = sqlx::query_as::<_, QuestionVersion>(
            r#"SELECT * FROM question_versions
               WHERE question_id = ANY($1)
               ORDER BY question_id, version_number"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let version_ids: Vec<i64> = versions.iter().map(|v| v.id).collect();
        let options = sqlx::query_as::<_, QuestionOption>(
            r#"SELECT * FROM question_options
               WHERE question_version_id = ANY($1)
               ORDER BY question_version_id, letter"#,
        )
        .bind(&version_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options_by_version: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
        for option in options {
            options_by_version
                .entry(option.question_version_id)
                .or_default()
                .push(option);
        }
        let mut versions_by_question: HashMap<i64, Vec<VersionWithOptions>> = HashMap::new();
        for version in versions {
            let options = options_by_version.remove(&version.id).unwrap_or_default();
            versions_by_question
                .entry(version.question_id)
                .or_default()
                .push(VersionWithOptions { version, options });
        }

        Ok(questions
            .into_iter()
            .map(|question| {
                let versions = versions_by_question.remove(&question.id).unwrap_or_default();
                QuestionDetail { question, versions }
            })
            .collect())
    }
}

/// Inserts the next version of `question_id` with its options. The caller holds
/// the question row lock, so `MAX(version_number) + 1` cannot race.
async fn insert_version(
    conn: &mut PgConnection,
    question_id: i64,
    content: &QuestionContentPayload,
    options: &[CanonicalOption],
) -> Result<VersionWithOptions> {
    ensure_reference(conn, "subjects", content.subject_id, "Subject").await?;
    if let Some(descriptor_id) = content.descriptor_id {
        ensure_reference(conn, "descriptors", descriptor_id, "Descriptor").await?;
    }
    if let Some(skill_id) = content.skill_id {
        ensure_reference(conn, "skills", skill_id, "Skill").await?;
    }

    let next_number: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version_number), 0) + 1 FROM question_versions WHERE question_id = $1",
    )
    .bind(question_id)
    .fetch_one(&mut *conn)
    .await?;

    let version = sqlx::query_as::<_, QuestionVersion>(
        r#"
        INSERT INTO question_versions (
            question_id, version_number, title, command, support_text, support_image,
            image_reference, subject_id, descriptor_id, skill_id, annulled
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
        RETURNING *
        "#,
    )
    .bind(question_id)
    .bind(next_number)
    .bind(content.title.trim())
    .bind(content.command.trim())
    .bind(&content.support_text)
    .bind(&content.support_image)
    .bind(&content.image_reference)
    .bind(content.subject_id)
    .bind(content.descriptor_id)
    .bind(content.skill_id)
    .fetch_one(&mut *conn)
    .await?;

    let mut stored = Vec::with_capacity(options.len());
    for option in options {
        let row = sqlx::query_as::<_, QuestionOption>(
            r#"
            INSERT INTO question_options (question_version_id, letter, option_text, option_image, correct)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(version.id)
        .bind(option.letter.to_string())
        .bind(&option.option_text)
        .bind(&option.option_image)
        .bind(option.correct)
        .fetch_one(&mut *conn)
        .await?;
        stored.push(row);
    }

    Ok(VersionWithOptions {
        version,
        options: stored,
    })
}

async fn ensure_reference(conn: &mut PgConnection, table: &str, id: i64, label: &str) -> Result<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table);
    let exists: bool = sqlx::query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
    if exists {
        Ok(())
    } else {
        Err(Error::NotFound(format!("{} {} not found", label, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_option(letter: Option<&str>, correct: bool) -> OptionPayload {
        OptionPayload {
            letter: letter.map(str::to_string),
            option_text: Some("alternative".to_string()),
            option_image: None,
            correct,
        }
    }

    #[test]
    fn rejects_option_counts_outside_two_to_five() {
        let one = vec![text_option(None, true)];
        assert!(normalize_options(&one).is_err());

        let mut six = vec![text_option(None, true)];
        six.extend((0..5).map(|_| text_option(None, false)));
        assert!(normalize_options(&six).is_err());
    }

    #[test]
    fn accepts_two_options() {
        let options = vec![text_option(Some("A"), false), text_option(Some("B"), true)];
        let parsed = normalize_options(&options).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[1].correct);
    }

    #[test]
    fn infers_letters_by_position() {
        let options = vec![
            text_option(None, true),
            text_option(None, false),
            text_option(None, false),
            text_option(None, false),
        ];
        let letters: Vec<char> = normalize_options(&options)
            .unwrap()
            .iter()
            .map(|o| o.letter)
            .collect();
        assert_eq!(letters, vec!['A', 'B', 'C', 'D']);
    }

    #[test]
    fn explicit_letters_may_come_in_any_order() {
        let options = vec![text_option(Some("B"), true), text_option(Some("A"), false)];
        let parsed = normalize_options(&options).unwrap();
        assert_eq!(parsed[0].letter, 'A');
        assert!(!parsed[0].correct);
        assert_eq!(parsed[1].letter, 'B');
        assert!(parsed[1].correct);
    }

    #[test]
    fn rejects_letters_outside_the_prefix() {
        let options = vec![
            text_option(Some("A"), true),
            text_option(Some("C"), false),
            text_option(Some("B"), false),
            text_option(Some("E"), false),
        ];
        let err = normalize_options(&options).unwrap_err();
        assert!(err.to_string().contains("'E'"));
    }

    #[test]
    fn rejects_duplicate_letters() {
        let options = vec![
            text_option(Some("A"), true),
            text_option(Some("A"), false),
            text_option(Some("C"), false),
        ];
        let err = normalize_options(&options).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn lowercase_letters_are_accepted() {
        let options = vec![text_option(Some("a"), true), text_option(Some(" b "), false)];
        assert!(normalize_options(&options).is_ok());
    }

    #[test]
    fn requires_exactly_one_correct_option() {
        let none = vec![
            text_option(None, false),
            text_option(None, false),
            text_option(None, false),
        ];
        assert!(normalize_options(&none).is_err());

        let two = vec![
            text_option(None, true),
            text_option(None, true),
            text_option(None, false),
        ];
        assert!(normalize_options(&two).is_err());
    }

    #[test]
    fn option_content_is_text_xor_image() {
        let both = vec![
            OptionPayload {
                letter: None,
                option_text: Some("text".to_string()),
                option_image: Some("upload_answer/a.png".to_string()),
                correct: true,
            },
            text_option(None, false),
        ];
        let err = normalize_options(&both).unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "option"));

        let neither = vec![
            OptionPayload {
                letter: None,
                option_text: Some("   ".to_string()),
                option_image: None,
                correct: true,
            },
            text_option(None, false),
        ];
        assert!(normalize_options(&neither).is_err());

        let image_only = vec![
            OptionPayload {
                letter: None,
                option_text: None,
                option_image: Some("upload_answer/a.png".to_string()),
                correct: true,
            },
            text_option(None, false),
        ];
        assert!(normalize_options(&image_only).is_ok());
    }
}
