use std::env;
use std::sync::Arc;

use assessment_backend::{
    dto::{
        application_dto::{
            AnswerPayload, MarkAbsentPayload, SubmitAnswersPayload, SyncApplicationsPayload,
            SyncStudent,
        },
        booklet_dto::CreateBookletPayload,
        offer_dto::OfferPayload,
        question_dto::{CreateQuestionPayload, OptionPayload, QuestionContentPayload},
        report_dto::ReportQuery,
    },
    error::Error,
    middleware::auth::Principal,
    models::application::ApplicationStatus,
    services::{
        application_service::ApplicationService, booklet_service::BookletService,
        offer_service::OfferService, question_service::QuestionService,
        report_service::ReportService, roster_service::StaticRoster,
    },
    utils::time,
};
use chrono::{Duration, NaiveDate};
use sqlx::{postgres::PgPoolOptions, PgPool};

async fn setup() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database flow");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    Some(pool)
}

// Owner ids unique per run keep repeated runs against the same database apart.
fn fresh_owner() -> Principal {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    Principal {
        user_id: 1_000_000 + (nanos % 1_000_000_000),
        is_superuser: false,
    }
}

async fn seed_subject(pool: &PgPool, owner: &Principal) -> i64 {
    sqlx::query_scalar("INSERT INTO subjects (name) VALUES ($1) RETURNING id")
        .bind(format!("Matemática {}", owner.user_id))
        .fetch_one(pool)
        .await
        .expect("seed subject")
}

fn content(subject_id: i64, title: &str, correct: usize) -> QuestionContentPayload {
    QuestionContentPayload {
        title: title.to_string(),
        command: format!("{}: escolha a alternativa correta", title),
        support_text: None,
        support_image: None,
        image_reference: None,
        subject_id,
        descriptor_id: None,
        skill_id: None,
        options: ["10", "12", "14", "16"]
            .iter()
            .enumerate()
            .map(|(idx, text)| OptionPayload {
                letter: None,
                option_text: Some(text.to_string()),
                option_image: None,
                correct: idx == correct,
            })
            .collect(),
    }
}

fn offer_payload(booklet: i64, start: NaiveDate, end: NaiveDate) -> OfferPayload {
    OfferPayload {
        booklet,
        start_date: start,
        end_date: end,
        description: Some("Avaliação diagnóstica".to_string()),
    }
}

fn answer(booklet_item: i64, letter: &str) -> AnswerPayload {
    AnswerPayload {
        booklet_item,
        selected_option: Some(letter.to_string()),
    }
}

#[tokio::test]
async fn answer_sheet_lifecycle() {
    let Some(pool) = setup().await else {
        return;
    };
    let owner = fresh_owner();
    let subject_id = seed_subject(&pool, &owner).await;

    let questions = QuestionService::new(pool.clone());
    let booklets = BookletService::new(pool.clone());
    let offers = OfferService::new(pool.clone());
    let roster = Arc::new(StaticRoster::embedded().expect("fixture"));
    let applications = ApplicationService::new(pool.clone(), roster.clone());
    let reports = ReportService::new(pool.clone(), roster);

    let q1 = questions
        .create_question(
            &owner,
            CreateQuestionPayload {
                private: false,
                content: content(subject_id, "Soma", 0),
            },
        )
        .await
        .expect("q1");
    let q2 = questions
        .create_question(
            &owner,
            CreateQuestionPayload {
                private: true,
                content: content(subject_id, "Produto", 1),
            },
        )
        .await
        .expect("q2");
    assert_eq!(q1.versions.len(), 1);
    assert_eq!(q1.versions[0].version.version_number, 1);

    let booklet = booklets
        .create(
            &owner,
            CreateBookletPayload {
                name: " Caderno 1 ".to_string(),
            },
        )
        .await
        .expect("booklet");
    assert_eq!(booklet.name, "Caderno 1");

    let first = booklets
        .add_question(&owner, booklet.id, q1.question.id)
        .await
        .expect("add q1");
    let second = booklets
        .add_question(&owner, booklet.id, q2.question.id)
        .await
        .expect("add q2");
    assert_eq!((first.order, second.order), (1, 2));

    let duplicate = booklets.add_question(&owner, booklet.id, q1.question.id).await;
    assert!(matches!(duplicate, Err(Error::State(_))));
    let after_duplicate = booklets.list_items(&owner, booklet.id).await.expect("items");
    assert_eq!(after_duplicate.len(), 2);
    assert_eq!(
        after_duplicate.iter().filter(|i| i.question_id == q1.question.id).count(),
        1
    );

    // A new version leaves the pinned one in the booklet untouched.
    let updated = questions
        .update(&owner, q1.question.id, content(subject_id, "Soma revisada", 0))
        .await
        .expect("new version");
    assert_eq!(updated.versions.len(), 2);
    assert_eq!(updated.latest().map(|v| v.version.version_number), Some(2));

    let items = booklets.list_items(&owner, booklet.id).await.expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].version_number, 1);
    assert_eq!(items[0].title, "Soma");

    let in_use = questions.delete_question(&owner, q1.question.id).await;
    assert!(matches!(in_use, Err(Error::State(_))));

    let today = time::today();
    let closed = offers
        .create(
            &owner,
            offer_payload(booklet.id, today - Duration::days(10), today - Duration::days(5)),
        )
        .await
        .expect("closed offer");
    let open = offers
        .create(&owner, offer_payload(booklet.id, today, today + Duration::days(3)))
        .await
        .expect("open offer");

    let sync = SyncApplicationsPayload {
        class_ref: 901001,
        students: vec![
            SyncStudent {
                student_ref: 1,
                name: Some("Ana Souza".to_string()),
            },
            SyncStudent {
                student_ref: 2,
                name: None,
            },
        ],
    };
    let synced = applications
        .sync_students(&owner, open.offer.id, sync.clone())
        .await
        .expect("sync");
    assert_eq!(synced.applications.len(), 2);
    let resynced = applications
        .sync_students(&owner, open.offer.id, sync.clone())
        .await
        .expect("resync");
    assert_eq!(resynced.applications.len(), 2);
    assert_eq!(resynced.items_total, 2);

    let closed_apps = applications
        .sync_students(&owner, closed.offer.id, sync)
        .await
        .expect("sync closed");
    let rejected = applications
        .submit_answers(
            &owner,
            closed_apps.applications[0].application_id,
            SubmitAnswersPayload {
                answers: vec![answer(items[0].id, "A")],
            },
        )
        .await;
    assert!(matches!(rejected, Err(Error::State(_))));

    let upcoming = offers
        .create(
            &owner,
            offer_payload(booklet.id, today + Duration::days(2), today + Duration::days(5)),
        )
        .await
        .expect("upcoming offer");
    let upcoming_apps = applications
        .sync_students(
            &owner,
            upcoming.offer.id,
            SyncApplicationsPayload {
                class_ref: 901001,
                students: vec![SyncStudent {
                    student_ref: 1,
                    name: None,
                }],
            },
        )
        .await
        .expect("sync upcoming");
    let too_early = applications
        .submit_answers(
            &owner,
            upcoming_apps.applications[0].application_id,
            SubmitAnswersPayload {
                answers: vec![answer(items[0].id, "A")],
            },
        )
        .await;
    assert!(matches!(too_early, Err(Error::State(_))));

    let ana = synced
        .applications
        .iter()
        .find(|a| a.student_ref == 1)
        .expect("ana")
        .application_id;
    let other = synced
        .applications
        .iter()
        .find(|a| a.student_ref == 2)
        .expect("other")
        .application_id;

    let sheet = applications
        .submit_answers(
            &owner,
            ana,
            SubmitAnswersPayload {
                answers: vec![answer(items[0].id, " a "), answer(items[1].id, "C")],
            },
        )
        .await
        .expect("submit");
    assert!(sheet.finalized_at.is_some());
    assert_eq!(sheet.finalized_by, Some(owner.user_id));
    assert_eq!((sheet.summary.correct, sheet.summary.wrong), (1, 1));
    assert_eq!(sheet.summary.status, ApplicationStatus::Finalized);

    let sheet = applications
        .submit_answers(
            &owner,
            ana,
            SubmitAnswersPayload {
                answers: vec![answer(items[1].id, "")],
            },
        )
        .await
        .expect("clear");
    assert!(sheet.finalized_at.is_none());
    assert_eq!(sheet.summary.blank, 1);
    assert_eq!(sheet.summary.status, ApplicationStatus::Recognized);

    let foreign_item = applications
        .submit_answers(
            &owner,
            ana,
            SubmitAnswersPayload {
                answers: vec![answer(i64::MAX, "A")],
            },
        )
        .await;
    assert!(matches!(foreign_item, Err(Error::State(_))));

    let sheet = applications
        .submit_answers(
            &owner,
            ana,
            SubmitAnswersPayload {
                answers: vec![answer(items[1].id, "B")],
            },
        )
        .await
        .expect("answer again");
    assert_eq!(sheet.summary.correct, 2);
    assert!(sheet.finalized_at.is_some());

    let sheet = applications
        .submit_answers(
            &owner,
            other,
            SubmitAnswersPayload {
                answers: vec![answer(items[0].id, "A"), answer(items[1].id, "A")],
            },
        )
        .await
        .expect("other submits");
    assert!(sheet.finalized_at.is_some());

    // Syncing the same class again keeps the recorded answers and finalizations.
    let resynced = applications
        .sync_students(
            &owner,
            open.offer.id,
            SyncApplicationsPayload {
                class_ref: 901001,
                students: vec![
                    SyncStudent {
                        student_ref: 1,
                        name: None,
                    },
                    SyncStudent {
                        student_ref: 2,
                        name: None,
                    },
                ],
            },
        )
        .await
        .expect("resync with answers");
    let ana_row = resynced
        .applications
        .iter()
        .find(|a| a.application_id == ana)
        .expect("ana row");
    assert_eq!((ana_row.correct, ana_row.blank), (2, 0));
    assert!(ana_row.finalized_at.is_some());
    let other_row = resynced
        .applications
        .iter()
        .find(|a| a.application_id == other)
        .expect("other row");
    assert_eq!(other_row.correct, 1);
    assert!(other_row.finalized_at.is_some());

    let absent = applications
        .mark_absent(
            &owner,
            other,
            MarkAbsentPayload {
                student_absent: Some(true),
            },
        )
        .await
        .expect("absent");
    assert!(absent.student_absent);
    assert!(absent.finalized_at.is_none());
    assert_eq!(absent.finalized_by, None);

    let report = reports
        .offer_report(&owner, open.offer.id, &ReportQuery::default())
        .await
        .expect("report");
    assert_eq!(report.students_total, 2);
    assert_eq!(report.absent_count, 1);
    assert_eq!(report.present_count, 1);
    assert_eq!(report.items_total, 2);
    // Only Ana's full marks remain once the other student is absent.
    assert_eq!(report.avg_correct_pct, 100.0);
    let counts: Vec<usize> = report.distribution.iter().map(|b| b.count).collect();
    assert_eq!(counts, vec![0, 0, 1]);

    // Answers pin the offer to its booklet; dates can still move.
    let other_booklet = booklets
        .create(
            &owner,
            CreateBookletPayload {
                name: "Caderno 2".to_string(),
            },
        )
        .await
        .expect("second booklet");
    let swap = offers
        .update(
            &owner,
            open.offer.id,
            offer_payload(other_booklet.id, today, today + Duration::days(3)),
        )
        .await;
    assert!(matches!(swap, Err(Error::State(_))));
    let extended = offers
        .update(
            &owner,
            open.offer.id,
            offer_payload(booklet.id, today, today + Duration::days(7)),
        )
        .await
        .expect("extend offer");
    assert_eq!(extended.offer.end_date, today + Duration::days(7));

    let stranger = Principal {
        user_id: owner.user_id + 1,
        is_superuser: false,
    };
    let forbidden = reports
        .offer_report(&stranger, open.offer.id, &ReportQuery::default())
        .await;
    assert!(matches!(forbidden, Err(Error::Forbidden(_))));

    // Someone else's private question stays hidden from the stranger's booklets.
    let foreign_booklet = booklets
        .create(
            &stranger,
            CreateBookletPayload {
                name: "Caderno alheio".to_string(),
            },
        )
        .await
        .expect("stranger booklet");
    let hidden = booklets
        .add_question(&stranger, foreign_booklet.id, q2.question.id)
        .await;
    assert!(matches!(hidden, Err(Error::NotFound(_))));
    booklets
        .add_question(&stranger, foreign_booklet.id, q1.question.id)
        .await
        .expect("public question");
}
