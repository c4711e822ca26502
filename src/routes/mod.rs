pub mod applications;
pub mod booklets;
pub mod health;
pub mod offers;
pub mod questions;
pub mod reports;
pub mod roster;

use axum::{
    middleware::from_fn_with_state,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use utoipa::OpenApi;

use crate::{
    dto::{
        application_dto::{
            AnswerPayload, MarkAbsentPayload, SubmitAnswersPayload, SyncApplicationsPayload,
            SyncStudent,
        },
        booklet_dto::{AddQuestionPayload, CreateBookletPayload, ItemPlacement},
        offer_dto::OfferPayload,
        question_dto::{
            CreateQuestionPayload, OptionPayload, PatchQuestionPayload, QuestionContentPayload,
        },
        report_dto::{
            AccuracyBucket, ClassRollupRow, DistributionBucket, ItemReportRow, OfferFinalization,
            OfferReport, OverviewReport, RecentOffer, ReportTotals, StudentReportRow,
        },
    },
    middleware::{
        auth::require_bearer_auth,
        rate_limit::{rps_middleware, RateLimiter},
    },
    models::application::ApplicationStatus,
    services::roster_service::{School, SchoolClass, Student},
    AppState,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        questions::create_question,
        questions::list_questions,
        questions::get_question,
        questions::update_question,
        questions::patch_question,
        questions::delete_question,
        booklets::create_booklet,
        booklets::list_booklets,
        booklets::get_booklet,
        booklets::delete_booklet,
        booklets::add_question,
        booklets::list_items,
        booklets::replace_items,
        offers::create_offer,
        offers::list_offers,
        offers::get_offer,
        offers::update_offer,
        offers::delete_offer,
        applications::sync_applications,
        applications::list_applications,
        applications::get_answers,
        applications::submit_answers,
        applications::mark_absent,
        reports::offer_summary,
        reports::offer_by_class,
        reports::overview,
        roster::list_schools,
        roster::list_classes,
        roster::list_students,
    ),
    components(schemas(
        OptionPayload,
        QuestionContentPayload,
        CreateQuestionPayload,
        PatchQuestionPayload,
        CreateBookletPayload,
        AddQuestionPayload,
        ItemPlacement,
        OfferPayload,
        SyncStudent,
        SyncApplicationsPayload,
        AnswerPayload,
        SubmitAnswersPayload,
        MarkAbsentPayload,
        ApplicationStatus,
        StudentReportRow,
        ItemReportRow,
        DistributionBucket,
        AccuracyBucket,
        ReportTotals,
        OfferReport,
        ClassRollupRow,
        OfferFinalization,
        RecentOffer,
        OverviewReport,
        School,
        SchoolClass,
        Student,
    )),
    tags((name = "assessment", description = "Question bank, offers, answer sheets and reports"))
)]
pub struct ApiDoc;

#[axum::debug_handler]
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Public routes plus the bearer-protected `/api` surface, rate limited at `api_rps`.
pub fn build_router(state: AppState, api_rps: u32) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(openapi));

    let api = Router::new()
        .route(
            "/api/questions",
            get(questions::list_questions).post(questions::create_question),
        )
        .route(
            "/api/questions/:id",
            get(questions::get_question)
                .put(questions::update_question)
                .patch(questions::patch_question)
                .delete(questions::delete_question),
        )
        .route(
            "/api/booklets",
            get(booklets::list_booklets).post(booklets::create_booklet),
        )
        .route(
            "/api/booklets/:id",
            get(booklets::get_booklet).delete(booklets::delete_booklet),
        )
        .route(
            "/api/booklets/:id/add-question",
            post(booklets::add_question),
        )
        .route(
            "/api/booklets/:id/items",
            get(booklets::list_items).put(booklets::replace_items),
        )
        .route(
            "/api/offers",
            get(offers::list_offers).post(offers::create_offer),
        )
        .route(
            "/api/offers/:id",
            get(offers::get_offer)
                .put(offers::update_offer)
                .delete(offers::delete_offer),
        )
        .route(
            "/api/offers/:id/applications/sync",
            post(applications::sync_applications),
        )
        .route(
            "/api/offers/:id/applications",
            get(applications::list_applications),
        )
        .route(
            "/api/applications/:id/answers",
            get(applications::get_answers).put(applications::submit_answers),
        )
        .route(
            "/api/applications/:id/absent",
            patch(applications::mark_absent),
        )
        .route(
            "/api/offers/:id/reports/summary",
            get(reports::offer_summary),
        )
        .route(
            "/api/offers/:id/reports/by-class",
            get(reports::offer_by_class),
        )
        .route("/api/reports/overview", get(reports::overview))
        .route("/api/roster/schools", get(roster::list_schools))
        .route(
            "/api/roster/schools/:school_ref/classes",
            get(roster::list_classes),
        )
        .route(
            "/api/roster/classes/:class_ref/students",
            get(roster::list_students),
        )
        .layer(from_fn_with_state(state.clone(), require_bearer_auth))
        .layer(from_fn_with_state(RateLimiter::new(api_rps), rps_middleware));

    public.merge(api).with_state(state)
}
