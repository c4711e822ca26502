use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    Extension,
};

use crate::{
    dto::application_dto::{
        ApplicationsQuery, MarkAbsentPayload, SubmitAnswersPayload, SyncApplicationsPayload,
    },
    error::Result,
    middleware::auth::Principal,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/offers/{id}/applications/sync",
    params(("id" = i64, Path, description = "Offer ID")),
    request_body = SyncApplicationsPayload,
    responses(
        (status = 200, description = "Applications of the class after the sync"),
        (status = 400, description = "Invalid class or student refs"),
        (status = 404, description = "Offer not found")
    )
)]
#[axum::debug_handler]
pub async fn sync_applications(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(offer_id): Path<i64>,
    Json(payload): Json<SyncApplicationsPayload>,
) -> Result<impl IntoResponse> {
    let response = state
        .application_service
        .sync_students(&principal, offer_id, payload)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/offers/{id}/applications",
    params(("id" = i64, Path, description = "Offer ID"), ApplicationsQuery),
    responses(
        (status = 200, description = "Applications with their answer summary"),
        (status = 404, description = "Offer not found")
    )
)]
#[axum::debug_handler]
pub async fn list_applications(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(offer_id): Path<i64>,
    Query(query): Query<ApplicationsQuery>,
) -> Result<impl IntoResponse> {
    let response = state
        .application_service
        .list_applications(&principal, offer_id, query.class_ref)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/applications/{id}/answers",
    params(("id" = i64, Path, description = "Application ID")),
    responses(
        (status = 200, description = "Answer sheet of the application"),
        (status = 404, description = "Application not found")
    )
)]
#[axum::debug_handler]
pub async fn get_answers(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(application_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let sheet = state
        .application_service
        .get_answers(&principal, application_id)
        .await?;
    Ok(Json(sheet))
}

#[utoipa::path(
    put,
    path = "/api/applications/{id}/answers",
    params(("id" = i64, Path, description = "Application ID")),
    request_body = SubmitAnswersPayload,
    responses(
        (status = 200, description = "Answers recorded and finalization recomputed"),
        (status = 400, description = "Invalid option letter"),
        (status = 404, description = "Application not found"),
        (status = 409, description = "Offer not open or item outside the booklet")
    )
)]
#[axum::debug_handler]
pub async fn submit_answers(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(application_id): Path<i64>,
    Json(payload): Json<SubmitAnswersPayload>,
) -> Result<impl IntoResponse> {
    let sheet = state
        .application_service
        .submit_answers(&principal, application_id, payload)
        .await?;
    Ok(Json(sheet))
}

#[utoipa::path(
    patch,
    path = "/api/applications/{id}/absent",
    params(("id" = i64, Path, description = "Application ID")),
    request_body = MarkAbsentPayload,
    responses(
        (status = 200, description = "Absence flag updated"),
        (status = 400, description = "student_absent missing"),
        (status = 404, description = "Application not found")
    )
)]
#[axum::debug_handler]
pub async fn mark_absent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(application_id): Path<i64>,
    Json(payload): Json<MarkAbsentPayload>,
) -> Result<impl IntoResponse> {
    let sheet = state
        .application_service
        .mark_absent(&principal, application_id, payload)
        .await?;
    Ok(Json(sheet))
}
