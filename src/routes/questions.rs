use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};

use crate::{
    dto::question_dto::{
        CreateQuestionPayload, PatchQuestionPayload, QuestionContentPayload, QuestionQuery,
    },
    error::Result,
    middleware::auth::Principal,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/questions",
    request_body = CreateQuestionPayload,
    responses(
        (status = 201, description = "Question created with version 1"),
        (status = 400, description = "Invalid options or fields"),
        (status = 404, description = "Unknown subject, descriptor or skill")
    )
)]
#[axum::debug_handler]
pub async fn create_question(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateQuestionPayload>,
) -> Result<impl IntoResponse> {
    let question = state.question_service.create_question(&principal, payload).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

#[utoipa::path(
    get,
    path = "/api/questions",
    params(QuestionQuery),
    responses(
        (status = 200, description = "Visible questions with their versions")
    )
)]
#[axum::debug_handler]
pub async fn list_questions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<QuestionQuery>,
) -> Result<impl IntoResponse> {
    let questions = state
        .question_service
        .list_questions(&principal, query.search)
        .await?;
    Ok(Json(questions))
}

#[utoipa::path(
    get,
    path = "/api/questions/{id}",
    params(("id" = i64, Path, description = "Question ID")),
    responses(
        (status = 200, description = "Question with every version"),
        (status = 404, description = "Question not found")
    )
)]
#[axum::debug_handler]
pub async fn get_question(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let question = state.question_service.get_question(&principal, id).await?;
    Ok(Json(question))
}

#[utoipa::path(
    put,
    path = "/api/questions/{id}",
    params(("id" = i64, Path, description = "Question ID")),
    request_body = QuestionContentPayload,
    responses(
        (status = 200, description = "A new version was appended"),
        (status = 400, description = "Invalid options or fields"),
        (status = 403, description = "Not the question owner"),
        (status = 404, description = "Question not found")
    )
)]
#[axum::debug_handler]
pub async fn update_question(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(payload): Json<QuestionContentPayload>,
) -> Result<impl IntoResponse> {
    let question = state.question_service.update(&principal, id, payload).await?;
    Ok(Json(question))
}

#[utoipa::path(
    patch,
    path = "/api/questions/{id}",
    params(("id" = i64, Path, description = "Question ID")),
    request_body = PatchQuestionPayload,
    responses(
        (status = 200, description = "Flags updated in place"),
        (status = 403, description = "Not the question owner"),
        (status = 404, description = "Question not found")
    )
)]
#[axum::debug_handler]
pub async fn patch_question(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(payload): Json<PatchQuestionPayload>,
) -> Result<impl IntoResponse> {
    let question = state.question_service.patch(&principal, id, payload).await?;
    Ok(Json(question))
}

#[utoipa::path(
    delete,
    path = "/api/questions/{id}",
    params(("id" = i64, Path, description = "Question ID")),
    responses(
        (status = 204, description = "Question removed"),
        (status = 403, description = "Not the question owner"),
        (status = 404, description = "Question not found"),
        (status = 409, description = "Question is used by a booklet")
    )
)]
#[axum::debug_handler]
pub async fn delete_question(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.question_service.delete_question(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
