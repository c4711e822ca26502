use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use validator::Validate;

use crate::{
    dto::booklet_dto::{AddQuestionPayload, CreateBookletPayload, ItemPlacement},
    error::Result,
    middleware::auth::Principal,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/booklets",
    request_body = CreateBookletPayload,
    responses(
        (status = 201, description = "Booklet created"),
        (status = 400, description = "Invalid payload")
    )
)]
#[axum::debug_handler]
pub async fn create_booklet(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateBookletPayload>,
) -> Result<impl IntoResponse> {
    let booklet = state.booklet_service.create(&principal, payload).await?;
    Ok((StatusCode::CREATED, Json(booklet)))
}

#[utoipa::path(
    get,
    path = "/api/booklets",
    responses((status = 200, description = "Booklets of the caller"))
)]
#[axum::debug_handler]
pub async fn list_booklets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse> {
    let booklets = state.booklet_service.list(&principal).await?;
    Ok(Json(booklets))
}

#[utoipa::path(
    get,
    path = "/api/booklets/{id}",
    params(("id" = i64, Path, description = "Booklet ID")),
    responses(
        (status = 200, description = "Booklet with its items"),
        (status = 404, description = "Booklet not found")
    )
)]
#[axum::debug_handler]
pub async fn get_booklet(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let booklet = state.booklet_service.get(&principal, id).await?;
    Ok(Json(booklet))
}

#[utoipa::path(
    delete,
    path = "/api/booklets/{id}",
    params(("id" = i64, Path, description = "Booklet ID")),
    responses(
        (status = 204, description = "Booklet removed"),
        (status = 404, description = "Booklet not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_booklet(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.booklet_service.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/booklets/{id}/add-question",
    params(("id" = i64, Path, description = "Booklet ID")),
    request_body = AddQuestionPayload,
    responses(
        (status = 201, description = "Latest version pinned at the end of the booklet"),
        (status = 404, description = "Booklet or question not found"),
        (status = 409, description = "Question already in the booklet or without versions")
    )
)]
#[axum::debug_handler]
pub async fn add_question(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(payload): Json<AddQuestionPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let item = state
        .booklet_service
        .add_question(&principal, id, payload.question_id)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[utoipa::path(
    get,
    path = "/api/booklets/{id}/items",
    params(("id" = i64, Path, description = "Booklet ID")),
    responses(
        (status = 200, description = "Items in booklet order"),
        (status = 404, description = "Booklet not found")
    )
)]
#[axum::debug_handler]
pub async fn list_items(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let items = state.booklet_service.list_items(&principal, id).await?;
    Ok(Json(items))
}

#[utoipa::path(
    put,
    path = "/api/booklets/{id}/items",
    params(("id" = i64, Path, description = "Booklet ID")),
    request_body = Vec<ItemPlacement>,
    responses(
        (status = 200, description = "Items replaced"),
        (status = 400, description = "Repeated versions, orders or questions"),
        (status = 409, description = "Answers already recorded for the booklet")
    )
)]
#[axum::debug_handler]
pub async fn replace_items(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(items): Json<Vec<ItemPlacement>>,
) -> Result<impl IntoResponse> {
    let items = state.booklet_service.replace_items(&principal, id, items).await?;
    Ok(Json(items))
}
