use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};

use crate::{
    dto::offer_dto::{OfferPayload, OfferQuery},
    error::Result,
    middleware::auth::Principal,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/offers",
    request_body = OfferPayload,
    responses(
        (status = 201, description = "Offer scheduled"),
        (status = 400, description = "Invalid window, description or booklet")
    )
)]
#[axum::debug_handler]
pub async fn create_offer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<OfferPayload>,
) -> Result<impl IntoResponse> {
    let offer = state.offer_service.create(&principal, payload).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

#[utoipa::path(
    get,
    path = "/api/offers",
    params(OfferQuery),
    responses(
        (status = 200, description = "Offers of the caller"),
        (status = 400, description = "Unknown status")
    )
)]
#[axum::debug_handler]
pub async fn list_offers(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<OfferQuery>,
) -> Result<impl IntoResponse> {
    let offers = state.offer_service.list(&principal, query).await?;
    Ok(Json(offers))
}

#[utoipa::path(
    get,
    path = "/api/offers/{id}",
    params(("id" = i64, Path, description = "Offer ID")),
    responses(
        (status = 200, description = "Offer with its derived status"),
        (status = 404, description = "Offer not found")
    )
)]
#[axum::debug_handler]
pub async fn get_offer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let offer = state.offer_service.get(&principal, id).await?;
    Ok(Json(offer))
}

#[utoipa::path(
    put,
    path = "/api/offers/{id}",
    params(("id" = i64, Path, description = "Offer ID")),
    request_body = OfferPayload,
    responses(
        (status = 200, description = "Offer updated"),
        (status = 400, description = "Invalid window, description or booklet"),
        (status = 404, description = "Offer not found")
    )
)]
#[axum::debug_handler]
pub async fn update_offer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(payload): Json<OfferPayload>,
) -> Result<impl IntoResponse> {
    let offer = state.offer_service.update(&principal, id, payload).await?;
    Ok(Json(offer))
}

#[utoipa::path(
    delete,
    path = "/api/offers/{id}",
    params(("id" = i64, Path, description = "Offer ID")),
    responses(
        (status = 204, description = "Offer removed"),
        (status = 404, description = "Offer not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_offer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.offer_service.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
