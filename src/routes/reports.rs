use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    Extension,
};

use crate::{
    dto::report_dto::{ClassRollupRow, OfferReport, OverviewReport, ReportQuery},
    error::Result,
    middleware::auth::Principal,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/offers/{id}/reports/summary",
    params(("id" = i64, Path, description = "Offer ID"), ReportQuery),
    responses(
        (status = 200, description = "Per-student and per-item statistics", body = OfferReport),
        (status = 400, description = "Malformed class, school or serie"),
        (status = 404, description = "Offer not found"),
        (status = 502, description = "Roster provider failed while resolving the filter")
    )
)]
#[axum::debug_handler]
pub async fn offer_summary(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(offer_id): Path<i64>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse> {
    let report = state
        .report_service
        .offer_report(&principal, offer_id, &query)
        .await?;
    Ok(Json(report))
}

#[utoipa::path(
    get,
    path = "/api/offers/{id}/reports/by-class",
    params(("id" = i64, Path, description = "Offer ID"), ReportQuery),
    responses(
        (status = 200, description = "Accuracy and absence per class", body = Vec<ClassRollupRow>),
        (status = 400, description = "Malformed school or serie"),
        (status = 404, description = "Offer not found"),
        (status = 502, description = "Roster provider failed while resolving the filter")
    )
)]
#[axum::debug_handler]
pub async fn offer_by_class(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(offer_id): Path<i64>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse> {
    let rows = state
        .report_service
        .class_report(&principal, offer_id, &query)
        .await?;
    Ok(Json(rows))
}

#[utoipa::path(
    get,
    path = "/api/reports/overview",
    responses((status = 200, description = "Dashboard across the caller's offers", body = OverviewReport))
)]
#[axum::debug_handler]
pub async fn overview(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse> {
    let report = state.report_service.overview(&principal).await?;
    Ok(Json(report))
}
