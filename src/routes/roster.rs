use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};

use crate::{
    error::Result,
    middleware::auth::Principal,
    services::roster_service::{School, SchoolClass, Student},
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/roster/schools",
    responses(
        (status = 200, description = "Schools visible to the caller", body = Vec<School>),
        (status = 502, description = "Roster provider failed")
    )
)]
#[axum::debug_handler]
pub async fn list_schools(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse> {
    let schools = state.roster.list_schools(&principal).await?;
    Ok(Json(schools))
}

#[utoipa::path(
    get,
    path = "/api/roster/schools/{school_ref}/classes",
    params(("school_ref" = i64, Path, description = "School reference (INEP code)")),
    responses(
        (status = 200, description = "Classes of the school", body = Vec<SchoolClass>),
        (status = 502, description = "Roster provider failed")
    )
)]
#[axum::debug_handler]
pub async fn list_classes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(school_ref): Path<i64>,
) -> Result<impl IntoResponse> {
    let classes = state.roster.list_classes(&principal, school_ref).await?;
    Ok(Json(classes))
}

#[utoipa::path(
    get,
    path = "/api/roster/classes/{class_ref}/students",
    params(("class_ref" = i64, Path, description = "Class reference")),
    responses(
        (status = 200, description = "Students enrolled in the class", body = Vec<Student>),
        (status = 502, description = "Roster provider failed")
    )
)]
#[axum::debug_handler]
pub async fn list_students(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(class_ref): Path<i64>,
) -> Result<impl IntoResponse> {
    let students = state.roster.list_students(&principal, class_ref).await?;
    Ok(Json(students))
}
