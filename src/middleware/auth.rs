use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

/// The authenticated caller, available to handlers through `Extension<Principal>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub is_superuser: bool,
}

impl Principal {
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        let user_id = claims.sub.trim().parse::<i64>().ok()?;
        let role = claims.role.clone().unwrap_or_default();
        let is_superuser = ["superuser", "admin"]
            .iter()
            .any(|r| r.eq_ignore_ascii_case(role.trim()));
        Some(Self {
            user_id,
            is_superuser,
        })
    }

    pub fn owns(&self, created_by: i64) -> bool {
        self.is_superuser || self.user_id == created_by
    }

    pub fn ensure_owner(&self, created_by: i64, message: &str) -> Result<()> {
        if self.owns(created_by) {
            Ok(())
        } else {
            Err(Error::Forbidden(message.to_string()))
        }
    }
}

fn reject(code: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": code }))).into_response()
}

pub async fn require_bearer_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return reject("missing_authorization");
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return reject("bad_authorization");
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return reject("unsupported_scheme");
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => {
            let Some(principal) = Principal::from_claims(&data.claims) else {
                return reject("invalid_subject");
            };
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "rejected bearer token");
            reject("invalid_token")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: Option<&str>) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: 0,
            role: role.map(str::to_string),
        }
    }

    #[test]
    fn superuser_roles_bypass_ownership() {
        let admin = Principal::from_claims(&claims("7", Some("Admin"))).unwrap();
        assert!(admin.is_superuser);
        assert!(admin.owns(99));

        let professor = Principal::from_claims(&claims("7", Some("professor"))).unwrap();
        assert!(!professor.is_superuser);
        assert!(professor.owns(7));
        assert!(matches!(professor.ensure_owner(8, "nope"), Err(Error::Forbidden(_))));
    }

    #[test]
    fn non_numeric_subject_is_rejected() {
        assert!(Principal::from_claims(&claims("abc", None)).is_none());
    }
}
