use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Datelike;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;
use utoipa::ToSchema;

use crate::config::{Config, SigeConfig};
use crate::error::{Error, Result};
use crate::middleware::auth::Principal;

const EMBEDDED_FIXTURE: &str = include_str!("../../fixtures/roster.json");
const DEFAULT_FIXTURE_KEY: &str = "default";
const DEFAULT_TOKEN_TTL_SECS: i64 = 300;
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct School {
    pub school_ref: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SchoolClass {
    pub class_ref: i64,
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub serie: Option<i64>,
}

impl SchoolClass {
    /// Explicit serie, else the first number in the class name.
    pub fn serie(&self) -> Option<i64> {
        self.serie
            .filter(|s| *s > 0)
            .or_else(|| extract_serie_from_text(&self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Student {
    pub student_ref: i64,
    pub name: String,
}

/// Source of schools, classes and students. Implementations either read a
/// fixture or call the academic management system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn list_schools(&self, principal: &Principal) -> Result<Vec<School>>;

    async fn list_classes(&self, principal: &Principal, school_ref: i64) -> Result<Vec<SchoolClass>>;

    async fn list_students(&self, principal: &Principal, class_ref: i64) -> Result<Vec<Student>>;
}

pub fn extract_serie_from_text(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Class refs visible to `principal` that belong to `school_ref` (all schools
/// when `None`) and, when given, to `serie`.
pub async fn resolve_class_refs(
    roster: &dyn RosterProvider,
    principal: &Principal,
    school_ref: Option<i64>,
    serie: Option<i64>,
) -> Result<HashSet<i64>> {
    let school_refs = match school_ref {
        Some(school_ref) => vec![school_ref],
        None => roster
            .list_schools(principal)
            .await?
            .into_iter()
            .map(|s| s.school_ref)
            .collect(),
    };

    let mut class_refs = HashSet::new();
    for school_ref in school_refs {
        for class in roster.list_classes(principal, school_ref).await? {
            if serie.is_some() && class.serie() != serie {
                continue;
            }
            class_refs.insert(class.class_ref);
        }
    }
    Ok(class_refs)
}

/// Class display names across every school. Roster failures degrade to an empty map.
pub async fn class_names(roster: &dyn RosterProvider, principal: &Principal) -> HashMap<i64, String> {
    let mut names = HashMap::new();
    let schools = match roster.list_schools(principal).await {
        Ok(schools) => schools,
        Err(e) => {
            tracing::warn!(error = %e, "could not load schools for class names");
            return names;
        }
    };
    for school in schools {
        match roster.list_classes(principal, school.school_ref).await {
            Ok(classes) => {
                for class in classes {
                    let name = class.name.trim();
                    if !name.is_empty() {
                        names.insert(class.class_ref, name.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(school_ref = school.school_ref, error = %e, "could not load classes");
            }
        }
    }
    names
}

/// Student display names keyed by `(class_ref, student_ref)`.
pub async fn student_names(
    roster: &dyn RosterProvider,
    principal: &Principal,
    class_refs: impl IntoIterator<Item = i64>,
) -> HashMap<(i64, i64), String> {
    let mut names = HashMap::new();
    for class_ref in class_refs {
        match roster.list_students(principal, class_ref).await {
            Ok(students) => {
                for student in students {
                    let name = student.name.trim();
                    if !name.is_empty() {
                        names.insert((class_ref, student.student_ref), name.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(class_ref, error = %e, "could not load students");
            }
        }
    }
    names
}

pub fn class_display_name(names: &HashMap<i64, String>, class_ref: i64) -> String {
    names
        .get(&class_ref)
        .cloned()
        .unwrap_or_else(|| format!("Turma {}", class_ref))
}

pub fn student_display_name(
    names: &HashMap<(i64, i64), String>,
    class_ref: i64,
    student_ref: i64,
) -> String {
    names
        .get(&(class_ref, student_ref))
        .cloned()
        .unwrap_or_else(|| format!("Aluno {}", student_ref))
}

/// Picks the live provider when it is configured, the fixture otherwise.
pub fn roster_from_config(config: &Config) -> Result<Arc<dyn RosterProvider>> {
    let fixture = match &config.roster_fixture_path {
        Some(path) => StaticRoster::from_path(path)?,
        None => StaticRoster::embedded()?,
    };
    if config.sige.is_enabled() {
        tracing::info!("using SIGE Acadêmico roster provider");
        Ok(Arc::new(SigeRoster::new(config.sige.clone(), fixture)?))
    } else {
        tracing::info!("using fixture roster provider");
        Ok(Arc::new(fixture))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RosterFixture {
    #[serde(default)]
    schools: Vec<School>,
    #[serde(default)]
    classes_by_school: HashMap<i64, Vec<SchoolClass>>,
    #[serde(default)]
    students_by_class: HashMap<i64, Vec<Student>>,
}

/// Roster fixture keyed by owner id, with a `default` entry for everyone else.
#[derive(Debug, Clone)]
pub struct StaticRoster {
    fixtures: HashMap<String, RosterFixture>,
}

impl StaticRoster {
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_FIXTURE)
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let fixtures: HashMap<String, RosterFixture> = serde_json::from_str(raw)?;
        if !fixtures.contains_key(DEFAULT_FIXTURE_KEY) {
            return Err(Error::Config(
                "Roster fixture must contain a \"default\" entry".to_string(),
            ));
        }
        Ok(Self { fixtures })
    }

    fn fixture_for(&self, principal: &Principal) -> Option<&RosterFixture> {
        self.fixtures
            .get(&principal.user_id.to_string())
            .or_else(|| self.fixtures.get(DEFAULT_FIXTURE_KEY))
    }
}

#[async_trait]
impl RosterProvider for StaticRoster {
    async fn list_schools(&self, principal: &Principal) -> Result<Vec<School>> {
        Ok(self
            .fixture_for(principal)
            .map(|f| f.schools.clone())
            .unwrap_or_default())
    }

    async fn list_classes(&self, principal: &Principal, school_ref: i64) -> Result<Vec<SchoolClass>> {
        Ok(self
            .fixture_for(principal)
            .and_then(|f| f.classes_by_school.get(&school_ref).cloned())
            .unwrap_or_default())
    }

    async fn list_students(&self, principal: &Principal, class_ref: i64) -> Result<Vec<Student>> {
        Ok(self
            .fixture_for(principal)
            .and_then(|f| f.students_by_class.get(&class_ref).cloned())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

fn deserialize_i64_flexible<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        String(String),
    }

    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrString::Int(i)) => Ok(Some(i)),
        Some(IntOrString::String(s)) => Ok(s.trim().parse().ok()),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_i64_flexible")]
    expires_in: Option<i64>,
}

/// How long a freshly issued token is reused: 30s short of its lifetime, at least 30s.
fn token_ttl(expires_in: Option<i64>) -> Duration {
    let expires_in = expires_in
        .filter(|e| *e != 0)
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
    let secs = (expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(TOKEN_EXPIRY_MARGIN_SECS);
    Duration::from_secs(secs as u64)
}

/// Live roster backed by the SIGE Acadêmico REST API. Students are not exposed
/// by that API and come from the fixture.
pub struct SigeRoster {
    client: Client,
    config: SigeConfig,
    base_url: Url,
    token: Mutex<Option<CachedToken>>,
    students: StaticRoster,
}

impl SigeRoster {
    pub fn new(config: SigeConfig, students: StaticRoster) -> Result<Self> {
        let raw_base = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("SIGE_ACADEMICO_BASE_URL is not set".to_string()))?;
        // Trailing slash so that `join` appends instead of replacing the last segment.
        let base_url = Url::parse(&format!("{}/", raw_base.trim_end_matches('/')))
            .map_err(|e| Error::Config(format!("Invalid SIGE_ACADEMICO_BASE_URL: {}", e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            base_url,
            token: Mutex::new(None),
            students,
        })
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.config.access_token {
            return Ok(token.clone());
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let token_url = self
            .config
            .token_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .ok_or_else(|| Error::Config("SIGE_ACADEMICO_TOKEN_URL is not set".to_string()))?;

        let mut form: Vec<(&str, &str)> = vec![("grant_type", self.config.grant_type.as_str())];
        let optional = [
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("username", &self.config.username),
            ("password", &self.config.password),
            ("scope", &self.config.scope),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                form.push((key, value.as_str()));
            }
        }

        let response = self
            .client
            .post(token_url)
            .timeout(Duration::from_secs(20))
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Roster(format!("SIGE authentication failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(%status, "SIGE token endpoint rejected the request");
            return Err(Error::Roster(format!("SIGE authentication failed ({})", status)));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Roster(format!("SIGE authentication failed: {}", e)))?;
        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Roster("SIGE token response has no access_token".to_string()))?;

        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + token_ttl(body.expires_in),
        });
        Ok(access_token)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let token = self.access_token().await?;
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Roster(format!("Invalid SIGE path {}: {}", path, e)))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            *self.token.lock().await = None;
        }
        let raw = response.text().await?;
        if !status.is_success() {
            tracing::error!(%status, path, "SIGE request failed");
            let detail = if raw.trim().is_empty() { "no detail" } else { raw.trim() };
            return Err(Error::Roster(format!("SIGE error ({}): {}", status.as_u16(), detail)));
        }
        if raw.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        serde_json::from_str(&raw).map_err(|e| Error::Roster(format!("Invalid SIGE response: {}", e)))
    }
}

#[async_trait]
impl RosterProvider for SigeRoster {
    async fn list_schools(&self, _principal: &Principal) -> Result<Vec<School>> {
        let payload = self.get("/escolas").await?;
        Ok(as_list(payload).iter().filter_map(parse_school).collect())
    }

    async fn list_classes(&self, _principal: &Principal, school_ref: i64) -> Result<Vec<SchoolClass>> {
        let payload = self.get(&format!("/escolas/{}/turmas", school_ref)).await?;
        let current_year = crate::utils::time::today().year();

        let mut classes = Vec::new();
        for row in as_list(payload) {
            let Some(class_ref) = first_int(&row, &["codigo", "class_ref", "id"]) else {
                continue;
            };
            let detail = self.get(&format!("/turmas/{}", class_ref)).await?;
            classes.push(parse_class(class_ref, &row, &detail, current_year));
        }
        Ok(classes)
    }

    async fn list_students(&self, principal: &Principal, class_ref: i64) -> Result<Vec<Student>> {
        self.students.list_students(principal, class_ref).await
    }
}

/// A bare array, or an object wrapping one under a conventional key.
fn as_list(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => ["results", "data", "items", "content"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// First non-blank value among `keys`.
fn first_present<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find(|value| !is_blank(value))
}

fn value_as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn first_int(row: &Value, keys: &[&str]) -> Option<i64> {
    first_present(row, keys).and_then(value_as_int)
}

fn parse_school(row: &Value) -> Option<School> {
    if !row.is_object() {
        return None;
    }
    let school_ref = first_int(row, &["inep", "codigo_inep", "school_ref", "id"])?;
    let name = first_present(row, &["nome", "nome_escola", "name"])
        .map(value_as_text)
        .unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some(School { school_ref, name })
}

fn parse_class(class_ref: i64, row: &Value, detail: &Value, current_year: i32) -> SchoolClass {
    let name = first_present(row, &["nome", "descricao"])
        .or_else(|| first_present(detail, &["nome", "descricao"]))
        .map(value_as_text)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Turma {}", class_ref));
    let year = first_present(row, &["ano_letivo"])
        .or_else(|| first_present(detail, &["ano_letivo"]))
        .or_else(|| first_present(row, &["year"]))
        .or_else(|| first_present(detail, &["year"]))
        .and_then(value_as_int)
        .and_then(|y| i32::try_from(y).ok())
        .unwrap_or(current_year);
    let serie = detail.get("serie").and_then(value_as_int);

    SchoolClass {
        class_ref,
        name,
        year,
        serie,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn principal(user_id: i64) -> Principal {
        Principal {
            user_id,
            is_superuser: false,
        }
    }

    #[test]
    fn serie_comes_from_the_first_number_in_the_name() {
        assert_eq!(extract_serie_from_text("2º Ano Integral A"), Some(2));
        assert_eq!(extract_serie_from_text("Turma 12 - 3º"), Some(12));
        assert_eq!(extract_serie_from_text("Integral"), None);

        let class = SchoolClass {
            class_ref: 1,
            name: "1º Ano".to_string(),
            year: 2026,
            serie: Some(3),
        };
        assert_eq!(class.serie(), Some(3));
    }

    #[tokio::test]
    async fn fixture_is_keyed_by_owner_with_default_fallback() {
        let roster = StaticRoster::embedded().unwrap();

        let owner_one = roster.list_schools(&principal(1)).await.unwrap();
        assert_eq!(owner_one[0].school_ref, 1201);

        let anyone = roster.list_schools(&principal(42)).await.unwrap();
        let refs: Vec<i64> = anyone.iter().map(|s| s.school_ref).collect();
        assert_eq!(refs, vec![1101, 1102]);

        let students = roster.list_students(&principal(42), 901001).await.unwrap();
        assert_eq!(students.len(), 3);
        assert!(roster.list_classes(&principal(42), 9999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolves_classes_by_school_and_serie() {
        let roster = StaticRoster::embedded().unwrap();
        let p = principal(42);

        let school = resolve_class_refs(&roster, &p, Some(1101), None).await.unwrap();
        assert_eq!(school, HashSet::from([901001, 901002]));

        let second_grade = resolve_class_refs(&roster, &p, None, Some(2)).await.unwrap();
        assert_eq!(second_grade, HashSet::from([902001]));

        let none = resolve_class_refs(&roster, &p, Some(1101), Some(3)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn names_fall_back_when_unknown() {
        let roster = StaticRoster::embedded().unwrap();
        let p = principal(42);
        let classes = class_names(&roster, &p).await;
        assert_eq!(class_display_name(&classes, 902002), "3º Ano Integral B");
        assert_eq!(class_display_name(&classes, 5), "Turma 5");

        let students = student_names(&roster, &p, [901001]).await;
        assert_eq!(student_display_name(&students, 901001, 7001), "Ana Clara Sousa");
        assert_eq!(student_display_name(&students, 901001, 8000), "Aluno 8000");
    }

    #[test]
    fn fixture_without_default_is_rejected() {
        assert!(StaticRoster::from_json(r#"{"1": {}}"#).is_err());
    }

    #[test]
    fn token_ttl_keeps_a_safety_margin() {
        assert_eq!(token_ttl(None), Duration::from_secs(270));
        assert_eq!(token_ttl(Some(3600)), Duration::from_secs(3570));
        assert_eq!(token_ttl(Some(40)), Duration::from_secs(30));
    }

    #[test]
    fn token_response_accepts_string_expiry() {
        let body: TokenResponse =
            serde_json::from_value(json!({"access_token": "abc", "expires_in": "600"})).unwrap();
        assert_eq!(body.expires_in, Some(600));
        let body: TokenResponse = serde_json::from_value(json!({"access_token": "abc"})).unwrap();
        assert_eq!(body.expires_in, None);
    }

    #[test]
    fn lists_may_be_wrapped() {
        assert_eq!(as_list(json!([1, 2])).len(), 2);
        assert_eq!(as_list(json!({"data": [1]})).len(), 1);
        assert_eq!(as_list(json!({"content": [1, 2, 3]})).len(), 3);
        assert!(as_list(json!({"other": [1]})).is_empty());
        assert!(as_list(json!("x")).is_empty());
    }

    #[test]
    fn parses_schools_leniently() {
        let school = parse_school(&json!({"codigo_inep": "23000001", "nome_escola": " EEMTI A "}));
        assert_eq!(
            school,
            Some(School {
                school_ref: 23000001,
                name: "EEMTI A".to_string()
            })
        );
        assert_eq!(parse_school(&json!({"inep": 0, "id": 7, "name": "B"})).map(|s| s.school_ref), Some(7));
        assert!(parse_school(&json!({"id": 7})).is_none());
        assert!(parse_school(&json!("row")).is_none());
    }

    #[test]
    fn parses_class_with_detail_fallbacks() {
        let class = parse_class(
            55,
            &json!({"codigo": 55}),
            &json!({"descricao": "2ª Série B", "ano_letivo": "2025", "serie": 2}),
            2026,
        );
        assert_eq!(class.name, "2ª Série B");
        assert_eq!(class.year, 2025);
        assert_eq!(class.serie, Some(2));

        let bare = parse_class(56, &json!({}), &json!({}), 2026);
        assert_eq!(bare.name, "Turma 56");
        assert_eq!(bare.year, 2026);
        assert_eq!(bare.serie, None);
    }

    #[test]
    fn sige_base_url_must_parse() {
        let fixture = StaticRoster::embedded().unwrap();
        let config = SigeConfig {
            base_url: Some("not a url".to_string()),
            token_url: Some("https://sige.example/oauth/token".to_string()),
            ..SigeConfig::default()
        };
        assert!(matches!(
            SigeRoster::new(config, fixture.clone()),
            Err(Error::Config(_))
        ));

        let config = SigeConfig {
            base_url: Some("https://sige.example/api/v1/".to_string()),
            ..SigeConfig::default()
        };
        let roster = SigeRoster::new(config, fixture).unwrap();
        assert_eq!(
            roster.base_url.join("escolas").unwrap().as_str(),
            "https://sige.example/api/v1/escolas"
        );
    }
}
