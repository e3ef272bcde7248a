//! Hosted backend admin API client
//!
//! Two uses: an "execute SQL" RPC endpoint that stands in for a database
//! connection when no candidate is reachable, and the auth admin endpoints
//! for listing users and resetting a password.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use sqlpush_core::{AdminSettings, FailurePolicy, Secret};

use crate::classify::outcome_for_error;
use crate::error::{AdminError, MigrateError, MigrateResult};
use crate::outcome::{ExecutionReport, RunStatus, StatementOutcome};
use crate::script::{MigrationScript, TRANSACTION_CONTROL_REASON};

/// Users requested per page when listing
pub const USERS_PER_PAGE: u32 = 50;

/// An auth user as returned by the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UsersPage {
    Wrapped { users: Vec<AdminUser> },
    Bare(Vec<AdminUser>),
}

impl UsersPage {
    fn into_users(self) -> Vec<AdminUser> {
        match self {
            UsersPage::Wrapped { users } => users,
            UsersPage::Bare(users) => users,
        }
    }
}

#[derive(Debug, Serialize)]
struct SqlRequest<'a> {
    sql: &'a str,
}

#[derive(Debug, Serialize)]
struct PasswordUpdate<'a> {
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<serde_json::Value>,
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

/// Client for the hosted backend's REST and auth admin APIs
#[derive(Clone)]
pub struct AdminClient {
    base_url: Url,
    service_key: Secret,
    rpc_function: String,
    client: Client,
}

impl AdminClient {
    /// Create a client. Certificates are always verified.
    pub fn new(
        base_url: &str,
        service_key: Secret,
        rpc_function: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdminError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AdminError::configuration(format!("Invalid admin base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AdminError::configuration(format!(
                "Admin base URL cannot carry a path: {}",
                base_url
            )));
        }
        if service_key.is_empty() {
            return Err(AdminError::configuration("Service key is empty"));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdminError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            service_key,
            rpc_function: rpc_function.into(),
            client,
        })
    }

    /// Create a client from settings, resolving the service key reference
    pub fn from_settings(settings: &AdminSettings) -> MigrateResult<Self> {
        settings.validate()?;
        let service_key = settings.service_key.resolve("admin.service_key")?;
        Ok(Self::new(
            &settings.base_url,
            service_key,
            settings.rpc_function.clone(),
            Duration::from_secs(settings.timeout_secs),
        )?)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AdminError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AdminError::configuration("Admin base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn build_headers(&self) -> Result<HeaderMap, AdminError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut api_key = HeaderValue::from_str(self.service_key.expose())
            .map_err(|e| AdminError::configuration(format!("Invalid service key format: {}", e)))?;
        api_key.set_sensitive(true);
        headers.insert(HeaderName::from_static("apikey"), api_key);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.service_key.expose()))
            .map_err(|e| AdminError::configuration(format!("Invalid service key format: {}", e)))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        Ok(headers)
    }

    /// Turn a non-success response into an error carrying its message
    async fn check(response: Response) -> Result<Response, AdminError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let code = body.code.map(|code| match code {
            serde_json::Value::String(code) => code,
            other => other.to_string(),
        });
        let message = body
            .message
            .or(body.msg)
            .or(body.error_description)
            .or(body.error)
            .unwrap_or_else(|| {
                let text = text.trim();
                if text.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    text.to_string()
                }
            });

        Err(AdminError::Http {
            status: status.as_u16(),
            code,
            message,
        })
    }

    /// Run one SQL statement through the RPC endpoint
    pub async fn execute_sql(&self, sql: &str) -> Result<serde_json::Value, AdminError> {
        let endpoint = self.endpoint(&["rest", "v1", "rpc", &self.rpc_function])?;
        debug!("POST {}", endpoint);

        let response = self
            .client
            .post(endpoint)
            .headers(self.build_headers()?)
            .json(&SqlRequest { sql })
            .send()
            .await?;
        let response = Self::check(response).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AdminError::decode(e.to_string()))
    }

    /// Apply a script statement by statement without a surrounding
    /// transaction. Rejected statements are classified like database errors;
    /// transport and authentication errors end the run.
    pub async fn apply_script(
        &self,
        script: &MigrationScript,
        policy: FailurePolicy,
    ) -> MigrateResult<ExecutionReport> {
        let start_time = Instant::now();
        let target = format!("{} (HTTP RPC {})", self.base_url, self.rpc_function);
        let mut report = ExecutionReport::new(script, target);
        report.status = RunStatus::Autocommit;

        info!(
            "Applying '{}' ({} statements) through the admin RPC endpoint",
            script.id(),
            script.len()
        );

        for statement in script.statements() {
            if statement.is_transaction_control() {
                warn!(
                    "Skipping statement {} ({}): no transaction over the RPC endpoint",
                    statement.ordinal,
                    statement.summary()
                );
                report.record(
                    statement,
                    StatementOutcome::Skipped {
                        reason: TRANSACTION_CONTROL_REASON.to_string(),
                    },
                );
                continue;
            }

            debug!("Executing statement {}: {}", statement.ordinal, statement.summary());
            let outcome = match self.execute_sql(&statement.sql).await {
                Ok(_) => StatementOutcome::Succeeded { rows_affected: 0 },
                Err(err) => match err.as_statement_error() {
                    Some(db_err) => outcome_for_error(statement, db_err),
                    None => return Err(MigrateError::Admin(err)),
                },
            };
            let failed = outcome.is_failure();
            report.record(statement, outcome);

            info!(
                "Progress {}/{}: {} succeeded, {} skipped, {} failed",
                report.processed(),
                report.total,
                report.succeeded,
                report.skipped,
                report.failed
            );

            if failed && policy == FailurePolicy::Atomic {
                warn!(
                    "Stopping at statement {}: the RPC endpoint has no transaction, earlier statements stay applied",
                    statement.ordinal
                );
                break;
            }
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        Ok(report)
    }

    /// One page of users, 1-based
    pub async fn list_users_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<AdminUser>, AdminError> {
        let endpoint = self.endpoint(&["auth", "v1", "admin", "users"])?;
        debug!("GET {} page {}", endpoint, page);

        let response = self
            .client
            .get(endpoint)
            .headers(self.build_headers()?)
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await?;
        let response = Self::check(response).await?;

        let page: UsersPage = response
            .json()
            .await
            .map_err(|e| AdminError::decode(e.to_string()))?;
        Ok(page.into_users())
    }

    /// All users, following pages until a short page
    pub async fn list_users(&self) -> Result<Vec<AdminUser>, AdminError> {
        let mut users = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.list_users_page(page, USERS_PER_PAGE).await?;
            let last = batch.len() < USERS_PER_PAGE as usize;
            users.extend(batch);
            if last {
                break;
            }
            page += 1;
        }
        Ok(users)
    }

    /// Look a user up by email, ignoring case
    pub async fn find_user_by_email(&self, email: &str) -> Result<AdminUser, AdminError> {
        self.list_users()
            .await?
            .into_iter()
            .find(|user| {
                user.email
                    .as_deref()
                    .is_some_and(|candidate| candidate.eq_ignore_ascii_case(email))
            })
            .ok_or_else(|| AdminError::UserNotFound {
                email: email.to_string(),
            })
    }

    /// Set a user's password
    pub async fn update_user_password(
        &self,
        user_id: &str,
        password: &Secret,
    ) -> Result<AdminUser, AdminError> {
        if password.is_empty() {
            return Err(AdminError::configuration("Refusing to set an empty password"));
        }

        let endpoint = self.endpoint(&["auth", "v1", "admin", "users", user_id])?;
        debug!("PUT {}", endpoint);

        let response = self
            .client
            .put(endpoint)
            .headers(self.build_headers()?)
            .json(&PasswordUpdate {
                password: password.expose(),
            })
            .send()
            .await?;
        let response = Self::check(response).await?;

        let user = response
            .json()
            .await
            .map_err(|e| AdminError::decode(e.to_string()))?;
        info!("Password updated for user {}", user_id);
        Ok(user)
    }
}

impl std::fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminClient")
            .field("base_url", &self.base_url.as_str())
            .field("service_key", &self.service_key)
            .field("rpc_function", &self.rpc_function)
            .finish()
    }
}
