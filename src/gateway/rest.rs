//! HTTP backend: PostgREST-style row API plus auth and storage endpoints.
//!
//! Row endpoints live under `/rest/v1/{table}`, auth under `/auth/v1`,
//! blobs under `/storage/v1/object/{bucket}`. Every request carries the
//! public `apikey`; row and storage calls also carry the session's bearer
//! token and fail fast with `NotAuthenticated` when there is none.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::storage::{validate_path, FileStorage, StorageError};
use super::{AuthProvider, Collection, GatewayError, ListFilter, RemoteGateway, SortOrder, UserIdentity};
use crate::config::{GatewayConfig, ATTACHMENTS_BUCKET};

#[derive(Debug, Clone)]
struct AuthSession {
    access_token: String,
    user: UserIdentity,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserIdentity,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

pub struct RestGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    session: RwLock<Option<AuthSession>>,
}

fn network_error(e: reqwest::Error, timeout_secs: u64) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Network(format!("Request timed out after {timeout_secs}s"))
    } else {
        GatewayError::Network(e.to_string())
    }
}

/// Map a non-success response to a gateway error.
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(GatewayError::NotAuthenticated);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Backend {
        status: status.as_u16(),
        body,
    })
}

impl From<GatewayError> for StorageError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotAuthenticated => StorageError::NotAuthenticated,
            GatewayError::Backend { status: 404, body } => StorageError::NotFound(body),
            GatewayError::Backend { status, body } => StorageError::Backend { status, body },
            other => StorageError::Network(other.to_string()),
        }
    }
}

/// PostgREST query parameters for a list filter.
fn filter_params(filter: &ListFilter) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if let Some(patient_id) = &filter.patient_id {
        params.push(("patient_id".into(), format!("eq.{patient_id}")));
    }
    if let Some(user_id) = &filter.user_id {
        params.push(("user_id".into(), format!("eq.{user_id}")));
    }
    if let Some(record_type) = &filter.record_type {
        params.push(("type".into(), format!("eq.{record_type}")));
    }
    if let Some(range) = &filter.range {
        if let Some(from) = range.from {
            params.push((range.column.clone(), format!("gte.{}", from.to_rfc3339())));
        }
        if let Some(to) = range.to {
            params.push((range.column.clone(), format!("lte.{}", to.to_rfc3339())));
        }
    }
    if let Some((column, order)) = &filter.order_by {
        let direction = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        params.push(("order".into(), format!("{column}.{direction}")));
    }
    if let Some(limit) = filter.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    params
}

impl RestGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            session: RwLock::new(None),
        })
    }

    /// Gateway configured from `MEDTRACK_*` environment variables.
    pub fn from_env() -> Option<Result<Self, GatewayError>> {
        GatewayConfig::from_env().map(Self::new)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn token(&self) -> Result<String, GatewayError> {
        self.session
            .read()
            .map_err(|_| GatewayError::Network("session lock poisoned".into()))?
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(GatewayError::NotAuthenticated)
    }

    fn set_session(&self, session: Option<AuthSession>) {
        if let Ok(mut guard) = self.session.write() {
            *guard = session;
        }
    }

    /// Install an existing access token (e.g. restored from disk).
    pub fn restore_session(&self, access_token: &str, user: UserIdentity) {
        self.set_session(Some(AuthSession {
            access_token: access_token.to_string(),
            user,
        }));
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, GatewayError> {
        let response = builder
            .send()
            .await
            .map_err(|e| network_error(e, self.config.timeout_secs))?;
        check_status(response).await
    }

    async fn rows(&self, builder: RequestBuilder) -> Result<Vec<Value>, GatewayError> {
        let response = self.send(builder).await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| GatewayError::Network(format!("Invalid response body: {e}")))
    }

    fn table_path(collection: Collection) -> String {
        format!("/rest/v1/{}", collection.as_str())
    }

    /// Password sign-in. Stores the returned session.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserIdentity, GatewayError> {
        let builder = self
            .client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.config.api_key)
            .json(&json!({ "email": email, "password": password }));
        let response = self.send(builder).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Network(format!("Invalid token response: {e}")))?;
        tracing::info!(user_id = %token.user.id, "Signed in");
        let user = token.user.clone();
        self.set_session(Some(AuthSession {
            access_token: token.access_token,
            user: token.user,
        }));
        Ok(user)
    }

    fn object_path(path: &str) -> String {
        format!("/storage/v1/object/{ATTACHMENTS_BUCKET}/{path}")
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    async fn list(
        &self,
        collection: Collection,
        filter: &ListFilter,
    ) -> Result<Vec<Value>, GatewayError> {
        let token = self.token()?;
        let builder = self
            .request(Method::GET, &Self::table_path(collection), &token)
            .query(&filter_params(filter));
        self.rows(builder).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, GatewayError> {
        let token = self.token()?;
        let builder = self
            .request(Method::GET, &Self::table_path(collection), &token)
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        Ok(self.rows(builder).await?.into_iter().next())
    }

    async fn insert(&self, collection: Collection, record: Value) -> Result<Value, GatewayError> {
        let token = self.token()?;
        let builder = self
            .request(Method::POST, &Self::table_path(collection), &token)
            .header("Prefer", "return=representation")
            .json(&record);
        self.rows(builder)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Backend {
                status: 200,
                body: format!("{collection} insert returned no row"),
            })
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Value, GatewayError> {
        let token = self.token()?;
        let builder = self
            .request(Method::PATCH, &Self::table_path(collection), &token)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch);
        self.rows(builder)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError> {
        let token = self.token()?;
        let builder = self
            .request(Method::DELETE, &Self::table_path(collection), &token)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation");
        if self.rows(builder).await?.is_empty() {
            return Err(GatewayError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for RestGateway {
    async fn current_user(&self) -> Result<Option<UserIdentity>, GatewayError> {
        let token = match self.token() {
            Ok(token) => token,
            Err(GatewayError::NotAuthenticated) => return Ok(None),
            Err(e) => return Err(e),
        };
        let builder = self.request(Method::GET, "/auth/v1/user", &token);
        match self.send(builder).await {
            Ok(response) => {
                let user: UserIdentity = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::Network(format!("Invalid user response: {e}")))?;
                Ok(Some(user))
            }
            Err(GatewayError::NotAuthenticated) => {
                tracing::info!("Access token rejected, clearing session");
                self.set_session(None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        let token = match self.token() {
            Ok(token) => token,
            Err(_) => return Ok(()),
        };
        self.set_session(None);
        let builder = self.request(Method::POST, "/auth/v1/logout", &token);
        if let Err(e) = self.send(builder).await {
            // The local session is already gone; a failed revoke only
            // leaves a server-side token to expire on its own.
            tracing::warn!(error = %e, "Remote sign-out failed");
        }
        Ok(())
    }
}

#[async_trait]
impl FileStorage for RestGateway {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_path(path)?;
        let token = self.token()?;
        let builder = self
            .request(Method::POST, &Self::object_path(path), &token)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        self.send(builder).await?;
        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path(path)?;
        let token = self.token()?;
        let builder = self.request(Method::GET, &Self::object_path(path), &token);
        let response = self.send(builder).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn signed_url(&self, path: &str, expires_in: Duration) -> Result<String, StorageError> {
        validate_path(path)?;
        let token = self.token()?;
        let builder = self
            .request(
                Method::POST,
                &format!("/storage/v1/object/sign/{ATTACHMENTS_BUCKET}/{path}"),
                &token,
            )
            .json(&json!({ "expiresIn": expires_in.as_secs() }));
        let response = self.send(builder).await?;
        let signed: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Network(format!("Invalid signed URL response: {e}")))?;
        Ok(self.url(&format!("/storage/v1{}", signed.signed_url)))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        let token = self.token()?;
        let builder = self
            .request(Method::DELETE, &format!("/storage/v1/object/{ATTACHMENTS_BUCKET}"), &token)
            .json(&json!({ "prefixes": [path] }));
        self.send(builder).await?;
        Ok(())
    }
}
