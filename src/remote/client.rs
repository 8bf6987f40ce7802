use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::remote::credentials::CredentialBroker;
use crate::remote::error::RemoteError;
use crate::remote::models::{FieldMap, FieldSchema, RecordPage, RemoteEntity, TableRef};
use crate::remote::tables::RemoteTables;

pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Response wrapper shared by every endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FieldListData {
    #[serde(default)]
    items: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct RecordListData {
    #[serde(default)]
    items: Option<Vec<RemoteEntity>>,
    #[serde(default)]
    has_more: bool,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordData {
    record: RemoteEntity,
}

#[derive(Serialize)]
struct RecordBody<'a> {
    fields: &'a FieldMap,
}

/// Connection settings for the remote store
#[derive(Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub app_id: String,
    pub app_secret: String,
    /// Per-request timeout; a hung call fails instead of stalling the run
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("app_secret", &"***")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Typed client for the remote tabular store
#[derive(Clone, Debug)]
pub struct RemoteTableClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialBroker>,
}

impl RemoteTableClient {
    pub fn new(settings: ClientSettings) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent("rostersync/0.1")
            .build()?;

        let credentials = Arc::new(CredentialBroker::new(
            client.clone(),
            &settings.base_url,
            settings.app_id,
            settings.app_secret,
        ));

        Ok(Self::with_credentials(client, &settings.base_url, credentials))
    }

    /// Build a client around an existing broker (shared token across clients)
    pub fn with_credentials(
        client: Client,
        base_url: &str,
        credentials: Arc<CredentialBroker>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialBroker> {
        &self.credentials
    }

    fn records_url(&self, table: &TableRef) -> String {
        format!(
            "{}/bitable/v1/apps/{}/tables/{}/records",
            self.base_url, table.app_token, table.table_id
        )
    }

    async fn authorized(&self, method: Method, url: &str) -> Result<RequestBuilder, RemoteError> {
        let token = self.credentials.get_credential().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    /// Send a request and unwrap the `{code, msg, data}` envelope
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        debug!("{}: response status {}", context, status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("✗ {} failed with status {}: {}", context, status, body);
            return Err(RemoteError::Api {
                code: i64::from(status.as_u16()),
                message: body,
            });
        }

        let text = response.text().await?;
        let payload: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
            error!("{}: could not parse response: {}", context, e);
            debug!("Raw response: {}", text);
            RemoteError::Decode(e.to_string())
        })?;

        if payload.code != 0 {
            error!("✗ {} rejected: {} {}", context, payload.code, payload.msg);
            return Err(RemoteError::Api {
                code: payload.code,
                message: payload.msg,
            });
        }

        payload
            .data
            .ok_or_else(|| RemoteError::Decode(format!("{}: response has no data", context)))
    }
}

#[async_trait::async_trait]
impl RemoteTables for RemoteTableClient {
    async fn list_fields(&self, table: &TableRef) -> Result<Vec<FieldSchema>, RemoteError> {
        let url = format!(
            "{}/bitable/v1/apps/{}/tables/{}/fields",
            self.base_url, table.app_token, table.table_id
        );

        let request = self
            .authorized(Method::GET, &url)
            .await?
            .query(&[("page_size", "100")]);
        let data: FieldListData = self.send(request, "List fields").await?;

        info!("✓ Loaded {} field(s) for {}", data.items.len(), table);
        Ok(data.items)
    }

    async fn query_records(
        &self,
        table: &TableRef,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<RecordPage, RemoteError> {
        let url = self.records_url(table);

        let mut params = vec![("page_size", page_size.to_string())];
        if let Some(token) = page_token {
            params.push(("page_token", token.to_string()));
        }

        let request = self.authorized(Method::GET, &url).await?.query(&params);
        let data: RecordListData = self.send(request, "Query records").await?;

        let records = data.items.unwrap_or_default();
        debug!(
            "Query returned {} record(s), has_more={}",
            records.len(),
            data.has_more
        );

        Ok(RecordPage {
            records,
            has_more: data.has_more,
            next_page_token: data.page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn create_record(
        &self,
        table: &TableRef,
        fields: &FieldMap,
    ) -> Result<RemoteEntity, RemoteError> {
        let url = self.records_url(table);

        let request = self
            .authorized(Method::POST, &url)
            .await?
            .json(&RecordBody { fields });
        let data: RecordData = self.send(request, "Create record").await?;

        info!("✓ Created record {} in {}", data.record.record_id, table);
        Ok(data.record)
    }

    async fn update_record(
        &self,
        table: &TableRef,
        record_id: &str,
        fields: &FieldMap,
    ) -> Result<RemoteEntity, RemoteError> {
        let url = format!("{}/{}", self.records_url(table), record_id);

        let request = self
            .authorized(Method::PUT, &url)
            .await?
            .json(&RecordBody { fields });
        let data: RecordData = self.send(request, "Update record").await?;

        info!("✓ Updated record {} in {}", record_id, table);
        Ok(data.record)
    }
}
