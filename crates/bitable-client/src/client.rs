//! Main client implementation

use crate::auth::TokenCache;
use crate::executor::{decode_data, ApiRequest, Executor, HttpTransport, Transport};
use crate::upload::UploadCoordinator;
use crate::{types::*, ClientError, Config, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Largest batch the records endpoint accepts
pub const MAX_BATCH_RECORDS: usize = 500;

const PAGE_SIZE: &str = "100";

/// One page of a listing endpoint
#[derive(Deserialize)]
struct Page<T> {
    items: Option<Vec<T>>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    page_token: Option<String>,
}

impl<T> Page<T> {
    /// Items plus the token for the next page, if any
    fn into_parts(self) -> Result<(Vec<T>, Option<String>)> {
        let items = self.items.unwrap_or_default();
        if !self.has_more {
            return Ok((items, None));
        }
        match self.page_token {
            Some(token) if !token.is_empty() => Ok((items, Some(token))),
            _ => Err(ClientError::Protocol("has_more set without a page_token".to_string())),
        }
    }
}

#[derive(Deserialize)]
struct BatchCreateResponse {
    #[serde(default)]
    records: Vec<CreatedRecord>,
}

/// Feishu Bitable client
///
/// Owns one executor per quota group: `read` for token fetches and
/// listings, `write` for mutations and uploads. The tenant token is fetched
/// on first use and kept for the life of the client.
pub struct BitableClient {
    config: Config,
    read: Executor,
    write: Executor,
    auth: Arc<TokenCache>,
    uploads: UploadCoordinator,
}

impl BitableClient {
    /// Create a new client with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.user_agent)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client over a custom transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let read = Executor::new("read", config.read.clone(), Arc::clone(&transport))?;
        let write = Executor::new("write", config.write.clone(), transport)?;
        let auth = Arc::new(TokenCache::new(&config, read.clone()));
        let uploads = UploadCoordinator::new(&config, write.clone(), Arc::clone(&auth));

        Ok(Self {
            config,
            read,
            write,
            auth,
            uploads,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Executor for token fetches and reads
    pub fn read_executor(&self) -> &Executor {
        &self.read
    }

    /// Executor for mutations and uploads
    pub fn write_executor(&self) -> &Executor {
        &self.write
    }

    /// Low-level access to the upload protocol
    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    /// The tenant access token, fetched on first use
    pub async fn tenant_token(&self) -> Result<String> {
        self.auth.tenant_token().await
    }

    fn tables_url(&self, app_token: &str) -> String {
        self.config.url(&format!("/bitable/v1/apps/{}/tables", app_token))
    }

    fn table_url(&self, app_token: &str, table_id: &str, rest: &str) -> String {
        self.config
            .url(&format!("/bitable/v1/apps/{}/tables/{}/{}", app_token, table_id, rest))
    }

    fn page_request(url: &str, token: &str, page_token: Option<&str>) -> ApiRequest {
        let request = ApiRequest::get(url).bearer(token).query("page_size", PAGE_SIZE);
        match page_token {
            Some(page_token) => request.query("page_token", page_token),
            None => request,
        }
    }

    /// Follow `page_token` until `has_more` is false
    async fn list_all<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        first: Option<Page<T>>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = match first {
            Some(page) => page,
            None => decode_data(self.read.execute(Self::page_request(url, token, None)).await?)?,
        };

        loop {
            let (batch, next) = page.into_parts()?;
            items.extend(batch);
            let Some(page_token) = next else {
                return Ok(items);
            };
            debug!(page_token = %page_token, "fetching next page");
            page = decode_data(
                self.read
                    .execute(Self::page_request(url, token, Some(&page_token)))
                    .await?,
            )?;
        }
    }

    // ==================== Schema ====================

    /// Field schema of one table
    #[instrument(skip(self))]
    pub async fn list_fields(&self, app_token: &str, table_id: &str) -> Result<Vec<FieldMetadata>> {
        let token = self.auth.tenant_token().await?;
        let url = self.table_url(app_token, table_id, "fields");
        self.list_all(&url, &token, None).await
    }

    /// Field schemas of several tables, fetched concurrently
    ///
    /// Results come back in `table_ids` order; one table failing does not
    /// affect the others.
    #[instrument(skip(self, table_ids), fields(tables = table_ids.len()))]
    pub async fn list_fields_many(
        &self,
        app_token: &str,
        table_ids: &[&str],
    ) -> Result<Vec<Result<Vec<FieldMetadata>>>> {
        let token = self.auth.tenant_token().await?;
        let urls: Vec<String> = table_ids
            .iter()
            .map(|table_id| self.table_url(app_token, table_id, "fields"))
            .collect();
        let requests = urls
            .iter()
            .map(|url| Self::page_request(url, &token, None))
            .collect();

        let first_pages = self.read.execute_many(requests).await;

        let mut schemas = Vec::with_capacity(first_pages.len());
        for (url, first) in urls.iter().zip(first_pages) {
            let schema = match first.and_then(decode_data::<Page<FieldMetadata>>) {
                Ok(page) => self.list_all(url, &token, Some(page)).await,
                Err(e) => Err(e),
            };
            schemas.push(schema);
        }
        Ok(schemas)
    }

    // ==================== Tables ====================

    /// All tables of an app, keyed by table ID
    #[instrument(skip(self))]
    pub async fn list_tables(&self, app_token: &str) -> Result<HashMap<String, Table>> {
        let token = self.auth.tenant_token().await?;
        let tables: Vec<Table> = self.list_all(&self.tables_url(app_token), &token, None).await?;

        Ok(tables
            .into_iter()
            .map(|table| (table.table_id.clone(), table))
            .collect())
    }

    /// Create a table with the given columns
    #[instrument(skip(self, columns), fields(columns = columns.len()))]
    pub async fn create_table(
        &self,
        app_token: &str,
        name: &str,
        columns: &[TableField],
    ) -> Result<CreatedTable> {
        let token = self.auth.tenant_token().await?;
        let request = ApiRequest::post(self.tables_url(app_token))
            .bearer(token)
            .json(json!({ "table": { "name": name, "fields": columns } }));

        let created: CreatedTable = decode_data(self.write.execute(request).await?)?;
        info!(table_id = %created.table_id, "table created");
        Ok(created)
    }

    // ==================== Records ====================

    /// Create records in one call
    ///
    /// At most [`MAX_BATCH_RECORDS`] records are accepted; larger batches
    /// are rejected before anything is sent.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn batch_create_records(
        &self,
        app_token: &str,
        table_id: &str,
        records: &[RecordFields],
    ) -> Result<Vec<CreatedRecord>> {
        if records.len() > MAX_BATCH_RECORDS {
            return Err(ClientError::InvalidInput(format!(
                "{} records in one batch, at most {} allowed",
                records.len(),
                MAX_BATCH_RECORDS
            )));
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let token = self.auth.tenant_token().await?;
        let payload: Vec<Value> = records
            .iter()
            .map(|fields| json!({ "fields": fields }))
            .collect();
        let request = ApiRequest::post(self.table_url(app_token, table_id, "records/batch_create"))
            .bearer(token)
            .json(json!({ "records": payload }));

        let created: BatchCreateResponse = decode_data(self.write.execute(request).await?)?;
        debug!(created = created.records.len(), "records created");
        Ok(created.records)
    }

    /// Check records against the table schema, then create them
    pub async fn insert_records(
        &self,
        app_token: &str,
        table_id: &str,
        records: &[RecordFields],
    ) -> Result<Vec<CreatedRecord>> {
        let schema = self.list_fields(app_token, table_id).await?;
        for record in records {
            record.validate(&schema)?;
        }
        self.batch_create_records(app_token, table_id, records).await
    }

    // ==================== Media ====================

    /// Upload a local file, returning its file token
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        parent_type: &ParentType,
        parent_node: &str,
    ) -> Result<String> {
        self.uploads.upload_file(path, parent_type, parent_node).await
    }

    /// Upload in-memory bytes, returning their file token
    pub async fn upload_bytes(
        &self,
        data: impl Into<Bytes>,
        file_name: &str,
        parent_type: &ParentType,
        parent_node: &str,
    ) -> Result<String> {
        self.uploads
            .upload_whole_file(data.into(), file_name, parent_type, parent_node)
            .await
    }

    /// Upload a local file into an app and describe it for an attachment field
    pub async fn upload_attachment(
        &self,
        app_token: &str,
        path: impl AsRef<Path>,
        parent_type: &ParentType,
    ) -> Result<AttachmentRef> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::InvalidInput(format!("no file name in {}", path.display())))?
            .to_string();
        let data = Bytes::from(tokio::fs::read(path).await?);
        let size = data.len() as u64;

        let file_token = self
            .uploads
            .upload_whole_file(data, &name, parent_type, app_token)
            .await?;

        Ok(AttachmentRef {
            file_token,
            name: Some(name),
            size: Some(size),
        })
    }
}

impl std::fmt::Debug for BitableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitableClient")
            .field("base_url", &self.config.base_url)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("auth", &self.auth)
            .finish()
    }
}
