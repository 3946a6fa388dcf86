//! Chunked media upload: prepare, parts, finish
//!
//! The server picks the block size during prepare; every part after that
//! must conform to it. Parts carry an Adler-32 checksum of their bytes and
//! are retried on transport failures. Finish is only sent once every
//! sequence number has been acknowledged. A session that fails midway is
//! abandoned and must be restarted from prepare.

use crate::auth::TokenCache;
use crate::executor::{decode_data, ApiRequest, Executor, FilePart, MultipartBody};
use crate::retry::RetryPolicy;
use crate::{ClientError, Config, ParentType, Result};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const PREPARE_PATH: &str = "/drive/v1/medias/upload_prepare";
const PART_PATH: &str = "/drive/v1/medias/upload_part";
const FINISH_PATH: &str = "/drive/v1/medias/upload_finish";

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Upload progress information
#[derive(Clone, Debug)]
pub struct UploadProgress {
    /// Bytes uploaded so far
    pub bytes_uploaded: u64,
    /// Total bytes to upload
    pub total_bytes: u64,
    /// Parts acknowledged so far
    pub parts_uploaded: u32,
    /// Total number of parts
    pub total_parts: u32,
}

impl UploadProgress {
    /// Get percentage complete
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Adler-32 of a chunk, as sent in the `checksum` form field
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = adler2::Adler32::new();
    hasher.write_slice(data);
    hasher.checksum()
}

/// Number of blocks needed for `size` bytes
pub fn block_count(size: u64, block_size: u64) -> u64 {
    if block_size == 0 {
        return 0;
    }
    size.div_ceil(block_size)
}

/// A contiguous slice of the source with its sequence number and checksum
#[derive(Clone, Debug)]
pub struct Chunk {
    pub seq: u32,
    pub data: Bytes,
    pub checksum: u32,
}

impl Chunk {
    pub fn new(seq: u32, data: Bytes) -> Self {
        let checksum = checksum(&data);
        Self { seq, data, checksum }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Split `data` into `block_size` chunks; only the last may be shorter
pub fn split_blocks(data: &Bytes, block_size: u64) -> Result<Vec<Chunk>> {
    if block_size == 0 {
        return Err(ClientError::Protocol("block size must be greater than 0".to_string()));
    }
    let block_size = usize::try_from(block_size)
        .map_err(|_| ClientError::Protocol(format!("block size {} too large", block_size)))?;

    Ok((0..data.len())
        .step_by(block_size)
        .enumerate()
        .map(|(seq, start)| {
            let end = (start + block_size).min(data.len());
            Chunk::new(seq as u32, data.slice(start..end))
        })
        .collect())
}

#[derive(Deserialize)]
struct PrepareResponse {
    upload_id: String,
    block_size: u64,
    block_num: u32,
}

#[derive(Deserialize)]
struct FinishResponse {
    file_token: String,
}

/// Server-issued parameters for one upload, plus the parts acknowledged so far
#[derive(Clone, Debug)]
pub struct UploadSession {
    upload_id: String,
    block_size: u64,
    block_num: u32,
    file_name: String,
    file_size: u64,
    acknowledged: BTreeSet<u32>,
}

impl UploadSession {
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_num(&self) -> u32 {
        self.block_num
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of distinct parts the server has acknowledged
    pub fn acknowledged(&self) -> u32 {
        self.acknowledged.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.acknowledged() == self.block_num
    }

    /// Byte length the server expects for part `seq`
    pub fn expected_len(&self, seq: u32) -> u64 {
        let start = u64::from(seq) * self.block_size;
        self.file_size.saturating_sub(start).min(self.block_size)
    }

    /// Cut `data` into this session's parts
    pub fn chunks(&self, data: &Bytes) -> Result<Vec<Chunk>> {
        if data.len() as u64 != self.file_size {
            return Err(ClientError::Protocol(format!(
                "session prepared for {} bytes, got {}",
                self.file_size,
                data.len()
            )));
        }
        // An empty file announced as one block is sent as a single empty part
        if self.file_size == 0 && self.block_num == 1 {
            return Ok(vec![Chunk::new(0, Bytes::new())]);
        }
        split_blocks(data, self.block_size)
    }
}

/// Drives the three-phase upload protocol over the write executor
pub struct UploadCoordinator {
    executor: Executor,
    retry: RetryPolicy,
    auth: Arc<TokenCache>,
    prepare_url: String,
    part_url: String,
    finish_url: String,
}

impl UploadCoordinator {
    pub fn new(config: &Config, executor: Executor, auth: Arc<TokenCache>) -> Self {
        Self {
            executor,
            retry: RetryPolicy::from_config(&config.retry),
            auth,
            prepare_url: config.url(PREPARE_PATH),
            part_url: config.url(PART_PATH),
            finish_url: config.url(FINISH_PATH),
        }
    }

    /// Override the retry policy used for parts
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Open an upload session; the server decides the block layout
    #[instrument(skip(self))]
    pub async fn prepare(
        &self,
        file_name: &str,
        size: u64,
        parent_type: &ParentType,
        parent_node: &str,
    ) -> Result<UploadSession> {
        let token = self.auth.tenant_token().await?;
        let request = ApiRequest::post(&self.prepare_url).bearer(token).json(json!({
            "file_name": file_name,
            "parent_type": parent_type.as_str(),
            "parent_node": parent_node,
            "size": size,
        }));

        let prepared: PrepareResponse = decode_data(self.executor.execute(request).await?)?;
        if prepared.block_size == 0 {
            return Err(ClientError::Protocol("server returned block_size 0".to_string()));
        }

        let needed = block_count(size, prepared.block_size);
        let block_num = u64::from(prepared.block_num);
        if block_num != needed && !(size == 0 && block_num <= 1) {
            return Err(ClientError::Protocol(format!(
                "server announced {} blocks but {} bytes at {} per block need {}",
                block_num, size, prepared.block_size, needed
            )));
        }

        debug!(
            upload_id = %prepared.upload_id,
            block_size = prepared.block_size,
            block_num = prepared.block_num,
            "upload prepared"
        );

        Ok(UploadSession {
            upload_id: prepared.upload_id,
            block_size: prepared.block_size,
            block_num: prepared.block_num,
            file_name: file_name.to_string(),
            file_size: size,
            acknowledged: BTreeSet::new(),
        })
    }

    /// Upload part `seq`; retried on transport failures
    pub async fn upload_part(&self, session: &mut UploadSession, seq: u32, data: Bytes) -> Result<()> {
        self.upload_chunk(session, Chunk::new(seq, data)).await
    }

    #[instrument(skip(self, session, chunk), fields(upload_id = %session.upload_id, seq = chunk.seq))]
    async fn upload_chunk(&self, session: &mut UploadSession, chunk: Chunk) -> Result<()> {
        if chunk.seq >= session.block_num {
            return Err(ClientError::Protocol(format!(
                "part {} out of range for {} blocks",
                chunk.seq, session.block_num
            )));
        }
        let expected = session.expected_len(chunk.seq);
        if chunk.len() as u64 != expected {
            return Err(ClientError::Protocol(format!(
                "part {} is {} bytes, expected {}",
                chunk.seq,
                chunk.len(),
                expected
            )));
        }

        let token = self.auth.tenant_token().await?;
        let form = MultipartBody {
            fields: vec![
                ("upload_id".to_string(), session.upload_id.clone()),
                ("seq".to_string(), chunk.seq.to_string()),
                ("size".to_string(), chunk.len().to_string()),
                ("checksum".to_string(), chunk.checksum.to_string()),
            ],
            file: FilePart {
                field: "file".to_string(),
                file_name: session.file_name.clone(),
                data: chunk.data.clone(),
            },
        };

        self.retry
            .run("upload_part", || {
                let request = ApiRequest::post(&self.part_url)
                    .bearer(token.clone())
                    .multipart(form.clone());
                self.executor.execute(request)
            })
            .await?;

        session.acknowledged.insert(chunk.seq);
        debug!(checksum = chunk.checksum, size = chunk.len(), "part acknowledged");
        Ok(())
    }

    /// Close the session and return the file token
    #[instrument(skip(self, session), fields(upload_id = %session.upload_id))]
    pub async fn finish(&self, session: UploadSession) -> Result<String> {
        if !session.is_complete() {
            return Err(ClientError::Protocol(format!(
                "finish requested after {} of {} parts",
                session.acknowledged(),
                session.block_num
            )));
        }

        let token = self.auth.tenant_token().await?;
        let request = ApiRequest::post(&self.finish_url).bearer(token).json(json!({
            "upload_id": session.upload_id,
            "block_num": session.block_num,
        }));

        let finished: FinishResponse = decode_data(self.executor.execute(request).await?)?;
        info!(file_token = %finished.file_token, size = session.file_size, "upload finished");
        Ok(finished.file_token)
    }

    /// Prepare, upload every part in order, finish
    pub async fn upload_whole_file(
        &self,
        data: Bytes,
        file_name: &str,
        parent_type: &ParentType,
        parent_node: &str,
    ) -> Result<String> {
        self.upload_with_progress(data, file_name, parent_type, parent_node, None)
            .await
    }

    /// Same as [`upload_whole_file`](Self::upload_whole_file), reporting after each part
    pub async fn upload_with_progress(
        &self,
        data: Bytes,
        file_name: &str,
        parent_type: &ParentType,
        parent_node: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<String> {
        let total_bytes = data.len() as u64;
        let mut session = self
            .prepare(file_name, total_bytes, parent_type, parent_node)
            .await?;
        let chunks = session.chunks(&data)?;

        let mut bytes_uploaded = 0u64;
        for chunk in chunks {
            let len = chunk.len() as u64;
            self.upload_chunk(&mut session, chunk).await?;
            bytes_uploaded += len;

            if let Some(ref cb) = progress {
                cb(UploadProgress {
                    bytes_uploaded,
                    total_bytes,
                    parts_uploaded: session.acknowledged(),
                    total_parts: session.block_num,
                });
            }
        }

        self.finish(session).await
    }

    /// Read a local file and upload it under its own file name
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        parent_type: &ParentType,
        parent_node: &str,
    ) -> Result<String> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::InvalidInput(format!("no file name in {}", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;

        self.upload_whole_file(Bytes::from(data), &file_name, parent_type, parent_node)
            .await
    }
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("executor", &self.executor)
            .field("retry", &self.retry)
            .finish()
    }
}
