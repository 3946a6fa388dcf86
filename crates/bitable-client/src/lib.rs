//! # Bitable Client SDK
//!
//! A rate-limited client for the Feishu Bitable and Drive media APIs.
//!
//! ## Features
//!
//! - **Quota groups**: separate read and write executors, each with its own
//!   QPS limit, worker pool and per-request timeout
//! - **Chunked upload**: prepare / part / finish with Adler-32 checksums and
//!   per-part retry
//! - **Token caching**: the tenant access token is fetched once and shared
//! - **Typed records**: ordered field maps validated against the table schema
//!
//! ## Example
//!
//! ```rust,ignore
//! use bitable_client::{BitableClient, Config, ParentType, RecordFields};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BitableClient::new(
//!         Config::default().with_credentials("cli_xxx", "app-secret"),
//!     )?;
//!
//!     // List tables of an app
//!     for (id, table) in client.list_tables("bascnAPP").await? {
//!         println!("{id}: {}", table.name);
//!     }
//!
//!     // Upload a file and attach it to a new record
//!     let photo = client
//!         .upload_attachment("bascnAPP", "photo.png", &ParentType::BitableImage)
//!         .await?;
//!     let record = RecordFields::new()
//!         .with("Name", "Site visit")
//!         .with("Photos", vec![photo]);
//!     client.insert_records("bascnAPP", "tblXXX", &[record]).await?;
//!
//!     Ok(())
//! }
//! ```

mod auth;
mod client;
mod config;
mod error;
mod executor;
mod rate_limit;
mod retry;
mod types;
mod upload;

#[cfg(test)]
mod test_support;

pub use auth::TokenCache;
pub use client::{BitableClient, MAX_BATCH_RECORDS};
pub use config::{Config, ExecutorConfig, RetryConfig, DEFAULT_BASE_URL};
pub use error::{ClientError, Result};
pub use executor::{
    decode_data, decode_response, ApiRequest, Executor, FilePart, HttpTransport, Method,
    MultipartBody, RequestBody, Transport, TransportResponse,
};
pub use rate_limit::RateLimiter;
pub use retry::{RetryPolicy, RetryPredicate};
pub use types::*;
pub use upload::{
    block_count, checksum, split_blocks, Chunk, ProgressCallback, UploadCoordinator,
    UploadProgress, UploadSession,
};
