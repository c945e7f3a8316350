//! Client for the Oncosweep analysis platform.
//!
//! Large sequencing files are sent with a chunked multipart protocol: each
//! chunk is a separate `POST api/upload`, and the server ties the chunks of a
//! file together through the `upload_id` it returns for the first one.

pub mod batch;
pub mod client;
pub mod error;
pub mod rest_types;
pub mod session;

pub use batch::{BatchFile, BatchPlan, BatchReport, default_experiment_name};
pub use client::{ChunkedUploadProgress, OncosweepClient, UploadEvent, UploadSummary};
pub use error::{ApiError, BatchError, UploadError};
pub use session::{DEFAULT_CHUNK_SIZE_BYTES, FileRole, UploadOptions, UploadSession};
