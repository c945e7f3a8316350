//! Per-file bookkeeping for the chunked upload protocol.
//!
//! [`UploadSession`] owns the byte and part counters and the server-assigned
//! upload id. It does no network I/O, so every protocol rule lives here and is
//! unit tested without a server.

use std::fs::File;
use std::io::{self, Read, Take};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::client::{ChunkedUploadProgress, UploadSummary};
use crate::error::{ApiError, UploadError};
use crate::rest_types::UploadChunkResponse;

const MEGABYTE: u64 = 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 10 * MEGABYTE;

/// What a file is to the experiment it is uploaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// One sequencing file of a batch; the server finalises after the last one.
    Batch { is_last_file: bool },
    /// The single annotation file of an experiment.
    Annotation,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: u64,
    pub email: Option<String>,
    pub role: FileRole,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            email: None,
            role: FileRole::Batch { is_last_file: true },
        }
    }
}

impl UploadOptions {
    pub fn batch(is_last_file: bool) -> Self {
        Self {
            role: FileRole::Batch { is_last_file },
            ..Self::default()
        }
    }

    pub fn annotation() -> Self {
        Self {
            role: FileRole::Annotation,
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }
}

/// Reads a file in pieces of at most `chunk_size` bytes, never past the size
/// recorded when the session started.
pub struct ChunkReader<R> {
    inner: Take<R>,
    chunk_size: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R, total_size: u64, chunk_size: u64) -> Self {
        Self {
            inner: reader.take(total_size),
            chunk_size,
        }
    }

    /// Returns the next chunk, or `None` once a read yields no bytes.
    ///
    /// Short reads from the underlying reader are retried until the chunk is
    /// full, so only the final chunk of a file can be smaller than
    /// `chunk_size`.
    pub fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = Vec::with_capacity(self.chunk_size.min(self.inner.limit()) as usize);
        (&mut self.inner).take(self.chunk_size).read_to_end(&mut chunk)?;
        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}

/// State of one file transfer. Discarded when the file completes or fails.
#[derive(Debug, Clone)]
pub struct UploadSession {
    file_path: PathBuf,
    file_name: String,
    total_size: u64,
    chunk_size: u64,
    upload_id: Option<String>,
    bytes_uploaded: u64,
    part_number: u64,
}

impl UploadSession {
    pub fn new(file_path: PathBuf, total_size: u64, chunk_size: u64) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize);
        }
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::Io {
                path: file_path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            })?;

        Ok(Self {
            file_path,
            file_name,
            total_size,
            chunk_size,
            upload_id: None,
            bytes_uploaded: 0,
            part_number: 1,
        })
    }

    /// Opens `path` and sizes the session from a single metadata lookup.
    pub fn open(path: &Path, chunk_size: u64) -> Result<(Self, ChunkReader<File>), UploadError> {
        let io_error = |source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file_path = std::fs::canonicalize(path).map_err(io_error)?;
        let file = File::open(&file_path).map_err(io_error)?;
        let total_size = file.metadata().map_err(io_error)?.len();

        let session = Self::new(file_path, total_size, chunk_size)?;
        let reader = ChunkReader::new(file, total_size, chunk_size);
        Ok((session, reader))
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    pub fn part_number(&self) -> u64 {
        self.part_number
    }

    /// Decided from byte accounting alone, so a file that is an exact
    /// multiple of the chunk size still flags its final full chunk.
    pub fn is_last_chunk(&self, chunk_len: u64) -> bool {
        self.bytes_uploaded + chunk_len >= self.total_size
    }

    /// Text fields sent alongside the chunk bytes.
    pub fn chunk_fields(
        &self,
        experiment_name: &str,
        options: &UploadOptions,
        chunk_len: u64,
    ) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("filename", self.file_name.clone()),
            ("offset", self.bytes_uploaded.to_string()),
            ("total_size", self.total_size.to_string()),
            ("part_number", self.part_number.to_string()),
            ("is_last_chunk", wire_bool(self.is_last_chunk(chunk_len))),
            ("name", experiment_name.to_string()),
        ];
        if let Some(email) = &options.email {
            fields.push(("email", email.clone()));
        }
        match options.role {
            FileRole::Batch { is_last_file } => fields.push(("is_last_file", wire_bool(is_last_file))),
            FileRole::Annotation => fields.push(("annotation", wire_bool(true))),
        }
        if let Some(upload_id) = &self.upload_id {
            fields.push(("upload_id", upload_id.clone()));
        }
        fields
    }

    /// Every byte measured at the start has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.bytes_uploaded == self.total_size
    }

    /// Records a chunk the server accepted.
    pub fn acknowledge(
        &mut self,
        chunk_len: u64,
        response: UploadChunkResponse,
    ) -> Result<(), ApiError> {
        let is_last_chunk = self.is_last_chunk(chunk_len);
        if let Some(message) = &response.message {
            debug!(file = %self.file_name, part_number = self.part_number, %message, "chunk accepted");
        }

        if let Some(upload_id) = response.upload_id {
            if let Some(current) = &self.upload_id {
                if *current != upload_id {
                    warn!(
                        file = %self.file_name,
                        current = %current,
                        received = %upload_id,
                        "server sent a different upload_id, keeping the first one"
                    );
                }
            } else {
                debug!(file = %self.file_name, %upload_id, "upload session established");
                self.upload_id = Some(upload_id);
            }
        } else if self.upload_id.is_none() && !is_last_chunk {
            return Err(ApiError::Protocol(format!(
                "response to part {} of {} did not include an upload_id",
                self.part_number, self.file_name
            )));
        }

        self.bytes_uploaded += chunk_len;
        self.part_number += 1;
        debug_assert!(self.bytes_uploaded <= self.total_size);
        Ok(())
    }

    pub fn progress(&self) -> ChunkedUploadProgress {
        ChunkedUploadProgress {
            bytes_uploaded: self.bytes_uploaded,
            total_bytes: self.total_size,
        }
    }

    pub fn summary(&self) -> UploadSummary {
        UploadSummary {
            file_name: self.file_name.clone(),
            total_bytes: self.total_size,
            parts: self.part_number - 1,
            upload_id: self.upload_id.clone(),
        }
    }
}

fn wire_bool(value: bool) -> String {
    value.to_string()
}
