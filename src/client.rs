use std::path::{Path, PathBuf};

use futures::{StreamExt, stream::BoxStream};
use reqwest::{
    Client, Response, StatusCode,
    multipart::{Form, Part},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::batch::{BatchFile, BatchPlan, BatchReport};
use crate::error::{ApiError, BatchError, UploadError};
use crate::rest_types::{
    ExperimentRequest, ListRequest, MessageResponse, QcResponse, ReportResponse, SummaryResponse,
    UploadChunkResponse,
};
use crate::session::{FileRole, UploadOptions, UploadSession};

const UPLOAD_ROUTE: &str = "api/upload";
const QUANT_ROUTE: &str = "api/quant";
const QC_ROUTE: &str = "api/qc";
const PREDICT_ROUTE: &str = "api/predict";
const REPORT_ROUTE: &str = "api/report";
const LIST_ROUTE: &str = "api/list";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkedUploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

impl ChunkedUploadProgress {
    pub fn percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f32 / self.total_bytes as f32) * 100.0
    }
}

/// Outcome of a file that was sent completely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    pub file_name: String,
    pub total_bytes: u64,
    pub parts: u64,
    pub upload_id: Option<String>,
}

#[derive(Debug)]
pub enum UploadEvent {
    Progress(ChunkedUploadProgress),
    Complete(UploadSummary),
}

/// Joins `route` below `base_url`, treating the base as a directory even when
/// it was configured without a trailing slash.
pub fn api_url(base_url: &Url, route: &str) -> Result<Url, url::ParseError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(route)
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status != StatusCode::OK {
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(%status, error = %e, "unable to read error response body");
                format!("<unreadable response body: {e}>")
            }
        };
        return Err(ApiError::Server { status, body });
    }
    Ok(response)
}

async fn parse_body<T: DeserializeOwned>(response: Response, route: &str) -> Result<T, ApiError> {
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| ApiError::Protocol(format!("invalid response from {route}: {e}")))
}

pub struct OncosweepClient {
    client: Client,
    base_url: Url,
    auth_token: String,
    contact: String,
}

impl OncosweepClient {
    pub fn new(base_url: Url, auth_token: String, contact: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            auth_token,
            contact,
        }
    }

    /// Who to reach when a request fails.
    pub fn contact(&self) -> &str {
        &self.contact
    }

    fn route(&self, route: &str) -> Result<Url, ApiError> {
        Ok(api_url(&self.base_url, route)?)
    }

    async fn post_json<B, R>(&self, route: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = self.route(route)?;
        debug!(%url, "sending request");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;

        let response = check_status(response).await?;
        parse_body(response, route).await
    }

    pub async fn quant(&self, name: &str, email: &str) -> Result<Value, ApiError> {
        let request = ExperimentRequest {
            name: name.to_string(),
            email: email.to_string(),
            with_ca19_9: None,
        };
        let response: MessageResponse = self.post_json(QUANT_ROUTE, &request).await?;
        Ok(response.message)
    }

    pub async fn qc(&self, name: &str, email: &str) -> Result<Value, ApiError> {
        let request = ExperimentRequest {
            name: name.to_string(),
            email: email.to_string(),
            with_ca19_9: None,
        };
        let response: QcResponse = self.post_json(QC_ROUTE, &request).await?;
        Ok(response.qc)
    }

    pub async fn predict(
        &self,
        name: &str,
        email: &str,
        with_ca19_9: bool,
    ) -> Result<Value, ApiError> {
        let request = ExperimentRequest {
            name: name.to_string(),
            email: email.to_string(),
            with_ca19_9: Some(with_ca19_9),
        };
        let response: MessageResponse = self.post_json(PREDICT_ROUTE, &request).await?;
        Ok(response.message)
    }

    pub async fn report(&self, name: &str, email: &str) -> Result<Value, ApiError> {
        let request = ExperimentRequest {
            name: name.to_string(),
            email: email.to_string(),
            with_ca19_9: None,
        };
        let response: ReportResponse = self.post_json(REPORT_ROUTE, &request).await?;
        Ok(response.report)
    }

    pub async fn list(&self, email: &str) -> Result<Value, ApiError> {
        let request = ListRequest {
            email: email.to_string(),
        };
        let response: SummaryResponse = self.post_json(LIST_ROUTE, &request).await?;
        Ok(response.summary)
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        experiment_name: &str,
        options: &UploadOptions,
        chunk: Vec<u8>,
    ) -> Result<UploadChunkResponse, ApiError> {
        let url = self.route(UPLOAD_ROUTE)?;
        let chunk_len = chunk.len() as u64;

        let mut form = Form::new().part(
            "file",
            Part::bytes(chunk).file_name(session.file_name().to_string()),
        );
        for (field, value) in session.chunk_fields(experiment_name, options, chunk_len) {
            form = form.text(field, value);
        }

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.auth_token)
            .multipart(form)
            .send()
            .await?;

        let response = check_status(response).await?;
        parse_body(response, UPLOAD_ROUTE).await
    }

    /// Sends `path` to the platform one chunk at a time.
    ///
    /// The stream yields a progress event before the first chunk and after
    /// every acknowledged chunk, then a single [`UploadEvent::Complete`]. The
    /// first failing chunk ends the stream with an error; nothing is retried
    /// and no further chunk of the file is sent.
    pub fn chunked_upload<'a>(
        &'a self,
        experiment_name: String,
        path: PathBuf,
        options: UploadOptions,
    ) -> BoxStream<'a, Result<UploadEvent, UploadError>> {
        let stream = async_stream::try_stream! {
            let (mut session, mut reader) = UploadSession::open(&path, options.chunk_size)?;
            debug!(
                file = %session.file_path().display(),
                total_size = session.total_size(),
                chunk_size = session.chunk_size(),
                "starting chunked upload"
            );

            yield UploadEvent::Progress(session.progress());

            loop {
                let chunk = reader.next_chunk().map_err(|source| UploadError::Io {
                    path: session.file_path().to_path_buf(),
                    source,
                })?;
                let Some(chunk) = chunk else {
                    break;
                };
                let chunk_len = chunk.len() as u64;

                debug!(
                    file = %session.file_name(),
                    part_number = session.part_number(),
                    offset = session.bytes_uploaded(),
                    len = chunk_len,
                    "sending chunk"
                );

                let result = self
                    .upload_chunk(&session, &experiment_name, &options, chunk)
                    .await
                    .and_then(|response| session.acknowledge(chunk_len, response));

                if let Err(source) = result {
                    Err(UploadError::Chunk {
                        file_name: session.file_name().to_string(),
                        part_number: session.part_number(),
                        offset: session.bytes_uploaded(),
                        source,
                    })?;
                }

                yield UploadEvent::Progress(session.progress());
            }

            if !session.is_complete() {
                Err(UploadError::Incomplete(session.file_path().to_path_buf()))?;
            }

            let summary = session.summary();
            info!(
                file = %summary.file_name,
                bytes = summary.total_bytes,
                parts = summary.parts,
                "upload complete"
            );
            yield UploadEvent::Complete(summary);
        };

        Box::pin(stream)
    }

    /// Uploads one file and reports progress through `on_progress`.
    pub async fn upload_file_with_progress<F>(
        &self,
        experiment_name: &str,
        path: &Path,
        options: UploadOptions,
        mut on_progress: F,
    ) -> Result<UploadSummary, UploadError>
    where
        F: FnMut(&ChunkedUploadProgress),
    {
        let mut stream =
            self.chunked_upload(experiment_name.to_string(), path.to_path_buf(), options);

        while let Some(event) = stream.next().await {
            match event? {
                UploadEvent::Progress(progress) => on_progress(&progress),
                UploadEvent::Complete(summary) => return Ok(summary),
            }
        }

        Err(UploadError::Incomplete(path.to_path_buf()))
    }

    pub async fn upload_file(
        &self,
        experiment_name: &str,
        path: &Path,
        options: UploadOptions,
    ) -> Result<UploadSummary, UploadError> {
        self.upload_file_with_progress(experiment_name, path, options, |_| {})
            .await
    }

    /// Uploads every file of `plan` in order, one file at a time.
    ///
    /// Each file is sent as [`FileRole::Batch`], flagged as the last file only
    /// for the final entry of the plan; the role in `options` is ignored. The
    /// first failing file ends the batch and no later file is sent.
    pub async fn upload_batch<F>(
        &self,
        experiment_name: &str,
        plan: &BatchPlan,
        options: UploadOptions,
        mut on_progress: F,
    ) -> Result<BatchReport, BatchError>
    where
        F: FnMut(&BatchFile<'_>, &ChunkedUploadProgress),
    {
        let mut report = BatchReport {
            completed: 0,
            total: plan.len(),
        };

        for file in plan.files() {
            let file_options = UploadOptions {
                role: FileRole::Batch {
                    is_last_file: file.is_last_file,
                },
                ..options.clone()
            };

            let result = self
                .upload_file_with_progress(experiment_name, file.path, file_options, |progress| {
                    on_progress(&file, progress)
                })
                .await;

            if let Err(source) = result {
                return Err(BatchError {
                    file_name: file.file_name(),
                    index: file.index,
                    report,
                    source,
                });
            }
            report.completed += 1;
        }

        info!(experiment = experiment_name, files = %report, "batch upload complete");
        Ok(report)
    }
}
