//! OCR extraction via the DeepFellow OCR endpoint.
//!
//! Sends a PDF or image to `base_url + ocr_endpoint` as a multipart upload
//! and returns the extracted text with a per-page breakdown.
//!
//! # Request
//!
//! ```text
//! POST {base_url}{ocr_endpoint}
//! Authorization: Bearer {api_key}
//! Content-Type: multipart/form-data   (one part: "file", filename = basename)
//! ```
//!
//! # Response
//!
//! ```json
//! { "pages": [{ "page_number": 1, "text": "..." }], "confidence": 0.97 }
//! ```
//!
//! # Failure handling
//!
//! - missing file, directory, unsupported extension, unreadable file →
//!   fail before any network call
//! - HTTP 5xx, timeouts and connection failures → retry (see [`crate::retry`])
//! - HTTP 4xx, malformed JSON, missing `pages` → fail immediately

use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, DeepfellowConfig};
use crate::models::{ModelError, OcrResult, PageText};
use crate::retry::{classify_status, retry, AttemptError, RetryError, RetryPolicy, Sleeper, StatusClass, TokioSleeper};

/// Extensions (lower-case, without the dot) the OCR service accepts.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["pdf", "png", "jpg", "jpeg", "tiff", "tif"];

/// Per-attempt request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("File not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("Not a regular file: {}", .path.display())]
    NotAFile { path: PathBuf },

    #[error("Unsupported file type: {extension}")]
    UnsupportedFileType { extension: String },

    #[error("Failed to read {}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Client error {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Malformed OCR response: {0}")]
    MalformedResponse(String),

    #[error("OCR response failed validation")]
    InvalidResult(#[from] ModelError),

    #[error("OCR failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<OcrError>,
    },
}

impl OcrError {
    /// Whether another attempt could succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OcrError::ServerError { .. } => true,
            OcrError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    /// The connection broke while sending the request or reading the body.
    Io,
    /// Request construction, redirect policy, and similar local failures.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportErrorKind::Timeout => "Request timed out",
            TransportErrorKind::Connect => "Connection failed",
            TransportErrorKind::Io => "Transfer failed",
            TransportErrorKind::Other => "Request failed",
        })
    }
}

/// A failure below HTTP: no status code was received.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind != TransportErrorKind::Other
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if e.is_request() || e.is_body() || e.is_decode() {
            TransportErrorKind::Io
        } else {
            TransportErrorKind::Other
        };

        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }

        Self { kind, message }
    }
}

/// One upload, borrowed for the duration of an attempt.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub url: &'a str,
    pub api_key: &'a str,
    pub file_name: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Sends a single multipart upload and returns the raw HTTP reply.
#[async_trait]
pub trait OcrTransport: Send + Sync {
    async fn post_file(
        &self,
        request: &UploadRequest<'_>,
    ) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: OcrTransport + ?Sized> OcrTransport for Arc<T> {
    async fn post_file(
        &self,
        request: &UploadRequest<'_>,
    ) -> Result<TransportResponse, TransportError> {
        (**self).post_file(request).await
    }
}

/// [`OcrTransport`] over `reqwest`.
///
/// A fresh client is built per upload, so no connection state outlives the
/// attempt that opened it.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    timeout: Duration,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(REQUEST_TIMEOUT)
    }
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl OcrTransport for ReqwestTransport {
    async fn post_file(
        &self,
        request: &UploadRequest<'_>,
    ) -> Result<TransportResponse, TransportError> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let part = multipart::Part::bytes(request.bytes.to_vec())
            .file_name(request.file_name.to_string());
        let form = multipart::Form::new().part("file", part);

        let response = client
            .post(request.url)
            .bearer_auth(request.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

/// Checks that `path` is an existing regular file with a supported extension.
pub fn validate_file(path: &Path) -> Result<(), OcrError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(OcrError::NotAFile {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OcrError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(OcrError::ReadFile {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        let extension = if ext.is_empty() {
            "(none)".to_string()
        } else {
            format!(".{}", ext)
        };
        return Err(OcrError::UnsupportedFileType { extension });
    }

    Ok(())
}

/// Joins `base_url` and `ocr_endpoint` with exactly one slash between them.
pub fn build_url(config: &DeepfellowConfig) -> String {
    let base = config.base_url.trim_end_matches('/');
    let endpoint = &config.ocr_endpoint;
    if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}

/// Converts the OCR service's JSON reply into an [`OcrResult`].
///
/// Page texts are joined with a blank line. The confidence range is checked
/// by [`OcrResult`] itself.
pub fn parse_response(data: &Value) -> Result<OcrResult, OcrError> {
    let object = data
        .as_object()
        .ok_or_else(|| OcrError::MalformedResponse("expected a JSON object".to_string()))?;

    let pages = object
        .get("pages")
        .ok_or_else(|| OcrError::MalformedResponse("missing 'pages'".to_string()))?
        .as_array()
        .ok_or_else(|| OcrError::MalformedResponse("'pages' must be an array".to_string()))?;

    let mut parsed = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        let page_number = page
            .get("page_number")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                OcrError::MalformedResponse(format!(
                    "pages[{}].page_number missing or not an integer",
                    i
                ))
            })?;
        let text = page.get("text").and_then(Value::as_str).ok_or_else(|| {
            OcrError::MalformedResponse(format!("pages[{}].text missing or not a string", i))
        })?;
        parsed.push(PageText::new(page_number, text)?);
    }

    let confidence = match object.get("confidence") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_f64().ok_or_else(|| {
            OcrError::MalformedResponse("'confidence' must be a number".to_string())
        })?),
    };

    Ok(OcrResult::from_pages(parsed, confidence)?)
}

/// Client for the OCR endpoint of one configured service.
pub struct OcrClient<T = ReqwestTransport> {
    url: String,
    api_key: String,
    transport: T,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl OcrClient<ReqwestTransport> {
    pub fn new(config: &Config) -> Self {
        Self {
            url: build_url(&config.deepfellow),
            api_key: config.deepfellow.api_key.clone(),
            transport: ReqwestTransport::default(),
            sleeper: Arc::new(TokioSleeper),
            policy: RetryPolicy::default(),
        }
    }
}

impl<T: OcrTransport> OcrClient<T> {
    pub fn with_transport<U: OcrTransport>(self, transport: U) -> OcrClient<U> {
        OcrClient {
            url: self.url,
            api_key: self.api_key,
            transport,
            sleeper: self.sleeper,
            policy: self.policy,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Extracts text from a PDF or image file.
    ///
    /// The file is validated and read once before the first attempt; all
    /// attempts upload the same bytes.
    pub async fn extract_text(&self, file_path: &Path) -> Result<OcrResult, OcrError> {
        validate_file(file_path)?;

        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|source| OcrError::ReadFile {
                path: file_path.to_path_buf(),
                source,
            })?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(file = %file_name, "starting OCR extraction");

        let request = UploadRequest {
            url: &self.url,
            api_key: &self.api_key,
            file_name: &file_name,
            bytes: &bytes,
        };
        let request = &request;

        let result = retry(&self.policy, self.sleeper.as_ref(), move |attempt| {
            self.attempt(request, attempt)
        })
        .await
        .map_err(|e| match e {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { attempts, last } => OcrError::RetriesExhausted {
                attempts,
                source: Box::new(last),
            },
        })?;

        info!(file = %file_name, pages = result.page_count(), "OCR complete");
        Ok(result)
    }

    async fn attempt(
        &self,
        request: &UploadRequest<'_>,
        attempt: u32,
    ) -> Result<OcrResult, AttemptError<OcrError>> {
        debug!(attempt, url = %request.url, "posting file");

        let response = match self.transport.post_file(request).await {
            Ok(response) => response,
            Err(e) if e.is_retryable() => return Err(AttemptError::Retryable(e.into())),
            Err(e) => return Err(AttemptError::Fatal(e.into())),
        };

        let TransportResponse { status, body } = response;
        match classify_status(status) {
            StatusClass::Success => {
                let data: Value = serde_json::from_str(&body).map_err(|e| {
                    AttemptError::Fatal(OcrError::MalformedResponse(format!(
                        "invalid JSON: {}",
                        e
                    )))
                })?;
                parse_response(&data).map_err(AttemptError::Fatal)
            }
            StatusClass::Retryable => Err(AttemptError::Retryable(OcrError::ServerError {
                status,
                body,
            })),
            StatusClass::Fatal if (400..500).contains(&status) => {
                Err(AttemptError::Fatal(OcrError::ClientError { status, body }))
            }
            StatusClass::Fatal => Err(AttemptError::Fatal(OcrError::UnexpectedStatus {
                status,
                body,
            })),
        }
    }
}

/// Extracts text from `file_path` using the service in `config`.
pub async fn extract_text(file_path: &Path, config: &Config) -> Result<OcrResult, OcrError> {
    OcrClient::new(config).extract_text(file_path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectoriesConfig, Recipient};
    use crate::models::Confidence;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn deepfellow(base_url: &str, ocr_endpoint: &str, api_key: &str) -> DeepfellowConfig {
        DeepfellowConfig {
            base_url: base_url.to_string(),
            responses_endpoint: "/v1/responses".to_string(),
            ocr_endpoint: ocr_endpoint.to_string(),
            api_key: api_key.to_string(),
            vision_model: "gpt-4-vision".to_string(),
            llm_model: "deepseek".to_string(),
            rag_collection: "documents".to_string(),
        }
    }

    fn test_config(api_key: &str) -> Config {
        Config {
            directories: DirectoriesConfig {
                watch: PathBuf::from("/tmp/inbox"),
                output: PathBuf::from("/tmp/output"),
            },
            deepfellow: deepfellow("http://localhost:8000", "/v1/ocr", api_key),
            recipients: vec![Recipient {
                name: "Test".to_string(),
                tags: vec!["t1".to_string()],
            }],
        }
    }

    #[derive(Debug, Clone)]
    struct RecordedUpload {
        url: String,
        api_key: String,
        file_name: String,
        bytes: Vec<u8>,
    }

    /// Replays scripted replies and records every upload.
    #[derive(Default)]
    struct FakeTransport {
        replies: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        uploads: Mutex<Vec<RecordedUpload>>,
    }

    impl FakeTransport {
        fn scripted(replies: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                uploads: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl OcrTransport for FakeTransport {
        async fn post_file(
            &self,
            request: &UploadRequest<'_>,
        ) -> Result<TransportResponse, TransportError> {
            self.uploads.lock().unwrap().push(RecordedUpload {
                url: request.url.to_string(),
                api_key: request.api_key.to_string(),
                file_name: request.file_name.to_string(),
                bytes: request.bytes.to_vec(),
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("more requests than scripted replies")
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn reply(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status,
            body: body.to_string(),
        })
    }

    fn success() -> Result<TransportResponse, TransportError> {
        reply(
            200,
            r#"{"pages": [{"page_number": 1, "text": "Hello world"}], "confidence": 0.99}"#,
        )
    }

    fn client(
        transport: &Arc<FakeTransport>,
        sleeper: &Arc<RecordingSleeper>,
    ) -> OcrClient<Arc<FakeTransport>> {
        OcrClient::new(&test_config("test-key"))
            .with_transport(Arc::clone(transport))
            .with_sleeper(Arc::clone(sleeper) as Arc<dyn Sleeper>)
    }

    fn pdf_in(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-fake").unwrap();
        path
    }

    // --- validate_file ---

    #[test]
    fn test_validate_accepts_supported_extensions() {
        let tmp = TempDir::new().unwrap();
        for ext in ["pdf", "png", "jpg", "jpeg", "tiff", "tif", "PDF", "Png", "JPG"] {
            let path = tmp.path().join(format!("doc.{}", ext));
            std::fs::write(&path, b"x").unwrap();
            validate_file(&path).unwrap();
        }
    }

    #[test]
    fn test_validate_rejects_unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.docx");
        std::fs::write(&path, b"x").unwrap();

        let err = validate_file(&path).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type: .docx");

        let bare = tmp.path().join("README");
        std::fs::write(&bare, b"x").unwrap();
        assert!(matches!(
            validate_file(&bare),
            Err(OcrError::UnsupportedFileType { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_and_directories() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.pdf");
        let err = validate_file(&missing).unwrap_err();
        assert!(matches!(err, OcrError::FileNotFound { .. }));
        assert!(err.to_string().starts_with("File not found"));

        let dir = tmp.path().join("folder.pdf");
        std::fs::create_dir(&dir).unwrap();
        assert!(matches!(
            validate_file(&dir),
            Err(OcrError::NotAFile { .. })
        ));
    }

    // --- build_url ---

    #[test]
    fn test_build_url_slash_handling() {
        for (base, endpoint) in [
            ("http://localhost:8000", "/v1/ocr"),
            ("http://localhost:8000/", "/v1/ocr"),
            ("http://localhost:8000", "v1/ocr"),
            ("http://localhost:8000/", "v1/ocr"),
        ] {
            assert_eq!(
                build_url(&deepfellow(base, endpoint, "k")),
                "http://localhost:8000/v1/ocr"
            );
        }
    }

    // --- parse_response ---

    #[test]
    fn test_parse_multi_page_with_confidence() {
        let data = json!({
            "pages": [
                {"page_number": 1, "text": "Page one"},
                {"page_number": 2, "text": "Page two"},
            ],
            "confidence": 0.95,
        });
        let result = parse_response(&data).unwrap();
        assert_eq!(result.text, "Page one\n\nPage two");
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.pages[0].page_number(), 1);
        assert_eq!(result.pages[1].text(), "Page two");
        assert_eq!(result.confidence.map(Confidence::value), Some(0.95));
    }

    #[test]
    fn test_parse_single_page_no_confidence() {
        let result =
            parse_response(&json!({"pages": [{"page_number": 1, "text": "Only page"}]})).unwrap();
        assert_eq!(result.text, "Only page");
        assert_eq!(result.pages.len(), 1);
        assert!(result.confidence.is_none());

        let result = parse_response(&json!({"pages": [], "confidence": null})).unwrap();
        assert!(result.confidence.is_none());
    }

    #[test]
    fn test_parse_empty_pages() {
        let result = parse_response(&json!({"pages": []})).unwrap();
        assert_eq!(result.text, "");
        assert!(result.pages.is_empty());
        assert!(result.confidence.is_none());
    }

    #[test]
    fn test_parse_rejects_missing_structure() {
        let cases = [
            (json!([]), "JSON object"),
            (json!({"confidence": 0.5}), "'pages'"),
            (json!({"pages": "nope"}), "'pages'"),
            (json!({"pages": [{"text": "x"}]}), "pages[0].page_number"),
            (json!({"pages": [{"page_number": 1}]}), "pages[0].text"),
            (
                json!({"pages": [{"page_number": 1, "text": "a"}, {"page_number": "2", "text": "b"}]}),
                "pages[1].page_number",
            ),
            (json!({"pages": [], "confidence": "high"}), "'confidence'"),
        ];
        for (data, needle) in cases {
            let err = parse_response(&data).unwrap_err();
            assert!(
                matches!(err, OcrError::MalformedResponse(ref m) if m.contains(needle)),
                "{:?} should mention {}",
                err,
                needle
            );
        }
    }

    #[test]
    fn test_parse_defers_range_checks_to_model() {
        let err = parse_response(&json!({"pages": [], "confidence": 1.5})).unwrap_err();
        assert!(matches!(
            err,
            OcrError::InvalidResult(ModelError::ConfidenceOutOfRange(_))
        ));

        let err = parse_response(&json!({"pages": [{"page_number": 0, "text": "x"}]})).unwrap_err();
        assert!(matches!(
            err,
            OcrError::InvalidResult(ModelError::InvalidPageNumber(0))
        ));
    }

    // --- extract_text ---

    #[tokio::test]
    async fn test_extract_text_returns_result() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![success()]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let result = client(&transport, &sleeper).extract_text(&pdf).await.unwrap();

        assert_eq!(result.text, "Hello world");
        assert_eq!(result.confidence.map(Confidence::value), Some(0.99));
        assert_eq!(result.pages.len(), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_extract_text_sends_auth_and_file() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![success()]);
        let client = OcrClient::new(&test_config("secret-key-123"))
            .with_transport(Arc::clone(&transport));

        client.extract_text(&pdf).await.unwrap();

        let uploads = transport.uploads.lock().unwrap();
        assert_eq!(uploads[0].url, "http://localhost:8000/v1/ocr");
        assert_eq!(uploads[0].api_key, "secret-key-123");
        assert_eq!(uploads[0].file_name, "doc.pdf");
        assert_eq!(uploads[0].bytes, b"%PDF-fake");
    }

    #[tokio::test]
    async fn test_extract_text_retries_5xx_then_succeeds() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![reply(503, "Service Unavailable"), success()]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let result = client(&transport, &sleeper).extract_text(&pdf).await.unwrap();

        assert_eq!(result.text, "Hello world");
        assert_eq!(transport.calls(), 2);
        assert_eq!(*sleeper.sleeps.lock().unwrap(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_extract_text_retries_timeout_then_succeeds() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![
            Err(TransportError::new(TransportErrorKind::Timeout, "timed out")),
            success(),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let result = client(&transport, &sleeper).extract_text(&pdf).await.unwrap();

        assert_eq!(result.text, "Hello world");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_extract_text_exhausts_retries_with_backoff() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![
            reply(500, "Internal Server Error"),
            reply(500, "Internal Server Error"),
            reply(500, "Internal Server Error"),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = client(&transport, &sleeper).extract_text(&pdf).await.unwrap_err();

        assert_eq!(err.to_string(), "OCR failed after 3 attempts");
        match &err {
            OcrError::RetriesExhausted { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**source, OcrError::ServerError { status: 500, .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![Duration::from_secs_f64(1.0), Duration::from_secs_f64(2.0)]
        );
    }

    #[tokio::test]
    async fn test_extract_text_fails_immediately_on_4xx() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![reply(422, "Unprocessable Entity")]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = client(&transport, &sleeper).extract_text(&pdf).await.unwrap_err();

        assert_eq!(err.to_string(), "Client error 422: Unprocessable Entity");
        assert!(!err.is_retryable());
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_text_malformed_json_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![reply(200, "<html>oops</html>")]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = client(&transport, &sleeper).extract_text(&pdf).await.unwrap_err();

        assert!(matches!(err, OcrError::MalformedResponse(_)));
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_text_local_transport_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let pdf = pdf_in(&tmp);
        let transport = FakeTransport::scripted(vec![Err(TransportError::new(
            TransportErrorKind::Other,
            "builder error",
        ))]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = client(&transport, &sleeper).extract_text(&pdf).await.unwrap_err();

        assert!(matches!(err, OcrError::Transport(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_extract_text_rejects_before_network() {
        let tmp = TempDir::new().unwrap();
        let docx = tmp.path().join("doc.docx");
        std::fs::write(&docx, b"x").unwrap();
        let missing = tmp.path().join("missing.pdf");
        let transport = FakeTransport::scripted(vec![]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client(&transport, &sleeper);

        let err = client.extract_text(&docx).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));

        let err = client.extract_text(&missing).await.unwrap_err();
        assert!(err.to_string().contains("File not found"));

        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_extract_text_accepts_all_image_types() {
        let tmp = TempDir::new().unwrap();
        for ext in SUPPORTED_EXTENSIONS {
            let path = tmp.path().join(format!("doc.{}", ext));
            std::fs::write(&path, b"fake-content").unwrap();
            let transport = FakeTransport::scripted(vec![success()]);
            let sleeper = Arc::new(RecordingSleeper::default());

            let result = client(&transport, &sleeper).extract_text(&path).await.unwrap();
            assert_eq!(result.text, "Hello world");
            assert_eq!(
                transport.uploads.lock().unwrap()[0].file_name,
                format!("doc.{}", ext)
            );
        }
    }

    #[test]
    fn test_transport_error_retryability() {
        assert!(TransportError::new(TransportErrorKind::Timeout, "t").is_retryable());
        assert!(TransportError::new(TransportErrorKind::Connect, "c").is_retryable());
        assert!(TransportError::new(TransportErrorKind::Io, "i").is_retryable());
        assert!(!TransportError::new(TransportErrorKind::Other, "o").is_retryable());
        assert_eq!(
            TransportError::new(TransportErrorKind::Timeout, "after 120s").to_string(),
            "Request timed out: after 120s"
        );
    }
}
