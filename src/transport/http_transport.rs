use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::UpstreamConfig;
use crate::error::{CanonicalError, ErrorContext, Operation, TransportErrorKind};
use crate::protocol::error_shapes::parse_gemini_error;
use crate::protocol::gemini::batch::{
    build_batch_create_request, parse_batch_results_jsonl, with_prefix, BatchInput, BatchResults,
    BatchStatus, GeminiBatchJob, GeminiBatchList,
};
use crate::protocol::gemini::{GeminiRequest, GeminiResponse};
use crate::stream::SseLineStream;

const API_KEY_HEADER: &str = "x-goog-api-key";
const PARSED_URL_CACHE_MAX_ENTRIES: usize = 256;

/// Body bytes of a streaming response, with read failures already mapped.
pub type ByteStream = BoxStream<'static, Result<Bytes, CanonicalError>>;

fn build_reqwest_client(config: &UpstreamConfig) -> Result<reqwest::Client, CanonicalError> {
    let mut builder = reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = config.proxy.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| CanonicalError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| CanonicalError::Config(format!("Failed to build HTTP client: {err}")))
}

fn transport_kind(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

fn transport_error(context: &ErrorContext, err: &reqwest::Error) -> CanonicalError {
    CanonicalError::transport(
        context.operation,
        context.model.as_deref(),
        transport_kind(err),
        err.to_string(),
    )
}

/// HTTP client for the Gemini v1beta API.
///
/// Never retries; every failure is returned to the caller tagged with the
/// operation and model.
pub struct GeminiTransport {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    request_timeout: Duration,
    parsed_url_cache: RwLock<FxHashMap<String, Arc<url::Url>>>,
}

impl std::fmt::Debug for GeminiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTransport")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl GeminiTransport {
    /// Build a transport from the upstream section of the config.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Config`] when the proxy, API key or client
    /// settings are unusable.
    pub fn new(config: &UpstreamConfig) -> Result<Self, CanonicalError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let api_key = config.api_key.trim();
        if !api_key.is_empty() {
            let mut value = HeaderValue::from_str(api_key)
                .map_err(|_| CanonicalError::Config("api_key is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(Self {
            client: build_reqwest_client(config)?,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            headers,
            request_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            parsed_url_cache: RwLock::new(FxHashMap::default()),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn parsed_url(&self, url: &str, context: &ErrorContext) -> Result<Arc<url::Url>, CanonicalError> {
        if let Some(cached) = self.parsed_url_cache.read().get(url) {
            return Ok(Arc::clone(cached));
        }

        let parsed = url::Url::parse(url).map_err(|err| {
            CanonicalError::transport(
                context.operation,
                context.model.as_deref(),
                TransportErrorKind::Other,
                format!("Invalid upstream URL: {err}"),
            )
        })?;

        let mut cache = self.parsed_url_cache.write();
        if let Some(existing) = cache.get(url) {
            return Ok(Arc::clone(existing));
        }
        if cache.len() >= PARSED_URL_CACHE_MAX_ENTRIES {
            cache.clear();
        }
        let parsed = Arc::new(parsed);
        cache.insert(url.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{model}:{method}", self.base_url)
    }

    async fn execute(
        &self,
        method: http::Method,
        url: &str,
        body: Option<Bytes>,
        stream: bool,
        context: &ErrorContext,
    ) -> Result<reqwest::Response, CanonicalError> {
        let parsed = self.parsed_url(url, context)?;
        let mut request = self
            .client
            .request(method, parsed.as_ref().clone())
            .headers(self.headers.clone());
        if stream {
            request = request.header(ACCEPT, "text/event-stream");
        } else {
            request = request.timeout(self.request_timeout);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(context, &err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        let err = parse_gemini_error(status.as_u16(), &body).with_context(context.clone());
        tracing::warn!(
            operation = %context.operation,
            status = status.as_u16(),
            error = %err,
            "gemini upstream returned an error"
        );
        Err(err)
    }

    async fn send_json<B, T>(
        &self,
        method: http::Method,
        url: &str,
        body: Option<&B>,
        context: &ErrorContext,
    ) -> Result<T, CanonicalError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = match body {
            Some(body) => Some(Bytes::from(serde_json::to_vec(body).map_err(|err| {
                CanonicalError::Internal(format!("failed to serialize request body: {err}"))
            })?)),
            None => None,
        };
        let response = self.execute(method, url, body, false, context).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| transport_error(context, &err))?;
        serde_json::from_slice(&bytes).map_err(|err| {
            CanonicalError::decode(
                context.operation,
                context.model.as_deref(),
                format!("invalid response body: {err}"),
            )
        })
    }

    /// `POST models/{model}:generateContent`.
    ///
    /// # Errors
    ///
    /// Transport, upstream and decode failures.
    pub async fn generate_content(
        &self,
        model: &str,
        request: &GeminiRequest,
    ) -> Result<GeminiResponse, CanonicalError> {
        let context = ErrorContext::new(Operation::GenerateContent, Some(model));
        let url = self.model_url(model, "generateContent");
        self.send_json(http::Method::POST, &url, Some(request), &context)
            .await
    }

    /// `POST models/{model}:streamGenerateContent?alt=sse`, split into lines.
    ///
    /// Only the connection and status are checked here; body read failures
    /// surface as `Err` items of the returned stream.
    ///
    /// # Errors
    ///
    /// Transport and upstream failures before the body starts.
    pub async fn stream_generate_content(
        &self,
        model: &str,
        request: &GeminiRequest,
    ) -> Result<SseLineStream<ByteStream>, CanonicalError> {
        let context = ErrorContext::new(Operation::StreamGenerateContent, Some(model));
        let url = format!("{}?alt=sse", self.model_url(model, "streamGenerateContent"));
        let body = serde_json::to_vec(request).map_err(|err| {
            CanonicalError::Internal(format!("failed to serialize request body: {err}"))
        })?;
        let response = self
            .execute(http::Method::POST, &url, Some(Bytes::from(body)), true, &context)
            .await?;
        let bytes: ByteStream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|err| transport_error(&context, &err)))
            .boxed();
        Ok(SseLineStream::new(bytes))
    }

    /// `POST models/{model}:batchGenerateContent`.
    ///
    /// # Errors
    ///
    /// Transport, upstream and decode failures.
    pub async fn create_batch(
        &self,
        model: &str,
        input: BatchInput,
        display_name: Option<&str>,
    ) -> Result<GeminiBatchJob, CanonicalError> {
        let context = ErrorContext::new(Operation::BatchCreate, Some(model));
        let url = self.model_url(model, "batchGenerateContent");
        let body = build_batch_create_request(input, display_name);
        let job: GeminiBatchJob = self
            .send_json(http::Method::POST, &url, Some(&body), &context)
            .await?;
        tracing::debug!(batch = %job.name, "gemini batch created");
        Ok(job)
    }

    /// `GET batches/{id}`.
    ///
    /// # Errors
    ///
    /// Transport, upstream and decode failures.
    pub async fn get_batch(&self, name: &str) -> Result<GeminiBatchJob, CanonicalError> {
        let context = ErrorContext::new(Operation::BatchRetrieve, None);
        let url = format!("{}/{}", self.base_url, with_prefix("batches/", name));
        self.send_json::<(), _>(http::Method::GET, &url, None, &context)
            .await
    }

    /// `GET batches`. An endpoint that does not support listing (404/405)
    /// yields an empty page.
    ///
    /// # Errors
    ///
    /// Transport, upstream and decode failures.
    pub async fn list_batches(
        &self,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<GeminiBatchList, CanonicalError> {
        let context = ErrorContext::new(Operation::BatchList, None);
        let mut url = url::Url::parse(&format!("{}/batches", self.base_url)).map_err(|err| {
            CanonicalError::transport(
                context.operation,
                None,
                TransportErrorKind::Other,
                format!("Invalid upstream URL: {err}"),
            )
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(size) = page_size.filter(|size| *size > 0) {
                query.append_pair("pageSize", &size.to_string());
            }
            if let Some(token) = page_token.filter(|token| !token.is_empty()) {
                query.append_pair("pageToken", token);
            }
        }
        let url = url.as_str().trim_end_matches('?').to_string();

        match self
            .send_json::<(), GeminiBatchList>(http::Method::GET, &url, None, &context)
            .await
        {
            Err(CanonicalError::Upstream {
                status: 404 | 405, ..
            }) => {
                tracing::debug!("gemini batch listing unavailable, returning empty list");
                Ok(GeminiBatchList::default())
            }
            other => other,
        }
    }

    /// `POST batches/{id}:cancel`. Cancellation is asynchronous upstream, so
    /// success means the job is now cancelling.
    ///
    /// # Errors
    ///
    /// Transport and upstream failures.
    pub async fn cancel_batch(&self, name: &str) -> Result<BatchStatus, CanonicalError> {
        let context = ErrorContext::new(Operation::BatchCancel, None);
        let url = format!("{}/{}:cancel", self.base_url, with_prefix("batches/", name));
        self.execute(http::Method::POST, &url, Some(Bytes::from_static(b"{}")), false, &context)
            .await?;
        Ok(BatchStatus::Cancelling)
    }

    /// Download and parse a JSONL results file.
    ///
    /// # Errors
    ///
    /// Transport and upstream failures. Bad lines are reported inside
    /// [`BatchResults::errors`].
    pub async fn download_batch_results(&self, file_name: &str) -> Result<BatchResults, CanonicalError> {
        let context = ErrorContext::new(Operation::BatchResults, None);
        let download_base = self.base_url.replacen("/v1beta", "/download/v1beta", 1);
        let url = format!(
            "{download_base}/{}:download?alt=media",
            with_prefix("files/", file_name)
        );
        let response = self
            .execute(http::Method::GET, &url, None, false, &context)
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(&context, &err))?;
        Ok(parse_batch_results_jsonl(&body))
    }

    /// Results of a finished batch, from its results file or inline responses.
    ///
    /// # Errors
    ///
    /// [`CanonicalError::InvalidRequest`] while the job is still running, plus
    /// transport, upstream and decode failures.
    pub async fn batch_results(&self, name: &str) -> Result<BatchResults, CanonicalError> {
        let job = self.get_batch(name).await?;
        let batch = job.to_canonical();
        if batch.status == BatchStatus::InProgress {
            return Err(CanonicalError::InvalidRequest(format!(
                "batch {} is still processing, results not yet available",
                batch.id
            )));
        }
        if let Some(file) = batch.output_file_id.as_deref() {
            return self.download_batch_results(file).await;
        }
        Ok(BatchResults {
            items: batch.results,
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base_url: &str) -> GeminiTransport {
        GeminiTransport::new(&UpstreamConfig {
            base_url: base_url.to_string(),
            api_key: "test-key".into(),
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn model_urls_accept_prefixed_model_names() {
        let t = transport("https://generativelanguage.googleapis.com/v1beta/");
        assert_eq!(
            t.model_url("models/gemini-2.5-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            t.model_url("gemini-2.5-pro", "streamGenerateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:streamGenerateContent"
        );
    }

    #[test]
    fn api_key_header_is_sensitive() {
        let t = transport("https://example.com/v1beta");
        let value = t.headers.get(API_KEY_HEADER).unwrap();
        assert!(value.is_sensitive());
        assert!(!format!("{t:?}").contains("test-key"));
    }

    #[test]
    fn parsed_urls_are_cached() {
        let t = transport("https://example.com/v1beta");
        let context = ErrorContext::new(Operation::GenerateContent, None);
        let a = t.parsed_url("https://example.com/v1beta/models/m:generateContent", &context).unwrap();
        let b = t.parsed_url("https://example.com/v1beta/models/m:generateContent", &context).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
