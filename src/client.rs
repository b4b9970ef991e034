//! End-to-end entry points: canonical request in, canonical response or
//! event stream out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::AdapterConfig;
use crate::error::CanonicalError;
use crate::observability::token_counter::{estimate_request_tokens, log_request_usage};
use crate::protocol::canonical::{CanonicalRequest, CanonicalResponse, ConvertOptions};
use crate::protocol::gemini::batch::{
    build_batch_request_items, BatchInput, BatchRequestItem, BatchResults, BatchStatus,
    CanonicalBatch,
};
use crate::protocol::gemini::encoder::encode_gemini_request;
use crate::protocol::gemini::response_decoder::decode_gemini_response;
use crate::protocol::gemini::stream_state::StreamStatePool;
use crate::stream::{spawn_gemini_stream, EventHook, StreamHandle, StreamOptions};
use crate::transport::GeminiTransport;

/// Gemini adapter bound to one upstream and one set of conversion flags.
#[derive(Debug)]
pub struct GeminiClient {
    transport: GeminiTransport,
    convert: ConvertOptions,
    channel_capacity: usize,
    stream_timeout: Option<Duration>,
    pool: Arc<StreamStatePool>,
}

impl GeminiClient {
    /// # Errors
    ///
    /// Returns [`CanonicalError::Config`] when the HTTP client cannot be built.
    pub fn from_config(config: &AdapterConfig) -> Result<Self, CanonicalError> {
        Ok(Self {
            transport: GeminiTransport::new(&config.upstream)?,
            convert: config.convert_options(),
            channel_capacity: config.stream.channel_capacity,
            stream_timeout: (config.stream.timeout_secs > 0)
                .then(|| Duration::from_secs(config.stream.timeout_secs)),
            pool: StreamStatePool::new(config.stream.pool_max_retained),
        })
    }

    #[must_use]
    pub fn transport(&self) -> &GeminiTransport {
        &self.transport
    }

    #[must_use]
    pub fn convert_options(&self) -> ConvertOptions {
        self.convert
    }

    /// One non-streaming completion.
    ///
    /// # Errors
    ///
    /// Invalid requests, plus whatever the transport reports.
    pub async fn generate(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, CanonicalError> {
        let started = Instant::now();
        let body = encode_gemini_request(request, &self.convert)?;
        let vendor = self.transport.generate_content(&request.model, &body).await?;
        let response = decode_gemini_response(&vendor, &request.model, &self.convert);
        log_request_usage(
            &response.model,
            &response.usage,
            estimate_request_tokens(request),
            started.elapsed(),
        );
        Ok(response)
    }

    /// Start a stream. Events arrive on the returned handle; mid-stream
    /// failures arrive as a `response.failed` event, not as `Err`.
    ///
    /// # Errors
    ///
    /// Invalid requests and failures before the first byte.
    pub async fn stream(
        &self,
        request: &CanonicalRequest,
        hook: Option<EventHook>,
        cancel: Option<CancellationToken>,
    ) -> Result<StreamHandle, CanonicalError> {
        let body = encode_gemini_request(request, &self.convert)?;
        let lines = self
            .transport
            .stream_generate_content(&request.model, &body)
            .await?;

        let mut options = StreamOptions::new(request.model.clone())
            .with_convert_options(self.convert)
            .with_channel_capacity(self.channel_capacity)
            .with_pool(Arc::clone(&self.pool));
        if let Some(timeout) = self.stream_timeout {
            options = options.with_timeout(timeout);
        }
        if let Some(cancel) = cancel {
            options = options.with_cancel_token(cancel);
        }
        Ok(spawn_gemini_stream(lines, options, hook))
    }

    /// Encode the items and submit them as one inline batch.
    ///
    /// # Errors
    ///
    /// Encoding failures of any item, plus whatever the transport reports.
    pub async fn create_batch(
        &self,
        model: &str,
        items: &[BatchRequestItem],
        display_name: Option<&str>,
    ) -> Result<CanonicalBatch, CanonicalError> {
        let requests = build_batch_request_items(items, &self.convert)?;
        let job = self
            .transport
            .create_batch(model, BatchInput::Inline(requests), display_name)
            .await?;
        Ok(job.to_canonical())
    }

    /// # Errors
    ///
    /// Whatever the transport reports.
    pub async fn retrieve_batch(&self, name: &str) -> Result<CanonicalBatch, CanonicalError> {
        Ok(self.transport.get_batch(name).await?.to_canonical())
    }

    /// # Errors
    ///
    /// Whatever the transport reports.
    pub async fn list_batches(
        &self,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<(Vec<CanonicalBatch>, Option<String>), CanonicalError> {
        let page = self.transport.list_batches(page_size, page_token).await?;
        let batches = page.operations.iter().map(|job| job.to_canonical()).collect();
        Ok((batches, page.next_page_token))
    }

    /// # Errors
    ///
    /// Whatever the transport reports.
    pub async fn cancel_batch(&self, name: &str) -> Result<BatchStatus, CanonicalError> {
        self.transport.cancel_batch(name).await
    }

    /// # Errors
    ///
    /// Whatever the transport reports, or a still-running batch.
    pub async fn batch_results(&self, name: &str) -> Result<BatchResults, CanonicalError> {
        self.transport.batch_results(name).await
    }
}
