//! Per-stream driver task: pulls SSE lines, runs the Gemini stream
//! translator and delivers canonical events over a bounded channel.

pub mod lines;

pub use lines::SseLineStream;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use crate::error::{CanonicalError, ErrorContext, Operation};
use crate::observability::token_counter::log_stream_usage;
use crate::protocol::canonical::{
    CanonicalStreamEvent, CanonicalUsage, ConvertOptions, StreamEventType,
};
use crate::protocol::error_shapes::upstream_error_from_body;
use crate::protocol::gemini::stream::parse_gemini_sse_line;
use crate::protocol::gemini::stream_state::{StreamState, StreamStatePool};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Post-processing applied to every event before delivery.
///
/// Returning `None` skips the event. A dropped terminal event is delivered
/// unchanged instead, so the receiver always sees exactly one terminal.
pub type EventHook = Arc<dyn Fn(CanonicalStreamEvent) -> Option<CanonicalStreamEvent> + Send + Sync>;

/// Request-scoped settings of one stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub model: String,
    pub convert: ConvertOptions,
    pub channel_capacity: usize,
    pub deadline: Option<Instant>,
    pub sequence_base: u64,
    pub cancel: CancellationToken,
    pub pool: Arc<StreamStatePool>,
}

impl StreamOptions {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            convert: ConvertOptions::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            deadline: None,
            sequence_base: 0,
            cancel: CancellationToken::new(),
            pool: StreamStatePool::global(),
        }
    }

    #[must_use]
    pub fn with_convert_options(mut self, convert: ConvertOptions) -> Self {
        self.convert = convert;
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Deadline measured from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub fn with_sequence_base(mut self, base: u64) -> Self {
        self.sequence_base = base;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: Arc<StreamStatePool>) -> Self {
        self.pool = pool;
        self
    }
}

/// What the driver task observed by the time it exited.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub response_id: String,
    pub model: String,
    pub delivered: u64,
    /// `None` when the receiver went away first.
    pub terminal: Option<StreamEventType>,
    pub usage: Option<CanonicalUsage>,
}

/// Receiving side of a running stream.
#[derive(Debug)]
pub struct StreamHandle {
    events: mpsc::Receiver<CanonicalStreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<StreamSummary>,
}

impl StreamHandle {
    pub async fn next_event(&mut self) -> Option<CanonicalStreamEvent> {
        self.events.recv().await
    }

    /// Ask the driver to stop; it still delivers one `response.cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<CanonicalStreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }

    /// Drain remaining events and wait for the task.
    pub async fn finish(mut self) -> Result<(Vec<CanonicalStreamEvent>, StreamSummary), CanonicalError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let summary = self
            .task
            .await
            .map_err(|err| CanonicalError::Internal(format!("stream task failed: {err}")))?;
        Ok((events, summary))
    }
}

/// Spawn the driver for one stream of SSE lines.
///
/// Must be called inside a tokio runtime.
pub fn spawn_gemini_stream<S>(source: S, options: StreamOptions, hook: Option<EventHook>) -> StreamHandle
where
    S: Stream<Item = Result<String, CanonicalError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
    let cancel = options.cancel.clone();
    let task = tokio::spawn(drive(source, options, hook, tx));
    StreamHandle {
        events: rx,
        cancel,
        task,
    }
}

struct Interrupts {
    cancel: CancellationToken,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Interrupts {
    /// Resolves with the terminal kind once cancelled or past the deadline.
    async fn fired(&mut self) -> StreamEventType {
        let Self { cancel, deadline } = self;
        let timed_out = async {
            match deadline.as_mut() {
                Some(sleep) => sleep.as_mut().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => StreamEventType::ResponseCancelled,
            () = timed_out => StreamEventType::ResponseTimedOut,
        }
    }
}

enum Delivery {
    Done,
    Interrupted(StreamEventType),
    Closed,
}

struct Outbox {
    tx: mpsc::Sender<CanonicalStreamEvent>,
    hook: Option<EventHook>,
    next_sequence: u64,
    delivered: u64,
    terminal: Option<StreamEventType>,
}

impl Outbox {
    /// Run the hook. It may rewrite or drop events but never change whether
    /// an event is terminal; such results fall back to the original event.
    fn prepare(&self, event: CanonicalStreamEvent) -> Option<CanonicalStreamEvent> {
        let Some(hook) = self.hook.as_ref() else {
            return Some(event);
        };
        let was_terminal = event.event_type.is_terminal();
        let original = event.clone();
        match hook(event) {
            Some(replaced) if replaced.event_type.is_terminal() == was_terminal => Some(replaced),
            Some(replaced) => {
                tracing::warn!(
                    from = original.event_type.as_str(),
                    to = replaced.event_type.as_str(),
                    "gemini stream: hook changed terminality, keeping original event"
                );
                Some(original)
            }
            None if was_terminal => Some(original),
            None => None,
        }
    }

    fn stamp(&mut self, mut event: CanonicalStreamEvent) -> CanonicalStreamEvent {
        event.sequence_number = self.next_sequence;
        self.next_sequence += 1;
        event
    }

    async fn send_plain(&mut self, event: CanonicalStreamEvent) -> bool {
        let event = self.stamp(event);
        let kind = event.event_type;
        if self.tx.send(event).await.is_err() {
            return false;
        }
        self.delivered += 1;
        if kind.is_terminal() {
            self.terminal = Some(kind);
        }
        true
    }

    /// Deliver a translator batch. Non-terminal sends race the interrupts;
    /// once interrupted, only terminal events of the batch still go out.
    async fn deliver(
        &mut self,
        batch: &mut Vec<CanonicalStreamEvent>,
        interrupts: &mut Interrupts,
    ) -> Delivery {
        let mut interrupted = None;
        for event in batch.drain(..) {
            if interrupted.is_some() && !event.event_type.is_terminal() {
                continue;
            }
            let Some(event) = self.prepare(event) else {
                continue;
            };
            if event.event_type.is_terminal() || interrupted.is_some() {
                if !self.send_plain(event).await {
                    return Delivery::Closed;
                }
                continue;
            }

            let event = self.stamp(event);
            tokio::select! {
                biased;
                kind = interrupts.fired() => {
                    self.next_sequence -= 1;
                    interrupted = Some(kind);
                }
                sent = self.tx.send(event) => {
                    if sent.is_err() {
                        return Delivery::Closed;
                    }
                    self.delivered += 1;
                }
            }
        }
        match interrupted {
            Some(kind) => Delivery::Interrupted(kind),
            None => Delivery::Done,
        }
    }
}

enum Step {
    Line(Option<Result<String, CanonicalError>>),
    Interrupted(StreamEventType),
}

fn translate_line(state: &mut StreamState, line: &str, batch: &mut Vec<CanonicalStreamEvent>) {
    let Some(parsed) = parse_gemini_sse_line(line) else {
        return;
    };
    match parsed {
        Ok(chunk) => match chunk.error.as_ref() {
            Some(error) => {
                let err = upstream_error_from_body(500, error).with_context(ErrorContext::new(
                    Operation::StreamGenerateContent,
                    Some(state.model()),
                ));
                tracing::warn!(error = %err, "gemini stream: upstream error chunk");
                state.fail(&err, 0, batch);
            }
            None => state.process_chunk(&chunk, 0, batch),
        },
        Err(err) => {
            let err = CanonicalError::decode(
                Operation::StreamGenerateContent,
                Some(state.model()),
                format!("invalid stream chunk: {err}"),
            );
            tracing::warn!(error = %err, "gemini stream: undecodable chunk");
            state.fail(&err, 0, batch);
        }
    }
}

async fn drive<S>(
    source: S,
    options: StreamOptions,
    hook: Option<EventHook>,
    tx: mpsc::Sender<CanonicalStreamEvent>,
) -> StreamSummary
where
    S: Stream<Item = Result<String, CanonicalError>> + Send + 'static,
{
    let started = std::time::Instant::now();
    let mut state = options.pool.acquire(&options.model, options.convert);
    let mut interrupts = Interrupts {
        cancel: options.cancel.clone(),
        deadline: options.deadline.map(|at| Box::pin(tokio::time::sleep_until(at))),
    };
    let mut outbox = Outbox {
        tx,
        hook,
        next_sequence: options.sequence_base,
        delivered: 0,
        terminal: None,
    };
    let mut batch = Vec::with_capacity(16);
    let mut source = Box::pin(source);
    let mut interrupted = None;
    let mut closed = false;

    tracing::debug!(model = %options.model, message_id = %state.message_id(), "gemini stream: started");

    while !state.is_finished() {
        let step = tokio::select! {
            biased;
            kind = interrupts.fired() => Step::Interrupted(kind),
            line = source.next() => Step::Line(line),
        };
        match step {
            Step::Interrupted(kind) => {
                interrupted = Some(kind);
                break;
            }
            Step::Line(None) => state.finalize(0, &mut batch),
            Step::Line(Some(Ok(line))) => translate_line(&mut state, &line, &mut batch),
            Step::Line(Some(Err(err))) => {
                tracing::warn!(error = %err, "gemini stream: transport read failed");
                state.fail(&err, 0, &mut batch);
            }
        }

        match outbox.deliver(&mut batch, &mut interrupts).await {
            Delivery::Done => {}
            Delivery::Interrupted(kind) => {
                interrupted = Some(kind);
                break;
            }
            Delivery::Closed => {
                closed = true;
                break;
            }
        }
    }

    drop(source);

    if let Some(kind) = interrupted {
        tracing::debug!(response_id = %state.response_id(), event = kind.as_str(), "gemini stream: interrupted");
        state.interrupt(kind, 0, &mut batch);
        for event in batch.drain(..) {
            let Some(event) = outbox.prepare(event) else {
                continue;
            };
            if !outbox.send_plain(event).await {
                closed = true;
                break;
            }
        }
    }

    if closed {
        tracing::debug!(response_id = %state.response_id(), "gemini stream: receiver dropped");
    }

    log_stream_usage(
        state.model(),
        state.response_id(),
        state.last_usage().as_ref(),
        started.elapsed(),
    );

    StreamSummary {
        response_id: state.response_id().to_string(),
        model: state.model().to_string(),
        delivered: outbox.delivered,
        terminal: outbox.terminal,
        usage: state.last_usage(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> impl Stream<Item = Result<String, CanonicalError>> + Send + 'static {
        futures_util::stream::iter(raw.iter().map(|l| Ok::<_, CanonicalError>((*l).to_string())).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn sequence_numbers_start_at_base_and_are_contiguous() {
        let source = lines(&[
            r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"hi"}]}}]}"#,
            r#"data: {"candidates":[{"content":{"role":"model","parts":[]},"finishReason":"STOP"}]}"#,
        ]);
        let handle = spawn_gemini_stream(
            source,
            StreamOptions::new("gemini-2.5-flash")
                .with_sequence_base(100)
                .with_pool(StreamStatePool::new(2)),
            None,
        );
        let (events, summary) = handle.finish().await.unwrap();
        for (offset, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_number, 100 + offset as u64);
        }
        assert_eq!(summary.terminal, Some(StreamEventType::ResponseCompleted));
        assert_eq!(summary.delivered, events.len() as u64);
    }

    #[tokio::test]
    async fn undecodable_chunk_fails_the_stream() {
        let source = lines(&["data: {not json", r#"data: {"candidates":[]}"#]);
        let handle = spawn_gemini_stream(source, StreamOptions::new("m"), None);
        let events = handle.collect().await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, StreamEventType::ResponseFailed);
        assert_eq!(events.iter().filter(|e| e.event_type.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn released_state_returns_to_pool() {
        let pool = StreamStatePool::new(4);
        let source = lines(&[r#"data: {"candidates":[{"content":{"parts":[{"text":"x"}]},"finishReason":"STOP"}]}"#]);
        let handle = spawn_gemini_stream(source, StreamOptions::new("m").with_pool(Arc::clone(&pool)), None);
        let _ = handle.finish().await.unwrap();
        assert_eq!(pool.retained(), 1);
    }
}
