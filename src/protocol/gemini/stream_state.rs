//! Per-stream bookkeeping for the Gemini stream translator, and the pool
//! that recycles it between streams.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::protocol::canonical::{CanonicalUsage, ConvertOptions};
use crate::util::{next_generated_id, unix_now_secs};

/// Retention cap of the process-wide pool.
pub const DEFAULT_POOL_MAX_RETAINED: usize = 64;

static GENERATED_MESSAGE_ID_SEQ: AtomicU64 = AtomicU64::new(1);
static GENERATED_STREAM_RESPONSE_ID_SEQ: AtomicU64 = AtomicU64::new(1);

static GLOBAL_POOL: LazyLock<Arc<StreamStatePool>> =
    LazyLock::new(|| StreamStatePool::new(DEFAULT_POOL_MAX_RETAINED));

/// Mutable state of one in-flight stream.
///
/// Only the stream translator mutates it. Maps are keyed by output index.
#[derive(Debug, Default)]
pub struct StreamState {
    // --- lifecycle ---
    pub(super) created_emitted: bool,
    pub(super) in_progress_emitted: bool,
    pub(super) completed_emitted: bool,

    // --- identity ---
    pub(super) options: ConvertOptions,
    pub(super) message_id: String,
    pub(super) generated_response_id: String,
    pub(super) vendor_response_id: Option<String>,
    pub(super) request_model: String,
    pub(super) vendor_model: Option<String>,
    pub(super) created_at: i64,

    // --- items ---
    pub(super) next_output_index: usize,
    pub(super) items_opened: usize,
    pub(super) item_ids: FxHashMap<usize, String>,
    pub(super) tool_call_ids: FxHashMap<usize, String>,
    pub(super) tool_names: FxHashMap<usize, String>,
    pub(super) tool_arguments: FxHashMap<usize, String>,
    pub(super) open_tool_calls: SmallVec<[usize; 4]>,
    pub(super) text_output_index: Option<usize>,
    pub(super) text_closed: bool,
    pub(super) text_buffer: String,

    // --- outcome ---
    pub(super) last_usage: Option<CanonicalUsage>,
    pub(super) last_finish_reason: Option<String>,
    pub(super) prompt_blocked: bool,
    pub(super) saw_candidate: bool,
    pub(super) saw_tool_calls: bool,
}

impl StreamState {
    /// A fresh, unpooled state for one stream.
    #[must_use]
    pub fn new(model: &str, options: ConvertOptions) -> Self {
        let mut state = Self::default();
        state.begin(model, options);
        state
    }

    fn begin(&mut self, model: &str, options: ConvertOptions) {
        self.options = options;
        self.request_model.push_str(model);
        self.message_id = next_generated_id("msg", &GENERATED_MESSAGE_ID_SEQ);
        self.generated_response_id =
            next_generated_id("resp", &GENERATED_STREAM_RESPONSE_ID_SEQ);
        self.created_at = unix_now_secs();
    }

    /// Clear every flag, map and buffer, keeping allocations.
    pub fn reset(&mut self) {
        self.created_emitted = false;
        self.in_progress_emitted = false;
        self.completed_emitted = false;

        self.options = ConvertOptions::default();
        self.message_id.clear();
        self.generated_response_id.clear();
        self.vendor_response_id = None;
        self.request_model.clear();
        self.vendor_model = None;
        self.created_at = 0;

        self.next_output_index = 0;
        self.items_opened = 0;
        self.item_ids.clear();
        self.tool_call_ids.clear();
        self.tool_names.clear();
        self.tool_arguments.clear();
        self.open_tool_calls.clear();
        self.text_output_index = None;
        self.text_closed = false;
        self.text_buffer.clear();

        self.last_usage = None;
        self.last_finish_reason = None;
        self.prompt_blocked = false;
        self.saw_candidate = false;
        self.saw_tool_calls = false;
    }

    /// Vendor response id once observed, else the generated one.
    #[must_use]
    pub fn response_id(&self) -> &str {
        self.vendor_response_id
            .as_deref()
            .unwrap_or(&self.generated_response_id)
    }

    /// Vendor model version once observed, else the request model.
    #[must_use]
    pub fn model(&self) -> &str {
        self.vendor_model.as_deref().unwrap_or(&self.request_model)
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether a terminal event has been produced.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completed_emitted
    }

    #[must_use]
    pub fn last_usage(&self) -> Option<CanonicalUsage> {
        self.last_usage
    }

    pub(super) fn allocate_output_index(&mut self) -> usize {
        let index = self.next_output_index;
        self.next_output_index += 1;
        self.items_opened += 1;
        index
    }

    /// `{message_id}_{kind}_{output_index}`, recorded for the index.
    pub(super) fn assign_item_id(&mut self, kind: &str, output_index: usize) -> String {
        let id = format!("{}_{kind}_{output_index}", self.message_id);
        self.item_ids.insert(output_index, id.clone());
        id
    }
}

/// Bounded free list of [`StreamState`] values.
#[derive(Debug)]
pub struct StreamStatePool {
    free: Mutex<Vec<StreamState>>,
    max_retained: usize,
}

impl StreamStatePool {
    #[must_use]
    pub fn new(max_retained: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_retained.min(16))),
            max_retained,
        })
    }

    /// The process-wide pool.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_POOL)
    }

    /// Take a state for a new stream, reusing a retained one when available.
    #[must_use]
    pub fn acquire(self: &Arc<Self>, model: &str, options: ConvertOptions) -> PooledStreamState {
        let mut state = self.free.lock().pop().unwrap_or_default();
        state.begin(model, options);
        PooledStreamState {
            state,
            pool: Arc::clone(self),
        }
    }

    /// Return a state to the pool. Equivalent to dropping the guard.
    pub fn release(guard: PooledStreamState) {
        drop(guard);
    }

    /// Number of states currently retained.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.free.lock().len()
    }

    fn give_back(&self, mut state: StreamState) {
        state.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(state);
        }
    }
}

/// Exclusive handle on a pooled [`StreamState`]; returns it to the pool on drop.
#[derive(Debug)]
pub struct PooledStreamState {
    state: StreamState,
    pool: Arc<StreamStatePool>,
}

impl Deref for PooledStreamState {
    type Target = StreamState;

    fn deref(&self) -> &StreamState {
        &self.state
    }
}

impl DerefMut for PooledStreamState {
    fn deref_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }
}

impl Drop for PooledStreamState {
    fn drop(&mut self) {
        let state = std::mem::take(&mut self.state);
        self.pool.give_back(state);
    }
}
