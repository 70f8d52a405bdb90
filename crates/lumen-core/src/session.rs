//! State of the plugin the user currently has open.
//!
//! Requests to a session are strictly request-then-response: while one is in
//! flight, later ones wait in a queue. Consecutive searches in the queue
//! collapse to the newest, so fast typing never builds a backlog.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::navigation::{Navigator, PendingNav};
use crate::plugin::{Plugin, PluginInput, Step};
use lumen_types::{InputMode, ResultItem, ResultPatch};

/// A request waiting for its turn
#[derive(Debug, Clone)]
pub(crate) struct QueuedRequest {
    pub input: PluginInput,
    pub pending: Option<PendingNav>,
    /// Show the busy indicator while it runs
    pub busy: bool,
}

impl QueuedRequest {
    pub(crate) fn new(input: PluginInput, pending: Option<PendingNav>) -> Self {
        Self {
            input,
            pending,
            busy: true,
        }
    }

    /// Background step (poll, live form update) with no busy indicator
    pub(crate) fn quiet(input: PluginInput) -> Self {
        Self {
            input,
            pending: None,
            busy: false,
        }
    }
}

/// A request handed to the transport
#[derive(Debug)]
pub(crate) struct StartedRequest {
    pub seq: u64,
    pub input: PluginInput,
    pub busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InFlight {
    pub seq: u64,
    pub busy: bool,
}

#[derive(Debug)]
pub(crate) struct Session {
    pub plugin_id: String,
    pub name: String,
    pub token: String,
    pub navigator: Navigator,
    pub context: Option<String>,
    pub last_selected: Option<String>,
    pub input_mode: InputMode,
    pub query: String,
    /// Rows of the last results view, kept for `update` patches
    pub results: Vec<ResultItem>,
    in_flight: Option<InFlight>,
    next_seq: u64,
    queue: VecDeque<QueuedRequest>,
    task: Option<AbortHandle>,
    slider: Option<(String, f64)>,
    slider_seq: u64,
    poll_seq: u64,
}

impl Session {
    pub(crate) fn new(plugin: &Plugin, double_escape: Duration) -> Self {
        Self {
            plugin_id: plugin.id.clone(),
            name: plugin.manifest.name.clone(),
            token: Uuid::new_v4().to_string(),
            navigator: Navigator::new(double_escape),
            context: None,
            last_selected: None,
            input_mode: plugin.manifest.input_mode.unwrap_or_default(),
            query: String::new(),
            results: Vec::new(),
            in_flight: None,
            next_seq: 1,
            queue: VecDeque::new(),
            task: None,
            slider: None,
            slider_seq: 0,
            poll_seq: 0,
        }
    }

    pub(crate) fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Start the request now if nothing is in flight, otherwise queue it
    pub(crate) fn submit(&mut self, request: QueuedRequest) -> Option<StartedRequest> {
        if self.in_flight.is_some() {
            self.enqueue(request);
            return None;
        }
        Some(self.begin(request))
    }

    fn enqueue(&mut self, request: QueuedRequest) {
        let is_search = request.input.step == Step::Search;
        if is_search
            && let Some(last) = self.queue.back_mut()
            && last.input.step == Step::Search
        {
            *last = request;
            return;
        }
        self.queue.push_back(request);
    }

    fn begin(&mut self, request: QueuedRequest) -> StartedRequest {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight = Some(InFlight {
            seq,
            busy: request.busy,
        });
        self.navigator.on_request(request.pending);
        StartedRequest {
            seq,
            input: request.input.with_session(&self.token),
            busy: request.busy,
        }
    }

    /// Mark the in-flight request answered. With `seq`, only that request
    /// counts; daemons answer in order so they pass `None`.
    pub(crate) fn finish(&mut self, seq: Option<u64>) -> Option<InFlight> {
        let current = self.in_flight?;
        if seq.is_some_and(|s| s != current.seq) {
            return None;
        }
        self.in_flight = None;
        self.task = None;
        Some(current)
    }

    /// Next queued request, if the session is free to send it
    pub(crate) fn next_request(&mut self) -> Option<StartedRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        let request = self.queue.pop_front()?;
        Some(self.begin(request))
    }

    pub(crate) fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub(crate) fn set_task(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    /// Kill the in-flight one-shot process, if any
    pub(crate) fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.in_flight = None;
        self.queue.clear();
    }

    /// Remember a slider position. Returns the sequence the settle timer
    /// must present to send it.
    pub(crate) fn move_slider(&mut self, item_id: &str, value: f64) -> u64 {
        self.slider = Some((item_id.to_string(), value));
        self.slider_seq += 1;
        self.slider_seq
    }

    /// The slider value to send once its timer fired, if no newer move
    /// arrived meanwhile
    pub(crate) fn settle_slider(&mut self, seq: u64) -> Option<(String, f64)> {
        if seq != self.slider_seq {
            return None;
        }
        self.slider.take()
    }

    /// Arm a new poll round, invalidating older timers
    pub(crate) fn next_poll(&mut self) -> u64 {
        self.poll_seq += 1;
        self.poll_seq
    }

    pub(crate) fn is_poll_current(&self, seq: u64) -> bool {
        seq == self.poll_seq
    }

    /// Merge patches into the kept rows. Unknown ids are skipped.
    pub(crate) fn apply_patches(&mut self, patches: &[ResultPatch]) {
        for patch in patches {
            if let Some(row) = self.results.iter_mut().find(|r| r.id == patch.id) {
                row.apply_patch(patch);
            }
        }
    }
}
