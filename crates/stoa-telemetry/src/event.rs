//! Per-request structured events.
//!
//! An [`Event`] is the single structured record of one request: opened when
//! the request enters the interceptor chain, enriched while it runs, and
//! closed exactly once when it completes - normally, with an error, or after
//! panic recovery. Closing emits one structured log line through `tracing`.
//!
//! Interceptors are optional, so code that reads the event from a request
//! context may receive a no-op instance; it accepts counters and errors like
//! any other event but emits nothing on close.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stoa_core::EntryInfo;

/// An event shared between interceptors within one request.
///
/// The recovery interceptor must be able to record into the event after the
/// event interceptor's own stack frame has unwound, hence the shared handle.
pub type SharedEvent = Arc<RwLock<Event>>;

/// Lifecycle of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// Created but not yet opened.
    NotStarted,
    /// Opened; accepting metadata, counters, and errors.
    Open,
    /// Closed and (for non-noop events) emitted. Terminal.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    /// A real request event, emitted on close.
    Request,
    /// An inert event handed out when no event interceptor is installed.
    Noop,
}

/// A structured, request-scoped record of metadata and outcome.
#[derive(Debug)]
pub struct Event {
    kind: EventKind,
    state: EventState,
    entry: EntryInfo,
    request_id: String,
    trace_id: String,
    method: String,
    path: String,
    protocol: String,
    query: String,
    user_agent: String,
    remote_addr: String,
    res_code: Option<u16>,
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
    counters: BTreeMap<String, i64>,
    pairs: BTreeMap<String, String>,
    errors: Vec<String>,
}

impl Event {
    /// Creates a request event bound to an entry. The event starts in
    /// [`EventState::NotStarted`]; call [`Event::start`] to open it.
    #[must_use]
    pub fn request(entry: EntryInfo) -> Self {
        Self::with_kind(EventKind::Request, entry)
    }

    /// Creates an inert event that accepts writes but never emits.
    #[must_use]
    pub fn noop() -> Self {
        Self::with_kind(EventKind::Noop, EntryInfo::default())
    }

    /// Creates a shared handle around a new request event.
    #[must_use]
    pub fn request_shared(entry: EntryInfo) -> SharedEvent {
        Arc::new(RwLock::new(Self::request(entry)))
    }

    /// Creates a shared handle around a new inert event.
    #[must_use]
    pub fn noop_shared() -> SharedEvent {
        Arc::new(RwLock::new(Self::noop()))
    }

    fn with_kind(kind: EventKind, entry: EntryInfo) -> Self {
        Self {
            kind,
            state: EventState::NotStarted,
            entry,
            request_id: String::new(),
            trace_id: String::new(),
            method: String::new(),
            path: String::new(),
            protocol: String::new(),
            query: String::new(),
            user_agent: String::new(),
            remote_addr: String::new(),
            res_code: None,
            started_at: None,
            elapsed: None,
            counters: BTreeMap::new(),
            pairs: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EventState {
        self.state
    }

    /// True for the inert no-op variant.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.kind == EventKind::Noop
    }

    /// The entry this event is bound to.
    #[must_use]
    pub fn entry(&self) -> &EntryInfo {
        &self.entry
    }

    /// Opens the event and starts its clock. Only valid once; repeated or
    /// out-of-order calls are ignored.
    pub fn start(&mut self) {
        if self.state == EventState::NotStarted {
            self.state = EventState::Open;
            self.started_at = Some(Instant::now());
        }
    }

    /// Records the request id.
    pub fn set_request_id(&mut self, id: impl Into<String>) {
        self.request_id = id.into();
    }

    /// Records the trace id.
    pub fn set_trace_id(&mut self, id: impl Into<String>) {
        self.trace_id = id.into();
    }

    /// Returns the recorded request id ("" when unset).
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the recorded trace id ("" when unset).
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Records the request line metadata (method, path, protocol, query).
    pub fn set_request_line(
        &mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        protocol: impl Into<String>,
        query: impl Into<String>,
    ) {
        self.method = method.into();
        self.path = path.into();
        self.protocol = protocol.into();
        self.query = query.into();
    }

    /// Records the caller's user agent.
    pub fn set_user_agent(&mut self, ua: impl Into<String>) {
        self.user_agent = ua.into();
    }

    /// Records the caller's remote address.
    pub fn set_remote_addr(&mut self, addr: impl Into<String>) {
        self.remote_addr = addr.into();
    }

    /// Records the response code.
    pub fn set_res_code(&mut self, code: u16) {
        self.res_code = Some(code);
    }

    /// Returns the recorded response code, if any.
    #[must_use]
    pub fn res_code(&self) -> Option<u16> {
        self.res_code
    }

    /// Sets a named counter to a value.
    pub fn set_counter(&mut self, name: impl Into<String>, value: i64) {
        self.counters.insert(name.into(), value);
    }

    /// Adds to a named counter, creating it at zero if absent.
    pub fn inc_counter(&mut self, name: impl Into<String>, delta: i64) {
        *self.counters.entry(name.into()).or_insert(0) += delta;
    }

    /// Reads a named counter (0 if absent).
    #[must_use]
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Attaches an arbitrary key/value pair.
    pub fn add_pair(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.insert(key.into(), value.into());
    }

    /// Records an error against this request.
    pub fn add_error(&mut self, err: &dyn std::fmt::Display) {
        self.errors.push(err.to_string());
    }

    /// Number of errors recorded so far.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Elapsed time, either the final value (after close) or the running
    /// clock (while open).
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
            .or_else(|| self.started_at.map(|t| t.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Closes the event and emits it.
    ///
    /// Idempotent: only the `Open -> Closed` transition emits; closing a
    /// closed or never-opened event does nothing. This is what makes the
    /// close-exactly-once invariant hold on every exit path, including the
    /// panic path where both the scope guard and the recovery interceptor
    /// may reach for it.
    pub fn finish(&mut self) {
        if self.state != EventState::Open {
            return;
        }
        self.state = EventState::Closed;
        self.elapsed = self.started_at.map(|t| t.elapsed());

        if self.kind == EventKind::Noop {
            return;
        }

        let elapsed_nanos =
            u64::try_from(self.elapsed.unwrap_or(Duration::ZERO).as_nanos()).unwrap_or(u64::MAX);
        let counters = serde_json::to_string(&self.counters).unwrap_or_default();
        let pairs = serde_json::to_string(&self.pairs).unwrap_or_default();
        let errors = serde_json::to_string(&self.errors).unwrap_or_default();

        tracing::info!(
            target: "stoa::event",
            entry_name = %self.entry.name(),
            entry_kind = %self.entry.kind(),
            request_id = %self.request_id,
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            protocol = %self.protocol,
            query = %self.query,
            user_agent = %self.user_agent,
            remote_addr = %self.remote_addr,
            res_code = self.res_code.unwrap_or(0),
            elapsed_nanos,
            counters = %counters,
            pairs = %pairs,
            errors = %errors,
            "request finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_event() -> Event {
        let mut event = Event::request(EntryInfo::new("ut-entry", "http"));
        event.start();
        event
    }

    #[test]
    fn test_state_machine() {
        let mut event = Event::request(EntryInfo::default());
        assert_eq!(event.state(), EventState::NotStarted);
        event.start();
        assert_eq!(event.state(), EventState::Open);
        event.finish();
        assert_eq!(event.state(), EventState::Closed);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut event = open_event();
        event.finish();
        let elapsed = event.elapsed();
        event.finish();
        assert_eq!(event.state(), EventState::Closed);
        assert_eq!(event.elapsed(), elapsed);
    }

    #[test]
    fn test_finish_without_start_does_not_close() {
        let mut event = Event::request(EntryInfo::default());
        event.finish();
        assert_eq!(event.state(), EventState::NotStarted);
    }

    #[test]
    fn test_start_twice_keeps_first_clock() {
        let mut event = open_event();
        let first = event.started_at;
        event.start();
        assert_eq!(event.started_at, first);
    }

    #[test]
    fn test_counters() {
        let mut event = open_event();
        event.set_counter("panic", 1);
        event.inc_counter("retries", 2);
        event.inc_counter("retries", 3);
        assert_eq!(event.counter("panic"), 1);
        assert_eq!(event.counter("retries"), 5);
        assert_eq!(event.counter("absent"), 0);
    }

    #[test]
    fn test_errors_accumulate() {
        let mut event = open_event();
        assert_eq!(event.error_count(), 0);
        event.add_error(&"first failure");
        event.add_error(&"second failure");
        assert_eq!(event.error_count(), 2);
    }

    #[test]
    fn test_noop_event_accepts_writes() {
        let mut event = Event::noop();
        event.start();
        event.set_counter("timeout", 1);
        event.add_error(&"ignored");
        event.finish();
        assert!(event.is_noop());
        assert_eq!(event.state(), EventState::Closed);
        assert_eq!(event.counter("timeout"), 1);
    }

    #[test]
    fn test_elapsed_runs_while_open() {
        let event = open_event();
        std::thread::sleep(Duration::from_millis(5));
        assert!(event.elapsed() >= Duration::from_millis(5));
    }
}
