//! Progress reporting.
//!
//! [`ProgressReporter`] fans lifecycle events out to registered
//! [`ProgressObserver`]s. Delivery is synchronous and in emission order, so
//! the events of one request reach every observer in the order they were
//! emitted. An observer that returns an error or panics is reported through
//! the observer-error handler and skipped; it never affects other observers
//! or the scrape itself.

use harrow_core::{EntityKind, ErrorKind, RequestId, ScrapeError, ScrapeRequest};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error returned by an observer callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ObserverError(pub String);

/// Result of an observer callback.
pub type ObserverResult = std::result::Result<(), ObserverError>;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventKind {
    /// Request accepted
    Started,
    /// Step reached
    Progress {
        /// 0-100, never decreasing within a request
        percent: u8,
        /// Human-readable step description
        message: String,
    },
    /// Request produced its result
    Completed,
    /// Request failed
    Failed {
        /// Classified kind
        error: ErrorKind,
        /// Display form of the error
        cause: String,
    },
}

/// One lifecycle event of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Request the event belongs to
    pub request_id: RequestId,
    /// Position in the request's event sequence, starting at 0
    pub seq: u64,
    /// Record type being scraped
    pub entity: EntityKind,
    /// Requested target
    pub target: String,
    /// Payload
    pub kind: ProgressEventKind,
}

/// Receiver of progress events.
///
/// Override [`on_event`](Self::on_event) to see raw events, or the four
/// lifecycle callbacks it dispatches to. All default to doing nothing.
pub trait ProgressObserver: Send + Sync {
    /// A request started
    fn on_start(&self, _request: RequestId, _entity: EntityKind, _target: &str) -> ObserverResult {
        Ok(())
    }

    /// A request advanced
    fn on_progress(&self, _request: RequestId, _message: &str, _percent: u8) -> ObserverResult {
        Ok(())
    }

    /// A request completed
    fn on_complete(&self, _request: RequestId, _entity: EntityKind, _target: &str) -> ObserverResult {
        Ok(())
    }

    /// A request failed
    fn on_error(&self, _request: RequestId, _error: ErrorKind, _cause: &str) -> ObserverResult {
        Ok(())
    }

    /// Entry point used by the reporter
    fn on_event(&self, event: &ProgressEvent) -> ObserverResult {
        match &event.kind {
            ProgressEventKind::Started => self.on_start(event.request_id, event.entity, &event.target),
            ProgressEventKind::Progress { percent, message } => {
                self.on_progress(event.request_id, message, *percent)
            }
            ProgressEventKind::Completed => {
                self.on_complete(event.request_id, event.entity, &event.target)
            }
            ProgressEventKind::Failed { error, cause } => {
                self.on_error(event.request_id, *error, cause)
            }
        }
    }
}

/// Handle returned by [`ProgressReporter::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// How an observer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverFailure {
    /// The callback returned an error
    #[error("observer returned error: {0}")]
    Returned(ObserverError),
    /// The callback panicked
    #[error("observer panicked: {0}")]
    Panicked(String),
}

type ObserverErrorHandler = Box<dyn Fn(ObserverId, &ProgressEvent, &ObserverFailure) + Send + Sync>;
type ObserverList = Vec<(ObserverId, Arc<dyn ProgressObserver>)>;

/// Fan-out broadcaster for progress events.
pub struct ProgressReporter {
    observers: Mutex<ObserverList>,
    next_id: AtomicU64,
    on_observer_error: Option<ObserverErrorHandler>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    /// Reporter with no observers. Observer failures are logged.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            on_observer_error: None,
        }
    }

    /// Route observer failures to `handler` instead of the log.
    #[must_use]
    pub fn on_observer_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(ObserverId, &ProgressEvent, &ObserverFailure) + Send + Sync + 'static,
    {
        self.on_observer_error = Some(Box::new(handler));
        self
    }

    /// Add an observer.
    pub fn register(&self, observer: Arc<dyn ProgressObserver>) -> ObserverId {
        let id = self.next_id();
        self.lock().push((id, observer));
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `event` to every observer registered at the time of the call.
    pub fn emit(&self, event: &ProgressEvent) {
        self.deliver(event, &[]);
    }

    /// Start emitting events for `request`.
    #[must_use]
    pub fn scope(&self, request: &ScrapeRequest) -> ProgressScope<'_> {
        self.scope_with(request, &[])
    }

    /// Like [`scope`](Self::scope), but `observers` also receive this
    /// request's events (and no other request's), after the registered ones.
    #[must_use]
    pub fn scope_with(
        &self,
        request: &ScrapeRequest,
        observers: &[Arc<dyn ProgressObserver>],
    ) -> ProgressScope<'_> {
        ProgressScope {
            reporter: self,
            request_id: request.id(),
            entity: request.kind(),
            target: request.target().to_string(),
            local: observers
                .iter()
                .map(|observer| (self.next_id(), Arc::clone(observer)))
                .collect(),
            seq: AtomicU64::new(0),
            last_percent: Mutex::new(0),
        }
    }

    fn deliver(&self, event: &ProgressEvent, local: &[(ObserverId, Arc<dyn ProgressObserver>)]) {
        // Snapshot so observers may (un)register from inside a callback
        let registered: ObserverList = self.lock().clone();

        for (id, observer) in registered.iter().chain(local) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => ObserverFailure::Returned(e),
                Err(payload) => ObserverFailure::Panicked(panic_message(payload.as_ref())),
            };
            self.report_failure(*id, event, &failure);
        }
    }

    fn next_id(&self) -> ObserverId {
        ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn report_failure(&self, id: ObserverId, event: &ProgressEvent, failure: &ObserverFailure) {
        match &self.on_observer_error {
            Some(handler) => {
                // A panicking handler is contained as well
                if panic::catch_unwind(AssertUnwindSafe(|| handler(id, event, failure))).is_err() {
                    tracing::error!("Observer error handler panicked");
                }
            }
            None => tracing::warn!(
                observer = id.0,
                request = %event.request_id,
                "Progress observer failed: {}",
                failure
            ),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ObserverList> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Event emitter bound to one request.
///
/// Numbers events and keeps reported percentages non-decreasing.
pub struct ProgressScope<'a> {
    reporter: &'a ProgressReporter,
    request_id: RequestId,
    entity: EntityKind,
    target: String,
    local: ObserverList,
    seq: AtomicU64,
    last_percent: Mutex<u8>,
}

impl ProgressScope<'_> {
    /// Request this scope emits for.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Last reported percentage.
    #[must_use]
    pub fn percent(&self) -> u8 {
        *self.last_percent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit `Started`.
    pub fn started(&self) {
        self.emit(ProgressEventKind::Started);
    }

    /// Emit `Progress`, clamped to `[last reported, 100]`.
    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        let percent = {
            let mut last = self.last_percent.lock().unwrap_or_else(PoisonError::into_inner);
            *last = percent.min(100).max(*last);
            *last
        };
        self.emit(ProgressEventKind::Progress {
            percent,
            message: message.into(),
        });
    }

    /// Emit a final 100% step and `Completed`.
    pub fn completed(&self, message: impl Into<String>) {
        self.progress(100, message);
        self.emit(ProgressEventKind::Completed);
    }

    /// Emit `Failed`.
    pub fn failed(&self, error: &ScrapeError) {
        self.emit(ProgressEventKind::Failed {
            error: error.kind(),
            cause: error.to_string(),
        });
    }

    fn emit(&self, kind: ProgressEventKind) {
        let event = ProgressEvent {
            request_id: self.request_id,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            entity: self.entity,
            target: self.target.clone(),
            kind,
        };
        self.reporter.deliver(&event, &self.local);
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_start(&self, request: RequestId, entity: EntityKind, target: &str) -> ObserverResult {
        tracing::info!(%request, %entity, "Scrape started: {}", target);
        Ok(())
    }

    fn on_progress(&self, request: RequestId, message: &str, percent: u8) -> ObserverResult {
        tracing::debug!(%request, percent, "{}", message);
        Ok(())
    }

    fn on_complete(&self, request: RequestId, entity: EntityKind, target: &str) -> ObserverResult {
        tracing::info!(%request, %entity, "Scrape completed: {}", target);
        Ok(())
    }

    fn on_error(&self, request: RequestId, error: ErrorKind, cause: &str) -> ObserverResult {
        tracing::error!(%request, %error, "Scrape failed: {}", cause);
        Ok(())
    }
}

/// Sends every event into a Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    /// Observer plus the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) -> ObserverResult {
        self.sender
            .send(event.clone())
            .map_err(|_| ObserverError("progress receiver dropped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::ScrapeTarget;

    #[derive(Default)]
    struct Recorder {
        percents: Mutex<Vec<u8>>,
        kinds: Mutex<Vec<String>>,
    }

    impl ProgressObserver for Recorder {
        fn on_event(&self, event: &ProgressEvent) -> ObserverResult {
            if let ProgressEventKind::Progress { percent, .. } = &event.kind {
                self.percents.lock().unwrap().push(*percent);
            }
            let tag = match &event.kind {
                ProgressEventKind::Started => "started",
                ProgressEventKind::Progress { .. } => "progress",
                ProgressEventKind::Completed => "completed",
                ProgressEventKind::Failed { .. } => "failed",
            };
            self.kinds.lock().unwrap().push(tag.to_string());
            Ok(())
        }
    }

    struct Failing;

    impl ProgressObserver for Failing {
        fn on_progress(&self, _: RequestId, _: &str, _: u8) -> ObserverResult {
            Err(ObserverError("disk full".to_string()))
        }
    }

    struct Panicking;

    impl ProgressObserver for Panicking {
        fn on_start(&self, _: RequestId, _: EntityKind, _: &str) -> ObserverResult {
            panic!("observer bug");
        }
    }

    fn request() -> ScrapeRequest {
        ScrapeRequest::single(
            EntityKind::Company,
            ScrapeTarget::parse("https://www.linkedin.com/company/acme/"),
        )
    }

    #[test]
    fn test_percent_is_clamped_monotonic() {
        let reporter = ProgressReporter::new();
        let recorder = Arc::new(Recorder::default());
        reporter.register(recorder.clone());

        let request = request();
        let scope = reporter.scope(&request);
        scope.started();
        scope.progress(30, "a");
        scope.progress(20, "b");
        scope.progress(250, "c");
        scope.completed("done");

        assert_eq!(*recorder.percents.lock().unwrap(), vec![30, 30, 100, 100]);
        assert_eq!(
            *recorder.kinds.lock().unwrap(),
            vec!["started", "progress", "progress", "progress", "progress", "completed"]
        );
    }

    #[test]
    fn test_failing_observers_are_isolated() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let reporter = ProgressReporter::new().on_observer_error(move |_, _, failure| {
            sink.lock().unwrap().push(failure.clone());
        });

        reporter.register(Arc::new(Panicking));
        reporter.register(Arc::new(Failing));
        let recorder = Arc::new(Recorder::default());
        reporter.register(recorder.clone());

        let request = request();
        let scope = reporter.scope(&request);
        scope.started();
        scope.progress(50, "half");

        // The healthy observer saw everything, in order
        assert_eq!(*recorder.kinds.lock().unwrap(), vec!["started", "progress"]);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], ObserverFailure::Panicked("observer bug".to_string()));
        assert_eq!(
            failures[1],
            ObserverFailure::Returned(ObserverError("disk full".to_string()))
        );
    }

    #[test]
    fn test_scope_observers_only_see_their_request() {
        let reporter = ProgressReporter::new();
        let shared = Arc::new(Recorder::default());
        reporter.register(shared.clone());
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        let (a, b) = (request(), request());
        let scope_a = reporter.scope_with(&a, &[first.clone() as Arc<dyn ProgressObserver>]);
        let scope_b = reporter.scope_with(&b, &[second.clone() as Arc<dyn ProgressObserver>]);
        scope_a.started();
        scope_b.started();
        scope_b.progress(40, "b");
        scope_a.completed("a");

        assert_eq!(*first.kinds.lock().unwrap(), vec!["started", "progress", "completed"]);
        assert_eq!(*second.kinds.lock().unwrap(), vec!["started", "progress"]);
        assert_eq!(shared.kinds.lock().unwrap().len(), 5);
        assert_eq!(reporter.observer_count(), 1);
    }

    #[test]
    fn test_unregister() {
        let reporter = ProgressReporter::new();
        let recorder = Arc::new(Recorder::default());
        let id = reporter.register(recorder.clone());
        assert_eq!(reporter.observer_count(), 1);

        assert!(reporter.unregister(id));
        assert!(!reporter.unregister(id));

        let request = request();
        reporter.scope(&request).started();
        assert!(recorder.kinds.lock().unwrap().is_empty());
    }

    #[test]
    fn test_channel_observer_sequence_numbers() {
        let reporter = ProgressReporter::new();
        let (observer, mut rx) = ChannelObserver::new();
        reporter.register(Arc::new(observer));

        let request = request();
        let scope = reporter.scope(&request);
        scope.started();
        scope.failed(&ScrapeError::Unknown {
            cause: "boom".to_string(),
        });

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.seq, second.seq), (0, 1));
        assert_eq!(first.request_id, request.id());
        assert!(matches!(
            second.kind,
            ProgressEventKind::Failed {
                error: ErrorKind::Unknown,
                ..
            }
        ));
    }
}
