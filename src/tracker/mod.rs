mod transport;

pub use transport::{
    file_token_provider, HttpTransport, TokenProvider, TransportFuture, ViewTransport,
};

use crate::config::ReporterSettings;
use crate::errors::{AppError, AppResult};
use crate::models::{FlushReport, ViewBatch, ViewItem};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct PendingQueue {
    items: Vec<ViewItem>,
    keys: HashSet<String>,
    timer: Option<ArmedTimer>,
    next_epoch: u64,
}

struct ArmedTimer {
    epoch: u64,
    handle: JoinHandle<()>,
}

/// Process-wide batching reporter for view events.
///
/// The first enqueue after a flush arms a single timer; later enqueues ride along without
/// extending it. A flush drains the queue before the request goes out, so failed requests
/// are dropped rather than retried.
#[derive(Clone)]
pub struct ViewReporter {
    queue: Arc<Mutex<PendingQueue>>,
    transport: Arc<dyn ViewTransport>,
    interval: Duration,
    runtime: Handle,
}

impl ViewReporter {
    pub fn new(transport: Arc<dyn ViewTransport>, settings: &ReporterSettings) -> AppResult<Self> {
        let runtime = Handle::try_current().map_err(|error| AppError::Runtime(error.to_string()))?;
        Ok(Self {
            queue: Arc::new(Mutex::new(PendingQueue::default())),
            transport,
            interval: settings.interval(),
            runtime,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns false when an identical `type:id:path` is already waiting for the next flush.
    pub fn enqueue(&self, item: ViewItem) -> bool {
        let mut queue = self.lock_queue();
        if !queue.keys.insert(item.key()) {
            return false;
        }
        tracing::debug!(key = %item.key(), "view queued");
        queue.items.push(item);

        if queue.timer.is_none() {
            let epoch = queue.next_epoch;
            queue.next_epoch += 1;
            let reporter = self.clone();
            let interval = self.interval;
            let handle = self.runtime.spawn(async move {
                tokio::time::sleep(interval).await;
                reporter.flush_scheduled(epoch).await;
            });
            queue.timer = Some(ArmedTimer { epoch, handle });
        }
        true
    }

    pub async fn flush_now(&self) -> FlushReport {
        let items = {
            let mut queue = self.lock_queue();
            if let Some(timer) = queue.timer.take() {
                timer.handle.abort();
            }
            Self::drain(&mut queue)
        };
        self.deliver(items).await
    }

    /// Drops everything pending without reporting it.
    pub fn reset(&self) {
        let mut queue = self.lock_queue();
        if let Some(timer) = queue.timer.take() {
            timer.handle.abort();
        }
        let dropped = Self::drain(&mut queue).len();
        if dropped > 0 {
            tracing::debug!(dropped, "pending views discarded");
        }
    }

    pub fn pending(&self) -> Vec<ViewItem> {
        self.lock_queue().items.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock_queue().items.len()
    }

    pub fn is_idle(&self) -> bool {
        let queue = self.lock_queue();
        queue.items.is_empty() && queue.timer.is_none()
    }

    async fn flush_scheduled(&self, epoch: u64) {
        let items = {
            let mut queue = self.lock_queue();
            // A stale timer lost the race to flush_now or reset.
            if queue.timer.as_ref().map(|timer| timer.epoch) != Some(epoch) {
                return;
            }
            queue.timer = None;
            Self::drain(&mut queue)
        };
        self.deliver(items).await;
    }

    async fn deliver(&self, items: Vec<ViewItem>) -> FlushReport {
        let count = items.len();
        if count == 0 {
            return FlushReport {
                items: 0,
                delivered: false,
                flushed_at: Utc::now(),
            };
        }

        let batch = ViewBatch { items };
        let delivered = match self.transport.send(&batch).await {
            Ok(()) => {
                tracing::debug!(items = count, "view batch reported");
                true
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    items = count,
                    "view batch report failed; dropping batch"
                );
                false
            }
        };
        FlushReport {
            items: count,
            delivered,
            flushed_at: Utc::now(),
        }
    }

    fn drain(queue: &mut PendingQueue) -> Vec<ViewItem> {
        queue.keys.clear();
        std::mem::take(&mut queue.items)
    }

    fn lock_queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One consumer's view of a resource. Reports at most once per binding, however often
/// `track` is called; dropping it leaves already queued views in place.
pub struct ViewTracker {
    instance: Uuid,
    reporter: ViewReporter,
    path: String,
    binding: Option<(String, i64)>,
    auto: bool,
    reported: bool,
}

impl ViewTracker {
    pub fn new(reporter: ViewReporter, path: impl Into<String>) -> Self {
        Self {
            instance: Uuid::new_v4(),
            reporter,
            path: path.into(),
            binding: None,
            auto: false,
            reported: false,
        }
    }

    /// Tracks the bound resource immediately, as on mount.
    pub fn auto(
        reporter: ViewReporter,
        kind: impl Into<String>,
        id: i64,
        path: impl Into<String>,
    ) -> Self {
        let mut tracker = Self::new(reporter, path);
        tracker.auto = true;
        tracker.track(kind, id);
        tracker
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn has_reported(&self) -> bool {
        self.reported
    }

    /// Returns true only for the call that actually reported.
    pub fn track(&mut self, kind: impl Into<String>, id: i64) -> bool {
        if self.reported {
            return false;
        }
        let kind = kind.into();
        self.reported = true;
        self.binding = Some((kind.clone(), id));
        let item = ViewItem::new(kind, id, self.path.clone());
        let queued = self.reporter.enqueue(item);
        tracing::debug!(instance = %self.instance, queued, "view tracked");
        true
    }

    /// Moves the tracker to another resource or route. A changed binding may report again.
    pub fn rebind(&mut self, kind: impl Into<String>, id: i64, path: impl Into<String>) {
        let kind = kind.into();
        let path = path.into();
        let same_resource = self
            .binding
            .as_ref()
            .is_some_and(|(bound_kind, bound_id)| *bound_kind == kind && *bound_id == id);
        let unchanged = self.path == path && same_resource;
        if unchanged {
            return;
        }
        self.path = path;
        self.binding = Some((kind.clone(), id));
        self.reported = false;
        if self.auto {
            self.track(kind, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TransportFuture, ViewReporter, ViewTracker, ViewTransport};
    use crate::config::ReporterSettings;
    use crate::errors::AppError;
    use crate::models::{ViewBatch, ViewItem};
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;
    use tokio::time::{sleep, Duration};

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<ViewBatch>>,
        fail: bool,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn gated(gate: oneshot::Receiver<()>) -> Self {
            Self {
                gate: Mutex::new(Some(gate)),
                ..Self::default()
            }
        }

        fn batches(&self) -> Vec<ViewBatch> {
            self.batches.lock().expect("batches lock").clone()
        }
    }

    impl ViewTransport for RecordingTransport {
        fn send<'a>(&'a self, batch: &'a ViewBatch) -> TransportFuture<'a> {
            Box::pin(async move {
                self.batches.lock().expect("batches lock").push(batch.clone());
                let gate = self.gate.lock().expect("gate lock").take();
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                if self.fail {
                    return Err(AppError::Transport("connection refused".to_string()));
                }
                Ok(())
            })
        }
    }

    fn reporter_with(transport: Arc<RecordingTransport>) -> ViewReporter {
        ViewReporter::new(transport, &ReporterSettings::default()).expect("reporter")
    }

    #[test]
    fn requires_a_runtime() {
        let transport = Arc::new(RecordingTransport::default());
        let result = ViewReporter::new(transport, &ReporterSettings::default());
        assert!(matches!(result, Err(AppError::Runtime(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_events_into_one_flush_after_interval() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        assert!(reporter.is_idle());

        reporter.enqueue(ViewItem::new("blog", 5, "/blog/5"));
        sleep(Duration::from_millis(500)).await;
        reporter.enqueue(ViewItem::new("moment", 2, "/moments/2"));

        sleep(Duration::from_millis(2400)).await;
        assert!(transport.batches().is_empty());
        assert_eq!(reporter.pending_len(), 2);

        sleep(Duration::from_millis(200)).await;
        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].items,
            vec![ViewItem::new("blog", 5, "/blog/5"), ViewItem::new("moment", 2, "/moments/2")]
        );
        assert!(reporter.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn identical_keys_are_queued_once() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        assert!(reporter.enqueue(ViewItem::new("work", 1, "/works/1")));
        assert!(!reporter.enqueue(ViewItem::new("work", 1, "/works/1")));
        assert!(reporter.enqueue(ViewItem::new("work", 1, "/works")));
        assert_eq!(reporter.pending_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn later_enqueues_do_not_extend_the_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        reporter.enqueue(ViewItem::new("page", 0, "/"));
        sleep(Duration::from_millis(2900)).await;
        reporter.enqueue(ViewItem::new("page", 0, "/about"));
        sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.batches().len(), 1);
        assert_eq!(transport.batches()[0].items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_drains_queue_without_retry() {
        let transport = Arc::new(RecordingTransport::failing());
        let reporter = reporter_with(transport.clone());
        reporter.enqueue(ViewItem::new("blog", 9, "/blog/9"));

        sleep(Duration::from_millis(3100)).await;
        assert_eq!(transport.batches().len(), 1);
        assert_eq!(reporter.pending_len(), 0);
        assert!(reporter.is_idle());

        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(transport.batches().len(), 1);

        let report = reporter.flush_now().await;
        assert_eq!(report.items, 0);
        assert_eq!(transport.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_during_in_flight_request_starts_new_cycle() {
        let (release, gate) = oneshot::channel();
        let transport = Arc::new(RecordingTransport::gated(gate));
        let reporter = reporter_with(transport.clone());
        reporter.enqueue(ViewItem::new("blog", 1, "/blog/1"));

        sleep(Duration::from_millis(3100)).await;
        assert_eq!(transport.batches().len(), 1);
        assert_eq!(reporter.pending_len(), 0);

        assert!(reporter.enqueue(ViewItem::new("blog", 1, "/blog/1")));
        assert!(!reporter.is_idle());
        let _ = release.send(());

        sleep(Duration::from_millis(3100)).await;
        let batches = transport.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].items, vec![ViewItem::new("blog", 1, "/blog/1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_reports_and_disarms_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        reporter.enqueue(ViewItem::new("blog", 1, "/blog/1"));
        reporter.enqueue(ViewItem::new("blog", 2, "/blog/2"));

        let report = reporter.flush_now().await;
        assert_eq!(report.items, 2);
        assert!(report.delivered);
        assert!(reporter.is_idle());

        sleep(Duration::from_millis(5000)).await;
        assert_eq!(transport.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_without_network() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        reporter.enqueue(ViewItem::new("moment", 3, "/moments/3"));
        reporter.reset();
        assert!(reporter.is_idle());
        sleep(Duration::from_millis(5000)).await;
        assert!(transport.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_reports_once_per_instance() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        let mut tracker = ViewTracker::new(reporter.clone(), "/blog/5");

        assert!(tracker.track("blog", 5));
        assert!(!tracker.track("blog", 5));
        assert!(!tracker.track("blog", 6));
        assert!(tracker.has_reported());
        assert_eq!(reporter.pending(), vec![ViewItem::new("blog", 5, "/blog/5")]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_trackers_share_one_queue_entry() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        let first = ViewTracker::auto(reporter.clone(), "moment", 2, "/moments/2");
        let second = ViewTracker::auto(reporter.clone(), "moment", 2, "/moments/2");

        assert!(first.has_reported() && second.has_reported());
        assert_ne!(first.instance_id(), second.instance_id());
        assert_eq!(reporter.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_tracker_keeps_its_queued_view() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        drop(ViewTracker::auto(reporter.clone(), "work", 4, "/works/4"));

        sleep(Duration::from_millis(3100)).await;
        assert_eq!(transport.batches()[0].items, vec![ViewItem::new("work", 4, "/works/4")]);
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_auto_tracker_reports_new_resource_once() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = reporter_with(transport.clone());
        let mut tracker = ViewTracker::auto(reporter.clone(), "blog", 1, "/blog/1");
        tracker.rebind("blog", 1, "/blog/1");
        assert_eq!(reporter.pending_len(), 1);

        tracker.rebind("blog", 2, "/blog/2");
        tracker.rebind("blog", 2, "/blog/2");
        assert_eq!(tracker.path(), "/blog/2");
        assert_eq!(
            reporter.pending(),
            vec![ViewItem::new("blog", 1, "/blog/1"), ViewItem::new("blog", 2, "/blog/2")]
        );
    }
}
