//! Shared key-value telemetry table and the edge-triggered estimate publisher.
//!
//! The table is the only state shared between the pipeline loop and the
//! remote side. The pipeline stores each new [`Estimate`] in the publisher;
//! a listener thread watches the table's `request` key and, on a
//! false-to-true transition, writes the held estimate out and clears the
//! request in one batch.

use crate::config::TelemetryConfig;
use crate::geometry::Estimate;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const LISTENER_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableValue {
    Boolean(bool),
    Number(f64),
}

/// Who wrote a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableEvent {
    pub key: String,
    pub value: TableValue,
    pub origin: Origin,
}

pub type EventFilter = Box<dyn Fn(&TableEvent) -> bool + Send + Sync>;

/// Key-value store shared with the remote control system.
pub trait TelemetryStore: Send + Sync {
    /// Writes every entry under one lock; readers see all of them or none.
    fn put_batch(&self, entries: &[(&str, TableValue)], origin: Origin);

    fn get(&self, key: &str) -> Option<TableValue>;

    /// Consistent copy of every entry.
    fn entries(&self) -> Vec<(String, TableValue)>;

    /// Registers a change subscription. Every write that passes `filter` is
    /// sent to the returned receiver; dropping the receiver unsubscribes.
    /// With `immediate`, current entries that pass the filter are delivered
    /// first, atomically with registering.
    fn subscribe(&self, filter: EventFilter, immediate: bool) -> Receiver<TableEvent>;

    fn put_number(&self, key: &str, value: f64) {
        self.put_batch(&[(key, TableValue::Number(value))], Origin::Local);
    }

    fn put_boolean(&self, key: &str, value: bool) {
        self.put_batch(&[(key, TableValue::Boolean(value))], Origin::Local);
    }

    fn get_boolean(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            TableValue::Boolean(value) => Some(value),
            TableValue::Number(_) => None,
        }
    }

    fn get_number(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            TableValue::Number(value) => Some(value),
            TableValue::Boolean(_) => None,
        }
    }
}

struct Subscriber {
    filter: EventFilter,
    sender: Sender<TableEvent>,
}

/// In-process table. Notifications go out while the entry lock is held, so
/// every subscriber sees writes in the order they were applied.
#[derive(Default)]
pub struct LocalTable {
    entries: RwLock<HashMap<String, TableValue>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LocalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for LocalTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTable")
            .field("entries", &*self.entries.read())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl TelemetryStore for LocalTable {
    fn put_batch(&self, batch: &[(&str, TableValue)], origin: Origin) {
        let mut entries = self.entries.write();
        for (key, value) in batch {
            entries.insert(key.to_string(), *value);
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| {
            batch.iter().all(|(key, value)| {
                let event = TableEvent {
                    key: key.to_string(),
                    value: *value,
                    origin,
                };
                !(subscriber.filter)(&event) || subscriber.sender.send(event).is_ok()
            })
        });
    }

    fn get(&self, key: &str) -> Option<TableValue> {
        self.entries.read().get(key).copied()
    }

    fn entries(&self) -> Vec<(String, TableValue)> {
        self.entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }

    fn subscribe(&self, filter: EventFilter, immediate: bool) -> Receiver<TableEvent> {
        let (sender, receiver) = unbounded();
        let entries = self.entries.read();
        if immediate {
            for (key, value) in entries.iter() {
                let event = TableEvent {
                    key: key.clone(),
                    value: *value,
                    origin: Origin::Local,
                };
                if filter(&event) {
                    let _ = sender.send(event);
                }
            }
        }
        self.subscribers.lock().push(Subscriber { filter, sender });
        receiver
    }
}

/// Table keys the publisher reads and writes.
#[derive(Debug, Clone)]
pub struct TelemetryKeys {
    pub angle: String,
    pub distance: String,
    pub request: String,
}

impl Default for TelemetryKeys {
    fn default() -> Self {
        Self::from_config(&TelemetryConfig::default())
    }
}

impl TelemetryKeys {
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            angle: config.angle_key.clone(),
            distance: config.distance_key.clone(),
            request: config.request_key.clone(),
        }
    }
}

/// Holds the latest estimate and answers remote requests for it.
pub struct TelemetryPublisher {
    store: Arc<dyn TelemetryStore>,
    keys: TelemetryKeys,
    latest: Mutex<Estimate>,
    /// Last `request` value observed, guarding the rising edge
    request_seen: Mutex<bool>,
    publishes: AtomicU64,
}

impl TelemetryPublisher {
    pub fn new(store: Arc<dyn TelemetryStore>, keys: TelemetryKeys) -> Self {
        Self {
            store,
            keys,
            latest: Mutex::new(Estimate::default()),
            request_seen: Mutex::new(false),
            publishes: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.store
    }

    pub fn keys(&self) -> &TelemetryKeys {
        &self.keys
    }

    /// Replaces the held estimate as a whole.
    pub fn update(&self, estimate: Estimate) {
        *self.latest.lock() = estimate;
    }

    pub fn latest(&self) -> Estimate {
        *self.latest.lock()
    }

    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::Acquire)
    }

    /// Feeds one table event through the edge detector. Returns whether it
    /// caused a publish.
    pub fn handle_event(&self, event: &TableEvent) -> bool {
        if event.key != self.keys.request {
            return false;
        }
        match event.value {
            TableValue::Boolean(requested) => self.observe_request(requested),
            TableValue::Number(value) => {
                warn!("Ignoring non-boolean {} value {}", self.keys.request, value);
                false
            }
        }
    }

    /// Publishes on a false-to-true transition of the request flag. After a
    /// publish the detector stays latched until a `false` is observed; the
    /// acknowledgement written here comes back through the listener's
    /// subscription and serves as that `false`.
    pub fn observe_request(&self, requested: bool) -> bool {
        let mut seen = self.request_seen.lock();
        if !requested || *seen {
            *seen = requested;
            return false;
        }

        let estimate = self.latest();
        self.store.put_batch(
            &[
                (self.keys.angle.as_str(), TableValue::Number(estimate.angle_degrees)),
                (self.keys.distance.as_str(), TableValue::Number(estimate.range_mm)),
                (self.keys.request.as_str(), TableValue::Boolean(false)),
            ],
            Origin::Local,
        );
        *seen = true;

        let count = self.publishes.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "Published estimate #{}: {:.2} deg, {:.0} mm (valid: {})",
            count, estimate.angle_degrees, estimate.range_mm, estimate.valid
        );
        true
    }

    /// Starts a thread that answers requests until the returned listener is stopped.
    pub fn spawn_listener(self: &Arc<Self>) -> std::io::Result<RequestListener> {
        let request_key = self.keys.request.clone();
        let events = self
            .store
            .subscribe(Box::new(move |event: &TableEvent| event.key == request_key), true);
        let exit = Arc::new(AtomicBool::new(false));

        let publisher = Arc::clone(self);
        let thread_exit = Arc::clone(&exit);
        let handle = std::thread::Builder::new()
            .name("telemetry-request".to_string())
            .spawn(move || {
                debug!("Request listener started");
                while !thread_exit.load(Ordering::Acquire) {
                    match events.recv_timeout(LISTENER_POLL) {
                        Ok(event) => {
                            publisher.handle_event(&event);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Request listener exit");
            })?;

        info!("Listening for telemetry requests on '{}'", self.keys.request);
        Ok(RequestListener {
            exit,
            handle: Some(handle),
        })
    }
}

/// Handle to the request listener thread; stopping or dropping it joins the thread.
pub struct RequestListener {
    exit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RequestListener {
    pub fn stop(&mut self) {
        self.exit.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Request listener thread panicked");
            }
        }
    }
}

impl Drop for RequestListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Instant, SystemTime};

    fn publisher() -> (Arc<LocalTable>, Arc<TelemetryPublisher>) {
        let table = Arc::new(LocalTable::new());
        let publisher = Arc::new(TelemetryPublisher::new(table.clone(), TelemetryKeys::default()));
        (table, publisher)
    }

    fn remote_request(table: &LocalTable, value: bool) {
        table.put_batch(&[("request", TableValue::Boolean(value))], Origin::Remote);
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_table_put_get() {
        let table = LocalTable::new();
        table.put_number("targetAngle", 4.5);
        table.put_boolean("request", true);

        assert_eq!(table.get_number("targetAngle"), Some(4.5));
        assert_eq!(table.get_boolean("request"), Some(true));
        assert_eq!(table.get_boolean("targetAngle"), None);
        assert_eq!(table.get("missing"), None);
        assert_eq!(table.entries().len(), 2);
    }

    #[test]
    fn test_subscription_filter_and_unsubscribe() {
        let table = LocalTable::new();
        let requests = table.subscribe(Box::new(|e: &TableEvent| e.key == "request"), false);
        let remote = table.subscribe(Box::new(|e: &TableEvent| e.origin == Origin::Remote), false);
        assert_eq!(table.subscriber_count(), 2);

        table.put_number("targetAngle", 1.0);
        remote_request(&table, true);

        let events: Vec<_> = requests.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, TableValue::Boolean(true));
        assert_eq!(events[0].origin, Origin::Remote);
        assert_eq!(remote.try_iter().count(), 1);

        drop(remote);
        remote_request(&table, false);
        assert_eq!(table.subscriber_count(), 1);
    }

    #[test]
    fn test_immediate_replays_current_values() {
        let table = LocalTable::new();
        table.put_boolean("request", true);
        table.put_number("targetAngle", 2.0);

        let events = table.subscribe(Box::new(|e: &TableEvent| e.key == "request"), true);
        let replayed: Vec<_> = events.try_iter().collect();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].value, TableValue::Boolean(true));
    }

    #[test]
    fn test_rising_edge_publishes_once() {
        let (table, publisher) = publisher();
        publisher.update(Estimate::new(-3.25, 1850.0, SystemTime::now()));

        let event = TableEvent {
            key: "request".to_string(),
            value: TableValue::Boolean(true),
            origin: Origin::Remote,
        };
        remote_request(&table, true);
        assert!(publisher.handle_event(&event));

        assert_eq!(table.get_number("targetAngle"), Some(-3.25));
        assert_eq!(table.get_number("targetDistance"), Some(1850.0));
        assert_eq!(table.get_boolean("request"), Some(false));
        assert_eq!(publisher.publish_count(), 1);

        // Another true before any false is the same request
        assert!(!publisher.observe_request(true));
        assert!(!publisher.handle_event(&event));
        assert_eq!(publisher.publish_count(), 1);

        // Our own acknowledgement and any repeated false do nothing
        assert!(!publisher.observe_request(false));
        assert!(!publisher.observe_request(false));
        assert_eq!(publisher.publish_count(), 1);

        // A fresh request after the acknowledgement is a new edge
        assert!(publisher.observe_request(true));
        assert_eq!(publisher.publish_count(), 2);
    }

    #[test]
    fn test_other_keys_ignored() {
        let (_table, publisher) = publisher();
        let event = TableEvent {
            key: "targetAngle".to_string(),
            value: TableValue::Boolean(true),
            origin: Origin::Remote,
        };
        assert!(!publisher.handle_event(&event));

        let numeric = TableEvent {
            key: "request".to_string(),
            value: TableValue::Number(1.0),
            origin: Origin::Remote,
        };
        assert!(!publisher.handle_event(&numeric));
        assert_eq!(publisher.publish_count(), 0);
    }

    #[test]
    fn test_invalid_estimate_publishes_sentinel() {
        let (table, publisher) = publisher();
        publisher.update(Estimate::invalid(SystemTime::now()));
        assert!(publisher.observe_request(true));
        assert_eq!(table.get_number("targetAngle"), Some(0.0));
        assert_eq!(table.get_number("targetDistance"), Some(-1.0));
    }

    #[test]
    fn test_listener_answers_remote_request() {
        let (table, publisher) = publisher();
        publisher.update(Estimate::new(7.0, 900.0, SystemTime::now()));
        let mut listener = publisher.spawn_listener().unwrap();

        remote_request(&table, true);
        assert!(wait_for(|| table.get_boolean("request") == Some(false)));
        assert_eq!(table.get_number("targetAngle"), Some(7.0));

        remote_request(&table, false);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(publisher.publish_count(), 1);

        remote_request(&table, true);
        assert!(wait_for(|| publisher.publish_count() == 2));
        listener.stop();
    }

    #[test]
    fn test_repeated_true_before_drain_publishes_once() {
        let (table, publisher) = publisher();
        publisher.update(Estimate::new(-1.5, 640.0, SystemTime::now()));

        // Both writes are queued before the listener exists to drain them
        remote_request(&table, true);
        remote_request(&table, true);
        let events = table.subscribe(Box::new(|e: &TableEvent| e.key == "request"), true);
        remote_request(&table, true);

        let mut published = 0;
        for event in events.try_iter() {
            if publisher.handle_event(&event) {
                published += 1;
            }
        }
        // Only the replayed true publishes; the queued true after it is not an edge
        assert_eq!(published, 1);

        drop(events);

        // Two trues in one write reach the listener back to back, ahead of
        // the acknowledgement
        let mut listener = publisher.spawn_listener().unwrap();
        remote_request(&table, false);
        table.put_batch(
            &[("request", TableValue::Boolean(true)), ("request", TableValue::Boolean(true))],
            Origin::Remote,
        );
        assert!(wait_for(|| publisher.publish_count() == 2));
        std::thread::sleep(Duration::from_millis(100));
        listener.stop();
        assert_eq!(publisher.publish_count(), 2);
        assert_eq!(table.get_number("targetAngle"), Some(-1.5));
    }

    #[test]
    fn test_pending_request_at_start_handled_once() {
        let (table, publisher) = publisher();
        remote_request(&table, true);

        let listener = publisher.spawn_listener().unwrap();
        assert!(wait_for(|| publisher.publish_count() == 1));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(publisher.publish_count(), 1);
        assert_eq!(table.get_boolean("request"), Some(false));
        drop(listener);
    }

    #[test]
    fn test_no_torn_estimates_under_concurrency() {
        let (table, publisher) = publisher();
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let publisher = Arc::clone(&publisher);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut i = 0u64;
                while !done.load(Ordering::Acquire) {
                    let angle = (i % 1000) as f64;
                    publisher.update(Estimate::new(angle, angle * 10.0 + 5.0, SystemTime::now()));
                    i += 1;
                }
            })
        };

        for _ in 0..2000 {
            let estimate = publisher.latest();
            if estimate.valid {
                assert_eq!(estimate.range_mm, estimate.angle_degrees * 10.0 + 5.0);
            }

            publisher.observe_request(false);
            assert!(publisher.observe_request(true));
            let entries: HashMap<_, _> = table.entries().into_iter().collect();
            if let (Some(TableValue::Number(angle)), Some(TableValue::Number(range))) =
                (entries.get("targetAngle"), entries.get("targetDistance"))
            {
                if *range >= 0.0 {
                    assert_eq!(*range, *angle * 10.0 + 5.0);
                }
            }
        }

        done.store(true, Ordering::Release);
        writer.join().unwrap();
    }
}
