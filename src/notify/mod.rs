//! Operator notifications for committed events.
//!
//! The event store hands every committed [`EventRecord`] to a
//! [`NotificationDispatcher`], which delivers it to each configured
//! [`Notifier`] on its own thread. Delivery failures are logged and counted;
//! they never reach the camera workers and never touch persisted files.

pub mod email;
pub mod mqtt;

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::NotificationSettings;
use crate::error::SentinelError;
use crate::store::EventRecord;

pub use email::EmailNotifier;
pub use mqtt::MqttNotifier;

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Outbound alert transport.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn notify(&self, record: &EventRecord) -> Result<()>;
}

/// Prints the one-line detection summary to stdout.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn format(record: &EventRecord) -> String {
        format!(
            "DETECTION: {} - {} - {} objects found",
            record.camera,
            record.detection_type,
            record.objects.len()
        )
    }
}

impl Notifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    fn notify(&self, record: &EventRecord) -> Result<()> {
        println!("{}", Self::format(record));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct Delivery {
    notifiers: Vec<Box<dyn Notifier>>,
    counters: Counters,
}

impl Delivery {
    fn deliver(&self, record: &EventRecord) -> Vec<SentinelError> {
        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            match notifier.notify(record) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(source) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    let err = SentinelError::Notify {
                        channel: notifier.name().to_string(),
                        camera: record.camera.clone(),
                        source,
                    };
                    log::error!("{} ({} event)", err, record.detection_type);
                    failures.push(err);
                }
            }
        }
        failures
    }
}

/// Fans committed events out to notifiers on a background thread.
pub struct NotificationDispatcher {
    delivery: Arc<Delivery>,
    sender: Mutex<Option<Sender<EventRecord>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Start the delivery thread.
    pub fn spawn(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        let names: Vec<_> = notifiers.iter().map(|n| n.name()).collect();
        log::info!("notification channels: {:?}", names);

        let delivery = Arc::new(Delivery {
            notifiers,
            counters: Counters::default(),
        });
        let (sender, receiver) = mpsc::channel::<EventRecord>();
        let worker = Arc::clone(&delivery);
        let handle = thread::Builder::new()
            .name("notify".to_string())
            .spawn(move || {
                for record in receiver {
                    worker.deliver(&record);
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("failed to start notification thread: {}", err);
                None
            }
        };
        Self {
            delivery,
            sender: Mutex::new(handle.as_ref().map(|_| sender)),
            handle: Mutex::new(handle),
        }
    }

    /// Queue `record` for delivery. Never blocks on a notifier.
    pub fn dispatch(&self, record: EventRecord) {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(record).is_err() {
                    log::warn!("notification thread has exited; event not delivered");
                }
            }
            None => log::warn!(
                "notifications are shut down; dropping {} event for {}",
                record.detection_type,
                record.camera
            ),
        }
    }

    /// Deliver `record` on the calling thread. Returns the failures.
    pub fn deliver(&self, record: &EventRecord) -> Vec<SentinelError> {
        self.delivery.deliver(record)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivery.counters.delivered.load(Ordering::Relaxed),
            failed: self.delivery.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn notifier_names(&self) -> Vec<&'static str> {
        self.delivery.notifiers.iter().map(|n| n.name()).collect()
    }

    /// Stop accepting events, drain the queue, and wait up to `timeout`.
    ///
    /// Returns false when the delivery thread was still busy at the deadline;
    /// it is then left to finish on its own.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("notification queue not drained within {:?}", timeout);
                return false;
            }
            thread::sleep(SHUTDOWN_POLL);
        }
        if handle.join().is_err() {
            log::error!("notification thread panicked");
        }
        true
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the thread exit after the queue drains.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

/// Build the notifiers enabled in `settings`.
///
/// A notifier that cannot be set up is logged and left out.
pub fn build_notifiers(settings: &NotificationSettings) -> Vec<Box<dyn Notifier>> {
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
    if settings.console {
        notifiers.push(Box::new(ConsoleNotifier));
    }
    if let Some(email) = &settings.email {
        match EmailNotifier::new(email.clone()) {
            Ok(notifier) => {
                log::info!("email notifier initialized ({} recipients)", email.recipients.len());
                notifiers.push(Box::new(notifier));
            }
            Err(err) => log::warn!("email notifications disabled: {:#}", err),
        }
    }
    if let Some(mqtt) = &settings.mqtt {
        match MqttNotifier::connect(mqtt) {
            Ok(notifier) => notifiers.push(Box::new(notifier)),
            Err(err) => log::warn!("MQTT notifications disabled: {:#}", err),
        }
    }
    notifiers
}
