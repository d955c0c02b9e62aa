//! Bounded async alert queue (C7): non-blocking producer, background
//! consumer delivering to a [`Notifier`], drop accounting when the queue is
//! full, and a periodic drop-count report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::model::AlertFields;

const DEFAULT_CAPACITY: usize = 128;
const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_DROP_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub event: &'static str,
    pub fields: AlertFields,
}

/// Delivery target for alert events. `LogNotifier` is the zero-config
/// default; a Telegram transport is intentionally not implemented here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &AlertEvent);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &AlertEvent) {
        warn!(event = event.event, fields = ?event.fields, "alert");
    }
}

#[derive(Default)]
struct DropCounters {
    total: AtomicU64,
    since_reported: AtomicU64,
}

pub struct AlertQueue {
    sender: mpsc::Sender<AlertEvent>,
    drops: Arc<DropCounters>,
    consumer: tokio::task::JoinHandle<()>,
    reporter: tokio::task::JoinHandle<()>,
}

impl AlertQueue {
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        Self::spawn_with_capacity(notifier, DEFAULT_CAPACITY, DEFAULT_NOTIFY_TIMEOUT, DEFAULT_DROP_REPORT_INTERVAL)
    }

    pub fn spawn_with_capacity(
        notifier: Arc<dyn Notifier>,
        capacity: usize,
        notify_timeout: Duration,
        drop_report_interval: Duration,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AlertEvent>(capacity);
        let drops = Arc::new(DropCounters::default());

        let consumer = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if timeout(notify_timeout, notifier.notify(&event)).await.is_err() {
                    error!(event = "alert_delivery_timeout", alert_event = event.event);
                }
            }
        });

        let reporter_drops = Arc::clone(&drops);
        let reporter = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(drop_report_interval);
            loop {
                ticker.tick().await;
                let since = reporter_drops.since_reported.swap(0, Ordering::AcqRel);
                if since > 0 {
                    let total = reporter_drops.total.load(Ordering::Acquire);
                    warn!(event = "alert_queue_dropped_report", dropped_since_last_report = since, dropped_total = total);
                }
            }
        });

        Self { sender, drops, consumer, reporter }
    }

    /// Non-blocking: if the queue is full, counts the drop and logs once
    /// per occurrence (the periodic reporter summarizes the rest).
    pub fn important(&self, event: &'static str, fields: AlertFields) {
        match self.sender.try_send(AlertEvent { event, fields }) {
            Ok(()) => {}
            Err(_) => {
                let total = self.drops.total.fetch_add(1, Ordering::AcqRel) + 1;
                self.drops.since_reported.fetch_add(1, Ordering::AcqRel);
                warn!(event = "alert_queue_full", alert_event = event, dropped_total = total);
            }
        }
    }

    pub fn dropped_total(&self) -> u64 {
        self.drops.total.load(Ordering::Acquire)
    }

    /// Signals the consumer to drain and stop, waiting up to `grace` for it
    /// to finish. Called on clean shutdown.
    pub async fn close(self, grace: Duration) {
        drop(self.sender);
        let _ = timeout(grace, self.consumer).await;
        self.reporter.abort();
    }
}
