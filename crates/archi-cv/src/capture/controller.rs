//! Lifecycle of the background scan loop.
//!
//! `Idle -> Running -> Stopping -> Idle` on a requested stop, and
//! `Running -> Error -> Idle` when the capture process dies or keeps failing.
//! An error is never retried by respawning; the caller restarts explicitly.

use super::{CaptureError, CaptureProcess};
use crate::bbox::{BBox, BBoxCollection};
use crate::template::{Template, TemplateSet};
use crate::traits::TemplateMatchable;
use archi_core::{CollectionReader, FrameRef, MonsterId, ScanEvent};
use chrono::{DateTime, Utc};
use image::GrayImage;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerStatus {
    Idle,
    Running,
    Stopping,
    /// The loop ended on a capture failure; cleanup is in progress
    Error(String),
}

impl ControllerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ControllerStatus::Running | ControllerStatus::Stopping)
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("scan is already running")]
    AlreadyRunning,

    #[error("scan is not running")]
    NotRunning,

    #[error("capture process failed to start")]
    Spawn(#[source] CaptureError),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Time between two frame grabs
    pub interval: Duration,
    /// Consecutive transient read failures tolerated before giving up
    pub max_consecutive_failures: u32,
    /// How long `stop` waits for the loop before aborting it
    pub stop_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_consecutive_failures: 5,
            stop_timeout: Duration::from_secs(3),
        }
    }
}

/// Why the scan loop returned
enum ScanExit {
    Cancelled,
    EventsClosed,
    Failed(String),
}

/// The controller keeps ownership of the process; a running loop holds the
/// lock guard, which is released even when the loop is aborted.
type SharedProcess = Arc<AsyncMutex<Box<dyn CaptureProcess>>>;

struct ScanTask {
    cancel: watch::Sender<bool>,
    /// Polled by detection running on the blocking pool
    interrupt: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ScanTask {
    fn cancel(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
        self.cancel.send_replace(true);
    }
}

/// Everything the loop needs besides the process itself
struct ScanContext {
    config: ControllerConfig,
    matcher: Arc<dyn TemplateMatchable>,
    templates: Arc<TemplateSet>,
    events: mpsc::Sender<ScanEvent>,
    reader: CollectionReader,
    status: Arc<watch::Sender<ControllerStatus>>,
    last_error: Arc<Mutex<Option<String>>>,
    sequence: Arc<AtomicU64>,
    interrupt: Arc<AtomicBool>,
}

pub struct CaptureController {
    config: ControllerConfig,
    matcher: Arc<dyn TemplateMatchable>,
    templates: Arc<TemplateSet>,
    process: SharedProcess,
    task: Option<ScanTask>,
    status: Arc<watch::Sender<ControllerStatus>>,
    last_error: Arc<Mutex<Option<String>>>,
    sequence: Arc<AtomicU64>,
}

impl CaptureController {
    pub fn new(
        config: ControllerConfig,
        matcher: Arc<dyn TemplateMatchable>,
        templates: Arc<TemplateSet>,
        process: Box<dyn CaptureProcess>,
    ) -> Self {
        let (status, _) = watch::channel(ControllerStatus::Idle);
        Self {
            config,
            matcher,
            templates,
            process: Arc::new(AsyncMutex::new(process)),
            task: None,
            status: Arc::new(status),
            last_error: Arc::new(Mutex::new(None)),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    /// Status changes, for a live display
    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.subscribe()
    }

    /// Reason the last run ended in `Error`, if it did
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start the capture process and the scan loop.
    ///
    /// Events go to `events` in detection order. `reader` is consulted each
    /// tick to tell new monsters from captured ones.
    pub async fn start(
        &mut self,
        events: mpsc::Sender<ScanEvent>,
        reader: CollectionReader,
    ) -> Result<(), ControllerError> {
        if self.status.borrow().is_active() {
            return Err(ControllerError::AlreadyRunning);
        }
        if let Some(task) = self.task.take() {
            // The previous loop ended on its own; make sure it is gone
            self.join(task).await;
        }

        let mut process = Arc::clone(&self.process).lock_owned().await;
        if let Err(err) = process.start().await {
            tracing::error!(process = process.name(), error = %err, "capture process failed to start");
            return Err(ControllerError::Spawn(err));
        }

        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.set_status(ControllerStatus::Running);
        tracing::info!(
            process = process.name(),
            interval_ms = self.config.interval.as_millis() as u64,
            templates = self.templates.len(),
            "scan started"
        );

        let (cancel, cancelled) = watch::channel(false);
        let interrupt = Arc::new(AtomicBool::new(false));
        let context = ScanContext {
            config: self.config.clone(),
            matcher: self.matcher.clone(),
            templates: self.templates.clone(),
            events,
            reader,
            status: self.status.clone(),
            last_error: self.last_error.clone(),
            sequence: self.sequence.clone(),
            interrupt: interrupt.clone(),
        };
        let handle = tokio::spawn(run_scan(process, context, cancelled));
        self.task = Some(ScanTask {
            cancel,
            interrupt,
            handle,
        });
        Ok(())
    }

    /// Stop the loop and terminate the capture process.
    ///
    /// The loop observes cancellation at its next suspension point, so this
    /// returns within one interval unless the process hangs. After
    /// `stop_timeout` the task is aborted and the process is stopped from
    /// here; it stays with the controller for the next `start`.
    pub async fn stop(&mut self) -> Result<(), ControllerError> {
        let Some(task) = self.task.take() else {
            return Err(ControllerError::NotRunning);
        };

        if self.status.borrow().is_active() {
            self.set_status(ControllerStatus::Stopping);
        }
        self.join(task).await;

        self.set_status(ControllerStatus::Idle);
        tracing::info!("scan stopped");
        Ok(())
    }

    /// Cancel `task` and wait for it, aborting it after `stop_timeout`
    async fn join(&self, mut task: ScanTask) {
        task.cancel();

        match tokio::time::timeout(self.config.stop_timeout, &mut task.handle).await {
            Ok(Ok(())) => return,
            Ok(Err(err)) => tracing::error!(error = %err, "scan task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "scan loop did not stop in time, aborting"
                );
                task.handle.abort();
                if let Err(err) = task.handle.await {
                    tracing::debug!(error = %err, "scan task aborted");
                }
            }
        }

        // The loop never reached its own cleanup
        self.reset_process().await;
    }

    async fn reset_process(&self) {
        let reset = async {
            let mut process = self.process.lock().await;
            process.stop().await;
        };
        if tokio::time::timeout(self.config.stop_timeout, reset).await.is_err() {
            tracing::error!("capture process did not stop, next start will replace it");
        }
    }

    fn set_status(&self, status: ControllerStatus) {
        tracing::info!(?status, "controller status");
        self.status.send_replace(status);
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }
}

/// Detections of monsters not yet captured, together with the captured
/// monsters that score on the same spot.
///
/// Captured templates are only searched around a new detection. When one of
/// them matches better there, the aggregator takes the icon for the captured
/// monster and drops the weaker lookalike.
pub fn detect_frame(
    matcher: &dyn TemplateMatchable,
    templates: &TemplateSet,
    frame: &GrayImage,
    captured: &BTreeSet<MonsterId>,
    cancel: &AtomicBool,
) -> Result<BBoxCollection, CaptureError> {
    let (known, candidates): (Vec<&Template>, Vec<&Template>) =
        templates.iter().partition(|t| captured.contains(&t.monster));
    if candidates.is_empty() {
        return Ok(BBoxCollection::new());
    }

    let found = matcher.detect(frame, &candidates, cancel)?;
    if found.is_empty() || known.is_empty() {
        return Ok(found);
    }

    let mut merged: Vec<BBox> = found.iter().cloned().collect();
    for bbox in found.iter() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let Some((left, top, view)) = surroundings(frame, bbox) else {
            continue;
        };
        for mut rival in matcher.detect(&view, &known, cancel)? {
            rival.x += left;
            rival.y += top;
            let seen = merged
                .iter()
                .any(|b| b.monster == rival.monster && (b.x, b.y) == (rival.x, rival.y));
            if !seen {
                merged.push(rival);
            }
        }
    }

    let mut merged = BBoxCollection::from_vec(merged);
    merged.sort_by_confidence();
    Ok(merged)
}

/// `bbox` with one box size of margin on every side, clipped to the frame
fn surroundings(frame: &GrayImage, bbox: &BBox) -> Option<(u32, u32, GrayImage)> {
    let left = bbox.x.saturating_sub(bbox.width).min(frame.width());
    let top = bbox.y.saturating_sub(bbox.height).min(frame.height());
    let right = bbox.x.saturating_add(bbox.width.saturating_mul(2)).min(frame.width());
    let bottom = bbox.y.saturating_add(bbox.height.saturating_mul(2)).min(frame.height());
    if right <= left || bottom <= top {
        return None;
    }
    let view = image::imageops::crop_imm(frame, left, top, right - left, bottom - top).to_image();
    Some((left, top, view))
}

/// Scan events for the detections of one frame, in detection order
pub fn frame_events(
    sequence: u64,
    timestamp: DateTime<Utc>,
    detections: &BBoxCollection,
) -> Vec<ScanEvent> {
    detections
        .iter()
        .filter_map(|bbox| {
            Some(ScanEvent {
                timestamp,
                monster: bbox.monster?,
                confidence: bbox.confidence,
                frame: FrameRef {
                    sequence,
                    region: bbox.region(),
                },
            })
        })
        .collect()
}

async fn run_scan(
    mut process: OwnedMutexGuard<Box<dyn CaptureProcess>>,
    context: ScanContext,
    mut cancelled: watch::Receiver<bool>,
) {
    let exit = scan_loop(&mut **process, &context, &mut cancelled).await;

    match &exit {
        ScanExit::Cancelled => tracing::debug!("scan loop cancelled"),
        ScanExit::EventsClosed => tracing::warn!("event consumer went away, ending scan"),
        ScanExit::Failed(reason) => {
            tracing::error!(process = process.name(), %reason, "scan failed");
            *context
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());
            context.status.send_replace(ControllerStatus::Error(reason.clone()));
        }
    }

    process.stop().await;

    if !matches!(exit, ScanExit::Cancelled) {
        tracing::info!(status = ?ControllerStatus::Idle, "controller status");
        context.status.send_replace(ControllerStatus::Idle);
    }
}

async fn scan_loop(
    process: &mut dyn CaptureProcess,
    context: &ScanContext,
    cancelled: &mut watch::Receiver<bool>,
) -> ScanExit {
    let mut ticker = tokio::time::interval(context.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancelled.changed() => return ScanExit::Cancelled,
            _ = ticker.tick() => {}
        }

        let grabbed = tokio::select! {
            biased;
            _ = cancelled.changed() => return ScanExit::Cancelled,
            grabbed = process.grab_frame() => grabbed,
        };

        let frame = match grabbed {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(err) if err.is_transient() => {
                failures += 1;
                tracing::debug!(failures, error = %err, "frame read failed");
                if failures >= context.config.max_consecutive_failures {
                    return ScanExit::Failed(format!(
                        "{} consecutive capture failures, last: {}",
                        failures, err
                    ));
                }
                continue;
            }
            Err(err) => return ScanExit::Failed(err.to_string()),
        };

        let sequence = context.sequence.fetch_add(1, Ordering::Relaxed);
        let captured = context.reader.captured_ids();
        let matcher = context.matcher.clone();
        let templates = context.templates.clone();
        let interrupt = context.interrupt.clone();
        let detection = tokio::task::spawn_blocking(move || {
            detect_frame(matcher.as_ref(), &templates, &frame, &captured, &interrupt)
        });

        // Detection keeps running on the blocking pool until it sees `interrupt`
        let detected = tokio::select! {
            biased;
            _ = cancelled.changed() => return ScanExit::Cancelled,
            detected = detection => detected,
        };

        let detections = match detected {
            Ok(Ok(detections)) => detections,
            Ok(Err(err)) => {
                tracing::debug!(sequence, error = %err, "no detection this tick");
                continue;
            }
            Err(err) => {
                tracing::warn!(sequence, error = %err, "detection task failed");
                continue;
            }
        };

        let stats = detections.stats();
        tracing::debug!(
            sequence,
            detections = stats.total_boxes,
            best = stats.max_confidence,
            "frame scanned"
        );

        for event in frame_events(sequence, Utc::now(), &detections) {
            tracing::debug!(sequence, monster = %event.monster, confidence = event.confidence, "detection");

            tokio::select! {
                biased;
                _ = cancelled.changed() => return ScanExit::Cancelled,
                sent = context.events.send(event) => {
                    if sent.is_err() {
                        return ScanExit::EventsClosed;
                    }
                }
            }
        }
    }
}
