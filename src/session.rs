//! Threaded pipeline around an [`OverlayController`].
//!
//! ```text
//! tracking thread --(frames, bounded)--> classifier workers
//!        |                                     |
//!        +------------(session events)---------+--> caller thread: controller + sink
//! ```
//!
//! The caller's thread is the only one that touches the controller or the
//! sink. Classifier results are applied in completion order; a slow frame can
//! land after a faster, newer one and the last applied result wins.

use crate::controller::OverlayController;
use crate::overlay::{ClassificationEvent, Expression};
use crate::sink::PresentationSink;
use anyhow::{Context, Result};
use facefilter_vision::{AnchorPose, ExpressionModel, FaceTracker, Frame, TrackingEvent};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;

/// One step of a [`TrackingSource`].
#[derive(Debug)]
pub enum Poll {
    Event(TrackingEvent),
    /// A frame went by with nothing to report; the shutdown flag is checked
    /// before polling again.
    Idle,
    /// The source has no more events; the session ends.
    Finished,
}

/// Produces anchor events and the frames to classify.
pub trait TrackingSource: Send {
    /// Should return within about one frame so shutdown stays responsive.
    fn next_event(&mut self) -> Result<Poll>;
}

/// Turns a frame into an expression, or nothing.
pub trait Classifier: Send {
    fn classify(&mut self, frame: &Frame) -> Result<Option<ClassificationEvent>>;
}

impl TrackingSource for FaceTracker {
    fn next_event(&mut self) -> Result<Poll> {
        Ok(match FaceTracker::next_event(self)? {
            Some(event) => Poll::Event(event),
            None => Poll::Idle,
        })
    }
}

impl Classifier for ExpressionModel {
    fn classify(&mut self, frame: &Frame) -> Result<Option<ClassificationEvent>> {
        Ok(self.predict(&frame.image, &frame.face)?.map(|p| ClassificationEvent {
            expression: Expression::from_label(p.label),
            confidence: p.confidence,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Frames waiting for a free worker; newer frames are dropped beyond this.
    pub queue_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { queue_depth: 2 }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub classified: u64,
    pub dropped: u64,
    pub transitions: u64,
}

enum SessionEvent {
    AnchorCreated(AnchorPose),
    AnchorUpdated(AnchorPose, Arc<Frame>),
    TrackingEnded,
    Classified(Option<ClassificationEvent>),
}

/// Run until the source ends, fails, or `running` is cleared. Classifications
/// already in flight are still applied before returning.
pub fn run<T, S>(
    source: T,
    classifiers: Vec<Box<dyn Classifier>>,
    controller: &mut OverlayController<S>,
    options: SessionOptions,
    running: Arc<AtomicBool>,
) -> Result<SessionStats>
where
    T: TrackingSource + 'static,
    S: PresentationSink,
{
    if classifiers.is_empty() {
        anyhow::bail!("session needs at least one classifier");
    }

    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>();
    let (frame_tx, frame_rx) = mpsc::sync_channel::<Arc<Frame>>(options.queue_depth.max(1));
    let frame_rx = Arc::new(Mutex::new(frame_rx));

    let workers: Vec<_> = classifiers
        .into_iter()
        .enumerate()
        .map(|(id, classifier)| {
            let frames = Arc::clone(&frame_rx);
            let events = event_tx.clone();
            thread::Builder::new()
                .name(format!("classifier-{}", id))
                .spawn(move || classify_loop(classifier, frames, events))
        })
        .collect::<std::io::Result<Vec<_>>>()
        .context("spawning classifier workers")?;

    let tracking = {
        let events = event_tx.clone();
        thread::Builder::new()
            .name("tracking".into())
            .spawn(move || track_loop(source, frame_tx, events, running))
            .context("spawning tracking thread")?
    };
    drop(event_tx);

    let mut stats = SessionStats::default();
    // ends once the tracker and every worker have hung up
    for event in event_rx {
        match event {
            SessionEvent::AnchorCreated(pose) => controller.on_anchor_created(&pose),
            SessionEvent::AnchorUpdated(pose, frame) => {
                stats.frames += 1;
                controller.on_anchor_updated(&pose, &frame);
            }
            SessionEvent::TrackingEnded => controller.on_tracking_ended(),
            SessionEvent::Classified(result) => {
                stats.classified += 1;
                if controller.handle_classification(result) {
                    stats.transitions += 1;
                }
            }
        }
    }

    for worker in workers {
        if worker.join().is_err() {
            warn!("classifier worker panicked");
        }
    }
    stats.dropped = match tracking.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("tracking thread panicked"),
    };

    info!(
        "session ended: {} frames, {} classified, {} dropped, {} transitions",
        stats.frames, stats.classified, stats.dropped, stats.transitions
    );
    Ok(stats)
}

/// Returns the number of frames that found the classifier queue full.
fn track_loop<T: TrackingSource>(
    mut source: T,
    frames: SyncSender<Arc<Frame>>,
    events: Sender<SessionEvent>,
    running: Arc<AtomicBool>,
) -> Result<u64> {
    let mut dropped = 0;
    while running.load(Ordering::SeqCst) {
        let event = match source.next_event()? {
            Poll::Event(event) => event,
            Poll::Idle => continue,
            Poll::Finished => {
                debug!("tracking source finished");
                break;
            }
        };
        let forward = match event {
            TrackingEvent::AnchorCreated(pose) => SessionEvent::AnchorCreated(pose),
            TrackingEvent::TrackingEnded => SessionEvent::TrackingEnded,
            TrackingEvent::AnchorUpdated(pose, frame) => {
                let frame = Arc::new(frame);
                match frames.try_send(Arc::clone(&frame)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        debug!("classifiers busy, frame {} not classified", frame.seq);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
                SessionEvent::AnchorUpdated(pose, frame)
            }
        };
        if events.send(forward).is_err() {
            break;
        }
    }
    Ok(dropped)
}

fn classify_loop(
    mut classifier: Box<dyn Classifier>,
    frames: Arc<Mutex<Receiver<Arc<Frame>>>>,
    events: Sender<SessionEvent>,
) {
    loop {
        let frame = {
            let Ok(rx) = frames.lock() else { return };
            match rx.recv() {
                Ok(frame) => frame,
                Err(_) => return,
            }
        };
        let result = match classifier.classify(&frame) {
            Ok(result) => result,
            Err(e) => {
                warn!("classifying frame {}: {:#}", frame.seq, e);
                None
            }
        };
        if events.send(SessionEvent::Classified(result)).is_err() {
            return;
        }
    }
}
