use anyhow::Result;
use facefilter::controller::ControllerOptions;
use facefilter::overlay::SURPRISE_GLASSES;
use facefilter::script::scripted_pose;
use facefilter::session::{self, Classifier, Poll, SessionOptions, TrackingSource};
use facefilter::sink::{RecordingSink, SinkCall};
use facefilter::{
    ClassificationEvent, Expression, Frame, Overlay, OverlayController, OverlayState,
    TrackingEvent,
};
use image::RgbImage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Scripted(VecDeque<TrackingEvent>);

impl TrackingSource for Scripted {
    fn next_event(&mut self) -> Result<Poll> {
        Ok(self.0.pop_front().map_or(Poll::Finished, Poll::Event))
    }
}

fn frame(seq: u32) -> Frame {
    Frame {
        seq,
        image: RgbImage::new(8, 8),
        face: [0.0, 0.0, 8.0, 8.0],
    }
}

fn updated(seq: u32) -> TrackingEvent {
    TrackingEvent::AnchorUpdated(scripted_pose(), frame(seq))
}

/// Answers by frame sequence number, after an optional delay.
#[derive(Clone)]
struct ByFrame(Arc<HashMap<u32, (Option<(Expression, f32)>, u64)>>);

impl Classifier for ByFrame {
    fn classify(&mut self, frame: &Frame) -> Result<Option<ClassificationEvent>> {
        let Some((answer, delay_ms)) = self.0.get(&frame.seq).copied() else {
            anyhow::bail!("unexpected frame {}", frame.seq);
        };
        thread::sleep(Duration::from_millis(delay_ms));
        Ok(answer.map(|(e, c)| ClassificationEvent::new(e, c)))
    }
}

fn workers(n: usize, answers: ByFrame) -> Vec<Box<dyn Classifier>> {
    (0..n)
        .map(|_| Box::new(answers.clone()) as Box<dyn Classifier>)
        .collect()
}

fn run(
    events: Vec<TrackingEvent>,
    classifiers: Vec<Box<dyn Classifier>>,
    queue_depth: usize,
) -> (OverlayController<RecordingSink>, session::SessionStats) {
    let mut controller = OverlayController::new(RecordingSink::new(), ControllerOptions::default());
    let stats = session::run(
        Scripted(events.into()),
        classifiers,
        &mut controller,
        SessionOptions { queue_depth },
        Arc::new(AtomicBool::new(true)),
    )
    .unwrap();
    (controller, stats)
}

#[test]
fn frames_flow_through_to_state() {
    let answers = ByFrame(Arc::new(HashMap::from([
        (1, (Some((Expression::Happiness, 0.95)), 0)),
        (2, (None, 0)),
        (3, (Some((Expression::Neutral, 0.99)), 0)),
    ])));
    let mut events = vec![TrackingEvent::AnchorCreated(scripted_pose())];
    events.extend((1..=3).map(updated));

    // one worker and room for every frame: results arrive in frame order
    let (controller, stats) = run(events, workers(1, answers), 8);
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.classified, 3);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.transitions, 2);
    assert_eq!(controller.state(), OverlayState::anchored());

    let sink = controller.sink();
    assert_eq!(sink.count(&SinkCall::AudioPlay), 1);
    assert_eq!(sink.count(&SinkCall::AudioPause), 1);
    for seq in 1..=3 {
        assert_eq!(sink.count(&SinkCall::Frame { seq }), 1);
    }
}

#[test]
fn slow_result_applied_last_wins() {
    let answers = ByFrame(Arc::new(HashMap::from([
        (1, (Some((Expression::Surprise, 0.95)), 300)),
        (2, (Some((Expression::Happiness, 0.97)), 0)),
    ])));
    let events = vec![
        TrackingEvent::AnchorCreated(scripted_pose()),
        updated(1),
        updated(2),
    ];

    let (controller, stats) = run(events, workers(2, answers), 4);
    assert_eq!(stats.classified, 2);
    // frame 2's Happiness landed first, frame 1's Surprise after it
    assert_eq!(controller.state().active, Overlay::Glasses(SURPRISE_GLASSES));
    assert!(!controller.state().audio_playing);
    assert_eq!(controller.sink().count(&SinkCall::AudioPlay), 1);
    assert_eq!(controller.sink().count(&SinkCall::AudioPause), 1);
}

#[test]
fn classifier_errors_are_not_events() {
    // frame 7 is unknown to the classifier and errors
    let answers = ByFrame(Arc::new(HashMap::new()));
    let events = vec![TrackingEvent::AnchorCreated(scripted_pose()), updated(7)];
    let (controller, stats) = run(events, workers(1, answers), 2);
    assert_eq!(stats.classified, 1);
    assert_eq!(stats.transitions, 0);
    assert_eq!(controller.state(), OverlayState::anchored());
}

#[test]
fn tracking_loss_resets_mid_session() {
    let answers = ByFrame(Arc::new(HashMap::from([(
        1,
        (Some((Expression::Happiness, 0.99)), 0),
    )])));
    // wait for the classification before the face goes away
    struct Slow(VecDeque<TrackingEvent>);
    impl TrackingSource for Slow {
        fn next_event(&mut self) -> Result<Poll> {
            if matches!(self.0.front(), Some(TrackingEvent::TrackingEnded)) {
                thread::sleep(Duration::from_millis(200));
            }
            Ok(self.0.pop_front().map_or(Poll::Finished, Poll::Event))
        }
    }

    let mut controller = OverlayController::new(RecordingSink::new(), ControllerOptions::default());
    session::run(
        Slow(
            vec![
                TrackingEvent::AnchorCreated(scripted_pose()),
                updated(1),
                TrackingEvent::TrackingEnded,
            ]
            .into(),
        ),
        workers(1, answers),
        &mut controller,
        SessionOptions::default(),
        Arc::new(AtomicBool::new(true)),
    )
    .unwrap();

    assert!(!controller.is_anchored());
    assert_eq!(controller.state(), OverlayState::anchored());
    assert_eq!(controller.sink().count(&SinkCall::AudioPlay), 1);
    assert_eq!(controller.sink().count(&SinkCall::AudioPause), 1);
}

#[test]
fn stopped_session_returns_immediately() {
    let mut controller = OverlayController::new(RecordingSink::new(), ControllerOptions::default());
    let stats = session::run(
        Scripted(vec![TrackingEvent::AnchorCreated(scripted_pose())].into()),
        workers(1, ByFrame(Arc::new(HashMap::new()))),
        &mut controller,
        SessionOptions::default(),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();
    assert_eq!(stats, session::SessionStats::default());
    assert!(!controller.is_anchored());
}

#[test]
fn shutdown_while_no_face_in_view() {
    // an empty room: every frame is searched and nothing is ever found
    struct EmptyRoom;
    impl TrackingSource for EmptyRoom {
        fn next_event(&mut self) -> Result<Poll> {
            thread::sleep(Duration::from_millis(5));
            Ok(Poll::Idle)
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let stop = {
        let running = Arc::clone(&running);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            running.store(false, Ordering::SeqCst);
        })
    };

    let mut controller = OverlayController::new(RecordingSink::new(), ControllerOptions::default());
    let stats = session::run(
        EmptyRoom,
        workers(1, ByFrame(Arc::new(HashMap::new()))),
        &mut controller,
        SessionOptions::default(),
        running,
    )
    .unwrap();
    stop.join().unwrap();

    assert_eq!(stats, session::SessionStats::default());
    assert!(!controller.is_anchored());
    assert!(controller.sink().calls.is_empty());
}

#[test]
fn source_errors_propagate() {
    struct Broken;
    impl TrackingSource for Broken {
        fn next_event(&mut self) -> Result<Poll> {
            anyhow::bail!("camera unplugged")
        }
    }
    let mut controller = OverlayController::new(RecordingSink::new(), ControllerOptions::default());
    let err = session::run(
        Broken,
        workers(1, ByFrame(Arc::new(HashMap::new()))),
        &mut controller,
        SessionOptions::default(),
        Arc::new(AtomicBool::new(true)),
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("camera unplugged"));
}

#[test]
fn needs_a_classifier() {
    let mut controller = OverlayController::new(RecordingSink::new(), ControllerOptions::default());
    assert!(session::run(
        Scripted(VecDeque::new()),
        Vec::new(),
        &mut controller,
        SessionOptions::default(),
        Arc::new(AtomicBool::new(true)),
    )
    .is_err());
}
