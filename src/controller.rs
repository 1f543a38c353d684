use crate::error::FilterError;
use crate::overlay::{
    self, ClassificationEvent, Command, Overlay, OverlayId, OverlayState, CONFIDENCE_GATE,
    NEUTRAL_GLASSES,
};
use crate::sink::PresentationSink;
use clap::ValueEnum;
use facefilter_vision::{AnchorPose, Frame};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

/// Glasses sit this far above the anchor origin, in metres.
pub const GLASSES_VERTICAL_OFFSET: f32 = 0.022;
/// The mask covers the whole face, so it sits higher.
pub const MASK_VERTICAL_OFFSET: f32 = 0.053;
/// Overlays float in front of the face at this share of its forward extent.
pub const DEPTH_RATIO: f32 = 0.75;

/// Where an overlay plane goes relative to the anchor, and how big it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub vertical_offset: f32,
    pub depth_ratio: f32,
    /// Plane width and height in metres.
    pub size: [f32; 2],
}

impl Placement {
    pub const GLASSES: Placement = Placement {
        vertical_offset: GLASSES_VERTICAL_OFFSET,
        depth_ratio: DEPTH_RATIO,
        size: [0.13, 0.06],
    };

    pub const MASK: Placement = Placement {
        vertical_offset: MASK_VERTICAL_OFFSET,
        depth_ratio: DEPTH_RATIO,
        size: [0.15, 0.24],
    };

    pub fn depth_offset(&self, pose: &AnchorPose) -> f32 {
        pose.extent[2] * self.depth_ratio
    }
}

/// What happens to the overlay selection when the face is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TrackingLossPolicy {
    /// Back to the neutral glasses with audio paused.
    #[default]
    Reset,
    /// Keep whatever was showing and pick it up again on re-acquisition.
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOptions {
    pub gate: f32,
    pub on_tracking_lost: TrackingLossPolicy,
    pub glasses: Placement,
    pub mask: Placement,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            gate: CONFIDENCE_GATE,
            on_tracking_lost: TrackingLossPolicy::default(),
            glasses: Placement::GLASSES,
            mask: Placement::MASK,
        }
    }
}

/// Owns the overlay state and drives a [`PresentationSink`] from tracking and
/// classification events. Every call must come from one serial context.
pub struct OverlayController<S> {
    sink: S,
    state: OverlayState,
    options: ControllerOptions,
    anchored: bool,
}

impl<S: PresentationSink> OverlayController<S> {
    pub fn new(sink: S, options: ControllerOptions) -> Self {
        Self {
            sink,
            state: OverlayState::default(),
            options,
            anchored: false,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Face acquired: attach both overlays, show the default (or retained)
    /// selection and hide the other.
    pub fn on_anchor_created(&mut self, pose: &AnchorPose) {
        if self.anchored {
            warn!("anchor created while already tracking, re-placing overlays");
            self.place(pose);
            return;
        }
        self.anchored = true;

        let target = match self.options.on_tracking_lost {
            TrackingLossPolicy::Retain if self.state.active != Overlay::None => self.state,
            _ => OverlayState::anchored(),
        };
        let variant = match target.active {
            Overlay::Glasses(v) => v,
            _ => NEUTRAL_GLASSES,
        };

        self.sink.set_overlay_texture(OverlayId::Glasses, variant);
        self.place(pose);
        self.sink
            .set_overlay_visible(OverlayId::Mask, target.active == Overlay::Mask);
        self.sink.set_overlay_visible(
            OverlayId::Glasses,
            matches!(target.active, Overlay::Glasses(_)),
        );
        match (self.state.audio_playing, target.audio_playing) {
            (false, true) => self.sink.audio_play(),
            (true, false) => self.sink.audio_pause(),
            _ => {}
        }

        info!("overlays attached: {:?}", target.active);
        self.state = target;
    }

    pub fn on_anchor_updated(&mut self, pose: &AnchorPose, frame: &Frame) {
        if !self.anchored {
            debug!("frame {} for an anchor that is not tracked", frame.seq);
            return;
        }
        self.place(pose);
        self.sink.present_frame(frame);
    }

    pub fn on_tracking_ended(&mut self) {
        if !self.anchored {
            return;
        }
        self.anchored = false;
        match self.options.on_tracking_lost {
            TrackingLossPolicy::Reset => {
                let (next, commands) =
                    overlay::switch_to(&self.state, Overlay::Glasses(NEUTRAL_GLASSES));
                self.apply(&commands);
                self.state = next;
                info!("tracking lost, overlays reset");
            }
            TrackingLossPolicy::Retain => {
                info!("tracking lost, keeping {:?}", self.state.active);
            }
        }
    }

    /// Apply one classifier completion. Returns whether the state changed.
    pub fn handle_classification(&mut self, event: Option<ClassificationEvent>) -> bool {
        let event = match self.accept(event) {
            Ok(event) => event,
            Err(e) => {
                trace!("{}", e);
                return false;
            }
        };

        let (next, commands) = overlay::transition(&self.state, &event, self.options.gate);
        if next == self.state {
            return false;
        }
        info!(
            "{:?} ({:.3}): {:?} -> {:?}",
            event.expression, event.confidence, self.state.active, next.active
        );
        self.apply(&commands);
        self.state = next;
        true
    }

    fn accept(&self, event: Option<ClassificationEvent>) -> Result<ClassificationEvent, FilterError> {
        let event = event.ok_or(FilterError::ClassificationUnavailable("no result"))?;
        if !self.anchored {
            return Err(FilterError::ClassificationUnavailable("no face tracked"));
        }
        if !event.passes(self.options.gate) {
            return Err(FilterError::ClassificationUnavailable("below confidence gate"));
        }
        Ok(event)
    }

    fn place(&mut self, pose: &AnchorPose) {
        for (id, placement) in [
            (OverlayId::Glasses, self.options.glasses),
            (OverlayId::Mask, self.options.mask),
        ] {
            self.sink.place_overlay(
                id,
                pose,
                placement.vertical_offset,
                placement.depth_offset(pose),
            );
        }
    }

    fn apply(&mut self, commands: &[Command]) {
        for command in commands {
            debug!("sink <- {:?}", command);
            match *command {
                Command::Show(id) => self.sink.set_overlay_visible(id, true),
                Command::Hide(id) => self.sink.set_overlay_visible(id, false),
                Command::SetTexture(id, variant) => self.sink.set_overlay_texture(id, variant),
                Command::AudioPlay => self.sink.audio_play(),
                Command::AudioPause => self.sink.audio_pause(),
            }
        }
    }
}
