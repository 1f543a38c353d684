use crate::overlay::OverlayId;
use facefilter_vision::{AnchorPose, Frame};
use serde::Serialize;

/// Rendering and audio side of the pipeline.
///
/// All methods are called from the session's serial context. Implementations
/// handle their own failures; nothing here can abort a running session.
pub trait PresentationSink {
    fn set_overlay_visible(&mut self, overlay: OverlayId, visible: bool);

    fn set_overlay_texture(&mut self, overlay: OverlayId, variant: u32);

    fn place_overlay(
        &mut self,
        overlay: OverlayId,
        pose: &AnchorPose,
        vertical_offset: f32,
        depth_offset: f32,
    );

    /// Start or resume. Calling this while already playing must not restart.
    fn audio_play(&mut self);

    fn audio_pause(&mut self);

    /// Called once per tracked frame, after the overlays were placed.
    fn present_frame(&mut self, _frame: &Frame) {}
}

impl<S: PresentationSink + ?Sized> PresentationSink for Box<S> {
    fn set_overlay_visible(&mut self, overlay: OverlayId, visible: bool) {
        (**self).set_overlay_visible(overlay, visible)
    }

    fn set_overlay_texture(&mut self, overlay: OverlayId, variant: u32) {
        (**self).set_overlay_texture(overlay, variant)
    }

    fn place_overlay(
        &mut self,
        overlay: OverlayId,
        pose: &AnchorPose,
        vertical_offset: f32,
        depth_offset: f32,
    ) {
        (**self).place_overlay(overlay, pose, vertical_offset, depth_offset)
    }

    fn audio_play(&mut self) {
        (**self).audio_play()
    }

    fn audio_pause(&mut self) {
        (**self).audio_pause()
    }

    fn present_frame(&mut self, frame: &Frame) {
        (**self).present_frame(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SinkCall {
    Visible {
        overlay: OverlayId,
        visible: bool,
    },
    Texture {
        overlay: OverlayId,
        variant: u32,
    },
    Place {
        overlay: OverlayId,
        vertical_offset: f32,
        depth_offset: f32,
    },
    AudioPlay,
    AudioPause,
    Frame {
        seq: u32,
    },
}

/// Sink that only remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calls: Vec<SinkCall>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, call: &SinkCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl PresentationSink for RecordingSink {
    fn set_overlay_visible(&mut self, overlay: OverlayId, visible: bool) {
        self.calls.push(SinkCall::Visible { overlay, visible });
    }

    fn set_overlay_texture(&mut self, overlay: OverlayId, variant: u32) {
        self.calls.push(SinkCall::Texture { overlay, variant });
    }

    fn place_overlay(
        &mut self,
        overlay: OverlayId,
        _pose: &AnchorPose,
        vertical_offset: f32,
        depth_offset: f32,
    ) {
        self.calls.push(SinkCall::Place {
            overlay,
            vertical_offset,
            depth_offset,
        });
    }

    fn audio_play(&mut self) {
        self.calls.push(SinkCall::AudioPlay);
    }

    fn audio_pause(&mut self) {
        self.calls.push(SinkCall::AudioPause);
    }

    fn present_frame(&mut self, frame: &Frame) {
        self.calls.push(SinkCall::Frame { seq: frame.seq });
    }
}
