use crate::audio::AudioPlayer;
use crate::controller::Placement;
use crate::overlay::OverlayId;
use crate::sink::PresentationSink;
use facefilter_vision::{AnchorPose, Frame};
use image::{imageops, DynamicImage, RgbaImage};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Number of glasses textures shipped with the assets.
pub const GLASSES_VARIANTS: u32 = 3;

/// Overlay images, keyed by overlay and variant.
#[derive(Default)]
pub struct Textures {
    images: HashMap<(OverlayId, u32), RgbaImage>,
}

impl Textures {
    /// Load `glasses{N}.png` and `mask.png` from `dir`. Missing or broken
    /// files are skipped with a warning.
    pub fn load(dir: &Path) -> Self {
        let mut textures = Self::default();
        let wanted = (0..GLASSES_VARIANTS)
            .map(|v| ((OverlayId::Glasses, v), format!("glasses{}.png", v)))
            .chain(std::iter::once(((OverlayId::Mask, 0), "mask.png".to_string())));
        for (key, name) in wanted {
            let path = dir.join(&name);
            match image::open(&path) {
                Ok(img) => {
                    textures.insert(key.0, key.1, img.to_rgba8());
                }
                Err(e) => warn!("texture {} unavailable: {}", path.display(), e),
            }
        }
        textures
    }

    pub fn insert(&mut self, overlay: OverlayId, variant: u32, image: RgbaImage) {
        self.images.insert((overlay, variant), image);
    }

    pub fn get(&self, overlay: OverlayId, variant: u32) -> Option<&RgbaImage> {
        self.images.get(&(overlay, variant))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct OverlayView {
    visible: bool,
    variant: u32,
    anchor: Option<[f32; 2]>,
    scale: f32,
    roll: f32,
    depth_offset: f32,
}

/// Draws the visible overlay over each frame and plays the mask's track.
pub struct PreviewSink {
    textures: Textures,
    glasses: OverlayView,
    mask: OverlayView,
    sizes: [[f32; 2]; 2],
    audio: Option<AudioPlayer>,
    output: Option<PathBuf>,
    last: Option<RgbaImage>,
}

impl PreviewSink {
    pub fn new(
        textures: Textures,
        glasses: &Placement,
        mask: &Placement,
        audio: Option<AudioPlayer>,
        output: Option<PathBuf>,
    ) -> Self {
        Self {
            textures,
            glasses: OverlayView::default(),
            mask: OverlayView::default(),
            sizes: [glasses.size, mask.size],
            audio,
            output,
            last: None,
        }
    }

    /// The most recent composite, if any frame was presented.
    pub fn last_composite(&self) -> Option<&RgbaImage> {
        self.last.as_ref()
    }

    pub fn is_audio_playing(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| a.is_playing())
    }

    fn view_mut(&mut self, overlay: OverlayId) -> &mut OverlayView {
        match overlay {
            OverlayId::Glasses => &mut self.glasses,
            OverlayId::Mask => &mut self.mask,
        }
    }

    /// Overlay the visible texture on `frame`.
    pub fn compose(&self, frame: &Frame) -> RgbaImage {
        let mut canvas = DynamicImage::ImageRgb8(frame.image.clone()).to_rgba8();
        for (id, view, size) in [
            (OverlayId::Glasses, &self.glasses, self.sizes[0]),
            (OverlayId::Mask, &self.mask, self.sizes[1]),
        ] {
            if !view.visible {
                continue;
            }
            let (Some(anchor), Some(texture)) = (view.anchor, self.textures.get(id, view.variant))
            else {
                continue;
            };
            let w = (size[0] * view.scale).round() as u32;
            let h = (size[1] * view.scale).round() as u32;
            if w == 0 || h == 0 {
                continue;
            }
            let scaled = imageops::resize(texture, w, h, imageops::FilterType::Triangle);
            let plane = rotate(&scaled, view.roll);
            let x = (anchor[0] - plane.width() as f32 / 2.0).round() as i64;
            let y = (anchor[1] - plane.height() as f32 / 2.0).round() as i64;
            imageops::overlay(&mut canvas, &plane, x, y);
        }
        canvas
    }
}

/// Rotate `texture` by `roll` radians about its centre, onto a transparent
/// square large enough for any angle.
fn rotate(texture: &RgbaImage, roll: f32) -> RgbaImage {
    if roll.abs() < 1e-3 {
        return texture.clone();
    }
    let (w, h) = texture.dimensions();
    let side = (w as f32).hypot(h as f32).ceil() as u32;
    let half = side as f32 / 2.0;
    let (sin, cos) = roll.sin_cos();
    let mut out = RgbaImage::new(side, side);

    // inverse mapping, nearest neighbour
    for (ox, oy, px) in out.enumerate_pixels_mut() {
        let dx = ox as f32 + 0.5 - half;
        let dy = oy as f32 + 0.5 - half;
        let lx = cos * dx + sin * dy + w as f32 / 2.0;
        let ly = -sin * dx + cos * dy + h as f32 / 2.0;
        if lx >= 0.0 && ly >= 0.0 && lx < w as f32 && ly < h as f32 {
            *px = *texture.get_pixel(lx as u32, ly as u32);
        }
    }
    out
}

impl PresentationSink for PreviewSink {
    fn set_overlay_visible(&mut self, overlay: OverlayId, visible: bool) {
        self.view_mut(overlay).visible = visible;
    }

    fn set_overlay_texture(&mut self, overlay: OverlayId, variant: u32) {
        if self.textures.get(overlay, variant).is_none() {
            debug!("no texture for {:?} variant {}", overlay, variant);
        }
        self.view_mut(overlay).variant = variant;
    }

    fn place_overlay(
        &mut self,
        overlay: OverlayId,
        pose: &AnchorPose,
        vertical_offset: f32,
        depth_offset: f32,
    ) {
        let view = self.view_mut(overlay);
        view.anchor = Some(pose.project(0.0, vertical_offset));
        view.scale = pose.scale;
        view.roll = pose.roll;
        // a flat preview has no depth; kept for inspection
        view.depth_offset = depth_offset;
    }

    fn audio_play(&mut self) {
        if let Some(audio) = self.audio.as_mut() {
            if let Err(e) = audio.play() {
                warn!("audio play failed: {:#}", e);
            }
        }
    }

    fn audio_pause(&mut self) {
        if let Some(audio) = self.audio.as_mut() {
            if let Err(e) = audio.pause() {
                warn!("audio pause failed: {:#}", e);
            }
        }
    }

    fn present_frame(&mut self, frame: &Frame) {
        let composite = self.compose(frame);
        if let Some(path) = &self.output {
            if let Err(e) = composite.save(path) {
                warn!("writing preview {}: {}", path.display(), e);
            }
        }
        trace!(
            "frame {} presented (glasses depth {:.3}, mask depth {:.3})",
            frame.seq,
            self.glasses.depth_offset,
            self.mask.depth_offset
        );
        self.last = Some(composite);
    }
}
