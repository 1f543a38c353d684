//! Expression-driven overlay policy.
//!
//! [`transition`] is a pure function from the current [`OverlayState`] and a
//! classification to the next state plus the sink commands needed to get
//! there. Commands are only emitted for things that actually change, so
//! replaying the same event is a no-op.

use serde::{Deserialize, Serialize};

/// Classifications at or below this confidence are ignored.
pub const CONFIDENCE_GATE: f32 = 0.90;

/// Glasses texture shown for a neutral face and on anchor creation.
pub const NEUTRAL_GLASSES: u32 = 0;
/// Glasses texture shown for a surprised face.
pub const SURPRISE_GLASSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Neutral,
    Happiness,
    Surprise,
    Other,
}

impl Expression {
    /// Map a classifier label onto the expressions the policy knows about.
    pub fn from_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("neutral") {
            Expression::Neutral
        } else if label.eq_ignore_ascii_case("happiness") {
            Expression::Happiness
        } else if label.eq_ignore_ascii_case("surprise") {
            Expression::Surprise
        } else {
            Expression::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvent {
    pub expression: Expression,
    pub confidence: f32,
}

impl ClassificationEvent {
    pub fn new(expression: Expression, confidence: f32) -> Self {
        Self {
            expression,
            confidence,
        }
    }

    /// NaN never passes.
    pub fn passes(&self, gate: f32) -> bool {
        self.confidence > gate
    }
}

/// Which overlay is attached to the face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Overlay {
    None,
    Glasses(u32),
    Mask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayId {
    Glasses,
    Mask,
}

impl Overlay {
    pub fn id(&self) -> Option<OverlayId> {
        match self {
            Overlay::None => None,
            Overlay::Glasses(_) => Some(OverlayId::Glasses),
            Overlay::Mask => Some(OverlayId::Mask),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub active: Overlay,
    pub audio_playing: bool,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            active: Overlay::None,
            audio_playing: false,
        }
    }
}

impl OverlayState {
    /// State right after a face is acquired.
    pub fn anchored() -> Self {
        Self {
            active: Overlay::Glasses(NEUTRAL_GLASSES),
            audio_playing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Show(OverlayId),
    Hide(OverlayId),
    SetTexture(OverlayId, u32),
    AudioPlay,
    AudioPause,
}

/// Overlay the policy wants for `expression`, or `None` to leave things be.
pub fn target_for(expression: Expression) -> Option<Overlay> {
    match expression {
        Expression::Neutral => Some(Overlay::Glasses(NEUTRAL_GLASSES)),
        Expression::Happiness => Some(Overlay::Mask),
        Expression::Surprise => Some(Overlay::Glasses(SURPRISE_GLASSES)),
        Expression::Other => None,
    }
}

/// Apply one classification. Events at or below `gate` and unrecognised
/// expressions leave the state untouched and produce no commands.
pub fn transition(
    state: &OverlayState,
    event: &ClassificationEvent,
    gate: f32,
) -> (OverlayState, Vec<Command>) {
    if !event.passes(gate) {
        return (*state, Vec::new());
    }
    match target_for(event.expression) {
        Some(target) => switch_to(state, target),
        None => (*state, Vec::new()),
    }
}

/// Commands that take `state` to `target`, keeping audio tied to the mask.
pub fn switch_to(state: &OverlayState, target: Overlay) -> (OverlayState, Vec<Command>) {
    let mut commands = Vec::new();

    if let Overlay::Glasses(variant) = target {
        if state.active != target {
            commands.push(Command::SetTexture(OverlayId::Glasses, variant));
        }
    }
    if state.active.id() != target.id() {
        if let Some(old) = state.active.id() {
            commands.push(Command::Hide(old));
        }
        if let Some(new) = target.id() {
            commands.push(Command::Show(new));
        }
    }

    let audio_playing = target == Overlay::Mask;
    match (state.audio_playing, audio_playing) {
        (false, true) => commands.push(Command::AudioPlay),
        (true, false) => commands.push(Command::AudioPause),
        _ => {}
    }

    (
        OverlayState {
            active: target,
            audio_playing,
        },
        commands,
    )
}
