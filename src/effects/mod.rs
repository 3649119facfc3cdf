pub mod layer;
pub mod patterns;
pub mod reactive;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFeed;

pub use layer::Layer;
pub use patterns::{Flashlight, Rainbow, Solid};
pub use reactive::{BeatPulse, SpectrumBars};

/// Drawing contract every unit placed in a region satisfies.
///
/// `draw` paints into a layer sized to the region, with the region's top-left
/// as origin. `dt` is seconds since the previous frame. Touch coordinates are
/// in the same local space.
pub trait AnimationUnit: Send {
    fn draw(&mut self, layer: &mut Layer, dt: f32) -> Result<()>;

    fn on_touch(&mut self, _x: f32, _y: f32) -> bool {
        false
    }

    fn kind(&self) -> &'static str {
        "custom"
    }
}

/// The units a region can hold. Built-in variants carry their own
/// serialisation identity through the `kind` tag; `Custom` hosts externally
/// supplied units and is never serialised.
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Animation {
    Solid(Solid),
    Rainbow(Rainbow),
    Flashlight(Flashlight),
    Spectrum(SpectrumBars),
    BeatPulse(BeatPulse),
    #[serde(skip)]
    Custom(Box<dyn AnimationUnit>),
}

impl Animation {
    pub fn custom(unit: impl AnimationUnit + 'static) -> Self {
        Animation::Custom(Box::new(unit))
    }

    /// Connects audio-reactive variants to the analysis pipeline. Others ignore it.
    pub fn attach_audio(&mut self, feed: AudioFeed) {
        match self {
            Animation::Spectrum(unit) => unit.attach(feed),
            Animation::BeatPulse(unit) => unit.attach(feed),
            _ => {}
        }
    }

    pub fn is_audio_reactive(&self) -> bool {
        matches!(self, Animation::Spectrum(_) | Animation::BeatPulse(_))
    }

    fn unit_mut(&mut self) -> &mut dyn AnimationUnit {
        match self {
            Animation::Solid(unit) => unit,
            Animation::Rainbow(unit) => unit,
            Animation::Flashlight(unit) => unit,
            Animation::Spectrum(unit) => unit,
            Animation::BeatPulse(unit) => unit,
            Animation::Custom(unit) => unit.as_mut(),
        }
    }

    fn unit(&self) -> &dyn AnimationUnit {
        match self {
            Animation::Solid(unit) => unit,
            Animation::Rainbow(unit) => unit,
            Animation::Flashlight(unit) => unit,
            Animation::Spectrum(unit) => unit,
            Animation::BeatPulse(unit) => unit,
            Animation::Custom(unit) => unit.as_ref(),
        }
    }
}

impl AnimationUnit for Animation {
    fn draw(&mut self, layer: &mut Layer, dt: f32) -> Result<()> {
        self.unit_mut().draw(layer, dt)
    }

    fn on_touch(&mut self, x: f32, y: f32) -> bool {
        self.unit_mut().on_touch(x, y)
    }

    fn kind(&self) -> &'static str {
        self.unit().kind()
    }
}

impl std::fmt::Debug for Animation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Animation").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    struct Checker;

    impl AnimationUnit for Checker {
        fn draw(&mut self, layer: &mut Layer, _dt: f32) -> Result<()> {
            for y in 0..layer.height() {
                for x in 0..layer.width() {
                    if (x + y) % 2 == 0 {
                        layer.set(x, y, Rgb::WHITE);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_kind_matches_serialised_tag() {
        let animations = [
            Animation::Solid(Solid::new(Rgb::new(1, 2, 3))),
            Animation::Rainbow(Rainbow::default()),
            Animation::Flashlight(Flashlight::default()),
            Animation::Spectrum(SpectrumBars::default()),
            Animation::BeatPulse(BeatPulse::default()),
        ];

        for animation in &animations {
            let json = serde_json::to_value(animation).unwrap();
            assert_eq!(json["kind"], animation.kind());
        }
    }

    #[test]
    fn test_round_trip_through_tag() {
        let json = r#"{ "kind": "solid", "color": { "r": 9, "g": 8, "b": 7 } }"#;
        let animation: Animation = serde_json::from_str(json).unwrap();
        assert_eq!(animation.kind(), "solid");

        let mut layer = Layer::new(2, 2);
        let mut animation = animation;
        animation.draw(&mut layer, 0.03).unwrap();
        assert_eq!(layer.get(1, 1).rgb(), Rgb::new(9, 8, 7));
    }

    #[test]
    fn test_custom_units_draw_but_do_not_serialise() {
        let mut animation = Animation::custom(Checker);
        assert_eq!(animation.kind(), "custom");

        let mut layer = Layer::new(2, 2);
        animation.draw(&mut layer, 0.0).unwrap();
        assert_eq!(layer.get(0, 0).rgb(), Rgb::WHITE);
        assert_eq!(layer.get(1, 0).a, 0);

        assert!(serde_json::to_string(&animation).is_err());
        assert!(!animation.on_touch(0.0, 0.0));
    }
}
