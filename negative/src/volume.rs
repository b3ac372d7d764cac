use negative_render::volume::{ClampedFloatParameter, VolumeComponent};

pub const MENU_PATH: &str = "Post-processing/Negative";

/// Volume settings of the negative effect.
#[derive(Debug, Clone, PartialEq)]
pub struct NegativeVolume {
    /// How far colors are inverted, `0` keeps the image and `1` fully inverts it.
    pub intensity: ClampedFloatParameter,
}

impl Default for NegativeVolume {
    fn default() -> Self {
        Self {
            intensity: ClampedFloatParameter::new(0.0, 0.0, 1.0),
        }
    }
}

impl NegativeVolume {
    /// A volume overriding the intensity, as placed by a designer.
    pub fn with_intensity(intensity: f32) -> Self {
        let mut volume = Self::default();
        volume.intensity.override_with(intensity);
        volume
    }
}

impl VolumeComponent for NegativeVolume {
    fn parameters(&self) -> Vec<&ClampedFloatParameter> {
        vec![&self.intensity]
    }

    fn parameters_mut(&mut self) -> Vec<&mut ClampedFloatParameter> {
        vec![&mut self.intensity]
    }

    fn is_active(&self) -> bool {
        self.intensity.value() > 0.0
    }

    fn menu_path(&self) -> &'static str {
        MENU_PATH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_boundary() {
        let mut volume = NegativeVolume::default();
        assert!(!volume.is_active());

        volume.intensity.set_value(0.0001);
        assert!(volume.is_active());

        volume.intensity.set_value(0.0);
        assert!(!volume.is_active());
    }

    #[test]
    fn intensity_is_clamped_not_rejected() {
        let volume = NegativeVolume::with_intensity(4.0);
        assert_eq!(volume.intensity.value(), 1.0);
        assert!(volume.intensity.overridden());

        let volume = NegativeVolume::with_intensity(-1.0);
        assert_eq!(volume.intensity.value(), 0.0);
        assert!(!volume.is_active());
    }
}
