/// A float setting restricted to `[min, max]`.
///
/// Assignments outside the range are clamped, never rejected. Only overridden
/// parameters take part in volume blending.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClampedFloatParameter {
    value: f32,
    min: f32,
    max: f32,
    overridden: bool,
}

impl ClampedFloatParameter {
    /// `min` must not exceed `max`.
    pub fn new(value: f32, min: f32, max: f32) -> Self {
        debug_assert!(min <= max, "Inverted parameter range [{min}, {max}]");
        Self {
            value: value.clamp(min, max),
            min,
            max,
            overridden: false,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn overridden(&self) -> bool {
        self.overridden
    }

    pub fn set_value(&mut self, value: f32) {
        self.value = value.clamp(self.min, self.max);
    }

    /// Sets the value and marks the parameter as overriding lower priority volumes.
    pub fn override_with(&mut self, value: f32) {
        self.set_value(value);
        self.overridden = true;
    }

    pub fn set_overridden(&mut self, overridden: bool) {
        self.overridden = overridden;
    }

    /// Linear interpolation from `from` to `to`, clamped to the range.
    pub fn interp(&mut self, from: f32, to: f32, t: f32) {
        self.set_value(from + (to - from) * t);
    }

    pub(crate) fn blend_towards(&mut self, to: f32, t: f32) {
        self.interp(self.value, to, t);
        self.overridden = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_are_clamped() {
        let mut param = ClampedFloatParameter::new(3.0, 0.0, 1.0);
        assert_eq!(param.value(), 1.0);

        param.set_value(-2.0);
        assert_eq!(param.value(), 0.0);

        param.set_value(0.0001);
        assert_eq!(param.value(), 0.0001);
        assert!(!param.overridden());
    }

    #[test]
    fn interp_stays_in_range() {
        let mut param = ClampedFloatParameter::new(0.0, 0.0, 1.0);
        param.interp(0.0, 1.0, 0.5);
        assert_eq!(param.value(), 0.5);

        param.interp(0.5, 4.0, 1.0);
        assert_eq!(param.value(), 1.0);
    }

    #[test]
    fn override_marks_the_parameter() {
        let mut param = ClampedFloatParameter::new(0.0, 0.0, 1.0);
        param.override_with(7.0);
        assert!(param.overridden());
        assert_eq!(param.value(), 1.0);
    }

    #[test]
    #[should_panic]
    fn inverted_range_is_refused() {
        ClampedFloatParameter::new(0.5, 1.0, 0.0);
    }
}
