use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape of a fade.
///
/// Every curve maps an elapsed fraction `t` in `[0, 1]` to a progress value
/// with `f(0) = 0` and `f(1) = 1`. The built-in shapes are monotonic;
/// breakpoint curves are authored and may move in both directions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "points")]
pub enum FadeCurve {
    #[default]
    Linear,
    /// Starts slow, finishes fast.
    QuadraticIn,
    /// Starts fast, finishes slow.
    QuadraticOut,
    /// Perceptual volume curve, fast rise that flattens out.
    Logarithmic,
    /// Smoothstep, eased at both ends.
    SCurve,
    /// Piecewise linear through authored `(t, progress)` points. `(0, 0)` and
    /// `(1, 1)` are implied and must not be listed.
    Breakpoints(Vec<Breakpoint>),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub t: f64,
    pub progress: f64,
}

impl Breakpoint {
    pub fn new(t: f64, progress: f64) -> Self {
        Self { t, progress }
    }
}

impl FadeCurve {
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::QuadraticIn => "QuadraticIn",
            FadeCurve::QuadraticOut => "QuadraticOut",
            FadeCurve::Logarithmic => "Logarithmic",
            FadeCurve::SCurve => "SCurve",
            FadeCurve::Breakpoints(_) => "Breakpoints",
        }
    }

    /// Takes an elapsed fraction and returns the eased progress.
    ///
    /// Inputs outside `[0, 1]` are clamped, so callers can pass a raw
    /// `elapsed / duration` ratio.
    pub fn evaluate(&self, t: f64) -> f64 {
        if t.is_nan() || t <= 0.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }

        match self {
            FadeCurve::Linear => linear_curve(t),
            FadeCurve::QuadraticIn => quadratic_in_curve(t),
            FadeCurve::QuadraticOut => quadratic_out_curve(t),
            FadeCurve::Logarithmic => logarithmic_curve(t),
            FadeCurve::SCurve => s_curve(t),
            FadeCurve::Breakpoints(points) => breakpoint_curve(points, t),
        }
    }

    /// Checks that an authored curve is well formed.
    pub fn validate(&self) -> Result<(), String> {
        let FadeCurve::Breakpoints(points) = self else {
            return Ok(());
        };

        let mut previous_t = 0.0;
        for point in points {
            if !point.t.is_finite() || !point.progress.is_finite() {
                return Err("breakpoint values must be finite".to_string());
            }
            if point.t <= previous_t || point.t >= 1.0 {
                return Err(format!(
                    "breakpoint t={} must be strictly increasing inside (0, 1)",
                    point.t
                ));
            }
            previous_t = point.t;
        }
        Ok(())
    }
}

pub fn linear_curve(t: f64) -> f64 {
    t
}

pub fn quadratic_in_curve(t: f64) -> f64 {
    t * t
}

pub fn quadratic_out_curve(t: f64) -> f64 {
    1.0 - (1.0 - t) * (1.0 - t)
}

pub fn logarithmic_curve(t: f64) -> f64 {
    (1.0 + 9.0 * t).log10()
}

pub fn s_curve(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

fn breakpoint_curve(points: &[Breakpoint], t: f64) -> f64 {
    let mut from = Breakpoint::new(0.0, 0.0);
    for to in points.iter().copied().chain(std::iter::once(Breakpoint::new(1.0, 1.0))) {
        if t <= to.t {
            let span = to.t - from.t;
            if span <= 0.0 {
                return to.progress;
            }
            let local = (t - from.t) / span;
            return from.progress + local * (to.progress - from.progress);
        }
        from = to;
    }
    1.0
}

/// Duration and shape of a fade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FadeSpec {
    pub duration: Duration,
    #[serde(default)]
    pub curve: FadeCurve,
}

impl FadeSpec {
    pub fn new(duration: Duration, curve: FadeCurve) -> Self {
        Self { duration, curve }
    }

    pub fn linear(duration: Duration) -> Self {
        Self::new(duration, FadeCurve::Linear)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn standard_curves() -> Vec<FadeCurve> {
        vec![
            FadeCurve::Linear,
            FadeCurve::QuadraticIn,
            FadeCurve::QuadraticOut,
            FadeCurve::Logarithmic,
            FadeCurve::SCurve,
        ]
    }

    #[test]
    fn test_endpoints() {
        for curve in standard_curves() {
            assert_eq!(curve.evaluate(0.0), 0.0, "{} at 0", curve.as_str());
            assert_eq!(curve.evaluate(1.0), 1.0, "{} at 1", curve.as_str());
        }
    }

    #[test]
    fn test_standard_curves_are_monotonic() {
        for curve in standard_curves() {
            let mut previous = 0.0;
            for step in 1..=200 {
                let value = curve.evaluate(step as f64 / 200.0);
                assert!(
                    value >= previous,
                    "{} decreased at step {}",
                    curve.as_str(),
                    step
                );
                previous = value;
            }
        }
    }

    #[test]
    fn test_out_of_range_input_is_clamped() {
        assert_eq!(FadeCurve::QuadraticOut.evaluate(-0.5), 0.0);
        assert_eq!(FadeCurve::Logarithmic.evaluate(3.0), 1.0);
        assert_eq!(FadeCurve::Linear.evaluate(f64::NAN), 0.0);
    }

    #[test]
    fn test_shapes() {
        assert_relative_eq!(FadeCurve::Linear.evaluate(0.25), 0.25);
        assert_relative_eq!(FadeCurve::QuadraticIn.evaluate(0.5), 0.25);
        assert_relative_eq!(FadeCurve::QuadraticOut.evaluate(0.5), 0.75);
        assert_relative_eq!(FadeCurve::SCurve.evaluate(0.5), 0.5);
        assert!(FadeCurve::Logarithmic.evaluate(0.1) > 0.25);
    }

    #[test]
    fn test_breakpoints_can_overshoot() {
        let curve = FadeCurve::Breakpoints(vec![Breakpoint::new(0.5, 1.2)]);
        assert!(curve.validate().is_ok());
        assert_relative_eq!(curve.evaluate(0.25), 0.6, epsilon = 1e-12);
        assert_relative_eq!(curve.evaluate(0.5), 1.2, epsilon = 1e-12);
        assert_relative_eq!(curve.evaluate(0.75), 1.1, epsilon = 1e-12);
        assert_eq!(curve.evaluate(1.0), 1.0);
    }

    #[test]
    fn test_breakpoint_validation() {
        let unordered = FadeCurve::Breakpoints(vec![
            Breakpoint::new(0.6, 0.2),
            Breakpoint::new(0.3, 0.5),
        ]);
        assert!(unordered.validate().is_err());

        let endpoint = FadeCurve::Breakpoints(vec![Breakpoint::new(1.0, 0.5)]);
        assert!(endpoint.validate().is_err());

        let infinite = FadeCurve::Breakpoints(vec![Breakpoint::new(0.5, f64::INFINITY)]);
        assert!(infinite.validate().is_err());
    }

    #[test]
    fn test_fade_spec_serde_keeps_sub_second_precision() {
        let spec = FadeSpec::new(
            Duration::from_nanos(2_345_678_901),
            FadeCurve::Breakpoints(vec![Breakpoint::new(0.125, 0.333_333_333_333)]),
        );
        let json = serde_json::to_string(&spec).unwrap();
        let back: FadeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
