//! # Bias Space
//! A user's (or a source's) political leaning as a point in `[-1,1]²`
//! (economic axis, social axis), plus the geometry the selector needs:
//! Euclidean distance, the mirrored point, and cache-key rounding.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const AXIS_MIN: f64 = -1.0;
pub const AXIS_MAX: f64 = 1.0;

/// Point in bias space. Fields are public so callers can carry unvalidated
/// input through to the selector, which logs (but tolerates) out-of-range values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasCoordinate {
    pub x: f64,
    pub y: f64,
}

impl BiasCoordinate {
    pub const ORIGIN: BiasCoordinate = BiasCoordinate { x: 0.0, y: 0.0 };

    /// Strict constructor: both axes must be finite and within `[-1,1]`.
    pub fn new(x: f64, y: f64) -> Result<Self, ValidationError> {
        check_axis("x", x)?;
        check_axis("y", y)?;
        Ok(Self { x, y })
    }

    /// Derived constructor: clamps finite values into range.
    /// Non-finite input is still an error, there is nothing sensible to clamp.
    pub fn clamped(x: f64, y: f64) -> Result<Self, ValidationError> {
        if !x.is_finite() {
            return Err(ValidationError::NotFinite { axis: "x" });
        }
        if !y.is_finite() {
            return Err(ValidationError::NotFinite { axis: "y" });
        }
        Ok(Self {
            x: x.clamp(AXIS_MIN, AXIS_MAX),
            y: y.clamp(AXIS_MIN, AXIS_MAX),
        })
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn in_range(&self) -> bool {
        (AXIS_MIN..=AXIS_MAX).contains(&self.x) && (AXIS_MIN..=AXIS_MAX).contains(&self.y)
    }

    /// Point reflected through the origin, used to find opposing sources.
    pub fn mirrored(&self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
        }
    }

    pub fn distance(&self, other: &BiasCoordinate) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// `"{x:.3}:{y:.3}"` so near-identical coordinates share cache entries.
    pub fn cache_fragment(&self) -> String {
        format!("{:.3}:{:.3}", round3(self.x), round3(self.y))
    }
}

fn check_axis(axis: &'static str, v: f64) -> Result<(), ValidationError> {
    if !v.is_finite() {
        return Err(ValidationError::NotFinite { axis });
    }
    if !(AXIS_MIN..=AXIS_MAX).contains(&v) {
        return Err(ValidationError::OutOfRange { axis, value: v });
    }
    Ok(())
}

/// Round to 3 decimals; `-0.000` collapses to `0.000`.
fn round3(v: f64) -> f64 {
    let r = (v * 1000.0).round() / 1000.0;
    if r == 0.0 {
        0.0
    } else {
        r
    }
}
