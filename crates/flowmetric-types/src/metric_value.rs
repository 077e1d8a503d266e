//! Metric sentinels.
//!
//! Every metric reports a finite number, *insufficient-data*, or
//! *not-applicable* — never a silent zero standing in for missing input.
//! On the JSON surface both sentinels serialize as `null`; the envelope's
//! `status` field explains which.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A computed metric value or an explicit absence marker.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MetricValue {
    /// A finite computed value.
    Value(f64),
    /// The inputs needed for this axis were missing or empty.
    #[default]
    InsufficientData,
    /// The axis does not apply to this dataset (e.g. empty measurement
    /// period).
    NotApplicable,
}

impl MetricValue {
    /// Wrap a computation result, mapping non-finite floats to
    /// *insufficient-data*.
    #[must_use]
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            Self::Value(v)
        } else {
            Self::InsufficientData
        }
    }

    /// The numeric value, when present.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether a finite number was computed.
    #[must_use]
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Round to `digits` decimal places, passing sentinels through.
    #[must_use]
    pub fn rounded(&self, digits: u32) -> Self {
        match self {
            Self::Value(v) => {
                let factor = 10f64.powi(digits as i32);
                Self::Value((v * factor).round() / factor)
            }
            other => *other,
        }
    }
}

impl From<Option<f64>> for MetricValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::InsufficientData, Self::from_f64)
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_f64(*v),
            Self::InsufficientData | Self::NotApplicable => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Option::<f64>::deserialize(deserializer)?;
        Ok(v.into())
    }
}
