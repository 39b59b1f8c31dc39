use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A score on the 0.1 grid between 0.0 and 1.0, stored as tenths.
///
/// Every score the scorer writes goes through this type, so an off-grid
/// value cannot be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score(u8);

const EPSILON: f64 = 1e-9;

impl Score {
    pub const MIN: Score = Score(0);
    pub const MAX: Score = Score(10);

    /// Nearest grid point, clamped to [0.0, 1.0]. NaN maps to 0.0.
    pub fn nearest(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        let tenths = (value.clamp(0.0, 1.0) * 10.0).round();
        Self(tenths as u8)
    }

    /// The grid point equal to `value`, if it is one.
    pub fn exact(value: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&value) {
            return None;
        }
        let scaled = value * 10.0;
        ((scaled - scaled.round()).abs() < EPSILON).then(|| Self(scaled.round() as u8))
    }

    pub fn from_tenths(tenths: u8) -> Option<Self> {
        (tenths <= 10).then_some(Self(tenths))
    }

    pub fn tenths(&self) -> u8 {
        self.0
    }

    pub fn value(&self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value())
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Score::exact(value)
            .ok_or_else(|| serde::de::Error::custom(format!("{} is not a 0.1-step score", value)))
    }
}
