//! Path → witness payload encoding.
//!
//! The compute worker receives the path as JSON with every coordinate rounded
//! to an integer and rendered as a decimal string:
//!
//! ```text
//! {"coordinates":[["1281189","441367"],["1281284","441831"]]}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::WitnessError;

/// Ordered 2-D points in projected planar units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<[f64; 2]>);

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64, y: f64) {
        self.0.push([x, y]);
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a path given as a JSON array of `[x, y]` pairs.
    pub fn from_json(json: &str) -> Result<Self, WitnessError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the path into the witness text handed to the compute worker.
    pub fn to_witness(&self) -> Result<String, WitnessError> {
        WitnessPayload::from_path(self)?.to_json()
    }
}

impl From<Vec<[f64; 2]>> for Path {
    fn from(points: Vec<[f64; 2]>) -> Self {
        Self(points)
    }
}

impl From<Vec<[i64; 2]>> for Path {
    fn from(points: Vec<[i64; 2]>) -> Self {
        Self(points.into_iter().map(|[x, y]| [x as f64, y as f64]).collect())
    }
}

impl FromIterator<(f64, f64)> for Path {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(x, y)| [x, y]).collect())
    }
}

/// The witness document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessPayload {
    pub coordinates: Vec<[String; 2]>,
}

impl WitnessPayload {
    pub fn from_path(path: &Path) -> Result<Self, WitnessError> {
        let coordinates = path
            .points()
            .iter()
            .enumerate()
            .map(|(index, [x, y])| -> Result<[String; 2], WitnessError> {
                Ok([
                    round_coordinate(*x, index, 0)?.to_string(),
                    round_coordinate(*y, index, 1)?.to_string(),
                ])
            })
            .collect::<Result<_, WitnessError>>()?;
        Ok(Self { coordinates })
    }

    pub fn to_json(&self) -> Result<String, WitnessError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Round to the nearest integer; exact halves go toward positive infinity.
fn round_coordinate(value: f64, index: usize, axis: usize) -> Result<i64, WitnessError> {
    if !value.is_finite() {
        return Err(WitnessError::NonFinite { index, axis, value });
    }
    let floor = value.floor();
    let rounded = if value - floor >= 0.5 { floor + 1.0 } else { floor };
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(WitnessError::OutOfRange { index, axis, value });
    }
    Ok(rounded as i64)
}
