//! Bolero fuzzer for witness encoding.
//!
//! Properties tested:
//! - Finite coordinates always encode, as integer strings within half a unit
//! - Non-finite coordinates are always rejected
//! - The output is valid JSON with one pair per input point

use bolero::check;
use proofwire_core::{Path, WitnessPayload};

fn main() {
    check!()
        .with_type::<Vec<(f64, f64)>>()
        .for_each(|points| {
            let path: Path = points.iter().copied().collect();
            let all_finite = points.iter().all(|(x, y)| x.is_finite() && y.is_finite());
            let in_range = points
                .iter()
                .all(|(x, y)| x.abs() < 9.0e18 && y.abs() < 9.0e18);

            match WitnessPayload::from_path(&path) {
                Ok(payload) => {
                    assert!(all_finite, "non-finite coordinate was encoded");
                    assert_eq!(payload.coordinates.len(), points.len());
                    for ((x, y), [sx, sy]) in points.iter().zip(&payload.coordinates) {
                        for (value, text) in [(x, sx), (y, sy)] {
                            let n: i64 = text.parse().expect("integer text");
                            assert!((n as f64 - value).abs() <= 0.5, "{value} -> {n}");
                        }
                    }
                    let json = payload.to_json().expect("serializes");
                    let back: WitnessPayload = serde_json::from_str(&json).expect("valid JSON");
                    assert_eq!(back, payload);
                }
                Err(_) => assert!(!all_finite || !in_range, "finite path rejected"),
            }
        });
}
