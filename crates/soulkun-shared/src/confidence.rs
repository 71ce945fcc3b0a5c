//! Decision confidence, normalized once at the provider boundary.
//!
//! LLM providers report confidence in whatever shape they produce: a bare
//! number, a sub-score object, or nothing at all. [`RawConfidence`] captures
//! that shape and [`Confidence::normalize`] is the single conversion point;
//! everything downstream of the provider adapter sees only [`Confidence`].

use serde::{Deserialize, Serialize};

/// Normalized confidence with sub-scores, each clamped to [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub intent: f64,
    pub parameters: f64,
    pub overall: f64,
}

/// Provider-reported confidence before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawConfidence {
    /// A single number covering the whole decision.
    Scalar(f64),
    /// Separate intent/parameter sub-scores. `overall` defaults to the
    /// minimum of the two when absent.
    Split {
        intent: f64,
        parameters: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        overall: Option<f64>,
    },
}

fn clamp(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}

impl Confidence {
    /// The one place raw provider confidence becomes typed.
    ///
    /// `None` (the provider reported nothing) normalizes to zero across the
    /// board: an unreported confidence is treated as no confidence.
    pub fn normalize(raw: Option<RawConfidence>) -> Self {
        match raw {
            None => Self::zero(),
            Some(RawConfidence::Scalar(v)) => {
                let v = clamp(v);
                Self {
                    intent: v,
                    parameters: v,
                    overall: v,
                }
            }
            Some(RawConfidence::Split {
                intent,
                parameters,
                overall,
            }) => {
                let intent = clamp(intent);
                let parameters = clamp(parameters);
                let overall = clamp(overall.unwrap_or(intent.min(parameters)));
                Self {
                    intent,
                    parameters,
                    overall,
                }
            }
        }
    }

    pub fn zero() -> Self {
        Self {
            intent: 0.0,
            parameters: 0.0,
            overall: 0.0,
        }
    }

    /// Full confidence, used for deterministic (non-LLM) decisions.
    pub fn certain() -> Self {
        Self {
            intent: 1.0,
            parameters: 1.0,
            overall: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_fills_all_fields() {
        let c = Confidence::normalize(Some(RawConfidence::Scalar(0.8)));
        assert_eq!(c.intent, 0.8);
        assert_eq!(c.parameters, 0.8);
        assert_eq!(c.overall, 0.8);
    }

    #[test]
    fn test_split_defaults_overall_to_min() {
        let c = Confidence::normalize(Some(RawConfidence::Split {
            intent: 0.9,
            parameters: 0.6,
            overall: None,
        }));
        assert_eq!(c.overall, 0.6);
    }

    #[test]
    fn test_missing_is_zero() {
        let c = Confidence::normalize(None);
        assert_eq!(c.overall, 0.0);
    }

    #[test]
    fn test_out_of_range_clamped() {
        let c = Confidence::normalize(Some(RawConfidence::Scalar(1.7)));
        assert_eq!(c.overall, 1.0);
        let c = Confidence::normalize(Some(RawConfidence::Scalar(-0.2)));
        assert_eq!(c.overall, 0.0);
        let c = Confidence::normalize(Some(RawConfidence::Scalar(f64::NAN)));
        assert_eq!(c.overall, 0.0);
    }

    #[test]
    fn test_untagged_deserialization() {
        let scalar: RawConfidence = serde_json::from_str("0.75").unwrap();
        assert!(matches!(scalar, RawConfidence::Scalar(v) if v == 0.75));

        let split: RawConfidence =
            serde_json::from_str(r#"{"intent": 0.9, "parameters": 0.7}"#).unwrap();
        let c = Confidence::normalize(Some(split));
        assert_eq!(c.overall, 0.7);
    }
}
