//! Context budget configuration and level classification.

use crate::errors::BudgetError;
use serde::{Deserialize, Serialize};

/// Ascending usage fractions that separate the four levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 0.70,
            critical: 0.85,
            emergency: 0.95,
        }
    }
}

/// Immutable token budget for a session.
///
/// Construction validates `0 < warning < critical < emergency <= 1`, so a `Budget`
/// that exists is always well-formed and classification never has to fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    max_tokens: usize,
    thresholds: Thresholds,
}

impl Budget {
    pub fn new(max_tokens: usize, thresholds: Thresholds) -> Result<Self, BudgetError> {
        if max_tokens == 0 {
            return Err(BudgetError::InvalidMaxTokens);
        }

        for (name, value) in [
            ("warning", thresholds.warning),
            ("critical", thresholds.critical),
            ("emergency", thresholds.emergency),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(BudgetError::ThresholdOutOfRange { name, value });
            }
        }

        if !(thresholds.warning < thresholds.critical
            && thresholds.critical < thresholds.emergency)
        {
            return Err(BudgetError::ThresholdOrder {
                warning: thresholds.warning,
                critical: thresholds.critical,
                emergency: thresholds.emergency,
            });
        }

        Ok(Self {
            max_tokens,
            thresholds,
        })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Absolute token count at which `level` begins.
    pub fn tokens_at(&self, level: Level) -> usize {
        let fraction = match level {
            Level::Nominal => 0.0,
            Level::Compactable => self.thresholds.warning,
            Level::Summarizable => self.thresholds.critical,
            Level::HandoffRequired => self.thresholds.emergency,
        };
        (self.max_tokens as f64 * fraction).ceil() as usize
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_tokens: super::DEFAULT_MAX_TOKENS,
            thresholds: Thresholds::default(),
        }
    }
}

/// Severity band of the current usage, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Nominal,
    Compactable,
    Summarizable,
    HandoffRequired,
}

impl Level {
    pub fn recommendation(self) -> &'static str {
        match self {
            Level::Nominal => "Context usage is healthy; no action needed.",
            Level::Compactable => {
                "Compaction advised: remove transient output and duplicates (reversible)."
            }
            Level::Summarizable => {
                "Summarization advised: condense working documents (lossy, not reversible)."
            }
            Level::HandoffRequired => {
                "Handoff required: checkpoint and resume in a fresh session."
            }
        }
    }

    pub fn can_continue(self) -> bool {
        self != Level::HandoffRequired
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Nominal => write!(f, "nominal"),
            Level::Compactable => write!(f, "compactable"),
            Level::Summarizable => write!(f, "summarizable"),
            Level::HandoffRequired => write!(f, "handoff-required"),
        }
    }
}

/// Result of classifying a token count against a budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub level: Level,
    pub usage_fraction: f64,
    pub recommendation: &'static str,
    pub can_continue: bool,
}

/// Map a token count onto a level. Lower bounds are inclusive: usage exactly at a
/// threshold belongs to the more severe band.
pub fn classify(current_tokens: usize, budget: &Budget) -> Classification {
    let usage_fraction = current_tokens as f64 / budget.max_tokens as f64;
    let t = budget.thresholds;

    let level = if usage_fraction >= t.emergency {
        Level::HandoffRequired
    } else if usage_fraction >= t.critical {
        Level::Summarizable
    } else if usage_fraction >= t.warning {
        Level::Compactable
    } else {
        Level::Nominal
    };

    Classification {
        level,
        usage_fraction,
        recommendation: level.recommendation(),
        can_continue: level.can_continue(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Budget {
        Budget::new(
            80_000,
            Thresholds {
                warning: 0.7,
                critical: 0.85,
                emergency: 0.95,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_budget_rejects_zero_max() {
        assert_eq!(
            Budget::new(0, Thresholds::default()),
            Err(BudgetError::InvalidMaxTokens)
        );
    }

    #[test]
    fn test_budget_rejects_unordered_thresholds() {
        let result = Budget::new(
            1000,
            Thresholds {
                warning: 0.85,
                critical: 0.7,
                emergency: 0.95,
            },
        );
        assert!(matches!(result, Err(BudgetError::ThresholdOrder { .. })));

        let equal = Budget::new(
            1000,
            Thresholds {
                warning: 0.7,
                critical: 0.7,
                emergency: 0.95,
            },
        );
        assert!(matches!(equal, Err(BudgetError::ThresholdOrder { .. })));
    }

    #[test]
    fn test_budget_rejects_out_of_range() {
        let result = Budget::new(
            1000,
            Thresholds {
                warning: 0.0,
                critical: 0.5,
                emergency: 0.9,
            },
        );
        assert!(matches!(
            result,
            Err(BudgetError::ThresholdOutOfRange {
                name: "warning",
                ..
            })
        ));

        let above = Budget::new(
            1000,
            Thresholds {
                warning: 0.5,
                critical: 0.9,
                emergency: 1.2,
            },
        );
        assert!(matches!(
            above,
            Err(BudgetError::ThresholdOutOfRange {
                name: "emergency",
                ..
            })
        ));
    }

    #[test]
    fn test_emergency_may_equal_one() {
        assert!(
            Budget::new(
                1000,
                Thresholds {
                    warning: 0.5,
                    critical: 0.8,
                    emergency: 1.0,
                },
            )
            .is_ok()
        );
    }

    #[test]
    fn test_classify_example_scenario() {
        let b = budget();
        assert_eq!(classify(10_000, &b).level, Level::Nominal);
        assert_eq!(classify(60_000, &b).level, Level::Compactable);
        assert_eq!(classify(70_000, &b).level, Level::Summarizable);
        assert_eq!(classify(79_000, &b).level, Level::HandoffRequired);
    }

    #[test]
    fn test_classify_boundaries_are_inclusive() {
        let b = budget();
        assert_eq!(classify(55_999, &b).level, Level::Nominal);
        assert_eq!(classify(56_000, &b).level, Level::Compactable);
        assert_eq!(classify(68_000, &b).level, Level::Summarizable);
        assert_eq!(classify(76_000, &b).level, Level::HandoffRequired);
    }

    #[test]
    fn test_classify_is_monotonic_and_can_continue_iff_not_handoff() {
        let b = budget();
        let mut previous = Level::Nominal;
        for tokens in (0..=80_000).step_by(250) {
            let c = classify(tokens, &b);
            assert!(c.level >= previous, "level regressed at {}", tokens);
            assert_eq!(c.can_continue, c.level != Level::HandoffRequired);
            previous = c.level;
        }
        assert_eq!(previous, Level::HandoffRequired);
    }

    #[test]
    fn test_classify_over_budget() {
        let c = classify(200_000, &budget());
        assert_eq!(c.level, Level::HandoffRequired);
        assert!(c.usage_fraction > 1.0);
        assert!(!c.can_continue);
    }

    #[test]
    fn test_recommendation_is_level_keyed() {
        let b = budget();
        assert!(classify(60_000, &b).recommendation.contains("Compaction"));
        assert!(classify(70_000, &b).recommendation.contains("Summarization"));
        assert!(classify(78_000, &b).recommendation.contains("Handoff"));
    }

    #[test]
    fn test_tokens_at() {
        let b = budget();
        assert_eq!(b.tokens_at(Level::Nominal), 0);
        assert_eq!(b.tokens_at(Level::Compactable), 56_000);
        assert_eq!(b.tokens_at(Level::HandoffRequired), 76_000);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::HandoffRequired.to_string(), "handoff-required");
        assert_eq!(Level::Nominal.to_string(), "nominal");
    }
}
