//! Confidence scoring for stitched edges.
//!
//! Scoring runs in two stages: a closed set of signals (the strongest one
//! sets the base, each extra firing signal adds a small bonus, capped at 1.0)
//! followed by multiplicative penalties. The function is pure: recomputing a
//! stored edge's score from its endpoints under the same rule-set version
//! must reproduce the stored confidence exactly.

use crate::tokens;
use serde::Serialize;
use std::collections::HashSet;

/// Monotonic version stamped on stitched edges so scoring changes are
/// detectable. Bump when signal weights or penalty rules change.
pub const RULE_SET_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    ExactMatch,
    NormalizedMatch,
    TokenOverlapHigh,
    TokenOverlapMedium,
    SuffixMatch,
    PrefixMatch,
    Contains,
    SingleToken,
}

impl Signal {
    pub fn weight(&self) -> f64 {
        match self {
            Signal::ExactMatch => 1.0,
            Signal::NormalizedMatch => 0.90,
            Signal::TokenOverlapHigh => 0.80,
            Signal::TokenOverlapMedium => 0.60,
            Signal::SuffixMatch => 0.55,
            Signal::PrefixMatch => 0.50,
            Signal::Contains => 0.40,
            Signal::SingleToken => 0.30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::ExactMatch => "exact_match",
            Signal::NormalizedMatch => "normalized_match",
            Signal::TokenOverlapHigh => "token_overlap_high",
            Signal::TokenOverlapMedium => "token_overlap_medium",
            Signal::SuffixMatch => "suffix_match",
            Signal::PrefixMatch => "prefix_match",
            Signal::Contains => "contains",
            Signal::SingleToken => "single_token",
        }
    }
}

/// Bonus added per firing signal beyond the strongest one.
const EXTRA_SIGNAL_BONUS: f64 = 0.02;

// ---------------------------------------------------------------------------
// Penalties
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Penalty {
    ShortToken,
    CommonToken,
    Ambiguity,
    LowValueToken,
}

impl Penalty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Penalty::ShortToken => "short_token",
            Penalty::CommonToken => "common_token",
            Penalty::Ambiguity => "ambiguity",
            Penalty::LowValueToken => "low_value_token",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConfidenceConfig {
    /// Shared significant tokens needed for TOKEN_OVERLAP_HIGH.
    pub min_token_overlap_high: usize,
    /// Tokens shorter than this are weak evidence.
    pub short_token_len: usize,
    /// Viable candidates (including the scored pair) at or above which the
    /// ambiguity penalty applies.
    pub ambiguity_threshold: usize,
    /// Tokens so generic they prove nothing on their own.
    pub common_tokens: HashSet<String>,
    /// Environment/vendor qualifiers that rarely identify an artifact.
    pub low_value_tokens: HashSet<String>,
    pub short_token_multiplier: f64,
    pub common_token_multiplier: f64,
    pub ambiguity_multiplier: f64,
    pub low_value_multiplier: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        let common = ["id", "name", "type", "key", "value", "var", "data", "info"];
        let low_value = [
            "prod", "dev", "stage", "staging", "test", "aws", "gcp", "azure", "k8s", "main",
            "master", "default", "local",
        ];
        ConfidenceConfig {
            min_token_overlap_high: 3,
            short_token_len: 3,
            ambiguity_threshold: 3,
            common_tokens: common.iter().map(|s| s.to_string()).collect(),
            low_value_tokens: low_value.iter().map(|s| s.to_string()).collect(),
            short_token_multiplier: 0.5,
            common_token_multiplier: 0.5,
            ambiguity_multiplier: 0.6,
            low_value_multiplier: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SignalResult {
    pub signal: Signal,
    pub weight: f64,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PenaltyResult {
    pub penalty: Penalty,
    pub multiplier: f64,
    pub reason: String,
}

/// Score plus the structured explanation of how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceResult {
    pub score: f64,
    /// Signals that fired.
    pub signals: Vec<SignalResult>,
    /// Penalties that actually reduced the score.
    pub penalties: Vec<PenaltyResult>,
    pub matched_tokens: Vec<String>,
    pub alternative_match_count: usize,
    pub explanation: String,
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculator {
    pub config: ConfidenceConfig,
}

impl ConfidenceCalculator {
    pub fn new(config: ConfidenceConfig) -> Self {
        ConfidenceCalculator { config }
    }

    /// Score a candidate pair. `alternative_match_count` is the number of
    /// viable candidates the same source matched under the same rule,
    /// including this pair.
    pub fn calculate(
        &self,
        source_name: &str,
        target_name: &str,
        source_tokens: &[String],
        target_tokens: &[String],
        alternative_match_count: usize,
    ) -> ConfidenceResult {
        let matched_tokens = tokens::shared_significant(source_tokens, target_tokens);

        let evaluated =
            self.evaluate_signals(source_name, target_name, source_tokens, target_tokens, &matched_tokens);
        let fired: Vec<SignalResult> = evaluated.into_iter().filter(|s| s.matched).collect();
        let base = base_score(&fired);

        // A full-name match (exact or normalized) is evidence enough that
        // short shared tokens are not a coincidence.
        let name_level = fired
            .iter()
            .any(|s| matches!(s.signal, Signal::ExactMatch | Signal::NormalizedMatch));
        let penalties =
            self.evaluate_penalties_inner(&matched_tokens, alternative_match_count, name_level);
        let applied: Vec<PenaltyResult> =
            penalties.into_iter().filter(|p| p.multiplier < 1.0).collect();

        let score = applied.iter().fold(base, |acc, p| acc * p.multiplier);

        let explanation = build_explanation(&fired, &applied);
        ConfidenceResult {
            score,
            signals: fired,
            penalties: applied,
            matched_tokens,
            alternative_match_count,
            explanation,
        }
    }

    fn evaluate_signals(
        &self,
        source_name: &str,
        target_name: &str,
        source_tokens: &[String],
        target_tokens: &[String],
        matched_tokens: &[String],
    ) -> Vec<SignalResult> {
        let exact = source_name == target_name;
        let source_norm = tokens::normalize(source_name);
        let target_norm = tokens::normalize(target_name);
        let normalized = !exact && !source_norm.is_empty() && source_norm == target_norm;

        let overlap = matched_tokens.len();
        let high = overlap >= self.config.min_token_overlap_high;
        let medium = !high && overlap == 2;

        let suffix = tokens::is_suffix(source_tokens, target_tokens)
            || tokens::is_suffix(target_tokens, source_tokens);
        let prefix = tokens::is_prefix(source_tokens, target_tokens)
            || tokens::is_prefix(target_tokens, source_tokens);

        // Proper non-edge substring of the normalized forms.
        let contains = is_inner_substring(&source_norm, &target_norm)
            || is_inner_substring(&target_norm, &source_norm);

        let any_other = exact || normalized || high || medium || suffix || prefix || contains;
        let single = !any_other && overlap == 1;

        let mk = |signal: Signal, matched: bool| SignalResult {
            signal,
            weight: signal.weight(),
            matched,
        };
        vec![
            mk(Signal::ExactMatch, exact),
            mk(Signal::NormalizedMatch, normalized),
            mk(Signal::TokenOverlapHigh, high),
            mk(Signal::TokenOverlapMedium, medium),
            mk(Signal::SuffixMatch, suffix),
            mk(Signal::PrefixMatch, prefix),
            mk(Signal::Contains, contains),
            mk(Signal::SingleToken, single),
        ]
    }

    /// Penalty evaluation against the shared-token set alone (no signal
    /// context). Exposed for token-level calibration tests.
    pub fn evaluate_penalties(
        &self,
        matched_tokens: &[String],
        alt_count: usize,
    ) -> Vec<PenaltyResult> {
        self.evaluate_penalties_inner(matched_tokens, alt_count, false)
    }

    fn evaluate_penalties_inner(
        &self,
        matched_tokens: &[String],
        alt_count: usize,
        name_level_match: bool,
    ) -> Vec<PenaltyResult> {
        let cfg = &self.config;
        let mut out = Vec::new();

        // A short shared token is weak evidence, unless the whole names
        // already matched.
        let has_short = matched_tokens.iter().any(|t| t.len() < cfg.short_token_len);
        let short_fires = !matched_tokens.is_empty() && has_short && !name_level_match;
        out.push(PenaltyResult {
            penalty: Penalty::ShortToken,
            multiplier: if short_fires { cfg.short_token_multiplier } else { 1.0 },
            reason: if short_fires {
                "match relies on short shared tokens".to_string()
            } else {
                String::new()
            },
        });

        let all_common = !matched_tokens.is_empty()
            && matched_tokens.iter().all(|t| cfg.common_tokens.contains(t));
        out.push(PenaltyResult {
            penalty: Penalty::CommonToken,
            multiplier: if all_common { cfg.common_token_multiplier } else { 1.0 },
            reason: if all_common {
                "shared tokens are all generic".to_string()
            } else {
                String::new()
            },
        });

        let ambiguous = alt_count >= cfg.ambiguity_threshold;
        out.push(PenaltyResult {
            penalty: Penalty::Ambiguity,
            multiplier: if ambiguous { cfg.ambiguity_multiplier } else { 1.0 },
            reason: if ambiguous {
                format!("{alt_count} viable candidates for this source")
            } else {
                String::new()
            },
        });

        let all_low_value = !matched_tokens.is_empty()
            && matched_tokens.iter().all(|t| cfg.low_value_tokens.contains(t));
        out.push(PenaltyResult {
            penalty: Penalty::LowValueToken,
            multiplier: if all_low_value { cfg.low_value_multiplier } else { 1.0 },
            reason: if all_low_value {
                "shared tokens are all environment qualifiers".to_string()
            } else {
                String::new()
            },
        });

        out
    }

    /// Human-readable confidence bucket.
    pub fn level(score: f64) -> &'static str {
        if score >= 0.9 {
            "HIGH"
        } else if score >= 0.7 {
            "MEDIUM"
        } else if score >= 0.5 {
            "LOW"
        } else {
            "VERY LOW"
        }
    }
}

/// Max firing weight plus a small bonus per extra firing signal, capped at 1.
fn base_score(fired: &[SignalResult]) -> f64 {
    let max = fired.iter().map(|s| s.weight).fold(0.0_f64, f64::max);
    if max == 0.0 {
        return 0.0;
    }
    let bonus = EXTRA_SIGNAL_BONUS * (fired.len().saturating_sub(1)) as f64;
    (max + bonus).min(1.0)
}

/// Is `inner` a proper substring of `outer` touching neither edge?
fn is_inner_substring(inner: &str, outer: &str) -> bool {
    if inner.is_empty() || inner.len() >= outer.len() {
        return false;
    }
    match outer.find(inner) {
        Some(pos) => pos > 0 && pos + inner.len() < outer.len(),
        None => false,
    }
}

fn build_explanation(fired: &[SignalResult], applied: &[PenaltyResult]) -> String {
    let signals = if fired.is_empty() {
        "(none)".to_string()
    } else {
        fired
            .iter()
            .map(|s| format!("{}({:.2})", s.signal.as_str(), s.weight))
            .collect::<Vec<_>>()
            .join("+")
    };
    let penalties = if applied.is_empty() {
        "None".to_string()
    } else {
        applied
            .iter()
            .map(|p| format!("{}(x{:.2})", p.penalty.as_str(), p.multiplier))
            .collect::<Vec<_>>()
            .join("+")
    };
    format!("Signals: {signals}; Penalties: {penalties}")
}
