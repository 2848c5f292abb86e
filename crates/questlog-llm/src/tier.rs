//! Cost-tiered model ladder and the forward-only escalation cursor.
//!
//! Tiers are ranked by their position in configuration: rank 0 is the
//! cheapest. A run starts at its requested tier and, when escalation is
//! allowed, may only move to higher ranks. Within a tier every candidate is
//! tried before the next tier is considered.

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, LlmError, Result};

/// Model used when configuration does not define any tier.
pub const FALLBACK_MODEL: &str = "arcee-ai/trinity-large-preview:free";

/// Name of the tier used when configuration does not define any.
pub const FALLBACK_TIER: &str = "free";

// ─────────────────────────────────────────────────────────────────────────────
// Candidates and tiers
// ─────────────────────────────────────────────────────────────────────────────

/// One provider/model pair that can serve a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    /// Model identifier as the provider expects it.
    pub id: String,
    /// Provider name, matching a backend in the provider pool.
    pub provider: String,
    /// Whether provider-side reasoning should be requested.
    pub reasoning: bool,
}

impl ModelCandidate {
    /// Create a candidate with reasoning enabled.
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            reasoning: true,
        }
    }

    /// Set whether reasoning is requested.
    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }
}

/// A rank of candidates with similar cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTier {
    /// Position in the ladder; lower is cheaper.
    pub rank: usize,
    /// Unique tier name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Candidates in the order they are tried.
    pub candidates: Vec<ModelCandidate>,
}

/// Optional vendor filter applied to every tier of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorPreference {
    Gpt,
    Claude,
    Gemini,
}

impl VendorPreference {
    /// Parse a preference name. Unknown names yield `None` (no filtering).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "gpt" => Some(Self::Gpt),
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    fn vendor(&self) -> (&'static str, &'static str) {
        match self {
            Self::Gpt => ("openai", "openai/"),
            Self::Claude => ("anthropic", "anthropic/"),
            Self::Gemini => ("google", "google/"),
        }
    }

    /// Whether a candidate belongs to this vendor.
    pub fn matches(&self, candidate: &ModelCandidate) -> bool {
        let (provider, prefix) = self.vendor();
        candidate.provider == provider || candidate.id.starts_with(prefix)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ladder
// ─────────────────────────────────────────────────────────────────────────────

/// The ordered set of tiers, read-only after construction.
#[derive(Debug, Clone)]
pub struct TierLadder {
    tiers: Vec<ModelTier>,
    default_tier: String,
}

impl TierLadder {
    /// Build a ladder from `(name, description, candidates)` in rank order.
    ///
    /// Rejects an empty ladder, duplicate tier names and empty tiers. An
    /// unknown default falls back to the lowest rank.
    pub fn new(
        tiers: Vec<(String, String, Vec<ModelCandidate>)>,
        default_tier: impl Into<String>,
    ) -> Result<Self> {
        if tiers.is_empty() {
            return Err(LlmError::Config("model ladder has no tiers".to_string()));
        }

        let mut ranked: Vec<ModelTier> = Vec::with_capacity(tiers.len());
        for (rank, (name, description, candidates)) in tiers.into_iter().enumerate() {
            if ranked.iter().any(|t| t.name == name) {
                return Err(LlmError::Config(format!("duplicate tier '{}'", name)));
            }
            if candidates.is_empty() {
                return Err(LlmError::Config(format!("tier '{}' has no models", name)));
            }
            ranked.push(ModelTier {
                rank,
                name,
                description,
                candidates,
            });
        }

        let default_tier = default_tier.into();
        let default_tier = if ranked.iter().any(|t| t.name == default_tier) {
            default_tier
        } else {
            ranked[0].name.clone()
        };

        Ok(Self {
            tiers: ranked,
            default_tier,
        })
    }

    /// The single-tier ladder used when nothing is configured.
    pub fn fallback() -> Self {
        Self {
            tiers: vec![ModelTier {
                rank: 0,
                name: FALLBACK_TIER.to_string(),
                description: "Free models".to_string(),
                candidates: vec![ModelCandidate::new(FALLBACK_MODEL, "openrouter")],
            }],
            default_tier: FALLBACK_TIER.to_string(),
        }
    }

    /// All tiers in rank order.
    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    /// The tier used when a request does not name a known one.
    pub fn default_tier(&self) -> &str {
        &self.default_tier
    }

    /// Look up a tier by name.
    pub fn tier(&self, name: &str) -> Option<&ModelTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    /// Tiers a request may use: the requested (or default) tier, followed by
    /// every higher rank when escalation is allowed.
    pub fn tier_order(&self, requested: Option<&str>, allow_escalation: bool) -> Vec<&ModelTier> {
        let start = requested
            .and_then(|name| self.tier(name))
            .or_else(|| self.tier(&self.default_tier))
            .map(|t| t.rank)
            .unwrap_or(0);

        if allow_escalation {
            self.tiers[start..].iter().collect()
        } else {
            vec![&self.tiers[start]]
        }
    }

    /// Flatten the tiers a request may use into an ordered list of
    /// candidates, dropping those the preference excludes or whose provider
    /// is not available.
    pub fn plan(
        &self,
        requested: Option<&str>,
        allow_escalation: bool,
        preference: Option<VendorPreference>,
        provider_available: impl Fn(&str) -> bool,
    ) -> Vec<PlannedModel> {
        self.tier_order(requested, allow_escalation)
            .into_iter()
            .flat_map(|tier| {
                tier.candidates.iter().map(move |c| PlannedModel {
                    tier: tier.name.clone(),
                    rank: tier.rank,
                    candidate: c.clone(),
                })
            })
            .filter(|p| preference.is_none_or(|pref| pref.matches(&p.candidate)))
            .filter(|p| provider_available(&p.candidate.provider))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Escalation
// ─────────────────────────────────────────────────────────────────────────────

/// A candidate placed in a run's escalation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedModel {
    /// Name of the tier the candidate came from.
    pub tier: String,
    /// Rank of that tier.
    pub rank: usize,
    /// The candidate itself.
    pub candidate: ModelCandidate,
}

/// A failed call recorded while escalating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationAttempt {
    /// Model that failed.
    pub model: String,
    /// Tier it belonged to.
    pub tier: String,
    /// How it failed.
    pub failure: FailureKind,
    /// Error text for diagnostics.
    pub message: String,
}

/// Forward-only cursor over a plan.
///
/// The cursor stays on a candidate while it keeps succeeding; a failure moves
/// it to the next candidate and it never moves back.
#[derive(Debug, Clone)]
pub struct Escalator {
    plan: Vec<PlannedModel>,
    cursor: usize,
}

impl Escalator {
    /// Create a cursor positioned on the first candidate of the plan.
    pub fn new(plan: Vec<PlannedModel>) -> Self {
        Self { plan, cursor: 0 }
    }

    /// The candidate the next call should use, if any remain.
    pub fn current(&self) -> Option<&PlannedModel> {
        self.plan.get(self.cursor)
    }

    /// Give up on the current candidate and return the next one.
    pub fn advance(&mut self) -> Option<&PlannedModel> {
        if self.cursor < self.plan.len() {
            self.cursor += 1;
        }
        self.current()
    }

    /// Whether every candidate has failed.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.plan.len()
    }

    /// Number of candidates in the plan.
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> TierLadder {
        TierLadder::new(
            vec![
                (
                    "free".into(),
                    "Free".into(),
                    vec![
                        ModelCandidate::new("arcee-ai/trinity-large-preview:free", "openrouter"),
                        ModelCandidate::new("google/gemma-3:free", "openrouter"),
                    ],
                ),
                (
                    "cheap".into(),
                    "Cheap".into(),
                    vec![ModelCandidate::new("openai/gpt-4o-mini", "openrouter")],
                ),
                (
                    "top".into(),
                    "Top".into(),
                    vec![
                        ModelCandidate::new("anthropic/claude-sonnet", "openrouter"),
                        ModelCandidate::new("gpt-5", "openai"),
                    ],
                ),
            ],
            "free",
        )
        .unwrap()
    }

    #[test]
    fn test_ranks_follow_configuration_order() {
        let ladder = ladder();
        let ranks: Vec<_> = ladder.tiers().iter().map(|t| (t.name.as_str(), t.rank)).collect();
        assert_eq!(ranks, vec![("free", 0), ("cheap", 1), ("top", 2)]);
    }

    #[test]
    fn test_new_rejects_bad_ladders() {
        assert!(TierLadder::new(vec![], "free").is_err());
        assert!(TierLadder::new(vec![("a".into(), "".into(), vec![])], "a").is_err());
        let dup = vec![
            ("a".into(), "".into(), vec![ModelCandidate::new("m", "p")]),
            ("a".into(), "".into(), vec![ModelCandidate::new("n", "p")]),
        ];
        assert!(TierLadder::new(dup, "a").is_err());
    }

    #[test]
    fn test_unknown_default_falls_back_to_lowest_rank() {
        let ladder = TierLadder::new(
            vec![("x".into(), "".into(), vec![ModelCandidate::new("m", "p")])],
            "missing",
        )
        .unwrap();
        assert_eq!(ladder.default_tier(), "x");
    }

    #[test]
    fn test_tier_order_without_escalation() {
        let ladder = ladder();
        let names: Vec<_> = ladder
            .tier_order(Some("cheap"), false)
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["cheap"]);
    }

    #[test]
    fn test_tier_order_only_moves_upward() {
        let ladder = ladder();
        let names: Vec<_> = ladder
            .tier_order(Some("cheap"), true)
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["cheap", "top"]);

        let from_default: Vec<_> = ladder
            .tier_order(Some("nonexistent"), true)
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(from_default, vec!["free", "cheap", "top"]);
    }

    #[test]
    fn test_plan_flattens_candidates_in_order() {
        let ladder = ladder();
        let plan = ladder.plan(None, true, None, |_| true);
        let ids: Vec<_> = plan.iter().map(|p| p.candidate.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "arcee-ai/trinity-large-preview:free",
                "google/gemma-3:free",
                "openai/gpt-4o-mini",
                "anthropic/claude-sonnet",
                "gpt-5",
            ]
        );
        let ranks: Vec<_> = plan.iter().map(|p| p.rank).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_plan_skips_unavailable_providers() {
        let plan = ladder().plan(Some("top"), true, None, |p| p == "openai");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].candidate.id, "gpt-5");
    }

    #[test]
    fn test_plan_applies_vendor_preference() {
        let plan = ladder().plan(None, true, Some(VendorPreference::Gpt), |_| true);
        let ids: Vec<_> = plan.iter().map(|p| p.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["openai/gpt-4o-mini", "gpt-5"]);
        assert_eq!(VendorPreference::from_name("Claude"), Some(VendorPreference::Claude));
        assert_eq!(VendorPreference::from_name("llama"), None);
    }

    #[test]
    fn test_escalator_is_forward_only() {
        let mut esc = Escalator::new(ladder().plan(None, true, None, |_| true));
        assert_eq!(esc.len(), 5);
        assert_eq!(esc.current().unwrap().tier, "free");
        assert_eq!(esc.advance().unwrap().tier, "free");
        assert_eq!(esc.advance().unwrap().tier, "cheap");
        assert_eq!(esc.advance().unwrap().tier, "top");
        assert_eq!(esc.advance().unwrap().tier, "top");
        assert!(esc.advance().is_none());
        assert!(esc.is_exhausted());
        assert!(esc.advance().is_none());
    }

    #[test]
    fn test_fallback_ladder() {
        let ladder = TierLadder::fallback();
        assert_eq!(ladder.default_tier(), FALLBACK_TIER);
        assert_eq!(ladder.tiers()[0].candidates[0].id, FALLBACK_MODEL);
    }
}
