//! Intent routing: question text to tool tags and skills.
//!
//! An ordered table of case-insensitive keyword rules decides which tool
//! tags a question unlocks. A second table triggers skills, which add a
//! directive fragment and their own required tags. Resolution is a pure
//! function of the text.

use regex::Regex;
use serde::Serialize;

use crate::error::{AgentError, Result};

/// Tags used when no rule matches. Read-only data tools only.
pub const DEFAULT_TAGS: &[&str] = &["data", "stats", "history"];

// ─────────────────────────────────────────────────────────────────────────────
// Rule tables
// ─────────────────────────────────────────────────────────────────────────────

const INTENT_RULES: &[(&str, &[&str])] = &[
    (
        r"search|google|find online|look up|web|browse|internet|who is|what is .+ currently",
        &["search", "web"],
    ),
    (
        r"notion|backup|export|sync|database backup",
        &["storage", "notion", "backup"],
    ),
    (r"email|mail|send message|inbox", &["communication", "mail"]),
    (
        r"map|location|directions|geocode|nearby|address",
        &["maps", "location"],
    ),
    (r"api|http|fetch url|endpoint|webhook", &["http", "api"]),
    (
        r"history|last week|trend|logged|entries|how much|how many|compare|breakdown",
        &["data", "stats", "history"],
    ),
    (
        r"insights|pattern|trend|consistency|best day|worst|improve|bottleneck",
        &["analytics", "insights"],
    ),
    (
        r"todo|todos|to-do|to do list|task|tasks|checklist|plan my day",
        &["todo", "task", "productivity"],
    ),
];

/// A directive fragment with extra tool requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Skill {
    pub name: &'static str,
    #[serde(skip)]
    pub directive: &'static str,
    pub required_tags: &'static [&'static str],
}

/// Every skill, in trigger order.
pub const SKILLS: &[(&str, Skill)] = &[
    (
        r"quest|challenge|new quest|create quest|suggest a quest",
        Skill {
            name: "quest_builder",
            directive: include_str!("../skills/quest_builder.md"),
            required_tags: &["quest", "gamification"],
        },
    ),
    (
        r"research|deep search|investigate|find out about|compare options",
        Skill {
            name: "research",
            directive: include_str!("../skills/research.md"),
            required_tags: &["search", "web"],
        },
    ),
    (
        r"coach|strategy|advice|recommend|prioritize|what should i",
        Skill {
            name: "coach",
            directive: include_str!("../skills/coach.md"),
            required_tags: &["analytics", "insights"],
        },
    ),
];

/// Look up a skill by name.
pub fn skill(name: &str) -> Option<&'static Skill> {
    SKILLS.iter().map(|(_, s)| s).find(|s| s.name == name)
}

fn compile(alternatives: &str) -> Result<Regex> {
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives))
        .map_err(|e| AgentError::config(format!("invalid intent pattern: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Tags and skills selected for one question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    /// Tool tags, deduplicated, in first-seen order.
    pub tags: Vec<String>,
    /// Triggered skills, deduplicated, in table order.
    pub skills: Vec<Skill>,
    /// No rule matched and the [`DEFAULT_TAGS`] stand in.
    pub fallback: bool,
}

impl RouteDecision {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn skill_names(&self) -> Vec<String> {
        self.skills.iter().map(|s| s.name.to_string()).collect()
    }

    /// Add tags not already present.
    pub fn add_tags<S: AsRef<str>>(&mut self, tags: &[S]) {
        for tag in tags {
            let tag = tag.as_ref();
            if !self.has_tag(tag) {
                self.tags.push(tag.to_string());
            }
        }
    }

    /// Skill fragments appended to a directive.
    pub fn apply_skills(&self, directive: &str) -> String {
        let mut out = directive.to_string();
        for skill in &self.skills {
            out.push_str(&format!(
                "\n\n## Active Skill: {}\n{}",
                skill.name,
                skill.directive.trim()
            ));
        }
        out
    }
}

/// Ordered keyword router. Compiled once, shared read-only.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    rules: Vec<(Regex, &'static [&'static str])>,
    skills: Vec<(Regex, Skill)>,
}

impl IntentRouter {
    pub fn new() -> Result<Self> {
        let rules = INTENT_RULES
            .iter()
            .map(|(pattern, tags)| Ok((compile(pattern)?, *tags)))
            .collect::<Result<Vec<_>>>()?;
        let skills = SKILLS
            .iter()
            .map(|(pattern, skill)| Ok((compile(pattern)?, *skill)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules, skills })
    }

    /// Resolve a question.
    ///
    /// Blank text resolves to nothing. Otherwise the tags of every matching
    /// rule are unioned; when no rule matches the [`DEFAULT_TAGS`] are used.
    /// Triggered skills add their required tags on top.
    pub fn resolve(&self, question: &str) -> RouteDecision {
        let text = question.trim();
        let mut decision = RouteDecision::default();
        if text.is_empty() {
            return decision;
        }

        for (pattern, tags) in &self.rules {
            if pattern.is_match(text) {
                decision.add_tags(*tags);
            }
        }
        if decision.tags.is_empty() {
            decision.add_tags(DEFAULT_TAGS);
            decision.fallback = true;
        }

        for (pattern, skill) in &self.skills {
            if pattern.is_match(text) && !decision.skills.iter().any(|s| s.name == skill.name) {
                decision.add_tags(skill.required_tags);
                decision.skills.push(*skill);
            }
        }
        decision
    }
}
