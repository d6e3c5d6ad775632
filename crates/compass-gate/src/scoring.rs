//! Confidence scoring for gate calls.
//!
//! A deterministic function over (tool, intent, inputs) producing a score in
//! [0, 1] and a human-readable reason. The gate maps the score to a verdict
//! against the configured thresholds: allow at or above the high threshold,
//! deny below the low threshold, require a human in between.

use crate::registry::{EffectClass, ToolId, ToolSpec};

/// Result of scoring one call.
#[derive(Debug, Clone)]
pub struct ConfidenceReport {
    pub score: f64,
    pub reason: String,
}

/// Score a call against a tool spec.
pub fn score_call(spec: &ToolSpec, intent: &str, inputs: &serde_json::Value) -> ConfidenceReport {
    let missing: Vec<&str> = spec
        .required_inputs
        .iter()
        .copied()
        .filter(|key| {
            inputs
                .get(key)
                .map(|v| v.is_null() || v.as_str().is_some_and(str::is_empty))
                .unwrap_or(true)
        })
        .collect();

    if !missing.is_empty() {
        return ConfidenceReport {
            score: 0.15,
            reason: format!("required inputs missing: {}", missing.join(", ")),
        };
    }

    // Riskier effect classes start lower; completing the picture raises the
    // score, vague or bulk-looking calls lower it.
    let mut score: f64 = match spec.effect {
        EffectClass::Propose => 0.5,
        EffectClass::Irreversible => 0.55,
        EffectClass::Reversible => 0.65,
    };
    let mut notes = vec!["all required inputs present".to_string()];
    score += 0.2;

    let intent_lower = intent.to_lowercase();
    if intent_matches_topic(spec.id, &intent_lower) {
        score += 0.15;
        notes.push("intent matches tool topic".to_string());
    } else {
        notes.push("intent does not mention the tool's topic".to_string());
    }

    if intent.trim().len() < 8 {
        score -= 0.1;
        notes.push("intent is terse".to_string());
    }

    if looks_bulk(inputs) {
        score -= 0.3;
        notes.push("inputs look like a bulk operation".to_string());
    }

    ConfidenceReport {
        score: score.clamp(0.0, 1.0),
        reason: notes.join("; "),
    }
}

fn intent_matches_topic(tool: ToolId, intent_lower: &str) -> bool {
    let keywords: &[&str] = match tool {
        ToolId::SendMessage => &["message", "text", "remind", "send"],
        ToolId::DraftEmail => &["email", "draft", "reply"],
        ToolId::ScheduleSession => &["schedule", "session", "meeting", "calendar"],
        ToolId::UpdateContact => &["contact", "crm", "update"],
        ToolId::LogActivity => &["log", "activity", "habit", "track"],
        ToolId::AwardBadge => &["badge", "xp", "reward", "milestone"],
    };
    keywords.iter().any(|k| intent_lower.contains(k))
}

fn looks_bulk(inputs: &serde_json::Value) -> bool {
    if inputs.get("bulk").and_then(|v| v.as_bool()) == Some(true) {
        return true;
    }
    inputs
        .get("recipients")
        .and_then(|v| v.as_array())
        .is_some_and(|list| list.len() > 5)
}
