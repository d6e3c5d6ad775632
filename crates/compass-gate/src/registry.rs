//! Closed, strongly typed tool allowlist.
//!
//! Every externally-effecting tool the gate may authorize is an enum variant
//! mapped to a spec (required scopes, effect classification, description,
//! required input fields). The registry is validated once at startup; an
//! unknown tool name at call time is simply not in the map.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GateError;

// =============================================================================
// Scopes
// =============================================================================

/// Capability scopes a caller may present and a tool may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    MessagesSend,
    EmailDraft,
    CalendarWrite,
    ContactsWrite,
    ActivityWrite,
    RewardsWrite,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::MessagesSend => write!(f, "messages:send"),
            Scope::EmailDraft => write!(f, "email:draft"),
            Scope::CalendarWrite => write!(f, "calendar:write"),
            Scope::ContactsWrite => write!(f, "contacts:write"),
            Scope::ActivityWrite => write!(f, "activity:write"),
            Scope::RewardsWrite => write!(f, "rewards:write"),
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "messages:send" => Ok(Scope::MessagesSend),
            "email:draft" => Ok(Scope::EmailDraft),
            "calendar:write" => Ok(Scope::CalendarWrite),
            "contacts:write" => Ok(Scope::ContactsWrite),
            "activity:write" => Ok(Scope::ActivityWrite),
            "rewards:write" => Ok(Scope::RewardsWrite),
            _ => Err(format!("Unknown scope: {}", s)),
        }
    }
}

/// Parse the space-separated scope header into a scope set.
pub fn parse_scopes(raw: &str) -> Result<BTreeSet<Scope>, GateError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(GateError::MalformedHeader {
            name: "x-compass-scope",
            reason: "scope set must not be empty".to_string(),
        });
    }
    let mut scopes = BTreeSet::new();
    for part in raw.split_whitespace() {
        let scope = part.parse::<Scope>().map_err(|reason| GateError::MalformedHeader {
            name: "x-compass-scope",
            reason,
        })?;
        scopes.insert(scope);
    }
    Ok(scopes)
}

// =============================================================================
// Tools
// =============================================================================

/// Identifiers of every tool the gate can authorize. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    SendMessage,
    DraftEmail,
    ScheduleSession,
    UpdateContact,
    LogActivity,
    AwardBadge,
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolId::SendMessage => write!(f, "send_message"),
            ToolId::DraftEmail => write!(f, "draft_email"),
            ToolId::ScheduleSession => write!(f, "schedule_session"),
            ToolId::UpdateContact => write!(f, "update_contact"),
            ToolId::LogActivity => write!(f, "log_activity"),
            ToolId::AwardBadge => write!(f, "award_badge"),
        }
    }
}

impl std::str::FromStr for ToolId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_message" => Ok(ToolId::SendMessage),
            "draft_email" => Ok(ToolId::DraftEmail),
            "schedule_session" => Ok(ToolId::ScheduleSession),
            "update_contact" => Ok(ToolId::UpdateContact),
            "log_activity" => Ok(ToolId::LogActivity),
            "award_badge" => Ok(ToolId::AwardBadge),
            _ => Err(format!("Unknown tool: {}", s)),
        }
    }
}

/// Effect classification of a tool.
///
/// `Propose` tools can run in a side-effect-free preview mode that produces
/// an artifact for human approval; `Irreversible` tools must never be
/// replayed or executed below full confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectClass {
    Propose,
    Reversible,
    Irreversible,
}

impl fmt::Display for EffectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectClass::Propose => write!(f, "propose"),
            EffectClass::Reversible => write!(f, "reversible"),
            EffectClass::Irreversible => write!(f, "irreversible"),
        }
    }
}

/// Every tool id, used for startup completeness validation.
const ALL_TOOLS: [ToolId; 6] = [
    ToolId::SendMessage,
    ToolId::DraftEmail,
    ToolId::ScheduleSession,
    ToolId::UpdateContact,
    ToolId::LogActivity,
    ToolId::AwardBadge,
];

/// Startup-validated spec for one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub id: ToolId,
    pub scopes: BTreeSet<Scope>,
    pub effect: EffectClass,
    pub description: &'static str,
    pub required_inputs: &'static [&'static str],
}

/// Read-only listing entry for the introspection endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListing {
    pub name: String,
    pub scopes: Vec<String>,
    pub effect: String,
    pub description: String,
}

/// The closed allowlist mapping tool ids to their specs.
pub struct ToolRegistry {
    specs: BTreeMap<ToolId, ToolSpec>,
}

impl ToolRegistry {
    /// The built-in registry, validated before use.
    pub fn builtin() -> Result<Self, GateError> {
        let specs = [
            ToolSpec {
                id: ToolId::SendMessage,
                scopes: BTreeSet::from([Scope::MessagesSend]),
                effect: EffectClass::Irreversible,
                description: "Send a text message to a contact on the owner's behalf",
                required_inputs: &["recipient", "body"],
            },
            ToolSpec {
                id: ToolId::DraftEmail,
                scopes: BTreeSet::from([Scope::EmailDraft]),
                effect: EffectClass::Propose,
                description: "Draft an email for the owner to review and send",
                required_inputs: &["recipient", "subject"],
            },
            ToolSpec {
                id: ToolId::ScheduleSession,
                scopes: BTreeSet::from([Scope::CalendarWrite]),
                effect: EffectClass::Reversible,
                description: "Put a coaching session on the owner's calendar",
                required_inputs: &["title", "start_at"],
            },
            ToolSpec {
                id: ToolId::UpdateContact,
                scopes: BTreeSet::from([Scope::ContactsWrite]),
                effect: EffectClass::Reversible,
                description: "Update fields on a CRM contact record",
                required_inputs: &["contact_id", "fields"],
            },
            ToolSpec {
                id: ToolId::LogActivity,
                scopes: BTreeSet::from([Scope::ActivityWrite]),
                effect: EffectClass::Reversible,
                description: "Record an activity entry against the owner's timeline",
                required_inputs: &["category"],
            },
            ToolSpec {
                id: ToolId::AwardBadge,
                scopes: BTreeSet::from([Scope::RewardsWrite]),
                effect: EffectClass::Reversible,
                description: "Award a progress badge to the owner",
                required_inputs: &["badge_id"],
            },
        ];

        let mut map = BTreeMap::new();
        for spec in specs {
            let id = spec.id;
            if map.insert(id, spec).is_some() {
                return Err(GateError::InvalidRegistry(format!(
                    "duplicate tool spec: {}",
                    id
                )));
            }
        }

        let registry = Self { specs: map };
        registry.validate()?;
        Ok(registry)
    }

    /// Startup validation: every tool id must have a spec, and every spec
    /// must carry at least one scope and a description.
    fn validate(&self) -> Result<(), GateError> {
        for id in ALL_TOOLS {
            if !self.specs.contains_key(&id) {
                return Err(GateError::InvalidRegistry(format!(
                    "tool {} has no spec",
                    id
                )));
            }
        }
        for (id, spec) in &self.specs {
            if spec.scopes.is_empty() {
                return Err(GateError::InvalidRegistry(format!(
                    "tool {} requires no scopes",
                    id
                )));
            }
            if spec.description.trim().is_empty() {
                return Err(GateError::InvalidRegistry(format!(
                    "tool {} has no description",
                    id
                )));
            }
            if spec.id != *id {
                return Err(GateError::InvalidRegistry(format!(
                    "tool {} registered under the wrong id",
                    spec.id
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: ToolId) -> &ToolSpec {
        // builtin() guarantees every ToolId has a spec.
        &self.specs[&id]
    }

    /// Read-only allowlist listing with no side effects.
    pub fn list(&self) -> Vec<ToolListing> {
        let mut listing: Vec<ToolListing> = self
            .specs
            .values()
            .map(|spec| ToolListing {
                name: spec.id.to_string(),
                scopes: spec.scopes.iter().map(|s| s.to_string()).collect(),
                effect: spec.effect.to_string(),
                description: spec.description.to_string(),
            })
            .collect();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        listing
    }
}
