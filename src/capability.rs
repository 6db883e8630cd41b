//! Tier-to-capability resolution.
//!
//! The resolver is the single source of truth for what a session may do:
//! permissions are derived from an explicit tier table, never inferred from
//! ambient state. Unknown tiers fail closed to the lowest-privilege set.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::NucleusError;

/// Named privilege level assigned externally to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Basic,
    Enhanced,
    Complete,
    Staff,
    Admin,
}

impl Tier {
    /// All tiers in ascending rank order.
    pub const ALL: [Tier; 5] = [
        Tier::Basic,
        Tier::Enhanced,
        Tier::Complete,
        Tier::Staff,
        Tier::Admin,
    ];

    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Basic => 0,
            Self::Enhanced => 1,
            Self::Complete => 2,
            Self::Staff => 3,
            Self::Admin => 4,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim() {
            "basic" => Self::Basic,
            "enhanced" => Self::Enhanced,
            "complete" => Self::Complete,
            "staff" => Self::Staff,
            "admin" => Self::Admin,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Enhanced => "enhanced",
            Self::Complete => "complete",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = NucleusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| NucleusError::UnknownTier(value.to_string()))
    }
}

/// Backend worker capability exposed conditionally based on tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Triage,
    Scheduler,
    Drafting,
    Pipeline,
    Insights,
    Escalation,
    Provisioning,
}

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Scheduler => "scheduler",
            Self::Drafting => "drafting",
            Self::Pipeline => "pipeline",
            Self::Insights => "insights",
            Self::Escalation => "escalation",
            Self::Provisioning => "provisioning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "triage" => Self::Triage,
            "scheduler" => Self::Scheduler,
            "drafting" => Self::Drafting,
            "pipeline" => Self::Pipeline,
            "insights" => Self::Insights,
            "escalation" => Self::Escalation,
            "provisioning" => Self::Provisioning,
            _ => return None,
        })
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag controlling which page-derived facts may leave the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContextScope {
    #[serde(rename = "page-basic")]
    PageBasic,
    #[serde(rename = "project-data")]
    ProjectData,
    #[serde(rename = "dashboard-metrics")]
    DashboardMetrics,
    #[serde(rename = "team-data")]
    TeamData,
    #[serde(rename = "system-admin")]
    SystemAdmin,
}

impl ContextScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageBasic => "page-basic",
            Self::ProjectData => "project-data",
            Self::DashboardMetrics => "dashboard-metrics",
            Self::TeamData => "team-data",
            Self::SystemAdmin => "system-admin",
        }
    }
}

/// Backend scheduling priority attached to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Resolved capabilities for a tier.
///
/// Monotonic across tier ranks: every capability granted at a lower tier is
/// granted at every higher tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub allow_chat: bool,
    pub allow_memory: bool,
    pub allowed_agents: BTreeSet<AgentId>,
    pub allowed_context_scopes: BTreeSet<ContextScope>,
    pub max_response_tokens: u32,
    pub priority: Priority,
}

impl PermissionSet {
    #[must_use]
    pub fn permits_scope(&self, scope: ContextScope) -> bool {
        self.allowed_context_scopes.contains(&scope)
    }

    #[must_use]
    pub fn permits_agent(&self, agent: AgentId) -> bool {
        self.allowed_agents.contains(&agent)
    }

    /// Advisory wire form attached to outbound requests. The backend
    /// re-validates; this is a shaping hint, not a security boundary.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Resolves the permission set for a known tier. Pure and idempotent.
#[must_use]
pub fn resolve(tier: Tier) -> PermissionSet {
    let mut agents = BTreeSet::from([AgentId::Triage]);
    let mut scopes = BTreeSet::from([ContextScope::PageBasic]);

    if tier >= Tier::Enhanced {
        agents.extend([AgentId::Scheduler, AgentId::Drafting]);
        scopes.insert(ContextScope::ProjectData);
    }
    if tier >= Tier::Complete {
        agents.extend([AgentId::Pipeline, AgentId::Insights]);
        scopes.insert(ContextScope::DashboardMetrics);
    }
    if tier >= Tier::Staff {
        agents.insert(AgentId::Escalation);
        scopes.insert(ContextScope::TeamData);
    }
    if tier >= Tier::Admin {
        agents.insert(AgentId::Provisioning);
        scopes.insert(ContextScope::SystemAdmin);
    }

    let (max_response_tokens, priority) = match tier {
        Tier::Basic => (512, Priority::Low),
        Tier::Enhanced => (1024, Priority::Medium),
        Tier::Complete => (2048, Priority::High),
        Tier::Staff => (4096, Priority::High),
        Tier::Admin => (8192, Priority::Critical),
    };

    PermissionSet {
        allow_chat: true,
        allow_memory: tier >= Tier::Enhanced,
        allowed_agents: agents,
        allowed_context_scopes: scopes,
        max_response_tokens,
        priority,
    }
}

/// Resolves a tier string, failing with [`NucleusError::UnknownTier`] on
/// unrecognized input.
pub fn resolve_str(value: &str) -> Result<PermissionSet, NucleusError> {
    value.parse::<Tier>().map(resolve)
}

/// Resolves a tier string, falling back to the lowest-privilege set when the
/// tier is unrecognized. Fail-closed, never fail-open.
#[must_use]
pub fn resolve_or_lowest(value: &str) -> (Tier, PermissionSet) {
    match value.parse::<Tier>() {
        Ok(tier) => (tier, resolve(tier)),
        Err(_) => {
            warn!(tier = value, "unknown tier, falling back to basic");
            (Tier::Basic, resolve(Tier::Basic))
        }
    }
}

/// Descriptor for one catalog agent as seen by a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub display_name: &'static str,
    pub capabilities: Vec<&'static str>,
    /// Derived from membership in the tier's allowed set; never mutated
    /// independently.
    pub is_active: bool,
}

/// Fixed global agent catalog, in stable id order.
#[must_use]
pub fn catalog() -> Vec<(AgentId, &'static str, Vec<&'static str>)> {
    vec![
        (AgentId::Triage, "Inbox Triage", vec!["classify", "summarize"]),
        (AgentId::Scheduler, "Scheduler", vec!["calendar", "reminders"]),
        (AgentId::Drafting, "Drafting Assistant", vec!["compose", "edit"]),
        (AgentId::Pipeline, "Pipeline Tracker", vec!["crm", "follow-up"]),
        (AgentId::Insights, "Insights Analyst", vec!["metrics", "reporting"]),
        (AgentId::Escalation, "Escalation Desk", vec!["handoff", "oncall"]),
        (
            AgentId::Provisioning,
            "Provisioning",
            vec!["accounts", "access-control"],
        ),
    ]
}

/// Agent descriptors for a tier: the fixed catalog with `is_active` derived
/// from the tier's allowed set.
#[must_use]
pub fn agents_for(tier: Tier) -> Vec<AgentDescriptor> {
    let permissions = resolve(tier);
    catalog()
        .into_iter()
        .map(|(id, display_name, capabilities)| AgentDescriptor {
            id,
            display_name,
            capabilities,
            is_active: permissions.permits_agent(id),
        })
        .collect()
}
