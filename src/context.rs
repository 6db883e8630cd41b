//! Capability-scoped context assembly.
//!
//! The page is an external, untrusted, possibly-incomplete source: every
//! scope extraction degrades to an empty value rather than failing, because
//! the user must always be able to send a message even when the surrounding
//! page cannot be read. Assembly is pure over a [`PageSnapshot`] and never
//! returns an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::capability::{ContextScope, PermissionSet};
use crate::session::MemoryItem;

/// Memory items appended to a request when the tier permits memory.
pub const RECENT_MEMORY_ITEMS: usize = 5;
/// Bounded slice sizes per scope.
pub const MAX_PROJECT_SUMMARIES: usize = 10;
pub const MAX_METRIC_READINGS: usize = 12;
pub const MAX_TEAM_NOTES: usize = 10;
/// Field truncation lengths, in characters.
pub const MAX_NAME_LEN: usize = 80;
pub const MAX_DETAIL_LEN: usize = 120;

/// Facts scraped from the current page before a request is assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub page: String,
    pub headline: Option<String>,
    pub projects: Vec<ProjectSummary>,
    pub metrics: Vec<MetricReading>,
    pub team: Vec<TeamNote>,
    pub admin_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub name: String,
    pub status: String,
    pub due: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricReading {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamNote {
    pub member: String,
    pub note: String,
}

/// Best-effort intent classification over the raw input text.
///
/// A heuristic signal forwarded to the backend, not a guarantee. Matching is
/// deterministic and case-insensitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSignals {
    pub is_question: bool,
    pub mentions_deadline: bool,
    pub mentions_urgency: bool,
    pub requests_automation: bool,
}

const DEADLINE_KEYWORDS: [&str; 5] = ["deadline", "due", "overdue", "by tomorrow", "end of day"];
const URGENCY_KEYWORDS: [&str; 5] = ["urgent", "asap", "immediately", "right away", "critical"];
const AUTOMATION_KEYWORDS: [&str; 5] = ["agent", "automate", "automation", "schedule", "workflow"];

impl IntentSignals {
    #[must_use]
    pub fn classify(input: &str) -> Self {
        let lowered = input.to_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|keyword| lowered.contains(keyword));

        Self {
            is_question: input.contains('?'),
            mentions_deadline: mentions(&DEADLINE_KEYWORDS),
            mentions_urgency: mentions(&URGENCY_KEYWORDS),
            requests_automation: mentions(&AUTOMATION_KEYWORDS),
        }
    }
}

/// Assembled, permission-filtered request context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextObject {
    scopes: BTreeMap<ContextScope, Value>,
    memory: Vec<MemoryItem>,
    intent: IntentSignals,
}

impl ContextObject {
    #[must_use]
    pub fn scope_keys(&self) -> Vec<ContextScope> {
        self.scopes.keys().copied().collect()
    }

    #[must_use]
    pub fn memory(&self) -> &[MemoryItem] {
        &self.memory
    }

    #[must_use]
    pub fn intent(&self) -> IntentSignals {
        self.intent
    }

    /// Wire form: scope-keyed data plus the intent block and, when present,
    /// the appended memory window.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (scope, data) in &self.scopes {
            object.insert(scope.as_str().to_string(), data.clone());
        }
        object.insert(
            "intent".to_string(),
            serde_json::to_value(self.intent).unwrap_or(Value::Null),
        );
        if !self.memory.is_empty() {
            let items: Vec<Value> = self
                .memory
                .iter()
                .map(|item| json!({ "role": item.role, "content": item.content }))
                .collect();
            object.insert("memory".to_string(), Value::Array(items));
        }
        Value::Object(object)
    }
}

/// Builds the context for one outbound message.
///
/// Only scopes in `permissions.allowed_context_scopes` are consulted; the
/// result never contains a key outside that set, for any snapshot. Never
/// fails.
#[must_use]
pub fn assemble(
    permissions: &PermissionSet,
    snapshot: &PageSnapshot,
    memory: &[MemoryItem],
    input: &str,
) -> ContextObject {
    let mut scopes = BTreeMap::new();

    for scope in &permissions.allowed_context_scopes {
        let data = match scope {
            ContextScope::PageBasic => extract_page_basic(snapshot),
            ContextScope::ProjectData => extract_projects(snapshot),
            ContextScope::DashboardMetrics => extract_metrics(snapshot),
            ContextScope::TeamData => extract_team(snapshot),
            ContextScope::SystemAdmin => extract_admin(snapshot),
        };
        scopes.insert(*scope, data);
    }

    let memory = if permissions.allow_memory {
        let skip = memory.len().saturating_sub(RECENT_MEMORY_ITEMS);
        memory[skip..].to_vec()
    } else {
        Vec::new()
    };

    ContextObject {
        scopes,
        memory,
        intent: IntentSignals::classify(input),
    }
}

fn extract_page_basic(snapshot: &PageSnapshot) -> Value {
    if snapshot.page.trim().is_empty() {
        warn!(scope = "page-basic", "page identity hook absent, sending empty scope");
        return json!({});
    }

    let mut data = json!({ "page": clip(&snapshot.page, MAX_NAME_LEN) });
    if let Some(headline) = snapshot.headline.as_deref().filter(|value| !value.trim().is_empty()) {
        data["headline"] = Value::String(clip(headline, MAX_DETAIL_LEN));
    }
    data
}

fn extract_projects(snapshot: &PageSnapshot) -> Value {
    let projects: Vec<Value> = snapshot
        .projects
        .iter()
        .take(MAX_PROJECT_SUMMARIES)
        .map(|project| {
            let mut data = json!({
                "name": clip(&project.name, MAX_NAME_LEN),
                "status": clip(&project.status, MAX_DETAIL_LEN),
            });
            if let Some(due) = project.due.as_deref() {
                data["due"] = Value::String(clip(due, MAX_NAME_LEN));
            }
            data
        })
        .collect();

    if projects.is_empty() {
        warn!(scope = "project-data", "no project hooks found, sending empty scope");
    }
    Value::Array(projects)
}

fn extract_metrics(snapshot: &PageSnapshot) -> Value {
    let metrics: Vec<Value> = snapshot
        .metrics
        .iter()
        .take(MAX_METRIC_READINGS)
        .map(|metric| {
            json!({
                "label": clip(&metric.label, MAX_NAME_LEN),
                "value": clip(&metric.value, MAX_NAME_LEN),
            })
        })
        .collect();

    if metrics.is_empty() {
        warn!(scope = "dashboard-metrics", "no metric hooks found, sending empty scope");
    }
    Value::Array(metrics)
}

fn extract_team(snapshot: &PageSnapshot) -> Value {
    let team: Vec<Value> = snapshot
        .team
        .iter()
        .take(MAX_TEAM_NOTES)
        .map(|note| {
            json!({
                "member": clip(&note.member, MAX_NAME_LEN),
                "note": clip(&note.note, MAX_DETAIL_LEN),
            })
        })
        .collect();

    if team.is_empty() {
        warn!(scope = "team-data", "no team hooks found, sending empty scope");
    }
    Value::Array(team)
}

fn extract_admin(snapshot: &PageSnapshot) -> Value {
    let flags: Vec<Value> = snapshot
        .admin_flags
        .iter()
        .map(|flag| Value::String(clip(flag, MAX_NAME_LEN)))
        .collect();
    json!({ "flags": flags })
}

/// Character-boundary-safe truncation.
fn clip(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        value.chars().take(max).collect()
    }
}
