//! Mock definition and scenario records.
//!
//! Admin input arrives as [`NewMockDefinition`] / [`MockPatch`] with loosely
//! typed fields so that every problem can be reported per field; the store
//! turns validated input into [`MockDefinition`] records.

use crate::error::ValidationErrors;
use crate::pattern::PathPattern;
use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The always-present fallback scenario.
pub const DEFAULT_SCENARIO: &str = "default";

const MAX_SCENARIO_NAME_LEN: usize = 64;
const MAX_DELAY_MS: u64 = 300_000;

const KNOWN_METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// Method constraint of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MethodMatcher {
    /// Matches every method
    Any,
    /// Matches one standard verb
    Exact(Method),
}

impl MethodMatcher {
    /// Parse a method name. `*` and `ANY` mean any method.
    pub fn parse(value: &str) -> Result<Self, String> {
        let upper = value.trim().to_ascii_uppercase();
        if upper == "*" || upper == "ANY" {
            return Ok(Self::Any);
        }
        if !KNOWN_METHODS.contains(&upper.as_str()) {
            return Err(format!("unrecognized method {:?}", value));
        }
        Method::from_bytes(upper.as_bytes())
            .map(Self::Exact)
            .map_err(|e| e.to_string())
    }

    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(m) => m == method,
        }
    }
}

impl fmt::Display for MethodMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(m) => f.write_str(m.as_str()),
        }
    }
}

impl TryFrom<String> for MethodMatcher {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MethodMatcher> for String {
    fn from(value: MethodMatcher) -> Self {
        value.to_string()
    }
}

/// Response body template: either text or structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BodyTemplate {
    /// Text template, substituted before any JSON parsing
    Text(String),
    /// Structured template, substitution walks string leaves
    Json(serde_json::Value),
}

/// Canned response of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers, copied verbatim
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response body template
    #[serde(default)]
    pub body: Option<BodyTemplate>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

impl ResponseDefinition {
    fn validate(&self, errors: &mut ValidationErrors) {
        if !(100..=599).contains(&self.status) {
            errors.add(
                "response.status",
                format!("invalid status code: {}", self.status),
            );
        }
        for name in self.headers.keys() {
            if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.add("response.headers", format!("invalid header name {:?}", name));
            }
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }

    fn validate(&self, errors: &mut ValidationErrors) {
        if self.max_ms > 0 && self.max_ms < self.min_ms {
            errors.add("delay", "max_ms must not be lower than min_ms");
        }
        if self.fixed_ms.max(self.max_ms).max(self.min_ms) > MAX_DELAY_MS {
            errors.add("delay", format!("delay cannot exceed {} ms", MAX_DELAY_MS));
        }
    }
}

/// A persisted mock definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockDefinition {
    pub id: String,
    pub scenario: String,
    #[serde(default)]
    pub name: Option<String>,
    pub method: MethodMatcher,
    pub path_pattern: String,
    /// Explicit priority; `None` means derived from specificity
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub response: ResponseDefinition,
    #[serde(default)]
    pub delay: Option<DelayConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store mutation counter at the last write of this record
    pub revision: u64,
}

fn default_true() -> bool {
    true
}

impl MockDefinition {
    /// Priority used for ranking.
    pub fn effective_priority(&self, pattern: &PathPattern) -> i32 {
        self.priority
            .unwrap_or_else(|| pattern.specificity().score())
    }

    /// The editable fields of this record, as admin input.
    pub fn to_input(&self) -> NewMockDefinition {
        NewMockDefinition {
            scenario: self.scenario.clone(),
            name: self.name.clone(),
            method: self.method.to_string(),
            path_pattern: self.path_pattern.clone(),
            priority: self.priority,
            enabled: self.enabled,
            response: self.response.clone(),
            delay: self.delay.clone(),
        }
    }
}

/// Admin input for creating a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMockDefinition {
    #[serde(default = "default_scenario")]
    pub scenario: String,

    #[serde(default)]
    pub name: Option<String>,

    /// HTTP verb, or `*` for any
    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, alias = "path")]
    pub path_pattern: String,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub response: ResponseDefinition,

    #[serde(default)]
    pub delay: Option<DelayConfig>,
}

fn default_scenario() -> String {
    DEFAULT_SCENARIO.to_string()
}

fn default_method() -> String {
    "*".to_string()
}

/// A definition input that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct ValidDefinition {
    pub scenario: String,
    pub name: Option<String>,
    pub method: MethodMatcher,
    pub pattern: PathPattern,
    pub priority: Option<i32>,
    pub enabled: bool,
    pub response: ResponseDefinition,
    pub delay: Option<DelayConfig>,
}

impl NewMockDefinition {
    /// Convenience constructor used by tests and seeding.
    pub fn new(method: &str, path_pattern: &str) -> Self {
        Self {
            scenario: default_scenario(),
            name: None,
            method: method.to_string(),
            path_pattern: path_pattern.to_string(),
            priority: None,
            enabled: true,
            response: ResponseDefinition::default(),
            delay: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<ValidDefinition, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let scenario = self.scenario.trim().to_string();
        if let Err(message) = validate_scenario_name(&scenario) {
            errors.add("scenario", message);
        }

        let method = match MethodMatcher::parse(&self.method) {
            Ok(m) => Some(m),
            Err(message) => {
                errors.add("method", message);
                None
            }
        };

        let pattern = if self.path_pattern.trim().is_empty() {
            errors.add("path_pattern", "path_pattern is required");
            None
        } else {
            match PathPattern::parse(&self.path_pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    errors.add("path_pattern", e.to_string());
                    None
                }
            }
        };

        self.response.validate(&mut errors);
        if let Some(delay) = &self.delay {
            delay.validate(&mut errors);
        }

        match (method, pattern) {
            (Some(method), Some(pattern)) if errors.is_empty() => Ok(ValidDefinition {
                scenario,
                name: self.name.clone(),
                method,
                pattern,
                priority: self.priority,
                enabled: self.enabled,
                response: self.response.clone(),
                delay: self.delay.clone(),
            }),
            _ => Err(errors),
        }
    }
}

/// Partial update of a definition. Absent fields are preserved; an explicit
/// `null` clears the optional ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockPatch {
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<Option<String>>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, alias = "path")]
    pub path_pattern: Option<String>,
    /// `Some(None)` returns to the priority derived from specificity
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Option<i32>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub response: Option<ResponsePatch>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay: Option<Option<DelayConfig>>,
}

/// Partial update of a response; `headers` replaces the whole map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponsePatch {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Option<BodyTemplate>>,
}

/// Present-but-null becomes `Some(None)`; `default` covers the absent case.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl MockPatch {
    /// Merge this patch into `input`.
    pub fn apply_to(self, input: &mut NewMockDefinition) {
        if let Some(scenario) = self.scenario {
            input.scenario = scenario;
        }
        if let Some(name) = self.name {
            input.name = name;
        }
        if let Some(method) = self.method {
            input.method = method;
        }
        if let Some(path_pattern) = self.path_pattern {
            input.path_pattern = path_pattern;
        }
        if let Some(priority) = self.priority {
            input.priority = priority;
        }
        if let Some(enabled) = self.enabled {
            input.enabled = enabled;
        }
        if let Some(response) = self.response {
            if let Some(status) = response.status {
                input.response.status = status;
            }
            if let Some(headers) = response.headers {
                input.response.headers = headers;
            }
            if let Some(body) = response.body {
                input.response.body = body;
            }
        }
        if let Some(delay) = self.delay {
            input.delay = delay;
        }
    }
}

/// A named partition of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Consulted when this scenario has no match
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Scenario {
    pub(crate) fn new(name: &str, now: DateTime<Utc>) -> Self {
        let parent = (name != DEFAULT_SCENARIO).then(|| DEFAULT_SCENARIO.to_string());
        Self {
            name: name.to_string(),
            parent,
            description: None,
            created_at: now,
        }
    }
}

/// Admin input for creating or editing a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSpec {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Check a scenario name for use as a catalog key and header value.
pub fn validate_scenario_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("scenario name cannot be empty".to_string());
    }
    if name.len() > MAX_SCENARIO_NAME_LEN {
        return Err(format!(
            "scenario name cannot exceed {} characters",
            MAX_SCENARIO_NAME_LEN
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!(
            "scenario name {:?} may only contain letters, digits, '-', '_' and '.'",
            name
        ));
    }
    Ok(())
}
