//! Template engine for dynamic responses.
//!
//! Two substitutions run on every template string:
//!
//! - `{{...}}` expressions are rendered with Handlebars against the
//!   request context.
//! - `:name` tokens in the text around them are replaced by path
//!   parameters bound by the matcher. Bound values are inserted as plain
//!   text and are never themselves rendered.
//!
//! Rendering never fails. A `:name` without a bound parameter, a simple
//! `{{variable}}` that does not resolve, or any expression Handlebars
//! rejects is left in the output as literal text.

use crate::descriptor::RequestDescriptor;
use crate::matcher::MatchContext;
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext,
};
use rand::Rng;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

const HELPERS: [(&str, HelperFn); 8] = [
    ("json", json_text),
    ("uuid", uuid_text),
    ("now", now_text),
    ("timestamp", timestamp_text),
    ("random", random_text),
    ("default", default_text),
    ("upper", upper_text),
    ("lower", lower_text),
];

fn param_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"))
}

fn expression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\{?[^{}]*\}?\}\}").expect("valid regex"))
}

fn simple_variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\{\{\{?\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}?\}\}$")
            .expect("valid regex")
    })
}

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    /// Path parameters from pattern matching
    pub path: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request headers (lower-cased names)
    pub headers: HashMap<String, String>,
    /// Request method
    pub method: String,
    /// Request path
    pub request_path: String,
    /// Scenario that served the request
    pub scenario: String,
    /// Request body (as string, if text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body as JSON (if parseable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

impl TemplateContext {
    pub fn new(match_ctx: &MatchContext, descriptor: &RequestDescriptor, scenario: &str) -> Self {
        let body = descriptor.body_text().map(String::from);
        let json = body.as_deref().and_then(|s| serde_json::from_str(s).ok());

        Self {
            path: match_ctx.path_params.clone(),
            query: descriptor.query.clone(),
            headers: descriptor.headers.clone(),
            method: descriptor.method.to_string(),
            request_path: descriptor.path.clone(),
            scenario: scenario.to_string(),
            body,
            json,
        }
    }
}

/// A template context serialized once and reused for every string leaf.
struct RenderScope<'a> {
    params: &'a HashMap<String, String>,
    data: Value,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        for (name, helper) in HELPERS {
            handlebars.register_helper(name, Box::new(ValueHelper(helper)));
        }
        // Bodies are JSON or plain text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string.
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> String {
        let scope = self.scope(ctx);
        self.render_str(template, &scope)
    }

    /// Render a JSON value, substituting inside string leaves only.
    pub fn render_json(&self, json: &Value, ctx: &TemplateContext) -> Value {
        let scope = self.scope(ctx);
        self.render_json_value(json, &scope)
    }

    fn scope<'a>(&self, ctx: &'a TemplateContext) -> RenderScope<'a> {
        RenderScope {
            params: &ctx.path,
            data: serde_json::to_value(ctx).unwrap_or(Value::Null),
        }
    }

    fn render_json_value(&self, value: &Value, scope: &RenderScope<'_>) -> Value {
        match value {
            Value::String(s) => Value::String(self.render_str(s, scope)),
            Value::Array(arr) => Value::Array(
                arr.iter()
                    .map(|v| self.render_json_value(v, scope))
                    .collect(),
            ),
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), self.render_json_value(v, scope)))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    fn render_str(&self, template: &str, scope: &RenderScope<'_>) -> String {
        if !template.contains("{{") {
            return substitute_params(template, scope.params);
        }

        if has_block_expression(template) {
            // Blocks span several expressions, render the string as a whole
            let rendered = match self.handlebars.render_template(template, &scope.data) {
                Ok(rendered) => rendered,
                Err(e) => {
                    debug!(error = %e, "Template failed to render, keeping literal text");
                    template.to_string()
                }
            };
            return substitute_params(&rendered, scope.params);
        }

        // Parameters only fill the text between expressions, a bound value
        // is never rendered as a template itself
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for m in expression_re().find_iter(template) {
            out.push_str(&substitute_params(&template[last..m.start()], scope.params));
            out.push_str(&self.render_expression(m.as_str(), &scope.data));
            last = m.end();
        }
        out.push_str(&substitute_params(&template[last..], scope.params));
        out
    }

    fn render_expression(&self, expr: &str, data: &Value) -> String {
        if let Some(caps) = simple_variable_re().captures(expr) {
            let path = &caps[1];
            if !HELPERS.iter().any(|(name, _)| *name == path) && lookup(data, path).is_none() {
                return expr.to_string();
            }
        }

        match self.handlebars.render_template(expr, data) {
            Ok(rendered) => rendered,
            Err(e) => {
                debug!(
                    expression = %expr,
                    error = %e,
                    "Expression failed to render, keeping literal text"
                );
                expr.to_string()
            }
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace `:name` tokens bound in `params`; unbound tokens stay as they are.
fn substitute_params(template: &str, params: &HashMap<String, String>) -> String {
    if params.is_empty() || !template.contains(':') {
        return template.to_string();
    }
    param_token_re()
        .replace_all(template, |caps: &Captures<'_>| match params.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn has_block_expression(template: &str) -> bool {
    expression_re().find_iter(template).any(|m| {
        let inner = m.as_str().trim_start_matches('{').trim_start();
        inner.starts_with('#')
            || inner.starts_with('/')
            || inner.starts_with('^')
            || inner.starts_with("else")
    })
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(data, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

/// Helper computed from its evaluated parameters alone.
type HelperFn = fn(&[Value]) -> String;

struct ValueHelper(HelperFn);

impl HelperDef for ValueHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let params: Vec<Value> = h.params().iter().map(|p| p.value().clone()).collect();
        out.write(&(self.0)(&params))?;
        Ok(())
    }
}

/// `{{json value}}`: compact JSON; strings holding JSON are re-encoded.
fn json_text(params: &[Value]) -> String {
    match params.first() {
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .map(|json| json.to_string())
            .unwrap_or_else(|_| s.clone()),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn uuid_text(_: &[Value]) -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `{{now "%Y-%m-%d"}}`, ISO-8601 with milliseconds by default.
fn now_text(params: &[Value]) -> String {
    let format = params
        .first()
        .and_then(Value::as_str)
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");
    chrono::Utc::now().format(format).to_string()
}

/// Unix epoch milliseconds.
fn timestamp_text(_: &[Value]) -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// `{{random min max}}`, inclusive, 0..=100 by default.
fn random_text(params: &[Value]) -> String {
    let bound = |i: usize, fallback: i64| params.get(i).and_then(Value::as_i64).unwrap_or(fallback);
    let (min, max) = (bound(0, 0), bound(1, 100));
    let value = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    value.to_string()
}

/// `{{default value "fallback"}}`: fallback when value is null or empty.
fn default_text(params: &[Value]) -> String {
    match params.first() {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | Some(Value::String(_)) | None => params
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(other) => other.to_string(),
    }
}

fn upper_text(params: &[Value]) -> String {
    params.first().and_then(Value::as_str).unwrap_or_default().to_uppercase()
}

fn lower_text(params: &[Value]) -> String {
    params.first().and_then(Value::as_str).unwrap_or_default().to_lowercase()
}
