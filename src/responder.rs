//! Turns a resolved definition into a concrete HTTP response.

use crate::definition::BodyTemplate;
use crate::descriptor::RequestDescriptor;
use crate::matcher::Resolution;
use crate::template::{TemplateContext, TemplateEngine};
use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain";

/// A fully rendered mock response.
#[derive(Debug, Clone)]
pub struct RenderedResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Vec<u8>,
}

impl RenderedResponse {
    /// First value of `name`, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }
}

impl IntoResponse for RenderedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }
        response
    }
}

/// Renders definitions into responses.
pub struct Responder {
    engine: TemplateEngine,
    default_content_type: String,
}

impl Responder {
    pub fn new(default_content_type: impl Into<String>) -> Self {
        Self {
            engine: TemplateEngine::new(),
            default_content_type: default_content_type.into(),
        }
    }

    /// Render the resolved definition for `descriptor`. Never fails.
    pub fn render(
        &self,
        resolution: &Resolution<'_>,
        descriptor: &RequestDescriptor,
    ) -> RenderedResponse {
        let response = &resolution.definition.response;
        let ctx = TemplateContext::new(&resolution.context, descriptor, &resolution.scenario);

        let (body, inferred_type) = match &response.body {
            Some(BodyTemplate::Text(template)) => {
                let rendered = self.engine.render(template, &ctx);
                let is_json = serde_json::from_str::<serde_json::Value>(&rendered).is_ok();
                let content_type = if is_json {
                    JSON_CONTENT_TYPE
                } else {
                    TEXT_CONTENT_TYPE
                };
                (rendered.into_bytes(), content_type)
            }
            Some(BodyTemplate::Json(template)) => {
                let rendered = self.engine.render_json(template, &ctx);
                (rendered.to_string().into_bytes(), JSON_CONTENT_TYPE)
            }
            None => (Vec::new(), self.default_content_type.as_str()),
        };

        let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
            warn!(
                mock_id = %resolution.definition.id,
                status = response.status,
                "Invalid status code in definition, using 500"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        });

        let mut headers = Vec::with_capacity(response.headers.len() + 1);
        let mut has_content_type = false;
        for (name, value) in &response.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    has_content_type |= name == header::CONTENT_TYPE;
                    headers.push((name, value));
                }
                _ => warn!(
                    mock_id = %resolution.definition.id,
                    header = %name,
                    "Skipping invalid response header"
                ),
            }
        }

        if !has_content_type {
            if let Ok(value) = HeaderValue::from_str(inferred_type) {
                headers.push((header::CONTENT_TYPE, value));
            }
        }

        RenderedResponse {
            status,
            headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NewMockDefinition, DEFAULT_SCENARIO};
    use crate::matcher::Matcher;
    use crate::store::DefinitionStore;
    use axum::http::Method;

    async fn render(input: NewMockDefinition, method: Method, path: &str) -> RenderedResponse {
        let store = DefinitionStore::in_memory();
        store.create(input).await.unwrap();
        let catalog = store.snapshot().await;
        let descriptor = RequestDescriptor::new(method, path);
        let resolution = Matcher::new(&catalog)
            .resolve(&descriptor, DEFAULT_SCENARIO)
            .unwrap();
        Responder::new("application/json").render(&resolution, &descriptor)
    }

    #[tokio::test]
    async fn test_order_by_id() {
        let mut input = NewMockDefinition::new("GET", "/orders/:id");
        input.response.body = Some(BodyTemplate::Json(serde_json::json!({"id": ":id"})));

        let response = render(input, Method::GET, "/orders/7").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, serde_json::json!({"id": "7"}));
    }

    #[tokio::test]
    async fn test_status_and_headers_copied_verbatim() {
        let mut input = NewMockDefinition::new("POST", "/things");
        input.response.status = 201;
        input.response.headers.insert(
            "Content-Type".to_string(),
            "application/vnd.api+json".to_string(),
        );
        input.response.headers.insert("X-Trace".to_string(), "abc".to_string());
        input.response.body = Some(BodyTemplate::Json(serde_json::json!({"ok": true})));

        let response = render(input, Method::POST, "/things").await;
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.header("content-type"), Some("application/vnd.api+json"));
        assert_eq!(response.header("x-trace"), Some("abc"));
        assert_eq!(
            response.headers.iter().filter(|(n, _)| *n == header::CONTENT_TYPE).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_text_template_substituted_before_json_parse() {
        let mut input = NewMockDefinition::new("GET", "/users/:id");
        input.response.body = Some(BodyTemplate::Text(r#"{"user": ":id"}"#.to_string()));

        let response = render(input, Method::GET, "/users/abc").await;
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body, br#"{"user": "abc"}"#);
    }

    #[tokio::test]
    async fn test_unquoted_token_yields_text() {
        // The author forgot quotes, so the result is no longer valid JSON
        let mut input = NewMockDefinition::new("GET", "/users/:id");
        input.response.body = Some(BodyTemplate::Text(r#"{"user": :id}"#.to_string()));

        let response = render(input, Method::GET, "/users/abc").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.body, br#"{"user": abc}"#);
    }

    #[tokio::test]
    async fn test_empty_body_uses_default_content_type() {
        let mut input = NewMockDefinition::new("DELETE", "/things/:id");
        input.response.status = 204;

        let response = render(input, Method::DELETE, "/things/1").await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.body.is_empty());
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_invalid_header_value_skipped() {
        let mut input = NewMockDefinition::new("GET", "/h");
        input.response.headers.insert("X-Bad".to_string(), "line\nbreak".to_string());
        input.response.headers.insert("X-Good".to_string(), "fine".to_string());

        let response = render(input, Method::GET, "/h").await;
        assert_eq!(response.header("x-bad"), None);
        assert_eq!(response.header("x-good"), Some("fine"));
    }
}
