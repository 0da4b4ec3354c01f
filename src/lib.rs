//! MockMate Server
//!
//! A local mock HTTP server. Mock definitions are created at runtime through
//! an admin API, grouped into scenarios, and served back to any client that
//! calls a matching method and path.
//!
//! # Features
//!
//! - **Path Patterns**: Literal segments, `:name` parameters and a trailing `*`
//! - **Deterministic Matching**: Specificity, exact method, priority, recency
//! - **Scenarios**: Named partitions with parent fallback down to `default`
//! - **Scenario Override**: Per-request `X-MockMate-Scenario` header
//! - **Dynamic Templates**: `:name` substitution and Handlebars expressions
//! - **Latency Simulation**: Fixed or random delays per definition
//! - **Durable Catalog**: JSON snapshot rewritten atomically on every change
//!
//! # Example Definition
//!
//! ```json
//! {
//!   "scenario": "default",
//!   "method": "GET",
//!   "path_pattern": "/orders/:id",
//!   "response": {
//!     "status": 200,
//!     "body": { "id": ":id", "fetched_at": "{{now}}" }
//!   }
//! }
//! ```
//!
//! `POST` it to `/api/admin/mocks`, then `GET /orders/7` answers
//! `{"id": "7", ...}`.

pub mod admin;
pub mod config;
pub mod definition;
pub mod descriptor;
pub mod error;
pub mod handler;
pub mod matcher;
pub mod pattern;
pub mod responder;
pub mod server;
pub mod store;
pub mod template;

pub use config::MockMateConfig;
pub use definition::{MockDefinition, NewMockDefinition, Scenario, DEFAULT_SCENARIO};
pub use descriptor::RequestDescriptor;
pub use error::{StorageError, StoreError, ValidationErrors};
pub use handler::AppState;
pub use matcher::{Matcher, Resolution};
pub use pattern::PathPattern;
pub use responder::{RenderedResponse, Responder};
pub use server::build_router;
pub use store::DefinitionStore;
