//! OpenAPI documentation configuration.
//!
//! [`api::ApiDoc`] documents the account endpoints at `/authentication/*` and the versioned API at
//! `/api/v1/*`. It is served as JSON at `/api-docs/openapi.json` and rendered at `/docs`.

pub mod api;

pub use api::ApiDoc;
