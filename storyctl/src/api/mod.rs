//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Authentication** (`/authentication/*`): Registration, login, logout
//! - **Account** (`/api/v1/users/current`): The authenticated parent account
//! - **Profiles** (`/api/v1/profiles/*`): Child profiles, family members, comfort items, traits
//!   and photos
//! - **Stories** (`/api/v1/stories/*`): Generation and the story library
//! - **Subscriptions** (`/api/v1/subscriptions/*`): Plans, usage, checkout and cancellation
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The interactive reference is served at `/docs`.

pub mod handlers;
pub mod models;
