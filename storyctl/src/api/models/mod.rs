//! API request and response data models.
//!
//! API models are distinct from database models so the public contract and the storage layout
//! can change independently. Every model is annotated with `utoipa` for the generated docs.
//!
//! - [`auth`]: Registration, login and logout payloads
//! - [`users`]: The parent account and the authenticated [`users::CurrentUser`]
//! - [`profiles`]: Child profiles and their family members, comfort items and traits
//! - [`photos`]: Uploaded photo metadata
//! - [`stories`]: Generation requests and stored stories
//! - [`subscriptions`]: Plans, usage statistics and checkout
//! - [`pagination`]: Shared `skip`/`limit` query parameters

pub mod auth;
pub mod pagination;
pub mod photos;
pub mod profiles;
pub mod stories;
pub mod subscriptions;
pub mod users;
