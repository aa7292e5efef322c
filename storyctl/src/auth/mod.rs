//! Authentication for the story API.
//!
//! Accounts authenticate with email and password. A successful login issues a signed JWT session
//! token, which clients present either as the session cookie (browsers) or as an
//! `Authorization: Bearer <token>` header (mobile and scripted clients). Both carry the same
//! token and are verified the same way.
//!
//! # Modules
//!
//! - [`current_user`]: The [`CurrentUser`](crate::api::models::users::CurrentUser) extractor
//! - [`password`]: Argon2 password hashing and length rules
//! - [`session`]: JWT session token creation and verification
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use storyctl::api::models::users::CurrentUser;
//!
//! async fn protected_handler(current_user: CurrentUser) -> Result<String, Error> {
//!     Ok(format!("Hello, {}!", current_user.username))
//! }
//! ```
//!
//! Ownership is checked in the repositories: every lookup of a profile, photo or story is scoped
//! to the authenticated account, and a miss is reported as not found.

pub mod current_user;
pub mod password;
pub mod session;
