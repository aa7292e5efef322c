//! HTTP request handlers for all API endpoints.
//!
//! Each handler validates its input, resolves the resources it touches against the
//! authenticated account, runs repository calls (in a transaction where several writes must
//! agree) and maps the result to a response model.
//!
//! - [`auth`]: Registration, login and logout
//! - [`users`]: The current account
//! - [`profiles`]: Child profile CRUD and the character reference preview
//! - [`family_members`], [`comfort_items`], [`personality_traits`]: Profile sub-resources
//! - [`photos`]: Upload, listing and serving of photos
//! - [`stories`]: Story generation and the library
//! - [`subscriptions`]: Plans, usage, feature checks and checkout
//!
//! Handlers return [`crate::errors::Error`], which maps to a status code and a JSON body.

pub mod auth;
pub mod comfort_items;
pub mod family_members;
pub mod personality_traits;
pub mod photos;
pub mod profiles;
pub mod stories;
pub mod subscriptions;
pub mod users;
