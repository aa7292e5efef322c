//! Database record models.
//!
//! These are the shapes repositories accept and return. They are kept separate from the API
//! models so storage and wire formats can change independently; API models convert from them
//! with `From` impls.
//!
//! - [`users`]: accounts
//! - [`profiles`]: child profiles, personality traits, family members, comfort items
//! - [`photos`]: photo metadata and content
//! - [`stories`]: generated stories
//! - [`subscriptions`]: subscription state and billing ledger rows

pub mod photos;
pub mod profiles;
pub mod stories;
pub mod subscriptions;
pub mod users;
