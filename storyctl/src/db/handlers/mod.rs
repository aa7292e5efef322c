//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed `PgConnection` (usually a transaction), binds parameters with
//! runtime-checked `sqlx::query_as` calls and returns models from [`crate::db::models`].
//!
//! # Available Repositories
//!
//! - [`Users`]: accounts and login bookkeeping
//! - [`Profiles`]: child profiles, with per-account listing and counts
//! - [`PersonalityTraits`], [`FamilyMembers`], [`ComfortItems`]: profile sub-resources
//! - [`Photos`]: uploaded photos and their bytes
//! - [`Stories`]: generated stories and reader state
//! - [`Subscriptions`]: plan, quota counters and billing period
//! - [`BillingEvents`]: idempotency ledger for fulfilled checkouts
//!
//! # Common Pattern
//!
//! ```ignore
//! use storyctl::db::handlers::{Profiles, Repository};
//!
//! async fn example(pool: &sqlx::PgPool, user_id: uuid::Uuid) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!     let mut repo = Profiles::new(&mut tx);
//!     let active = repo.count_active(user_id).await?;
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! Only users and profiles implement the [`Repository`] trait; the sub-resources are always
//! scoped by their parent and expose scoped methods instead.

pub mod billing_events;
pub mod comfort_items;
pub mod family_members;
pub mod personality_traits;
pub mod photos;
pub mod profiles;
pub mod repository;
pub mod stories;
pub mod subscriptions;
pub mod users;

pub use billing_events::BillingEvents;
pub use comfort_items::ComfortItems;
pub use family_members::FamilyMembers;
pub use personality_traits::PersonalityTraits;
pub use photos::Photos;
pub use profiles::Profiles;
pub use repository::Repository;
pub use stories::Stories;
pub use subscriptions::Subscriptions;
pub use users::Users;
