//! Shared CRUD surface for the top-level account tables.

use crate::db::errors::Result;

/// CRUD over one table, borrowed from a live connection.
///
/// Users and child profiles implement this. Listing and the per-profile sub-resources
/// (family, comfort items, photos) stay inherent methods because each filters differently.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    type UpdateRequest;
    type Response;
    type Id: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// `None` when no row has this id
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// Returns whether a row was removed
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    /// Fields left `None` in the request keep their stored value
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;
}
