//! Shared primitive types used across the engine.

/// Row id of an offer. Assigned by the store on insert, never reused.
pub type OfferId = i64;

/// Host catalog product id.
pub type ProductId = i64;

/// Host catalog category (term) id.
pub type CategoryId = i64;

/// Host catalog tag id.
pub type TagId = i64;

/// Host user id. Guests have none.
pub type UserId = i64;

/// Host order id.
pub type OrderId = i64;
