//! Versioned request surface for the taxonomy core.

pub mod api;

pub use api::{status_for_kind, ApiError, ApiRequest, ApiResponse, Method, TaxonomyApi};
