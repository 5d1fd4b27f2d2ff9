//! HTTP API handlers for skyalert-gcn

pub mod catalogs;
pub mod health;

pub use catalogs::catalog_routes;
pub use health::health_routes;
