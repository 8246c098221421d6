//! Administrative endpoints.
//!
//! Only mounted when the supergraph comes from a registry.

pub mod reload;

pub use reload::{RELOAD_ROUTE, ReloadController, ReloadStatusBody, router};
