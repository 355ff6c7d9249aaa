//! API Module
//!
//! HTTP/JSON surface for both node roles.

pub mod http;

pub use http::{master_router, secondary_router, SecondaryApiOptions};
