#![warn(clippy::pedantic)]
// Noisy doc/signature lints
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod gateway;
pub mod ingest;
pub mod models;
pub mod resolver;
pub mod store;
pub(crate) mod utils;
pub mod whatsapp;

/// Re-exports for fuzz targets. Not part of the public API.
#[doc(hidden)]
pub mod fuzz_api {
    pub use crate::utils::normalize_phone;
    pub use crate::whatsapp::webhook::{parse_delivery, validate_signature};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
