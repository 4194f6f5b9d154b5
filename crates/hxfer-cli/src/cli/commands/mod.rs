//! CLI command handlers.

mod get;
mod put;
mod trust;

pub use get::{run_get, GetOptions};
pub use put::{run_put, PutOptions};
pub use trust::TrustArgs;
