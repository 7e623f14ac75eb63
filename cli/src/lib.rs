//! Library half of the `gateway` binary: backend adapter selection and tracing setup,
//! kept separate from `main.rs` so both can be unit-tested without a process boundary.

pub mod adapters;
pub mod log_format;
pub mod logging;

pub use adapters::{select_backend, Backend};
