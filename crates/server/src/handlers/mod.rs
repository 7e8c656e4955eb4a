//! HTTP request handlers.

pub mod vault;

pub use vault::*;
