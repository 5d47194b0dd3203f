//! Utility functions for phone numbers and display formatting.

pub mod format;

pub use format::{format_optional, format_remaining, normalize_phone, truncate_string};
