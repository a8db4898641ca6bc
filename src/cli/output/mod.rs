//! Terminal output formatting utilities.

pub mod table;
