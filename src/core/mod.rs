//! Core abstractions: device seam traits and shared domain types

pub mod bridge;
pub mod types;
