//! Core types shared by every Ferron crate.
//!
//! This crate defines the data that crosses process boundaries (definitions,
//! references, wire values), the error taxonomy, and node configuration.
//! It contains no networking or dispatch logic.

pub mod config;
pub mod definition;
pub mod error;
pub mod id;
pub mod value;
