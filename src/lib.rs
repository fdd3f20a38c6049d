//! chinadns - a pollution-aware split DNS proxy.
//!
//! Queries for China domains go to domestic resolvers, known-blocked domains go
//! to trusted abroad resolvers, and everything else is tried domestically first
//! with the abroad answer used whenever the domestic one looks polluted.

pub mod cache;
pub mod client;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod filter;
pub mod resolver;
pub mod rules;
pub mod server;
pub mod stats;
pub mod transport;
