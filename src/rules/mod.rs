//! Routing rules: domain lists and the China IP set.

mod cidr;
mod domain;

pub use cidr::ChinaCidr;
pub use domain::DomainMatcher;
