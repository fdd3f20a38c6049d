//! Reply post-processing: ad-block verdicts and attribute-based record stripping.

mod adblock;
mod attr;

pub use adblock::{AdBlockJudge, DEFAULT_ADBLOCK_REPLY};
pub use attr::{AttrTable, DomainAttr, filter_by_attrs, parse_attrs};
