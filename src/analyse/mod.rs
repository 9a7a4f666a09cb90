//! Analyser collaborators that sit alongside the hunt executor: Shimcache
//! timeline enrichment and SRUM database parsing.

pub mod shimcache;
pub mod srum;
