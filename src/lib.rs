#[macro_use]
extern crate anyhow;

pub(crate) use anyhow::Result;

pub use analyse::shimcache::ShimcacheAnalyser;
pub use analyse::srum::SrumAnalyser;
pub use document::{Document, Kind as DocumentKind};
pub use file::{open, Decoders, Kind as FileKind, Opener as FileOpener, Reader};
pub use hunt::{Hunter, HunterBuilder};
pub use rule::{load, lint, Kind as RuleKind, Level as RuleLevel, Rule, Status as RuleStatus};
pub use write::{set_writer, writer, Format, Writer};

#[macro_use]
mod write;

mod analyse;
pub mod cli;
pub mod document;
pub mod error;
mod file;
mod hunt;
mod mapper;
pub mod rule;
pub mod tau;
mod value;
