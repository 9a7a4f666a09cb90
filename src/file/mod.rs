//! File format access: the `Reader` facade (`reader.rs`) plus the trait
//! interfaces concrete format decoders implement (`hve/`, `esedb/`).
//! Grounded on the donor's `src/file/mod.rs`.

pub mod esedb;
pub mod hve;
pub mod reader;

pub use reader::{open, Decoders, Kind, Opener, Reader};
