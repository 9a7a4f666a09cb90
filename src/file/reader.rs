//! Reader facade: the fixed extension-to-kind mapping, probe order, and
//! `Reader` trait every format decoder implements (spec §6).
//!
//! Concrete decoders (EVTX, Registry hive, ESEDB, MFT, XML, JSON) are
//! external collaborators outside this crate's scope — this module only
//! fixes the contract the hunt executor drives: a `Reader` is whatever
//! yields `Document` values for a `Kind`, and `open` resolves which
//! decoder a path belongs to. Grounded on the donor's `file::mod::Kind`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Error;

/// The artefact format a path resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Evtx,
    Hve,
    Json,
    Jsonl,
    Mft,
    Xml,
    Esedb,
    Unknown,
}

impl Kind {
    /// The extensions recognised for this kind, or `None` for `Unknown`.
    pub fn extensions(&self) -> Option<&'static [&'static str]> {
        match self {
            Kind::Evtx => Some(&["evt", "evtx"]),
            Kind::Hve => Some(&["hve"]),
            Kind::Json => Some(&["json"]),
            Kind::Jsonl => Some(&["jsonl"]),
            Kind::Mft => Some(&["mft", "bin", "$MFT"]),
            Kind::Xml => Some(&["xml"]),
            Kind::Esedb => Some(&["dat", "edb"]),
            Kind::Unknown => None,
        }
    }

    /// The fixed probe order `load_unknown` walks for an unrecognised
    /// extension. `Jsonl` is never probed.
    pub fn probe_order() -> &'static [Kind] {
        &[Kind::Evtx, Kind::Mft, Kind::Json, Kind::Xml, Kind::Hve, Kind::Esedb]
    }

    /// Resolve a path's extension to a `Kind`, ignoring case. `Unknown` for
    /// a missing or unrecognised extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext),
            None => Kind::Unknown,
        }
    }

    fn from_extension(ext: &str) -> Self {
        const ALL: &[Kind] = &[
            Kind::Evtx,
            Kind::Json,
            Kind::Jsonl,
            Kind::Xml,
            Kind::Hve,
            Kind::Mft,
            Kind::Esedb,
        ];
        for kind in ALL {
            if kind.extensions().unwrap().iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                return *kind;
            }
        }
        Kind::Unknown
    }

    /// The `document::Kind` a document of this format is exposed as.
    /// `Jsonl` documents are indistinguishable from `Json` once read.
    pub fn document_kind(&self) -> crate::document::Kind {
        use crate::document::Kind as DocKind;
        match self {
            Kind::Evtx => DocKind::Evtx,
            Kind::Hve => DocKind::Hve,
            Kind::Json | Kind::Jsonl => DocKind::Json,
            Kind::Mft => DocKind::Mft,
            Kind::Xml => DocKind::Xml,
            Kind::Esedb => DocKind::Esedb,
            Kind::Unknown => DocKind::Unknown,
        }
    }
}

/// A format decoder, yielding documents until exhausted. One instance per
/// open file. Concrete implementations (EVTX, HVE, ESEDB, MFT, XML, JSON)
/// live outside this crate; the hunt executor depends only on this trait.
/// `Send` lets the hunt executor fan a single file's documents out across a
/// rayon `par_bridge` (spec §4.5 Parallelism).
pub trait Reader: Iterator<Item = Document> + Send {
    fn kind(&self) -> Kind;
}

/// A decoder constructor: given a path and `skip_errors`, opens it and
/// returns a boxed `Reader`, or a typed `Error` if the file can't be read
/// at all. Parse errors encountered mid-stream are the decoder's own
/// responsibility to swallow (when `skip_errors`) or propagate via panics
/// becoming `None` early in the iterator.
pub type Opener = fn(&Path, bool) -> Result<Box<dyn Reader>, Error>;

/// The set of decoders a binary has linked in, keyed by `Kind`. The core
/// never constructs decoders itself — it only knows how to pick one.
#[derive(Default)]
pub struct Decoders {
    pub evtx: Option<Opener>,
    pub hve: Option<Opener>,
    pub json: Option<Opener>,
    pub jsonl: Option<Opener>,
    pub mft: Option<Opener>,
    pub xml: Option<Opener>,
    pub esedb: Option<Opener>,
}

impl Decoders {
    fn get(&self, kind: Kind) -> Option<Opener> {
        match kind {
            Kind::Evtx => self.evtx,
            Kind::Hve => self.hve,
            Kind::Json => self.json,
            Kind::Jsonl => self.jsonl,
            Kind::Mft => self.mft,
            Kind::Xml => self.xml,
            Kind::Esedb => self.esedb,
            Kind::Unknown => None,
        }
    }
}

/// Resolve `path` to a decoder (by extension, or by probing
/// `Kind::probe_order` when `load_unknown` is set and the extension is
/// unrecognised) and open it.
pub fn open(
    path: &Path,
    decoders: &Decoders,
    load_unknown: bool,
    skip_errors: bool,
) -> Result<Box<dyn Reader>, Error> {
    let kind = Kind::from_path(path);
    let kind = if kind == Kind::Unknown && load_unknown {
        Kind::probe_order()
            .iter()
            .copied()
            .find(|k| decoders.get(*k).is_some())
            .unwrap_or(Kind::Unknown)
    } else {
        kind
    };
    let opener = decoders.get(kind).ok_or_else(|| {
        Error::invalid_format(format!("no decoder registered for '{}'", path.display()))
    })?;
    opener(path, skip_errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_extensions() {
        assert_eq!(Kind::from_path(Path::new("a.evtx")), Kind::Evtx);
        assert_eq!(Kind::from_path(Path::new("a.EVT")), Kind::Evtx);
        assert_eq!(Kind::from_path(Path::new("a.jsonl")), Kind::Jsonl);
        assert_eq!(Kind::from_path(Path::new("a.dat")), Kind::Esedb);
        assert_eq!(Kind::from_path(Path::new("a.weird")), Kind::Unknown);
        assert_eq!(Kind::from_path(Path::new("a")), Kind::Unknown);
    }

    #[test]
    fn jsonl_documents_expose_as_json() {
        assert_eq!(Kind::Jsonl.document_kind(), crate::document::Kind::Json);
        assert_ne!(Kind::Jsonl, Kind::Json);
    }

    #[test]
    fn probe_order_excludes_jsonl() {
        assert!(!Kind::probe_order().contains(&Kind::Jsonl));
        assert_eq!(Kind::probe_order().first(), Some(&Kind::Evtx));
    }

    #[test]
    fn open_fails_without_a_registered_decoder() {
        let decoders = Decoders::default();
        let err = open(Path::new("a.evtx"), &decoders, false, false).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }
}
