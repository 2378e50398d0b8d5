//! Amiga load-file ("hunk") parsing.
//!
//! Decodes the big-endian hunk stream of an executable into an ordered
//! list of segment records with their payloads, relocation tables,
//! symbols, and SAS/C-style LINE debug records.

pub mod error;
pub mod parser;
pub mod types;

pub use error::HunkError;
pub use parser::parse_hunk_file;
pub use types::{
    Hunk, HunkFile, HunkKind, LineEntry, MemoryType, Relocation, SourceFile, Symbol,
};
