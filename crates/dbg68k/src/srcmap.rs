//! Source-level mapping: `(file, line)` ⇄ `(segment, offset)` ⇄ address.

pub mod map;
pub mod paths;

pub use map::{first_line_at_offset, MapError, Segment, SourceLocation, SourceMap};
pub use paths::{normalize_path, same_source_file, PathResolver, SourceTextCache};
