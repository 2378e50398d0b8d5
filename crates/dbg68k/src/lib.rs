pub mod error;
pub mod hunk;
pub mod remote;
pub mod srcmap;

pub use error::Error;
pub use hunk::parser::parse_hunk_file;
pub use hunk::types::{Hunk, HunkFile, HunkKind, LineEntry, MemoryType, SourceFile, Symbol};
pub use remote::{
    Breakpoint, Capabilities, ClientConfig, DataAccess, DebugEvent, DebugThread, GdbClient,
    GdbError, HaltSignal, HaltStatus, RegisterSet, StackPosition, ThreadId,
};
pub use srcmap::{
    first_line_at_offset, same_source_file, MapError, PathResolver, Segment, SourceLocation,
    SourceMap,
};
