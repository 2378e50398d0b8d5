use thiserror::Error;

use crate::hunk::error::HunkError;
use crate::remote::error::GdbError;
use crate::srcmap::map::MapError;

/// Unified error type for the dbg68k library.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("hunk error: {0}")]
    Hunk(#[from] HunkError),

    #[error("source map error: {0}")]
    Map(#[from] MapError),

    #[error("gdb error: {0}")]
    Gdb(#[from] GdbError),
}
