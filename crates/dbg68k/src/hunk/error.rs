use thiserror::Error;

/// Errors that can occur while parsing an Amiga load file.
///
/// All variants are self-contained (no std::io references) so the parser
/// stays usable on byte slices from any origin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HunkError {
    /// File is too short to contain the expected data.
    #[error("at offset 0x{offset:X}: need {needed} bytes, only {available} available")]
    TooShort {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// File does not start with the HUNK_HEADER magic (0x000003F3).
    #[error("not an Amiga executable: expected magic 0x000003F3, found 0x{found:08X}")]
    BadMagic { found: u32 },

    /// The header's first/last hunk fields describe a negative range.
    #[error("invalid hunk range: first {first}, last {last}")]
    BadHunkRange { first: u32, last: u32 },

    /// A string length field exceeds reasonable bounds.
    #[error("invalid string length {length} longwords at offset 0x{offset:X}")]
    InvalidStringLength { length: u32, offset: usize },

    /// An invalid value was encountered in a specific field.
    #[error("invalid {context}: 0x{value:08X}")]
    InvalidValue { context: &'static str, value: u32 },

    /// A hunk body ended without a CODE, DATA, or BSS block.
    #[error("hunk {index} has no content block")]
    MissingContent { index: usize },
}
