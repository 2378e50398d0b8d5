/// Memory placement requested by a hunk's size word.
///
/// The Amiga had separate memory regions: "chip" RAM was accessible by the
/// custom chips (Agnus/Alice) for DMA operations (graphics, audio, disk),
/// while "fast" RAM was CPU-only and typically faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// No preference, allocate from any available memory.
    Any,
    /// Must be in chip RAM (DMA-accessible for graphics/audio/disk).
    Chip,
    /// Prefer fast RAM (CPU-only, not DMA-accessible).
    Fast,
}

impl MemoryType {
    /// Decode the placement flags in the top nibble of a hunk size word.
    ///
    /// `HUNKF_CHIP` is bit 30 and `HUNKF_FAST` is bit 31; anything else
    /// means the loader may pick.
    pub fn from_flags(word: u32) -> Self {
        match word & 0xF000_0000 {
            0x4000_0000 => MemoryType::Chip,
            0x8000_0000 => MemoryType::Fast,
            _ => MemoryType::Any,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryType::Any => f.write_str("ANY"),
            MemoryType::Chip => f.write_str("CHIP"),
            MemoryType::Fast => f.write_str("FAST"),
        }
    }
}

/// Content class of a hunk in a load file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkKind {
    /// HUNK_CODE (0x3E9) — executable machine code.
    Code,
    /// HUNK_DATA (0x3EA) — initialized data (globals, constants).
    Data,
    /// HUNK_BSS (0x3EB) — uninitialized memory reservation (zeroed at load).
    Bss,
}

impl std::fmt::Display for HunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HunkKind::Code => f.write_str("CODE"),
            HunkKind::Data => f.write_str("DATA"),
            HunkKind::Bss => f.write_str("BSS"),
        }
    }
}

/// Raw block tag constants for the load-file stream.
pub mod block_ids {
    pub const HUNK_UNIT: u32 = 0x3E7;
    pub const HUNK_NAME: u32 = 0x3E8;
    pub const HUNK_CODE: u32 = 0x3E9;
    pub const HUNK_DATA: u32 = 0x3EA;
    pub const HUNK_BSS: u32 = 0x3EB;
    pub const HUNK_RELOC32: u32 = 0x3EC;
    pub const HUNK_SYMBOL: u32 = 0x3F0;
    pub const HUNK_DEBUG: u32 = 0x3F1;
    pub const HUNK_END: u32 = 0x3F2;
    pub const HUNK_HEADER: u32 = 0x3F3;

    /// Tag of a DEBUG block carrying SAS/C-style line records: `LINE`.
    pub const DEBUG_LINE: u32 = 0x4C49_4E45;
}

/// A single relocation group: all offsets within the current hunk that
/// need to be patched with the base address of `target_hunk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// The hunk index whose load address gets added to each offset.
    pub target_hunk: u32,
    /// Byte offsets within the current hunk that need patching.
    pub offsets: Vec<u32>,
}

/// A symbol extracted from HUNK_SYMBOL, relative to the hunk start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    /// Byte offset within the hunk.
    pub offset: u32,
}

/// One `(line, offset)` pair from a LINE debug record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// Source line number, with the SAS/C file-id bits already masked off.
    pub line: u32,
    /// Byte offset relative to the record's base offset.
    pub offset: u32,
}

/// A source file's line table from a LINE debug record.
///
/// Offsets in `lines` become hunk-relative once `base_offset` is added;
/// within one record they are non-decreasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path as recorded by the compiler (host syntax, often absolute).
    pub name: String,
    /// Byte offset of the record's code region within the hunk.
    pub base_offset: u32,
    pub lines: Vec<LineEntry>,
}

/// An ordered segment record produced by the parser.
///
/// Immutable once parsed. Symbol offsets and line offsets are relative to
/// the hunk start; a BSS hunk carries no payload and `data` is empty.
#[derive(Debug, Clone)]
pub struct Hunk {
    /// Index of this hunk in the executable (0-based).
    pub index: usize,
    /// File offset where this hunk's body starts.
    pub file_offset: usize,
    /// Whether this is CODE, DATA, or BSS.
    pub kind: HunkKind,
    /// Memory allocation preference (chip, fast, any).
    pub memory_type: MemoryType,
    /// Total allocation size in bytes from the header size table.
    pub alloc_size: u32,
    /// Raw bytes of the hunk content. Empty for BSS hunks.
    pub data: Vec<u8>,
    /// Relocation entries attached to this hunk.
    pub relocations: Vec<Relocation>,
    /// Symbols defined in this hunk, sorted by ascending offset.
    pub symbols: Vec<Symbol>,
    /// Per-source-file line tables, in record order.
    pub source_files: Vec<SourceFile>,
}

impl Hunk {
    /// Size used when sizing the runtime segment: the payload length for
    /// CODE/DATA, the allocation size for BSS.
    pub fn size(&self) -> u32 {
        if self.data.is_empty() {
            self.alloc_size
        } else {
            self.data.len() as u32
        }
    }
}

/// A fully parsed Amiga load file.
#[derive(Debug, Clone)]
pub struct HunkFile {
    /// The content hunks (CODE, DATA, BSS) in load order.
    pub hunks: Vec<Hunk>,
    /// First hunk index from the header (usually 0).
    pub first_hunk: u32,
    /// Last hunk index from the header.
    pub last_hunk: u32,
}
