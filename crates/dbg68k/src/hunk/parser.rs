use log::{debug, warn};

use super::error::HunkError;
use super::types::*;

/// A zero-copy cursor over a byte slice for big-endian binary parsing.
///
/// All Amiga hunk data is big-endian (68k native byte order) and
/// longword-aligned. The cursor tracks a read position and provides
/// checked reads that return `HunkError` on out-of-bounds access.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u32_be(&mut self) -> Result<u32, HunkError> {
        if self.pos + 4 > self.data.len() {
            return Err(HunkError::TooShort {
                offset: self.pos,
                needed: 4,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + 4];
        self.pos += 4;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], HunkError> {
        if self.pos + n > self.data.len() {
            return Err(HunkError::TooShort {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), HunkError> {
        if self.pos + n > self.data.len() {
            return Err(HunkError::TooShort {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        self.pos += n;
        Ok(())
    }

    /// Read a length-prefixed name: `n` longwords of bytes, zero-terminated
    /// within the padded field. The terminator is found by byte scan, never
    /// by reading past the field.
    fn read_padded_name(&mut self, num_longs: u32) -> Result<String, HunkError> {
        if num_longs > 0x10000 {
            return Err(HunkError::InvalidStringLength {
                length: num_longs,
                offset: self.pos.saturating_sub(4),
            });
        }
        let byte_len = (num_longs as usize) * 4;
        let bytes = self.read_bytes(byte_len)?;
        let str_end = bytes.iter().position(|&b| b == 0).unwrap_or(byte_len);
        Ok(String::from_utf8_lossy(&bytes[..str_end]).into_owned())
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Parse a complete Amiga load file from raw bytes.
///
/// This is the main entry point for the hunk parser. It expects the
/// complete file contents as a byte slice and returns the ordered list of
/// hunks with their payloads, relocations, symbols, and line debug tables.
///
/// # Example
///
/// ```no_run
/// use dbg68k::hunk::parser::parse_hunk_file;
///
/// let file_data = std::fs::read("program.exe").unwrap();
/// let hunk_file = parse_hunk_file(&file_data).unwrap();
/// for hunk in &hunk_file.hunks {
///     println!("Hunk {}: {} ({} bytes)", hunk.index, hunk.kind, hunk.size());
/// }
/// ```
pub fn parse_hunk_file(data: &[u8]) -> Result<HunkFile, HunkError> {
    let mut cursor = Cursor::new(data);

    // --- Read and validate the HUNK_HEADER ---
    let magic = cursor.read_u32_be()?;
    if magic != block_ids::HUNK_HEADER {
        return Err(HunkError::BadMagic { found: magic });
    }

    // Resident library name table: a sequence of length-prefixed strings
    // terminated by a zero length. Always empty for load files, so this
    // normally consumes the single zero word.
    loop {
        let name_len = cursor.read_u32_be()?;
        if name_len == 0 {
            break;
        }
        cursor.skip((name_len as usize) * 4)?;
    }

    let table_size = cursor.read_u32_be()?;
    let first_hunk = cursor.read_u32_be()?;
    let last_hunk = cursor.read_u32_be()?;
    if last_hunk < first_hunk {
        return Err(HunkError::BadHunkRange {
            first: first_hunk,
            last: last_hunk,
        });
    }
    let hunk_count = (last_hunk - first_hunk + 1) as usize;
    if hunk_count > 65536 {
        return Err(HunkError::InvalidValue {
            context: "hunk count",
            value: hunk_count as u32,
        });
    }
    if table_size as usize > 65536 {
        return Err(HunkError::InvalidValue {
            context: "hunk table size",
            value: table_size,
        });
    }

    // Size table: one word per hunk. The top nibble carries the memory
    // placement flags, the bottom 28 bits the size in longwords.
    let mut alloc_sizes = Vec::with_capacity(hunk_count);
    let mut mem_types = Vec::with_capacity(hunk_count);
    for _ in 0..hunk_count {
        let size_word = cursor.read_u32_be()?;
        mem_types.push(MemoryType::from_flags(size_word));
        alloc_sizes.push((size_word & 0x0FFF_FFFF) * 4);
    }

    // --- Parse the hunk bodies ---
    let mut hunks: Vec<Hunk> = Vec::with_capacity(hunk_count);
    for index in 0..hunk_count {
        if cursor.is_eof() {
            warn!("load file ends after {} of {} hunks", index, hunk_count);
            break;
        }
        let hunk = parse_hunk_body(
            &mut cursor,
            index,
            alloc_sizes[index],
            mem_types[index],
        )?;
        hunks.push(hunk);
    }

    Ok(HunkFile {
        hunks,
        first_hunk,
        last_hunk,
    })
}

/// Parse one hunk body: sub-blocks up to the terminating HUNK_END.
///
/// An unknown tag stops the current hunk without failing the whole file;
/// a truncated stream inside a block is a hard error.
fn parse_hunk_body(
    cursor: &mut Cursor<'_>,
    index: usize,
    alloc_size: u32,
    memory_type: MemoryType,
) -> Result<Hunk, HunkError> {
    let file_offset = cursor.position();
    let mut kind: Option<HunkKind> = None;
    let mut data: Vec<u8> = Vec::new();
    let mut relocations: Vec<Relocation> = Vec::new();
    let mut symbols: Vec<Symbol> = Vec::new();
    let mut source_files: Vec<SourceFile> = Vec::new();

    loop {
        if cursor.is_eof() {
            break;
        }
        let tag_word = cursor.read_u32_be()?;
        // Content blocks may carry memory flags in the top bits too.
        match tag_word & 0x3FFF_FFFF {
            block_ids::HUNK_CODE => {
                let longs = cursor.read_u32_be()? as usize;
                data = cursor.read_bytes(longs * 4)?.to_vec();
                kind = Some(HunkKind::Code);
            }
            block_ids::HUNK_DATA => {
                let longs = cursor.read_u32_be()? as usize;
                data = cursor.read_bytes(longs * 4)?.to_vec();
                kind = Some(HunkKind::Data);
            }
            block_ids::HUNK_BSS => {
                // Size repeated from the header table; no payload follows.
                let _longs = cursor.read_u32_be()?;
                kind = Some(HunkKind::Bss);
            }
            block_ids::HUNK_RELOC32 => {
                parse_reloc32(cursor, &mut relocations)?;
            }
            block_ids::HUNK_SYMBOL => {
                parse_symbols(cursor, &mut symbols)?;
            }
            block_ids::HUNK_DEBUG => {
                parse_debug(cursor, &mut source_files)?;
            }
            block_ids::HUNK_UNIT | block_ids::HUNK_NAME => {
                let len = cursor.read_u32_be()?;
                let _ = cursor.read_padded_name(len)?;
            }
            block_ids::HUNK_HEADER => {
                return Err(HunkError::InvalidValue {
                    context: "HUNK_HEADER in hunk body",
                    value: tag_word,
                });
            }
            block_ids::HUNK_END => break,
            other => {
                warn!(
                    "unknown hunk tag 0x{:08X} at offset 0x{:X}, stopping hunk {}",
                    other,
                    cursor.position() - 4,
                    index
                );
                break;
            }
        }
    }

    let kind = kind.ok_or(HunkError::MissingContent { index })?;
    Ok(Hunk {
        index,
        file_offset,
        kind,
        memory_type,
        alloc_size,
        data,
        relocations,
        symbols,
        source_files,
    })
}

/// Parse HUNK_RELOC32: groups of (count, target_hunk, offsets...) until count == 0.
fn parse_reloc32(
    cursor: &mut Cursor<'_>,
    relocations: &mut Vec<Relocation>,
) -> Result<(), HunkError> {
    loop {
        let count = cursor.read_u32_be()?;
        if count == 0 {
            break;
        }
        // Verify the group fits before allocating: target hunk word plus
        // `count` offset words.
        let needed = (count as usize * 4) + 4;
        if cursor.remaining() < needed {
            return Err(HunkError::TooShort {
                offset: cursor.position(),
                needed,
                available: cursor.remaining(),
            });
        }

        let target_hunk = cursor.read_u32_be()?;
        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            offsets.push(cursor.read_u32_be()?);
        }
        relocations.push(Relocation {
            target_hunk,
            offsets,
        });
    }
    Ok(())
}

/// Parse HUNK_SYMBOL: (name, offset) pairs until the name length is 0.
/// The collected list is sorted by ascending offset.
fn parse_symbols(cursor: &mut Cursor<'_>, symbols: &mut Vec<Symbol>) -> Result<(), HunkError> {
    loop {
        let name_longs = cursor.read_u32_be()?;
        if name_longs == 0 {
            break;
        }
        let name = cursor.read_padded_name(name_longs)?;
        let offset = cursor.read_u32_be()?;
        symbols.push(Symbol { name, offset });
    }
    symbols.sort_by_key(|s| s.offset);
    Ok(())
}

/// Parse a HUNK_DEBUG block.
///
/// Layout: total length in longwords, base offset, debug tag. A `LINE`
/// tag is followed by the source file name and (line, offset) pairs; the
/// length word does not count the base offset and tag. Any other tag is
/// skipped by advancing past the block.
fn parse_debug(
    cursor: &mut Cursor<'_>,
    source_files: &mut Vec<SourceFile>,
) -> Result<(), HunkError> {
    let total_longs = cursor.read_u32_be()?;
    if total_longs < 2 {
        cursor.skip(total_longs as usize * 4)?;
        return Ok(());
    }
    let base_offset = cursor.read_u32_be()?;
    let debug_tag = cursor.read_u32_be()?;
    let body_longs = total_longs - 2;

    if debug_tag != block_ids::DEBUG_LINE {
        debug!("skipping debug block with tag 0x{:08X}", debug_tag);
        cursor.skip(body_longs as usize * 4)?;
        return Ok(());
    }

    let name_longs = cursor.read_u32_be()?;
    if name_longs + 1 > body_longs {
        return Err(HunkError::InvalidValue {
            context: "LINE debug record name length",
            value: name_longs,
        });
    }
    let name = cursor.read_padded_name(name_longs)?;

    let num_lines = (body_longs - name_longs - 1) / 2;
    let mut lines = Vec::with_capacity(num_lines as usize);
    for _ in 0..num_lines {
        // SAS/C stores a file id in the high byte of the line word.
        let line = cursor.read_u32_be()? & 0x00FF_FFFF;
        let offset = cursor.read_u32_be()?;
        lines.push(LineEntry { line, offset });
    }
    lines.sort_by_key(|e| e.offset);

    source_files.push(SourceFile {
        name,
        base_offset,
        lines,
    });
    Ok(())
}
