//! Line/address mapping over a parsed hunk file and its runtime bases.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::hunk::types::{Hunk, LineEntry, MemoryType};

use super::paths::{normalize_path, same_source_file};

/// How far behind a queried address the nearest line record may sit and
/// still count as a match.
const ADDRESS_LOOKUP_WINDOW: u32 = 10;

/// Errors from source map construction and queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("{hunks} hunks but {bases} segment base addresses")]
    BaseCountMismatch { hunks: usize, bases: usize },

    #[error("no source line within {ADDRESS_LOOKUP_WINDOW} bytes of address 0x{0:08X}")]
    AddressNotFound(u32),

    #[error("no debug info for source file '{0}'")]
    SourceNotFound(String),

    #[error("no line at or before {line} in '{path}'")]
    LineNotFound { path: String, line: u32 },
}

/// A runtime region corresponding to one hunk at a stub-reported base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: u32,
    pub name: String,
    pub base_address: u32,
    pub size: u32,
    pub memory_type: MemoryType,
}

impl Segment {
    /// Whether `address` falls inside this segment.
    pub fn contains(&self, address: u32) -> bool {
        address >= self.base_address && address - self.base_address < self.size
    }
}

/// A resolved spot in the program: source position and runtime address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Path as recorded in the debug record.
    pub path: String,
    pub line: u32,
    /// Nearest symbol at or before this location, when the hunk has any.
    pub symbol: Option<String>,
    /// Distance from that symbol, in bytes.
    pub symbol_offset: Option<u32>,
    pub segment_index: usize,
    /// Byte offset from the segment start.
    pub segment_offset: u32,
    pub address: u32,
}

/// Bidirectional maps between source lines and runtime addresses.
///
/// Built once from the parsed hunks and the segment bases the stub
/// reported; read-only afterwards, so concurrent readers need no
/// further synchronisation.
#[derive(Debug)]
pub struct SourceMap {
    segments: Vec<Segment>,
    symbols: HashMap<String, u32>,
    sources: Vec<String>,
    by_source: HashMap<String, BTreeMap<u32, SourceLocation>>,
    by_address: BTreeMap<u32, SourceLocation>,
}

impl SourceMap {
    /// Combine parsed hunks with runtime segment bases, one base per hunk.
    pub fn new(hunks: &[Hunk], bases: &[u32]) -> Result<SourceMap, MapError> {
        if hunks.len() != bases.len() {
            return Err(MapError::BaseCountMismatch {
                hunks: hunks.len(),
                bases: bases.len(),
            });
        }

        let mut segments = Vec::with_capacity(hunks.len());
        let mut symbols = HashMap::new();
        let mut sources = Vec::new();
        let mut by_source: HashMap<String, BTreeMap<u32, SourceLocation>> = HashMap::new();
        let mut by_address = BTreeMap::new();

        for (hunk, &base) in hunks.iter().zip(bases) {
            segments.push(Segment {
                id: hunk.index as u32,
                name: format!("Seg{}_{}_{}", hunk.index, hunk.kind, hunk.memory_type),
                base_address: base,
                size: hunk.size(),
                memory_type: hunk.memory_type,
            });

            for sym in &hunk.symbols {
                // Last writer wins on duplicate names.
                symbols.insert(sym.name.clone(), base + sym.offset);
            }

            // The first-named file is the hunk's entry source; later
            // records are includes.
            if let Some(first) = hunk.source_files.first() {
                sources.push(first.name.clone());
            }

            for file in &hunk.source_files {
                let key = source_key(&file.name);
                let file_map = by_source.entry(key).or_default();
                for entry in &file.lines {
                    let segment_offset = file.base_offset + entry.offset;
                    let (symbol, symbol_offset) = nearest_symbol(hunk, segment_offset);
                    let location = SourceLocation {
                        path: file.name.clone(),
                        line: entry.line,
                        symbol,
                        symbol_offset,
                        segment_index: hunk.index,
                        segment_offset,
                        address: base + segment_offset,
                    };
                    by_address.insert(location.address, location.clone());
                    file_map.entry(entry.line).or_insert(location);
                }
            }
        }

        Ok(SourceMap {
            segments,
            symbols,
            sources,
            by_source,
            by_address,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The entry source file of each hunk that has debug info.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn symbols(&self) -> &HashMap<String, u32> {
        &self.symbols
    }

    pub fn symbol_address(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }

    /// Map an address to a source location.
    ///
    /// An exact hit is preferred; otherwise the nearest location at a
    /// lower address matches, as long as it sits within a small window.
    pub fn lookup_address(&self, address: u32) -> Result<&SourceLocation, MapError> {
        if let Some(exact) = self.by_address.get(&address) {
            return Ok(exact);
        }
        self.by_address
            .range(..=address)
            .next_back()
            .filter(|(addr, _)| address - *addr <= ADDRESS_LOOKUP_WINDOW)
            .map(|(_, loc)| loc)
            .ok_or(MapError::AddressNotFound(address))
    }

    /// Map `(path, line)` to a location.
    ///
    /// An exact line hit is preferred; otherwise the greatest line at or
    /// before the request. Fails when the file is unknown or its line
    /// table is empty.
    pub fn lookup_source_line(
        &self,
        path: &str,
        line: u32,
    ) -> Result<&SourceLocation, MapError> {
        let file_map = self
            .file_map(path)
            .ok_or_else(|| MapError::SourceNotFound(path.to_string()))?;
        file_map
            .range(..=line)
            .next_back()
            .map(|(_, loc)| loc)
            .ok_or(MapError::LineNotFound {
                path: path.to_string(),
                line,
            })
    }

    /// All mapped lines for a source file, in line order.
    pub fn source_lines(&self, path: &str) -> Option<Vec<&SourceLocation>> {
        self.file_map(path)
            .map(|m| m.values().collect())
    }

    /// Translate an absolute address to `(segment id, offset)` over the
    /// live segment table. Addresses outside every segment come back as
    /// segment `-1` with the raw address, which tells the front-end to
    /// fall back to disassembly.
    pub fn absolute_to_relative(&self, address: u32) -> (i32, u32) {
        for seg in &self.segments {
            if seg.contains(address) {
                return (seg.id as i32, address - seg.base_address);
            }
        }
        (-1, address)
    }

    fn file_map(&self, path: &str) -> Option<&BTreeMap<u32, SourceLocation>> {
        if let Some(map) = self.by_source.get(&source_key(path)) {
            return Some(map);
        }
        // Debug-record paths rarely match the editor's path byte for
        // byte; fall back to the file-identity comparison.
        self.by_source
            .iter()
            .find(|(_, map)| {
                map.values()
                    .next()
                    .is_some_and(|loc| same_source_file(&loc.path, path))
            })
            .map(|(_, map)| map)
    }
}

fn source_key(path: &str) -> String {
    normalize_path(path).to_uppercase()
}

fn nearest_symbol(hunk: &Hunk, offset: u32) -> (Option<String>, Option<u32>) {
    // Symbols are sorted by offset at parse time.
    let idx = hunk.symbols.partition_point(|s| s.offset <= offset);
    if idx == 0 {
        return (None, None);
    }
    let sym = &hunk.symbols[idx - 1];
    (Some(sym.name.clone()), Some(offset - sym.offset))
}

/// Scan one hunk's line table for the line starting at `offset`.
///
/// Exact hits win. When the target falls between two entries, the line of
/// the greatest offset at or before it is used; past the final entry
/// there is no answer.
pub fn first_line_at_offset(lines: &[LineEntry], offset: u32) -> Option<u32> {
    let mut best: Option<&LineEntry> = None;
    let mut saw_greater = false;
    for entry in lines {
        if entry.offset == offset {
            return Some(entry.line);
        }
        if entry.offset > offset {
            saw_greater = true;
        } else if best.map_or(true, |b| entry.offset >= b.offset) {
            best = Some(entry);
        }
    }
    if saw_greater {
        best.map(|e| e.line)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hunk::types::{HunkKind, SourceFile, Symbol};
    use pretty_assertions::assert_eq;

    fn gencop_hunk() -> Hunk {
        Hunk {
            index: 0,
            file_offset: 0x24,
            kind: HunkKind::Code,
            memory_type: MemoryType::Any,
            alloc_size: 12,
            data: vec![0; 12],
            relocations: vec![],
            symbols: vec![
                Symbol {
                    name: "init".to_string(),
                    offset: 0,
                },
                Symbol {
                    name: "loop".to_string(),
                    offset: 8,
                },
            ],
            source_files: vec![SourceFile {
                name: "/build/demo/gencop.s".to_string(),
                base_offset: 0,
                lines: vec![
                    LineEntry { line: 32, offset: 0 },
                    LineEntry { line: 33, offset: 4 },
                    LineEntry { line: 35, offset: 8 },
                ],
            }],
        }
    }

    #[test]
    fn segment_metadata() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();
        let seg = &map.segments()[0];
        assert_eq!(seg.name, "Seg0_CODE_ANY");
        assert_eq!(seg.base_address, 0xAEF);
        assert_eq!(seg.size, 12);
        assert_eq!(map.sources(), &["/build/demo/gencop.s".to_string()]);
    }

    #[test]
    fn source_line_to_address() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();

        let loc = map.lookup_source_line("/build/demo/gencop.s", 32).unwrap();
        assert_eq!((loc.segment_index, loc.segment_offset), (0, 0));
        assert_eq!(loc.address, 0xAEF);

        let loc = map.lookup_source_line("/build/demo/gencop.s", 33).unwrap();
        assert_eq!((loc.segment_index, loc.segment_offset), (0, 4));
        assert_eq!(loc.address, 0xAEF + 4);
    }

    #[test]
    fn source_line_rounds_down() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();
        // Line 34 has no entry; the greatest line at or before it is 33.
        let loc = map.lookup_source_line("/build/demo/gencop.s", 34).unwrap();
        assert_eq!(loc.line, 33);

        let err = map
            .lookup_source_line("/build/demo/gencop.s", 10)
            .unwrap_err();
        assert_eq!(
            err,
            MapError::LineNotFound {
                path: "/build/demo/gencop.s".to_string(),
                line: 10
            }
        );
    }

    #[test]
    fn address_to_source_round_trip() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();
        for line in [32u32, 33, 35] {
            let loc = map.lookup_source_line("/build/demo/gencop.s", line).unwrap();
            let back = map.lookup_address(loc.address).unwrap();
            assert_eq!(back.line, line);
        }
    }

    #[test]
    fn address_lookup_window() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();
        // Two bytes into line 33's record still maps to line 33.
        assert_eq!(map.lookup_address(0xAEF + 6).unwrap().line, 33);
        // Far past the last record is out of the window.
        assert_eq!(
            map.lookup_address(0xAEF + 100),
            Err(MapError::AddressNotFound(0xAEF + 100))
        );
    }

    #[test]
    fn lookup_by_basename() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();
        let loc = map.lookup_source_line("gencop.s", 32).unwrap();
        assert_eq!(loc.address, 0xAEF);
    }

    #[test]
    fn symbols_shifted_by_base() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();
        assert_eq!(map.symbol_address("init"), Some(0xAEF));
        assert_eq!(map.symbol_address("loop"), Some(0xAEF + 8));

        let loc = map.lookup_source_line("gencop.s", 35).unwrap();
        assert_eq!(loc.symbol.as_deref(), Some("loop"));
        assert_eq!(loc.symbol_offset, Some(0));
    }

    #[test]
    fn absolute_to_relative_mapping() {
        let map = SourceMap::new(&[gencop_hunk()], &[0xAEF]).unwrap();
        assert_eq!(map.absolute_to_relative(0xAEF + 4), (0, 4));
        // Outside any segment: segment -1, raw address.
        assert_eq!(map.absolute_to_relative(0x10_0000), (-1, 0x10_0000));
    }

    #[test]
    fn base_count_mismatch() {
        let err = SourceMap::new(&[gencop_hunk()], &[]).unwrap_err();
        assert_eq!(err, MapError::BaseCountMismatch { hunks: 1, bases: 0 });
    }

    #[test]
    fn first_line_scan() {
        let lines = vec![
            LineEntry { line: 10, offset: 0 },
            LineEntry { line: 11, offset: 4 },
            LineEntry { line: 14, offset: 12 },
        ];
        // Exact hits
        assert_eq!(first_line_at_offset(&lines, 4), Some(11));
        // Between two entries: round down
        assert_eq!(first_line_at_offset(&lines, 6), Some(11));
        // Past the last entry: no answer
        assert_eq!(first_line_at_offset(&lines, 16), None);
        assert_eq!(first_line_at_offset(&[], 0), None);
    }
}
