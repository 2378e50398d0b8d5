//! Source path normalisation and resolution.
//!
//! Debug records carry paths from the build host (often Windows or a
//! cross-compile tree); the debugger runs somewhere else. The resolver
//! applies user-supplied prefix substitutions, searches the configured
//! workspace roots, and memoises what it finds.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Condvar, Mutex};

/// A lock keyed by value: at most one holder per key, different keys do
/// not block each other. Used to serialise resolution of one path while
/// letting unrelated paths proceed.
pub struct KeyedMutex<K: Eq + std::hash::Hash + Clone> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

impl<K: Eq + std::hash::Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        KeyedMutex {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    /// Block until `key` is free, then hold it until the guard drops.
    pub fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let mut held = self.held.lock().unwrap();
        while held.contains(&key) {
            held = self.released.wait(held).unwrap();
        }
        held.insert(key.clone());
        KeyedGuard { owner: self, key }
    }
}

impl<K: Eq + std::hash::Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KeyedGuard<'a, K: Eq + std::hash::Hash + Clone> {
    owner: &'a KeyedMutex<K>,
    key: K,
}

impl<K: Eq + std::hash::Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        let mut held = self.owner.held.lock().unwrap();
        held.remove(&self.key);
        self.owner.released.notify_all();
    }
}

/// Normalise a path string: backslashes become forward slashes and a
/// drive letter, if present, is upper-cased.
pub fn normalize_path(path: &str) -> String {
    let mut out = path.replace('\\', "/");
    let drive = match out.as_bytes() {
        [d, b':', ..] if d.is_ascii_lowercase() => Some(d.to_ascii_uppercase() as char),
        _ => None,
    };
    if let Some(letter) = drive {
        out.replace_range(0..1, letter.encode_utf8(&mut [0; 4]));
    }
    out
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/') || (bytes.len() >= 2 && bytes[1] == b':')
}

/// Compare two paths for "same source file".
///
/// When both are absolute the normalised paths are compared whole; when
/// either is relative only the basenames are compared. This is the only
/// equality test used when correlating debug-record names to
/// user-requested paths.
pub fn same_source_file(a: &str, b: &str) -> bool {
    same_source_file_with(a, b, cfg!(windows))
}

fn same_source_file_with(a: &str, b: &str, case_insensitive: bool) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    let (a, b) = if is_absolute(&a) && is_absolute(&b) {
        (a, b)
    } else {
        (basename(&a).to_string(), basename(&b).to_string())
    };
    if case_insensitive {
        a.eq_ignore_ascii_case(&b)
    } else {
        a == b
    }
}

/// Maps paths from debug records to local files.
pub struct PathResolver {
    /// Ordered prefix substitutions, applied before the filesystem search.
    replacements: Vec<(String, String)>,
    /// Workspace roots tried in declaration order.
    roots: Vec<String>,
    cache: Mutex<HashMap<String, String>>,
    in_flight: KeyedMutex<String>,
}

impl PathResolver {
    pub fn new(replacements: Vec<(String, String)>, roots: Vec<String>) -> Self {
        PathResolver {
            replacements: replacements
                .into_iter()
                .map(|(k, v)| (normalize_path(&k), normalize_path(&v)))
                .collect(),
            roots: roots.iter().map(|r| normalize_path(r)).collect(),
            cache: Mutex::new(HashMap::new()),
            in_flight: KeyedMutex::new(),
        }
    }

    /// Resolve a debug-record path to a local path.
    ///
    /// Applies the first matching prefix substitution, falls back to the
    /// workspace roots when the substituted path does not exist, and
    /// memoises the answer by original path. Resolution never fails: when
    /// nothing on disk matches, the normalised input is returned.
    pub fn resolve(&self, original: &str) -> String {
        if let Some(hit) = self.cache.lock().unwrap().get(original) {
            return hit.clone();
        }

        let _guard = self.in_flight.lock(original.to_string());
        // Another caller may have finished while we waited for the key.
        if let Some(hit) = self.cache.lock().unwrap().get(original) {
            return hit.clone();
        }

        let resolved = self.resolve_uncached(original);
        self.cache
            .lock()
            .unwrap()
            .insert(original.to_string(), resolved.clone());
        resolved
    }

    fn resolve_uncached(&self, original: &str) -> String {
        let normalised = normalize_path(original);

        let mut candidate = normalised.clone();
        for (prefix, replacement) in &self.replacements {
            if let Some(pos) = candidate.find(prefix.as_str()) {
                candidate.replace_range(pos..pos + prefix.len(), replacement);
                break;
            }
        }

        if Path::new(&candidate).exists() {
            return normalize_path(&candidate);
        }

        let tail = if is_absolute(&candidate) {
            basename(&candidate).to_string()
        } else {
            candidate.clone()
        };
        for root in &self.roots {
            let joined = format!("{}/{}", root.trim_end_matches('/'), tail);
            if Path::new(&joined).exists() {
                return normalize_path(&joined);
            }
        }

        normalize_path(&candidate)
    }
}

/// Memoised source file text, for showing the line a location maps to.
///
/// Append-only: a file's lines are read once and kept for the session.
pub struct SourceTextCache {
    files: Mutex<HashMap<String, std::sync::Arc<Vec<String>>>>,
}

impl SourceTextCache {
    pub fn new() -> Self {
        SourceTextCache {
            files: Mutex::new(HashMap::new()),
        }
    }

    /// The text of a 1-based line, if the file is readable and long
    /// enough.
    pub fn line(&self, path: &str, line: u32) -> Option<String> {
        if line == 0 {
            return None;
        }
        let lines = self.lines(path)?;
        lines.get(line as usize - 1).cloned()
    }

    fn lines(&self, path: &str) -> Option<std::sync::Arc<Vec<String>>> {
        let key = normalize_path(path);
        if let Some(hit) = self.files.lock().unwrap().get(&key) {
            return Some(std::sync::Arc::clone(hit));
        }
        let text = std::fs::read_to_string(&key).ok()?;
        let lines = std::sync::Arc::new(
            text.lines().map(str::to_string).collect::<Vec<_>>(),
        );
        self.files
            .lock()
            .unwrap()
            .insert(key, std::sync::Arc::clone(&lines));
        Some(lines)
    }
}

impl Default for SourceTextCache {
    fn default() -> Self {
        Self::new()
    }
}
