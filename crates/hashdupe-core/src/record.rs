use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Field delimiter of the inventory format.
pub const DELIMITER: char = ',';

lazy_static! {
    static ref HASH_PATTERN: Regex =
        Regex::new("^[0-9a-f]{32,128}$").expect("hash pattern is a valid regex");
}

/// Hash function that produced a digest. Digests from different algorithms
/// never compare equal, even when their hex strings do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake2,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake2 => "blake2",
        }
    }

    /// Hex digest length for fixed-width algorithms. Blake2 digests vary.
    pub fn hex_len(&self) -> Option<usize> {
        match self {
            HashAlgorithm::Md5 => Some(32),
            HashAlgorithm::Sha1 => Some(40),
            HashAlgorithm::Sha256 => Some(64),
            HashAlgorithm::Sha512 => Some(128),
            HashAlgorithm::Blake2 => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake2" | "blake2b" | "blake2s" => Ok(HashAlgorithm::Blake2),
            other => Err(ParseError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Identity of a file's content: the (algorithm, digest) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashKey {
    pub algorithm: HashAlgorithm,
    pub hash: String,
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

/// One physical file as described by one inventory row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub algorithm: HashAlgorithm,
    pub hash: String,
}

impl FileRecord {
    pub fn key(&self) -> HashKey {
        HashKey {
            algorithm: self.algorithm,
            hash: self.hash.clone(),
        }
    }
}

/// Column layout of the trailing fixed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// Decide per row: `size,mtime,algo,hash` when both numeric slots parse,
    /// otherwise `size,algo,hash`.
    #[default]
    Auto,
    WithMtime,
    WithoutMtime,
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Layout::Auto),
            "with-mtime" => Ok(Layout::WithMtime),
            "without-mtime" => Ok(Layout::WithoutMtime),
            other => Err(format!(
                "unknown layout '{}' (expected auto, with-mtime or without-mtime)",
                other
            )),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line is not valid UTF-8")]
    Encoding,

    #[error("blank line")]
    Blank,

    #[error("expected at least 3 trailing fields after the path, found {found}")]
    TooFewFields { found: usize },

    #[error("empty path")]
    EmptyPath,

    #[error("unknown hash algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("hash '{0}' is not a lowercase hex digest of 32-128 characters")]
    InvalidHash(String),

    #[error("{algorithm} digest must be {expected} hex characters, found {found}")]
    HashLength {
        algorithm: HashAlgorithm,
        expected: usize,
        found: usize,
    },
}

/// A successfully parsed row. `coerced` is set when a size or mtime field was
/// negative or non-numeric and was replaced by zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub record: FileRecord,
    pub coerced: bool,
}

pub fn parse_line(raw: &[u8]) -> Result<ParsedLine, ParseError> {
    parse_line_with(raw, Layout::Auto)
}

/// Parse one inventory row.
///
/// Only the leading path column may contain the delimiter, so the trailing
/// fields are located by splitting from the right and everything before them
/// is the path.
pub fn parse_line_with(raw: &[u8], layout: Layout) -> Result<ParsedLine, ParseError> {
    let line = std::str::from_utf8(raw).map_err(|_| ParseError::Encoding)?;
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseError::Blank);
    }

    let (path_raw, size_raw, mtime_raw, algo_raw, hash_raw) = match layout {
        Layout::WithMtime => {
            let (path, f) = split_trailing(line, 4).ok_or_else(|| too_few(line))?;
            (path, f[0], Some(f[1]), f[2], f[3])
        }
        Layout::WithoutMtime => {
            let (path, f) = split_trailing(line, 3).ok_or_else(|| too_few(line))?;
            (path, f[0], None, f[1], f[2])
        }
        Layout::Auto => match split_trailing(line, 4) {
            Some((path, f)) if is_integer(f[0]) && is_integer(f[1]) && !path.is_empty() => {
                (path, f[0], Some(f[1]), f[2], f[3])
            }
            _ => {
                let (path, f) = split_trailing(line, 3).ok_or_else(|| too_few(line))?;
                (path, f[0], None, f[1], f[2])
            }
        },
    };

    let path = unquote_path(path_raw);
    if path.is_empty() {
        return Err(ParseError::EmptyPath);
    }

    let algorithm: HashAlgorithm = unquote_field(algo_raw).parse()?;
    let hash = unquote_field(hash_raw);
    if !HASH_PATTERN.is_match(hash) {
        return Err(ParseError::InvalidHash(hash.to_string()));
    }
    if let Some(expected) = algorithm.hex_len() {
        if hash.len() != expected {
            return Err(ParseError::HashLength {
                algorithm,
                expected,
                found: hash.len(),
            });
        }
    }

    let mut coerced = false;
    let size = match unquote_field(size_raw).parse::<u64>() {
        Ok(size) => size,
        Err(_) => {
            coerced = true;
            0
        }
    };
    let mtime = match mtime_raw.map(|m| unquote_field(m).parse::<i64>()) {
        None => 0,
        Some(Ok(mtime)) if mtime >= 0 => mtime,
        Some(_) => {
            coerced = true;
            0
        }
    };

    Ok(ParsedLine {
        record: FileRecord {
            path,
            size,
            mtime,
            algorithm,
            hash: hash.to_string(),
        },
        coerced,
    })
}

/// True when the line looks like a header: its first column starts with
/// "path", case-insensitively.
pub fn is_header(line: &str) -> bool {
    let first = line.split(DELIMITER).next().unwrap_or_default();
    unquote_field(first).to_ascii_lowercase().starts_with("path")
}

/// Layout implied by a header row's column names.
pub fn header_layout(line: &str) -> Layout {
    let columns: Vec<String> = line
        .split(DELIMITER)
        .map(|c| unquote_field(c).to_ascii_lowercase())
        .collect();
    if columns.iter().any(|c| c.contains("mtime") || c.contains("modified")) {
        Layout::WithMtime
    } else if columns.len() == 4 {
        Layout::WithoutMtime
    } else if columns.len() >= 5 {
        Layout::WithMtime
    } else {
        Layout::Auto
    }
}

/// Render a record as one inventory row (`path,size,mtime,algo,hash`, or
/// without mtime), quoting the path when it needs it.
pub fn serialize_record(record: &FileRecord, with_mtime: bool) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let size = record.size.to_string();
    let mtime = record.mtime.to_string();
    if with_mtime {
        writer.write_record([
            record.path.as_str(),
            size.as_str(),
            mtime.as_str(),
            record.algorithm.as_str(),
            record.hash.as_str(),
        ])?;
    } else {
        writer.write_record([
            record.path.as_str(),
            size.as_str(),
            record.algorithm.as_str(),
            record.hash.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    let mut line = String::from_utf8_lossy(&bytes).into_owned();
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

/// Split off the last `count` delimited fields. Returns the untouched prefix
/// and the fields in left-to-right order.
fn split_trailing(line: &str, count: usize) -> Option<(&str, Vec<&str>)> {
    let mut end = line.len();
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let idx = line[..end].rfind(DELIMITER)?;
        fields.push(&line[idx + DELIMITER.len_utf8()..end]);
        end = idx;
    }
    fields.reverse();
    Some((&line[..end], fields))
}

fn too_few(line: &str) -> ParseError {
    ParseError::TooFewFields {
        found: line.matches(DELIMITER).count(),
    }
}

fn is_integer(field: &str) -> bool {
    unquote_field(field).parse::<i64>().is_ok()
}

fn unquote_field(field: &str) -> &str {
    let field = field.trim();
    if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
        &field[1..field.len() - 1]
    } else {
        field
    }
}

fn unquote_path(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].replace("\"\"", "\"")
    } else {
        raw.to_string()
    }
}
