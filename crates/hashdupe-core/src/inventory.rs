use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::record::{self, FileRecord, Layout, ParseError};
use ahash::AHashMap;
use glob::Pattern;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

const PROGRESS_INTERVAL: usize = 100_000;
const MAX_LOGGED_PARSE_ERRORS: usize = 20;
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Counters gathered while reading an inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub lines: usize,
    pub header: bool,
    pub blank: usize,
    pub records: usize,
    pub malformed: usize,
    pub coerced: usize,
    pub excluded: usize,
    /// Rows dropped because a later row for the same path replaced them.
    pub superseded: usize,
}

/// A restartable inventory on disk. Every call to [`InventorySource::records`]
/// reopens the file, so reading twice yields the same sequence.
#[derive(Debug, Clone)]
pub struct InventorySource {
    path: PathBuf,
    layout: Layout,
    exclude: Vec<Pattern>,
}

impl InventorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            layout: Layout::Auto,
            exclude: Vec::new(),
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_exclude_patterns(mut self, globs: &[String]) -> Result<Self, Error> {
        self.exclude = globs
            .iter()
            .map(|glob| {
                Pattern::new(glob).map_err(|source| Error::Pattern {
                    pattern: glob.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Result<Records<'_, BufReader<File>>, Error> {
        let file = File::open(&self.path).map_err(|e| {
            Error::Inventory(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        Ok(Records::new(BufReader::new(file), self.layout, &self.exclude))
    }
}

/// Lazy, line-at-a-time record stream. Malformed rows are counted and
/// skipped; only read failures surface as `Err`.
pub struct Records<'a, R> {
    reader: R,
    buf: Vec<u8>,
    layout: Layout,
    exclude: &'a [Pattern],
    seen_content: bool,
    stats: LoadStats,
}

impl<'a, R: BufRead> Records<'a, R> {
    pub fn new(reader: R, layout: Layout, exclude: &'a [Pattern]) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            layout,
            exclude,
            seen_content: false,
            stats: LoadStats::default(),
        }
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    pub fn into_stats(self) -> LoadStats {
        self.stats
    }

    fn note_malformed(&mut self, err: &ParseError) {
        self.stats.malformed += 1;
        if self.stats.malformed <= MAX_LOGGED_PARSE_ERRORS {
            warn!("Skipping malformed inventory line {}: {}", self.stats.lines, err);
        } else if self.stats.malformed == MAX_LOGGED_PARSE_ERRORS + 1 {
            warn!("Further malformed lines will be counted but not logged");
        }
    }
}

impl<R: BufRead> Iterator for Records<'_, R> {
    type Item = Result<FileRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    return Some(Err(Error::Inventory(format!(
                        "read failed after line {}: {}",
                        self.stats.lines, e
                    ))))
                }
            }
            self.stats.lines += 1;

            if !self.seen_content {
                if self.buf.starts_with(UTF8_BOM) {
                    self.buf.drain(..UTF8_BOM.len());
                }
                if let Ok(text) = std::str::from_utf8(&self.buf) {
                    if text.trim().is_empty() {
                        self.stats.blank += 1;
                        continue;
                    }
                    self.seen_content = true;
                    if record::is_header(text) {
                        self.stats.header = true;
                        if self.layout == Layout::Auto {
                            self.layout = record::header_layout(text.trim_end());
                        }
                        debug!("Inventory header detected, layout {:?}", self.layout);
                        continue;
                    }
                }
                self.seen_content = true;
            }

            let parsed = match record::parse_line_with(&self.buf, self.layout) {
                Ok(parsed) => parsed,
                Err(ParseError::Blank) => {
                    self.stats.blank += 1;
                    continue;
                }
                Err(err) => {
                    self.note_malformed(&err);
                    continue;
                }
            };

            if parsed.coerced {
                self.stats.coerced += 1;
                debug!(
                    "Line {}: non-numeric or negative size/mtime coerced to 0 for {}",
                    self.stats.lines, parsed.record.path
                );
            }

            if self
                .exclude
                .iter()
                .any(|pattern| pattern.matches(&parsed.record.path))
            {
                self.stats.excluded += 1;
                continue;
            }

            self.stats.records += 1;
            return Some(Ok(parsed.record));
        }
    }
}

/// Records of one inventory snapshot with each path present once.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub records: Vec<FileRecord>,
    pub stats: LoadStats,
}

/// Read the whole inventory, resolving repeated paths: the row with the
/// highest mtime wins, and on equal mtimes the later row wins. A replacing row
/// takes the slot of the first occurrence so record order stays stable.
pub fn load(source: &InventorySource, reporter: &dyn ProgressReporter) -> Result<Inventory, Error> {
    let start = Instant::now();
    reporter.on_load_start(&source.path().to_string_lossy());
    info!("Loading inventory {}", source.path().display());

    let mut stream = source.records()?;
    let mut records: Vec<FileRecord> = Vec::new();
    let mut index: AHashMap<String, usize> = AHashMap::new();
    let mut superseded = 0usize;

    while let Some(item) = stream.next() {
        let record = item?;
        match index.get(&record.path) {
            Some(&slot) => {
                superseded += 1;
                if record.mtime >= records[slot].mtime {
                    records[slot] = record;
                }
            }
            None => {
                index.insert(record.path.clone(), records.len());
                records.push(record);
            }
        }
        let lines = stream.stats().lines;
        if lines % PROGRESS_INTERVAL == 0 {
            reporter.on_load_progress(lines);
        }
    }

    let mut stats = stream.into_stats();
    stats.superseded = superseded;

    if stats.records == 0 && stats.malformed > 0 {
        return Err(Error::Inventory(format!(
            "{} has {} data lines and none parsed",
            source.path().display(),
            stats.malformed
        )));
    }

    let duration = start.elapsed().as_secs_f64();
    info!(
        "Loaded {} records from {} lines in {:.2}s ({} malformed, {} coerced, {} excluded, {} superseded)",
        records.len(),
        stats.lines,
        duration,
        stats.malformed,
        stats.coerced,
        stats.excluded,
        stats.superseded,
    );
    reporter.on_load_complete(records.len(), duration);

    Ok(Inventory { records, stats })
}
