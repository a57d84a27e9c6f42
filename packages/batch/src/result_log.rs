//! The append-only result log.
//!
//! One line per geometry:
//!
//! ```text
//! 17,2014,2016,2018,|,0.0132,0.4071,
//! 18,|,
//! ```
//!
//! The id, then the usable time labels, a literal `|`, then one divergence
//! per transition with four decimals. Readers ignore empty tokens, so the
//! trailing commas are optional. A later line for the same id replaces an
//! earlier one.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tcm_batch_models::ResultRecord;
use tcm_change::TimeLabel;
use tcm_geometry::GeometryId;

/// File name of the log inside the output directory.
pub const RESULTS_FILE_NAME: &str = "results.csv";

/// Token separating labels from divergences.
pub const SEPARATOR: &str = "|";

const REPAIR_CHUNK: usize = 8192;

/// Formats `record` as one complete log line, newline included.
#[must_use]
pub fn format_record(record: &ResultRecord) -> String {
    let mut fields = vec![record.id.to_string()];
    fields.extend(record.time_labels.iter().map(ToString::to_string));
    fields.push(SEPARATOR.to_string());
    fields.extend(record.divergences.iter().map(|value| format!("{value:.4}")));

    let mut line = fields.join(",");
    line.push_str(",\n");
    line
}

/// Parses one log line (without its newline).
///
/// # Errors
///
/// Returns a description of the problem if the line is not a complete
/// record: no id, no separator, an unparseable label or value, or a
/// value count that does not match the labels.
pub fn parse_line(line: &str) -> Result<ResultRecord, String> {
    let mut tokens = line.split(',').map(str::trim).filter(|t| !t.is_empty());

    let id = match tokens.next() {
        None => return Err("empty line".to_string()),
        Some(SEPARATOR) => return Err("missing id".to_string()),
        Some(id) => id.parse::<GeometryId>().map_err(|e| e.to_string())?,
    };

    let mut time_labels = Vec::new();
    let mut separated = false;
    for token in tokens.by_ref() {
        if token == SEPARATOR {
            separated = true;
            break;
        }
        time_labels.push(token.parse::<TimeLabel>()?);
    }
    if !separated {
        return Err(format!("missing '{SEPARATOR}' separator"));
    }

    let divergences = tokens
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|e| format!("invalid divergence '{token}': {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if divergences.len() != time_labels.len().saturating_sub(1) {
        return Err(format!(
            "{} labels but {} divergences",
            time_labels.len(),
            divergences.len()
        ));
    }

    Ok(ResultRecord {
        id,
        time_labels,
        divergences,
    })
}

/// Contents of an existing log.
#[derive(Debug, Default)]
pub struct LogContents {
    /// Last valid record per id.
    pub records: HashMap<GeometryId, ResultRecord>,
    /// Lines that could not be parsed.
    pub corrupt_lines: usize,
}

impl LogContents {
    /// Ids with a completed record.
    #[must_use]
    pub fn completed_ids(&self) -> HashSet<GeometryId> {
        self.records.keys().cloned().collect()
    }
}

/// Reads every record in the log at `path`. A missing file reads as empty.
///
/// Corrupt lines are skipped with a warning, so their geometries are
/// processed again.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_log(path: &Path) -> io::Result<LogContents> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LogContents::default()),
        Err(e) => return Err(e),
    };

    let mut contents = LogContents::default();
    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        let parsed = std::str::from_utf8(&line)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                if text.trim().is_empty() {
                    Ok(None)
                } else {
                    parse_line(text).map(Some)
                }
            });
        match parsed {
            Ok(Some(record)) => {
                contents.records.insert(record.id.clone(), record);
            }
            Ok(None) => {}
            Err(message) => {
                log::warn!("{}:{}: ignoring corrupt line: {message}", path.display(), index + 1);
                contents.corrupt_lines += 1;
            }
        }
    }
    Ok(contents)
}

/// Prepares the log at `path` for appending.
///
/// With `overwrite` the file is truncated. Otherwise an existing file
/// whose last line has no terminating newline is cut back to the last
/// complete line. Returns the number of bytes removed by the repair.
///
/// # Errors
///
/// Returns an error if the file cannot be created, read, or truncated.
pub fn prepare_log(path: &Path, overwrite: bool) -> io::Result<u64> {
    if overwrite {
        File::create(path)?;
        return Ok(0);
    }
    if !path.exists() {
        return Ok(0);
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let removed = truncate_partial_line(&mut file)?;
    if removed > 0 {
        log::warn!(
            "{}: removed {removed} bytes of an unterminated last line",
            path.display()
        );
    }
    Ok(removed)
}

fn truncate_partial_line(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    let mut chunk = [0_u8; REPAIR_CHUNK];
    let mut end = len;

    let keep = loop {
        if end == 0 {
            break 0;
        }
        let start = end.saturating_sub(REPAIR_CHUNK as u64);
        #[allow(clippy::cast_possible_truncation)]
        let size = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk[..size])?;
        if let Some(position) = chunk[..size].iter().rposition(|b| *b == b'\n') {
            break start + position as u64 + 1;
        }
        end = start;
    };

    if keep < len {
        file.set_len(keep)?;
    }
    Ok(len - keep)
}

/// Single writer thread that owns the log file.
///
/// Workers send finished records through [`ResultWriter::sender`]; each is
/// written as one line with a single `write_all` and flushed before the
/// next is taken.
pub struct ResultWriter {
    sender: Sender<ResultRecord>,
    handle: JoinHandle<io::Result<u64>>,
}

impl ResultWriter {
    /// Opens `path` for appending and starts the writer thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the thread cannot
    /// be spawned.
    pub fn spawn(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = mpsc::channel::<ResultRecord>();

        let handle = thread::Builder::new()
            .name("result-writer".to_string())
            .spawn(move || {
                let mut written = 0;
                for record in receiver {
                    file.write_all(format_record(&record).as_bytes())?;
                    file.flush()?;
                    written += 1;
                }
                Ok(written)
            })?;

        Ok(Self { sender, handle })
    }

    /// A handle for submitting records. Sending fails once the writer has
    /// stopped on an I/O error.
    #[must_use]
    pub fn sender(&self) -> Sender<ResultRecord> {
        self.sender.clone()
    }

    /// Waits for every submitted record to be written and returns how many
    /// were written. Outstanding senders must be dropped first.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that stopped the writer, if any.
    pub fn finish(self) -> io::Result<u64> {
        drop(self.sender);
        self.handle
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("result writer thread panicked")))
    }
}
