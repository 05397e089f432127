//! Session CSV input.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::session::{RawSessionRecord, SessionSet, ValidationError};

/// Failure to turn a session file into a [`SessionSet`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open \"{}\": {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed session CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Reads and validates a session CSV file.
///
/// Extra columns are ignored; see [`RawSessionRecord`] for accepted headers.
///
/// # Errors
///
/// Returns a `LoadError` if the file cannot be read, a row does not parse,
/// or the batch fails validation.
pub fn read_sessions(path: &Path) -> Result<SessionSet, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = read_records(io::BufReader::new(file))?;
    Ok(SessionSet::build(&records)?)
}

/// Parses session rows from any reader without validating them.
///
/// # Errors
///
/// Returns `LoadError::Csv` on the first row that does not deserialize.
pub fn read_records(reader: impl Read) -> Result<Vec<RawSessionRecord>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let records = rdr
        .deserialize::<RawSessionRecord>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Writes session rows as CSV with the canonical headers.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_records(records: &[RawSessionRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}
