//! Server metadata file handling.
//!
//! One backend per line, three whitespace-separated fields:
//!
//! ```text
//! NAME ADDRESS PORT
//! SERVER_0 127.0.0.1 2000
//! ```
//!
//! Malformed lines are skipped with a warning; lines beyond the roster
//! capacity are dropped silently. If the configured file cannot be opened
//! the caller is prompted on stdout for a replacement path, read from
//! stdin, until a file opens.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Maximum length of a backend name field.
pub const MAX_NAME_LEN: usize = 19;

/// Maximum length of a dotted-quad address field.
pub const MAX_ADDR_LEN: usize = 15;

/// Prompt printed when the metadata file cannot be opened.
const PROMPT: &str = "Provide file path to server metadata: ";

/// One parsed metadata line: the dial target for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub name: String,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for BackendSpec {
    /// Re-emits the record in the on-disk three-field format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.address, self.port)
    }
}

fn parse_line(line: &str) -> std::result::Result<BackendSpec, &'static str> {
    let mut fields = line.split_whitespace();
    let name = fields.next().ok_or("missing name field")?;
    let address = fields.next().ok_or("missing address field")?;
    let port = fields.next().ok_or("missing port field")?;

    if name.len() > MAX_NAME_LEN {
        return Err("name longer than 19 characters");
    }
    if address.len() > MAX_ADDR_LEN {
        return Err("address longer than 15 characters");
    }
    let address: Ipv4Addr = address.parse().map_err(|_| "address is not dotted-quad IPv4")?;
    let port: u16 = port.parse().map_err(|_| "port is not a decimal port number")?;

    Ok(BackendSpec {
        name: name.to_string(),
        address,
        port,
    })
}

/// Parse up to `capacity` backend records from `reader`.
///
/// Blank lines are skipped; malformed lines are skipped with a warning.
pub fn parse(reader: impl BufRead, capacity: usize) -> io::Result<Vec<BackendSpec>> {
    let mut specs = Vec::new();
    for line in reader.lines() {
        if specs.len() == capacity {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(spec) => {
                debug!(backend = %spec, "parsed metadata line");
                specs.push(spec);
            }
            Err(reason) => warn!(line = %line.trim(), reason, "skipping malformed metadata line"),
        }
    }
    Ok(specs)
}

/// Parse the metadata file at `path`.
pub fn load(path: &Path, capacity: usize) -> Result<Vec<BackendSpec>> {
    let file = File::open(path).map_err(|source| Error::MetadataOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse(BufReader::new(file), capacity)?)
}

/// Parse the metadata file at `path`, prompting on `output` and reading
/// replacement paths from `input` until a file opens.
///
/// The binary wires this to stdin/stdout; tests inject buffers. EOF on
/// `input` aborts with [`Error::MetadataAborted`] rather than spinning.
pub fn load_or_prompt(
    path: &Path,
    capacity: usize,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<Vec<BackendSpec>> {
    let mut path = PathBuf::from(path);
    loop {
        match load(&path, capacity) {
            Ok(specs) => return Ok(specs),
            Err(Error::MetadataOpen { path: failed, source }) => {
                warn!(path = %failed.display(), error = %source, "metadata file not openable");
            }
            Err(other) => return Err(other),
        }

        output.write_all(PROMPT.as_bytes())?;
        output.flush()?;

        let mut replacement = String::new();
        if input.read_line(&mut replacement)? == 0 {
            return Err(Error::MetadataAborted);
        }
        path = PathBuf::from(replacement.trim_end_matches(['\n', '\r']));
    }
}
