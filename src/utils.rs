//! Utility functions for files and store basenames.

use crate::StoreError;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

//-----------------------------------------------------------------------------

// Store files and basenames.

/// Extension of the file containing the entry chunks.
pub const ENTRIES_EXTENSION: &str = ".entries";
/// Extension of the header file.
pub const HEADER_EXTENSION: &str = ".header";
/// Extension of the chunk index of a sorted store.
pub const INDEX_EXTENSION: &str = ".index";
/// Extension of the too-many-hits ledger.
pub const TMH_EXTENSION: &str = ".tmh";
/// Extension of the query index permutation.
pub const PERMUTATION_EXTENSION: &str = ".perm";
/// Extension of the statistics file.
pub const STATS_EXTENSION: &str = ".stats";

/// All extensions used by the files of a store.
pub const STORE_EXTENSIONS: [&str; 6] = [
    ENTRIES_EXTENSION, HEADER_EXTENSION, INDEX_EXTENSION, TMH_EXTENSION, PERMUTATION_EXTENSION, STATS_EXTENSION,
];

/// Returns the basename of a store file by removing a known store extension.
///
/// Names without a known extension are returned unchanged.
pub fn get_basename(name: &str) -> String {
    for extension in STORE_EXTENSIONS.iter() {
        if let Some(basename) = name.strip_suffix(extension) {
            return basename.to_string();
        }
    }
    name.to_string()
}

/// Resolves a store name to a local basename.
///
/// Known store extensions and a `file://` prefix are removed.
/// Remote stores (`http://`, `https://`) are recognized but not supported.
pub fn resolve_basename<P: AsRef<Path>>(name: P) -> Result<PathBuf, StoreError> {
    let name = name.as_ref().to_string_lossy();
    if name.starts_with("http://") || name.starts_with("https://") {
        return Err(StoreError::Unsupported(format!("Remote store {}", name)));
    }
    let name = name.strip_prefix("file://").unwrap_or(&name);
    Ok(PathBuf::from(get_basename(name)))
}

/// Returns the name of the store file with the given extension.
pub fn store_file<P: AsRef<Path>>(basename: P, extension: &str) -> PathBuf {
    let mut name = basename.as_ref().as_os_str().to_os_string();
    name.push(extension);
    PathBuf::from(name)
}

/// Deletes all files of the store that exist.
pub fn remove_store<P: AsRef<Path>>(basename: P) {
    for extension in STORE_EXTENSIONS.iter() {
        let _ = fs::remove_file(store_file(&basename, extension));
    }
}

//-----------------------------------------------------------------------------

// Utilities for working with files.

const SIZE_UNITS: [(f64, &str); 6] = [
    (1.0, "B"),
    (1024.0, "KiB"),
    (1024.0 * 1024.0, "MiB"),
    (1024.0 * 1024.0 * 1024.0, "GiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0, "TiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0, "PiB"),
];

/// Returns a human-readable representation of the given number of bytes.
pub fn human_readable_size(bytes: usize) -> String {
    let mut unit = 0;
    let value = bytes as f64;
    while unit + 1 < SIZE_UNITS.len() && value >= SIZE_UNITS[unit + 1].0 {
        unit += 1;
    }
    format!("{:.3} {}", value / SIZE_UNITS[unit].0, SIZE_UNITS[unit].1)
}

/// Returns a human-readable size of the file.
pub fn file_size<P: AsRef<Path>>(filename: P) -> Option<String> {
    let metadata = fs::metadata(filename).ok()?;
    Some(human_readable_size(metadata.len() as usize))
}

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns `true` if the file appears to be gzip-compressed.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    let file = match File::open(filename) {
        Ok(file) => file,
        Err(_) => return false,
    };
    let mut reader = BufReader::new(file);
    let mut magic = [0; 2];
    let len = reader.read(&mut magic).ok();
    len == Some(2) && magic == [0x1F, 0x8B]
}

/// Returns a buffered reader for the file, which may be gzip-compressed.
pub fn open_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn BufRead>, StoreError> {
    let file = File::open(&filename).map_err(|err| {
        std::io::Error::new(err.kind(), format!("{}: {}", filename.as_ref().display(), err))
    })?;
    let inner = BufReader::new(file);
    if is_gzipped(&filename) {
        let inner = MultiGzDecoder::new(inner);
        Ok(Box::new(BufReader::new(inner)))
    } else {
        Ok(Box::new(inner))
    }
}

/// Reads the entire file, which may be gzip-compressed.
pub fn read_file<P: AsRef<Path>>(filename: P) -> Result<Vec<u8>, StoreError> {
    let mut reader = open_file(filename)?;
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Writes the data to a gzip-compressed file.
pub fn write_gzipped<P: AsRef<Path>>(filename: P, data: &[u8]) -> Result<(), StoreError> {
    let file = File::create(filename)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    encoder.write_all(data)?;
    let mut inner = encoder.finish()?;
    inner.flush()?;
    Ok(())
}

//-----------------------------------------------------------------------------

// Statistics files as `key=value` lines.

/// Writes the statistics to a file with one `key=value` pair per line.
pub fn write_properties<P: AsRef<Path>>(filename: P, properties: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let mut writer = BufWriter::new(File::create(filename)?);
    for (key, value) in properties.iter() {
        writeln!(writer, "{}={}", key, value)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads statistics written with [`write_properties`].
///
/// Empty lines and lines starting with `#` are ignored.
pub fn read_properties<P: AsRef<Path>>(filename: P) -> Result<BTreeMap<String, String>, StoreError> {
    let reader = open_file(&filename)?;
    let mut result = BTreeMap::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            StoreError::format(format!("{}: line {} is not a key=value pair", filename.as_ref().display(), line_num + 1))
        })?;
        result.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(result)
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
