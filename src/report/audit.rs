//! On-disk store of verdicts, one file per run.

use super::{from_json, to_json, JsonFormat, QualityVerdict};
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const PLAIN_EXT: &str = ".json";
const GZIP_EXT: &str = ".json.gz";

/// Writes and reads audit reports under a directory.
///
/// Reports are named `<run_id>.json`, or `<run_id>.json.gz` when compressed.
#[derive(Debug, Clone)]
pub struct AuditStore {
    dir: PathBuf,
    compressed: bool,
    format: JsonFormat,
}

impl AuditStore {
    /// Create a store writing pretty, uncompressed JSON.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compressed: false,
            format: JsonFormat::Pretty,
        }
    }

    /// Gzip reports on write.
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Set the JSON layout.
    pub fn with_format(mut self, format: JsonFormat) -> Self {
        self.format = format;
        self
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a verdict, returning the file path.
    pub fn save(&self, verdict: &QualityVerdict) -> Result<PathBuf> {
        validate_run_id(&verdict.run_id)?;
        fs::create_dir_all(&self.dir)?;

        let json = to_json(verdict, self.format)?;
        let ext = if self.compressed { GZIP_EXT } else { PLAIN_EXT };
        let path = self.dir.join(format!("{}{}", verdict.run_id, ext));

        let file = BufWriter::new(File::create(&path)?);
        if self.compressed {
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(json.as_bytes())?;
            encoder.finish()?.flush()?;
        } else {
            let mut file = file;
            file.write_all(json.as_bytes())?;
            file.flush()?;
        }

        log::info!("audit report written to {}", path.display());
        Ok(path)
    }

    /// Read the report of a run, compressed or not.
    pub fn load(&self, run_id: &str) -> Result<QualityVerdict> {
        validate_run_id(run_id)?;
        let gz = self.dir.join(format!("{}{}", run_id, GZIP_EXT));
        if gz.exists() {
            return Self::load_path(&gz);
        }
        Self::load_path(self.dir.join(format!("{}{}", run_id, PLAIN_EXT)))
    }

    /// Read a report file; `.gz` files are decompressed.
    pub fn load_path(path: impl AsRef<Path>) -> Result<QualityVerdict> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut json = String::new();
        if path.extension().is_some_and(|e| e == "gz") {
            GzDecoder::new(reader).read_to_string(&mut json)?;
        } else {
            let mut reader = reader;
            reader.read_to_string(&mut json)?;
        }
        from_json(&json)
    }

    /// Run ids with a stored report, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let id = name
                .strip_suffix(GZIP_EXT)
                .or_else(|| name.strip_suffix(PLAIN_EXT));
            if let Some(id) = id {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid run id '{}'", run_id)))
    }
}
