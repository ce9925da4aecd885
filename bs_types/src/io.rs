//!
//! Binary artifacts exchanged between shard processes: bincode, lz4 framed.
//!
//! Files are written under a temporary name and renamed into place, so a
//! reader in another process never sees a half-written artifact under its
//! final name.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{rename, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Serialize `value` to `path`.
pub fn write_bin<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let partial = partial_path(path);
    let file = File::create(&partial)
        .with_context(|| format!("could not open {} for writing", partial.display()))?;
    let mut encoder = lz4::EncoderBuilder::new()
        .build(BufWriter::new(file))
        .with_context(|| format!("could not start lz4 stream for {}", path.display()))?;
    bincode::serialize_into(&mut encoder, value)
        .with_context(|| format!("could not serialize {}", path.display()))?;
    let (mut writer, result) = encoder.finish();
    result.with_context(|| format!("could not finish lz4 stream for {}", path.display()))?;
    writer.flush()?;
    drop(writer);
    rename(&partial, path)
        .with_context(|| format!("could not move {} into place", path.display()))?;
    Ok(())
}

/// Deserialize a value previously written with [`write_bin`].
pub fn read_bin<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file =
        File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let decoder = lz4::Decoder::new(BufReader::new(file))
        .with_context(|| format!("could not start lz4 stream for {}", path.display()))?;
    bincode::deserialize_from(decoder)
        .with_context(|| format!("could not deserialize {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RatioRecord;

    #[test]
    fn test_artifact_is_readable_and_partial_removed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sample.data.bin");
        let records = vec![
            RatioRecord::new("1", 10, 0.5),
            RatioRecord::new("X", 20, 1.0),
        ];
        write_bin(&path, &records)?;
        assert!(!partial_path(&path).exists());
        let back: Vec<RatioRecord> = read_bin(&path)?;
        assert_eq!(back, records);
        Ok(())
    }

    #[test]
    fn test_missing_artifact_names_path() {
        let err = read_bin::<Vec<u8>>(Path::new("/nonexistent/acceptedLoci.bin")).unwrap_err();
        assert!(format!("{err:#}").contains("acceptedLoci.bin"));
    }

    #[test]
    fn test_garbage_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"not an lz4 frame")?;
        assert!(read_bin::<Vec<String>>(&path).is_err());
        Ok(())
    }
}
