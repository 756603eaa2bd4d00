//! Rotating gzip batch files.
//!
//! Each file holds newline-delimited JSON log records, compressed on the
//! fly, and lives in the OS temp directory under a random 128-bit id. The
//! lifecycle is explicit: created by the logger, handed to the orchestrator
//! for upload, then deleted (or handed back for retry).

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

pub struct BatchFile {
    uuid: String,
    path: PathBuf,
    encoder: Option<GzEncoder<File>>,
    size: u64,
}

impl BatchFile {
    /// Create a new empty batch file in the OS temp directory.
    pub fn create() -> io::Result<Self> {
        let uuid = Uuid::new_v4().simple().to_string();
        let path = std::env::temp_dir().join(format!("apimeter-{uuid}.gz"));
        let file = File::create(&path)?;
        Ok(Self {
            uuid,
            path,
            encoder: Some(GzEncoder::new(file, Compression::default())),
            size: 0,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Uncompressed-equivalent bytes written so far, used for rotation.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append one record as a line. No-op once closed.
    pub fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.write_all(line)?;
            encoder.write_all(b"\n")?;
            self.size += line.len() as u64 + 1;
        }
        Ok(())
    }

    /// Finish the gzip stream. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(encoder) = self.encoder.take() {
            encoder.finish()?;
        }
        Ok(())
    }

    /// Close and read back the compressed content for upload.
    pub fn read_content(&mut self) -> io::Result<Vec<u8>> {
        self.close()?;
        std::fs::read(&self.path)
    }

    /// Close and remove the file from disk.
    pub fn delete(mut self) -> io::Result<()> {
        self.close()?;
        std::fs::remove_file(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn round_trips_ndjson_lines() {
        let mut file = BatchFile::create().unwrap();
        file.write_line(br#"{"a":1}"#).unwrap();
        file.write_line(br#"{"b":2}"#).unwrap();
        assert_eq!(file.size(), 16);

        let compressed = file.read_content().unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut content = String::new();
        decoder.read_to_string(&mut content).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"b\":2}\n");

        let path = file.path().to_path_buf();
        file.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn writes_after_close_are_ignored() {
        let mut file = BatchFile::create().unwrap();
        file.write_line(b"x").unwrap();
        file.close().unwrap();
        file.write_line(b"y").unwrap();
        assert_eq!(file.size(), 2);
        file.delete().unwrap();
    }
}
