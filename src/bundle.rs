use std::fs::{self, File};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::domain::FetchedFile;
use crate::error::BotError;

/// Zip archive of fetched songs, sent as a single document.
pub struct BundleWriter {
    path: Utf8PathBuf,
    writer: ZipWriter<File>,
    entries: usize,
    payload_bytes: u64,
}

impl BundleWriter {
    pub fn create(path: &Utf8Path) -> Result<Self, BotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| BotError::Filesystem(err.to_string()))?;
        }
        let file = File::create(path.as_std_path())
            .map_err(|err| BotError::Bundle(format!("create {path}: {err}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: ZipWriter::new(file),
            entries: 0,
            payload_bytes: 0,
        })
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Total size of the files packed so far, without zip headers.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    /// Appends `file` under a numbered entry name that keeps playlist order.
    pub fn add(&mut self, file: &FetchedFile) -> Result<(), BotError> {
        let base = file.path.file_name().unwrap_or("track.mp3");
        let name = format!("{:02} - {base}", self.entries + 1);
        // mp3 does not compress further
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        self.writer
            .start_file(name, options)
            .map_err(|err| BotError::Bundle(err.to_string()))?;
        let mut source = File::open(file.path.as_std_path())
            .map_err(|err| BotError::Bundle(format!("open {}: {err}", file.path)))?;
        io::copy(&mut source, &mut self.writer)
            .map_err(|err| BotError::Bundle(err.to_string()))?;
        self.entries += 1;
        self.payload_bytes += file.size_bytes;
        Ok(())
    }

    pub fn finish(self) -> Result<FetchedFile, BotError> {
        self.writer
            .finish()
            .map_err(|err| BotError::Bundle(err.to_string()))?;
        let size_bytes = fs::metadata(self.path.as_std_path())
            .map_err(|err| BotError::Filesystem(err.to_string()))?
            .len();
        Ok(FetchedFile {
            path: self.path,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_keeps_order_in_entry_names() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let first = root.join("b.mp3");
        let second = root.join("a.mp3");
        fs::write(first.as_std_path(), b"first").unwrap();
        fs::write(second.as_std_path(), b"second").unwrap();

        let mut bundle = BundleWriter::create(&root.join("out/playlist.zip")).unwrap();
        for path in [&first, &second] {
            let size_bytes = fs::metadata(path.as_std_path()).unwrap().len();
            bundle
                .add(&FetchedFile {
                    path: path.clone(),
                    size_bytes,
                })
                .unwrap();
        }
        assert_eq!(bundle.entries(), 2);
        assert_eq!(bundle.payload_bytes(), 11);
        let archive = bundle.finish().unwrap();
        assert!(archive.size_bytes > 0);

        let file = File::open(archive.path.as_std_path()).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.by_index(0).unwrap().name(), "01 - b.mp3");
        assert_eq!(zip.by_index(1).unwrap().name(), "02 - a.mp3");
    }
}
