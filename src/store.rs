//! Virtual filesystem root for persisted models
//!
//! A model root is either a plain directory or a zip archive, chosen by
//! inspecting the path's extension at rest. Writers synthesize a fresh
//! archive when the target does not exist; handles are closed on both the
//! success and failure paths (RAII on drop, central directory on `finish`).

use crate::core::{Result, TrainError};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

fn is_archive(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zip")
}

/// Write side of a model root
pub enum ModelWriter {
    Dir(PathBuf),
    Zip(ZipWriter<File>),
}

impl ModelWriter {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if is_archive(path) {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            Ok(ModelWriter::Zip(ZipWriter::new(File::create(path)?)))
        } else {
            fs::create_dir_all(path)?;
            Ok(ModelWriter::Dir(path.to_path_buf()))
        }
    }

    pub fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        match self {
            ModelWriter::Dir(root) => {
                fs::write(root.join(name), bytes)?;
                Ok(())
            }
            ModelWriter::Zip(writer) => {
                writer
                    .start_file(name, FileOptions::default())
                    .map_err(zip_error)?;
                writer.write_all(bytes)?;
                Ok(())
            }
        }
    }

    /// Finalize the root. Required for archives so the central directory
    /// is written.
    pub fn finish(self) -> Result<()> {
        match self {
            ModelWriter::Dir(_) => Ok(()),
            ModelWriter::Zip(mut writer) => {
                writer.finish().map_err(zip_error)?;
                Ok(())
            }
        }
    }
}

/// Read side of a model root
pub enum ModelReader {
    Dir(PathBuf),
    Zip(ZipArchive<File>),
}

impl ModelReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if is_archive(path) {
            let archive = ZipArchive::new(File::open(path)?).map_err(zip_error)?;
            Ok(ModelReader::Zip(archive))
        } else {
            Ok(ModelReader::Dir(path.to_path_buf()))
        }
    }

    pub fn get(&mut self, name: &str) -> Result<Vec<u8>> {
        match self {
            ModelReader::Dir(root) => {
                let path = root.join(name);
                fs::read(&path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        TrainError::MissingEntry(name.to_string())
                    } else {
                        TrainError::Io(e)
                    }
                })
            }
            ModelReader::Zip(archive) => {
                let mut entry = archive.by_name(name).map_err(|e| match e {
                    ZipError::FileNotFound => TrainError::MissingEntry(name.to_string()),
                    other => zip_error(other),
                })?;
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

fn zip_error(e: ZipError) -> TrainError {
    match e {
        ZipError::Io(io) => TrainError::Io(io),
        other => TrainError::Serialization(format!("archive error: {other}")),
    }
}
