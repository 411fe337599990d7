// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Writes acquired pages to disk as `<prefix><index>.<ext>`.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use scanwerk_core::error::Result;
use scanwerk_core::selection::ImageSink;
use scanwerk_core::types::AcquiredImage;

pub struct FileSink<W> {
    dir: PathBuf,
    prefix: String,
    /// Progress messages for the user.
    out: W,
    saved: Vec<PathBuf>,
}

impl<W: Write> FileSink<W> {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, out: W) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            out,
            saved: Vec::new(),
        }
    }

    pub fn path_for(&self, image: &AcquiredImage) -> PathBuf {
        self.dir.join(format!(
            "{}{}.{}",
            self.prefix,
            image.index,
            image.file_extension()
        ))
    }

    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<W: Write> ImageSink for FileSink<W> {
    fn acquisition_started(&mut self) {
        let _ = writeln!(self.out, "Images acquisition is started...");
    }

    fn save_image(&mut self, image: AcquiredImage) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&image);
        // Pages from an earlier run are replaced, never appended to.
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        std::fs::write(&path, &image.data)?;
        info!(
            path = %path.display(),
            bytes = image.len(),
            sha256 = %image.sha256_hex(),
            "page saved"
        );
        let _ = writeln!(self.out, "Image{} is saved.", image.index);
        self.saved.push(path);
        Ok(())
    }
}
