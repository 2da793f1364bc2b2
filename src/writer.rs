//! Output file handling for pchunk.
//!
//! Output goes to a temporary file next to the destination and is only
//! moved into place by [`OutputWriter::finish`]. If the run fails and the
//! writer is dropped instead, the temporary file is deleted, so a failed
//! run never leaves a partial container or a truncated reconstruction.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

pub struct OutputWriter {
    inner: BufWriter<NamedTempFile>,
    target: PathBuf,
    overwrite: bool,
}

impl OutputWriter {
    /// Creates the temporary file in the target's directory.
    pub fn create(target: &Path, overwrite: bool) -> Result<Self> {
        if !overwrite && target.exists() {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                target.display()
            );
        }
        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create output file in {}", dir.display()))?;

        Ok(OutputWriter {
            inner: BufWriter::new(temp),
            target: target.to_path_buf(),
            overwrite,
        })
    }

    /// Flushes and moves the finished output into place.
    pub fn finish(self) -> Result<()> {
        let temp = self
            .inner
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to flush output file")?;
        temp.as_file()
            .sync_all()
            .context("Failed to sync output file")?;

        let persisted = if self.overwrite {
            temp.persist(&self.target)
        } else {
            temp.persist_noclobber(&self.target)
        };
        persisted
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write {}", self.target.display()))?;
        Ok(())
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
