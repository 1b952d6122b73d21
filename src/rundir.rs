//! The output directory of a sampling run.
//!
//! With a temporary directory, the engine never writes into the canonical
//! output path itself. Any previous output is copied into a fresh temporary
//! directory and the canonical path is replaced by a symbolic link to it.
//! When the run ends (or is interrupted) the link is removed and the
//! temporary directory is moved into place, so the canonical path only ever
//! changes through that single move.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use walkdir::WalkDir;

/// True if any of the variable names mentions MPI.
pub fn contains_mpi_variable<I, S>(names: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    names
        .into_iter()
        .any(|name| name.as_ref().to_string_lossy().contains("MPI"))
}

/// Whether this process looks like one rank of an MPI job.
pub fn mpi_environment_detected() -> bool {
    contains_mpi_variable(std::env::vars_os().map(|(key, _)| key))
}

#[derive(Debug)]
pub struct RunDirectory {
    outputfiles_basename: PathBuf,
    use_temporary_directory: bool,
    temporary: Option<PathBuf>,
}

impl RunDirectory {
    pub fn new(outputfiles_basename: impl AsRef<Path>, use_temporary_directory: bool) -> Self {
        // Drops a trailing separator, which would make link checks follow the link.
        let outputfiles_basename = outputfiles_basename.as_ref().components().collect();
        Self {
            outputfiles_basename,
            use_temporary_directory,
            temporary: None,
        }
    }

    pub fn outputfiles_basename(&self) -> &Path {
        &self.outputfiles_basename
    }

    pub fn uses_temporary_directory(&self) -> bool {
        self.use_temporary_directory
    }

    /// The temporary directory while the run is in progress.
    pub fn temporary_directory(&self) -> Option<&Path> {
        self.temporary.as_deref()
    }

    /// Prepare the output location before the engine starts.
    pub fn setup(&mut self) -> Result<()> {
        if !self.use_temporary_directory {
            fs::create_dir_all(&self.outputfiles_basename).with_context(|| {
                format!(
                    "Failed to create output directory {:?}",
                    self.outputfiles_basename
                )
            })?;
            info!("Using output file {}", self.outputfiles_basename.display());
            return Ok(());
        }

        let temporary = tempfile::Builder::new()
            .prefix("gwnest-")
            .tempdir()
            .context("Failed to create temporary directory")?
            .into_path();

        let canonical = &self.outputfiles_basename;
        if let Ok(metadata) = fs::symlink_metadata(canonical) {
            copy_tree(canonical, &temporary)?;
            let removed = if metadata.file_type().is_symlink() {
                fs::remove_file(canonical)
            } else {
                fs::remove_dir_all(canonical)
            };
            removed.with_context(|| format!("Failed to remove {:?}", canonical))?;
        }

        if let Some(parent) = canonical.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }
        std::os::unix::fs::symlink(&temporary, canonical).with_context(|| {
            format!("Failed to link {:?} to {:?}", canonical, temporary)
        })?;

        info!("Using temporary file {}", temporary.display());
        self.temporary = Some(temporary);
        Ok(())
    }

    /// Replace whatever is at the canonical path with the temporary directory.
    ///
    /// Does nothing if no temporary directory is in use, so it is safe to call
    /// more than once. The temporary directory stays tracked until the move
    /// succeeds.
    pub fn move_temporary_directory_to_proper_path(&mut self) -> Result<()> {
        let Some(temporary) = self.temporary.clone() else {
            return Ok(());
        };
        let canonical = &self.outputfiles_basename;
        info!(
            "Overwriting {} with {}",
            canonical.display(),
            temporary.display()
        );

        match fs::symlink_metadata(canonical) {
            Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(canonical)
                .with_context(|| format!("Failed to remove link {:?}", canonical))?,
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(canonical)
                .with_context(|| format!("Failed to remove {:?}", canonical))?,
            _ => {}
        }
        move_directory(&temporary, canonical)?;
        self.temporary = None;
        Ok(())
    }

    /// Finish the run: move the temporary directory back if there is one.
    pub fn clean_up(&mut self) -> Result<()> {
        if self.use_temporary_directory {
            self.move_temporary_directory_to_proper_path()?;
        }
        Ok(())
    }
}

/// Rename `source` to `target`, copying when they are on different devices.
fn move_directory(source: &Path, target: &Path) -> Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    copy_tree(source, target)?;
    fs::remove_dir_all(source).with_context(|| format!("Failed to remove {:?}", source))
}

/// Copy the contents of `source` into `target`, creating it if needed.
fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to read {:?}", source))?;
        let relative = entry.path().strip_prefix(source)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
                .with_context(|| format!("Failed to create {:?}", destination))?;
        } else {
            fs::copy(entry.path(), &destination).with_context(|| {
                format!("Failed to copy {:?} to {:?}", entry.path(), destination)
            })?;
        }
    }
    Ok(())
}
