//! Idempotent bind links inside the container device tree

use super::path::ResolvedPath;
use crate::error::BindError;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, symlink};
use std::path::Path;
use tracing::{debug, warn};

/// Result of [`BindLinker::ensure_bind_link`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Created,
    AlreadyPresent,
    /// The node is attached at its host path
    NotRequired,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BindLinker;

impl BindLinker {
    pub fn new() -> Self {
        Self
    }

    /// Make `resolved.bind_target` resolve to `resolved.host_path`
    ///
    /// Creates missing parent directories and a symlink. An existing symlink
    /// is kept as is; an existing regular entry is kept only when it is the
    /// host node itself.
    pub fn ensure_bind_link(&self, resolved: &ResolvedPath) -> Result<LinkStatus, BindError> {
        if !resolved.requires_bind() {
            return Ok(LinkStatus::NotRequired);
        }

        let target = &resolved.bind_target;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BindError::from_io(parent, e))?;
        }

        match fs::symlink_metadata(target) {
            Ok(meta) if meta.file_type().is_symlink() => {
                check_existing_link(target, &resolved.host_path);
                Ok(LinkStatus::AlreadyPresent)
            }
            Ok(meta) => {
                if same_file(&meta, &resolved.host_path) {
                    debug!("{} already is the host node", target.display());
                    Ok(LinkStatus::AlreadyPresent)
                } else {
                    Err(BindError::Occupied {
                        path: target.clone(),
                        expected: resolved.host_path.clone(),
                    })
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match symlink(&resolved.host_path, target) {
                    Ok(()) => {
                        debug!(
                            "Linked {} -> {}",
                            target.display(),
                            resolved.host_path.display()
                        );
                        Ok(LinkStatus::Created)
                    }
                    // Another trigger for the same event got there first
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        Ok(LinkStatus::AlreadyPresent)
                    }
                    Err(e) => Err(BindError::from_io(target, e)),
                }
            }
            Err(e) => Err(BindError::from_io(target, e)),
        }
    }

    /// The equivalent shell step, for failure reports
    pub fn describe(&self, resolved: &ResolvedPath) -> String {
        let parent = resolved
            .bind_target
            .parent()
            .unwrap_or_else(|| Path::new("/"));
        format!(
            "mkdir -p {} && ln -s {} {}",
            parent.display(),
            resolved.host_path.display(),
            resolved.bind_target.display()
        )
    }
}

fn check_existing_link(target: &Path, host_path: &Path) {
    match fs::read_link(target) {
        Ok(points_to) if points_to == host_path => {
            debug!("{} already linked", target.display());
        }
        Ok(points_to) => {
            warn!(
                "{} points to {}, expected {}; leaving it in place",
                target.display(),
                points_to.display(),
                host_path.display()
            );
        }
        Err(e) => debug!("Could not read link {}: {}", target.display(), e),
    }
}

fn same_file(existing: &fs::Metadata, host_path: &Path) -> bool {
    match fs::metadata(host_path) {
        Ok(host) => existing.dev() == host.dev() && existing.ino() == host.ino(),
        Err(_) => false,
    }
}
