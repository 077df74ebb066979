//! This module provides [Linkfile], which maps each stored file to the symlinks which should point at it, one per
//! tag of each file with that content, and [write_links], which applies a [FileDiff] to the output directory.
//!
//! A file with ID "1649270400000" tagged "animal" and "name:fido" is linked at `animal/1649270400000` and
//! `name/fido/1649270400000`.  Dotted tag paths become nested directories, so "fur.black" yields
//! `fur/black/1649270400000`.

use {
    crate::{
        diff::{FileDiff, FileType},
        lockfile::{self, FileLock, Lockfile},
    },
    anyhow::Result,
    futures::future,
    std::{
        collections::BTreeMap,
        env, io,
        io::ErrorKind,
        path::{Path, PathBuf},
    },
    tokio::fs,
    tracing::debug,
};

/// Maps the path of each stored file (e.g. ".hash/<hash>") to the paths of the links which point at it, all
/// relative to the output directory
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Linkfile {
    pub links: BTreeMap<String, Vec<String>>,
}

impl From<&Lockfile> for Linkfile {
    /// Generate a `Linkfile` from the specified `lockfile`, merging the links of files which share content.
    fn from(lockfile: &Lockfile) -> Self {
        let mut links = BTreeMap::new();

        for (id, lock) in &lockfile.file_locks {
            links
                .entry(lockfile::store_path(&lock.hash))
                .or_insert_with(Vec::new)
                .extend(link_paths(lock, id));
        }

        Self { links }
    }
}

fn path_segment(segment: &str) -> String {
    segment.replace(|c: char| c == '/' || c == '\\', "_")
}

/// Generate the paths (relative to the output directory) of the links for the file with the specified `id`.
pub fn link_paths(lock: &FileLock, id: &str) -> Vec<String> {
    lock.tags
        .iter()
        .map(|tag| {
            tag.path
                .iter()
                .chain(&tag.value)
                .map(|segment| path_segment(segment))
                .chain([path_segment(id)])
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect()
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink_file(target, link).await
}

/// Create a symlink at `link` pointing to `target`, creating any missing parent directories and replacing
/// whatever was at `link` before.
async fn ensure_symlink(target: PathBuf, link: PathBuf) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).await?;
    }

    if fs::symlink_metadata(&link).await.is_ok() {
        fs::remove_file(&link).await?;
    }

    symlink(&target, &link).await?;

    debug!("linked {} -> {}", link.display(), target.display());

    Ok(())
}

async fn remove(path: PathBuf) -> Result<()> {
    match fs::remove_file(&path).await {
        Ok(()) => {
            debug!("removed {}", path.display());

            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} was already removed", path.display());

            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Apply the specified `diff` to the output directory `at`.
///
/// Removed links and stored files are deleted first, and then links are created for every created link entry.
/// Created stored files are expected to have been written already (see [Lockfile::generate]).  Links point to
/// absolute paths.
pub async fn write_links(diff: &FileDiff, at: &Path) -> Result<()> {
    let at = absolute(at)?;

    future::try_join_all(diff.removed.iter().map(|file| {
        remove(at.join(match file {
            FileType::File { path } => path,
            FileType::Link { to, .. } => to,
        }))
    }))
    .await?;

    future::try_join_all(diff.created.iter().filter_map(|file| match file {
        FileType::File { .. } => None,
        FileType::Link { from, to } => Some(ensure_symlink(at.join(from), at.join(to))),
    }))
    .await?;

    Ok(())
}
