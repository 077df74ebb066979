//! This module provides [Lockfile], which records the content hash and flattened tags of every file in the
//! config, along with the content store in which each file is kept under its hash.

use {
    crate::config::Config,
    anyhow::{anyhow, Result},
    images_shared::CandidateTag,
    serde_derive::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::{
        collections::BTreeMap,
        io::ErrorKind,
        path::{Path, PathBuf},
    },
    tokio::fs,
    tracing::{debug, info, warn},
};

/// Name of the directory (relative to the output directory) in which file contents are stored
pub const STORE_DIRECTORY: &str = ".hash";

/// Return the path (relative to the output directory) at which content with the specified `hash` is stored.
pub fn store_path(hash: &str) -> String {
    format!("{STORE_DIRECTORY}/{hash}")
}

/// What the lockfile records about a single file
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct FileLock {
    /// Where the content was read from
    pub source: String,

    /// Hex-encoded SHA-256 hash of the content
    pub hash: String,

    /// The file's tags, flattened
    #[serde(default)]
    pub tags: Vec<CandidateTag>,
}

/// Records the content hash and flattened tags of every file in the config, keyed by file ID
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct Lockfile {
    pub file_locks: BTreeMap<String, FileLock>,
}

impl Lockfile {
    /// Read a `Lockfile` from `path`, falling back to an empty one if there is no such file.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read(path).await {
            Ok(buffer) => Ok(serde_json::from_slice(&buffer)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{} not found, using empty lockfile instead", path.display());

                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write this `Lockfile` to `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec(self)?).await?;

        Ok(())
    }

    /// Generate a `Lockfile` for the specified `config`.
    ///
    /// Hashes are reused from `previous` for files whose source has not changed.  Any other file is read from its
    /// source and hashed, and, unless `dry` is set, its content is added to the store under `at`.
    pub async fn generate(config: &Config, previous: &Lockfile, at: &Path, dry: bool) -> Result<Self> {
        let mut file_locks = BTreeMap::new();

        for (id, file) in &config.files {
            let hash = match previous.file_locks.get(id) {
                Some(lock) if lock.source == file.source => lock.hash.clone(),
                _ => store(&file.source, at, dry).await?,
            };

            file_locks.insert(
                id.clone(),
                FileLock {
                    source: file.source.clone(),
                    hash,
                    tags: file.candidate_tags(),
                },
            );
        }

        Ok(Self { file_locks })
    }
}

/// Resolve a file source, which may be either a local path or a `file://` URI.
pub fn resolve_source(source: &str) -> Result<PathBuf> {
    if let Some(path) = source.strip_prefix("file://") {
        Ok(PathBuf::from(path))
    } else if source.contains("://") {
        Err(anyhow!(
            "unsupported source {source}: only local paths and file:// URIs may be used"
        ))
    } else {
        Ok(PathBuf::from(source))
    }
}

pub fn hash(data: &[u8]) -> String {
    let mut hasher = Sha256::default();

    hasher.update(data);

    hex::encode(hasher.finalize())
}

async fn store(source: &str, at: &Path, dry: bool) -> Result<String> {
    let content = fs::read(resolve_source(source)?)
        .await
        .map_err(|e| anyhow!("unable to read {source}: {e}"))?;

    let hash = hash(&content);

    if dry {
        debug!("dry run: not storing {source}");
    } else {
        let path = at.join(store_path(&hash));

        if fs::metadata(&path).await.is_err() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }

            fs::write(&path, &content).await?;

            info!("stored {source} as {}", path.display());
        }
    }

    Ok(hash)
}
