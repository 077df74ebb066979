//! This module provides [Config], the user-editable JSON file listing every file in the database along with its
//! source and tags, e.g.:
//!
//! ```json
//! {
//!   "files": {
//!     "1649270400000": {
//!       "source": "photos/dolly.jpg",
//!       "tags": ["animal", "name:dolly", { "fur.color": "white" }]
//!     }
//!   }
//! }
//! ```

use {
    crate::{
        diff::{self, FileDiff},
        linkfile::Linkfile,
        lockfile::Lockfile,
    },
    anyhow::Result,
    images_shared::{
        search::{self, Expr},
        Action, CandidateTag, ConfigTag, TagEdit,
    },
    serde_derive::{Deserialize, Serialize},
    std::{collections::BTreeMap, io::ErrorKind, path::Path},
    tokio::fs,
    tracing::warn,
};

/// Metadata for a single file
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct FileInfo {
    /// Where to read the file's content from: a local path or a `file://` URI
    pub source: String,

    /// The file's tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<ConfigTag>,
}

impl FileInfo {
    /// Flatten this file's tags into the form search queries are matched against.
    pub fn candidate_tags(&self) -> Vec<CandidateTag> {
        self.tags.iter().flat_map(ConfigTag::flatten).collect()
    }

    /// Add or remove a tag.
    ///
    /// Adding a tag the file already has does nothing.  Removing a tag removes it wherever it appears, including
    /// from within mappings.
    pub fn apply(&mut self, edit: &TagEdit) {
        match edit.action {
            Action::Add => {
                if !self.candidate_tags().contains(&edit.tag) {
                    self.tags.push(ConfigTag::from(&edit.tag));
                }
            }

            Action::Remove => self.tags.retain_mut(|tag| tag.remove(&edit.tag)),
        }
    }
}

/// The set of files in the database, keyed by ID
///
/// IDs are millisecond timestamps recording when each file was added, so key order is also insertion order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub files: BTreeMap<String, FileInfo>,
}

/// The result of [Config::edit]
pub struct Edit {
    /// The edited config
    pub config: Config,

    /// The lockfile generated from the edited config
    pub lockfile: Lockfile,

    /// The links required by the edited config
    pub linkfile: Linkfile,

    previous: Linkfile,
}

impl Edit {
    /// Determine the changes to the output directory needed to go from the links of the unedited config to those
    /// of the edited one.
    pub fn diff(&self) -> FileDiff {
        diff::generate_file_diff(&self.linkfile, &self.previous)
    }
}

impl Config {
    /// Read a `Config` from `path`, falling back to an empty one if there is no such file.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read(path).await {
            Ok(buffer) => Ok(serde_json::from_slice(&buffer)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{} not found, using empty config instead", path.display());

                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write this `Config` to `path` as indented JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?).await?;

        Ok(())
    }

    /// Return the files matching the specified query, in ID order.
    pub fn search(&self, query: &[Expr]) -> BTreeMap<&str, &FileInfo> {
        self.files
            .iter()
            .filter(|(_, file)| search::matches(&file.candidate_tags(), query))
            .map(|(id, file)| (id.as_str(), file))
            .collect()
    }

    /// Apply `edits` to a copy of this config and compute the resulting lockfile and links.
    ///
    /// `previous` is the lockfile corresponding to this config.  See [Lockfile::generate] for the meaning of `at`
    /// and `dry`.  Nothing besides the content store is written; it is up to the caller to save the results and
    /// apply [Edit::diff].
    pub async fn edit(
        &self,
        edits: impl FnOnce(&mut Config) -> Result<()>,
        previous: &Lockfile,
        at: &Path,
        dry: bool,
    ) -> Result<Edit> {
        let mut config = self.clone();

        edits(&mut config)?;

        let lockfile = Lockfile::generate(&config, previous, at, dry).await?;
        let linkfile = Linkfile::from(&lockfile);

        Ok(Edit {
            config,
            lockfile,
            linkfile,
            previous: Linkfile::from(previous),
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::diff::FileType,
        anyhow::anyhow,
        maplit::btreemap,
        tempfile::TempDir,
    };

    fn file(source: &str, tags: &[&str]) -> FileInfo {
        FileInfo {
            source: source.to_owned(),
            tags: tags
                .iter()
                .map(|&tag| ConfigTag::Plain(tag.to_owned()))
                .collect(),
        }
    }

    fn config() -> Config {
        Config {
            files: btreemap![
                "1".to_owned() => file("1.png", &["animal:sheep", "cat"]),
                "2".to_owned() => file("2.png", &["animal:sheep", "wolf"]),
                "3".to_owned() => file("3.png", &["animal:sheep", "wolf", "dog"]),
                "4".to_owned() => file("4.png", &["wolf", "dog"]),
            ],
        }
    }

    #[test]
    fn searches() -> Result<()> {
        let config = config();

        assert_eq!(
            vec!["1", "2"],
            config
                .search(&search::parse("+animal [+cat ~wolf] -dog")?)
                .into_keys()
                .collect::<Vec<_>>()
        );

        assert_eq!(
            vec!["1", "2", "3", "4"],
            config.search(&search::parse("")?).into_keys().collect::<Vec<_>>()
        );

        assert!(config.search(&search::parse("+animal:goat")?).is_empty());

        Ok(())
    }

    #[test]
    fn apply() -> Result<()> {
        let mut file = FileInfo {
            source: "1.png".to_owned(),
            tags: vec![
                ConfigTag::Plain("animal".into()),
                ConfigTag::Mapping(btreemap![
                    "name".to_owned() => "fido".to_owned(),
                    "size".to_owned() => "big".to_owned(),
                ]),
            ],
        };

        file.apply(&"+animal".parse()?);
        file.apply(&"+fur.black".parse()?);
        file.apply(&"+name:rex".parse()?);
        file.apply(&"-name:fido".parse()?);
        file.apply(&"-size:big".parse()?);
        file.apply(&"-animal".parse()?);

        assert_eq!(
            vec![
                ConfigTag::Plain("fur.black".into()),
                ConfigTag::Mapping(btreemap!["name".to_owned() => "rex".to_owned()]),
            ],
            file.tags
        );

        Ok(())
    }

    #[tokio::test]
    async fn load_and_save() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("images.config.json");

        assert_eq!(Config::default(), Config::load(&path).await?);

        let config = Config {
            files: btreemap![
                "1".to_owned() => FileInfo {
                    source: "a.png".to_owned(),
                    tags: vec![
                        ConfigTag::Plain("animal".into()),
                        ConfigTag::Mapping(btreemap!["name".to_owned() => "bree bree".to_owned()]),
                    ],
                },
                "2".to_owned() => file("b.png", &[]),
            ],
        };

        config.save(&path).await?;

        assert_eq!(
            r#"{
  "files": {
    "1": {
      "source": "a.png",
      "tags": [
        "animal",
        {
          "name": "bree bree"
        }
      ]
    },
    "2": {
      "source": "b.png"
    }
  }
}"#,
            String::from_utf8(fs::read(&path).await?)?
        );
        assert_eq!(config, Config::load(&path).await?);

        Ok(())
    }

    #[tokio::test]
    async fn edit() -> Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("sheep.txt");
        fs::write(&source, b"baa").await?;
        let source = source
            .to_str()
            .ok_or_else(|| anyhow!("invalid UTF-8"))?
            .to_owned();

        let empty = Config::default();

        let edit = empty
            .edit(
                |config| {
                    config
                        .files
                        .insert("1".to_owned(), file(&source, &["animal", "name:dolly"]));

                    Ok(())
                },
                &Lockfile::default(),
                dir.path(),
                true,
            )
            .await?;

        assert_eq!(1, edit.config.files.len());
        assert!(empty.files.is_empty());

        let stored = crate::lockfile::store_path(&edit.lockfile.file_locks["1"].hash);

        assert_eq!(
            vec![
                FileType::File {
                    path: stored.clone()
                },
                FileType::Link {
                    from: stored.clone(),
                    to: "animal/1".to_owned()
                },
                FileType::Link {
                    from: stored,
                    to: "name/dolly/1".to_owned()
                },
            ],
            edit.diff().created
        );
        assert!(edit.diff().removed.is_empty());

        // Errors from the edit function are propagated.
        assert!(empty
            .edit(
                |_| Err(anyhow!("nope")),
                &Lockfile::default(),
                dir.path(),
                true
            )
            .await
            .is_err());

        Ok(())
    }
}
