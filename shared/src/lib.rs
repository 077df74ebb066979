//! Shared code for the `images` local file database
//!
//! This crate contains the types describing how files are tagged, as stored in the JSON config and as seen by
//! the search engine.  It performs no I/O of its own; persistence and filesystem work live in `images-cli`.
//!
//! The `search` submodule defines the query language used to select files by tag, e.g.
//! `+animal [~dog ~cat] -name:fido`.

#![deny(warnings)]

use {
    anyhow::{anyhow, Error},
    lazy_static::lazy_static,
    regex::Regex,
    serde::{Deserializer, Serializer},
    serde_derive::{Deserialize, Serialize},
    std::{
        collections::BTreeMap,
        fmt::{self, Display},
        str::FromStr,
    },
};

pub mod search;

/// A single tag attached to a file, as matched by search queries
///
/// Files may be tagged in the config using either plain strings or mappings (see [ConfigTag]); both forms are
/// flattened into a list of `CandidateTag`s before matching.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash)]
pub struct CandidateTag {
    /// Hierarchical path of the tag, e.g. `["fur", "black"]` for "fur.black"
    pub path: Vec<String>,

    /// Value of the tag, if any
    pub value: Option<String>,
}

impl CandidateTag {
    /// Create a `CandidateTag` from a dot-delimited `path` and an optional `value`.
    pub fn new(path: &str, value: Option<&str>) -> Self {
        Self {
            path: path.split('.').map(String::from).collect(),
            value: value.map(String::from),
        }
    }
}

impl From<&str> for CandidateTag {
    /// Convert a string such as "fur.black" or "name:fido" into a `CandidateTag`, splitting at the first colon.
    fn from(s: &str) -> Self {
        if let Some((path, value)) = s.split_once(':') {
            Self::new(path, Some(value))
        } else {
            Self::new(s, None)
        }
    }
}

impl Display for CandidateTag {
    /// Convert a `CandidateTag` to a string, e.g. "fur.black" or "name:fido".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join("."))?;

        if let Some(value) = &self.value {
            write!(f, ":{value}")?;
        }

        Ok(())
    }
}

impl<'de> serde::Deserialize<'de> for CandidateTag {
    /// Deserialize a `CandidateTag` using `CandidateTag::from`.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self::from(String::deserialize(deserializer)?.as_str()))
    }
}

impl serde::Serialize for CandidateTag {
    /// Serialize a `CandidateTag` using `CandidateTag::fmt`.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A tag entry as it appears in a file's `tags` list in the config
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(untagged)]
pub enum ConfigTag {
    /// A string of the form "path" or "path:value"
    Plain(String),

    /// A mapping from paths to values, each entry of which is a separate tag
    Mapping(BTreeMap<String, String>),
}

impl ConfigTag {
    /// Flatten this entry into the tags it represents.
    pub fn flatten(&self) -> Vec<CandidateTag> {
        match self {
            Self::Plain(s) => vec![CandidateTag::from(s.as_str())],
            Self::Mapping(map) => map
                .iter()
                .map(|(path, value)| CandidateTag::new(path, Some(value)))
                .collect(),
        }
    }

    /// Remove every occurrence of `tag` from this entry, returning `false` if nothing is left of it.
    pub fn remove(&mut self, tag: &CandidateTag) -> bool {
        match self {
            Self::Plain(s) => CandidateTag::from(s.as_str()) != *tag,
            Self::Mapping(map) => {
                map.retain(|path, value| CandidateTag::new(path, Some(value)) != *tag);
                !map.is_empty()
            }
        }
    }
}

impl From<&CandidateTag> for ConfigTag {
    /// Convert a `CandidateTag` to the form used when adding tags to the config: a single-entry mapping if it has a
    /// value, or a plain path otherwise.
    fn from(tag: &CandidateTag) -> Self {
        let path = tag.path.join(".");

        if let Some(value) = &tag.value {
            let mut map = BTreeMap::new();
            map.insert(path, value.clone());
            Self::Mapping(map)
        } else {
            Self::Plain(path)
        }
    }
}

/// Represents the kind of edit operation to be applied to the set of tags for a file
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Add a tag to the file
    Add,

    /// Remove a tag from the file
    Remove,
}

/// Represents an edit operation to be applied to the set of tags for a file, e.g. "+fur.black" or "-name:fido"
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TagEdit {
    /// Whether to add or remove the tag
    pub action: Action,

    /// Tag to add or remove
    pub tag: CandidateTag,
}

impl FromStr for TagEdit {
    type Err = Error;

    /// Parse a `TagEdit` from a string of the form "+path", "+path:value", "-path" or "-path:value".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref TAG_EDIT_PATTERN: Regex =
                Regex::new(r"^([+-])([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)(?::(.+))?$").unwrap();
        }

        let captures = TAG_EDIT_PATTERN
            .captures(s)
            .ok_or_else(|| anyhow!("expected a tag such as +path or -path:value, got {s}"))?;

        Ok(Self {
            action: if &captures[1] == "+" {
                Action::Add
            } else {
                Action::Remove
            },
            tag: CandidateTag::new(&captures[2], captures.get(3).map(|m| m.as_str())),
        })
    }
}

impl Display for TagEdit {
    /// Convert a `TagEdit` to a string, e.g. "+fur.black" or "-name:fido".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Action::Add => write!(f, "+{}", self.tag),
            Action::Remove => write!(f, "-{}", self.tag),
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        anyhow::Result,
        maplit::btreemap,
    };

    #[test]
    fn candidate_tags() {
        assert_eq!(
            CandidateTag {
                path: vec!["fur".into(), "black".into()],
                value: None,
            },
            CandidateTag::from("fur.black")
        );
        assert_eq!(
            CandidateTag {
                path: vec!["time".into()],
                value: Some("12:30".into()),
            },
            CandidateTag::from("time:12:30")
        );
        assert_eq!("name:bree bree", CandidateTag::from("name:bree bree").to_string());
    }

    #[test]
    fn flatten() -> Result<()> {
        let tags = serde_json::from_str::<Vec<ConfigTag>>(
            r#"["animal", "name:fido", {"fur.black": "yes", "size": "big"}]"#,
        )?;

        assert_eq!(
            vec![
                ConfigTag::Plain("animal".into()),
                ConfigTag::Plain("name:fido".into()),
                ConfigTag::Mapping(btreemap![
                    "fur.black".to_owned() => "yes".to_owned(),
                    "size".to_owned() => "big".to_owned(),
                ]),
            ],
            tags
        );

        assert_eq!(
            vec![
                CandidateTag::new("animal", None),
                CandidateTag::new("name", Some("fido")),
                CandidateTag::new("fur.black", Some("yes")),
                CandidateTag::new("size", Some("big")),
            ],
            tags.iter().flat_map(ConfigTag::flatten).collect::<Vec<_>>()
        );

        Ok(())
    }

    #[test]
    fn remove() {
        let mut plain = ConfigTag::Plain("name:fido".into());
        assert!(plain.remove(&CandidateTag::new("name", Some("rex"))));
        assert!(!plain.remove(&CandidateTag::new("name", Some("fido"))));

        let mut mapping = ConfigTag::Mapping(btreemap![
            "name".to_owned() => "fido".to_owned(),
            "size".to_owned() => "big".to_owned(),
        ]);
        assert!(mapping.remove(&CandidateTag::new("name", Some("fido"))));
        assert_eq!(
            ConfigTag::Mapping(btreemap!["size".to_owned() => "big".to_owned()]),
            mapping
        );
        assert!(!mapping.remove(&CandidateTag::new("size", Some("big"))));
    }

    #[test]
    fn config_tag_from_candidate() {
        assert_eq!(
            ConfigTag::Plain("fur.black".into()),
            ConfigTag::from(&CandidateTag::from("fur.black"))
        );
        assert_eq!(
            ConfigTag::Mapping(btreemap!["name".to_owned() => "bree bree".to_owned()]),
            ConfigTag::from(&CandidateTag::from("name:bree bree"))
        );
    }

    #[test]
    fn tag_edits() -> Result<()> {
        assert_eq!(
            TagEdit {
                action: Action::Add,
                tag: CandidateTag::new("fur.black", None),
            },
            "+fur.black".parse()?
        );
        assert_eq!(
            TagEdit {
                action: Action::Remove,
                tag: CandidateTag::new("name", Some("bree bree")),
            },
            "-name:bree bree".parse()?
        );
        assert_eq!("-name:fido", "-name:fido".parse::<TagEdit>()?.to_string());

        assert!("animal".parse::<TagEdit>().is_err());
        assert!("~animal".parse::<TagEdit>().is_err());
        assert!("+fur.".parse::<TagEdit>().is_err());
        assert!("+name:".parse::<TagEdit>().is_err());

        Ok(())
    }
}
