//! This module provides [FileDiff], which describes how the files and symlinks in the output directory must change
//! to go from one [Linkfile] to another.

use {
    crate::linkfile::Linkfile,
    serde_derive::Serialize,
    std::fmt::{self, Display},
};

/// Items present in one sequence but not the other
#[derive(Serialize, Debug, Eq, PartialEq)]
pub struct ArrayDiff<T> {
    /// Items present in the new sequence but not the old one
    pub created: Vec<T>,

    /// Items present in the old sequence but not the new one
    pub removed: Vec<T>,
}

impl<T> ArrayDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Compare `before` with `after`, preserving the order in which items appear.
pub fn diff_array<T: PartialEq + Clone>(before: &[T], after: &[T]) -> ArrayDiff<T> {
    ArrayDiff {
        created: after
            .iter()
            .filter(|item| !before.contains(item))
            .cloned()
            .collect(),
        removed: before
            .iter()
            .filter(|item| !after.contains(item))
            .cloned()
            .collect(),
    }
}

/// An entry in the output directory, relative to that directory
#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileType {
    /// A stored file, e.g. ".hash/<hash>"
    File { path: String },

    /// A symlink at `to` pointing to the stored file at `from`
    Link { from: String, to: String },
}

impl Display for FileType {
    /// Format a `FileType` as either its path or "from -> to".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path } => f.write_str(path),
            Self::Link { from, to } => write!(f, "{from} -> {to}"),
        }
    }
}

pub type FileDiff = ArrayDiff<FileType>;

fn into_links<'a>(from: &str, links: &'a [String]) -> impl Iterator<Item = FileType> + 'a {
    let from = from.to_owned();

    links.iter().map(move |to| FileType::Link {
        from: from.clone(),
        to: to.clone(),
    })
}

/// Determine which stored files and links must be created or removed to go from `previous` to `linkfile`.
///
/// When a stored file disappears, all of its previous links are removed along with it.
pub fn generate_file_diff(linkfile: &Linkfile, previous: &Linkfile) -> FileDiff {
    let keys = diff_array(
        &previous.links.keys().cloned().collect::<Vec<_>>(),
        &linkfile.links.keys().cloned().collect::<Vec<_>>(),
    );

    let mut diff = FileDiff {
        created: keys
            .created
            .iter()
            .map(|path| FileType::File { path: path.clone() })
            .collect(),
        removed: keys
            .removed
            .iter()
            .map(|path| FileType::File { path: path.clone() })
            .collect(),
    };

    for key in &keys.removed {
        if let Some(links) = previous.links.get(key) {
            diff.removed.extend(into_links(key, links));
        }
    }

    for (key, links) in &linkfile.links {
        let link_diff = diff_array(
            previous.links.get(key).map(Vec::as_slice).unwrap_or_default(),
            links,
        );

        diff.created.extend(into_links(key, &link_diff.created));
        diff.removed.extend(into_links(key, &link_diff.removed));
    }

    diff
}

/// Format a `FileDiff` as one line per entry, prefixed by "+ " for created entries and "- " for removed ones.
pub fn format_file_diff(diff: &FileDiff) -> String {
    diff.created
        .iter()
        .map(|file| format!("+ {file}"))
        .chain(diff.removed.iter().map(|file| format!("- {file}")))
        .collect::<Vec<_>>()
        .join("\n")
}
