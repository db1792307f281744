//! Prefix trees over absolute paths with subtree match semantics.
//!
//! A path `p` matches a tree iff some ancestor of `p` (including `p` itself)
//! is contained in the tree. Include/exclude pairs resolve with exclude
//! winning on tie, which gives "watch /home but not /home/user/.cache"
//! without kernel-side support for subpath marks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathTree {
    paths: BTreeSet<PathBuf>,
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut tree = Self::new();
        for p in paths {
            tree.insert(p.into());
        }
        tree
    }

    /// Insert an absolute path. Relative paths are rejected silently at
    /// config validation, not here.
    pub fn insert(&mut self, path: PathBuf) {
        self.paths.insert(path);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// True iff `path` or one of its ancestors is contained in the tree.
    pub fn contains_ancestor_of(&self, path: &Path) -> bool {
        path.ancestors().any(|a| self.paths.contains(a))
    }
}

/// Combined include/exclude decision: a path is watched iff it matches the
/// include tree and does not match the exclude tree.
pub fn is_watched(path: &Path, include: &PathTree, exclude: &PathTree) -> bool {
    include.contains_ancestor_of(path) && !exclude.contains_ancestor_of(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtree_match_includes_self_and_descendants() {
        let tree = PathTree::from_paths(["/tmp"]);
        assert!(tree.contains_ancestor_of(Path::new("/tmp")));
        assert!(tree.contains_ancestor_of(Path::new("/tmp/a/b/c")));
        assert!(!tree.contains_ancestor_of(Path::new("/tmpfoo")));
        assert!(!tree.contains_ancestor_of(Path::new("/home")));
    }

    #[test]
    fn exclude_wins_over_include() {
        let include = PathTree::from_paths(["/tmp"]);
        let exclude = PathTree::from_paths(["/tmp/private"]);
        assert!(is_watched(Path::new("/tmp/b"), &include, &exclude));
        assert!(!is_watched(Path::new("/tmp/private/a"), &include, &exclude));
        assert!(!is_watched(Path::new("/tmp/private"), &include, &exclude));
    }

    #[test]
    fn exclude_wins_on_exact_tie() {
        let include = PathTree::from_paths(["/data"]);
        let exclude = PathTree::from_paths(["/data"]);
        assert!(!is_watched(Path::new("/data/x"), &include, &exclude));
    }

    #[test]
    fn empty_include_matches_nothing() {
        let include = PathTree::new();
        let exclude = PathTree::new();
        assert!(!is_watched(Path::new("/anything"), &include, &exclude));
    }

    #[test]
    fn serde_round_trip() {
        let tree = PathTree::from_paths(["/tmp", "/home/user"]);
        let json = serde_json::to_string(&tree).unwrap();
        let back: PathTree = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, back);
    }
}
