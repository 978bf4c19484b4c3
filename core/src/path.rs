//! Canonical, absolute paths in the logical filesystem this workspace builds.
//!
//! A [Path] is always rooted (`/`, or `/c1/c2/.../cn`), immutable once built,
//! and compares and hashes by its component sequence rather than by its
//! string form — two strings that normalize to the same components denote
//! the same path.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// A component must be non-empty and may contain neither `/` nor `:`.
fn validate_component(component: &str) -> Result<(), PathError> {
    if component.is_empty() {
        return Err(PathError::EmptyComponent);
    }
    if component.contains('/') {
        return Err(PathError::IllegalCharacter('/'));
    }
    if component.contains(':') {
        return Err(PathError::IllegalCharacter(':'));
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PathError {
    #[error("path must start with '/'")]
    MissingLeadingSlash,
    #[error("path component may not be empty")]
    EmptyComponent,
    #[error("path component may not contain {0:?}")]
    IllegalCharacter(char),
    #[error("root has no parent")]
    RootHasNoParent,
    #[error("root has no last component")]
    RootHasNoLast,
}

/// An immutable, canonical, absolute path.
///
/// Equality, ordering and hashing are defined over the component sequence,
/// not the raw string — this is what makes [Path::is_subpath] correct where
/// a naive substring comparison would mistake `/abc` for a subpath of `/a`.
#[derive(Debug, Clone, Default, Eq)]
pub struct Path {
    components: Vec<String>,
}

impl Path {
    /// The root path, `/`.
    pub fn root() -> Self {
        Path {
            components: Vec::new(),
        }
    }

    /// Parses a canonical string form. Leading `/` is required; `:` is
    /// forbidden anywhere. Repeated slashes collapse, and components made
    /// entirely of whitespace are dropped, matching a permissive tokenizer
    /// rather than a strict one.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() || !s.starts_with('/') {
            return Err(PathError::MissingLeadingSlash);
        }
        if s.contains(':') {
            return Err(PathError::IllegalCharacter(':'));
        }

        let components = s
            .split('/')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Path { components })
    }

    /// Builds `parent/component`.
    pub fn join(parent: &Path, component: &str) -> Result<Self, PathError> {
        validate_component(component)?;
        let mut components = parent.components.clone();
        components.push(component.to_owned());
        Ok(Path { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The parent of this path. Undefined (an error) on root.
    pub fn parent(&self) -> Result<Path, PathError> {
        if self.is_root() {
            return Err(PathError::RootHasNoParent);
        }
        Ok(Path {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// The final component of this path. Undefined (an error) on root.
    pub fn last(&self) -> Result<&str, PathError> {
        self.components.last().map(String::as_str).ok_or(PathError::RootHasNoLast)
    }

    /// Component-prefix containment: `other`'s components are a prefix of
    /// `self`'s. Root is a subpath of everything (including itself); every
    /// path is a subpath of itself.
    pub fn is_subpath(&self, other: &Path) -> bool {
        other.components.len() <= self.components.len()
            && self.components[..other.components.len()] == other.components[..]
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Joins this path onto a local filesystem root, for talking to the
    /// storage backend. Root maps to `root` itself.
    pub fn to_local(&self, root: &std::path::Path) -> std::path::PathBuf {
        let mut p = root.to_path_buf();
        for c in &self.components {
            p.push(c);
        }
        p
    }

    /// Enumerates every regular file reachable under `local_root`, returning
    /// their paths relative to it (i.e. as castore-style [Path]s). Directory
    /// traversal order is unspecified.
    pub fn list(local_root: &std::path::Path) -> Result<Vec<Path>, std::io::Error> {
        if !local_root.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", local_root.display()),
            ));
        }
        if !local_root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", local_root.display()),
            ));
        }

        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(local_root) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(local_root)
                .expect("walkdir yields paths under its root");

            let mut p = Path::root();
            for c in rel.components() {
                let name = c.as_os_str().to_string_lossy();
                p = Path::join(&p, &name)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            }
            out.push(p);
        }
        Ok(out)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::root("/", vec![])]
    #[case::simple("/a/b", vec!["a", "b"])]
    #[case::collapsing_slashes("/a//b/ /c", vec!["a", "b", "c"])]
    #[case::all_slashes("////", vec![])]
    pub fn parse_ok(#[case] s: &str, #[case] expected: Vec<&str>) {
        let p = Path::parse(s).expect("must parse");
        assert_eq!(expected, p.components().collect::<Vec<_>>());
    }

    #[rstest]
    #[case::no_leading_slash("a/b")]
    #[case::empty("")]
    #[case::colon("/a:b")]
    pub fn parse_err(#[case] s: &str) {
        Path::parse(s).expect_err("must fail");
    }

    #[test]
    fn round_trip() {
        let p = Path::parse("/a/b/c").unwrap();
        assert_eq!(p, Path::parse(&p.to_string()).unwrap());
    }

    #[test]
    fn root_has_no_parent_or_last() {
        let root = Path::root();
        assert!(root.parent().is_err());
        assert!(root.last().is_err());
    }

    #[test]
    fn parent_and_last() {
        let p = Path::parse("/a/b/c").unwrap();
        assert_eq!(Path::parse("/a/b").unwrap(), p.parent().unwrap());
        assert_eq!("c", p.last().unwrap());
    }

    #[rstest]
    // component-prefix containment, not substring containment: `/abc` must
    // NOT be considered a subpath of `/a`.
    #[case::not_a_substring_match("/abc", "/a", false)]
    #[case::real_subpath("/a/b/c", "/a/b", true)]
    #[case::self_is_subpath_of_self("/a/b", "/a/b", true)]
    #[case::root_is_subpath_of_everything("/a/b", "/", true)]
    #[case::sibling("/a/x", "/a/b", false)]
    pub fn is_subpath(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        let a = Path::parse(a).unwrap();
        let b = Path::parse(b).unwrap();
        assert_eq!(expected, a.is_subpath(&b));
    }

    #[test]
    fn join_rejects_bad_component() {
        let root = Path::root();
        assert!(Path::join(&root, "").is_err());
        assert!(Path::join(&root, "a/b").is_err());
        assert!(Path::join(&root, "a:b").is_err());
    }
}
