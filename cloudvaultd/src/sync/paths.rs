use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path contains unsupported component: {0}")]
    UnsupportedComponent(String),
    #[error("name is not a single path component: {0:?}")]
    InvalidName(String),
    #[error("local path is outside the sync root: {0}")]
    OutsideRoot(PathBuf),
    #[error("local path is not valid UTF-8: {0}")]
    NotUtf8(PathBuf),
}

/// Maps a `/`-separated relative path ("Docs/A.txt") under `root`.
///
/// Empty paths map to the root itself.
pub fn local_path_for(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let mut out = root.to_path_buf();
    for segment in segments(relative) {
        let name = validate_name(segment)
            .map_err(|_| PathError::UnsupportedComponent(relative.to_string()))?;
        out.push(name);
    }
    Ok(out)
}

/// Checks one remote file or folder name before it is joined into a
/// relative path. A name holding `/` would otherwise turn into nested
/// folders; `\` and drive prefixes escape the root on some platforms.
pub fn validate_name(name: &str) -> Result<&str, PathError> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\']) {
        return Err(PathError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// Inverse of [`local_path_for`].
pub fn relative_path_of(root: &Path, path: &Path) -> Result<String, PathError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PathError::OutsideRoot(path.to_path_buf()))?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| PathError::NotUtf8(path.to_path_buf()))?,
            ),
            Component::CurDir => continue,
            _ => return Err(PathError::OutsideRoot(path.to_path_buf())),
        }
    }
    Ok(parts.join("/"))
}

pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits "A/B/c.txt" into ("A/B", "c.txt").
pub fn split_parent(relative: &str) -> (&str, &str) {
    match relative.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", relative),
    }
}

pub fn segments(relative: &str) -> impl Iterator<Item = &str> {
    relative.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_relative_path_under_root() {
        let root = PathBuf::from("/sync");
        let mapped = local_path_for(&root, "Docs/A.txt").unwrap();
        assert_eq!(mapped, PathBuf::from("/sync/Docs/A.txt"));
        assert_eq!(local_path_for(&root, "").unwrap(), root);
    }

    #[test]
    fn rejects_parent_dir() {
        let root = PathBuf::from("/sync");
        assert!(matches!(
            local_path_for(&root, "Docs/../../secret"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(local_path_for(&root, "a\\b").is_err());
    }

    #[test]
    fn names_must_be_single_components() {
        assert_eq!(validate_name("Q3 report.txt").unwrap(), "Q3 report.txt");
        for bad in ["x/y.txt", "dir/", "/abs", ".", "..", "", "a\\b"] {
            assert!(
                matches!(validate_name(bad), Err(PathError::InvalidName(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn relative_path_round_trips_nested_file() {
        let root = PathBuf::from("/sync");
        let rel = relative_path_of(&root, Path::new("/sync/A/B/c.txt")).unwrap();
        assert_eq!(rel, "A/B/c.txt");
        assert!(relative_path_of(&root, Path::new("/elsewhere/c.txt")).is_err());
    }

    #[test]
    fn splits_parent_and_name() {
        assert_eq!(split_parent("A/B/c.txt"), ("A/B", "c.txt"));
        assert_eq!(split_parent("c.txt"), ("", "c.txt"));
        assert_eq!(join_relative("", "c.txt"), "c.txt");
        assert_eq!(join_relative("A", "c.txt"), "A/c.txt");
    }
}
