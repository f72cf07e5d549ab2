//! Shared path manipulation utilities.

use std::env;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// Existing paths go through `fs::canonicalize`. For a path that does not
/// exist yet (a replica or log file about to be created), the nearest existing
/// ancestor is canonicalized and the missing tail is appended, so two spellings
/// of the same location compare equal.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    let absolute = normalize_syntactic(&absolute);

    let mut tail: Vec<OsString> = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(cursor) {
            return tail.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                cursor = parent;
            }
            _ => return absolute,
        }
    }
}

/// True when `a` and `b` resolve to the same location or one contains the other.
pub fn trees_overlap(a: &Path, b: &Path) -> bool {
    let (a, b) = (resolve_absolute_path(a), resolve_absolute_path(b));
    a.starts_with(&b) || b.starts_with(&a)
}

/// True when `path` resolves to a location inside (or equal to) `root`.
pub fn is_within(path: &Path, root: &Path) -> bool {
    resolve_absolute_path(path).starts_with(resolve_absolute_path(root))
}

/// Drop a trailing separator from a non-root path.
pub fn strip_trailing_separator(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.len() > 1
        && let Some(stripped) = s.strip_suffix(std::path::MAIN_SEPARATOR)
    {
        return PathBuf::from(stripped);
    }
    path.to_path_buf()
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolves_existing_path_canonically() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve_absolute_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn missing_tail_is_appended_to_canonical_ancestor() {
        let tmp = TempDir::new().unwrap();
        let canonical_tmp = std::fs::canonicalize(tmp.path()).unwrap();
        let input = tmp.path().join("new").join("..").join("replica").join("deep");
        assert_eq!(
            resolve_absolute_path(&input),
            canonical_tmp.join("replica").join("deep")
        );
    }

    #[test]
    fn overlap_detects_nesting_both_ways() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir(&src).unwrap();
        assert!(trees_overlap(&src, &src.join("replica")));
        assert!(trees_overlap(&src.join("replica"), &src));
        assert!(trees_overlap(&src, &tmp.path().join("src/.")));
        assert!(!trees_overlap(&src, &tmp.path().join("src-replica")));
    }

    #[test]
    fn is_within_is_directional() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("replica").join("sync.log");
        assert!(is_within(&log, &tmp.path().join("replica")));
        assert!(!is_within(&tmp.path().join("replica"), &log));
    }

    #[cfg(unix)]
    #[test]
    fn strips_trailing_separator_but_keeps_root() {
        assert_eq!(strip_trailing_separator(Path::new("/")), PathBuf::from("/"));
        assert_eq!(
            strip_trailing_separator(Path::new("/data/")),
            PathBuf::from("/data")
        );
        assert_eq!(
            strip_trailing_separator(Path::new("rel")),
            PathBuf::from("rel")
        );
    }

    #[cfg(unix)]
    #[test]
    fn handles_parent_at_root() {
        let input = Path::new("/../foo");
        let resolved = normalize_syntactic(input);
        assert_eq!(resolved, Path::new("/foo"));
    }
}
