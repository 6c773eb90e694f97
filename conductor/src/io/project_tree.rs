//! Bounded directory listing of the working tree, used as planner context.

use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Directory names never descended into or listed.
const SKIPPED_DIRS: [&str; 5] = [".git", ".venv", "__pycache__", "node_modules", "target"];

pub const DEFAULT_MAX_DEPTH: usize = 3;

/// List paths under `root` up to `max_depth`, one per line, sorted by name.
///
/// Paths are relative and prefixed with `./`; directories end with `/`.
pub fn project_tree(root: &Path, max_depth: usize) -> Result<String> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        });

    let mut lines = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let mut line = format!("./{}", rel.to_string_lossy());
        if entry.file_type().is_dir() {
            line.push('/');
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_sorted_paths_and_skips_noise() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("src/core")).expect("mkdir");
        fs::create_dir_all(root.join(".git/objects")).expect("mkdir");
        fs::create_dir_all(root.join("node_modules/pkg")).expect("mkdir");
        fs::create_dir_all(root.join("target/debug")).expect("mkdir");
        fs::write(root.join("src/core/graph.rs"), "").expect("write");
        fs::write(root.join("src/main.rs"), "").expect("write");
        fs::write(root.join("README.md"), "").expect("write");

        let tree = project_tree(root, DEFAULT_MAX_DEPTH).expect("tree");
        assert_eq!(
            tree,
            "./README.md\n./src/\n./src/core/\n./src/core/graph.rs\n./src/main.rs"
        );
    }

    #[test]
    fn respects_depth_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("a/b/c/d")).expect("mkdir");
        let tree = project_tree(temp.path(), 2).expect("tree");
        assert_eq!(tree, "./a/\n./a/b/");
    }
}
