//! File system helpers shared by activities and tools

use glob_match::glob_match;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Collect every file under `root`, sorted, skipping directories for
/// which `skip_dir` returns true
pub fn walk_files<F>(root: &Path, skip_dir: F) -> io::Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let mut files = Vec::new();
    walk_recursive(root, &skip_dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_recursive<F>(dir: &Path, skip_dir: &F, files: &mut Vec<PathBuf>) -> io::Result<()>
where
    F: Fn(&Path) -> bool,
{
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            if !skip_dir(&path) {
                walk_recursive(&path, skip_dir, files)?;
            }
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Collect every directory under `root` (excluding `root`), sorted
pub fn walk_dirs(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    walk_dirs_recursive(root, &mut dirs)?;
    dirs.sort();
    Ok(dirs)
}

fn walk_dirs_recursive(dir: &Path, dirs: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let path = entry.path();
            dirs.push(path.clone());
            walk_dirs_recursive(&path, dirs)?;
        }
    }
    Ok(())
}

/// Copy everything below `src` into `dest`, skipping entries for which
/// `skip` returns true. Symbolic links are recreated, not followed. Returns
/// the number of files copied.
pub fn copy_tree<F>(src: &Path, dest: &Path, skip: &F) -> io::Result<usize>
where
    F: Fn(&Path) -> bool,
{
    fs::create_dir_all(dest)?;

    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if skip(&path) {
            continue;
        }

        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copied += copy_tree(&path, &target, skip)?;
        } else if file_type.is_symlink() {
            copy_link(&path, &target)?;
            copied += 1;
        } else {
            fs::copy(&path, &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_link(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_link(link: &Path, target: &Path) -> io::Result<()> {
    if link.is_file() {
        fs::copy(link, target).map(|_| ())
    } else {
        Ok(())
    }
}

/// Remove empty directories below `root`, deepest first. Returns how many
/// were removed.
pub fn prune_empty_dirs(root: &Path) -> io::Result<usize> {
    let mut dirs = walk_dirs(root)?;
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    let mut removed = 0;
    for dir in dirs {
        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Whether a directory name starts with a dot
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// `path` relative to `base`, with forward slashes
pub fn relative_slash_path(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether `value` matches any of the glob patterns
pub fn matches_any(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|pattern| glob_match(pattern, value))
}

/// Remove a file when dropped
#[derive(Debug)]
pub struct RemoveOnDrop(PathBuf);

impl RemoveOnDrop {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}
