//! List the entry points installed in a bootstrapped environment

use crate::tools::ToolError;
use std::fs;
use std::path::{Path, PathBuf};

pub const GENERATED_DIR_ENV: &str = "PYTHON_BOOTSTRAPPER_GENERATED_DIR";

/// Directory to search: the explicit one, or the one named by the environment
pub fn generated_dir(explicit: Option<&Path>) -> Result<PathBuf, ToolError> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => std::env::var_os(GENERATED_DIR_ENV)
            .map(PathBuf::from)
            .ok_or_else(|| ToolError::MissingEnvVar(GENERATED_DIR_ENV.to_string())),
    }
}

/// Names of the scripts under `generated_dir`, sorted.
///
/// Windows environments keep `.exe` launchers in `Scripts/` (the stem is
/// reported); others keep executables in `bin/`.
pub fn find_scripts(generated_dir: &Path, windows: bool) -> Result<Vec<String>, ToolError> {
    let scripts_dir = generated_dir.join(if windows { "Scripts" } else { "bin" });
    if !scripts_dir.is_dir() {
        return Err(ToolError::MissingDir(scripts_dir));
    }

    let entries = fs::read_dir(&scripts_dir).map_err(|e| ToolError::io(&scripts_dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ToolError::io(&scripts_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if windows {
            let is_exe = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
            if let (true, Some(stem)) = (is_exe, path.file_stem()) {
                names.push(stem.to_string_lossy().to_string());
            }
        } else if is_executable(&path) {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    names.sort();
    Ok(names)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Lay out `names` in equal-width columns filling `width`, column first
pub fn format_columns(names: &[String], width: usize) -> String {
    if names.is_empty() {
        return String::new();
    }

    let cell = names.iter().map(|n| n.chars().count()).max().unwrap_or(0) + 2;
    let columns = (width / cell).clamp(1, names.len());
    let rows = names.len().div_ceil(columns);

    let mut lines = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut line = String::new();
        for column in 0..columns {
            if let Some(name) = names.get(column * rows + row) {
                line.push_str(&format!("{:<cell$}", name, cell = cell));
            }
        }
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}
