//! Finding program files on disk for the graph registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::parser::{read_program, ProgramFormat};
use crate::error::ConfigError;

/// Recursively scans `root` for program files that parse, keyed by program
/// name and iterated in name order. Hidden directories and `target/` are not
/// entered. When two files declare the same name, the first in path order wins.
pub fn discover_programs(root: impl AsRef<Path>) -> Result<BTreeMap<String, PathBuf>, ConfigError> {
    let root = root.as_ref();
    let mut files = Vec::new();
    collect_candidates(root, &mut files)?;
    files.sort();

    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in files {
        match read_program(&path) {
            Ok(program) => {
                if let Some(existing) = found.get(&program.name) {
                    tracing::warn!(
                        graph = %program.name,
                        kept = %existing.display(),
                        ignored = %path.display(),
                        "Duplicate program name"
                    );
                    continue;
                }
                tracing::debug!(graph = %program.name, path = %path.display(), "Discovered program");
                found.insert(program.name, path);
            }
            Err(err) => tracing::trace!(path = %path.display(), error = %err, "Not a program"),
        }
    }
    Ok(found)
}

fn collect_candidates(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == "target" {
                continue;
            }
            collect_candidates(&path, out)?;
        } else if file_type.is_file() && ProgramFormat::from_path(&path).is_some() {
            out.push(path);
        }
    }
    Ok(())
}
