use std::fs;
use std::path::{Component, Path, PathBuf};

use hk_core::HostCallError;

const FILE_CANDIDATES: [&str; 3] = [".js", ".json", "/index.js"];

/// Collapses `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[derive(Debug, Clone)]
struct RootEntry {
    lexical: PathBuf,
    canonical: PathBuf,
}

impl RootEntry {
    fn new(path: PathBuf) -> Self {
        let lexical = normalize_lexically(&path);
        let canonical = fs::canonicalize(&lexical).unwrap_or_else(|_| lexical.clone());
        Self { lexical, canonical }
    }

    fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.lexical) || path.starts_with(&self.canonical)
    }
}

/// The directories file imports may load from: the collection root plus the
/// configured additional roots.
#[derive(Debug, Clone)]
pub struct ContextRoots {
    collection_root: PathBuf,
    entries: Vec<RootEntry>,
}

impl ContextRoots {
    pub fn new(collection_root: &Path, additional: &[PathBuf]) -> Self {
        let collection_root = normalize_lexically(collection_root);
        let mut entries = vec![RootEntry::new(collection_root.clone())];
        entries.extend(additional.iter().map(|root| {
            if root.is_absolute() {
                RootEntry::new(root.clone())
            } else {
                RootEntry::new(collection_root.join(root))
            }
        }));
        Self {
            collection_root,
            entries,
        }
    }

    pub fn collection_root(&self) -> &Path {
        &self.collection_root
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|entry| entry.lexical.as_path())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry.contains(path))
    }

    /// Resolves a relative or absolute import against `base_dir` and returns the
    /// canonical path of the file to load.
    pub fn resolve_file(&self, specifier: &str, base_dir: &Path) -> Result<PathBuf, HostCallError> {
        let requested = Path::new(specifier);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            base_dir.join(requested)
        };
        let target = normalize_lexically(&joined);
        if !self.contains(&target) {
            return Err(escape_error(specifier));
        }

        let base = target.to_string_lossy().into_owned();
        let candidates = std::iter::once(target.clone())
            .chain(FILE_CANDIDATES.iter().map(|suffix| PathBuf::from(format!("{}{}", base, suffix))));
        for candidate in candidates {
            if !candidate.is_file() {
                continue;
            }
            let canonical = fs::canonicalize(&candidate)
                .map_err(|error| HostCallError::failed(format!("Cannot load module '{}': {}", specifier, error)))?;
            if !self.entries.iter().any(|entry| canonical.starts_with(&entry.canonical)) {
                return Err(escape_error(specifier));
            }
            return Ok(canonical);
        }
        Err(HostCallError::failed(format!("Cannot find module '{}'", specifier)))
    }
}

fn escape_error(specifier: &str) -> HostCallError {
    HostCallError::denied(format!(
        "module '{}' resolves outside the allowed script roots",
        specifier
    ))
}

pub fn is_file_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute()
}
