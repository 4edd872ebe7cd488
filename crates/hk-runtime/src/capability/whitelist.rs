use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::{ModuleHandle, ModuleLoadWarning, ModuleOrigin};

fn package_name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| {
        Regex::new(r"^(@[a-z0-9~-][a-z0-9._~-]*/)?[a-z0-9~-][a-z0-9._~-]*$")
            .expect("package name regex should compile")
    })
}

fn warning(name: &str, reason: impl Into<String>) -> ModuleLoadWarning {
    ModuleLoadWarning {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn entry_point(package_dir: &Path, name: &str) -> Result<PathBuf, ModuleLoadWarning> {
    let manifest = package_dir.join("package.json");
    if manifest.is_file() {
        let text = fs::read_to_string(&manifest)
            .map_err(|error| warning(name, format!("cannot read package.json: {}", error)))?;
        let manifest: Value = serde_json::from_str(&text)
            .map_err(|error| warning(name, format!("invalid package.json: {}", error)))?;
        if let Some(main) = manifest.get("main").and_then(Value::as_str) {
            let main = package_dir.join(main);
            if main.is_file() {
                return Ok(main);
            }
            let with_extension = PathBuf::from(format!("{}.js", main.to_string_lossy()));
            if with_extension.is_file() {
                return Ok(with_extension);
            }
            return Err(warning(name, format!("main entry {} does not exist", main.display())));
        }
    }
    let index = package_dir.join("index.js");
    if index.is_file() {
        return Ok(index);
    }
    Err(warning(name, "package has no main entry or index.js"))
}

/// Loads a whitelisted package from the collection's `node_modules`.
pub(super) fn load(collection_root: &Path, name: &str) -> Result<ModuleHandle, ModuleLoadWarning> {
    if !package_name_regex().is_match(name) {
        return Err(warning(name, "not a valid package name"));
    }
    let node_modules = collection_root.join("node_modules");
    let package_dir = node_modules.join(name);
    let file = if package_dir.is_dir() {
        entry_point(&package_dir, name)?
    } else {
        let single = node_modules.join(format!("{}.js", name));
        if !single.is_file() {
            return Err(warning(
                name,
                format!("not found under {}", node_modules.display()),
            ));
        }
        single
    };
    let source = fs::read_to_string(&file)
        .map_err(|error| warning(name, format!("cannot read {}: {}", file.display(), error)))?;
    let filename = fs::canonicalize(&file).unwrap_or(file);
    Ok(ModuleHandle::new(name, ModuleOrigin::Whitelisted)
        .with_source(source)
        .with_filename(filename))
}
