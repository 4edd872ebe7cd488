use std::fs;
use std::path::{Path, PathBuf};

use hk_core::HostCallError;
use serde_json::{json, Value};

use super::{ModuleHandle, ModuleOrigin};
use crate::helpers::args::{arg, arg_str, arg_text};

const FS_SHIM: &str = include_str!("../js/modules/fs.js");

fn io_error(operation: &str, path: &Path, error: std::io::Error) -> HostCallError {
    HostCallError::failed(format!("{} '{}': {}", operation, path.display(), error))
}

pub(super) fn module(collection_root: &Path) -> ModuleHandle {
    let root = collection_root.to_path_buf();
    let resolve = move |path: &str| -> PathBuf { root.join(path) };
    let read = resolve.clone();
    let write = resolve.clone();
    let exists = resolve.clone();
    let list = resolve.clone();
    let make_dir = resolve;

    ModuleHandle::new("fs", ModuleOrigin::Builtin)
        .with_source(FS_SHIM)
        .with_native("readFileSync", move |args| {
            let path = read(arg_str("readFileSync", args, 0)?);
            fs::read_to_string(&path)
                .map(Value::String)
                .map_err(|error| io_error("ENOENT: cannot read", &path, error))
        })
        .with_native("writeFileSync", move |args| {
            let path = write(arg_str("writeFileSync", args, 0)?);
            fs::write(&path, arg_text(args, 1))
                .map(|_| Value::Null)
                .map_err(|error| io_error("cannot write", &path, error))
        })
        .with_native("existsSync", move |args| {
            Ok(json!(exists(arg_str("existsSync", args, 0)?).exists()))
        })
        .with_native("readdirSync", move |args| {
            let path = list(arg_str("readdirSync", args, 0)?);
            let mut names = fs::read_dir(&path)
                .map_err(|error| io_error("ENOENT: cannot list", &path, error))?
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect::<Vec<_>>();
            names.sort();
            Ok(json!(names))
        })
        .with_native("mkdirSync", move |args| {
            let path = make_dir(arg_str("mkdirSync", args, 0)?);
            let recursive = arg(args, 1)
                .get("recursive")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let created = if recursive {
                fs::create_dir_all(&path)
            } else {
                fs::create_dir(&path)
            };
            created
                .map(|_| Value::Null)
                .map_err(|error| io_error("cannot create directory", &path, error))
        })
}
