use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{TestCase, ToolError, CASE_FILE, SCRIPT_FILE, TESTCASE_SCHEMA_V1};

/// The `cases/` directory at the workspace root.
pub fn bundled_cases_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("cases")
}

/// Every directory under `root` holding a `case.json`, in path order.
pub fn discover_cases(root: &Path) -> Result<Vec<PathBuf>, ToolError> {
    let mut cases: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == CASE_FILE)
        .filter_map(|entry| entry.path().parent().map(Path::to_path_buf))
        .collect();
    cases.sort();

    if cases.is_empty() {
        return Err(ToolError::SourceEmpty {
            path: root.to_path_buf(),
        });
    }
    Ok(cases)
}

pub fn read_case_script(case_dir: &Path) -> Result<String, ToolError> {
    let path = case_dir.join(SCRIPT_FILE);
    let script = fs::read_to_string(&path).map_err(|source| ToolError::ReadFile {
        path: path.clone(),
        source,
    })?;
    if script.trim().is_empty() {
        return Err(ToolError::ScriptEmpty { path });
    }
    Ok(script)
}

pub fn read_test_case(case_path: &Path) -> Result<TestCase, ToolError> {
    let raw = fs::read_to_string(case_path).map_err(|source| ToolError::ReadFile {
        path: case_path.to_path_buf(),
        source,
    })?;
    let parsed: TestCase = serde_json::from_str(&raw).map_err(|source| ToolError::ParseCase {
        path: case_path.to_path_buf(),
        source,
    })?;

    if parsed.schema_version != TESTCASE_SCHEMA_V1 {
        return Err(ToolError::InvalidSchemaVersion {
            expected: TESTCASE_SCHEMA_V1.to_string(),
            found: parsed.schema_version,
        });
    }

    Ok(parsed)
}
