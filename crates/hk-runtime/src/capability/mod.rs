mod builtin;
mod curated;
mod fs;
mod roots;
mod whitelist;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hk_core::{HostCallError, ScriptingConfig};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::transport::ScriptHttpTransport;

pub use roots::{is_file_specifier, normalize_lexically, ContextRoots};

pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, HostCallError>>;

pub const BUILTIN_MODULES: [&str; 8] = [
    "path", "stream", "util", "url", "http", "https", "punycode", "zlib",
];

pub const CURATED_MODULES: [&str; 16] = [
    "ajv",
    "ajv-formats",
    "tv4",
    "lodash",
    "atob",
    "btoa",
    "moment",
    "uuid",
    "nanoid",
    "axios",
    "node-fetch",
    "chai",
    "crypto-js",
    "xml2js",
    "cheerio",
    "node-vault",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    Builtin,
    Curated,
    Whitelisted,
    Filesystem,
}

impl ModuleOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Curated => "curated",
            Self::Whitelisted => "whitelisted",
            Self::Filesystem => "filesystem",
        }
    }
}

/// A module the sandbox may load: CommonJS source, parsed JSON, or host
/// natives, in any combination the source expects.
pub struct ModuleHandle {
    name: String,
    origin: ModuleOrigin,
    natives: Vec<(&'static str, NativeFn)>,
    constants: Map<String, Value>,
    source: Option<Cow<'static, str>>,
    json: Option<Value>,
    filename: Option<PathBuf>,
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field(
                "natives",
                &self.natives.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .field("filename", &self.filename)
            .finish()
    }
}

impl ModuleHandle {
    pub fn new(name: impl Into<String>, origin: ModuleOrigin) -> Self {
        Self {
            name: name.into(),
            origin,
            natives: Vec::new(),
            constants: Map::new(),
            source: None,
            json: None,
            filename: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<Cow<'static, str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_json(mut self, value: Value) -> Self {
        self.json = Some(value);
        self
    }

    pub fn with_filename(mut self, filename: PathBuf) -> Self {
        self.filename = Some(filename);
        self
    }

    pub fn with_constant(mut self, name: &str, value: Value) -> Self {
        self.constants.insert(name.to_string(), value);
        self
    }

    pub fn with_native<F>(mut self, name: &'static str, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, HostCallError> + 'static,
    {
        self.natives.push((name, Rc::new(function)));
        self
    }

    pub fn with_shared_native(mut self, name: &'static str, function: NativeFn) -> Self {
        self.natives.push((name, function));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn call(&self, function: &str, args: &[Value]) -> Result<Value, HostCallError> {
        let (_, native) = self
            .natives
            .iter()
            .find(|(name, _)| *name == function)
            .ok_or_else(|| {
                HostCallError::Unknown(format!("{}.{}", self.name, function))
            })?;
        native(args)
    }

    /// The JSON shape the prelude instantiates modules from.
    pub fn descriptor(&self, default_dir: &Path) -> Value {
        let dirname = self
            .filename
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(default_dir);
        let mut descriptor = json!({
            "id": self.name,
            "name": self.name,
            "origin": self.origin.as_str(),
            "natives": self.natives.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "constants": self.constants,
            "dirname": dirname.to_string_lossy(),
        });
        if let Some(filename) = &self.filename {
            descriptor["filename"] = json!(filename.to_string_lossy());
        }
        if let Some(source) = &self.source {
            descriptor["source"] = json!(source);
        }
        if let Some(value) = &self.json {
            descriptor["json"] = value.clone();
        }
        descriptor
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("module \"{name}\" was not loaded: {reason}")]
pub struct ModuleLoadWarning {
    pub name: String,
    pub reason: String,
}

/// Services the table wires into modules that reach outside the sandbox.
#[derive(Clone, Default)]
pub struct HostServices {
    pub http: Option<Rc<dyn ScriptHttpTransport>>,
}

pub const FILESYSTEM_DISABLED_MESSAGE: &str =
    "filesystem access is disabled for this collection; module \"fs\" is not available";

/// Everything a script may `require`, fixed before the run starts.
#[derive(Debug)]
pub struct CapabilityTable {
    modules: BTreeMap<String, Rc<ModuleHandle>>,
    roots: ContextRoots,
    filesystem_allowed: bool,
    warnings: Vec<ModuleLoadWarning>,
}

impl CapabilityTable {
    pub fn build(config: &ScriptingConfig, collection_root: &Path, services: &HostServices) -> Self {
        let roots = ContextRoots::new(collection_root, &config.additional_context_roots);
        let mut modules = BTreeMap::new();
        for handle in builtin::modules(roots.collection_root(), services)
            .into_iter()
            .chain(curated::modules(services))
        {
            modules.insert(handle.name().to_string(), Rc::new(handle));
        }

        let mut warnings = Vec::new();
        for name in &config.module_whitelist {
            if modules.contains_key(name) {
                continue;
            }
            match whitelist::load(roots.collection_root(), name) {
                Ok(handle) => {
                    modules.insert(name.clone(), Rc::new(handle));
                }
                Err(warning) => {
                    tracing::warn!(module = %warning.name, reason = %warning.reason, "whitelisted module skipped");
                    warnings.push(warning);
                }
            }
        }

        let filesystem_allowed = config.filesystem_access_allowed();
        if filesystem_allowed {
            let handle = fs::module(roots.collection_root());
            modules.insert(handle.name().to_string(), Rc::new(handle));
        }

        tracing::debug!(
            modules = modules.len(),
            warnings = warnings.len(),
            filesystem = filesystem_allowed,
            "capability table built"
        );
        Self {
            modules,
            roots,
            filesystem_allowed,
            warnings,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Rc<ModuleHandle>> {
        self.modules.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Rc<ModuleHandle>> {
        self.modules.values()
    }

    pub fn warnings(&self) -> &[ModuleLoadWarning] {
        &self.warnings
    }

    pub fn roots(&self) -> &ContextRoots {
        &self.roots
    }

    pub fn collection_root(&self) -> &Path {
        self.roots.collection_root()
    }

    pub fn filesystem_allowed(&self) -> bool {
        self.filesystem_allowed
    }

    pub fn call(&self, module: &str, function: &str, args: &[Value]) -> Result<Value, HostCallError> {
        self.get(module)
            .ok_or_else(|| HostCallError::Unknown(module.to_string()))?
            .call(function, args)
    }

    /// Lookup by exact name only; everything else is refused with the same
    /// message the transparent resolver would use.
    pub fn lookup(&self, specifier: &str) -> Result<Rc<ModuleHandle>, HostCallError> {
        if let Some(handle) = self.get(specifier) {
            return Ok(handle.clone());
        }
        Err(self.denial(specifier))
    }

    /// Transparent resolution: table names first, then files inside the roots.
    pub fn resolve(
        &self,
        specifier: &str,
        from_dir: Option<&Path>,
    ) -> Result<Rc<ModuleHandle>, HostCallError> {
        if let Some(handle) = self.get(specifier) {
            return Ok(handle.clone());
        }
        if !is_file_specifier(specifier) {
            return Err(self.denial(specifier));
        }
        let base_dir = from_dir.unwrap_or_else(|| self.collection_root());
        let path = self.roots.resolve_file(specifier, base_dir)?;
        let contents = std::fs::read_to_string(&path).map_err(|error| {
            HostCallError::failed(format!("Cannot load module '{}': {}", specifier, error))
        })?;
        let id = path.to_string_lossy().into_owned();
        let handle = if path.extension().is_some_and(|extension| extension == "json") {
            let value = serde_json::from_str(&contents).map_err(|error| {
                HostCallError::failed(format!("Cannot parse '{}': {}", specifier, error))
            })?;
            ModuleHandle::new(id, ModuleOrigin::Filesystem).with_json(value)
        } else {
            ModuleHandle::new(id, ModuleOrigin::Filesystem).with_source(contents)
        };
        Ok(Rc::new(handle.with_filename(path)))
    }

    fn denial(&self, specifier: &str) -> HostCallError {
        if specifier == "fs" && !self.filesystem_allowed {
            HostCallError::denied(FILESYSTEM_DISABLED_MESSAGE)
        } else if is_file_specifier(specifier) {
            HostCallError::denied(format!(
                "file imports are not available in this sandbox: '{}'",
                specifier
            ))
        } else {
            HostCallError::denied(format!(
                "module \"{}\" is not available in the script sandbox",
                specifier
            ))
        }
    }
}
