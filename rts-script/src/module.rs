use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

use crate::ctx::Ctx;
use crate::error::{ErrorKind, ParseError, RuntimeError, ScriptError};
use crate::eval::{Scope, exec_program};
use crate::lexer::scan_module_header;
use crate::parser::parse_program;
use crate::pos::Pos;
use crate::stdlib;
use crate::value::{NativeResult, Object, Value};

/// An import directive: `@use ./path.rts [as alias]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Use {
    pub path: String,
    pub alias: Option<String>,
    pub pos: Pos,
}

impl Use {
    pub fn new(path: impl Into<String>, pos: Pos) -> Self {
        Self {
            path: path.into(),
            alias: None,
            pos,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Parses directive text as found in request files, e.g.
    /// `@use "./lib/auth.rts" as auth`.
    pub fn parse_directive(text: &str, pos: Pos) -> Result<Use, ParseError> {
        let rest = text
            .trim()
            .strip_prefix("@use")
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
            .ok_or_else(|| ParseError::new(pos.clone(), "expected '@use' directive"))?
            .trim();

        let (path, tail) = match rest.strip_prefix('"') {
            Some(quoted) => {
                let (path, tail) = quoted
                    .split_once('"')
                    .ok_or_else(|| ParseError::new(pos.clone(), "unterminated module path"))?;
                (path, tail.trim())
            }
            None => match rest.split_once(char::is_whitespace) {
                Some((path, tail)) => (path, tail.trim()),
                None => (rest, ""),
            },
        };
        if path.is_empty() {
            return Err(ParseError::new(pos, "expected module path after '@use'"));
        }

        let mut directive = Use::new(path, pos.clone());
        if tail.is_empty() {
            return Ok(directive);
        }
        let alias = tail
            .strip_prefix("as")
            .filter(|alias| alias.starts_with(char::is_whitespace))
            .map(str::trim)
            .ok_or_else(|| {
                ParseError::new(pos.clone(), format!("unexpected {tail:?}, expected 'as'"))
            })?;
        if !is_identifier(alias) {
            return Err(ParseError::new(pos, format!("invalid module alias {alias:?}")));
        }
        directive.alias = Some(alias.to_string());
        Ok(directive)
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// A compiled module file. Immutable once published to the cache.
#[derive(Debug)]
pub struct Module {
    pub name: Option<String>,
    pub path: PathBuf,
    pub exports: BTreeMap<String, Value>,
    pub pos: Pos,
}

impl Object for Module {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_member(&self, name: &str) -> Option<Value> {
        self.exports.get(name).cloned()
    }

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        let export = self.exports.get(name).ok_or_else(|| {
            RuntimeError::new(ErrorKind::UnknownMember {
                type_name: "module".to_string(),
                member: name.to_string(),
            })
        })?;
        ctx.call(export, args)
    }
}

struct CachedModule {
    modified: SystemTime,
    module: Arc<Module>,
}

/// Compiled modules keyed by normalized path. Entries are replaced when the
/// file's modification time changes.
#[derive(Default)]
pub struct ModuleCache {
    entries: RwLock<HashMap<PathBuf, CachedModule>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Loads `path` relative to `base_dir`, returning the module and its
    /// resolved path.
    pub fn load(
        &self,
        ctx: &mut Ctx,
        base_dir: &Path,
        path: &str,
    ) -> Result<(Arc<Module>, PathBuf), RuntimeError> {
        let resolved = resolve_module_path(base_dir, path);
        let modified = match modified_time(&resolved) {
            Ok(modified) => modified,
            Err(err) => {
                self.discard(&resolved);
                return Err(err);
            }
        };
        if let Some(module) = self.cached(&resolved, modified) {
            debug!("module cache hit path={}", resolved.display());
            return Ok((module, resolved));
        }

        let refreshing = self.entries.read().contains_key(&resolved);
        let module = match compile(ctx, &resolved) {
            Ok(module) => Arc::new(module),
            Err(err) => {
                self.discard(&resolved);
                return Err(err);
            }
        };
        debug!(
            "module cache {} path={} exports={}",
            if refreshing { "refresh" } else { "miss" },
            resolved.display(),
            module.exports.len()
        );
        self.entries.write().insert(
            resolved.clone(),
            CachedModule {
                modified,
                module: module.clone(),
            },
        );
        Ok((module, resolved))
    }

    /// Works out the alias of every use without evaluating any module body.
    /// Fails on the first alias that is reserved or already taken.
    pub fn resolve_aliases(
        &self,
        ctx: &Ctx,
        base_dir: &Path,
        uses: &[Use],
        reserved: &[&str],
    ) -> Result<Vec<String>, RuntimeError> {
        let mut aliases: Vec<String> = Vec::with_capacity(uses.len());
        for directive in uses {
            let alias = match &directive.alias {
                Some(alias) => alias.clone(),
                None => self
                    .declared_name(ctx, base_dir, &directive.path)
                    .map_err(|err| err.at(&directive.pos))?,
            };
            if reserved.contains(&alias.as_str()) || aliases.contains(&alias) {
                return Err(RuntimeError::new(ErrorKind::AliasDefined(alias)).at(&directive.pos));
            }
            debug!("resolved module alias alias={alias} path={}", directive.path);
            aliases.push(alias);
        }
        Ok(aliases)
    }

    fn declared_name(
        &self,
        ctx: &Ctx,
        base_dir: &Path,
        path: &str,
    ) -> Result<String, RuntimeError> {
        let resolved = resolve_module_path(base_dir, path);
        let modified = modified_time(&resolved)?;
        if let Some(module) = self.cached(&resolved, modified) {
            return module
                .name
                .clone()
                .ok_or_else(|| RuntimeError::new(ErrorKind::MissingModuleName(resolved)));
        }
        let source = read_source(ctx, &resolved)?;
        let start = Pos::new(resolved.display().to_string(), 1, 1);
        match scan_module_header(&source, &start) {
            Ok(Some((name, _))) => Ok(name),
            Ok(None) => Err(RuntimeError::new(ErrorKind::MissingModuleName(resolved))),
            Err(err) => Err(module_error(resolved, err.into())),
        }
    }

    fn cached(&self, path: &Path, modified: SystemTime) -> Option<Arc<Module>> {
        let entries = self.entries.read();
        entries
            .get(path)
            .filter(|entry| entry.modified == modified)
            .map(|entry| entry.module.clone())
    }

    fn discard(&self, path: &Path) {
        if self.entries.write().remove(path).is_some() {
            debug!("module cache discard path={}", path.display());
        }
    }
}

fn resolve_module_path(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base_dir.join(path))
    }
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn modified_time(path: &Path) -> Result<SystemTime, RuntimeError> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|err| {
            RuntimeError::new(ErrorKind::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
        })
}

fn read_source(ctx: &Ctx, path: &Path) -> Result<String, RuntimeError> {
    let bytes = ctx.read_file(path)?;
    String::from_utf8(bytes).map_err(|_| {
        RuntimeError::decode(format!("module '{}' is not valid UTF-8", path.display()))
    })
}

fn module_error(path: PathBuf, source: ScriptError) -> RuntimeError {
    RuntimeError::new(ErrorKind::Module {
        path,
        source: Box::new(source),
    })
}

/// Parses and runs a module file against a stdlib-only scope, then freezes
/// that scope so exported functions cannot change module state.
fn compile(ctx: &mut Ctx, path: &Path) -> Result<Module, RuntimeError> {
    let source = read_source(ctx, path)?;
    let start = Pos::new(path.display().to_string(), 1, 1);
    let program =
        parse_program(&source, &start).map_err(|err| module_error(path.to_path_buf(), err.into()))?;

    let base = Scope::root();
    for (name, value) in stdlib::bindings() {
        base.declare(name, value, true)?;
    }
    let scope = Scope::child(&base);
    exec_program(ctx, &scope, &program)
        .map_err(|err| module_error(path.to_path_buf(), err.into()))?;
    scope.freeze();

    let mut exports = BTreeMap::new();
    for stmt in &program.stmts {
        if let Some(name) = stmt.kind.exported_name()
            && let Some(value) = scope.get_local(name)
        {
            exports.insert(name.to_string(), value);
        }
    }
    let (name, pos) = match program.module {
        Some(header) => (Some(header.name), header.pos),
        None => (None, start),
    };
    Ok(Module {
        name,
        path: path.to_path_buf(),
        exports,
        pos,
    })
}
