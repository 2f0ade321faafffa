#![allow(dead_code, unused_imports)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub use script::{
    Ctx, Engine, ErrorKind, GlobalMutator, HostError, Limits, Pos, RequestEdit, RequestMutator,
    RequestSnapshot, Runtime, ScriptError, Use, Value, VarsMutator,
};

pub fn eval_with(ctx: &mut Ctx, runtime: &Runtime, source: &str) -> Result<Value, ScriptError> {
    Engine::new().eval(ctx, runtime, source, &Pos::new("test.rts", 1, 1))
}

pub fn eval(source: &str) -> Result<Value, ScriptError> {
    eval_with(&mut Ctx::new(), &Runtime::new(), source)
}

pub fn eval_ok(source: &str) -> Value {
    eval(source).expect("script should evaluate")
}

pub fn eval_err(source: &str) -> ScriptError {
    eval(source).expect_err("script should fail")
}

/// A scratch directory under the system temp dir, removed on drop.
pub struct TempDir {
    pub path: PathBuf,
}

impl TempDir {
    pub fn new(label: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after the epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "rts_{label}_{}_{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be creatable");
        Self { path }
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path.join(name);
        fs::write(&path, contents).expect("temp file should be writable");
        path
    }

    /// Rewrites a file and moves its modification time forward so the
    /// module cache notices the change even on coarse-grained filesystems.
    pub fn rewrite(&self, name: &str, contents: &str, bump_secs: u64) -> PathBuf {
        let path = self.write(name, contents);
        let modified = SystemTime::now() + std::time::Duration::from_secs(bump_secs);
        fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_modified(modified))
            .expect("modification time should be settable");
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[derive(Default)]
pub struct RecordingRequest {
    pub edits: Mutex<Vec<RequestEdit>>,
    pub reject: bool,
}

impl RequestMutator for RecordingRequest {
    fn apply(&self, edit: &RequestEdit) -> Result<(), HostError> {
        if self.reject {
            return Err(HostError::new("request is frozen"));
        }
        self.edits.lock().push(edit.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingVars {
    pub writes: Mutex<Vec<(String, Value)>>,
}

impl VarsMutator for RecordingVars {
    fn set_var(&self, name: &str, value: &Value) -> Result<(), HostError> {
        self.writes.lock().push((name.to_string(), value.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalWrite {
    Set { name: String, value: Value, secret: bool },
    Delete(String),
}

#[derive(Default)]
pub struct RecordingGlobals {
    pub writes: Mutex<Vec<GlobalWrite>>,
}

impl GlobalMutator for RecordingGlobals {
    fn set_global(&self, name: &str, value: &Value, secret: bool) -> Result<(), HostError> {
        self.writes.lock().push(GlobalWrite::Set {
            name: name.to_string(),
            value: value.clone(),
            secret,
        });
        Ok(())
    }

    fn delete_global(&self, name: &str) -> Result<(), HostError> {
        self.writes.lock().push(GlobalWrite::Delete(name.to_string()));
        Ok(())
    }
}

pub fn sample_request() -> RequestSnapshot {
    RequestSnapshot::new("GET", "https://api.test/users?page=1")
        .with_header("Accept", "application/json")
        .with_header("X-Trace", "t-1")
}

pub fn module_use(path: &Path, alias: Option<&str>) -> Use {
    let directive = Use::new(path.display().to_string(), Pos::new("req.http", 1, 1));
    match alias {
        Some(alias) => directive.with_alias(alias),
        None => directive,
    }
}
