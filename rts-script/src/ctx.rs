use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{ErrorKind, RuntimeError};
use crate::pos::Pos;
use crate::value::{NativeResult, Value};

/// Per-evaluation caps. Sizes are bytes for strings and item counts for
/// lists and dicts. `max_nesting` bounds how many containers a value may
/// have inside one another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_string: usize,
    pub max_list: usize,
    pub max_dict: usize,
    pub max_depth: usize,
    pub max_nesting: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_string: 1024 * 1024,
            max_list: 10_000,
            max_dict: 10_000,
            max_depth: 128,
            max_nesting: 128,
        }
    }
}

impl Limits {
    pub fn check_string(&self, len: usize) -> Result<(), RuntimeError> {
        if len > self.max_string {
            return Err(RuntimeError::limit(format!(
                "string length {len} > {}",
                self.max_string
            )));
        }
        Ok(())
    }

    pub fn check_list(&self, len: usize) -> Result<(), RuntimeError> {
        if len > self.max_list {
            return Err(RuntimeError::limit(format!(
                "list length {len} > {}",
                self.max_list
            )));
        }
        Ok(())
    }

    pub fn check_dict(&self, len: usize) -> Result<(), RuntimeError> {
        if len > self.max_dict {
            return Err(RuntimeError::limit(format!(
                "dict size {len} > {}",
                self.max_dict
            )));
        }
        Ok(())
    }

    /// Checks only the outermost container.
    pub fn check_shallow(&self, value: &Value) -> Result<(), RuntimeError> {
        match value {
            Value::String(text) => self.check_string(text.len()),
            Value::List(values) => self.check_list(values.len()),
            Value::Dict(entries) => self.check_dict(entries.len()),
            _ => Ok(()),
        }
    }

    /// Checks the value and every container nested inside it.
    pub fn check(&self, value: &Value) -> Result<(), RuntimeError> {
        self.walk(value, 0, true)
    }

    /// Checks only nesting, for a value about to be placed `outer` levels
    /// deep.
    pub fn check_nesting(&self, value: &Value, outer: usize) -> Result<(), RuntimeError> {
        self.walk(value, outer, false)
    }

    fn walk(&self, value: &Value, outer: usize, sizes: bool) -> Result<(), RuntimeError> {
        let mut pending = vec![(value, outer)];
        while let Some((value, depth)) = pending.pop() {
            if sizes {
                self.check_shallow(value)?;
            }
            match value {
                Value::List(items) => {
                    let depth = self.nest(depth)?;
                    pending.extend(items.iter().map(|item| (item, depth)));
                }
                Value::Dict(entries) => {
                    let depth = self.nest(depth)?;
                    for (key, item) in entries.iter() {
                        if sizes {
                            self.check_string(key.len())?;
                        }
                        pending.push((item, depth));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn nest(&self, depth: usize) -> Result<usize, RuntimeError> {
        let depth = depth + 1;
        if depth > self.max_nesting {
            return Err(RuntimeError::limit(format!(
                "nesting depth {depth} > {}",
                self.max_nesting
            )));
        }
        Ok(depth)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Native,
    Call,
}

/// One call-stack entry, kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub pos: Pos,
    pub name: String,
}

impl Frame {
    pub fn native(name: impl Into<String>, pos: Pos) -> Self {
        Self {
            kind: FrameKind::Native,
            pos,
            name: name.into(),
        }
    }

    pub fn call(name: impl Into<String>, pos: Pos) -> Self {
        Self {
            kind: FrameKind::Call,
            pos,
            name: name.into(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FrameKind::Native => write!(f, "at native {} ({})", self.name, self.pos),
            FrameKind::Call => write!(f, "at fn {} ({})", self.name, self.pos),
        }
    }
}

type ClockFn = dyn Fn() -> DateTime<Utc> + Send;
type UuidFn = dyn FnMut() -> String + Send;
type ReadFileFn = dyn Fn(&Path) -> std::io::Result<Vec<u8>> + Send;

/// Execution context owned by exactly one evaluation.
pub struct Ctx {
    limits: Limits,
    clock: Box<ClockFn>,
    uuid: Option<Box<UuidFn>>,
    allow_random: bool,
    read_file: Box<ReadFileFn>,
    base_dir: PathBuf,
    frames: Vec<Frame>,
}

impl Default for Ctx {
    fn default() -> Self {
        Self::new()
    }
}

impl Ctx {
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
            clock: Box::new(Utc::now),
            uuid: None,
            allow_random: false,
            read_file: Box::new(|path| std::fs::read(path)),
            base_dir: PathBuf::new(),
            frames: Vec::new(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_uuid_source(mut self, source: impl FnMut() -> String + Send + 'static) -> Self {
        self.uuid = Some(Box::new(source));
        self
    }

    pub fn allow_random(mut self, allow: bool) -> Self {
        self.allow_random = allow;
        self
    }

    pub fn with_read_file(
        mut self,
        read_file: impl Fn(&Path) -> std::io::Result<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.read_file = Box::new(read_file);
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn random_allowed(&self) -> bool {
        self.allow_random
    }

    pub fn next_uuid(&mut self) -> Result<String, RuntimeError> {
        if let Some(source) = self.uuid.as_mut() {
            return Ok(source());
        }
        if self.allow_random {
            return Ok(uuid::Uuid::new_v4().to_string());
        }
        Err(RuntimeError::new(ErrorKind::Random(
            "uuid() requires a deterministic generator or allow_random".to_string(),
        )))
    }

    pub fn random_unit(&self, name: &str) -> Result<f64, RuntimeError> {
        if !self.allow_random {
            return Err(RuntimeError::new(ErrorKind::Random(format!(
                "{name}() requires allow_random"
            ))));
        }
        Ok(rand::random::<f64>())
    }

    /// Resolves `path` against the base directory unless it is absolute.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, RuntimeError> {
        (self.read_file)(path).map_err(|err| {
            RuntimeError::new(ErrorKind::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
        })
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub(crate) fn current_pos(&self) -> Option<&Pos> {
        self.frames.last().map(|frame| &frame.pos)
    }

    /// Runs `body` inside `frame`. The frame is popped on every exit path and
    /// an error leaving it records the call chain and the call site.
    pub(crate) fn with_frame<T>(
        &mut self,
        frame: Frame,
        body: impl FnOnce(&mut Ctx) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        if self.frames.len() >= self.limits.max_depth {
            return Err(RuntimeError::limit(format!(
                "call depth {} > {}",
                self.frames.len() + 1,
                self.limits.max_depth
            ))
            .at(&frame.pos));
        }
        let pos = frame.pos.clone();
        self.frames.push(frame);
        let result = body(self);
        let result = result.map_err(|mut err| {
            if err.frames.is_empty() {
                err.frames = self.frames.iter().rev().cloned().collect();
            }
            err.at(&pos)
        });
        self.frames.pop();
        result
    }

    /// Calls a script or native function from inside a builtin.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> NativeResult {
        let pos = self.current_pos().cloned().unwrap_or_default();
        crate::eval::call_value(self, callee, args, &pos)
    }
}
