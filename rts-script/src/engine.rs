use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;

use crate::ctx::Ctx;
use crate::error::ScriptError;
use crate::eval::{Scope, eval_expr, exec_program, holds_closure};
use crate::host::{
    EnvObject, GlobalMutator, GlobalObject, GlobalVar, RequestMutator, RequestObject,
    RequestSnapshot, VarsMutator, VarsObject,
};
use crate::module::{ModuleCache, Use};
use crate::parser::{parse_expression, parse_program};
use crate::pos::Pos;
use crate::stdlib;
use crate::value::Value;

/// Host-bound names that module aliases may not take.
pub const HOST_BINDINGS: &[&str] = &["request", "vars", "env"];

/// Everything the caller supplies for one evaluation. Built fresh each time.
#[derive(Default)]
pub struct Runtime {
    pub env: BTreeMap<String, String>,
    pub vars: BTreeMap<String, Value>,
    pub globals: BTreeMap<String, GlobalVar>,
    pub uses: Vec<Use>,
    /// Directory `@use` paths are resolved against. Falls back to the
    /// context's base directory when empty.
    pub base_dir: PathBuf,
    pub request: Option<RequestSnapshot>,
    pub request_mut: Option<Arc<dyn RequestMutator>>,
    pub vars_mut: Option<Arc<dyn VarsMutator>>,
    pub global_mut: Option<Arc<dyn GlobalMutator>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(
        mut self,
        request: RequestSnapshot,
        mutator: Option<Arc<dyn RequestMutator>>,
    ) -> Self {
        self.request = Some(request);
        self.request_mut = mutator;
        self
    }

    pub fn with_use(mut self, directive: Use) -> Self {
        self.uses.push(directive);
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Host objects for one evaluation. Without a live request, `request` is
    /// an empty read-only snapshot so mutations fail instead of vanishing.
    fn host_bindings(&self) -> [(&'static str, Value); 3] {
        let request = match &self.request {
            Some(snapshot) => RequestObject::new(snapshot.clone(), self.request_mut.clone()),
            None => RequestObject::new(RequestSnapshot::default(), None),
        };
        let global = GlobalObject::new(self.globals.clone(), self.global_mut.clone());
        [
            ("request", Value::object(request)),
            (
                "vars",
                Value::object(VarsObject::new(self.vars.clone(), self.vars_mut.clone(), global)),
            ),
            ("env", Value::object(EnvObject::new(self.env.clone()))),
        ]
    }
}

/// Entry point for embedders. Cloning shares the module cache.
#[derive(Clone, Default)]
pub struct Engine {
    modules: Arc<ModuleCache>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(modules: Arc<ModuleCache>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &Arc<ModuleCache> {
        &self.modules
    }

    /// Evaluates a script. The result is the value of its last expression
    /// statement or of a top-level `return`.
    pub fn eval(
        &self,
        ctx: &mut Ctx,
        runtime: &Runtime,
        source: &str,
        pos: &Pos,
    ) -> Result<Value, ScriptError> {
        trace!("eval start pos={pos}");
        let scope = self.base_scope(ctx, runtime)?;
        let program = parse_program(source, pos)?;
        let top = Scope::child(&scope);
        let result = exec_program(ctx, &top, &program);
        release(&top, &result);
        trace!("eval end pos={pos} ok={}", result.is_ok());
        Ok(result?)
    }

    /// Evaluates one expression, e.g. the body of a `{{= ... }}` template.
    pub fn eval_expr(
        &self,
        ctx: &mut Ctx,
        runtime: &Runtime,
        source: &str,
        pos: &Pos,
    ) -> Result<Value, ScriptError> {
        trace!("eval expression start pos={pos}");
        let scope = self.base_scope(ctx, runtime)?;
        let expr = parse_expression(source, pos)?;
        let top = Scope::child(&scope);
        let result = eval_expr(ctx, &top, &expr);
        release(&top, &result);
        trace!("eval expression end pos={pos} ok={}", result.is_ok());
        Ok(result?)
    }

    /// Stdlib, host objects and module aliases. Aliases are checked against
    /// each other before any module body runs.
    fn base_scope(&self, ctx: &mut Ctx, runtime: &Runtime) -> Result<Arc<Scope>, ScriptError> {
        let base_dir = if runtime.base_dir.as_os_str().is_empty() {
            ctx.base_dir().to_path_buf()
        } else {
            runtime.base_dir.clone()
        };
        let reserved: Vec<&str> = HOST_BINDINGS
            .iter()
            .copied()
            .chain(stdlib::names())
            .collect();
        let aliases = self
            .modules
            .resolve_aliases(ctx, &base_dir, &runtime.uses, &reserved)?;

        let scope = Scope::root();
        for (name, value) in stdlib::bindings() {
            scope.declare(name, value, true)?;
        }
        for (name, value) in runtime.host_bindings() {
            scope.declare(name, value, true)?;
        }
        for (directive, alias) in runtime.uses.iter().zip(aliases) {
            let (module, _) = self
                .modules
                .load(ctx, &base_dir, &directive.path)
                .map_err(|err| err.at(&directive.pos))?;
            scope.declare(&alias, Value::Object(module), true)?;
        }
        Ok(scope)
    }
}

/// Drops the top-level bindings unless the result still needs them.
fn release<E>(top: &Scope, result: &Result<Value, E>) {
    if !matches!(result, Ok(value) if holds_closure(value)) {
        top.clear();
    }
}
