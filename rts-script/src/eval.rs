use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::ast::{
    AssignTarget, BinaryOp, DictKey, Expr, ExprKind, LogicalOp, PathSegment, Program, Stmt,
    StmtKind, UnaryOp,
};
use crate::ctx::{Ctx, Frame, Limits};
use crate::error::{ErrorKind, RuntimeError};
use crate::pos::Pos;
use crate::stack::ensure_sufficient_stack;
use crate::value::{Closure, Dict, NativeResult, Object, Value};

struct Binding {
    value: Value,
    constant: bool,
}

/// One lexical scope. Scopes are shared with the closures created inside
/// them, so bindings sit behind a lock.
pub struct Scope {
    parent: Option<Arc<Scope>>,
    bindings: RwLock<HashMap<String, Binding>>,
    frozen: AtomicBool,
}

impl Scope {
    pub fn root() -> Arc<Scope> {
        Arc::new(Scope {
            parent: None,
            bindings: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        })
    }

    pub fn child(parent: &Arc<Scope>) -> Arc<Scope> {
        Arc::new(Scope {
            parent: Some(parent.clone()),
            bindings: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        })
    }

    /// Binds `name` in this scope. Replaces an earlier `let` of the same
    /// name; a constant can never be redeclared.
    pub fn declare(&self, name: &str, value: Value, constant: bool) -> Result<(), RuntimeError> {
        if self.is_frozen() {
            return Err(RuntimeError::read_only(format!(
                "module binding '{name}' cannot be changed"
            )));
        }
        let mut bindings = self.bindings.write();
        if let Some(existing) = bindings.get(name)
            && existing.constant
        {
            return Err(RuntimeError::new(ErrorKind::ConstAssign(name.to_string())));
        }
        bindings.insert(name.to_string(), Binding { value, constant });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.bindings.read().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Looks `name` up in this scope only.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.bindings
            .read()
            .get(name)
            .map(|binding| binding.value.clone())
    }

    /// Rebinds the nearest existing `name`.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), RuntimeError> {
        {
            let mut bindings = self.bindings.write();
            if let Some(binding) = bindings.get_mut(name) {
                if binding.constant {
                    return Err(RuntimeError::new(ErrorKind::ConstAssign(name.to_string())));
                }
                if self.is_frozen() {
                    return Err(RuntimeError::read_only(format!(
                        "module binding '{name}' cannot be changed"
                    )));
                }
                binding.value = value;
                return Ok(());
            }
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(RuntimeError::new(ErrorKind::UndefinedVariable(
                name.to_string(),
            ))),
        }
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Drops every binding. Breaks the reference cycles between a scope and
    /// the closures declared in it once an evaluation is over.
    pub(crate) fn clear(&self) {
        self.bindings.write().clear();
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Runs a parsed program. The result is the value of the last top-level
/// expression statement, or of a top-level `return`.
pub(crate) fn exec_program(
    ctx: &mut Ctx,
    scope: &Arc<Scope>,
    program: &Program,
) -> Result<Value, RuntimeError> {
    let mut last = Value::Null;
    for stmt in &program.stmts {
        if let StmtKind::Expr(expr) = &stmt.kind {
            last = eval_expr(ctx, scope, expr)?;
            continue;
        }
        if let Flow::Return(value) = exec_stmt(ctx, scope, stmt)? {
            return Ok(value);
        }
    }
    Ok(last)
}

fn exec_stmts(ctx: &mut Ctx, scope: &Arc<Scope>, stmts: &[Stmt]) -> Result<Flow, RuntimeError> {
    for stmt in stmts {
        match exec_stmt(ctx, scope, stmt)? {
            Flow::Normal => {}
            flow => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

fn exec_block(ctx: &mut Ctx, scope: &Arc<Scope>, stmts: &[Stmt]) -> Result<Flow, RuntimeError> {
    let block_scope = Scope::child(scope);
    exec_stmts(ctx, &block_scope, stmts)
}

fn exec_stmt(ctx: &mut Ctx, scope: &Arc<Scope>, stmt: &Stmt) -> Result<Flow, RuntimeError> {
    ensure_sufficient_stack(|| exec_stmt_kind(ctx, scope, stmt))
}

fn exec_stmt_kind(
    ctx: &mut Ctx,
    scope: &Arc<Scope>,
    stmt: &Stmt,
) -> Result<Flow, RuntimeError> {
    match &stmt.kind {
        StmtKind::Let {
            name,
            value,
            constant,
            ..
        } => {
            let value = eval_expr(ctx, scope, value)?;
            scope
                .declare(name, value, *constant)
                .map_err(|err| err.at(&stmt.pos))?;
        }
        StmtKind::Fn { def, .. } => {
            let closure = Value::Function(Arc::new(Closure {
                def: def.clone(),
                scope: scope.clone(),
            }));
            let name = def.name.as_deref().unwrap_or_default();
            scope
                .declare(name, closure, false)
                .map_err(|err| err.at(&stmt.pos))?;
        }
        StmtKind::Assign { target, value } => {
            exec_assign(ctx, scope, target, value, &stmt.pos)?;
        }
        StmtKind::Expr(expr) => {
            eval_expr(ctx, scope, expr)?;
        }
        StmtKind::Block(stmts) => return exec_block(ctx, scope, stmts),
        StmtKind::Return(value) => {
            let value = match value {
                Some(expr) => eval_expr(ctx, scope, expr)?,
                None => Value::Null,
            };
            return Ok(Flow::Return(value));
        }
        StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            if eval_expr(ctx, scope, condition)?.is_truthy() {
                return exec_block(ctx, scope, then_branch);
            }
            if let Some(else_branch) = else_branch {
                return exec_block(ctx, scope, else_branch);
            }
        }
        StmtKind::For {
            first,
            second,
            iterable,
            body,
        } => {
            let iterable_value = eval_expr(ctx, scope, iterable)?;
            let items = loop_items(&iterable_value, second.is_some())
                .map_err(|err| err.at(&iterable.pos))?;
            for (lhs, rhs) in items {
                let iter_scope = Scope::child(scope);
                iter_scope.declare(first, lhs, false)?;
                if let Some(second) = second {
                    iter_scope.declare(second, rhs, false)?;
                }
                match exec_stmts(ctx, &iter_scope, body)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    flow @ Flow::Return(_) => return Ok(flow),
                }
            }
        }
        StmtKind::Break => return Ok(Flow::Break),
        StmtKind::Continue => return Ok(Flow::Continue),
    }
    Ok(Flow::Normal)
}

/// Pairs produced by `for`. With one loop variable only the first element
/// of each pair is bound.
fn loop_items(value: &Value, two_vars: bool) -> Result<Vec<(Value, Value)>, RuntimeError> {
    match value {
        Value::List(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                if two_vars {
                    (Value::from(idx), item.clone())
                } else {
                    (item.clone(), Value::Null)
                }
            })
            .collect()),
        Value::Dict(entries) => Ok(entries
            .iter()
            .map(|(key, value)| (Value::from(key.as_str()), value.clone()))
            .collect()),
        Value::String(text) => Ok(text
            .chars()
            .enumerate()
            .map(|(idx, ch)| {
                let ch = Value::from(ch.to_string());
                if two_vars {
                    (Value::from(idx), ch)
                } else {
                    (ch, Value::Null)
                }
            })
            .collect()),
        other => Err(RuntimeError::type_error(format!(
            "cannot iterate over {}",
            other.type_name()
        ))),
    }
}

fn exec_assign(
    ctx: &mut Ctx,
    scope: &Arc<Scope>,
    target: &AssignTarget,
    value: &Expr,
    pos: &Pos,
) -> Result<(), RuntimeError> {
    if target.path.is_empty() {
        let value = eval_expr(ctx, scope, value)?;
        return scope.assign(&target.root, value).map_err(|err| err.at(pos));
    }

    let root = scope.get(&target.root).ok_or_else(|| {
        RuntimeError::new(ErrorKind::UndefinedVariable(target.root.clone())).at(pos)
    })?;
    let mut keys = Vec::with_capacity(target.path.len());
    for segment in &target.path {
        keys.push(match segment {
            PathSegment::Field(name) => Value::from(name.as_str()),
            PathSegment::Index(expr) => eval_expr(ctx, scope, expr)?,
        });
    }
    let value = eval_expr(ctx, scope, value)?;
    ctx.limits()
        .check_nesting(&value, keys.len())
        .map_err(|err| err.at(pos))?;
    let updated = replace_path(ctx.limits(), &root, &keys, value).map_err(|err| err.at(pos))?;
    scope.assign(&target.root, updated).map_err(|err| err.at(pos))
}

/// Returns a copy of `container` with the value at `keys` replaced. Missing
/// dict levels are created on the way down.
fn replace_path(
    limits: &Limits,
    container: &Value,
    keys: &[Value],
    value: Value,
) -> NativeResult {
    let Some((key, rest)) = keys.split_first() else {
        return Ok(value);
    };
    let updated = match container {
        Value::Dict(entries) => {
            let key = key.to_key()?;
            let child = entries.get(&key).cloned().unwrap_or(Value::Null);
            let child = replace_path(limits, &child, rest, value)?;
            let mut entries = Dict::clone(entries);
            entries.insert(key, child);
            Value::dict(entries)
        }
        Value::Null => {
            let key = key.to_key()?;
            let child = replace_path(limits, &Value::Null, rest, value)?;
            let mut entries = Dict::new();
            entries.insert(key, child);
            Value::dict(entries)
        }
        Value::List(items) => {
            let idx = key.as_index().ok_or_else(|| {
                RuntimeError::type_error(format!(
                    "list index must be an integer, got {}",
                    key.type_name()
                ))
            })?;
            let slot = resolve_index(idx, items.len()).ok_or_else(|| {
                RuntimeError::invalid(format!(
                    "list index {idx} out of range for length {}",
                    items.len()
                ))
            })?;
            let child = replace_path(limits, &items[slot], rest, value)?;
            let mut items = Vec::clone(items);
            items[slot] = child;
            Value::list(items)
        }
        other => {
            return Err(RuntimeError::type_error(format!(
                "cannot assign into {}",
                other.type_name()
            )));
        }
    };
    limits.check_shallow(&updated)?;
    Ok(updated)
}

pub(crate) fn resolve_index(idx: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if idx < 0 { idx + len } else { idx };
    if (0..len).contains(&idx) {
        usize::try_from(idx).ok()
    } else {
        None
    }
}

pub(crate) fn eval_expr(ctx: &mut Ctx, scope: &Arc<Scope>, expr: &Expr) -> NativeResult {
    ensure_sufficient_stack(|| eval_expr_kind(ctx, scope, expr))
}

fn eval_expr_kind(ctx: &mut Ctx, scope: &Arc<Scope>, expr: &Expr) -> NativeResult {
    match &expr.kind {
        ExprKind::Null => Ok(Value::Null),
        ExprKind::Bool(value) => Ok(Value::Bool(*value)),
        ExprKind::Number(value) => Ok(Value::Number(*value)),
        ExprKind::String(text) => {
            ctx.limits()
                .check_string(text.len())
                .map_err(|err| err.at(&expr.pos))?;
            Ok(Value::from(text.as_str()))
        }
        ExprKind::List(items) => {
            ctx.limits()
                .check_list(items.len())
                .map_err(|err| err.at(&expr.pos))?;
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(ctx, scope, item)?);
            }
            let list = Value::list(values);
            ctx.limits()
                .check_nesting(&list, 0)
                .map_err(|err| err.at(&expr.pos))?;
            Ok(list)
        }
        ExprKind::Dict(entries) => {
            let mut out = Dict::new();
            for (key, value) in entries {
                let key = match key {
                    DictKey::Static(name) => name.clone(),
                    DictKey::Computed(key_expr) => eval_expr(ctx, scope, key_expr)?
                        .to_key()
                        .map_err(|err| err.at(&key_expr.pos))?,
                };
                let value = eval_expr(ctx, scope, value)?;
                out.insert(key, value);
            }
            ctx.limits()
                .check_dict(out.len())
                .map_err(|err| err.at(&expr.pos))?;
            let dict = Value::dict(out);
            ctx.limits()
                .check_nesting(&dict, 0)
                .map_err(|err| err.at(&expr.pos))?;
            Ok(dict)
        }
        ExprKind::Ident(name) => scope.get(name).ok_or_else(|| {
            RuntimeError::new(ErrorKind::UndefinedVariable(name.clone())).at(&expr.pos)
        }),
        ExprKind::Unary { op, operand } => {
            let value = eval_expr(ctx, scope, operand)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => match value {
                    Value::Number(number) => Ok(Value::Number(-number)),
                    other => Err(RuntimeError::type_error(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))
                    .at(&expr.pos)),
                },
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let lhs = eval_expr(ctx, scope, lhs)?;
            let rhs = eval_expr(ctx, scope, rhs)?;
            binary_op(ctx.limits(), *op, &lhs, &rhs).map_err(|err| err.at(&expr.pos))
        }
        ExprKind::Logical { op, lhs, rhs } => {
            let lhs = eval_expr(ctx, scope, lhs)?;
            let decided = match op {
                LogicalOp::And => !lhs.is_truthy(),
                LogicalOp::Or => lhs.is_truthy(),
                LogicalOp::Coalesce => !lhs.is_null(),
            };
            if decided {
                Ok(lhs)
            } else {
                eval_expr(ctx, scope, rhs)
            }
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            if eval_expr(ctx, scope, condition)?.is_truthy() {
                eval_expr(ctx, scope, then_expr)
            } else {
                eval_expr(ctx, scope, else_expr)
            }
        }
        ExprKind::Member { object, name } => {
            let object = eval_expr(ctx, scope, object)?;
            member(&object, name).map_err(|err| err.at(&expr.pos))
        }
        ExprKind::Index { object, index } => {
            let object = eval_expr(ctx, scope, object)?;
            let index = eval_expr(ctx, scope, index)?;
            index_value(&object, &index).map_err(|err| err.at(&expr.pos))
        }
        ExprKind::Call { callee, args } => eval_call(ctx, scope, callee, args, &expr.pos),
        ExprKind::Function(def) => Ok(Value::Function(Arc::new(Closure {
            def: def.clone(),
            scope: scope.clone(),
        }))),
    }
}

fn eval_call(
    ctx: &mut Ctx,
    scope: &Arc<Scope>,
    callee: &Expr,
    args: &[Expr],
    pos: &Pos,
) -> NativeResult {
    if let ExprKind::Member { object, name } = &callee.kind {
        let receiver = eval_expr(ctx, scope, object)?;
        let args = eval_args(ctx, scope, args)?;
        if let Value::Object(object) = &receiver {
            return call_member(ctx, object, name, &args, pos);
        }
        let function = member(&receiver, name).map_err(|err| err.at(&callee.pos))?;
        return call_value(ctx, &function, &args, pos);
    }

    let function = eval_expr(ctx, scope, callee)?;
    let args = eval_args(ctx, scope, args)?;
    call_value(ctx, &function, &args, pos)
}

fn eval_args(ctx: &mut Ctx, scope: &Arc<Scope>, args: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval_expr(ctx, scope, arg)?);
    }
    Ok(values)
}

/// The one call dispatcher. Every native result is checked against the
/// active limits here before the caller sees it.
pub(crate) fn call_value(ctx: &mut Ctx, callee: &Value, args: &[Value], pos: &Pos) -> NativeResult {
    match callee {
        Value::Native(native) => ctx.with_frame(Frame::native(native.name(), pos.clone()), |ctx| {
            let value = native.invoke(ctx, args)?;
            ctx.limits().check(&value)?;
            Ok(value)
        }),
        Value::Function(closure) => {
            ctx.with_frame(Frame::call(closure.name(), pos.clone()), |ctx| {
                call_closure(ctx, closure, args)
            })
        }
        other => Err(
            RuntimeError::new(ErrorKind::NotCallable(other.type_name().to_string())).at(pos),
        ),
    }
}

pub(crate) fn call_member(
    ctx: &mut Ctx,
    object: &Arc<dyn Object>,
    name: &str,
    args: &[Value],
    pos: &Pos,
) -> NativeResult {
    let frame = Frame::native(format!("{}.{name}", object.type_name()), pos.clone());
    ctx.with_frame(frame, |ctx| {
        let value = object.call_member(ctx, name, args)?;
        ctx.limits().check(&value)?;
        Ok(value)
    })
}

fn call_closure(ctx: &mut Ctx, closure: &Closure, args: &[Value]) -> NativeResult {
    let def = &closure.def;
    if args.len() > def.params.len() {
        return Err(RuntimeError::new(ErrorKind::Arity {
            name: closure.name().to_string(),
            expected: format!("at most {}", def.params.len()),
            got: args.len(),
        }));
    }
    let scope = Scope::child(&closure.scope);
    for (idx, param) in def.params.iter().enumerate() {
        let value = args.get(idx).cloned().unwrap_or(Value::Null);
        scope.declare(param, value, false)?;
    }
    match exec_stmts(ctx, &scope, &def.body)? {
        Flow::Return(value) => Ok(value),
        Flow::Normal | Flow::Break | Flow::Continue => Ok(Value::Null),
    }
}

pub(crate) fn member(value: &Value, name: &str) -> NativeResult {
    match value {
        Value::Dict(entries) => Ok(entries.get(name).cloned().unwrap_or(Value::Null)),
        Value::Object(object) => object.get_member(name).ok_or_else(|| {
            RuntimeError::new(ErrorKind::UnknownMember {
                type_name: object.type_name().to_string(),
                member: name.to_string(),
            })
        }),
        other => Err(RuntimeError::type_error(format!(
            "cannot read member '{name}' of {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn index_value(value: &Value, key: &Value) -> NativeResult {
    match value {
        Value::List(items) => {
            let idx = key.as_index().ok_or_else(|| {
                RuntimeError::type_error(format!(
                    "list index must be an integer, got {}",
                    key.type_name()
                ))
            })?;
            Ok(resolve_index(idx, items.len())
                .map(|slot| items[slot].clone())
                .unwrap_or(Value::Null))
        }
        Value::Dict(entries) => Ok(entries.get(&key.to_key()?).cloned().unwrap_or(Value::Null)),
        Value::String(text) => {
            let idx = key.as_index().ok_or_else(|| {
                RuntimeError::type_error(format!(
                    "string index must be an integer, got {}",
                    key.type_name()
                ))
            })?;
            let len = text.chars().count();
            Ok(resolve_index(idx, len)
                .and_then(|slot| text.chars().nth(slot))
                .map(|ch| Value::from(ch.to_string()))
                .unwrap_or(Value::Null))
        }
        Value::Object(object) => object.index(key),
        other => Err(RuntimeError::type_error(format!(
            "cannot index {}",
            other.type_name()
        ))),
    }
}

fn binary_op(limits: &Limits, op: BinaryOp, lhs: &Value, rhs: &Value) -> NativeResult {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::NotEq => return Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Add => return add(limits, lhs, rhs),
        _ => {}
    }

    if let (Value::String(lhs), Value::String(rhs)) = (lhs, rhs) {
        let result = match op {
            BinaryOp::Lt => lhs < rhs,
            BinaryOp::LtEq => lhs <= rhs,
            BinaryOp::Gt => lhs > rhs,
            BinaryOp::GtEq => lhs >= rhs,
            _ => return Err(operand_error(op, "string", "string")),
        };
        return Ok(Value::Bool(result));
    }

    let (Value::Number(a), Value::Number(b)) = (lhs, rhs) else {
        return Err(operand_error(op, lhs.type_name(), rhs.type_name()));
    };
    let (a, b) = (*a, *b);
    Ok(match op {
        BinaryOp::Sub => Value::Number(a - b),
        BinaryOp::Mul => Value::Number(a * b),
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
            return Err(RuntimeError::new(ErrorKind::DivisionByZero));
        }
        BinaryOp::Div => Value::Number(a / b),
        BinaryOp::Mod => Value::Number(a % b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::LtEq => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::GtEq => Value::Bool(a >= b),
        BinaryOp::Add | BinaryOp::Eq | BinaryOp::NotEq => unreachable!("handled above"),
    })
}

fn add(limits: &Limits, lhs: &Value, rhs: &Value) -> NativeResult {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::String(_), _) | (_, Value::String(_)) => {
            let lhs = lhs.to_string();
            let rhs = rhs.to_string();
            limits.check_string(lhs.len() + rhs.len())?;
            Ok(Value::from(lhs + &rhs))
        }
        (Value::List(a), Value::List(b)) => {
            limits.check_list(a.len() + b.len())?;
            let mut items = Vec::with_capacity(a.len() + b.len());
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            let mut entries = Dict::clone(a);
            entries.extend(b.iter().map(|(key, value)| (key.clone(), value.clone())));
            limits.check_dict(entries.len())?;
            Ok(Value::dict(entries))
        }
        _ => Err(operand_error(BinaryOp::Add, lhs.type_name(), rhs.type_name())),
    }
}

fn operand_error(op: BinaryOp, lhs: &str, rhs: &str) -> RuntimeError {
    RuntimeError::type_error(format!(
        "cannot apply '{}' to {lhs} and {rhs}",
        op.symbol()
    ))
}

/// True when `value` holds a script closure anywhere inside it.
pub(crate) fn holds_closure(value: &Value) -> bool {
    match value {
        Value::Function(_) => true,
        Value::List(items) => items.iter().any(holds_closure),
        Value::Dict(entries) => entries.values().any(holds_closure),
        _ => false,
    }
}
