//! Tree-walking evaluator for orchestration scripts
//!
//! Evaluation is async because capability calls are. Every statement is a
//! potential yield point so the sandbox timeout can preempt busy loops.

use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::builtins::{self, normalize_index, CallArgs};
use super::parser::{Arg, BinOp, Expr, Stmt, Target};
use super::value::{PendingCall, Value};
use super::{ScriptContext, ScriptError};

/// Statements between cooperative yields
const YIELD_EVERY: u64 = 64;

/// Control flow out of a statement
pub(crate) enum Flow {
    Normal,
    Return(Value),
}

pub(crate) struct Interpreter {
    vars: HashMap<String, Value>,
    ctx: Arc<ScriptContext>,
    ticks: u64,
}

impl Interpreter {
    pub(crate) fn new(ctx: Arc<ScriptContext>) -> Self {
        Self {
            vars: HashMap::new(),
            ctx,
            ticks: 0,
        }
    }

    /// Run a program; returns the explicit return value or the `result` binding
    pub(crate) async fn run(mut self, program: &[Stmt]) -> Result<Option<Value>, ScriptError> {
        match self.exec_block(program).await? {
            Flow::Return(value) => Ok(Some(value)),
            Flow::Normal => Ok(self.vars.remove("result")),
        }
    }

    async fn tick(&mut self) {
        self.ticks += 1;
        if self.ticks % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    fn exec_block<'a>(&'a mut self, stmts: &'a [Stmt]) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            for stmt in stmts {
                if let Flow::Return(value) = self.exec(stmt).await? {
                    return Ok(Flow::Return(value));
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            self.tick().await;
            match stmt {
                Stmt::Assign(target, expr) => {
                    let value = self.eval(expr).await?;
                    self.assign(target, value).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If {
                    branches,
                    otherwise,
                } => {
                    for (cond, body) in branches {
                        if self.eval(cond).await?.truthy() {
                            return self.exec_block(body).await;
                        }
                    }
                    match otherwise {
                        Some(body) => self.exec_block(body).await,
                        None => Ok(Flow::Normal),
                    }
                }
                Stmt::For { vars, iter, body } => {
                    let items = builtins::iterate(&self.eval(iter).await?)?;
                    for item in items {
                        self.bind_loop_vars(vars, item)?;
                        if let Flow::Return(value) = self.exec_block(body).await? {
                            return Ok(Flow::Return(value));
                        }
                        self.tick().await;
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Return(expr) => {
                    let value = match expr {
                        Some(e) => self.eval(e).await?,
                        None => Value::Null,
                    };
                    Ok(Flow::Return(value))
                }
                Stmt::Expr(expr) => {
                    self.eval(expr).await?;
                    Ok(Flow::Normal)
                }
            }
        })
    }

    fn bind_loop_vars(&mut self, vars: &[String], item: Value) -> Result<(), ScriptError> {
        match vars {
            [single] => {
                self.vars.insert(single.clone(), item);
            }
            [first, second] => match item {
                Value::List(mut pair) if pair.len() == 2 => {
                    let b = pair.pop().unwrap_or(Value::Null);
                    let a = pair.pop().unwrap_or(Value::Null);
                    self.vars.insert(first.clone(), a);
                    self.vars.insert(second.clone(), b);
                }
                other => {
                    return Err(ScriptError::Type(format!(
                        "cannot unpack {} into 2 names",
                        other.type_name()
                    )))
                }
            },
            _ => return Err(ScriptError::Runtime("invalid loop variables".to_string())),
        }
        Ok(())
    }

    async fn assign(&mut self, target: &Target, value: Value) -> Result<(), ScriptError> {
        if target.path.is_empty() {
            self.vars.insert(target.name.clone(), value);
            return Ok(());
        }

        let mut keys = Vec::with_capacity(target.path.len());
        for key in &target.path {
            keys.push(self.eval(key).await?);
        }

        let mut slot = self
            .vars
            .get_mut(&target.name)
            .ok_or_else(|| ScriptError::UndefinedName(target.name.clone()))?;
        let (last, walk) = keys
            .split_last()
            .ok_or_else(|| ScriptError::Runtime("empty assignment path".to_string()))?;
        for key in walk {
            slot = element_mut(slot, key)?;
        }
        match slot {
            Value::Map(map) => {
                map.insert(last.as_str()?.to_string(), value);
            }
            Value::List(items) => {
                let len = items.len();
                let i = normalize_index(last.as_int()?, len).ok_or_else(|| {
                    ScriptError::Index(format!("list index out of range (len {})", len))
                })?;
                items[i] = value;
            }
            other => {
                return Err(ScriptError::Type(format!(
                    "{} does not support item assignment",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, Result<Value, ScriptError>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::List(out))
                }
                Expr::Map(entries) => {
                    let mut out = indexmap::IndexMap::with_capacity(entries.len());
                    for (key, value) in entries {
                        let v = self.eval(value).await?;
                        out.insert(key.clone(), v);
                    }
                    Ok(Value::Map(out))
                }
                Expr::Var(name) => match self.vars.get(name) {
                    Some(v) => Ok(v.clone()),
                    None if self.ctx.is_capability(name) || builtins::is_builtin(name) => Err(
                        ScriptError::Type(format!("'{}' is a function; call it with ()", name)),
                    ),
                    None => Err(ScriptError::UndefinedName(name.clone())),
                },
                Expr::Call { name, args } => self.call(name, None, args).await,
                Expr::Method {
                    receiver,
                    name,
                    args,
                } => self.call(name, Some(receiver.as_ref()), args).await,
                Expr::Spawn { name, args } => {
                    if !self.ctx.is_capability(name) {
                        return Err(ScriptError::Type(format!(
                            "spawn expects a capability call, '{}' is not a capability",
                            name
                        )));
                    }
                    let args = self.eval_args(None, args).await?;
                    Ok(Value::Pending(Box::new(self.ctx.bind(name, args)?)))
                }
                Expr::Field(target, field) => match self.eval(target).await? {
                    Value::Map(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                    other => Err(ScriptError::Type(format!(
                        "{} has no field '{}'",
                        other.type_name(),
                        field
                    ))),
                },
                Expr::Index(target, index) => {
                    let target = self.eval(target).await?;
                    let index = self.eval(index).await?;
                    index_value(&target, &index)
                }
                Expr::Slice(target, start, end) => {
                    let target = self.eval(target).await?;
                    let start = match start {
                        Some(e) => Some(self.eval(e).await?.as_int()?),
                        None => None,
                    };
                    let end = match end {
                        Some(e) => Some(self.eval(e).await?.as_int()?),
                        None => None,
                    };
                    slice_value(&target, start, end)
                }
                Expr::Neg(inner) => match self.eval(inner).await? {
                    Value::Int(n) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| ScriptError::Runtime("integer overflow".to_string())),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(ScriptError::Type(format!(
                        "bad operand for unary -: {}",
                        other.type_name()
                    ))),
                },
                Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner).await?.truthy())),
                Expr::And(lhs, rhs) => {
                    let left = self.eval(lhs).await?;
                    if !left.truthy() {
                        return Ok(left);
                    }
                    self.eval(rhs).await
                }
                Expr::Or(lhs, rhs) => {
                    let left = self.eval(lhs).await?;
                    if left.truthy() {
                        return Ok(left);
                    }
                    self.eval(rhs).await
                }
                Expr::Binary(op, lhs, rhs) => {
                    let left = self.eval(lhs).await?;
                    let right = self.eval(rhs).await?;
                    binary(*op, left, right)
                }
            }
        })
    }

    async fn eval_args(
        &mut self,
        receiver: Option<Value>,
        args: &[Arg],
    ) -> Result<CallArgs, ScriptError> {
        let mut out = CallArgs::default();
        out.positional.extend(receiver);
        for arg in args {
            match arg {
                Arg::Positional(e) => {
                    let v = self.eval(e).await?;
                    out.positional.push(v);
                }
                Arg::Keyword(k, e) => {
                    let v = self.eval(e).await?;
                    out.keyword.push((k.clone(), v));
                }
            }
        }
        Ok(out)
    }

    async fn call(
        &mut self,
        name: &str,
        receiver: Option<&Expr>,
        args: &[Arg],
    ) -> Result<Value, ScriptError> {
        let receiver_value = match receiver {
            Some(r) => Some(self.eval(r).await?),
            None => None,
        };

        if receiver.is_none() && self.ctx.is_capability(name) {
            let args = self.eval_args(None, args).await?;
            let pending = self.ctx.bind(name, args)?;
            return self.ctx.invoke(pending).await;
        }

        // `push` on a variable, field or element appends in place
        let push_target = match (name, receiver, args.first()) {
            ("push", Some(place), _) => place_of(place),
            ("push", None, Some(Arg::Positional(place))) => place_of(place),
            _ => None,
        };

        let call_args = self.eval_args(receiver_value, args).await?;
        match name {
            "print" => {
                self.ctx.print(&call_args);
                Ok(Value::Null)
            }
            "gather" => self.gather(call_args).await,
            _ if builtins::is_builtin(name) => {
                let value = builtins::call(name, &call_args)?;
                if let Some(target) = push_target {
                    self.assign(&target, value).await?;
                    return Ok(Value::Null);
                }
                Ok(value)
            }
            _ if receiver.is_some() => Err(ScriptError::Type(format!(
                "{} has no method '{}'",
                call_args
                    .positional
                    .first()
                    .map(Value::type_name)
                    .unwrap_or("value"),
                name
            ))),
            _ if self.vars.contains_key(name) => {
                Err(ScriptError::Type(format!("'{}' is not callable", name)))
            }
            _ => Err(ScriptError::UndefinedName(name.to_string())),
        }
    }

    /// Run spawned calls concurrently; results keep submission order
    async fn gather(&mut self, args: CallArgs) -> Result<Value, ScriptError> {
        let items = match args.positional.as_slice() {
            [Value::List(items)] => items.clone(),
            _ => args.positional,
        };
        let pending: Vec<PendingCall> = items
            .into_iter()
            .map(|item| match item {
                Value::Pending(call) => Ok(*call),
                other => Err(ScriptError::Type(format!(
                    "gather() expects spawned calls, got {}",
                    other.type_name()
                ))),
            })
            .collect::<Result<_, _>>()?;

        debug!("Gathering {} spawned call(s)", pending.len());
        let ctx = Arc::clone(&self.ctx);
        let results = join_all(pending.into_iter().map(|call| ctx.invoke(call))).await;
        results.into_iter().collect::<Result<Vec<_>, _>>().map(Value::List)
    }
}

/// The assignable place an expression names, if any
///
/// `d.items[0]` becomes `d` with the path `["items", 0]`.
fn place_of(expr: &Expr) -> Option<Target> {
    match expr {
        Expr::Var(name) => Some(Target {
            name: name.clone(),
            path: Vec::new(),
        }),
        Expr::Field(inner, field) => {
            let mut target = place_of(inner)?;
            target.path.push(Expr::Literal(Value::Str(field.clone())));
            Some(target)
        }
        Expr::Index(inner, key) => {
            let mut target = place_of(inner)?;
            target.path.push((**key).clone());
            Some(target)
        }
        _ => None,
    }
}

fn element_mut<'v>(slot: &'v mut Value, key: &Value) -> Result<&'v mut Value, ScriptError> {
    match slot {
        Value::Map(map) => {
            let k = key.as_str()?;
            map.get_mut(k)
                .ok_or_else(|| ScriptError::Index(format!("key '{}' not found", k)))
        }
        Value::List(items) => {
            let len = items.len();
            normalize_index(key.as_int()?, len)
                .map(move |i| &mut items[i])
                .ok_or_else(|| ScriptError::Index(format!("list index out of range (len {})", len)))
        }
        other => Err(ScriptError::Type(format!(
            "{} is not subscriptable",
            other.type_name()
        ))),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, ScriptError> {
    match target {
        Value::List(items) => normalize_index(index.as_int()?, items.len())
            .map(|i| items[i].clone())
            .ok_or_else(|| {
                ScriptError::Index(format!("list index out of range (len {})", items.len()))
            }),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            normalize_index(index.as_int()?, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| {
                    ScriptError::Index(format!("string index out of range (len {})", chars.len()))
                })
        }
        Value::Map(map) => {
            let key = index.as_str()?;
            map.get(key)
                .cloned()
                .ok_or_else(|| ScriptError::Index(format!("key '{}' not found", key)))
        }
        other => Err(ScriptError::Type(format!(
            "{} is not subscriptable",
            other.type_name()
        ))),
    }
}

fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |i: i64| -> usize {
        let i = if i < 0 { len + i } else { i };
        i.clamp(0, len) as usize
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = end.map(clamp).unwrap_or(len as usize);
    (s, e.max(s))
}

fn slice_value(target: &Value, start: Option<i64>, end: Option<i64>) -> Result<Value, ScriptError> {
    match target {
        Value::List(items) => {
            let (s, e) = slice_bounds(items.len(), start, end);
            Ok(Value::List(items[s..e].to_vec()))
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(chars.len(), start, end);
            Ok(Value::Str(chars[s..e].iter().collect()))
        }
        other => Err(ScriptError::Type(format!(
            "{} cannot be sliced",
            other.type_name()
        ))),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, ScriptError> {
    use std::cmp::Ordering;

    match op {
        BinOp::Eq => return Ok(Value::Bool(left.loose_eq(&right))),
        BinOp::Ne => return Ok(Value::Bool(!left.loose_eq(&right))),
        BinOp::Lt => return Ok(Value::Bool(left.compare(&right)? == Ordering::Less)),
        BinOp::Le => return Ok(Value::Bool(left.compare(&right)? != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(left.compare(&right)? == Ordering::Greater)),
        BinOp::Ge => return Ok(Value::Bool(left.compare(&right)? != Ordering::Less)),
        BinOp::In => return Ok(Value::Bool(builtins::contains(&right, &left)?)),
        BinOp::NotIn => return Ok(Value::Bool(!builtins::contains(&right, &left)?)),
        _ => {}
    }

    let overflow = || ScriptError::Runtime("integer overflow".to_string());
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (BinOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let n = usize::try_from(n.max(0)).unwrap_or(0);
            if s.len().saturating_mul(n) > 10_000_000 {
                return Err(ScriptError::Runtime("string repetition too large".to_string()));
            }
            Ok(Value::Str(s.repeat(n)))
        }
        (BinOp::Add, Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Div, Value::Int(_), Value::Int(0)) | (BinOp::Rem, Value::Int(_), Value::Int(0)) => {
            Err(ScriptError::DivisionByZero)
        }
        (BinOp::Div, Value::Int(a), Value::Int(b)) if a.checked_rem(b) == Some(0) => {
            a.checked_div(b).map(Value::Int).ok_or_else(overflow)
        }
        (BinOp::Div, Value::Int(a), Value::Int(b)) => Ok(Value::Float(a as f64 / b as f64)),
        (BinOp::Rem, Value::Int(a), Value::Int(b)) => {
            a.checked_rem_euclid(b).map(Value::Int).ok_or_else(overflow)
        }
        (op, a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => match op {
                BinOp::Add => Ok(Value::Float(x + y)),
                BinOp::Sub => Ok(Value::Float(x - y)),
                BinOp::Mul => Ok(Value::Float(x * y)),
                BinOp::Div | BinOp::Rem if y == 0.0 => Err(ScriptError::DivisionByZero),
                BinOp::Div => Ok(Value::Float(x / y)),
                _ => Ok(Value::Float(x.rem_euclid(y))),
            },
            _ => Err(ScriptError::Type(format!(
                "unsupported operand types: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}
