//! Tree-walking interpreter for parsed script source.

use super::parser::{AssignOp, BinaryOp, Expr, LogicalOp, Place, Stmt, UnaryOp};
use super::{SandboxEvaluator, ScriptError};
use crate::value::{as_f64, display, is_truthy, number_value, type_name, values_equal};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Name of the environment object exposed to scripts.
const ENV: &str = "_";
/// Name under which the bindings are exposed.
const BINDINGS: &str = "bindings";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Read/write bindings, emission allowed.
    Action,
    /// Read-only; bare identifiers resolve to bindings keys.
    Statement,
}

/// Storage written by an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Local,
    Bindings,
}

enum Flow {
    Normal,
    Return(Value),
}

/// One path step into a value.
enum Key {
    Field(String),
    Index(usize),
}

/// Evaluation state for a single call. Created fresh per evaluation.
pub(crate) struct Frame<'a> {
    host: &'a SandboxEvaluator,
    mode: Mode,
    bindings: Value,
    locals: HashMap<String, Value>,
    emitted: Vec<Value>,
}

/// Result of running an action body.
pub(crate) struct ActionRun {
    /// The returned value, or the final bindings when nothing was returned.
    pub result: Value,
    pub emitted: Vec<Value>,
}

impl<'a> Frame<'a> {
    pub fn new(host: &'a SandboxEvaluator, mode: Mode, bindings: Value) -> Self {
        Self {
            host,
            mode,
            bindings,
            locals: HashMap::new(),
            emitted: Vec::new(),
        }
    }

    pub fn run(mut self, program: &[Stmt]) -> Result<ActionRun, ScriptError> {
        let result = match self.exec_block(program)? {
            Flow::Return(value) => value,
            Flow::Normal => std::mem::take(&mut self.bindings),
        };
        Ok(ActionRun {
            result,
            emitted: self.emitted,
        })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Let(name, init) => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                self.locals.insert(name.clone(), value);
            }
            Stmt::Assign {
                target,
                place,
                op,
                value,
            } => {
                let rhs = self.eval(value)?;
                let new_value = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => binary(BinaryOp::Add, &self.eval(target)?, &rhs)?,
                    AssignOp::Sub => binary(BinaryOp::Sub, &self.eval(target)?, &rhs)?,
                };
                self.assign(place, new_value)?;
            }
            Stmt::Delete(place) => self.delete(place)?,
            Stmt::If(cond, then, otherwise) => {
                let branch = if is_truthy(&self.eval(cond)?) {
                    then
                } else {
                    otherwise
                };
                return self.exec_block(branch);
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Block(stmts) => return self.exec_block(stmts),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    /// Resolves which storage a place writes to, plus the remaining path.
    fn target<'p>(&self, place: &'p Place) -> Result<(Root, &'p [Expr]), ScriptError> {
        if self.mode == Mode::Statement {
            return Err(ScriptError::Runtime("bindings are read-only here".to_string()));
        }
        if self.locals.contains_key(&place.root) {
            return Ok((Root::Local, &place.path));
        }
        match place.root.as_str() {
            BINDINGS => Ok((Root::Bindings, &place.path)),
            ENV => match place.path.first() {
                Some(Expr::Literal(Value::String(s))) if s == BINDINGS => {
                    Ok((Root::Bindings, &place.path[1..]))
                }
                _ => Err(ScriptError::Runtime(
                    "the environment is read-only".to_string(),
                )),
            },
            other => Err(undefined(other)),
        }
    }

    fn slot(&mut self, root: Root, place: &Place) -> Result<&mut Value, ScriptError> {
        match root {
            Root::Bindings => Ok(&mut self.bindings),
            Root::Local => self
                .locals
                .get_mut(&place.root)
                .ok_or_else(|| undefined(&place.root)),
        }
    }

    fn keys(&mut self, path: &[Expr]) -> Result<Vec<Key>, ScriptError> {
        path.iter()
            .map(|expr| {
                let key = self.eval(expr)?;
                to_key(&key)
            })
            .collect()
    }

    fn assign(&mut self, place: &Place, value: Value) -> Result<(), ScriptError> {
        let (root, path) = self.target(place)?;
        let keys = self.keys(path)?;
        if root == Root::Bindings && keys.is_empty() && !value.is_object() {
            return Err(ScriptError::Runtime("bindings must be an object".to_string()));
        }
        set_path(self.slot(root, place)?, &keys, value)
    }

    fn delete(&mut self, place: &Place) -> Result<(), ScriptError> {
        let (root, path) = self.target(place)?;
        let mut keys = self.keys(path)?;
        let Some(last) = keys.pop() else {
            return Err(ScriptError::Runtime(format!(
                "cannot delete '{}'",
                place.root
            )));
        };

        let mut current = self.slot(root, place)?;
        for key in &keys {
            current = match (current, key) {
                (Value::Object(map), Key::Field(name)) => match map.get_mut(name) {
                    Some(next) => next,
                    None => return Ok(()),
                },
                (Value::Array(items), Key::Index(i)) => match items.get_mut(*i) {
                    Some(next) => next,
                    None => return Ok(()),
                },
                _ => return Ok(()),
            };
        }
        match (current, last) {
            (Value::Object(map), Key::Field(name)) => {
                map.remove(&name);
            }
            (Value::Array(items), Key::Index(i)) => {
                if let Some(slot) = items.get_mut(i) {
                    *slot = Value::Null;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (key, value) in fields {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Ident(name) => self.resolve(name),
            Expr::Member(base, name) => {
                if let Expr::Ident(root) = base.as_ref() {
                    if root == ENV && !self.locals.contains_key(ENV) {
                        return self.env_member(name);
                    }
                }
                let base = self.eval(base)?;
                project(&base, &Key::Field(name.clone()))
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                project(&base, &to_key(&index)?)
            }
            Expr::Call(callee, args) => {
                let name = match callee.as_ref() {
                    Expr::Member(base, name) if matches!(base.as_ref(), Expr::Ident(r) if r == ENV) => {
                        name
                    }
                    _ => return Err(ScriptError::Runtime("value is not callable".to_string())),
                };
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, args)
            }
            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!is_truthy(&value))),
                    UnaryOp::Neg => arithmetic(-numeric(&value, "-")?),
                    UnaryOp::Plus => arithmetic(numeric(&value, "+")?),
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left)?;
                match (op, is_truthy(&left)) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Conditional(cond, then, otherwise) => {
                if is_truthy(&self.eval(cond)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self.locals.get(name) {
            return Ok(value.clone());
        }
        match (self.mode, name) {
            (_, BINDINGS) => Ok(self.bindings.clone()),
            (Mode::Statement, ENV) => Ok(self.bindings.clone()),
            (Mode::Statement, key) => Ok(self.bindings.get(key).cloned().unwrap_or(Value::Null)),
            (Mode::Action, other) => Err(undefined(other)),
        }
    }

    /// `_.name` outside of a call.
    fn env_member(&self, name: &str) -> Result<Value, ScriptError> {
        match (self.mode, name) {
            (_, BINDINGS) => Ok(self.bindings.clone()),
            (Mode::Statement, key) => Ok(self.bindings.get(key).cloned().unwrap_or(Value::Null)),
            (Mode::Action, _) => Ok(Value::Null),
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        match name {
            "out" => {
                if self.mode == Mode::Statement {
                    return Err(ScriptError::Runtime(
                        "emission is not available here".to_string(),
                    ));
                }
                self.emitted
                    .push(args.into_iter().next().unwrap_or(Value::Null));
                Ok(Value::Null)
            }
            "log" => {
                for arg in &args {
                    tracing::info!(target: "sheen::sandbox", "{}", display(arg));
                }
                Ok(Value::Null)
            }
            "genRandomId" => {
                let len = length_arg(&args, 0)?;
                let mut rng = self.host.rng.lock();
                let id: String = (0..len)
                    .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
                    .collect();
                Ok(Value::String(id))
            }
            "generateRandomInt" => {
                let min = numeric(args.first().unwrap_or(&Value::Null), "generateRandomInt")?.ceil();
                let max = numeric(args.get(1).unwrap_or(&Value::Null), "generateRandomInt")?.floor();
                if min > max || min < i64::MIN as f64 || max > i64::MAX as f64 {
                    return Err(ScriptError::Runtime(format!(
                        "generateRandomInt: empty range {}..={}",
                        min, max
                    )));
                }
                let n = self.host.rng.lock().gen_range(min as i64..=max as i64);
                Ok(Value::from(n))
            }
            "generateRandomString" => {
                let len = length_arg(&args, 0)?;
                let s: String = (&mut *self.host.rng.lock())
                    .sample_iter(&Alphanumeric)
                    .take(len)
                    .map(char::from)
                    .collect();
                Ok(Value::String(s))
            }
            "lookup" => {
                let path = args.first().map(display).unwrap_or_default();
                Ok(self.host.lookup.lookup(&path).unwrap_or(Value::Null))
            }
            other => Err(ScriptError::Runtime(format!(
                "_.{} is not a function",
                other
            ))),
        }
    }
}

// =============================================================================
// Value operations
// =============================================================================

fn undefined(name: &str) -> ScriptError {
    ScriptError::Runtime(format!("{} is not defined", name))
}

fn numeric(value: &Value, op: &str) -> Result<f64, ScriptError> {
    as_f64(value).ok_or_else(|| {
        ScriptError::Runtime(format!("'{}' expects a number, got {}", op, type_name(value)))
    })
}

fn arithmetic(result: f64) -> Result<Value, ScriptError> {
    number_value(result)
        .ok_or_else(|| ScriptError::Runtime("arithmetic result is not a finite number".to_string()))
}

fn length_arg(args: &[Value], index: usize) -> Result<usize, ScriptError> {
    let n = numeric(args.get(index).unwrap_or(&Value::Null), "length")?;
    if n < 0.0 || n > 4096.0 {
        return Err(ScriptError::Runtime(format!("length out of range: {}", n)));
    }
    Ok(n as usize)
}

fn to_key(value: &Value) -> Result<Key, ScriptError> {
    match value {
        Value::String(s) => Ok(Key::Field(s.clone())),
        Value::Number(n) => match n.as_u64() {
            Some(i) => Ok(Key::Index(i as usize)),
            None => Ok(Key::Field(n.to_string())),
        },
        other => Err(ScriptError::Runtime(format!(
            "cannot use {} as a key",
            type_name(other)
        ))),
    }
}

fn project(base: &Value, key: &Key) -> Result<Value, ScriptError> {
    let found = match (base, key) {
        (Value::Object(map), Key::Field(name)) => map.get(name).cloned(),
        (Value::Object(map), Key::Index(i)) => map.get(&i.to_string()).cloned(),
        (Value::Array(items), Key::Field(name)) if name == "length" => {
            Some(Value::from(items.len()))
        }
        (Value::Array(items), Key::Index(i)) => items.get(*i).cloned(),
        (Value::String(s), Key::Field(name)) if name == "length" => {
            Some(Value::from(s.chars().count()))
        }
        (Value::String(s), Key::Index(i)) => s.chars().nth(*i).map(|c| Value::String(c.into())),
        (Value::Null, key) => {
            let name = match key {
                Key::Field(name) => name.clone(),
                Key::Index(i) => i.to_string(),
            };
            return Err(ScriptError::Runtime(format!(
                "cannot read property '{}' of null",
                name
            )));
        }
        _ => None,
    };
    Ok(found.unwrap_or(Value::Null))
}

fn set_path(root: &mut Value, keys: &[Key], value: Value) -> Result<(), ScriptError> {
    let Some((last, parents)) = keys.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    for key in parents {
        current = match (current, key) {
            (Value::Object(map), Key::Field(name)) => map
                .entry(name.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            (Value::Object(map), Key::Index(i)) => map
                .entry(i.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            (Value::Array(items), Key::Index(i)) => items
                .get_mut(*i)
                .ok_or_else(|| ScriptError::Runtime(format!("index {} out of bounds", i)))?,
            (other, _) => {
                return Err(ScriptError::Runtime(format!(
                    "cannot set a property on {}",
                    type_name(other)
                )))
            }
        };
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
    }

    match (current, last) {
        (Value::Object(map), Key::Field(name)) => {
            map.insert(name.clone(), value);
        }
        (Value::Object(map), Key::Index(i)) => {
            map.insert(i.to_string(), value);
        }
        (Value::Array(items), Key::Index(i)) if *i < items.len() => items[*i] = value,
        (Value::Array(items), Key::Index(i)) if *i == items.len() => items.push(value),
        (Value::Array(_), Key::Index(i)) => {
            return Err(ScriptError::Runtime(format!("index {} out of bounds", i)))
        }
        (other, _) => {
            return Err(ScriptError::Runtime(format!(
                "cannot set a property on {}",
                type_name(other)
            )))
        }
    }
    Ok(())
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", display(left), display(right))))
            }
            _ => arithmetic(numeric(left, "+")? + numeric(right, "+")?),
        },
        BinaryOp::Sub => arithmetic(numeric(left, "-")? - numeric(right, "-")?),
        BinaryOp::Mul => arithmetic(numeric(left, "*")? * numeric(right, "*")?),
        BinaryOp::Div => arithmetic(numeric(left, "/")? / numeric(right, "/")?),
        BinaryOp::Rem => arithmetic(numeric(left, "%")? % numeric(right, "%")?),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => as_f64(left)
                    .zip(as_f64(right))
                    .and_then(|(a, b)| a.partial_cmp(&b)),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
    }
}
