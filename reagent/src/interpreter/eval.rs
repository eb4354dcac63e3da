//! Tree-walking evaluator for the sandbox language.
//!
//! Evaluation is async because tool calls are async; recursion is boxed the
//! same way the agent boxes recursive sub-agent runs. An operation counter
//! caps runaway loops.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use serde_json::Value as Json;

use crate::tool::{invoke_tool, SharedTool};

use super::ast::{AssignTarget, BinOp, Expr, Stmt, UnaryOp};
use super::builtins;
use super::value::Value;
use super::InterpreterError;

/// Control-flow outcome of a statement.
enum Flow {
    Normal,
    Break,
    Continue,
}

pub(super) struct Evaluator<'a> {
    pub variables: &'a mut HashMap<String, Value>,
    pub tools: &'a HashMap<String, SharedTool>,
    pub authorized_imports: &'a [String],
    pub imported: &'a mut HashSet<String>,
    pub final_answer: &'a mut Option<Value>,
    pub logs: &'a mut String,
    pub ops: u64,
    pub max_ops: u64,
}

impl Evaluator<'_> {
    /// Run a program; the result is the value of the last expression
    /// statement (control-flow and assignment statements yield nothing).
    pub async fn run(&mut self, program: &[Stmt]) -> Result<Value, InterpreterError> {
        let mut last_value = Value::Null;
        for stmt in program {
            match self.eval_stmt(stmt, &mut last_value).await? {
                Flow::Normal => {}
                Flow::Break | Flow::Continue => {
                    return Err(InterpreterError::Value(
                        "'break'/'continue' outside of a loop".to_owned(),
                    ));
                }
            }
        }
        Ok(last_value)
    }

    fn tick(&mut self) -> Result<(), InterpreterError> {
        self.ops += 1;
        if self.ops > self.max_ops {
            return Err(InterpreterError::OperationLimit(self.max_ops));
        }
        Ok(())
    }

    fn eval_stmt<'b>(
        &'b mut self,
        stmt: &'b Stmt,
        last_value: &'b mut Value,
    ) -> BoxFuture<'b, Result<Flow, InterpreterError>> {
        Box::pin(async move {
            self.tick()?;
            match stmt {
                Stmt::Expr(expr) => {
                    *last_value = self.eval_expr(expr).await?;
                    Ok(Flow::Normal)
                }
                Stmt::Assign { target, value } => {
                    let value = self.eval_expr(value).await?;
                    self.assign(target, value).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    let branch = if self.eval_expr(cond).await?.truthy() {
                        then_body
                    } else {
                        else_body
                    };
                    for stmt in branch {
                        match self.eval_stmt(stmt, last_value).await? {
                            Flow::Normal => {}
                            flow => return Ok(flow),
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::For { var, iter, body } => {
                    let iterable = self.eval_expr(iter).await?;
                    let items: Vec<Value> = match iterable {
                        Value::List(items) => items,
                        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                        Value::Map(entries) => entries
                            .into_iter()
                            .map(|(k, _)| Value::Str(k))
                            .collect(),
                        other => {
                            return Err(InterpreterError::Type(format!(
                                "cannot iterate over {}",
                                other.type_name()
                            )));
                        }
                    };

                    'outer: for item in items {
                        self.tick()?;
                        self.variables.insert(var.clone(), item);
                        for stmt in body {
                            match self.eval_stmt(stmt, last_value).await? {
                                Flow::Normal => {}
                                Flow::Break => break 'outer,
                                Flow::Continue => break,
                            }
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::While { cond, body } => {
                    'outer: while self.eval_expr(cond).await?.truthy() {
                        self.tick()?;
                        for stmt in body {
                            match self.eval_stmt(stmt, last_value).await? {
                                Flow::Normal => {}
                                Flow::Break => break 'outer,
                                Flow::Continue => break,
                            }
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Break => Ok(Flow::Break),
                Stmt::Continue => Ok(Flow::Continue),
                Stmt::Import { module } => {
                    if self.authorized_imports.iter().any(|m| m == module) {
                        self.imported.insert(module.clone());
                        Ok(Flow::Normal)
                    } else {
                        Err(InterpreterError::UnauthorizedImport(module.clone()))
                    }
                }
            }
        })
    }

    async fn assign(
        &mut self,
        target: &AssignTarget,
        value: Value,
    ) -> Result<(), InterpreterError> {
        match target {
            AssignTarget::Name(name) => {
                self.variables.insert(name.clone(), value);
                Ok(())
            }
            AssignTarget::Index {
                value: container,
                index,
            } => {
                let Expr::Name(name) = container else {
                    return Err(InterpreterError::Type(
                        "indexed assignment is only supported on variables".to_owned(),
                    ));
                };
                let index = self.eval_expr(index).await?;
                let slot = self.variables.get_mut(name).ok_or_else(|| {
                    InterpreterError::Name(format!("name '{name}' is not defined"))
                })?;
                match (slot, index) {
                    (Value::List(items), Value::Int(i)) => {
                        let len = items.len() as i64;
                        let resolved = if i < 0 { len + i } else { i };
                        if resolved < 0 || resolved >= len {
                            return Err(InterpreterError::Value(format!(
                                "index {i} out of range for length {len}"
                            )));
                        }
                        items[resolved as usize] = value;
                        Ok(())
                    }
                    (Value::Map(entries), Value::Str(key)) => {
                        if let Some(entry) = entries.iter_mut().find(|(k, _)| *k == key) {
                            entry.1 = value;
                        } else {
                            entries.push((key, value));
                        }
                        Ok(())
                    }
                    (slot, index) => Err(InterpreterError::Type(format!(
                        "cannot assign into {} with {} index",
                        slot.type_name(),
                        index.type_name()
                    ))),
                }
            }
        }
    }

    fn eval_expr<'b>(
        &'b mut self,
        expr: &'b Expr,
    ) -> BoxFuture<'b, Result<Value, InterpreterError>> {
        Box::pin(async move {
            self.tick()?;
            match expr {
                Expr::Null => Ok(Value::Null),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Int(i) => Ok(Value::Int(*i)),
                Expr::Float(f) => Ok(Value::Float(*f)),
                Expr::Str(s) => Ok(Value::Str(s.clone())),
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::List(values))
                }
                Expr::Map(entries) => {
                    let mut values = Vec::with_capacity(entries.len());
                    for (key, value) in entries {
                        let key = match self.eval_expr(key).await? {
                            Value::Str(s) => s,
                            other => {
                                return Err(InterpreterError::Type(format!(
                                    "map keys must be strings, got {}",
                                    other.type_name()
                                )));
                            }
                        };
                        values.push((key, self.eval_expr(value).await?));
                    }
                    Ok(Value::Map(values))
                }
                Expr::Name(name) => self.variables.get(name).cloned().ok_or_else(|| {
                    InterpreterError::Name(format!("name '{name}' is not defined"))
                }),
                Expr::Unary { op, operand } => {
                    let value = self.eval_expr(operand).await?;
                    match op {
                        UnaryOp::Neg => match value {
                            Value::Int(i) => Ok(Value::Int(-i)),
                            Value::Float(f) => Ok(Value::Float(-f)),
                            other => Err(InterpreterError::Type(format!(
                                "cannot negate {}",
                                other.type_name()
                            ))),
                        },
                        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    }
                }
                Expr::Binary { op, left, right } => {
                    // Short-circuit boolean operators return the deciding
                    // operand, enabling the `x or fallback` idiom.
                    if *op == BinOp::And {
                        let left = self.eval_expr(left).await?;
                        if !left.truthy() {
                            return Ok(left);
                        }
                        return self.eval_expr(right).await;
                    }
                    if *op == BinOp::Or {
                        let left = self.eval_expr(left).await?;
                        if left.truthy() {
                            return Ok(left);
                        }
                        return self.eval_expr(right).await;
                    }
                    let left = self.eval_expr(left).await?;
                    let right = self.eval_expr(right).await?;
                    binary_op(*op, &left, &right)
                }
                Expr::Index { value, index } => {
                    let container = self.eval_expr(value).await?;
                    let index = self.eval_expr(index).await?;
                    container.index(&index)
                }
                Expr::Attribute { value, attr } => {
                    let Expr::Name(module) = value.as_ref() else {
                        return Err(InterpreterError::Type(
                            "attribute access is only supported on imported modules".to_owned(),
                        ));
                    };
                    if !self.imported.contains(module) {
                        return Err(InterpreterError::Name(format!(
                            "name '{module}' is not defined; did you forget to import it?"
                        )));
                    }
                    builtins::module_attr(module, attr).ok_or_else(|| {
                        InterpreterError::Name(format!(
                            "module '{module}' has no attribute '{attr}'"
                        ))
                    })
                }
                Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs).await,
            }
        })
    }

    async fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, InterpreterError> {
        match func {
            Expr::Name(name) => {
                if name == "final_answer" {
                    return self.call_final_answer(args, kwargs).await;
                }
                if name == "print" {
                    return self.call_print(args).await;
                }
                if builtins::BUILTIN_NAMES.contains(&name.as_str()) {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval_expr(arg).await?);
                    }
                    if !kwargs.is_empty() {
                        return Err(InterpreterError::Type(format!(
                            "{name}() does not accept keyword arguments"
                        )));
                    }
                    return builtins::call_builtin(name, &values).unwrap_or_else(|| {
                        Err(InterpreterError::Name(format!(
                            "name '{name}' is not defined"
                        )))
                    });
                }
                if self.tools.contains_key(name) {
                    return self.call_tool(name, args, kwargs).await;
                }
                Err(InterpreterError::Name(format!(
                    "name '{name}' is not defined"
                )))
            }
            Expr::Attribute { value, attr } => {
                let Expr::Name(module) = value.as_ref() else {
                    return Err(InterpreterError::Type(
                        "only module functions can be called with '.'".to_owned(),
                    ));
                };
                if !self.imported.contains(module) {
                    return Err(InterpreterError::Name(format!(
                        "name '{module}' is not defined; did you forget to import it?"
                    )));
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg).await?);
                }
                builtins::call_module_fn(module, attr, &values).unwrap_or_else(|| {
                    Err(InterpreterError::Name(format!(
                        "module '{module}' has no attribute '{attr}'"
                    )))
                })
            }
            other => Err(InterpreterError::Type(format!(
                "expression is not callable: {other:?}"
            ))),
        }
    }

    async fn call_final_answer(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, InterpreterError> {
        let value = if let [single] = args {
            self.eval_expr(single).await?
        } else if args.is_empty() {
            if let [(_, expr)] = kwargs {
                self.eval_expr(expr).await?
            } else {
                return Err(InterpreterError::Type(
                    "final_answer() takes exactly one argument".to_owned(),
                ));
            }
        } else {
            return Err(InterpreterError::Type(
                "final_answer() takes exactly one argument".to_owned(),
            ));
        };

        // Record the answer and hand the value back so trailing code can
        // keep using it.
        *self.final_answer = Some(value.clone());
        Ok(value)
    }

    async fn call_print(&mut self, args: &[Expr]) -> Result<Value, InterpreterError> {
        let mut parts = Vec::with_capacity(args.len());
        for arg in args {
            parts.push(self.eval_expr(arg).await?.to_string());
        }
        self.logs.push_str(&parts.join(" "));
        self.logs.push('\n');
        Ok(Value::Null)
    }

    async fn call_tool(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, InterpreterError> {
        if !args.is_empty() {
            return Err(InterpreterError::Type(format!(
                "tool '{name}' accepts keyword arguments only, e.g. {name}(param=value)"
            )));
        }

        let mut json_args = serde_json::Map::new();
        for (key, expr) in kwargs {
            let value = self.eval_expr(expr).await?;
            json_args.insert(key.clone(), value.to_json());
        }

        let tool = self.tools.get(name).cloned().ok_or_else(|| {
            InterpreterError::Name(format!("name '{name}' is not defined"))
        })?;

        let result = invoke_tool(tool.as_ref(), &Json::Object(json_args), true)
            .await
            .map_err(|e| InterpreterError::Tool(format!("{name}: {e}")))?;

        Ok(match result.as_json() {
            Some(json) => Value::from_json(&json),
            None => Value::Str(result.to_display_string()),
        })
    }
}

fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value, InterpreterError> {
    use Value::{Float, Int, List, Str};

    let type_error = || {
        InterpreterError::Type(format!(
            "unsupported operand types for {op:?}: {} and {}",
            left.type_name(),
            right.type_name()
        ))
    };

    match op {
        BinOp::Add => match (left, right) {
            (Int(a), Int(b)) => Ok(Int(a + b)),
            (Str(a), Str(b)) => Ok(Str(format!("{a}{b}"))),
            (List(a), List(b)) => {
                let mut joined = a.clone();
                joined.extend(b.iter().cloned());
                Ok(List(joined))
            }
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => Ok(Float(a + b)),
                _ => Err(type_error()),
            },
        },
        BinOp::Sub => numeric_op(left, right, |a, b| a - b, |a, b| a - b).ok_or_else(type_error),
        BinOp::Mul => match (left, right) {
            (Str(s), Int(n)) | (Int(n), Str(s)) => {
                let count = usize::try_from(*n).unwrap_or(0);
                Ok(Str(s.repeat(count)))
            }
            _ => numeric_op(left, right, |a, b| a * b, |a, b| a * b).ok_or_else(type_error),
        },
        BinOp::Div => match (left.as_f64(), right.as_f64()) {
            (Some(_), Some(b)) if b == 0.0 => {
                Err(InterpreterError::Value("division by zero".to_owned()))
            }
            (Some(a), Some(b)) => Ok(Float(a / b)),
            _ => Err(type_error()),
        },
        BinOp::Mod => match (left, right) {
            (Int(_), Int(0)) => Err(InterpreterError::Value("modulo by zero".to_owned())),
            (Int(a), Int(b)) => Ok(Int(a.rem_euclid(*b))),
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => Ok(Float(a % b)),
                _ => Err(type_error()),
            },
        },
        BinOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
            let ordering = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => match (left, right) {
                    (Str(a), Str(b)) => Some(a.cmp(b)),
                    _ => None,
                },
            }
            .ok_or_else(type_error)?;

            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::LtEq => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::And | BinOp::Or => unreachable!("short-circuited in eval_expr"),
    }
}

fn numeric_op(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Option<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(Value::Int(int_op(*a, *b))),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Some(Value::Float(float_op(a, b))),
            _ => None,
        },
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}
