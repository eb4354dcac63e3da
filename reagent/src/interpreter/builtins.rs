//! Builtin functions and modules exposed to sandboxed code.

use super::value::Value;
use super::InterpreterError;

/// Names bound as builtin callables in every sandbox.
pub const BUILTIN_NAMES: &[&str] = &[
    "print", "len", "str", "int", "float", "abs", "min", "max", "sum", "round", "range", "sorted",
    "join", "split", "type", "contains", "append", "keys", "values",
];

type EvalResult = Result<Value, InterpreterError>;

fn arity_error(name: &str, expected: &str, got: usize) -> InterpreterError {
    InterpreterError::Type(format!("{name}() takes {expected} arguments, got {got}"))
}

/// Invoke a pure builtin. Returns `None` when the name is not a builtin
/// (`print` is handled by the evaluator because it writes to the log
/// buffer).
pub fn call_builtin(name: &str, args: &[Value]) -> Option<EvalResult> {
    let result = match name {
        "len" => Some(builtin_len(args)),
        "str" => Some(builtin_str(args)),
        "int" => Some(builtin_int(args)),
        "float" => Some(builtin_float(args)),
        "abs" => Some(builtin_abs(args)),
        "min" => Some(builtin_min_max(args, true)),
        "max" => Some(builtin_min_max(args, false)),
        "sum" => Some(builtin_sum(args)),
        "round" => Some(builtin_round(args)),
        "range" => Some(builtin_range(args)),
        "sorted" => Some(builtin_sorted(args)),
        "join" => Some(builtin_join(args)),
        "split" => Some(builtin_split(args)),
        "type" => Some(builtin_type(args)),
        "contains" => Some(builtin_contains(args)),
        "append" => Some(builtin_append(args)),
        "keys" => Some(builtin_keys(args)),
        "values" => Some(builtin_values(args)),
        _ => None,
    };
    result
}

fn builtin_len(args: &[Value]) -> EvalResult {
    match args {
        [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
        [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
        [Value::Map(entries)] => Ok(Value::Int(entries.len() as i64)),
        [other] => Err(InterpreterError::Type(format!(
            "len() argument must be a string, list, or map, got {}",
            other.type_name()
        ))),
        _ => Err(arity_error("len", "exactly 1", args.len())),
    }
}

fn builtin_str(args: &[Value]) -> EvalResult {
    match args {
        [value] => Ok(Value::Str(value.to_string())),
        _ => Err(arity_error("str", "exactly 1", args.len())),
    }
}

fn builtin_int(args: &[Value]) -> EvalResult {
    match args {
        [Value::Int(i)] => Ok(Value::Int(*i)),
        [Value::Float(f)] => Ok(Value::Int(*f as i64)),
        [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
        [Value::Str(s)] => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            InterpreterError::Value(format!("cannot convert \"{s}\" to int"))
        }),
        [other] => Err(InterpreterError::Type(format!(
            "cannot convert {} to int",
            other.type_name()
        ))),
        _ => Err(arity_error("int", "exactly 1", args.len())),
    }
}

fn builtin_float(args: &[Value]) -> EvalResult {
    match args {
        [Value::Int(i)] => Ok(Value::Float(*i as f64)),
        [Value::Float(f)] => Ok(Value::Float(*f)),
        [Value::Str(s)] => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            InterpreterError::Value(format!("cannot convert \"{s}\" to float"))
        }),
        [other] => Err(InterpreterError::Type(format!(
            "cannot convert {} to float",
            other.type_name()
        ))),
        _ => Err(arity_error("float", "exactly 1", args.len())),
    }
}

fn builtin_abs(args: &[Value]) -> EvalResult {
    match args {
        [Value::Int(i)] => Ok(Value::Int(i.abs())),
        [Value::Float(f)] => Ok(Value::Float(f.abs())),
        [other] => Err(InterpreterError::Type(format!(
            "abs() argument must be numeric, got {}",
            other.type_name()
        ))),
        _ => Err(arity_error("abs", "exactly 1", args.len())),
    }
}

fn numeric_items<'a>(name: &str, args: &'a [Value]) -> Result<Vec<&'a Value>, InterpreterError> {
    let items: Vec<&Value> = match args {
        [Value::List(items)] => items.iter().collect(),
        many if many.len() > 1 => many.iter().collect(),
        _ => {
            return Err(InterpreterError::Type(format!(
                "{name}() expects a list or several arguments"
            )));
        }
    };
    if items.is_empty() {
        return Err(InterpreterError::Value(format!(
            "{name}() of an empty sequence"
        )));
    }
    Ok(items)
}

fn builtin_min_max(args: &[Value], take_min: bool) -> EvalResult {
    let name = if take_min { "min" } else { "max" };
    let items = numeric_items(name, args)?;

    let mut best = items[0].clone();
    for item in &items[1..] {
        let better = match (best.as_f64(), item.as_f64()) {
            (Some(a), Some(b)) => {
                if take_min {
                    b < a
                } else {
                    b > a
                }
            }
            _ => match (&best, item) {
                (Value::Str(a), Value::Str(b)) => {
                    if take_min {
                        b < a
                    } else {
                        b > a
                    }
                }
                _ => {
                    return Err(InterpreterError::Type(format!(
                        "{name}() arguments must be comparable"
                    )));
                }
            },
        };
        if better {
            best = (*item).clone();
        }
    }
    Ok(best)
}

fn builtin_sum(args: &[Value]) -> EvalResult {
    let [Value::List(items)] = args else {
        return Err(InterpreterError::Type("sum() expects a list".to_owned()));
    };
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;
    for item in items {
        match item {
            Value::Int(i) => {
                int_total += i;
                float_total += *i as f64;
            }
            Value::Float(f) => {
                saw_float = true;
                float_total += f;
            }
            other => {
                return Err(InterpreterError::Type(format!(
                    "sum() elements must be numeric, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(if saw_float {
        Value::Float(float_total)
    } else {
        Value::Int(int_total)
    })
}

fn builtin_round(args: &[Value]) -> EvalResult {
    match args {
        [Value::Int(i)] => Ok(Value::Int(*i)),
        [Value::Float(f)] => Ok(Value::Int(f.round() as i64)),
        [Value::Float(f), Value::Int(digits)] => {
            let factor = 10f64.powi(*digits as i32);
            Ok(Value::Float((f * factor).round() / factor))
        }
        _ => Err(InterpreterError::Type(
            "round() expects a number and an optional digit count".to_owned(),
        )),
    }
}

fn builtin_range(args: &[Value]) -> EvalResult {
    let ints: Vec<i64> = args
        .iter()
        .map(|v| match v {
            Value::Int(i) => Ok(*i),
            other => Err(InterpreterError::Type(format!(
                "range() arguments must be integers, got {}",
                other.type_name()
            ))),
        })
        .collect::<Result<_, _>>()?;

    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(arity_error("range", "1 to 3", args.len())),
    };
    if step == 0 {
        return Err(InterpreterError::Value("range() step must not be zero".to_owned()));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        current += step;
    }
    Ok(Value::List(items))
}

fn builtin_sorted(args: &[Value]) -> EvalResult {
    let [Value::List(items)] = args else {
        return Err(InterpreterError::Type("sorted() expects a list".to_owned()));
    };
    let mut sorted = items.clone();
    let mut failed = false;
    sorted.sort_by(|a, b| match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => match (a, b) {
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => {
                failed = true;
                std::cmp::Ordering::Equal
            }
        },
    });
    if failed {
        return Err(InterpreterError::Type(
            "sorted() elements must be mutually comparable".to_owned(),
        ));
    }
    Ok(Value::List(sorted))
}

fn builtin_join(args: &[Value]) -> EvalResult {
    match args {
        [Value::Str(sep), Value::List(items)] => {
            let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
            Ok(Value::Str(parts.join(sep)))
        }
        _ => Err(InterpreterError::Type(
            "join() expects a separator string and a list".to_owned(),
        )),
    }
}

fn builtin_split(args: &[Value]) -> EvalResult {
    match args {
        [Value::Str(s), Value::Str(sep)] => Ok(Value::List(
            s.split(sep.as_str())
                .map(|part| Value::Str(part.to_owned()))
                .collect(),
        )),
        [Value::Str(s)] => Ok(Value::List(
            s.split_whitespace()
                .map(|part| Value::Str(part.to_owned()))
                .collect(),
        )),
        _ => Err(InterpreterError::Type(
            "split() expects a string and an optional separator".to_owned(),
        )),
    }
}

fn builtin_type(args: &[Value]) -> EvalResult {
    match args {
        [value] => Ok(Value::Str(value.type_name().to_owned())),
        _ => Err(arity_error("type", "exactly 1", args.len())),
    }
}

fn builtin_contains(args: &[Value]) -> EvalResult {
    match args {
        [Value::List(items), needle] => Ok(Value::Bool(items.contains(needle))),
        [Value::Str(haystack), Value::Str(needle)] => {
            Ok(Value::Bool(haystack.contains(needle.as_str())))
        }
        [Value::Map(entries), Value::Str(key)] => {
            Ok(Value::Bool(entries.iter().any(|(k, _)| k == key)))
        }
        _ => Err(InterpreterError::Type(
            "contains() expects a container and a candidate member".to_owned(),
        )),
    }
}

fn builtin_append(args: &[Value]) -> EvalResult {
    match args {
        [Value::List(items), value] => {
            let mut extended = items.clone();
            extended.push(value.clone());
            Ok(Value::List(extended))
        }
        _ => Err(InterpreterError::Type(
            "append() expects a list and a value; it returns the extended list".to_owned(),
        )),
    }
}

fn builtin_keys(args: &[Value]) -> EvalResult {
    match args {
        [Value::Map(entries)] => Ok(Value::List(
            entries.iter().map(|(k, _)| Value::Str(k.clone())).collect(),
        )),
        _ => Err(InterpreterError::Type("keys() expects a map".to_owned())),
    }
}

fn builtin_values(args: &[Value]) -> EvalResult {
    match args {
        [Value::Map(entries)] => {
            Ok(Value::List(entries.iter().map(|(_, v)| v.clone()).collect()))
        }
        _ => Err(InterpreterError::Type("values() expects a map".to_owned())),
    }
}

/// Look up a constant on a builtin module.
pub fn module_attr(module: &str, attr: &str) -> Option<Value> {
    match (module, attr) {
        ("math", "pi") => Some(Value::Float(std::f64::consts::PI)),
        ("math", "e") => Some(Value::Float(std::f64::consts::E)),
        _ => None,
    }
}

/// Invoke a function on a builtin module. Returns `None` for unknown
/// functions so the evaluator can report a name error.
pub fn call_module_fn(module: &str, attr: &str, args: &[Value]) -> Option<EvalResult> {
    match module {
        "math" => call_math_fn(attr, args),
        "json" => call_json_fn(attr, args),
        _ => None,
    }
}

fn math_unary(name: &str, args: &[Value], f: fn(f64) -> f64) -> EvalResult {
    match args {
        [value] => value.as_f64().map(|x| Value::Float(f(x))).ok_or_else(|| {
            InterpreterError::Type(format!(
                "math.{name}() argument must be numeric, got {}",
                value.type_name()
            ))
        }),
        _ => Err(arity_error(name, "exactly 1", args.len())),
    }
}

fn call_math_fn(attr: &str, args: &[Value]) -> Option<EvalResult> {
    let result = match attr {
        "sqrt" => math_unary("sqrt", args, f64::sqrt),
        "floor" => math_unary("floor", args, f64::floor).map(|v| match v {
            Value::Float(f) => Value::Int(f as i64),
            other => other,
        }),
        "ceil" => math_unary("ceil", args, f64::ceil).map(|v| match v {
            Value::Float(f) => Value::Int(f as i64),
            other => other,
        }),
        "log" => math_unary("log", args, f64::ln),
        "log10" => math_unary("log10", args, f64::log10),
        "exp" => math_unary("exp", args, f64::exp),
        "sin" => math_unary("sin", args, f64::sin),
        "cos" => math_unary("cos", args, f64::cos),
        "tan" => math_unary("tan", args, f64::tan),
        "pow" => match args {
            [base, exp] => match (base.as_f64(), exp.as_f64()) {
                (Some(b), Some(e)) => Ok(Value::Float(b.powf(e))),
                _ => Err(InterpreterError::Type(
                    "math.pow() arguments must be numeric".to_owned(),
                )),
            },
            _ => Err(arity_error("pow", "exactly 2", args.len())),
        },
        _ => return None,
    };
    Some(result)
}

fn call_json_fn(attr: &str, args: &[Value]) -> Option<EvalResult> {
    let result = match attr {
        "dumps" => match args {
            [value] => Ok(Value::Str(value.to_json().to_string())),
            _ => Err(arity_error("dumps", "exactly 1", args.len())),
        },
        "loads" => match args {
            [Value::Str(text)] => serde_json::from_str::<serde_json::Value>(text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| InterpreterError::Value(format!("invalid JSON: {e}"))),
            _ => Err(InterpreterError::Type("json.loads() expects a string".to_owned())),
        },
        _ => return None,
    };
    Some(result)
}
