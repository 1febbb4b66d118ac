//! Whitelisted builtin functions
//!
//! These are the only non-capability functions a script can call. `print` and
//! `gather` need interpreter state and are dispatched there; everything in
//! this module is a pure function of its arguments.

use indexmap::IndexMap;

use super::value::Value;
use super::ScriptError;

/// Every builtin name, in the order the prompt lists them
pub const BUILTINS: &[&str] = &[
    "print",
    "len",
    "range",
    "enumerate",
    "zip",
    "sum",
    "min",
    "max",
    "abs",
    "sorted",
    "reversed",
    "keys",
    "values",
    "get",
    "str",
    "int",
    "float",
    "bool",
    "type",
    "push",
    "contains",
    "split",
    "lines",
    "join",
    "trim",
    "lower",
    "upper",
    "replace",
    "starts_with",
    "ends_with",
    "to_json",
    "parse_json",
    "gather",
];

const MAX_RANGE: i64 = 1_000_000;

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Evaluated call arguments
#[derive(Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keyword: Vec::new(),
        }
    }

    /// Argument by position or keyword
    fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| {
            self.keyword
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
        })
    }

    fn require(&self, func: &str, index: usize, name: &str) -> Result<&Value, ScriptError> {
        self.get(index, name).ok_or_else(|| {
            ScriptError::Argument(format!("{}() missing argument '{}'", func, name))
        })
    }

    fn str_arg(&self, func: &str, index: usize, name: &str) -> Result<&str, ScriptError> {
        self.require(func, index, name)?
            .as_str()
            .map_err(|e| ScriptError::Type(format!("{}(): {}", func, e)))
    }

    fn list_arg(&self, func: &str, index: usize, name: &str) -> Result<Vec<Value>, ScriptError> {
        iterate(self.require(func, index, name)?)
            .map_err(|e| ScriptError::Type(format!("{}(): {}", func, e)))
    }

    fn max_positional(&self, func: &str, max: usize) -> Result<(), ScriptError> {
        if self.positional.len() > max {
            return Err(ScriptError::Argument(format!(
                "{}() takes at most {} arguments ({} given)",
                func,
                max,
                self.positional.len()
            )));
        }
        Ok(())
    }
}

/// Items produced by iterating a value: list items, string chars or map keys
pub fn iterate(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Map(map) => Ok(map.keys().map(|k| Value::Str(k.clone())).collect()),
        other => Err(ScriptError::Type(format!(
            "{} is not iterable",
            other.type_name()
        ))),
    }
}

/// Membership test shared by `in` and `contains`
pub fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::List(items) => Ok(items.iter().any(|v| v.loose_eq(item))),
        Value::Str(s) => Ok(s.contains(item.as_str()?)),
        Value::Map(map) => Ok(map.contains_key(item.as_str()?)),
        other => Err(ScriptError::Type(format!(
            "'in' is not supported for {}",
            other.type_name()
        ))),
    }
}

/// Call a pure builtin
pub fn call(name: &str, args: &CallArgs) -> Result<Value, ScriptError> {
    match name {
        "len" => {
            args.max_positional(name, 1)?;
            let n = match args.require(name, 0, "value")? {
                Value::Str(s) => s.chars().count(),
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(ScriptError::Type(format!(
                        "len() of {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        "range" => range(args),
        "enumerate" => {
            let items = args.list_arg(name, 0, "items")?;
            Ok(Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::List(vec![Value::Int(i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let a = args.list_arg(name, 0, "a")?;
            let b = args.list_arg(name, 1, "b")?;
            Ok(Value::List(
                a.into_iter()
                    .zip(b)
                    .map(|(x, y)| Value::List(vec![x, y]))
                    .collect(),
            ))
        }
        "sum" => {
            let items = args.list_arg(name, 0, "items")?;
            let mut int_total: i64 = 0;
            let mut float_total: Option<f64> = None;
            for item in &items {
                match item {
                    Value::Int(n) => {
                        int_total = int_total.checked_add(*n).ok_or_else(|| {
                            ScriptError::Runtime("integer overflow in sum()".to_string())
                        })?
                    }
                    Value::Float(f) => *float_total.get_or_insert(0.0) += f,
                    other => {
                        return Err(ScriptError::Type(format!(
                            "sum() of {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(match float_total {
                Some(f) => Value::Float(f + int_total as f64),
                None => Value::Int(int_total),
            })
        }
        "min" | "max" => {
            let items = if args.positional.len() > 1 {
                args.positional.clone()
            } else {
                args.list_arg(name, 0, "items")?
            };
            let mut best: Option<Value> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let ord = item.compare(&current)?;
                        let better = if name == "min" {
                            ord.is_lt()
                        } else {
                            ord.is_gt()
                        };
                        if better {
                            item
                        } else {
                            current
                        }
                    }
                });
            }
            best.ok_or_else(|| ScriptError::Argument(format!("{}() of empty sequence", name)))
        }
        "abs" => match args.require(name, 0, "value")? {
            Value::Int(n) => n
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| ScriptError::Runtime("integer overflow in abs()".to_string())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(ScriptError::Type(format!("abs() of {}", other.type_name()))),
        },
        "sorted" => {
            let mut items = args.list_arg(name, 0, "items")?;
            let mut failure = None;
            items.sort_by(|a, b| {
                a.compare(b).unwrap_or_else(|e| {
                    failure.get_or_insert(e);
                    std::cmp::Ordering::Equal
                })
            });
            if let Some(e) = failure {
                return Err(e);
            }
            if args.get(1, "reverse").is_some_and(Value::truthy) {
                items.reverse();
            }
            Ok(Value::List(items))
        }
        "reversed" => match args.require(name, 0, "items")? {
            Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
            other => {
                let mut items = iterate(other)?;
                items.reverse();
                Ok(Value::List(items))
            }
        },
        "keys" | "values" => match args.require(name, 0, "map")? {
            Value::Map(map) => Ok(Value::List(if name == "keys" {
                map.keys().map(|k| Value::Str(k.clone())).collect()
            } else {
                map.values().cloned().collect()
            })),
            other => Err(ScriptError::Type(format!(
                "{}() of {}",
                name,
                other.type_name()
            ))),
        },
        "get" => {
            let default = args.get(2, "default").cloned().unwrap_or(Value::Null);
            let key = args.require(name, 1, "key")?;
            match args.require(name, 0, "container")? {
                Value::Map(map) => Ok(map.get(key.as_str()?).cloned().unwrap_or(default)),
                Value::List(items) => Ok(key
                    .as_int()
                    .ok()
                    .and_then(|i| normalize_index(i, items.len()))
                    .map(|i| items[i].clone())
                    .unwrap_or(default)),
                _ => Ok(default),
            }
        }
        "str" => Ok(Value::Str(
            args.get(0, "value").map(Value::to_string).unwrap_or_default(),
        )),
        "int" => match args.require(name, 0, "value")? {
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
            Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                ScriptError::Type(format!("invalid literal for int(): {:?}", s))
            }),
            other => Err(ScriptError::Type(format!("int() of {}", other.type_name()))),
        },
        "float" => match args.require(name, 0, "value")? {
            Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                ScriptError::Type(format!("invalid literal for float(): {:?}", s))
            }),
            Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            other => other
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| ScriptError::Type(format!("float() of {}", other.type_name()))),
        },
        "bool" => Ok(Value::Bool(args.get(0, "value").is_some_and(Value::truthy))),
        "type" => Ok(Value::Str(
            args.require(name, 0, "value")?.type_name().to_string(),
        )),
        "push" => {
            let mut items = match args.require(name, 0, "list")? {
                Value::List(items) => items.clone(),
                other => {
                    return Err(ScriptError::Type(format!(
                        "push() to {}",
                        other.type_name()
                    )))
                }
            };
            items.push(args.require(name, 1, "item")?.clone());
            Ok(Value::List(items))
        }
        "contains" => Ok(Value::Bool(contains(
            args.require(name, 0, "container")?,
            args.require(name, 1, "item")?,
        )?)),
        "split" => {
            let s = args.str_arg(name, 0, "text")?;
            let parts: Vec<Value> = match args.get(1, "sep") {
                None | Some(Value::Null) => s.split_whitespace().map(Value::from).collect(),
                Some(sep) => {
                    let sep = sep.as_str()?;
                    if sep.is_empty() {
                        return Err(ScriptError::Argument("split() empty separator".into()));
                    }
                    s.split(sep).map(Value::from).collect()
                }
            };
            Ok(Value::List(parts))
        }
        "lines" => Ok(Value::List(
            args.str_arg(name, 0, "text")?
                .lines()
                .map(Value::from)
                .collect(),
        )),
        "join" => {
            // Accept both join(items, sep) and the receiver-first sep.join(items)
            let (items, sep) = match (args.get(0, "items"), args.get(1, "sep")) {
                (Some(Value::Str(sep)), Some(items @ Value::List(_))) => (items, sep.as_str()),
                (Some(items), Some(sep)) => (items, sep.as_str()?),
                (Some(items), None) => (items, ""),
                _ => return Err(ScriptError::Argument("join() missing argument 'items'".into())),
            };
            let parts: Vec<String> = iterate(items)?.iter().map(Value::to_string).collect();
            Ok(Value::Str(parts.join(sep)))
        }
        "trim" => Ok(Value::from(args.str_arg(name, 0, "text")?.trim())),
        "lower" => Ok(Value::from(args.str_arg(name, 0, "text")?.to_lowercase())),
        "upper" => Ok(Value::from(args.str_arg(name, 0, "text")?.to_uppercase())),
        "replace" => {
            let s = args.str_arg(name, 0, "text")?;
            let old = args.str_arg(name, 1, "old")?;
            let new = args.str_arg(name, 2, "new")?;
            Ok(Value::from(s.replace(old, new)))
        }
        "starts_with" => Ok(Value::Bool(
            args.str_arg(name, 0, "text")?
                .starts_with(args.str_arg(name, 1, "prefix")?),
        )),
        "ends_with" => Ok(Value::Bool(
            args.str_arg(name, 0, "text")?
                .ends_with(args.str_arg(name, 1, "suffix")?),
        )),
        "to_json" => {
            let json = args.require(name, 0, "value")?.to_json();
            let pretty = args.get(1, "pretty").is_some_and(Value::truthy);
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map(Value::Str)
                .map_err(|e| ScriptError::Runtime(format!("to_json(): {}", e)))
        }
        "parse_json" => {
            let s = args.str_arg(name, 0, "text")?;
            serde_json::from_str::<serde_json::Value>(s)
                .map(|json| Value::from_json(&json))
                .map_err(|e| ScriptError::Runtime(format!("parse_json(): {}", e)))
        }
        _ => Err(ScriptError::UndefinedName(name.to_string())),
    }
}

fn range(args: &CallArgs) -> Result<Value, ScriptError> {
    args.max_positional("range", 3)?;
    let nums: Vec<i64> = args
        .positional
        .iter()
        .map(Value::as_int)
        .collect::<Result<_, _>>()?;
    let (start, end, step) = match nums.as_slice() {
        [end] => (0, *end, 1),
        [start, end] => (*start, *end, 1),
        [start, end, step] => (*start, *end, *step),
        _ => return Err(ScriptError::Argument("range() expects 1 to 3 arguments".into())),
    };
    if step == 0 {
        return Err(ScriptError::Argument("range() step must not be zero".into()));
    }
    let span = if step > 0 {
        end.saturating_sub(start)
    } else {
        start.saturating_sub(end)
    };
    if span / step.abs() > MAX_RANGE {
        return Err(ScriptError::Runtime(format!(
            "range() larger than {} elements",
            MAX_RANGE
        )));
    }

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        out.push(Value::Int(i));
        i += step;
    }
    Ok(Value::List(out))
}

/// Python-style index: negative counts from the end
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

/// Build a map value from string keys
pub fn map_of(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<IndexMap<_, _>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_pos(name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        call(name, &CallArgs::positional(args))
    }

    fn ints(ns: &[i64]) -> Value {
        Value::List(ns.iter().map(|n| Value::Int(*n)).collect())
    }

    #[test]
    fn test_range() {
        assert_eq!(call_pos("range", vec![Value::Int(3)]).unwrap(), ints(&[0, 1, 2]));
        assert_eq!(
            call_pos("range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(),
            ints(&[5, 3, 1])
        );
        assert!(call_pos("range", vec![Value::Int(0), Value::Int(5), Value::Int(0)]).is_err());
        assert!(call_pos("range", vec![Value::Int(i64::MAX)]).is_err());
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(call_pos("sum", vec![ints(&[1, 2, 3])]).unwrap(), Value::Int(6));
        assert_eq!(
            call_pos("sum", vec![Value::List(vec![Value::Int(1), Value::Float(0.5)])]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(call_pos("max", vec![ints(&[4, 9, 2])]).unwrap(), Value::Int(9));
        assert_eq!(
            call_pos("min", vec![Value::Int(4), Value::Int(2)]).unwrap(),
            Value::Int(2)
        );
        assert!(call_pos("max", vec![ints(&[])]).is_err());
    }

    #[test]
    fn test_sorted_and_reverse_keyword() {
        let args = CallArgs {
            positional: vec![ints(&[3, 1, 2])],
            keyword: vec![("reverse".into(), Value::Bool(true))],
        };
        assert_eq!(call("sorted", &args).unwrap(), ints(&[3, 2, 1]));
        let mixed = Value::List(vec![Value::Int(1), Value::from("a")]);
        assert!(call_pos("sorted", vec![mixed]).is_err());
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(
            call_pos("split", vec![Value::from("a,b"), Value::from(",")]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            call_pos("join", vec![Value::from(", "), ints(&[1, 2])]).unwrap(),
            Value::from("1, 2")
        );
        assert_eq!(
            call_pos("join", vec![Value::List(vec![Value::from("x"), Value::from("y")]), Value::from("-")]).unwrap(),
            Value::from("x-y")
        );
        assert_eq!(
            call_pos("lines", vec![Value::from("a\nb\n")]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            call_pos("replace", vec![Value::from("aXa"), Value::from("X"), Value::from("-")]).unwrap(),
            Value::from("a-a")
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call_pos("int", vec![Value::from(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(call_pos("int", vec![Value::Float(3.9)]).unwrap(), Value::Int(3));
        assert!(call_pos("int", vec![Value::from("x")]).is_err());
        assert_eq!(call_pos("str", vec![Value::Float(2.0)]).unwrap(), Value::from("2.0"));
        assert_eq!(call_pos("type", vec![ints(&[])]).unwrap(), Value::from("list"));
    }

    #[test]
    fn test_json_helpers() {
        let parsed = call_pos("parse_json", vec![Value::from(r#"{"a": [1, 2]}"#)]).unwrap();
        assert_eq!(
            call_pos("to_json", vec![parsed]).unwrap(),
            Value::from(r#"{"a":[1,2]}"#)
        );
        assert!(call_pos("parse_json", vec![Value::from("{")]).is_err());
    }

    #[test]
    fn test_get_with_default() {
        let m = map_of(vec![("a", Value::Int(1))]);
        assert_eq!(
            call_pos("get", vec![m.clone(), Value::from("a")]).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            call_pos("get", vec![m, Value::from("b"), Value::Int(0)]).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            call_pos("get", vec![ints(&[1, 2]), Value::Int(-1)]).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
