//! Script parser
//!
//! Turns the pest parse tree of `script.pest` into a small AST. Keyword
//! tokens are dropped while building; everything else maps one rule to one
//! node.

use pest::iterators::{Pair, Pairs};
use pest::Parser;

use super::value::Value;
use super::ScriptError;

#[derive(pest_derive::Parser)]
#[grammar = "sandbox/script.pest"]
struct ScriptParser;

/// A statement
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let x = e` and `x = e`, `x[i] = e`
    Assign(Target, Expr),
    /// `if c { } else if c { } else { }`
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    /// `for x in e { }`, `for k, v in e { }`
    For {
        vars: Vec<String>,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Expr(Expr),
}

/// Left-hand side of an assignment
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub path: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// A call argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
}

/// An expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Var(String),
    Call {
        name: String,
        args: Vec<Arg>,
    },
    /// `recv.name(args)`, sugar for `name(recv, args)`
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Arg>,
    },
    /// `spawn cap(args)`
    Spawn {
        name: String,
        args: Vec<Arg>,
    },
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// Parse a whole script
pub fn parse_script(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut pairs = ScriptParser::parse(Rule::program, source)
        .map_err(|e| ScriptError::Parse(e.to_string()))?;
    let program = pairs
        .next()
        .ok_or_else(|| ScriptError::Parse("empty parse tree".to_string()))?;
    build_block(program.into_inner())
}

fn is_token(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::let_kw
            | Rule::if_kw
            | Rule::else_kw
            | Rule::for_kw
            | Rule::in_kw
            | Rule::return_kw
            | Rule::spawn_kw
            | Rule::EOI
    )
}

/// Inner pairs minus keyword tokens
fn significant<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_token(p.as_rule()))
}

fn missing(what: &str) -> ScriptError {
    ScriptError::Parse(format!("malformed script: missing {}", what))
}

fn next<'a>(
    iter: &mut impl Iterator<Item = Pair<'a, Rule>>,
    what: &str,
) -> Result<Pair<'a, Rule>, ScriptError> {
    iter.next().ok_or_else(|| missing(what))
}

fn build_block(pairs: Pairs<Rule>) -> Result<Vec<Stmt>, ScriptError> {
    pairs
        .filter(|p| !is_token(p.as_rule()))
        .map(build_stmt)
        .collect()
}

fn build_stmt(pair: Pair<Rule>) -> Result<Stmt, ScriptError> {
    match pair.as_rule() {
        Rule::let_stmt => {
            let mut inner = significant(pair);
            let name = next(&mut inner, "binding name")?.as_str().to_string();
            let value = build_expr(next(&mut inner, "value")?)?;
            Ok(Stmt::Assign(
                Target {
                    name,
                    path: Vec::new(),
                },
                value,
            ))
        }
        Rule::assign_stmt => {
            let mut inner = significant(pair);
            let target = next(&mut inner, "assignment target")?;
            let value = build_expr(next(&mut inner, "value")?)?;
            let mut parts = target.into_inner();
            let name = next(&mut parts, "target name")?.as_str().to_string();
            let path = parts.map(build_expr).collect::<Result<_, _>>()?;
            Ok(Stmt::Assign(Target { name, path }, value))
        }
        Rule::if_stmt => build_if(pair),
        Rule::for_stmt => {
            let mut vars = Vec::new();
            let mut iter = None;
            let mut body = None;
            for p in significant(pair) {
                match p.as_rule() {
                    Rule::ident => vars.push(p.as_str().to_string()),
                    Rule::expr => iter = Some(build_expr(p)?),
                    Rule::block => body = Some(build_block(p.into_inner())?),
                    _ => {}
                }
            }
            Ok(Stmt::For {
                vars,
                iter: iter.ok_or_else(|| missing("loop iterable"))?,
                body: body.ok_or_else(|| missing("loop body"))?,
            })
        }
        Rule::return_stmt => {
            let value = significant(pair).next().map(build_expr).transpose()?;
            Ok(Stmt::Return(value))
        }
        Rule::expr_stmt => {
            let mut inner = significant(pair);
            Ok(Stmt::Expr(build_expr(next(&mut inner, "expression")?)?))
        }
        rule => Err(ScriptError::Parse(format!("unexpected statement {:?}", rule))),
    }
}

fn build_if(pair: Pair<Rule>) -> Result<Stmt, ScriptError> {
    let mut inner = significant(pair);
    let cond = build_expr(next(&mut inner, "condition")?)?;
    let then = build_block(next(&mut inner, "block")?.into_inner())?;
    let mut branches = vec![(cond, then)];
    let mut otherwise = None;

    if let Some(rest) = inner.next() {
        match rest.as_rule() {
            Rule::block => otherwise = Some(build_block(rest.into_inner())?),
            Rule::if_stmt => {
                if let Stmt::If {
                    branches: more,
                    otherwise: tail,
                } = build_if(rest)?
                {
                    branches.extend(more);
                    otherwise = tail;
                }
            }
            rule => return Err(ScriptError::Parse(format!("unexpected {:?} after if", rule))),
        }
    }
    Ok(Stmt::If {
        branches,
        otherwise,
    })
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, ScriptError> {
    match pair.as_rule() {
        Rule::expr => {
            let mut inner = pair.into_inner();
            build_expr(next(&mut inner, "expression")?)
        }
        Rule::or_expr => fold_logic(pair, Expr::Or),
        Rule::and_expr => fold_logic(pair, Expr::And),
        Rule::not_expr => {
            let mut nots = 0;
            let mut operand = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::not_op => nots += 1,
                    _ => operand = Some(build_expr(p)?),
                }
            }
            let mut expr = operand.ok_or_else(|| missing("operand of not"))?;
            for _ in 0..nots {
                expr = Expr::Not(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::cmp_expr | Rule::sum | Rule::product => fold_binary(pair),
        Rule::unary => {
            let mut negs = 0;
            let mut operand = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::neg_op => negs += 1,
                    Rule::await_op => {}
                    _ => operand = Some(build_expr(p)?),
                }
            }
            let mut expr = operand.ok_or_else(|| missing("operand"))?;
            for _ in 0..negs {
                expr = Expr::Neg(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::postfix => build_postfix(pair),
        Rule::spawn => {
            let call = significant(pair).next().ok_or_else(|| missing("spawned call"))?;
            let (name, args) = build_call(call)?;
            Ok(Expr::Spawn { name, args })
        }
        Rule::call => {
            let (name, args) = build_call(pair)?;
            Ok(Expr::Call { name, args })
        }
        Rule::list => Ok(Expr::List(
            pair.into_inner().map(build_expr).collect::<Result<_, _>>()?,
        )),
        Rule::map => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut inner = entry.into_inner();
                let key = next(&mut inner, "map key")?;
                let key = match key.as_rule() {
                    Rule::string => string_literal(key)?,
                    _ => key.as_str().to_string(),
                };
                entries.push((key, build_expr(next(&mut inner, "map value")?)?));
            }
            Ok(Expr::Map(entries))
        }
        Rule::ident => Ok(Expr::Var(pair.as_str().to_string())),
        Rule::int => pair
            .as_str()
            .parse::<i64>()
            .map(|n| Expr::Literal(Value::Int(n)))
            .map_err(|_| ScriptError::Parse(format!("integer out of range: {}", pair.as_str()))),
        Rule::float => pair
            .as_str()
            .parse::<f64>()
            .map(|f| Expr::Literal(Value::Float(f)))
            .map_err(|_| ScriptError::Parse(format!("invalid number: {}", pair.as_str()))),
        Rule::boolean => Ok(Expr::Literal(Value::Bool(matches!(
            pair.as_str(),
            "true" | "True"
        )))),
        Rule::null => Ok(Expr::Literal(Value::Null)),
        Rule::string => Ok(Expr::Literal(Value::Str(string_literal(pair)?))),
        rule => Err(ScriptError::Parse(format!("unexpected expression {:?}", rule))),
    }
}

fn fold_logic(
    pair: Pair<Rule>,
    combine: fn(Box<Expr>, Box<Expr>) -> Expr,
) -> Result<Expr, ScriptError> {
    let mut operands = pair
        .into_inner()
        .filter(|p| !matches!(p.as_rule(), Rule::or_op | Rule::and_op));
    let mut expr = build_expr(next(&mut operands, "operand")?)?;
    for rhs in operands {
        expr = combine(Box::new(expr), Box::new(build_expr(rhs)?));
    }
    Ok(expr)
}

fn fold_binary(pair: Pair<Rule>) -> Result<Expr, ScriptError> {
    let mut inner = pair.into_inner();
    let mut expr = build_expr(next(&mut inner, "operand")?)?;
    while let Some(op) = inner.next() {
        let op = bin_op(op.as_str())?;
        let rhs = build_expr(next(&mut inner, "right operand")?)?;
        expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
    }
    Ok(expr)
}

fn bin_op(text: &str) -> Result<BinOp, ScriptError> {
    Ok(match text {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "in" => BinOp::In,
        t if t.starts_with("not") => BinOp::NotIn,
        t => return Err(ScriptError::Parse(format!("unknown operator '{}'", t))),
    })
}

fn build_postfix(pair: Pair<Rule>) -> Result<Expr, ScriptError> {
    let mut inner = pair.into_inner();
    let mut expr = build_expr(next(&mut inner, "operand")?)?;
    for op in inner {
        expr = match op.as_rule() {
            Rule::field => {
                let mut parts = op.into_inner();
                let name = next(&mut parts, "field name")?.as_str().to_string();
                Expr::Field(Box::new(expr), name)
            }
            Rule::method => {
                let mut parts = op.into_inner();
                let name = next(&mut parts, "method name")?.as_str().to_string();
                let args = build_args(next(&mut parts, "arguments")?)?;
                Expr::Method {
                    receiver: Box::new(expr),
                    name,
                    args,
                }
            }
            Rule::index => {
                let mut parts = op.into_inner();
                let subject = next(&mut parts, "index")?;
                if subject.as_rule() == Rule::slice {
                    let mut start = None;
                    let mut end = None;
                    for bound in subject.into_inner() {
                        let is_start = bound.as_rule() == Rule::slice_start;
                        let mut b = bound.into_inner();
                        let value = Some(Box::new(build_expr(next(&mut b, "slice bound")?)?));
                        if is_start {
                            start = value;
                        } else {
                            end = value;
                        }
                    }
                    Expr::Slice(Box::new(expr), start, end)
                } else {
                    Expr::Index(Box::new(expr), Box::new(build_expr(subject)?))
                }
            }
            rule => return Err(ScriptError::Parse(format!("unexpected postfix {:?}", rule))),
        };
    }
    Ok(expr)
}

fn build_call(pair: Pair<Rule>) -> Result<(String, Vec<Arg>), ScriptError> {
    let mut inner = pair.into_inner();
    let name = next(&mut inner, "function name")?.as_str().to_string();
    let args = build_args(next(&mut inner, "arguments")?)?;
    Ok((name, args))
}

fn build_args(pair: Pair<Rule>) -> Result<Vec<Arg>, ScriptError> {
    pair.into_inner()
        .map(|arg| {
            let mut inner = arg.into_inner();
            let arg = next(&mut inner, "argument")?;
            if arg.as_rule() == Rule::kwarg {
                let mut kv = arg.into_inner();
                let key = next(&mut kv, "keyword")?.as_str().to_string();
                let value = build_expr(next(&mut kv, "keyword value")?)?;
                Ok(Arg::Keyword(key, value))
            } else {
                Ok(Arg::Positional(build_expr(arg)?))
            }
        })
        .collect()
}

fn string_literal(pair: Pair<Rule>) -> Result<String, ScriptError> {
    let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
    unescape(raw)
}

/// Resolve backslash escapes; unknown escapes are kept verbatim
fn unescape(raw: &str) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let ch = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ScriptError::Parse(format!("invalid escape \\u{}", hex)))?;
                out.push(ch);
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}
