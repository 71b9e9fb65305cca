//! Atomic program types
//!
//! An atomic request carries a small linear program: an array of
//! instructions the server executes in order within one request context.
//!
//! # Wire Format
//!
//! Each instruction is a JSON-like array in one of five shapes:
//!
//! ```text
//! [route, constant]                  call route with a literal argument
//! [route, constant, assignment]      call and bind the result
//! [operation, route]                 call route with a variable
//! [operation, route, assignment]     call and bind the result
//! [[variable, constant]]             set a variable, no call
//! ```
//!
//! An operation is either `[variable]` (fetch) or a gated comparison
//! `[forward, variable, constant, operator, pluck?]`. An assignment is a
//! bare variable name or `[variable, pluckPath]`.
//!
//! The types here are the already-validated form. Parsing untrusted arrays
//! into them happens in the server's validator, which checks routes and
//! variable ordering against the route tree.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// Comparison operator of a maths gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `=` (loose equality)
    Eq,
    /// `!` (loose inequality)
    Ne,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Gte),
            "=" => Some(Operator::Eq),
            "!" => Some(Operator::Ne),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Eq => "=",
            Operator::Ne => "!",
        }
    }
}

/// The value a passing maths gate forwards as the call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A previously assigned variable
    Variable(String),
    /// A literal, written `[constant]` on the wire
    Constant(Value),
}

impl Operand {
    fn to_wire(&self) -> Value {
        match self {
            Operand::Variable(name) => Value::String(name.clone()),
            Operand::Constant(value) => Value::Array(vec![value.clone()]),
        }
    }
}

/// The argument source of a call instruction that reads variables.
#[derive(Debug, Clone, PartialEq)]
pub enum NonSetOperation {
    /// `[variable]`: pass the variable's value as the argument
    Fetch(String),
    /// `[forward, variable, constant, operator, pluck?]`: compare `variable`
    /// (optionally plucked) against `constant`; on success call the route
    /// with `forward`, otherwise skip it
    Maths {
        forward: Operand,
        variable: String,
        constant: Value,
        operator: Operator,
        pluck: Option<Vec<String>>,
    },
}

impl NonSetOperation {
    fn to_wire(&self) -> Value {
        match self {
            NonSetOperation::Fetch(name) => json!([name]),
            NonSetOperation::Maths {
                forward,
                variable,
                constant,
                operator,
                pluck,
            } => {
                let mut parts = vec![
                    forward.to_wire(),
                    Value::String(variable.clone()),
                    constant.clone(),
                    Value::String(operator.as_str().to_string()),
                ];
                if let Some(path) = pluck {
                    parts.push(json!(path));
                }
                Value::Array(parts)
            }
        }
    }
}

/// Where a call result is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// Store the whole result
    Variable(String),
    /// Store the field reached by walking `path` into the result
    Pluck { variable: String, path: Vec<String> },
}

impl Assignment {
    pub fn pluck<I, S>(variable: impl Into<String>, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Assignment::Pluck {
            variable: variable.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the name of the variable this assignment writes.
    pub fn variable(&self) -> &str {
        match self {
            Assignment::Variable(name) | Assignment::Pluck { variable: name, .. } => name,
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            Assignment::Variable(name) => Value::String(name.clone()),
            Assignment::Pluck { variable, path } => json!([variable, path]),
        }
    }
}

impl From<&str> for Assignment {
    fn from(name: &str) -> Self {
        Assignment::Variable(name.to_string())
    }
}

/// One validated instruction of an atomic program.
///
/// # Example
///
/// ```
/// use arpc_common::protocol::{AtomicItem, Assignment};
/// use serde_json::json;
///
/// let program = vec![
///     AtomicItem::call("echo.string", json!("hello")).assign(Assignment::from("result")),
///     AtomicItem::fetch("result", "echo.string"),
/// ];
/// let wire = serde_json::to_value(&program).unwrap();
/// assert_eq!(wire, json!([["echo.string", "hello", "result"], [["result"], "echo.string"]]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicItem {
    /// `[route, constant, assignment?]`
    Call {
        route: String,
        constant: Value,
        assignment: Option<Assignment>,
    },
    /// `[operation, route, assignment?]`
    Operation {
        operation: NonSetOperation,
        route: String,
        assignment: Option<Assignment>,
    },
    /// `[[variable, constant]]`
    Set { variable: String, constant: Value },
}

impl AtomicItem {
    pub fn call(route: impl Into<String>, constant: Value) -> Self {
        AtomicItem::Call {
            route: route.into(),
            constant,
            assignment: None,
        }
    }

    pub fn fetch(variable: impl Into<String>, route: impl Into<String>) -> Self {
        AtomicItem::Operation {
            operation: NonSetOperation::Fetch(variable.into()),
            route: route.into(),
            assignment: None,
        }
    }

    pub fn gated(operation: NonSetOperation, route: impl Into<String>) -> Self {
        AtomicItem::Operation {
            operation,
            route: route.into(),
            assignment: None,
        }
    }

    pub fn set(variable: impl Into<String>, constant: Value) -> Self {
        AtomicItem::Set {
            variable: variable.into(),
            constant,
        }
    }

    /// Binds the result of a call instruction. Has no effect on `Set`.
    pub fn assign(mut self, target: Assignment) -> Self {
        match &mut self {
            AtomicItem::Call { assignment, .. } | AtomicItem::Operation { assignment, .. } => {
                *assignment = Some(target);
            }
            AtomicItem::Set { .. } => {}
        }
        self
    }

    /// Returns the route this instruction calls, if any.
    pub fn route(&self) -> Option<&str> {
        match self {
            AtomicItem::Call { route, .. } | AtomicItem::Operation { route, .. } => Some(route),
            AtomicItem::Set { .. } => None,
        }
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            AtomicItem::Call { assignment, .. } | AtomicItem::Operation { assignment, .. } => {
                assignment.as_ref()
            }
            AtomicItem::Set { .. } => None,
        }
    }

    /// Renders the instruction in its wire array form.
    pub fn to_wire(&self) -> Value {
        match self {
            AtomicItem::Call {
                route,
                constant,
                assignment,
            } => {
                let mut parts = vec![Value::String(route.clone()), constant.clone()];
                if let Some(a) = assignment {
                    parts.push(a.to_wire());
                }
                Value::Array(parts)
            }
            AtomicItem::Operation {
                operation,
                route,
                assignment,
            } => {
                let mut parts = vec![operation.to_wire(), Value::String(route.clone())];
                if let Some(a) = assignment {
                    parts.push(a.to_wire());
                }
                Value::Array(parts)
            }
            AtomicItem::Set { variable, constant } => json!([[variable, constant]]),
        }
    }
}

impl Serialize for AtomicItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}
