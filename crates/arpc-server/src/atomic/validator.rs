//! Atomic program validation
//!
//! [`validate`] turns an untrusted instruction array into an
//! [`AtomicProgram`]: the typed instructions plus the handler for every route
//! they call. Validation stops at the first problem and reports it with a
//! code. Nothing runs until the whole array has been accepted.
//!
//! A variable may only be read by an instruction that comes strictly after
//! the instruction assigning it. Assigning the result of a call to a variable
//! that the same call reads is therefore rejected.
//!
//! # Example
//!
//! ```
//! use arpc_server::atomic::validate;
//! use arpc_server::{Route, RouteTree};
//! use serde_json::json;
//!
//! async fn echo(input: String, _user: Option<()>) -> anyhow::Result<String> {
//!     Ok(input)
//! }
//!
//! let tree = RouteTree::new().route("echo.string", Route::new(echo));
//!
//! let program = validate(
//!     &json!([["echo.string", "hello", "result"], [["result"], "echo.string"]]),
//!     &tree,
//! )
//! .unwrap();
//! assert_eq!(program.items.len(), 2);
//!
//! let err = validate(&json!([[["result"], "echo.string"]]), &tree).unwrap_err();
//! assert_eq!(err.code, "INVALID_VARIABLE");
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use arpc_common::{codes, Assignment, AtomicItem, NonSetOperation, Operand, Operator, RpcError};
use serde_json::Value;
use thiserror::Error;

use super::pluck::FORBIDDEN_SEGMENT;
use crate::routes::{find_route, RouteTree, SharedHandler};

/// The first problem found in an instruction array.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn into_rpc_error(self) -> RpcError {
        RpcError::bad_request(self.code, self.message)
    }
}

impl From<ValidationError> for RpcError {
    fn from(err: ValidationError) -> Self {
        err.into_rpc_error()
    }
}

/// A validated instruction array.
pub struct AtomicProgram<U> {
    pub items: Vec<AtomicItem>,
    /// Handler for every route the program calls
    pub handlers: HashMap<String, SharedHandler<U>>,
}

impl<U> AtomicProgram<U> {
    /// Renders the program back into its wire form.
    pub fn to_wire(&self) -> Value {
        Value::Array(self.items.iter().map(AtomicItem::to_wire).collect())
    }
}

impl<U> fmt::Debug for AtomicProgram<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<&String> = self.handlers.keys().collect();
        routes.sort();
        f.debug_struct("AtomicProgram")
            .field("items", &self.items)
            .field("routes", &routes)
            .finish()
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

/// Validates an instruction array against a route tree.
pub fn validate<U>(raw: &Value, tree: &RouteTree<U>) -> Result<AtomicProgram<U>> {
    let items = match raw {
        Value::Array(items) if !items.is_empty() => items,
        Value::Array(_) => {
            return Err(ValidationError::new(codes::INVALID_ARRAY, "Atomic programs must not be empty"))
        }
        _ => return Err(ValidationError::new(codes::INVALID_ARRAY, "Atomic programs must be arrays")),
    };

    let mut validator = Validator {
        tree,
        variables: HashSet::new(),
        handlers: HashMap::new(),
    };

    let items = items
        .iter()
        .enumerate()
        .map(|(index, item)| validator.item(index, item))
        .collect::<Result<Vec<_>>>()?;

    Ok(AtomicProgram {
        items,
        handlers: validator.handlers,
    })
}

struct Validator<'a, U> {
    tree: &'a RouteTree<U>,
    variables: HashSet<String>,
    handlers: HashMap<String, SharedHandler<U>>,
}

impl<U> Validator<'_, U> {
    fn item(&mut self, index: usize, item: &Value) -> Result<AtomicItem> {
        let parts = match item {
            Value::Array(parts) => parts,
            _ => {
                return Err(ValidationError::new(
                    codes::INVALID_ITEM,
                    format!("Item {} must be an array", index),
                ))
            }
        };

        match parts.as_slice() {
            [set] => self.set(index, set),
            [Value::String(route), constant] => {
                self.route(index, route)?;
                Ok(AtomicItem::call(route.clone(), constant.clone()))
            }
            [Value::String(route), constant, assignment] => {
                self.route(index, route)?;
                let assignment = self.assignment(index, assignment)?;
                Ok(AtomicItem::call(route.clone(), constant.clone()).assign(assignment))
            }
            [Value::Array(operation), route] => {
                let operation = self.operation(index, operation)?;
                let route = self.route_value(index, route)?;
                Ok(AtomicItem::gated(operation, route))
            }
            [Value::Array(operation), route, assignment] => {
                let operation = self.operation(index, operation)?;
                let route = self.route_value(index, route)?;
                let assignment = self.assignment(index, assignment)?;
                Ok(AtomicItem::gated(operation, route).assign(assignment))
            }
            _ => Err(ValidationError::new(
                codes::INVALID_ITEM,
                format!("Item {} is not a valid instruction", index),
            )),
        }
    }

    fn set(&mut self, index: usize, set: &Value) -> Result<AtomicItem> {
        match set {
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(name), constant] if !name.is_empty() => {
                    self.variables.insert(name.clone());
                    Ok(AtomicItem::set(name.clone(), constant.clone()))
                }
                _ => Err(ValidationError::new(
                    codes::INVALID_SET_OPERATION,
                    format!("Item {} must be [[variable, constant]]", index),
                )),
            },
            _ => Err(ValidationError::new(
                codes::INVALID_SET_OPERATION,
                format!("Item {} must be [[variable, constant]]", index),
            )),
        }
    }

    fn route_value(&mut self, index: usize, route: &Value) -> Result<String> {
        match route {
            Value::String(route) => {
                self.route(index, route)?;
                Ok(route.clone())
            }
            _ => Err(ValidationError::new(
                codes::INVALID_ROUTE,
                format!("Item {} must name its route with a string", index),
            )),
        }
    }

    fn route(&mut self, index: usize, route: &str) -> Result<()> {
        if self.handlers.contains_key(route) {
            return Ok(());
        }
        match find_route(route, self.tree) {
            Some(handler) => {
                self.handlers.insert(route.to_string(), handler.clone());
                Ok(())
            }
            None => Err(ValidationError::new(
                codes::INVALID_ROUTE,
                format!("Item {} calls unknown route '{}'", index, route),
            )),
        }
    }

    fn known_variable(&self, index: usize, value: &Value) -> Result<String> {
        match value {
            Value::String(name) if self.variables.contains(name) => Ok(name.clone()),
            Value::String(name) => Err(ValidationError::new(
                codes::INVALID_VARIABLE,
                format!("Item {} reads '{}' before it is assigned", index, name),
            )),
            _ => Err(ValidationError::new(
                codes::INVALID_VARIABLE,
                format!("Item {} must name variables with strings", index),
            )),
        }
    }

    fn operation(&self, index: usize, operation: &[Value]) -> Result<NonSetOperation> {
        match operation {
            [variable] => Ok(NonSetOperation::Fetch(self.known_variable(index, variable)?)),
            [forward, variable, constant, operator] => {
                self.maths(index, forward, variable, constant, operator, None)
            }
            [forward, variable, constant, operator, pluck] => {
                self.maths(index, forward, variable, constant, operator, Some(pluck))
            }
            _ => Err(ValidationError::new(
                codes::INVALID_OPERATION,
                format!("Item {} has an operation of {} elements", index, operation.len()),
            )),
        }
    }

    fn maths(
        &self,
        index: usize,
        forward: &Value,
        variable: &Value,
        constant: &Value,
        operator: &Value,
        pluck: Option<&Value>,
    ) -> Result<NonSetOperation> {
        let forward = match forward {
            Value::String(_) => Operand::Variable(self.known_variable(index, forward)?),
            Value::Array(wrapped) if wrapped.len() == 1 => Operand::Constant(wrapped[0].clone()),
            _ => {
                return Err(ValidationError::new(
                    codes::INVALID_MATHS_OPERATION,
                    format!(
                        "Item {} must forward a variable name or a [constant] wrapper",
                        index
                    ),
                ))
            }
        };

        let variable = self.known_variable(index, variable)?;

        let operator = match operator {
            Value::String(op) => Operator::parse(op),
            _ => None,
        }
        .ok_or_else(|| {
            ValidationError::new(
                codes::INVALID_MATHS_OPERATION,
                format!("Item {} has an unknown operator {}", index, operator),
            )
        })?;

        let pluck = pluck.map(|path| pluck_path(index, path)).transpose()?;

        Ok(NonSetOperation::Maths {
            forward,
            variable,
            constant: constant.clone(),
            operator,
            pluck,
        })
    }

    fn assignment(&mut self, index: usize, assignment: &Value) -> Result<Assignment> {
        let assignment = match assignment {
            Value::String(name) if !name.is_empty() => Assignment::Variable(name.clone()),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(name), path] if !name.is_empty() => Assignment::Pluck {
                    variable: name.clone(),
                    path: pluck_path(index, path)?,
                },
                _ => {
                    return Err(ValidationError::new(
                        codes::INVALID_ASSIGNMENT,
                        format!("Item {} must assign to a name or [name, path]", index),
                    ))
                }
            },
            _ => {
                return Err(ValidationError::new(
                    codes::INVALID_ASSIGNMENT,
                    format!("Item {} must assign to a name or [name, path]", index),
                ))
            }
        };

        self.variables.insert(assignment.variable().to_string());
        Ok(assignment)
    }
}

fn pluck_path(index: usize, path: &Value) -> Result<Vec<String>> {
    let invalid = |reason: &str| {
        ValidationError::new(
            codes::INVALID_PLUCK,
            format!("Item {} has an invalid pluck path: {}", index, reason),
        )
    };

    let segments = match path {
        Value::Array(segments) if !segments.is_empty() => segments,
        Value::Array(_) => return Err(invalid("empty path")),
        _ => return Err(invalid("not an array")),
    };

    segments
        .iter()
        .map(|segment| match segment {
            Value::String(s) if s == FORBIDDEN_SEGMENT => Err(invalid("'constructor' cannot be plucked")),
            Value::String(s) => Ok(s.clone()),
            _ => Err(invalid("segments must be strings")),
        })
        .collect()
}
