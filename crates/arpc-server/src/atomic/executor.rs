//! Atomic program execution
//!
//! Calls are queued and run in flush groups. A flush polls every queued call
//! concurrently on the request's task and waits for all of them, so the
//! request context follows each call.
//!
//! # Flush rules
//!
//! - A non-parallel route flushes the queue before it is queued, and runs
//!   alone
//! - A call with an assignment flushes right after it is queued, so the
//!   variable is set before the next instruction reads it
//! - Parallel routes without an assignment accumulate
//! - A set instruction flushes, then assigns
//! - A gate that does not hold flushes, then records `null` for its slot
//! - The program ends with a final flush
//!
//! When any member of a flush fails, execution stops and the failures of
//! that flush are returned. Results of the members that succeeded are
//! discarded.

use std::collections::HashMap;

use arpc_common::{Assignment, AtomicItem, NonSetOperation, Operand, RpcError};
use futures::future::join_all;
use serde_json::Value;

use super::compare::compare;
use super::pluck::pluck;
use super::validator::AtomicProgram;
use crate::dispatcher::invoke;
use crate::exceptions::Failure;
use crate::routes::SharedHandler;
use crate::schema::ApiSchema;

/// Runs a validated program.
///
/// Returns `null` when every slot is `null`, otherwise the array of slot
/// results in instruction order. Set instructions and skipped calls yield a
/// `null` slot.
///
/// # Errors
///
/// The failed members of the first failing flush, or a single `INVALID_PLUCK`
/// failure when an assignment or gate cannot pluck its path.
pub async fn execute<U>(
    schema: &ApiSchema<U>,
    program: AtomicProgram<U>,
    user: Option<U>,
) -> Result<Value, Vec<Failure>>
where
    U: Clone + Send + Sync + 'static,
{
    let AtomicProgram { items, handlers } = program;

    let mut run = Run {
        schema,
        handlers,
        user,
        variables: HashMap::new(),
        results: vec![Value::Null; items.len()],
        queue: Vec::new(),
    };

    for (slot, item) in items.into_iter().enumerate() {
        match item {
            AtomicItem::Set { variable, constant } => {
                run.flush().await?;
                run.variables.insert(variable, constant);
            }
            AtomicItem::Call {
                route,
                constant,
                assignment,
            } => run.queue_call(slot, route, constant, assignment).await?,
            AtomicItem::Operation {
                operation,
                route,
                assignment,
            } => match run.argument(&operation)? {
                Some(arg) => run.queue_call(slot, route, arg, assignment).await?,
                None => {
                    tracing::debug!("Skipping {} at slot {}: gate did not hold", route, slot);
                    run.flush().await?;
                }
            },
        }
    }
    run.flush().await?;

    if run.results.iter().all(Value::is_null) {
        Ok(Value::Null)
    } else {
        Ok(Value::Array(run.results))
    }
}

struct Pending<U> {
    slot: usize,
    route: String,
    handler: SharedHandler<U>,
    arg: Value,
    assignment: Option<Assignment>,
}

struct Run<'a, U> {
    schema: &'a ApiSchema<U>,
    handlers: HashMap<String, SharedHandler<U>>,
    user: Option<U>,
    variables: HashMap<String, Value>,
    results: Vec<Value>,
    queue: Vec<Pending<U>>,
}

impl<U> Run<'_, U>
where
    U: Clone + Send + Sync + 'static,
{
    fn variable(&self, name: &str) -> Value {
        self.variables.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Resolves the argument of an operation, or `None` if its gate is closed.
    fn argument(&self, operation: &NonSetOperation) -> Result<Option<Value>, Vec<Failure>> {
        match operation {
            NonSetOperation::Fetch(name) => Ok(Some(self.variable(name))),
            NonSetOperation::Maths {
                forward,
                variable,
                constant,
                operator,
                pluck: path,
            } => {
                let mut compared = self.variable(variable);
                if let Some(path) = path {
                    compared = pluck(&compared, path).map_err(single)?;
                }

                if !compare(&compared, *operator, constant) {
                    return Ok(None);
                }

                Ok(Some(match forward {
                    Operand::Variable(name) => self.variable(name),
                    Operand::Constant(value) => value.clone(),
                }))
            }
        }
    }

    async fn queue_call(
        &mut self,
        slot: usize,
        route: String,
        arg: Value,
        assignment: Option<Assignment>,
    ) -> Result<(), Vec<Failure>> {
        let handler = match self.handlers.get(&route) {
            Some(handler) => handler.clone(),
            None => {
                tracing::error!("Validated program calls unresolved route {}", route);
                return Err(single(RpcError::internal()));
            }
        };

        let parallel = handler.flags().parallel;
        if !parallel {
            self.flush().await?;
        }

        let flush_after = !parallel || assignment.is_some();
        self.queue.push(Pending {
            slot,
            route,
            handler,
            arg,
            assignment,
        });

        if flush_after {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Vec<Failure>> {
        if self.queue.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.queue);
        tracing::debug!("Flushing {} queued calls", pending.len());

        let schema = self.schema;
        let outcomes = join_all(pending.iter().map(|call| {
            invoke(
                schema,
                &call.route,
                call.handler.as_ref(),
                call.arg.clone(),
                self.user.clone(),
            )
        }))
        .await;

        let mut failures = Vec::new();
        let mut values = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(value) => values.push(value),
                Err(failure) => failures.push(failure),
            }
        }
        if !failures.is_empty() {
            return Err(failures);
        }

        for (call, value) in pending.into_iter().zip(values) {
            match call.assignment {
                Some(Assignment::Variable(name)) => {
                    self.variables.insert(name, value.clone());
                }
                Some(Assignment::Pluck { variable, path }) => {
                    let plucked = pluck(&value, &path).map_err(single)?;
                    self.variables.insert(variable, plucked);
                }
                None => {}
            }
            self.results[call.slot] = value;
        }
        Ok(())
    }
}

fn single(err: RpcError) -> Vec<Failure> {
    vec![Failure::from(err)]
}
