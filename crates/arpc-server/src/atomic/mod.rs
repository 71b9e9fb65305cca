//! Atomic programs
//!
//! An atomic request carries an array of instructions instead of a single
//! argument. The whole array runs in one request context, so every call
//! shares one ledger: either all of its commit callbacks run, or (when any
//! call fails) all of its rollback callbacks run.
//!
//! # Instructions
//!
//! | Wire form | Meaning |
//! |-----------|---------|
//! | `[route, constant]` | call `route` with `constant` |
//! | `[route, constant, assignment]` | same, storing the result |
//! | `[[var], route, assignment?]` | call `route` with the value of `var` |
//! | `[[fwd, var, constant, op, pluck?], route, assignment?]` | call `route` with `fwd` if `var op constant` holds, otherwise skip it |
//! | `[[var, constant]]` | set `var` to `constant` |
//!
//! An assignment is a variable name or `[name, path]`, where `path` selects a
//! field of the result. `fwd` is a variable name or a constant wrapped as
//! `[constant]`.
//!
//! # Modules
//!
//! - [`validator`]: parses untrusted instruction arrays into [`AtomicProgram`]s
//! - [`executor`]: runs a validated program in flush groups
//! - [`compare`]: the comparison used by gated calls
//! - [`pluck`]: field selection for assignments and gates

pub mod compare;
pub mod executor;
pub mod pluck;
pub mod validator;

pub use compare::compare;
pub use executor::execute;
pub use pluck::pluck;
pub use validator::{validate, AtomicProgram, ValidationError};
