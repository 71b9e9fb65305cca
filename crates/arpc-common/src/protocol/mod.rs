pub mod atomic;
pub mod codes;
pub mod envelope;
pub mod error;
pub mod requests;
pub mod rpc_error;


pub use atomic::{Assignment, AtomicItem, NonSetOperation, Operand, Operator};
pub use envelope::{ErrorEnvelope, RpcResult};
pub use error::{ArpcError, Result};
pub use requests::{RpcQuery, ATOMIC_ROUTES};
pub use rpc_error::RpcError;
