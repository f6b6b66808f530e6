//! Core of periodize: the plan lifecycle, generation dispatch and workers,
//! and payment reconciliation.

pub mod caller;
pub mod discipline;
pub mod dispatcher;
pub mod error;
pub mod payment;
pub mod plan;
pub mod renderer;
pub mod state;
pub mod storage;
pub mod worker;

pub use caller::{Caller, Role};
pub use error::ServiceError;
