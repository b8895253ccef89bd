//! The worker node: lifecycle state machine plus the request dispatcher
//! it serves clients with.
//!
//! # Flow
//!
//! 1. [`WorkerNode`] registers with the master (`REQUEST_CLIENT`)
//! 2. Waits for a `PAIR_INFO` assignment
//! 3. Dials the client and serves its line dialogue through [`Dispatcher`]
//! 4. Returns to the master pool when the client disconnects

pub mod dispatcher;
pub mod node;
pub mod state;
pub mod suggest;

pub use dispatcher::{Dispatcher, Outcome, Request};
pub use node::WorkerNode;
pub use state::ConnectState;
