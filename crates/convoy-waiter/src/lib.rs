//! convoy-waiter — the long-poll primitive every engine waits on.
//!
//! A [`Waiter`] sleeps a fixed interval, probes a remote resource, logs
//! what it saw, and then either returns (terminal), raises (failure), or
//! loops until its poll budget runs out. Only the probe and the two
//! predicates vary between uses: stack convergence, autoscaling
//! capacity, instance registration, drain completion, and service
//! stabilization all share the same loop.
//!
//! # Components
//!
//! - **`waiter`** — the polling loop and its shutdown handling
//! - **`progress`** — one-line status summaries used in poll logs
//! - **`stack`** — stack convergence and deletion probes

pub mod progress;
pub mod stack;
pub mod waiter;

pub use progress::Progress;
pub use stack::{wait_for_stack, wait_for_stack_deletion};
pub use waiter::Waiter;
