//! Play-history synchronization core.
//!
//! # Architecture
//!
//! * [`domain`]: records, identity keys and session tokens. No I/O.
//! * [`store`]: the two durable files (token, history) with crash-atomic writes.
//! * [`source`]: the remote side, behind the [`source::RecordSource`] trait.
//! * [`engine`]: one fetch -> validate -> merge -> rotate cycle.
//! * [`runtime`]: one-shot and interval scheduling with backoff and shutdown.

pub mod domain;
pub mod engine;
pub mod runtime;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
