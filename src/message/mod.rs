//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer: an in-process channel
//! transport and a pure-Rust TCP transport are included. The `Mailbox`
//! layers tagged, per-source ordered delivery on top of any communicator,
//! which is what halo exchange needs.
//!

mod backoff;
pub mod comm;
pub mod mailbox;
pub mod tcp;
pub mod util;
