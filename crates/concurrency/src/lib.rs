//! Concurrency layer for Tessera
//!
//! This crate holds the shared state committing threads meet on:
//! - OutOfOrderSequence: gap-free watermark over out-of-order completions
//! - SequencingTransactionIdStore: commit ids plus committed/closed watermarks
//! - TransactionCommitment: publishes one transaction's committed and closed facts
//! - TransactionGate: quiescence gate in front of transaction starts
//! - InnerTransactionHandler: race-free termination of inner transactions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commitment;
pub mod gate;
pub mod id_store;
pub mod inner;
pub mod sequence;

pub use commitment::TransactionCommitment;
pub use gate::{GatePass, TransactionGate};
pub use id_store::SequencingTransactionIdStore;
pub use inner::{InnerTransactionHandler, TransactionTerminator};
pub use sequence::{OutOfOrderSequence, SequenceSnapshot, DEFAULT_CAPACITY};
