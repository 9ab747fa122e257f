//! Ordered chunk delivery for streamed recording uploads.
//!
//! A producer assigns each chunk a zero-based, strictly increasing index and
//! keeps the payload until it is known to be applied. The consumer applies
//! chunks strictly in index order, silently drops duplicates and answers a
//! gap with a retransmission request for the missing range instead of
//! buffering out-of-order data.

#![warn(clippy::pedantic)]

pub mod chunk;
pub mod error;
pub mod producer;
pub mod reassembly;

pub use chunk::{Chunk, RetransmitRequest};
pub use error::UploadError;
pub use producer::ChunkProducer;
pub use reassembly::{Reassembler, ReassemblySummary, Received};
