//! Byte-signature identification engine with early exit and bounded lookahead.
//!
//! ## Scope
//! This crate compiles byte signatures (ordered frames of patterns at fixed,
//! windowed or wild offsets) into a matching engine and scans buffers against
//! them, reporting which signatures matched and the bytes that proved it.
//!
//! ## Key invariants
//! - Every signature is reduced to keyframes: the one searchable anchor per
//!   segment, with absolute position bounds that gate every raw hit.
//! - Scanning is progress-driven: once the wait set shows nothing can still
//!   match at the current offsets, the quit flag stops all readers.
//! - Hit offsets are recorded BOF-normalised, whichever direction the scan
//!   that produced them ran.
//! - Buffer slices are safe to take concurrently; blocking reads observe the
//!   quit flag.
//!
//! ## Matching flow (single buffer)
//! 1) Scan the BOF frame set over the head of the buffer.
//! 2) Run the BOF automaton forward, bounded by the largest BOF offset.
//! 3) If any signature is back-anchored, scan the EOF frame set and run the
//!    EOF automaton over a reverse iterator.
//! 4) The scorer assembles keyframe hits into signature matches, consulting
//!    priorities to stop early.
//!
//! ## Notable entry points
//! - [`Matcher`] / [`Options`]: compile signatures, scan buffers.
//! - [`Buffer`] / [`Buffers`]: attach byte sources, pool their slabs.
//! - [`Frame`], [`Pattern`], [`Signature`]: the signature algebra.
//! - [`Match`]: a successful identification with its basis.

pub mod buffer;
pub mod error;
pub mod frames;
pub mod keyframes;
pub mod matcher;
pub mod patterns;
pub mod priority;
mod scorer;
pub mod segment;
pub mod sets;
pub mod testtree;
pub mod wac;

pub use buffer::{Buffer, Buffers};
pub use error::{BufferError, SignatureError};
pub use frames::{Frame, OffType, Signature};
pub use matcher::{Matcher, Options};
pub use patterns::Pattern;
pub use scorer::Match;
