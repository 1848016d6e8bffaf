//! Error types for signature compilation and buffer access.

use std::error::Error;
use std::fmt;
use std::io;

/// Failure to compile a signature into matchable state.
#[derive(Debug)]
#[non_exhaustive]
pub enum SignatureError {
    /// A segment contained no frames.
    ZeroLengthSegment { signature: usize, segment: usize },
    /// A variable-offset segment could not be flattened into sequences and
    /// has no BOF/EOF anchor to fall back on.
    Unanchored { signature: usize, segment: usize },
    /// One or more signatures in a batch failed to compile.
    Batch(Vec<SignatureError>),
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::ZeroLengthSegment { signature, segment } => write!(
                f,
                "zero length segment: signature {signature}, segment {segment}"
            ),
            SignatureError::Unanchored { signature, segment } => write!(
                f,
                "variable offset segment that can't be turned into a sequence: signature {signature}, segment {segment}"
            ),
            SignatureError::Batch(errs) => {
                write!(f, "signature errors:")?;
                for e in errs {
                    write!(f, " {e};")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for SignatureError {}

/// Failure while reading from a [`Buffer`](crate::buffer::Buffer).
#[derive(Debug)]
#[non_exhaustive]
pub enum BufferError {
    /// The source had no bytes at all.
    Empty,
    /// The quit flag was raised while a blocking read was in progress.
    Quit,
    /// An error from the underlying reader or file.
    Io(io::Error),
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Empty => write!(f, "empty source"),
            BufferError::Quit => write!(f, "quit raised while awaiting data"),
            BufferError::Io(e) => write!(f, "read failed: {e}"),
        }
    }
}

impl Error for BufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BufferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BufferError {
    fn from(e: io::Error) -> Self {
        BufferError::Io(e)
    }
}
