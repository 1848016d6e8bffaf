//! Sequence and frame sets: the searchable surface of compiled signatures.
//!
//! Flattenable segments become sequences grouped into BOF and EOF sets and
//! fed to the automaton. Segments that cannot be flattened contribute their
//! anchor frame to a BOF or EOF frame set instead, scanned directly over
//! the head or tail of the buffer. Both sets deduplicate entries and map
//! each to a test tree index; for a sequence with several choice slots, the
//! slot number is added to that index.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::error::BufferError;
use crate::frames::Frame;
use crate::wac::Seq;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeqSet {
    pub set: Vec<Seq>,
    /// Test tree index for each sequence's first choice slot.
    pub test_tree_index: Vec<usize>,
}

fn choice_exists(a: &[u8], b: &[Vec<u8>]) -> bool {
    b.iter().any(|v| v.as_slice() == a)
}

fn seq_equals(a: &Seq, b: &Seq) -> bool {
    if a.max_offsets != b.max_offsets || a.choices.len() != b.choices.len() {
        return false;
    }
    for (ca, cb) in a.choices.iter().zip(&b.choices) {
        if ca.len() != cb.len() {
            return false;
        }
        if !ca.iter().all(|v| choice_exists(v, cb)) {
            return false;
        }
    }
    true
}

impl SeqSet {
    /// Adds a sequence, deduplicating. `hi` is the next free test tree
    /// index; the returned index is where hits on this sequence route.
    pub fn add(&mut self, seq: Seq, hi: usize) -> usize {
        for (i, v) in self.set.iter().enumerate() {
            if seq_equals(&seq, v) {
                return self.test_tree_index[i];
            }
        }
        self.set.push(seq);
        self.test_tree_index.push(hi);
        hi
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameSet {
    pub set: Vec<Frame>,
    pub test_tree_index: Vec<usize>,
}

/// A hit from scanning a frame set over the head or tail of a buffer.
#[derive(Clone, Copy, Debug)]
pub struct FsMatch {
    pub idx: usize,
    pub off: i64,
    pub length: usize,
}

impl FrameSet {
    pub fn add(&mut self, f: Frame, hi: usize) -> usize {
        for (i, f1) in self.set.iter().enumerate() {
            if *f1 == f {
                return self.test_tree_index[i];
            }
        }
        self.set.push(f);
        self.test_tree_index.push(hi);
        hi
    }

    /// Scans every frame in the set over the relevant end of the buffer,
    /// handing each hit to `emit`. Stops early if `emit` breaks.
    pub fn scan(
        &self,
        buf: &Buffer,
        rev: bool,
        mut emit: impl FnMut(FsMatch) -> ControlFlow<()>,
    ) -> Result<(), BufferError> {
        for (i, f) in self.set.iter().enumerate() {
            let matches = if rev {
                let (slc, _) = buf.eof_slice(0, f.total_length())?;
                f.matches_rev(&slc)
            } else {
                let (slc, _) = buf.slice(0, f.total_length())?;
                f.matches(&slc)
            };
            for off in matches {
                let m = FsMatch {
                    idx: i,
                    off: f.min,
                    length: off - f.min as usize,
                };
                if let ControlFlow::Break(()) = emit(m) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(choices: &[&[&[u8]]], offs: &[i64]) -> Seq {
        Seq {
            max_offsets: offs.to_vec(),
            choices: choices
                .iter()
                .map(|c| c.iter().map(|v| v.to_vec()).collect())
                .collect(),
        }
    }

    #[test]
    fn seq_set_dedups_ignoring_choice_order() {
        let mut ss = SeqSet::default();
        let a = seq(&[&[b"ab", b"cd"]], &[0]);
        let b = seq(&[&[b"cd", b"ab"]], &[0]);
        assert_eq!(ss.add(a, 0), 0);
        assert_eq!(ss.add(b, 5), 0);
        assert_eq!(ss.set.len(), 1);
        let c = seq(&[&[b"ab", b"cd"]], &[-1]);
        assert_eq!(ss.add(c, 5), 5);
        assert_eq!(ss.set.len(), 2);
    }

    #[test]
    fn frame_set_dedups_on_equality() {
        use crate::frames::{Frame, OffType};
        use crate::patterns::Pattern;
        let f = Frame::fixed(OffType::Bof, 0, Pattern::Sequence(b"ab".to_vec()));
        let mut fs = FrameSet::default();
        assert_eq!(fs.add(f.clone(), 0), 0);
        assert_eq!(fs.add(f, 3), 0);
        assert_eq!(fs.set.len(), 1);
    }
}
