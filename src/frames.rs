//! Frame algebra: a pattern bound to an offset relationship.
//!
//! A frame mediates between a pattern and the byte stream. Its offset is
//! relative to the beginning of file, the end of file, or the preceding or
//! succeeding frame in a signature. Offsets are stored as a `min..=max`
//! pair; a max of -1 means unbounded, which covers the wildcard and
//! wildcard-with-minimum forms.
//!
//! Invariants:
//! - `matches` reports hit end offsets in increasing scan order.
//! - `matches(b)` and `matches_rev(reverse(b))` agree (mirror symmetry).
//! - `linked` only ever decrements the distance and range budgets.

use std::fmt;

use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::patterns::{self, Pattern};

/// The anchor a frame's offset is measured from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OffType {
    Bof,
    Prev,
    Succ,
    Eof,
}

impl OffType {
    /// Flips the orientation for right-to-left evaluation:
    /// Prev becomes Succ, Succ and Eof become Prev, Bof is unchanged.
    pub fn switch(self) -> OffType {
        match self {
            OffType::Prev => OffType::Succ,
            OffType::Succ | OffType::Eof => OffType::Prev,
            OffType::Bof => OffType::Bof,
        }
    }

    fn label(self) -> &'static str {
        match self {
            OffType::Bof => "B",
            OffType::Prev => "P",
            OffType::Succ => "S",
            OffType::Eof => "E",
        }
    }
}

/// A pattern with an offset relationship. `max == -1` means unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub typ: OffType,
    pub min: i64,
    pub max: i64,
    pub pat: Pattern,
}

/// An ordered chain of frames describing a format.
pub type Signature = Vec<Frame>;

impl Frame {
    /// Builds a frame, normalising the offset pair: a negative max with a
    /// positive min is wildcard-with-minimum, a negative max otherwise is
    /// a plain wildcard, and a negative min is clamped to zero.
    pub fn new(typ: OffType, pat: Pattern, min: i64, max: i64) -> Frame {
        if max < 0 {
            let min = if min > 0 { min } else { 0 };
            return Frame { typ, min, max: -1, pat };
        }
        let min = if min < 0 { 0 } else { min };
        Frame { typ, min, max, pat }
    }

    pub fn fixed(typ: OffType, off: i64, pat: Pattern) -> Frame {
        Frame::new(typ, pat, off, off)
    }

    pub fn window(typ: OffType, min: i64, max: i64, pat: Pattern) -> Frame {
        Frame::new(typ, pat, min, max)
    }

    pub fn wild(typ: OffType, pat: Pattern) -> Frame {
        Frame::new(typ, pat, 0, -1)
    }

    pub fn wild_min(typ: OffType, min: i64, pat: Pattern) -> Frame {
        Frame::new(typ, pat, min, -1)
    }

    pub fn orientation(&self) -> OffType {
        self.typ
    }

    /// Minimum and maximum lengths of the enclosed pattern.
    pub fn length(&self) -> (usize, usize) {
        self.pat.length()
    }

    pub fn num_sequences(&self) -> usize {
        self.pat.num_sequences()
    }

    pub fn sequences(&self) -> Vec<Vec<u8>> {
        self.pat.sequences()
    }

    /// Sum of the maximum offset and the maximum pattern length: the
    /// number of bytes a window needs to give this frame a full chance.
    pub fn total_length(&self) -> usize {
        let (_, lmax) = self.length();
        (lmax as i64 + self.max).max(0) as usize
    }

    /// Tests whether this frame chains to the frame before it, within the
    /// remaining distance and range budgets. Returns the decremented
    /// budgets on success. Negative budgets disable the limit check.
    pub fn linked(&self, prev: &Frame, max_distance: i64, max_range: i64) -> Option<(i64, i64)> {
        match self.typ {
            OffType::Prev => {
                if self.max < 0 {
                    return None;
                }
                if max_distance < 0 || max_range < 0 {
                    return Some((max_distance, max_range));
                }
                if self.max > max_distance || self.max - self.min > max_range {
                    return None;
                }
                Some((max_distance - self.max, max_range - (self.max - self.min)))
            }
            OffType::Succ | OffType::Eof => {
                if prev.typ != OffType::Succ || prev.max < 0 {
                    return None;
                }
                if max_distance < 0 || max_range < 0 {
                    return Some((max_distance, max_range));
                }
                if prev.max > max_distance || prev.max - prev.min > max_range {
                    return None;
                }
                Some((max_distance - prev.max, max_range - (prev.max - prev.min)))
            }
            OffType::Bof => None,
        }
    }

    /// Matches the frame left-to-right against `b`. Each returned value is
    /// the offset just past a hit (candidate offset plus match length).
    pub fn matches(&self, b: &[u8]) -> Vec<usize> {
        let (_, lmax) = self.length();
        if self.min == self.max {
            // fixed offset
            let off = self.min as usize;
            if off >= b.len() {
                return Vec::new();
            }
            let (lens, _) = self.pat.test(&b[off..]);
            return lens.into_iter().map(|l| off + l).collect();
        }
        let start = self.min as usize;
        let end = if self.max < 0 {
            b.len()
        } else {
            (self.max as usize + lmax).min(b.len())
        };
        if let Pattern::Sequence(s) = &self.pat {
            if !s.is_empty() {
                return memmem::find_iter(&b[..end], s.as_slice())
                    .filter(|&p| p >= start)
                    .map(|p| p + s.len())
                    .collect();
            }
        }
        let mut ret = Vec::new();
        let mut pos = start;
        while pos < end {
            let window = if self.max < 0 { &b[pos..] } else { &b[pos..end] };
            let (lens, skip) = self.pat.test(window);
            if lens.is_empty() {
                if skip == 0 {
                    break;
                }
                pos += skip;
            } else {
                for l in lens {
                    ret.push(pos + l);
                }
                pos += 1;
            }
        }
        ret
    }

    /// Matches the frame right-to-left against `b`; offsets count from the
    /// end of `b`. Each returned value is the distance from the end of `b`
    /// to the start of a hit.
    pub fn matches_rev(&self, b: &[u8]) -> Vec<usize> {
        let (_, lmax) = self.length();
        if self.min == self.max {
            let off = self.min as usize;
            if off >= b.len() {
                return Vec::new();
            }
            let (lens, _) = self.pat.test_r(&b[..b.len() - off]);
            return lens.into_iter().map(|l| off + l).collect();
        }
        let start = self.min as usize;
        let end = if self.max < 0 {
            b.len()
        } else {
            (self.max as usize + lmax).min(b.len())
        };
        if let Pattern::Sequence(s) = &self.pat {
            if !s.is_empty() && end <= b.len() {
                let left = b.len() - end;
                let mut hits: Vec<usize> = memmem::find_iter(&b[left..], s.as_slice())
                    .map(|p| b.len() - (left + p) - s.len())
                    .filter(|&o| o >= start)
                    .map(|o| o + s.len())
                    .collect();
                hits.reverse();
                return hits;
            }
        }
        let mut ret = Vec::new();
        let mut pos = start;
        let left = b.len().saturating_sub(end);
        while pos < end && pos < b.len() {
            let window = &b[left..b.len() - pos];
            let (lens, skip) = self.pat.test_r(window);
            if lens.is_empty() {
                if skip == 0 {
                    break;
                }
                pos += skip;
            } else {
                for l in lens {
                    ret.push(pos + l);
                }
                pos += 1;
            }
        }
        ret
    }
}

/// Rebuilds a frame with the opposite orientation, carrying `pat`.
/// Used when residual frames are mirrored for outward evaluation.
pub fn switch_frame(f: &Frame, pat: Pattern) -> Frame {
    Frame::new(f.typ.switch(), pat, f.min, f.max)
}

/// Reports whether the frame's pattern enumerates to something other than
/// all-zero bytes. Keyframe runs must not start on zero padding.
pub fn non_zero(f: &Frame) -> bool {
    for seq in f.sequences() {
        if seq.iter().all(|&b| b == 0) {
            return false;
        }
    }
    true
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (min, max) if min == max => write!(f, "F {}:{} {}", self.typ.label(), min, self.pat),
            (0, -1) => write!(f, "WL {} {}", self.typ.label(), self.pat),
            (min, -1) => write!(f, "WM {}:{} {}", self.typ.label(), min, self.pat),
            (min, max) => write!(f, "WW {}:{}-{} {}", self.typ.label(), min, max, self.pat),
        }
    }
}

/// Flattens consecutive frames into the cross product of their sequence
/// enumerations; the accumulated set represents the choices for one
/// automaton bucket. With `rev` each appended enumeration is reversed
/// byte-wise before crossing (EOF feeding).
pub struct Sequencer {
    rev: bool,
    acc: Vec<Vec<u8>>,
}

impl Sequencer {
    pub fn new(rev: bool) -> Sequencer {
        Sequencer { rev, acc: Vec::new() }
    }

    pub fn add(&mut self, f: &Frame) {
        let mut seqs = f.sequences();
        if self.rev {
            for s in &mut seqs {
                *s = patterns::reverse(s);
            }
        }
        if self.acc.is_empty() {
            self.acc = seqs;
            return;
        }
        let mut next = Vec::with_capacity(self.acc.len() * seqs.len());
        for s in &seqs {
            for orig in &self.acc {
                let mut joined = Vec::with_capacity(orig.len() + s.len());
                joined.extend_from_slice(orig);
                joined.extend_from_slice(s);
                next.push(joined);
            }
        }
        self.acc = next;
    }

    pub fn seqs(&self) -> &[Vec<u8>] {
        &self.acc
    }

    pub fn into_seqs(self) -> Vec<Vec<u8>> {
        self.acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::reverse;
    use proptest::prelude::*;

    fn seq(s: &str) -> Pattern {
        Pattern::Sequence(s.as_bytes().to_vec())
    }

    #[test]
    fn fixed_matches_only_at_offset() {
        let f = Frame::fixed(OffType::Bof, 0, seq("test"));
        assert_eq!(f.matches(b"test123"), vec![4]);
        assert!(f.matches(b"xtest").is_empty());
        let f5 = Frame::fixed(OffType::Bof, 5, seq("test"));
        assert_eq!(f5.matches(b"01234test"), vec![9]);
    }

    #[test]
    fn window_scans_range() {
        let w = Frame::window(OffType::Bof, 0, 5, seq("test"));
        assert_eq!(w.matches(b"__test__"), vec![6]);
        // hit starting past the window max is ignored
        assert!(w.matches(b"______test").is_empty());
    }

    #[test]
    fn wild_finds_all() {
        let w = Frame::wild(OffType::Bof, seq("aa"));
        assert_eq!(w.matches(b"aaa"), vec![2, 3]);
        let wm = Frame::wild_min(OffType::Bof, 2, seq("aa"));
        assert_eq!(wm.matches(b"aaaa"), vec![4]);
    }

    #[test]
    fn reverse_matches_count_from_end() {
        let f = Frame::fixed(OffType::Eof, 0, seq("test"));
        assert_eq!(f.matches_rev(b"123test"), vec![4]);
        let w = Frame::window(OffType::Eof, 10, 20, seq("test"));
        // "test" ends 14 before EOF in a 34-byte input
        let input = b"testTESTMATCHAAAAAAAAAAAYNESStesty";
        assert!(!w.matches_rev(input).is_empty());
    }

    #[test]
    fn linked_decrements_budgets() {
        let a = Frame::fixed(OffType::Bof, 0, seq("ab"));
        let b = Frame::window(OffType::Prev, 10, 20, seq("cd"));
        assert_eq!(b.linked(&a, 8192, 2049), Some((8172, 2039)));
        assert_eq!(b.linked(&a, 5, 2049), None);
        let wild = Frame::wild(OffType::Prev, seq("cd"));
        assert_eq!(wild.linked(&a, 8192, 2049), None);
        // Succ/EOF linkage is carried by the *previous* frame's offsets
        let s = Frame::window(OffType::Succ, 0, 1, seq("ef"));
        let e = Frame::fixed(OffType::Eof, 0, seq("gh"));
        assert_eq!(e.linked(&s, 8192, 2049), Some((8191, 2048)));
    }

    #[test]
    fn switch_frame_flips_orientation() {
        let p = Frame::window(OffType::Prev, 1, 3, seq("ab"));
        let s = switch_frame(&p, seq("xy"));
        assert_eq!(s.typ, OffType::Succ);
        assert_eq!((s.min, s.max), (1, 3));
        let e = Frame::fixed(OffType::Eof, 2, seq("ab"));
        assert_eq!(switch_frame(&e, seq("xy")).typ, OffType::Prev);
    }

    #[test]
    fn total_length_includes_window() {
        let w = Frame::window(OffType::Bof, 0, 5, seq("test"));
        assert_eq!(w.total_length(), 9);
    }

    #[test]
    fn non_zero_rejects_zero_padding() {
        let z = Frame::fixed(OffType::Bof, 0, Pattern::Sequence(vec![0, 0]));
        assert!(!non_zero(&z));
        let nz = Frame::fixed(OffType::Bof, 0, seq("a"));
        assert!(non_zero(&nz));
    }

    #[test]
    fn sequencer_crosses_choices() {
        let mut sq = Sequencer::new(false);
        sq.add(&Frame::fixed(
            OffType::Bof,
            0,
            Pattern::Choice(vec![seq("a"), seq("b")]),
        ));
        sq.add(&Frame::fixed(OffType::Prev, 0, seq("c")));
        let mut got = sq.into_seqs();
        got.sort();
        assert_eq!(got, vec![b"ac".to_vec(), b"bc".to_vec()]);
    }

    #[test]
    fn sequencer_reverse_builds_reversed_tail_first() {
        // reversed feeding appends each frame's reversed bytes after the
        // previously accumulated (later) frames
        let mut sq = Sequencer::new(true);
        sq.add(&Frame::fixed(OffType::Eof, 0, seq("cd")));
        sq.add(&Frame::fixed(OffType::Succ, 0, seq("ab")));
        assert_eq!(sq.seqs(), &[b"dcba".to_vec()]);
    }

    proptest! {
        #[test]
        fn mirror_symmetry(body in proptest::collection::vec(any::<u8>(), 0..64),
                           min in 0i64..8, max in -1i64..16) {
            // a forward scan for "ab" mirrors a reverse scan for "ba"
            // over the reversed input
            let f = Frame::new(OffType::Bof, seq("ab"), min, max);
            let g = Frame::new(OffType::Bof, Pattern::Sequence(b"ba".to_vec()), min, max);
            let mut fwd = f.matches(&body);
            let mut rev = g.matches_rev(&reverse(&body));
            fwd.sort_unstable();
            rev.sort_unstable();
            prop_assert_eq!(fwd, rev);
        }
    }
}
