//! Signature segmentation and segment characterisation.
//!
//! A signature is split into segments wherever adjacent frames are too far
//! apart to test together: at wildcards, or when the gap exhausts the
//! distance/range budgets. Each segment is then characterised by its
//! anchoring (BOF, EOF, or relative to a neighbouring segment) and probed
//! for the run of frames that makes the strongest automaton sequence.

use std::fmt;

use crate::frames::{non_zero, Frame, OffType, Signature};

/// How a segment is anchored. The ordering matters: everything below
/// `Succ` scans from the front of the stream, everything from `Succ` up
/// scans from the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegType {
    Unknown,
    /// Fixed at offset zero from BOF.
    BofZero,
    /// A window or fixed offset greater than zero from BOF.
    BofWindow,
    BofWild,
    Prev,
    Succ,
    /// Fixed at offset zero from EOF.
    EofZero,
    /// A window or fixed offset greater than zero from EOF.
    EofWindow,
    EofWild,
}

/// Splits a signature into segments. Frames stay in one segment while each
/// links to its predecessor within the running distance and range budgets;
/// a wildcard or an exhausted budget starts a new segment.
pub fn segment(sig: &Signature, distance: i64, range: i64) -> Vec<Signature> {
    if sig.len() <= 1 {
        return vec![sig.clone()];
    }
    let mut segments = Vec::with_capacity(1);
    let mut current = vec![sig[0].clone()];
    let (mut dist, mut rng) = (distance, range);
    for i in 1..sig.len() {
        match sig[i].linked(&sig[i - 1], dist, rng) {
            Some((d, r)) => {
                current.push(sig[i].clone());
                dist = d;
                rng = r;
            }
            None => {
                segments.push(std::mem::replace(&mut current, vec![sig[i].clone()]));
                dist = distance;
                rng = range;
            }
        }
    }
    segments.push(current);
    segments
}

/// Characterises a segment by the anchoring of its boundary frames.
pub fn characterise(seg: &[Frame]) -> SegType {
    let last = match seg.last() {
        Some(f) => f,
        None => return SegType::Unknown,
    };
    match last.orientation() {
        OffType::Succ => return SegType::Succ,
        OffType::Eof => {
            return match last.max {
                0 => SegType::EofZero,
                m if m < 0 => SegType::EofWild,
                _ => SegType::EofWindow,
            }
        }
        _ => {}
    }
    match seg[0].orientation() {
        OffType::Prev => SegType::Prev,
        OffType::Bof => match seg[0].max {
            0 => SegType::BofZero,
            m if m < 0 => SegType::BofWild,
            _ => SegType::BofWindow,
        },
        _ => SegType::BofWindow,
    }
}

/// Locates the frame run within a segment that becomes the keyframe. The
/// run can span several frames when they are immediately adjacent and
/// enumerate to sequences; `length` is the run's minimum byte length, and
/// `start..end` its frame index range. A zero length means the segment
/// cannot feed the sequence automaton.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub length: usize,
    pub start: usize,
    pub end: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "POS Length: {}; Start: {}; End: {}",
            self.length, self.start, self.end
        )
    }
}

// A frame chains onto the run only when fixed at distance zero from its
// predecessor (budgets of zero reject everything else).
fn adjacent(f: &Frame, prev: &Frame) -> bool {
    f.linked(prev, 0, 0).is_some()
}

/// Longest qualifying run anywhere in the segment. The run cannot start
/// on a frame that enumerates to zero bytes only, and the product of
/// sequence counts along the run must stay within `max`.
pub fn var_length(seg: &[Frame], max: usize) -> Position {
    let mut cur = 0usize;
    let mut current = Position::default();
    let mut greatest = Position::default();
    let num = seg[0].num_sequences();
    if num > 0 && num <= max && non_zero(&seg[0]) {
        current.length = seg[0].length().0;
        greatest = Position { length: current.length, start: 0, end: 1 };
        cur = num;
    }
    for i in 1..seg.len() {
        let f = &seg[i];
        if adjacent(f, &seg[i - 1]) {
            let num = f.num_sequences();
            if num > 0 && num <= max {
                if current.length > 0 && cur * num <= max {
                    current.length += f.length().0;
                    current.end = i + 1;
                    cur *= num;
                } else {
                    current.length = f.length().0;
                    current.start = i;
                    current.end = i + 1;
                    cur = num;
                }
            } else {
                current.length = 0;
            }
        } else {
            let num = f.num_sequences();
            if num > 0 && num <= max && non_zero(f) {
                current.length = f.length().0;
                current.start = i;
                current.end = i + 1;
                cur = num;
            } else {
                current.length = 0;
            }
        }
        if current.length > greatest.length {
            greatest = current;
        }
    }
    greatest
}

/// Greedy run anchored on the first frame of a BOF segment.
pub fn bof_length(seg: &[Frame], max: usize) -> Position {
    let mut cur = 0usize;
    let mut pos = Position::default();
    let num = seg[0].num_sequences();
    if num > 0 && num <= max {
        pos.length = seg[0].length().0;
        pos.start = 0;
        pos.end = 1;
        cur = num;
    }
    for i in 1..seg.len() {
        let f = &seg[i];
        if adjacent(f, &seg[i - 1]) {
            let num = f.num_sequences();
            if num > 0 && num <= max && pos.length > 0 && cur * num <= max {
                pos.length += f.length().0;
                pos.end = i + 1;
                cur *= num;
                continue;
            }
        }
        break;
    }
    pos
}

/// Greedy run anchored on the last frame of an EOF segment.
pub fn eof_length(seg: &[Frame], max: usize) -> Position {
    let mut cur = 0usize;
    let mut pos = Position::default();
    let last = seg.len() - 1;
    let num = seg[last].num_sequences();
    if num > 0 && num <= max {
        pos.length = seg[last].length().0;
        pos.start = last;
        pos.end = seg.len();
        cur = num;
    }
    for i in (0..last).rev() {
        let f = &seg[i];
        if adjacent(&seg[i + 1], f) {
            let num = f.num_sequences();
            if num > 0 && num <= max && pos.length > 0 && cur * num <= max {
                pos.length += f.length().0;
                pos.start = i;
                cur *= num;
                continue;
            }
        }
        break;
    }
    pos
}
