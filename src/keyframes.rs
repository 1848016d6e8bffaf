//! Keyframes: the per-segment anchors a match must satisfy.
//!
//! Each segment of a signature contributes one keyframe. The keyframe
//! carries two sets of positioning data: `seg` offsets are relative (to
//! the neighbouring segment, or to BOF/EOF for boundary segments) and
//! `key` offsets are absolute distances from BOF or EOF. Absolute offsets
//! let a strike be rejected cheaply before any slice testing happens;
//! relative offsets validate chains of partial matches at the end.
//!
//! Invariants:
//! - a pMax of -1 means unbounded and is sticky through all arithmetic.
//! - `key` offsets for Bof/Prev keyframes count from BOF; Succ/Eof count
//!   from EOF.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frames::{switch_frame, Frame, OffType, Signature};
use crate::segment::Position;

/// Offsets and lengths for one keyframe. `pmin`/`pmax` bound where the
/// match may sit, `lmin`/`lmax` bound how long it may be.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFramePos {
    pub pmin: i64,
    pub pmax: i64,
    pub lmin: usize,
    pub lmax: usize,
}

/// A signature segment reduced to its matchable anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFrame {
    pub typ: OffType,
    /// Relative positioning for the whole segment.
    pub seg: KeyFramePos,
    /// Absolute positioning for the keyframe portion.
    pub key: KeyFramePos,
}

/// Addresses a keyframe: signature index, then keyframe index within it.
pub type KeyFrameId = (usize, usize);

impl fmt::Display for KeyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} Seg Min:{} Seg Max:{}; Abs Min:{} Abs Max:{}",
            self.typ, self.seg.pmin, self.seg.pmax, self.key.pmin, self.key.pmax
        )
    }
}

impl KeyFrame {
    /// Quick gate applied to a strike offset before any further testing.
    pub fn check(&self, o: i64) -> bool {
        if self.key.pmin > o {
            return false;
        }
        if self.key.pmax == -1 {
            return true;
        }
        self.key.pmax >= o
    }
}

/// Minimum and maximum byte lengths spanned by a slice of frames,
/// walking in the direction the frames are anchored.
pub fn calc_len(fs: &[Frame]) -> (usize, usize) {
    let mut min = 0usize;
    let mut max = 0usize;
    if fs[0].orientation() < OffType::Succ {
        for (i, f) in fs.iter().enumerate() {
            let (fmin, fmax) = f.length();
            min += fmin;
            max += fmax;
            if i > 0 {
                min += f.min as usize;
                max += f.max as usize;
            }
        }
        return (min, max);
    }
    for (i, f) in fs.iter().enumerate().rev() {
        let (fmin, fmax) = f.length();
        min += fmin;
        max += fmax;
        if i < fs.len() - 1 {
            min += f.min as usize;
            max += f.max as usize;
        }
    }
    (min, max)
}

/// Turns a segment into a keyframe plus the residual frames to its left
/// and right. Residual frames are re-anchored so they can be tested
/// outwards from a keyframe hit: left frames test right-to-left, right
/// frames left-to-right.
pub fn to_key_frame(seg: &Signature, pos: Position) -> (KeyFrame, Vec<Frame>, Vec<Frame>) {
    let mut left: Vec<Frame> = Vec::new();
    let mut right: Vec<Frame> = Vec::new();
    let mut seg_pos = KeyFramePos::default();
    let mut key_pos = KeyFramePos::default();
    let (slmin, slmax) = calc_len(seg);
    seg_pos.lmin = slmin;
    seg_pos.lmax = slmax;
    let (klmin, klmax) = calc_len(&seg[pos.start..pos.end]);
    key_pos.lmin = klmin;
    key_pos.lmax = klmax;
    // BOF and PREV segments: walk in from the front
    if seg[0].orientation() < OffType::Succ {
        let typ = seg[0].orientation();
        seg_pos.pmin = seg[0].min;
        seg_pos.pmax = seg[0].max;
        key_pos.pmin = seg_pos.pmin;
        key_pos.pmax = seg_pos.pmax;
        for i in 0..pos.start {
            let f = &seg[i];
            let (fmin, fmax) = f.length();
            key_pos.pmin += fmin as i64 + seg[i + 1].min;
            if key_pos.pmax > -1 {
                key_pos.pmax += fmax as i64 + seg[i + 1].max;
            }
            left.insert(0, switch_frame(&seg[i + 1], f.pat.clone()));
        }
        if pos.end < seg.len() {
            right = seg[pos.end..].to_vec();
        }
        return (KeyFrame { typ, seg: seg_pos, key: key_pos }, left, right);
    }
    // EOF and SUCC segments: walk in from the back
    let typ = seg[seg.len() - 1].orientation();
    seg_pos.pmin = seg[seg.len() - 1].min;
    seg_pos.pmax = seg[seg.len() - 1].max;
    key_pos.pmin = seg_pos.pmin;
    key_pos.pmax = seg_pos.pmax;
    for i in pos.end..seg.len() {
        let f = &seg[i];
        let (fmin, fmax) = f.length();
        key_pos.pmin += fmin as i64 + seg[i - 1].min;
        if key_pos.pmax > -1 {
            key_pos.pmax += fmax as i64 + seg[i - 1].max;
        }
        right.push(switch_frame(&seg[i - 1], f.pat.clone()));
    }
    for f in &seg[..pos.start] {
        left.insert(0, f.clone());
    }
    (KeyFrame { typ, seg: seg_pos, key: key_pos }, left, right)
}

fn calc_min_max(min: i64, max: i64, sp: &KeyFramePos) -> (i64, i64) {
    let min = min + sp.pmin + sp.lmin as i64;
    if max < 0 || sp.pmax < 0 {
        return (min, -1);
    }
    (min, max + sp.pmax + sp.lmax as i64)
}

/// Converts segment-relative offsets into absolute BOF/EOF distances,
/// walking forwards for Bof/Prev keyframes and backwards for Eof/Succ.
/// `max_bof`/`max_eof` greater than zero clamp absolute maxima.
pub fn update_positions(ks: &mut [KeyFrame], max_bof: i64, max_eof: i64) {
    let clamp = |kf: &mut KeyFrame, lim: i64| {
        if lim > 0 && (kf.key.pmax < 0 || kf.key.pmax > lim) {
            kf.key.pmax = lim;
        }
    };
    let mut min = 0i64;
    let mut max = 0i64;
    for i in 0..ks.len() {
        match ks[i].typ {
            OffType::Bof => {
                let (m, x) = calc_min_max(0, 0, &ks[i].seg);
                min = m;
                max = x;
                clamp(&mut ks[i], max_bof);
            }
            OffType::Prev => {
                ks[i].key.pmin += min;
                if max > -1 && ks[i].key.pmax > -1 {
                    ks[i].key.pmax += max;
                } else {
                    ks[i].key.pmax = -1;
                }
                let (m, x) = calc_min_max(min, max, &ks[i].seg);
                min = m;
                max = x;
                clamp(&mut ks[i], max_bof);
            }
            _ => {}
        }
    }
    min = 0;
    max = 0;
    for i in (0..ks.len()).rev() {
        match ks[i].typ {
            OffType::Eof => {
                let (m, x) = calc_min_max(0, 0, &ks[i].seg);
                min = m;
                max = x;
                clamp(&mut ks[i], max_eof);
            }
            OffType::Succ => {
                ks[i].key.pmin += min;
                if max > -1 && ks[i].key.pmax > -1 {
                    ks[i].key.pmax += max;
                } else {
                    ks[i].key.pmax = -1;
                }
                let (m, x) = calc_min_max(min, max, &ks[i].seg);
                min = m;
                max = x;
                clamp(&mut ks[i], max_eof);
            }
            _ => {}
        }
    }
}

/// When a signature has neither a bounded BOF keyframe nor a bounded EOF
/// keyframe, every keyframe must be treated as unexcludable: the scorer
/// cannot rule the signature out by scan progress alone. Returns the
/// front-anchored and back-anchored IDs in that case.
pub fn unknown_bof_and_eof(first_idx: usize, ks: &[KeyFrame]) -> (Vec<KeyFrameId>, Vec<KeyFrameId>) {
    let b = get_max(-1, |t| t == OffType::Bof, ks, true);
    if b >= 0 {
        return (Vec::new(), Vec::new());
    }
    let e = get_max(-1, |t| t == OffType::Eof, ks, true);
    if e >= 0 {
        return (Vec::new(), Vec::new());
    }
    let mut bof = Vec::with_capacity(ks.len());
    let mut eof = Vec::with_capacity(ks.len());
    for (idx, kf) in ks.iter().enumerate() {
        if kf.typ < OffType::Succ {
            bof.push((first_idx, idx));
        } else {
            eof.push((first_idx, idx));
        }
    }
    (bof, eof)
}

fn get_max(mut max: i64, t: impl Fn(OffType) -> bool, ks: &[KeyFrame], local_min: bool) -> i64 {
    for v in ks {
        if !t(v.typ) {
            continue;
        }
        if v.key.pmax < 0 {
            if !local_min {
                return -1;
            }
            continue;
        }
        let this = v.key.pmax + v.key.lmax as i64;
        if local_min {
            if max < 0 || this < max {
                max = this;
            }
        } else if this > max {
            max = this;
        }
    }
    max
}

/// Running total of the furthest BOF-relative byte any front-anchored
/// keyframe can require. Sticky at -1 (unbounded).
pub fn max_bof(max: i64, ks: &[KeyFrame]) -> i64 {
    if max < 0 {
        return max;
    }
    get_max(max, |t| t < OffType::Succ, ks, false)
}

/// As [`max_bof`] for back-anchored keyframes.
pub fn max_eof(max: i64, ks: &[KeyFrame]) -> i64 {
    if max < 0 {
        return max;
    }
    get_max(max, |t| t > OffType::Prev, ks, false)
}

/// Nearest bounded horizon for front-anchored keyframes: once the scan is
/// past it, at least a partial match should have been seen.
pub fn known_bof(ks: &[KeyFrame]) -> i64 {
    get_max(-1, |t| t < OffType::Succ, ks, true)
}

/// As [`known_bof`] for back-anchored keyframes.
pub fn known_eof(ks: &[KeyFrame]) -> i64 {
    get_max(-1, |t| t > OffType::Prev, ks, true)
}

/// Can the windows of two successive keyframes overlap? If so their
/// automaton sequences cannot share a cluster.
pub fn cross_over(a: &KeyFrame, b: &KeyFrame) -> bool {
    if a.key.pmax == -1 {
        return true;
    }
    a.key.pmax + a.key.lmax as i64 > b.key.pmin
}

/// Is a single hit enough for this keyframe, or must all hits be kept for
/// chain validation against the neighbouring segments?
pub fn one_enough(id: usize, kfs: &[KeyFrame]) -> bool {
    let kf = &kfs[id];
    if kf.typ == OffType::Bof
        || (kf.typ == OffType::Prev && kf.seg.pmax == -1 && kf.seg.pmin == 0)
    {
        // not if the next keyframe chains onto this one
        if id + 1 < kfs.len() {
            let next = &kfs[id + 1];
            if next.typ == OffType::Prev && (next.seg.pmax > -1 || next.seg.pmin > 0) {
                return false;
            }
        }
        return true;
    }
    // Eof or Succ: not if the previous keyframe chains onto this one
    if id > 0 {
        let prev = &kfs[id - 1];
        if prev.typ == OffType::Succ && (prev.seg.pmax > -1 || prev.seg.pmin > 0) {
            return false;
        }
    }
    true
}

/// Validates one link in a chain of keyframe hits. Offsets are
/// BOF-normalised `(offset, length)` pairs. The second return is true when
/// the link holds regardless of the previous hit, letting the chain walk
/// checkpoint its progress.
pub fn check_related(
    this: &KeyFrame,
    prev: &KeyFrame,
    this_off: (i64, i64),
    prev_off: (i64, i64),
) -> (bool, bool) {
    match this.typ {
        OffType::Bof => (true, true),
        OffType::Eof | OffType::Succ => {
            if prev.typ == OffType::Succ && !(prev.seg.pmax == -1 && prev.seg.pmin == 0) {
                let dif = this_off.0 - prev_off.0 - prev_off.1;
                let ok = dif > -1
                    && dif >= prev.seg.pmin
                    && (prev.seg.pmax == -1 || dif <= prev.seg.pmax);
                (ok, false)
            } else {
                (true, true)
            }
        }
        OffType::Prev => {
            if this.seg.pmax == -1 && this.seg.pmin == 0 {
                return (true, true);
            }
            let dif = this_off.0 - prev_off.0 - prev_off.1;
            let ok = dif > -1
                && dif >= this.seg.pmin
                && (this.seg.pmax == -1 || dif <= this.seg.pmax);
            (ok, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Frame;
    use crate::patterns::Pattern;
    use crate::segment::Position;

    fn seq(s: &str) -> Pattern {
        Pattern::Sequence(s.as_bytes().to_vec())
    }

    fn kf(typ: OffType, seg: (i64, i64), key: (i64, i64), lens: (usize, usize)) -> KeyFrame {
        KeyFrame {
            typ,
            seg: KeyFramePos { pmin: seg.0, pmax: seg.1, lmin: lens.0, lmax: lens.1 },
            key: KeyFramePos { pmin: key.0, pmax: key.1, lmin: lens.0, lmax: lens.1 },
        }
    }

    #[test]
    fn to_key_frame_front_anchored() {
        let seg = vec![
            Frame::fixed(OffType::Bof, 0, seq("a")),
            Frame::window(OffType::Prev, 1, 3, seq("bc")),
            Frame::fixed(OffType::Prev, 0, seq("d")),
        ];
        let (k, left, right) = to_key_frame(&seg, Position { length: 3, start: 1, end: 3 });
        assert_eq!(k.typ, OffType::Bof);
        assert_eq!((k.seg.pmin, k.seg.pmax, k.seg.lmin, k.seg.lmax), (0, 0, 5, 7));
        assert_eq!((k.key.pmin, k.key.pmax, k.key.lmin, k.key.lmax), (2, 4, 3, 3));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].typ, OffType::Succ);
        assert_eq!((left[0].min, left[0].max), (1, 3));
        assert_eq!(left[0].pat, seq("a"));
        assert!(right.is_empty());
    }

    #[test]
    fn to_key_frame_back_anchored() {
        let seg = vec![
            Frame::fixed(OffType::Succ, 0, seq("ab")),
            Frame::fixed(OffType::Eof, 0, seq("cd")),
        ];
        let (k, left, right) = to_key_frame(&seg, Position { length: 2, start: 0, end: 1 });
        assert_eq!(k.typ, OffType::Eof);
        assert_eq!((k.key.pmin, k.key.pmax), (2, 2));
        assert!(left.is_empty());
        assert_eq!(right.len(), 1);
        assert_eq!(right[0].typ, OffType::Prev);
        assert_eq!(right[0].pat, seq("cd"));
    }

    #[test]
    fn update_positions_accumulates_forwards() {
        let mut ks = vec![
            kf(OffType::Bof, (0, 0), (0, 0), (4, 4)),
            kf(OffType::Prev, (0, -1), (0, -1), (2, 2)),
            kf(OffType::Prev, (0, 10), (0, 10), (3, 3)),
        ];
        update_positions(&mut ks, 0, 0);
        assert_eq!((ks[0].key.pmin, ks[0].key.pmax), (0, 0));
        assert_eq!((ks[1].key.pmin, ks[1].key.pmax), (4, -1));
        // a wild segment upstream makes every later maximum unbounded
        assert_eq!((ks[2].key.pmin, ks[2].key.pmax), (6, -1));
    }

    #[test]
    fn update_positions_accumulates_backwards() {
        let mut ks = vec![
            kf(OffType::Succ, (0, 4), (0, 4), (2, 2)),
            kf(OffType::Eof, (0, 0), (0, 0), (3, 3)),
        ];
        update_positions(&mut ks, 0, 0);
        assert_eq!((ks[1].key.pmin, ks[1].key.pmax), (0, 0));
        assert_eq!((ks[0].key.pmin, ks[0].key.pmax), (3, 7));
    }

    #[test]
    fn max_bof_clamp_applies() {
        let mut ks = vec![kf(OffType::Bof, (0, -1), (0, -1), (4, 4))];
        update_positions(&mut ks, 1024, 0);
        assert_eq!(ks[0].key.pmax, 1024);
    }

    #[test]
    fn check_gates_offsets() {
        let k = kf(OffType::Bof, (0, 10), (5, 10), (4, 4));
        assert!(!k.check(4));
        assert!(k.check(5));
        assert!(k.check(10));
        assert!(!k.check(11));
        let wild = kf(OffType::Bof, (0, -1), (5, -1), (4, 4));
        assert!(wild.check(1 << 40));
    }

    #[test]
    fn running_maxima_stick_at_unbounded() {
        let bounded = vec![kf(OffType::Bof, (0, 10), (0, 10), (4, 4))];
        assert_eq!(max_bof(0, &bounded), 14);
        let wild = vec![kf(OffType::Prev, (0, -1), (4, -1), (2, 2))];
        assert_eq!(max_bof(14, &wild), -1);
        assert_eq!(max_bof(-1, &bounded), -1);
        let e = vec![kf(OffType::Eof, (0, 8), (0, 8), (2, 2))];
        assert_eq!(max_eof(0, &e), 10);
    }

    #[test]
    fn known_horizons_take_nearest_bounded() {
        let ks = vec![
            kf(OffType::Bof, (0, 10), (0, 10), (4, 4)),
            kf(OffType::Prev, (0, 2), (4, 16), (2, 2)),
        ];
        assert_eq!(known_bof(&ks), 14);
        assert_eq!(known_eof(&ks), -1);
    }

    #[test]
    fn unknown_only_when_both_ends_unbounded() {
        let anchored = vec![kf(OffType::Bof, (0, 0), (0, 0), (4, 4))];
        assert_eq!(unknown_bof_and_eof(3, &anchored), (Vec::new(), Vec::new()));
        let floating = vec![
            kf(OffType::Prev, (0, -1), (0, -1), (4, 4)),
            kf(OffType::Succ, (0, -1), (0, -1), (2, 2)),
        ];
        let (b, e) = unknown_bof_and_eof(3, &floating);
        assert_eq!(b, vec![(3, 0)]);
        assert_eq!(e, vec![(3, 1)]);
    }

    #[test]
    fn cross_over_on_overlap_or_wild() {
        let a = kf(OffType::Bof, (0, 0), (0, 10), (4, 4));
        let b = kf(OffType::Bof, (0, 0), (12, 20), (4, 4));
        assert!(cross_over(&a, &b));
        let c = kf(OffType::Bof, (0, 0), (20, 30), (4, 4));
        assert!(!cross_over(&a, &c));
        let w = kf(OffType::Bof, (0, -1), (0, -1), (4, 4));
        assert!(cross_over(&w, &c));
    }

    #[test]
    fn one_enough_respects_chained_neighbours() {
        let chained = vec![
            kf(OffType::Bof, (0, 0), (0, 0), (4, 4)),
            kf(OffType::Prev, (0, 8), (4, 12), (2, 2)),
        ];
        assert!(!one_enough(0, &chained));
        assert!(one_enough(1, &chained));
        let loose = vec![
            kf(OffType::Bof, (0, 0), (0, 0), (4, 4)),
            kf(OffType::Prev, (0, -1), (4, -1), (2, 2)),
        ];
        assert!(one_enough(0, &loose));
        let succ = vec![
            kf(OffType::Succ, (0, 4), (2, 10), (2, 2)),
            kf(OffType::Eof, (0, 0), (0, 0), (2, 2)),
        ];
        assert!(!one_enough(1, &succ));
        assert!(one_enough(0, &succ));
    }

    #[test]
    fn check_related_validates_gaps() {
        let bof = kf(OffType::Bof, (0, 0), (0, 0), (4, 4));
        let prev = kf(OffType::Prev, (0, 8), (4, 12), (2, 2));
        // gap of 6 between end of first hit (0 + 4) and second hit at 10
        assert_eq!(check_related(&prev, &bof, (10, 2), (0, 4)), (true, false));
        // gap of 10 exceeds the segment max of 8
        assert_eq!(check_related(&prev, &bof, (14, 2), (0, 4)), (false, false));
        // second hit before the first can't link
        assert_eq!(check_related(&prev, &bof, (2, 2), (0, 4)), (false, false));
        let wild = kf(OffType::Prev, (0, -1), (4, -1), (2, 2));
        assert_eq!(check_related(&wild, &bof, (1 << 30, 2), (0, 4)), (true, true));
        // Succ chains are validated by the previous keyframe's bounds
        let succ = kf(OffType::Succ, (0, 4), (2, 10), (2, 2));
        let eof = kf(OffType::Eof, (0, 0), (0, 0), (2, 2));
        assert_eq!(check_related(&eof, &succ, (10, 2), (4, 2)), (true, false));
        assert_eq!(check_related(&eof, &succ, (20, 2), (4, 2)), (false, false));
    }
}
