//! Test trees: the follow-up tests attached to a sequence or frame hit.
//!
//! A hit on its own rarely proves a keyframe. The test tree records which
//! keyframes a hit satisfies directly (`complete`) and which need further
//! frames matched to the left or right of the hit (`incomplete`). Left and
//! right tests are stored as tries so signatures sharing residual frames
//! share the work.

use serde::{Deserialize, Serialize};

use crate::frames::Frame;
use crate::keyframes::KeyFrameId;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestTree {
    pub complete: Vec<KeyFrameId>,
    pub incomplete: Vec<FollowUp>,
    pub max_left_distance: usize,
    pub max_right_distance: usize,
    pub left: Vec<TestNode>,
    pub right: Vec<TestNode>,
}

/// A keyframe needing left and/or right residual tests.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FollowUp {
    pub kf: KeyFrameId,
    pub l: bool,
    pub r: bool,
}

/// A satisfied follow-up: the index into `incomplete` plus the byte
/// distances of the residual matches from the hit boundary.
#[derive(Clone, Debug)]
pub struct FollowUpMatch {
    pub follow_up: usize,
    pub distances: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestNode {
    pub frame: Frame,
    pub success: Vec<usize>,
    pub tests: Vec<TestNode>,
}

impl TestNode {
    fn new(frame: Frame) -> TestNode {
        TestNode { frame, success: Vec::new(), tests: Vec::new() }
    }
}

fn insert_path(nodes: &mut Vec<TestNode>, path: &[Frame], fu: usize) {
    let idx = match nodes.iter().position(|n| n.frame == path[0]) {
        Some(i) => i,
        None => {
            nodes.push(TestNode::new(path[0].clone()));
            nodes.len() - 1
        }
    };
    if path.len() == 1 {
        nodes[idx].success.push(fu);
    } else {
        insert_path(&mut nodes[idx].tests, &path[1..], fu);
    }
}

impl TestTree {
    /// Registers a keyframe against this tree, with any residual frames to
    /// test leftwards and rightwards of a hit.
    pub fn add(&mut self, kf: KeyFrameId, l: &[Frame], r: &[Frame]) {
        if l.is_empty() && r.is_empty() {
            self.complete.push(kf);
            return;
        }
        let fu = FollowUp { kf, l: !l.is_empty(), r: !r.is_empty() };
        self.incomplete.push(fu);
        let id = self.incomplete.len() - 1;
        if fu.l {
            insert_path(&mut self.left, l, id);
        }
        if fu.r {
            insert_path(&mut self.right, r, id);
        }
    }

    /// All keyframes this tree can prove, complete and incomplete.
    pub fn key_frames(&self) -> Vec<KeyFrameId> {
        let mut ret = Vec::with_capacity(self.complete.len() + self.incomplete.len());
        ret.extend_from_slice(&self.complete);
        ret.extend(self.incomplete.iter().map(|fu| fu.kf));
        ret
    }
}

/// The deepest byte distance any path through the trie can need, used to
/// size the slice taken either side of a hit.
pub fn max_length(ts: &[TestNode]) -> usize {
    let mut max = 0;
    let mut work: Vec<(&TestNode, usize)> = ts.iter().map(|t| (t, 0)).collect();
    while let Some((t, base)) = work.pop() {
        let this = base + t.frame.total_length();
        if t.tests.is_empty() && this > max {
            max = this;
        }
        for nt in &t.tests {
            work.push((nt, this));
        }
    }
    max
}

/// Walks the trie over a slice, recording every follow-up whose path
/// matches. With `rev` the slice is the bytes to the left of the hit and
/// frames test right-to-left; otherwise left-to-right. Distances accumulate
/// from the hit boundary outwards.
pub fn match_test_nodes(ts: &[TestNode], b: &[u8], rev: bool) -> Vec<FollowUpMatch> {
    let mut ret = Vec::new();
    let mut work: Vec<(&TestNode, usize)> = ts.iter().rev().map(|t| (t, 0)).collect();
    while let Some((t, o)) = work.pop() {
        if o >= b.len() {
            continue;
        }
        let mut offs = if rev {
            t.frame.matches_rev(&b[..b.len() - o])
        } else {
            t.frame.matches(&b[o..])
        };
        if offs.is_empty() {
            continue;
        }
        for v in &mut offs {
            *v += o;
        }
        for &s in &t.success {
            ret.push(FollowUpMatch { follow_up: s, distances: offs.clone() });
        }
        for &off in &offs {
            for test in &t.tests {
                work.push((test, off));
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::OffType;
    use crate::patterns::Pattern;

    fn seq(s: &str) -> Pattern {
        Pattern::Sequence(s.as_bytes().to_vec())
    }

    fn fixed(off: i64, s: &str) -> Frame {
        Frame::fixed(OffType::Succ, off, seq(s))
    }

    #[test]
    fn add_routes_completes_and_incompletes() {
        let mut t = TestTree::default();
        t.add((0, 0), &[], &[]);
        t.add((1, 0), &[fixed(0, "ab")], &[]);
        t.add((2, 0), &[fixed(0, "ab")], &[fixed(1, "cd")]);
        assert_eq!(t.complete, vec![(0, 0)]);
        assert_eq!(t.incomplete.len(), 2);
        assert!(t.incomplete[1].l && t.incomplete[1].r);
        // shared left path collapses into one trie node
        assert_eq!(t.left.len(), 1);
        assert_eq!(t.left[0].success, vec![0, 1]);
        assert_eq!(t.key_frames(), vec![(0, 0), (1, 0), (2, 0)]);
    }

    #[test]
    fn trie_branches_on_distinct_frames() {
        let mut t = TestTree::default();
        t.add((0, 0), &[], &[fixed(0, "ab"), fixed(0, "cd")]);
        t.add((1, 0), &[], &[fixed(0, "ab"), fixed(2, "ef")]);
        assert_eq!(t.right.len(), 1);
        assert_eq!(t.right[0].tests.len(), 2);
    }

    #[test]
    fn max_length_takes_deepest_path() {
        let mut t = TestTree::default();
        t.add((0, 0), &[], &[fixed(0, "ab"), fixed(2, "ef")]);
        t.add((1, 0), &[], &[fixed(1, "z")]);
        // path one: (0+2) + (2+2) = 6; path two: 1+1 = 2
        assert_eq!(max_length(&t.right), 6);
    }

    #[test]
    fn match_walks_paths_forward() {
        let mut t = TestTree::default();
        t.add((0, 0), &[], &[fixed(0, "ab"), fixed(1, "cd")]);
        // "ab" at 0..2, then one byte gap, "cd" at 3..5
        let fms = match_test_nodes(&t.right, b"abxcd", false);
        assert_eq!(fms.len(), 1);
        assert_eq!(fms[0].follow_up, 0);
        assert_eq!(fms[0].distances, vec![5]);
        assert!(match_test_nodes(&t.right, b"abxxd", false).is_empty());
    }

    #[test]
    fn match_walks_paths_reverse() {
        let mut t = TestTree::default();
        t.add((0, 0), &[], &[fixed(0, "ab")]);
        // reverse testing anchors at the end of the slice
        let fms = match_test_nodes(&t.right, b"xxxab", true);
        assert_eq!(fms.len(), 1);
        assert_eq!(fms[0].distances, vec![2]);
    }

    #[test]
    fn intermediate_successes_recorded() {
        let mut t = TestTree::default();
        t.add((0, 0), &[], &[fixed(0, "ab")]);
        t.add((1, 0), &[], &[fixed(0, "ab"), fixed(0, "cd")]);
        let fms = match_test_nodes(&t.right, b"abcd", false);
        assert_eq!(fms.len(), 2);
        let fus: Vec<usize> = fms.iter().map(|m| m.follow_up).collect();
        assert!(fus.contains(&0) && fus.contains(&1));
    }
}
