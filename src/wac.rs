//! A wild multi-pattern automaton in the Aho-Corasick family.
//!
//! Sequences are ordered sets of choice slots. Each slot carries a maximum
//! offset for its first byte (-1 for unbounded) and matches only after the
//! preceding slot has matched at an earlier, non-overlapping position.
//! Results report the sequence and slot of each subsequence hit; stitching
//! hits into full matches is the caller's job.
//!
//! Construction builds two tries sharing one arena. The zero trie holds
//! every choice and is only ever visited at stream start; its fail links
//! point into the main trie, which omits slots anchored at offset zero.
//! Anchored patterns therefore cost nothing once the scan has moved past
//! the anchor. The low memory constructor collapses both tries into one
//! and uses sorted-slice transitions instead of 256-way tables.
//!
//! From offset 1024 the scan reports progress at power-of-two offsets, and
//! always once more when input ends.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// The byte alternatives for one slot of a [`Seq`].
pub type Choice = Vec<Vec<u8>>;

/// An ordered set of choice slots with per-slot maximum offsets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seq {
    pub max_offsets: Vec<i64>,
    pub choices: Vec<Choice>,
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Offsets:")?;
        for (n, v) in self.max_offsets.iter().enumerate() {
            if n > 0 {
                write!(f, ",")?;
            }
            write!(f, " {v}")?;
        }
        write!(f, "; Choices:")?;
        for (n, c) in self.choices.iter().enumerate() {
            if n > 0 {
                write!(f, ",")?;
            }
            let strs: Vec<String> = c
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect();
            write!(f, " [{}]", strs.join(" | "))?;
        }
        write!(f, "}}")
    }
}

/// A subsequence hit or a progress report from a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WacEvent {
    Hit {
        /// Sequence index, then choice slot index.
        index: (usize, usize),
        offset: i64,
        length: usize,
    },
    Progress { offset: i64 },
}

const NONE: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Out {
    max: i64,
    seq: usize,
    sub: usize,
    len: usize,
}

enum Trans {
    Wide { keys: Vec<u8>, gotos: Box<[u32; 256]> },
    Narrow(Vec<(u8, u32)>),
}

impl Trans {
    fn new(wide: bool) -> Trans {
        if wide {
            Trans::Wide { keys: Vec::new(), gotos: Box::new([NONE; 256]) }
        } else {
            Trans::Narrow(Vec::new())
        }
    }

    fn get(&self, b: u8) -> Option<u32> {
        match self {
            Trans::Wide { gotos, .. } => {
                let n = gotos[b as usize];
                (n != NONE).then_some(n)
            }
            Trans::Narrow(links) => links
                .binary_search_by_key(&b, |&(k, _)| k)
                .ok()
                .map(|i| links[i].1),
        }
    }

    fn children(&self) -> Vec<u32> {
        match self {
            Trans::Wide { keys, gotos } => keys.iter().map(|&k| gotos[k as usize]).collect(),
            Trans::Narrow(links) => links.iter().map(|&(_, n)| n).collect(),
        }
    }
}

struct Node {
    val: u8,
    trans: Trans,
    fail: u32,
    output: Vec<Out>,
    out_max: i64,
    out_max_l: usize,
}

// preconditions record the end offset of the first hit per choice slot,
// so later slots only fire after an earlier, non-overlapping hit
type Precons = Vec<Vec<i64>>;

struct PreconPool {
    template: Vec<usize>,
    free: Mutex<Vec<Precons>>,
}

impl PreconPool {
    fn new(seqs: &[Seq]) -> PreconPool {
        PreconPool {
            template: seqs.iter().map(|s| s.choices.len()).collect(),
            free: Mutex::new(Vec::new()),
        }
    }

    fn get(&self) -> Precons {
        let mut free = self.free.lock().unwrap();
        match free.pop() {
            Some(mut p) => {
                for row in &mut p {
                    row.fill(0);
                }
                p
            }
            None => self.template.iter().map(|&n| vec![0; n]).collect(),
        }
    }

    fn put(&self, p: Precons) {
        self.free.lock().unwrap().push(p);
    }
}

/// The compiled automaton. Safe to share across scans.
pub struct Wac {
    nodes: Vec<Node>,
    zero: u32,
    root: u32,
    wide: bool,
    pool: PreconPool,
}

impl Wac {
    /// Builds the two-trie automaton with full transition tables.
    pub fn new(seqs: &[Seq]) -> Wac {
        let mut wac = Wac {
            nodes: Vec::new(),
            zero: 0,
            root: 0,
            wide: true,
            pool: PreconPool::new(seqs),
        };
        let zero = wac.push_node(0);
        wac.add_gotos(zero, seqs, true);
        let root = wac.add_fails(zero, true);
        wac.add_gotos(root, seqs, false);
        wac.add_fails(root, false);
        wac.zero = zero;
        wac.root = root;
        wac
    }

    /// Builds a single-trie automaton with sorted-slice transitions.
    pub fn new_low_mem(seqs: &[Seq]) -> Wac {
        let mut wac = Wac {
            nodes: Vec::new(),
            zero: 0,
            root: 0,
            wide: false,
            pool: PreconPool::new(seqs),
        };
        let root = wac.push_node(0);
        wac.add_gotos(root, seqs, true);
        wac.add_fails(root, false);
        wac.zero = root;
        wac.root = root;
        wac
    }

    fn push_node(&mut self, val: u8) -> u32 {
        let wide = self.wide;
        self.nodes.push(Node {
            val,
            trans: Trans::new(wide),
            fail: NONE,
            output: Vec::new(),
            out_max: 0,
            out_max_l: 0,
        });
        (self.nodes.len() - 1) as u32
    }

    fn put(&mut self, from: u32, b: u8) -> u32 {
        if let Some(n) = self.nodes[from as usize].trans.get(b) {
            return n;
        }
        let n = self.push_node(b);
        match &mut self.nodes[from as usize].trans {
            Trans::Wide { keys, gotos } => {
                keys.push(b);
                gotos[b as usize] = n;
            }
            Trans::Narrow(links) => {
                let i = links.partition_point(|&(k, _)| k < b);
                links.insert(i, (b, n));
            }
        }
        n
    }

    fn get(&self, from: u32, b: u8) -> Option<u32> {
        self.nodes[from as usize].trans.get(b)
    }

    fn contains(&self, node: u32, o: Out) -> bool {
        self.nodes[node as usize].output.contains(&o)
    }

    fn add_output(&mut self, node: u32, o: Out) {
        let n = &mut self.nodes[node as usize];
        if n.output.is_empty() {
            n.out_max = o.max;
            n.out_max_l = o.len;
            n.output.push(o);
            return;
        }
        // out_max tracks the loosest gate, out_max_l the longest slice
        if n.out_max > -1 && (o.max == -1 || o.max > n.out_max) {
            n.out_max = o.max;
        }
        if o.len > n.out_max_l {
            n.out_max_l = o.len;
        }
        n.output.push(o);
    }

    fn add_gotos(&mut self, start: u32, seqs: &[Seq], zero: bool) {
        for (id, seq) in seqs.iter().enumerate() {
            for (i, choice) in seq.choices.iter().enumerate() {
                // the main trie omits slots anchored at offset zero
                if !zero && i == 0 && seq.max_offsets[0] == 0 {
                    continue;
                }
                for byts in choice {
                    let mut curr = start;
                    for &byt in byts {
                        curr = self.put(curr, byt);
                    }
                    self.add_output(curr, Out { max: seq.max_offsets[i], seq: id, sub: i, len: byts.len() });
                }
            }
        }
    }

    fn add_fails(&mut self, start: u32, zero: bool) -> u32 {
        // start and its direct children fail to start
        self.nodes[start as usize].fail = start;
        for c in self.nodes[start as usize].trans.children() {
            self.nodes[c as usize].fail = start;
        }
        // breadth first walk assigning fails and inheriting outputs
        let mut queue = std::collections::VecDeque::with_capacity(64);
        queue.push_back(start);
        while let Some(pop) = queue.pop_front() {
            for node in self.nodes[pop as usize].trans.children() {
                queue.push_back(node);
                let val = self.nodes[node as usize].val;
                // follow the parent's fails back towards start, stopping at
                // the first with a goto on this node's value
                let mut fail = self.nodes[pop as usize].fail;
                let mut hop = self.get(fail, val);
                while fail != start && hop.is_none() {
                    fail = self.nodes[fail as usize].fail;
                    hop = self.get(fail, val);
                }
                self.nodes[node as usize].fail = match hop {
                    Some(f) if f != node => f,
                    _ => start,
                };
                // inherit outputs along the fail chain
                let mut fail = self.nodes[node as usize].fail;
                while fail != start {
                    for i in 0..self.nodes[fail as usize].output.len() {
                        let o = self.nodes[fail as usize].output[i];
                        if !self.contains(node, o) {
                            self.add_output(node, o);
                        }
                    }
                    fail = self.nodes[fail as usize].fail;
                }
            }
        }
        // the zero trie's fails are rewritten to land in the main trie
        if zero {
            let root = self.push_node(0);
            self.nodes[start as usize].fail = root;
            for c in self.nodes[start as usize].trans.children() {
                self.nodes[c as usize].fail = root;
            }
            return root;
        }
        start
    }

    /// Scans `input`, handing hits and progress reports to `emit` until the
    /// input ends or `emit` breaks.
    pub fn scan<I, F>(&self, input: I, mut emit: F)
    where
        I: IntoIterator<Item = u8>,
        F: FnMut(WacEvent) -> ControlFlow<()>,
    {
        let mut precons = self.pool.get();
        let _ = self.run(input, &mut precons, &mut emit);
        self.pool.put(precons);
    }

    fn run<I, F>(&self, input: I, precons: &mut Precons, emit: &mut F) -> ControlFlow<()>
    where
        I: IntoIterator<Item = u8>,
        F: FnMut(WacEvent) -> ControlFlow<()>,
    {
        let mut offset: i64 = 0;
        let mut curr = self.zero;
        for c in input {
            offset += 1;
            curr = match self.get(curr, c) {
                Some(t) => t,
                None => {
                    let mut cur = curr;
                    let mut found = None;
                    while cur != self.root {
                        cur = self.nodes[cur as usize].fail;
                        if let Some(t) = self.get(cur, c) {
                            found = Some(t);
                            break;
                        }
                    }
                    found.unwrap_or(cur)
                }
            };
            let n = &self.nodes[curr as usize];
            if !n.output.is_empty() && (n.out_max == -1 || n.out_max >= offset - n.out_max_l as i64)
            {
                for o in &n.output {
                    if o.max != -1 && o.max < offset - o.len as i64 {
                        continue;
                    }
                    let gate = o.sub == 0
                        || (precons[o.seq][o.sub - 1] != 0
                            && offset - o.len as i64 >= precons[o.seq][o.sub - 1]);
                    if gate {
                        if precons[o.seq][o.sub] == 0 {
                            precons[o.seq][o.sub] = offset;
                        }
                        emit(WacEvent::Hit {
                            index: (o.seq, o.sub),
                            offset: offset - o.len as i64,
                            length: o.len,
                        })?;
                    }
                }
            }
            if offset >= 1024 && (offset as u64).is_power_of_two() {
                emit(WacEvent::Progress { offset })?;
            }
        }
        emit(WacEvent::Progress { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(offs: &[i64], choices: &[&[&str]]) -> Seq {
        Seq {
            max_offsets: offs.to_vec(),
            choices: choices
                .iter()
                .map(|c| c.iter().map(|s| s.as_bytes().to_vec()).collect())
                .collect(),
        }
    }

    fn hits(w: &Wac, input: &[u8]) -> Vec<((usize, usize), i64, usize)> {
        let mut ret = Vec::new();
        w.scan(input.iter().copied(), |ev| {
            if let WacEvent::Hit { index, offset, length } = ev {
                ret.push((index, offset, length));
            }
            ControlFlow::Continue(())
        });
        ret
    }

    #[test]
    fn finds_unanchored_sequences() {
        let w = Wac::new(&[seq(&[-1], &[&["ab"]])]);
        assert_eq!(
            hits(&w, b"xxabxxab"),
            vec![((0, 0), 2, 2), ((0, 0), 6, 2)]
        );
    }

    #[test]
    fn anchored_sequences_only_fire_at_offset_zero() {
        let w = Wac::new(&[seq(&[0], &[&["ab"]])]);
        assert_eq!(hits(&w, b"abxx"), vec![((0, 0), 0, 2)]);
        assert!(hits(&w, b"xabx").is_empty());
        assert!(hits(&w, b"aab").is_empty());
    }

    #[test]
    fn max_offset_windows_gate_hits() {
        let w = Wac::new(&[seq(&[3], &[&["ab"]])]);
        assert_eq!(hits(&w, b"xxxab"), vec![((0, 0), 3, 2)]);
        assert!(hits(&w, b"xxxxab").is_empty());
    }

    #[test]
    fn later_slots_wait_for_earlier_ones() {
        let w = Wac::new(&[seq(&[0, -1], &[&["ab"], &["cd"]])]);
        // second slot without the first never fires
        assert!(hits(&w, b"xxcdxx").is_empty());
        assert_eq!(
            hits(&w, b"abxcd"),
            vec![((0, 0), 0, 2), ((0, 1), 3, 2)]
        );
    }

    #[test]
    fn overlapping_slot_hits_are_suppressed() {
        let w = Wac::new(&[seq(&[0, -1], &[&["ab"], &["bc"]])]);
        // "bc" overlaps the "ab" hit so cannot follow it
        assert_eq!(hits(&w, b"abc"), vec![((0, 0), 0, 2)]);
        assert_eq!(
            hits(&w, b"abxbc"),
            vec![((0, 0), 0, 2), ((0, 1), 3, 2)]
        );
    }

    #[test]
    fn choices_share_a_slot() {
        let w = Wac::new(&[seq(&[-1], &[&["ab", "cd"]])]);
        assert_eq!(
            hits(&w, b"cdxab"),
            vec![((0, 0), 0, 2), ((0, 0), 3, 2)]
        );
    }

    #[test]
    fn multiple_sequences_report_distinct_indexes() {
        let w = Wac::new(&[seq(&[-1], &[&["abc"]]), seq(&[-1], &[&["bcd"]])]);
        let got = hits(&w, b"abcd");
        assert!(got.contains(&((0, 0), 0, 3)));
        assert!(got.contains(&((1, 0), 1, 3)));
    }

    #[test]
    fn suffix_outputs_inherited_through_fails() {
        let w = Wac::new(&[seq(&[-1], &[&["aab"]]), seq(&[-1], &[&["ab"]])]);
        let got = hits(&w, b"xaab");
        assert!(got.contains(&((0, 0), 1, 3)));
        assert!(got.contains(&((1, 0), 2, 2)));
    }

    #[test]
    fn progress_reported_at_powers_of_two_and_end() {
        let w = Wac::new(&[seq(&[-1], &[&["zq"]])]);
        let mut prog = Vec::new();
        let input = vec![0u8; 2500];
        w.scan(input.into_iter(), |ev| {
            if let WacEvent::Progress { offset } = ev {
                prog.push(offset);
            }
            ControlFlow::Continue(())
        });
        assert_eq!(prog, vec![1024, 2048, 2500]);
    }

    #[test]
    fn emit_break_stops_the_scan() {
        let w = Wac::new(&[seq(&[-1], &[&["a"]])]);
        let mut count = 0;
        w.scan(b"aaaa".iter().copied(), |_| {
            count += 1;
            ControlFlow::Break(())
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn low_mem_matches_the_same() {
        let seqs = vec![
            seq(&[0, -1], &[&["ab"], &["cd", "ef"]]),
            seq(&[-1], &[&["abc"]]),
        ];
        let a = Wac::new(&seqs);
        let b = Wac::new_low_mem(&seqs);
        for input in [&b"abxcdxef"[..], b"xxabcxx", b"efab"] {
            assert_eq!(hits(&a, input), hits(&b, input));
        }
    }

    use proptest::prelude::*;

    proptest! {
        // a second-slot hit is reported exactly when a first-slot hit has
        // already ended at or before it, and never otherwise
        #[test]
        fn preconditions_gate_later_slots(haystack in proptest::collection::vec(
            proptest::sample::select(vec![b'a', b'b', b'c', b'd', b'x']),
            0..200,
        )) {
            let w = Wac::new(&[seq(&[-1, -1], &[&["ab"], &["cd"]])]);
            let got = hits(&w, &haystack);
            for &(idx, off, _) in &got {
                if idx == (0, 1) {
                    prop_assert!(
                        got.iter().any(|&(i, o, l)| i == (0, 0) && o + l as i64 <= off),
                        "cd at {} reported with no ab before it", off
                    );
                }
            }
            if let Some(first_ab) = haystack.windows(2).position(|v| v == b"ab") {
                let ab_end = first_ab as i64 + 2;
                for (p, v) in haystack.windows(2).enumerate() {
                    if v == b"cd" && p as i64 >= ab_end {
                        prop_assert!(
                            got.contains(&((0, 1), p as i64, 2)),
                            "cd at {} after ab ending at {} went unreported", p, ab_end
                        );
                    }
                }
            }
        }
    }
}
