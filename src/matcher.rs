//! The matcher: compiles signatures into keyframes, test trees, sequence
//! sets and frame sets, and scans buffers against them.
//!
//! Compilation splits each signature into segments, picks the best
//! searchable sequence (or anchor frame) for each, and clusters adjacent
//! segments into multi-slot automaton sequences whose slot offsets gate
//! false positives. Scanning feeds the BOF frame set, the BOF automaton
//! and, when any signature reaches back from the end of the file, the EOF
//! frame set and automaton into the scorer, which assembles keyframe hits
//! into results.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::{bounded, Sender};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::Buffer;
use crate::error::{BufferError, SignatureError};
use crate::frames::{Frame, Sequencer, Signature};
use crate::keyframes::{
    self, cross_over, to_key_frame, unknown_bof_and_eof, update_positions, KeyFrame, KeyFrameId,
};
use crate::priority::{self, List};
use crate::scorer::{Hit, Match, Scorer, Strike};
use crate::segment::{bof_length, characterise, eof_length, segment, var_length, Position, SegType};
use crate::sets::{FrameSet, SeqSet};
use crate::testtree::{max_length, TestTree};
use crate::wac::{Seq, Wac, WacEvent};

// strikes in flight between the scanners and the scorer
const STRIKE_BUF: usize = 100;

/// Tuning for signature compilation and scanning.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Options {
    /// Largest gap between segments before a signature is split.
    pub distance: i64,
    /// Largest total offset variability before a signature is split.
    pub range: i64,
    /// Cap on the choice combinations flattened into sequences.
    pub choices: usize,
    /// Flatten window segments into sequences rather than frame sets.
    pub var_length: bool,
    /// Clamp on BOF-anchored offsets; zero leaves them unclamped.
    pub max_bof: i64,
    /// Clamp on EOF-anchored offsets; zero leaves them unclamped.
    pub max_eof: i64,
    /// Build single-tree automata, trading scan speed for memory.
    pub low_memory: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            distance: 8192,
            range: 2049,
            choices: 64,
            var_length: true,
            max_bof: 0,
            max_eof: 0,
            low_memory: false,
        }
    }
}

/// A compiled set of byte signatures.
#[derive(Default, Serialize, Deserialize)]
pub struct Matcher {
    pub(crate) key_frames: Vec<Vec<KeyFrame>>,
    pub(crate) tests: Vec<TestTree>,
    bof_frames: FrameSet,
    eof_frames: FrameSet,
    bof_seq: SeqSet,
    eof_seq: SeqSet,
    unknown_bof: Vec<KeyFrameId>,
    unknown_eof: Vec<KeyFrameId>,
    max_bof: i64,
    max_eof: i64,
    pub(crate) known_bof: i64,
    pub(crate) known_eof: i64,
    priorities: priority::Set,
    options: Options,
    #[serde(skip)]
    bof_wac: OnceLock<Wac>,
    #[serde(skip)]
    eof_wac: OnceLock<Wac>,
}

impl Matcher {
    pub fn new(options: Options) -> Matcher {
        Matcher { options, ..Matcher::default() }
    }

    /// Number of signatures compiled in.
    pub fn len(&self) -> usize {
        self.key_frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_frames.is_empty()
    }

    /// Compiles a batch of signatures, with an optional priority list of
    /// the same length. Returns the total signature count. A batch is
    /// all-or-nothing: if any signature fails, the matcher is left
    /// exactly as it was.
    pub fn add(
        &mut self,
        sigs: &[Signature],
        priorities: Option<List>,
    ) -> Result<usize, SignatureError> {
        if sigs.is_empty() {
            return Ok(self.key_frames.len());
        }
        // compile into a staging copy so a failing signature cannot leave
        // half a batch behind
        let mut staged = self.staged();
        let mut errs = Vec::new();
        let (mut bof, mut eof) = (0i64, 0i64);
        for sig in sigs {
            match staged.add_signature(sig) {
                Ok(()) => {
                    if let Some(kf) = staged.key_frames.last() {
                        bof = keyframes::max_bof(bof, kf);
                        eof = keyframes::max_eof(eof, kf);
                    }
                }
                Err(e) => errs.push(e),
            }
        }
        if !errs.is_empty() {
            return Err(SignatureError::Batch(errs));
        }
        // size the test slices now every tree in the batch is final
        for t in &mut staged.tests {
            t.max_left_distance = max_length(&t.left);
            t.max_right_distance = max_length(&t.right);
        }
        let l = priorities.unwrap_or_else(|| vec![None; sigs.len()]);
        staged.priorities.add(l, sigs.len(), bof, eof);
        *self = staged;
        Ok(self.key_frames.len())
    }

    // a copy of the compiled state with the automata left unbuilt, so
    // a merged batch cannot scan against stale sequence sets
    fn staged(&self) -> Matcher {
        Matcher {
            key_frames: self.key_frames.clone(),
            tests: self.tests.clone(),
            bof_frames: self.bof_frames.clone(),
            eof_frames: self.eof_frames.clone(),
            bof_seq: self.bof_seq.clone(),
            eof_seq: self.eof_seq.clone(),
            unknown_bof: self.unknown_bof.clone(),
            unknown_eof: self.unknown_eof.clone(),
            max_bof: self.max_bof,
            max_eof: self.max_eof,
            known_bof: self.known_bof,
            known_eof: self.known_eof,
            priorities: self.priorities.clone(),
            options: self.options,
            bof_wac: OnceLock::new(),
            eof_wac: OnceLock::new(),
        }
    }

    fn add_signature(&mut self, sig: &Signature) -> Result<(), SignatureError> {
        let opts = self.options;
        let segments = segment(sig, opts.distance, opts.range);
        let mut kf: Vec<KeyFrame> = Vec::with_capacity(segments.len());
        let mut clstr = Cluster::default();
        for (i, seg) in segments.iter().enumerate() {
            let c = characterise(seg);
            let pos = match c {
                SegType::Unknown => {
                    return Err(SignatureError::ZeroLengthSegment {
                        signature: self.key_frames.len(),
                        segment: i,
                    })
                }
                SegType::BofZero => bof_length(seg, opts.choices),
                SegType::EofZero => eof_length(seg, opts.choices),
                SegType::BofWindow | SegType::EofWindow if !opts.var_length => {
                    Position { length: 0, start: 0, end: 0 }
                }
                _ => var_length(seg, opts.choices),
            };
            if pos.length < 1 {
                match c {
                    SegType::BofZero | SegType::BofWindow => {
                        kf.push(self.add_to_frame_set(seg, i, false, 0, 1));
                    }
                    SegType::EofZero | SegType::EofWindow => {
                        kf.push(self.add_to_frame_set(seg, i, true, seg.len() - 1, seg.len()));
                    }
                    _ => {
                        return Err(SignatureError::Unanchored {
                            signature: self.key_frames.len(),
                            segment: i,
                        })
                    }
                }
                continue;
            }
            match c {
                SegType::BofZero | SegType::BofWild => {
                    clstr = self.commit(clstr);
                    kf.push(clstr.add(seg, i, pos));
                }
                SegType::BofWindow => {
                    if i > 0 {
                        let (kfb, _, _) = to_key_frame(seg, pos);
                        if cross_over(&kf[i - 1], &kfb) {
                            clstr = self.commit(clstr);
                        }
                    } else {
                        clstr = self.commit(clstr);
                    }
                    kf.push(clstr.add(seg, i, pos));
                }
                SegType::Succ => {
                    if !clstr.rev {
                        clstr = self.commit(clstr);
                        clstr.rev = true;
                    }
                    kf.push(clstr.add(seg, i, pos));
                }
                SegType::EofZero | SegType::EofWindow | SegType::EofWild => {
                    if !clstr.rev {
                        clstr = self.commit(clstr);
                        clstr.rev = true;
                    }
                    kf.push(clstr.add(seg, i, pos));
                    clstr = self.commit(clstr);
                    clstr.rev = true;
                }
                _ => {
                    kf.push(clstr.add(seg, i, pos));
                }
            }
        }
        self.commit(clstr);
        update_positions(&mut kf, opts.max_bof, opts.max_eof);
        let (ub, ue) = unknown_bof_and_eof(self.key_frames.len(), &kf);
        self.unknown_bof.extend(ub);
        self.unknown_eof.extend(ue);
        self.max_bof = keyframes::max_bof(self.max_bof, &kf);
        self.max_eof = keyframes::max_eof(self.max_eof, &kf);
        let kb = keyframes::known_bof(&kf);
        self.known_bof = if self.known_bof < 0 || kb < 0 { -1 } else { self.known_bof.max(kb) };
        let ke = keyframes::known_eof(&kf);
        self.known_eof = if self.known_eof < 0 || ke < 0 { -1 } else { self.known_eof.max(ke) };
        self.key_frames.push(kf);
        Ok(())
    }

    // flushes a cluster into the sequence sets and test trees, returning a
    // fresh forward cluster
    fn commit(&mut self, clstr: Cluster) -> Cluster {
        if clstr.w.choices.is_empty() {
            return Cluster::default();
        }
        let Cluster { rev, mut kfs, mut w, ks, lefts, rights } = clstr;
        update_positions(&mut kfs, self.options.max_bof, self.options.max_eof);
        w.max_offsets = if rev {
            kfs.iter().rev().map(|k| k.key.pmax).collect()
        } else {
            kfs.iter().map(|k| k.key.pmax).collect()
        };
        let ss = if rev { &mut self.eof_seq } else { &mut self.bof_seq };
        let hi = ss.add(w, self.tests.len());
        if hi == self.tests.len() {
            for _ in 0..ks.len() {
                self.tests.push(TestTree::default());
            }
        }
        for (i, &k) in ks.iter().enumerate() {
            self.tests[hi + i].add((self.key_frames.len(), k), &lefts[i], &rights[i]);
        }
        Cluster::default()
    }

    fn add_to_frame_set(
        &mut self,
        seg: &Signature,
        i: usize,
        rev: bool,
        start: usize,
        end: usize,
    ) -> KeyFrame {
        let (k, left, right) = to_key_frame(seg, Position { length: 0, start, end });
        let fs = if rev { &mut self.eof_frames } else { &mut self.bof_frames };
        let hi = fs.add(seg[start].clone(), self.tests.len());
        if hi == self.tests.len() {
            self.tests.push(TestTree::default());
        }
        self.tests[hi].add((self.key_frames.len(), i), &left, &right);
        k
    }

    /// Scans a buffer against the compiled signatures, sending matches on
    /// `results` as they are proven. Returns as soon as the scan is under
    /// way: the scanners run on a producer thread feeding a bounded strike
    /// channel whose sole consumer is the scorer on a second thread, so a
    /// slow or paused result receiver never blocks the caller. The scan
    /// winds down when it completes, the buffer's quit flag is raised, or
    /// the result receiver hangs up.
    pub fn identify(self: Arc<Self>, buf: Arc<Buffer>, results: Sender<Match>) {
        let (tx, rx) = bounded(STRIKE_BUF);
        let quit = buf.quit_flag();
        let m = Arc::clone(&self);
        let b = Arc::clone(&buf);
        thread::spawn(move || match m.scan(&b, &quit, &tx) {
            // read errors end the scan; the scorer keeps what arrived
            Ok(()) | Err(BufferError::Quit) => {}
            Err(e) => debug!(error = %e, "scan ended early"),
        });
        thread::spawn(move || {
            let wait_set = self.priorities.wait_set();
            let mut scorer = Scorer::new(&self, &buf, &wait_set, results);
            for st in rx {
                scorer.score(st);
            }
        });
    }

    // the scanner phases are sequenced by data dependency: the frame sets
    // are cheap head/tail probes, and the reverse passes need the stream
    // fully read
    fn scan(
        &self,
        buf: &Buffer,
        quit: &AtomicBool,
        strikes: &Sender<Strike>,
    ) -> Result<(), BufferError> {
        use std::ops::ControlFlow;

        let push = |st: Strike| -> ControlFlow<()> {
            if quit.load(Ordering::Relaxed) || strikes.send(st).is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        self.bof_frames.scan(buf, false, |m| {
            push(Strike::Hit(Hit {
                idxa: self.bof_frames.test_tree_index[m.idx],
                idxb: 0,
                offset: m.off,
                length: m.length,
                reverse: false,
                frame: true,
            }))
        })?;
        if quit.load(Ordering::Relaxed) {
            return Ok(());
        }

        let bof_wac = self.bof_wac.get_or_init(|| self.build_wac(&self.bof_seq.set));
        bof_wac.scan(buf.iter_forward(self.max_bof), |ev| {
            push(match ev {
                WacEvent::Hit { index, offset, length } => Strike::Hit(Hit {
                    idxa: self.bof_seq.test_tree_index[index.0],
                    idxb: index.1,
                    offset,
                    length,
                    reverse: false,
                    frame: false,
                }),
                WacEvent::Progress { offset } => Strike::Progress { offset, reverse: false },
            })
        });
        if quit.load(Ordering::Relaxed) {
            return Ok(());
        }

        if self.max_eof != 0 {
            // force a full read so reverse slicing works on streams
            buf.can_seek(0, true)?;
            self.eof_frames.scan(buf, true, |m| {
                push(Strike::Hit(Hit {
                    idxa: self.eof_frames.test_tree_index[m.idx],
                    idxb: 0,
                    offset: m.off,
                    length: m.length,
                    reverse: true,
                    frame: true,
                }))
            })?;
            if quit.load(Ordering::Relaxed) {
                return Ok(());
            }
            let eof_wac = self.eof_wac.get_or_init(|| self.build_wac(&self.eof_seq.set));
            eof_wac.scan(buf.iter_reverse(self.max_eof), |ev| {
                push(match ev {
                    WacEvent::Hit { index, offset, length } => Strike::Hit(Hit {
                        idxa: self.eof_seq.test_tree_index[index.0],
                        idxb: index.1,
                        offset,
                        length,
                        reverse: true,
                        frame: false,
                    }),
                    WacEvent::Progress { offset } => Strike::Progress { offset, reverse: true },
                })
            });
        }
        Ok(())
    }

    fn build_wac(&self, seqs: &[Seq]) -> Wac {
        debug!(seqs = seqs.len(), low_memory = self.options.low_memory, "building automaton");
        if self.options.low_memory {
            Wac::new_low_mem(seqs)
        } else {
            Wac::new(seqs)
        }
    }

    /// Serialises the matcher with MessagePack. Automata are rebuilt
    /// lazily on first scan after a load.
    pub fn save(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn load(b: &[u8]) -> Result<Matcher, rmp_serde::decode::Error> {
        rmp_serde::from_slice(b)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BOF seqs: {}", self.bof_seq.set.len())?;
        writeln!(f, "EOF seqs: {}", self.eof_seq.set.len())?;
        writeln!(f, "BOF frames: {}", self.bof_frames.set.len())?;
        writeln!(f, "EOF frames: {}", self.eof_frames.set.len())?;
        writeln!(f, "total test trees: {}", self.tests.len())?;
        let (mut c, mut ic, mut l, mut r, mut ml, mut mr) = (0, 0, 0, 0, 0, 0);
        for t in &self.tests {
            c += t.complete.len();
            ic += t.incomplete.len();
            l += t.left.len();
            r += t.right.len();
            ml = ml.max(t.max_left_distance);
            mr = mr.max(t.max_right_distance);
        }
        writeln!(f, "complete tests: {c}")?;
        writeln!(f, "incomplete tests: {ic}")?;
        writeln!(f, "left tests: {l}, max distance: {ml}")?;
        writeln!(f, "right tests: {r}, max distance: {mr}")?;
        writeln!(f, "unexcludable wild BOF segments: {}", self.unknown_bof.len())?;
        writeln!(f, "unexcludable wild EOF segments: {}", self.unknown_eof.len())?;
        writeln!(f, "max BOF distance: {}", self.max_bof)?;
        write!(f, "max EOF distance: {}", self.max_eof)
    }
}

/// Accumulates adjacent segments whose sequences share one automaton
/// entry; slot offsets come from the keyframes once positions settle.
#[derive(Default)]
struct Cluster {
    rev: bool,
    kfs: Vec<KeyFrame>,
    w: Seq,
    ks: Vec<usize>,
    lefts: Vec<Vec<Frame>>,
    rights: Vec<Vec<Frame>>,
}

impl Cluster {
    fn add(&mut self, seg: &Signature, i: usize, pos: Position) -> KeyFrame {
        let mut sequencer = Sequencer::new(self.rev);
        let (k, left, right) = to_key_frame(seg, pos);
        self.kfs.push(k);
        if self.rev {
            // backwards, so the automaton can run over a reverse iterator
            for j in (pos.start..pos.end).rev() {
                sequencer.add(&seg[j]);
            }
            self.w.choices.insert(0, sequencer.into_seqs());
            self.ks.insert(0, i);
            self.lefts.insert(0, left);
            self.rights.insert(0, right);
        } else {
            for f in &seg[pos.start..pos.end] {
                sequencer.add(f);
            }
            self.w.choices.push(sequencer.into_seqs());
            self.ks.push(i);
            self.lefts.push(left);
            self.rights.push(right);
        }
        k
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::OffType;
    use crate::patterns::Pattern;

    fn seq(s: &str) -> Pattern {
        Pattern::Sequence(s.as_bytes().to_vec())
    }

    fn choice(opts: &[&str]) -> Pattern {
        Pattern::Choice(opts.iter().map(|s| seq(s)).collect())
    }

    fn sigs() -> Vec<Signature> {
        let tt = || choice(&["test", "testy"]);
        let yells = || choice(&["TESTY", "YNESS"]);
        vec![
            vec![
                Frame::fixed(OffType::Bof, 0, seq("test")),
                Frame::window(OffType::Prev, 10, 20, yells()),
                Frame::wild(OffType::Succ, tt()),
                Frame::fixed(OffType::Succ, 0, seq("testy")),
                Frame::window(OffType::Eof, 10, 20, tt()),
            ],
            vec![
                Frame::fixed(OffType::Bof, 0, seq("test")),
                Frame::window(OffType::Prev, 10, 20, yells()),
                Frame::window(OffType::Prev, 0, 1, seq("TEST")),
                Frame::fixed(OffType::Succ, 0, seq("testy")),
                Frame::wild(OffType::Succ, tt()),
                Frame::fixed(OffType::Eof, 0, seq("23")),
            ],
            vec![
                Frame::window(
                    OffType::Bof,
                    0,
                    5,
                    Pattern::Choice((b'a'..=b'j').map(|b| Pattern::Sequence(vec![b])).collect()),
                ),
                Frame::wild(OffType::Prev, seq("test")),
            ],
            vec![
                Frame::fixed(OffType::Bof, 0, seq("test")),
                Frame::window(OffType::Prev, 10, 20, yells()),
                Frame::wild(OffType::Bof, seq("test")),
            ],
            vec![Frame::wild(OffType::Bof, seq("junk"))],
            vec![Frame::fixed(OffType::Bof, 0, Pattern::List(vec![seq("test"), seq("testy")]))],
        ]
    }

    #[test]
    fn compilation_shares_sequences_and_tests() {
        let mut m = Matcher::new(Options {
            distance: 8192,
            range: 2059,
            choices: 9,
            ..Options::default()
        });
        let n = m.add(&sigs(), None).unwrap();
        assert_eq!(n, 6);
        let total: usize = m.key_frames.iter().map(Vec::len).sum();
        assert_eq!(total, 12);
        assert_eq!(m.tests.len(), 9);
        // identical head anchors compile to a single sequence
        assert_eq!(m.bof_seq.set.len(), 4);
        assert_eq!(m.bof_seq.set[0].max_offsets, vec![0]);
        assert_eq!(m.bof_seq.set[0].choices, vec![vec![b"test".to_vec()]]);
        assert_eq!(m.eof_seq.set.len(), 2);
        // ten single-byte choices blow a choice budget of nine, so that
        // window falls back to the frame set
        assert_eq!(m.bof_frames.set.len(), 1);
        assert_eq!(m.eof_frames.set.len(), 0);
    }

    #[test]
    fn scan_horizons_aggregate_across_signatures() {
        let mut m = Matcher::new(Options::default());
        m.add(&sigs(), None).unwrap();
        // wild BOF and SUCC segments leave both directions unbounded
        assert_eq!(m.max_bof, -1);
        assert_eq!(m.max_eof, -1);
        assert_eq!(m.known_bof, -1);
    }

    #[test]
    fn unanchored_segment_rejects_the_batch() {
        let mut m = Matcher::new(Options { choices: 2, ..Options::default() });
        let sig = vec![Frame::wild(OffType::Prev, choice(&["a", "b", "c"]))];
        let err = m.add(&[sig], None).unwrap_err();
        assert!(matches!(err, SignatureError::Batch(_)));
        assert!(m.is_empty());
    }

    #[test]
    fn failed_batch_leaves_no_residue() {
        let mut m = Matcher::new(Options { choices: 2, ..Options::default() });
        let batch = vec![
            vec![Frame::fixed(OffType::Bof, 0, seq("zz"))],
            vec![Frame::wild(OffType::Prev, choice(&["a", "b", "c"]))],
        ];
        assert!(m.add(&batch, None).is_err());
        assert!(m.is_empty());
        assert_eq!(m.tests.len(), 0);
        assert_eq!(m.bof_seq.set.len(), 0);

        // the next valid batch claims index 0; the failed batch's "zz"
        // anchor must not have survived as a stale test entry
        m.add(&[vec![Frame::fixed(OffType::Bof, 0, seq("ok"))]], None).unwrap();
        let m = Arc::new(m);
        let buf = Arc::new(Buffer::bytes(b"zz ok zz".to_vec()).unwrap());
        let (tx, rx) = bounded(4);
        Arc::clone(&m).identify(buf, tx);
        assert!(rx.iter().next().is_none());
        let buf = Arc::new(Buffer::bytes(b"okzz".to_vec()).unwrap());
        let (tx, rx) = bounded(4);
        m.identify(buf, tx);
        let res: Vec<_> = rx.iter().collect();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].index, 0);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut m = Matcher::new(Options::default());
        assert_eq!(m.add(&[], None).unwrap(), 0);
        assert!(m.is_empty());
    }
}
