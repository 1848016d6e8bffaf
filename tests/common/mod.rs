//! Shared fixtures for the integration tests: a small set of signatures
//! covering fixed, windowed and wild anchors at both ends of the buffer,
//! plus two samples with known outcomes.

use std::sync::Arc;

use crossbeam_channel::bounded;
use sigscan::{Buffer, Frame, Match, Matcher, OffType, Options, Pattern, Signature};

pub const SAMPLE_ONE: &[u8] = b"test12345678910YNESSjunktestyjunktestytest12345678910111223";
pub const SAMPLE_TWO: &[u8] = b"test12345678910YNESSjTESTunktestyjunktestytest12345678910111223";

pub fn seq(s: &str) -> Pattern {
    Pattern::Sequence(s.as_bytes().to_vec())
}

pub fn choice(opts: &[&str]) -> Pattern {
    Pattern::Choice(opts.iter().map(|s| seq(s)).collect())
}

fn test_or_testy() -> Pattern {
    choice(&["test", "testy"])
}

fn yells() -> Pattern {
    choice(&["TESTY", "YNESS"])
}

fn low_bytes() -> Pattern {
    Pattern::Choice((b'a'..=b'j').map(|b| Pattern::Sequence(vec![b])).collect())
}

/// Six signatures:
/// 0: [BOF 0:test] [P 10-20:TESTY|YNESS] [S *:test|testy] [S 0:testy] [E 10-20:test|testy]
/// 1: [BOF 0:test] [P 10-20:TESTY|YNESS] [P 0-1:TEST] [S 0:testy] [S *:test|testy] [E 0:23]
/// 2: [BOF 0-5:a|b|..|j] [P *:test]
/// 3: [BOF 0:test] [P 10-20:TESTY|YNESS] [BOF *:test]
/// 4: [BOF *:junk]
/// 5: [BOF 0:List(test,testy)]
pub fn signatures() -> Vec<Signature> {
    vec![
        vec![
            Frame::fixed(OffType::Bof, 0, seq("test")),
            Frame::window(OffType::Prev, 10, 20, yells()),
            Frame::wild(OffType::Succ, test_or_testy()),
            Frame::fixed(OffType::Succ, 0, seq("testy")),
            Frame::window(OffType::Eof, 10, 20, test_or_testy()),
        ],
        vec![
            Frame::fixed(OffType::Bof, 0, seq("test")),
            Frame::window(OffType::Prev, 10, 20, yells()),
            Frame::window(OffType::Prev, 0, 1, seq("TEST")),
            Frame::fixed(OffType::Succ, 0, seq("testy")),
            Frame::wild(OffType::Succ, test_or_testy()),
            Frame::fixed(OffType::Eof, 0, seq("23")),
        ],
        vec![
            Frame::window(OffType::Bof, 0, 5, low_bytes()),
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

pub fn matcher() -> Arc<Matcher> {
    let mut m = Matcher::new(Options::default());
    m.add(&signatures(), None).unwrap();
    Arc::new(m)
}

/// Runs a scan over an in-memory buffer and collects every match.
pub fn identify(m: &Arc<Matcher>, data: &[u8]) -> Vec<Match> {
    let buf = Arc::new(Buffer::bytes(data.to_vec()).unwrap());
    let (tx, rx) = bounded(8);
    Arc::clone(m).identify(buf, tx);
    rx.iter().collect()
}

/// The distinct signature indexes in a result set. Wild signatures can
/// match at several offsets, so raw results may hold duplicates.
pub fn indexes(results: &[Match]) -> Vec<usize> {
    let mut idxs: Vec<usize> = results.iter().map(|m| m.index).collect();
    idxs.sort_unstable();
    idxs.dedup();
    idxs
}
