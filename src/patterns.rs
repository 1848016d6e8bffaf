//! Pattern algebra: the smallest building blocks of a byte signature.
//!
//! A pattern tests a window of bytes anchored at the window's left edge
//! (or right edge for reverse tests) and reports every length at which it
//! matched, plus a skip hint for the caller's scan loop. Patterns that
//! stand for a finite set of literal byte strings can enumerate that set
//! so the compiler can feed them to the automaton; `num_sequences`
//! returning 0 means the pattern declines (unbounded or too branchy).
//!
//! Invariants:
//! - `test` never reads past the window.
//! - A skip hint of 0 means the window was shorter than the pattern's
//!   minimum length; any other hint is a safe forward advance.
//! - `sequences` may only be called when `num_sequences() > 0`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A matchable unit of a signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    /// An exact byte string.
    Sequence(Vec<u8>),
    /// Matches if any child matches.
    Choice(Vec<Pattern>),
    /// Matches if all children match consecutively.
    List(Vec<Pattern>),
    /// Matches a single position iff the wrapped pattern does not.
    /// Only meaningful over one-byte patterns.
    Not(Box<Pattern>),
    /// Matches one byte b iff `b & mask == mask`.
    Mask(u8),
    /// Matches one byte b iff `b & mask != 0`.
    AnyMask(u8),
}

impl Pattern {
    /// Tests the pattern against the left edge of `b`.
    ///
    /// Returns every length at which the pattern matched (empty when it
    /// did not) and a skip hint: 0 when `b` is too short to ever match,
    /// otherwise the number of bytes the caller may safely advance.
    pub fn test(&self, b: &[u8]) -> (Vec<usize>, usize) {
        match self {
            Pattern::Sequence(s) => {
                if b.len() < s.len() {
                    return (Vec::new(), 0);
                }
                if &b[..s.len()] == s.as_slice() {
                    (vec![s.len()], 1)
                } else {
                    (Vec::new(), 1)
                }
            }
            Pattern::Choice(c) => choice_test(c, b, Pattern::test),
            Pattern::List(l) => list_test(l, b, false),
            Pattern::Not(p) => {
                let (min, _) = p.length();
                if b.len() < min {
                    return (Vec::new(), 0);
                }
                let (hits, _) = p.test(b);
                if hits.is_empty() {
                    (vec![min], 1)
                } else {
                    (Vec::new(), 1)
                }
            }
            Pattern::Mask(m) => match b.first() {
                None => (Vec::new(), 0),
                Some(&v) if v & m == *m => (vec![1], 1),
                Some(_) => (Vec::new(), 1),
            },
            Pattern::AnyMask(m) => match b.first() {
                None => (Vec::new(), 0),
                Some(&v) if v & m != 0 => (vec![1], 1),
                Some(_) => (Vec::new(), 1),
            },
        }
    }

    /// Tests the pattern against the right edge of `b`.
    pub fn test_r(&self, b: &[u8]) -> (Vec<usize>, usize) {
        match self {
            Pattern::Sequence(s) => {
                if b.len() < s.len() {
                    return (Vec::new(), 0);
                }
                if &b[b.len() - s.len()..] == s.as_slice() {
                    (vec![s.len()], 1)
                } else {
                    (Vec::new(), 1)
                }
            }
            Pattern::Choice(c) => choice_test(c, b, Pattern::test_r),
            Pattern::List(l) => list_test(l, b, true),
            Pattern::Not(p) => {
                let (min, _) = p.length();
                if b.len() < min {
                    return (Vec::new(), 0);
                }
                let (hits, _) = p.test_r(b);
                if hits.is_empty() {
                    (vec![min], 1)
                } else {
                    (Vec::new(), 1)
                }
            }
            Pattern::Mask(m) => match b.last() {
                None => (Vec::new(), 0),
                Some(&v) if v & m == *m => (vec![1], 1),
                Some(_) => (Vec::new(), 1),
            },
            Pattern::AnyMask(m) => match b.last() {
                None => (Vec::new(), 0),
                Some(&v) if v & m != 0 => (vec![1], 1),
                Some(_) => (Vec::new(), 1),
            },
        }
    }

    /// Minimum and maximum lengths of the pattern.
    pub fn length(&self) -> (usize, usize) {
        match self {
            Pattern::Sequence(s) => (s.len(), s.len()),
            Pattern::Choice(c) => {
                let (mut min, mut max) = c.first().map(Pattern::length).unwrap_or((0, 0));
                for p in c {
                    let (pmin, pmax) = p.length();
                    min = min.min(pmin);
                    max = max.max(pmax);
                }
                (min, max)
            }
            Pattern::List(l) => l.iter().fold((0, 0), |(min, max), p| {
                let (pmin, pmax) = p.length();
                (min + pmin, max + pmax)
            }),
            Pattern::Not(p) => {
                let (min, _) = p.length();
                (min, min)
            }
            Pattern::Mask(_) | Pattern::AnyMask(_) => (1, 1),
        }
    }

    /// Number of plain byte strings this pattern stands for; 0 means the
    /// pattern declines to enumerate.
    pub fn num_sequences(&self) -> usize {
        match self {
            Pattern::Sequence(_) => 1,
            Pattern::Choice(c) => {
                let mut sum = 0;
                for p in c {
                    let n = p.num_sequences();
                    if n == 0 {
                        return 0;
                    }
                    sum += n;
                }
                sum
            }
            Pattern::List(l) => {
                let mut prod = 1;
                for p in l {
                    let n = p.num_sequences();
                    if n == 0 {
                        return 0;
                    }
                    prod *= n;
                }
                prod
            }
            Pattern::Not(p) => {
                let (_, max) = p.length();
                if max > 1 {
                    return 0;
                }
                let n = p.num_sequences();
                if n == 0 {
                    0
                } else {
                    256 - n
                }
            }
            Pattern::Mask(m) => 256 >> m.count_ones(),
            Pattern::AnyMask(m) => 256 - (256 >> m.count_ones()),
        }
    }

    /// Enumerates the plain byte strings this pattern stands for.
    /// Only valid when `num_sequences() > 0`.
    pub fn sequences(&self) -> Vec<Vec<u8>> {
        match self {
            Pattern::Sequence(s) => vec![s.clone()],
            Pattern::Choice(c) => c.iter().flat_map(Pattern::sequences).collect(),
            Pattern::List(l) => {
                if self.num_sequences() == 0 {
                    return Vec::new();
                }
                // cross product, first member varying slowest
                let mut seqs: Vec<Vec<u8>> = vec![Vec::new()];
                for p in l {
                    let subs = p.sequences();
                    let mut next = Vec::with_capacity(seqs.len() * subs.len());
                    for s in &seqs {
                        for sub in &subs {
                            let mut joined = Vec::with_capacity(s.len() + sub.len());
                            joined.extend_from_slice(s);
                            joined.extend_from_slice(sub);
                            next.push(joined);
                        }
                    }
                    seqs = next;
                }
                seqs
            }
            Pattern::Not(p) => {
                if self.num_sequences() == 0 {
                    return Vec::new();
                }
                let excluded = p.sequences();
                (0u16..256)
                    .map(|i| vec![i as u8])
                    .filter(|s| !excluded.contains(s))
                    .collect()
            }
            Pattern::Mask(m) => (0u16..256)
                .map(|i| i as u8)
                .filter(|b| b & m == *m)
                .map(|b| vec![b])
                .collect(),
            Pattern::AnyMask(m) => (0u16..256)
                .map(|i| i as u8)
                .filter(|b| b & m != 0)
                .map(|b| vec![b])
                .collect(),
        }
    }
}

fn choice_test(
    c: &[Pattern],
    b: &[u8],
    f: impl Fn(&Pattern, &[u8]) -> (Vec<usize>, usize),
) -> (Vec<usize>, usize) {
    let mut hits = Vec::new();
    // smallest positive skip among successes, and among failures
    let (mut tl, mut fl) = (0usize, 0usize);
    for p in c {
        let (res, adv) = f(p, b);
        if !res.is_empty() {
            hits.extend(res);
            if tl == 0 || (adv > 0 && adv < tl) {
                tl = adv;
            }
        } else if fl == 0 || (adv > 0 && adv < fl) {
            fl = adv;
        }
    }
    if hits.is_empty() {
        (hits, fl)
    } else {
        (hits, tl)
    }
}

fn list_test(l: &[Pattern], b: &[u8], rev: bool) -> (Vec<usize>, usize) {
    if l.is_empty() {
        return (Vec::new(), 0);
    }
    let mut totals = vec![0usize];
    let iter: Box<dyn Iterator<Item = &Pattern>> = if rev {
        Box::new(l.iter().rev())
    } else {
        Box::new(l.iter())
    };
    for p in iter {
        let mut next = Vec::with_capacity(totals.len());
        for &t in &totals {
            let (lens, _) = if rev {
                p.test_r(&b[..b.len() - t])
            } else {
                p.test(&b[t..])
            };
            for le in lens {
                next.push(t + le);
            }
        }
        if next.is_empty() {
            return (Vec::new(), 1);
        }
        totals = next;
    }
    (totals, 1)
}

/// Reverses a byte sequence, for feeding the EOF automaton.
pub fn reverse(s: &[u8]) -> Vec<u8> {
    s.iter().rev().copied().collect()
}

/// Renders bytes as a quoted ASCII string when valid UTF-8, else hex.
pub(crate) fn stringify(b: &[u8]) -> String {
    match std::str::from_utf8(b) {
        Ok(s) => format!("{s:?}"),
        Err(_) => b.iter().map(|v| format!("{v:02x}")).collect(),
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Sequence(s) => write!(f, "seq {}", stringify(s)),
            Pattern::Choice(c) => {
                write!(f, "c[")?;
                for (i, p) in c.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "]")
            }
            Pattern::List(l) => {
                write!(f, "l[")?;
                for (i, p) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "]")
            }
            Pattern::Not(p) => write!(f, "not[{p}]"),
            Pattern::Mask(m) => write!(f, "m {m:#x}"),
            Pattern::AnyMask(m) => write!(f, "am {m:#x}"),
        }
    }
}
