//! Priority relations between signatures and the wait set that tracks,
//! during a scan, which signatures can still affect the outcome.
//!
//! A priority list gives, for each signature, the indexes of the
//! signatures that outrank it: a lower-ranked result only stands once
//! every signature outranking it has been ruled out. A wait set starts
//! waiting on everything; as matches land, [`WaitSet::put_at`] narrows
//! the wait to the matched signature's superiors and reports when nothing
//! worth waiting for remains, so scanning can stop early.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Per-signature priorities. `None` means the signature's priorities are
/// unknown and filtering on it is unsafe; an empty list means nothing
/// outranks it.
pub type List = Vec<Option<Vec<usize>>>;

/// An ordered collection of priority lists, one per batch of signatures
/// added to a matcher. The tallies in `idx` map a global signature index
/// to its list and local index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Set {
    idx: Vec<usize>,
    lists: Vec<List>,
    max_offsets: Vec<(i64, i64)>,
}

impl Set {
    /// Appends a priority list covering the next `length` signatures,
    /// along with that batch's maximum BOF and EOF offsets (-1 for
    /// unbounded, 0 for none).
    pub fn add(&mut self, mut l: List, length: usize, bof: i64, eof: i64) {
        let last = self.idx.last().copied().unwrap_or(0);
        self.idx.push(last + length);
        for v in l.iter_mut().flatten() {
            v.sort_unstable();
        }
        self.lists.push(l);
        self.max_offsets.push((bof, eof));
    }

    /// The list index and preceding tally for a global signature index.
    fn index(&self, i: usize) -> (usize, usize) {
        let mut prev = 0;
        for (idx, &v) in self.idx.iter().enumerate() {
            if i < v {
                return (idx, prev);
            }
            prev = v;
        }
        (self.idx.len().saturating_sub(1), prev)
    }

    pub fn wait_set(&self) -> WaitSet<'_> {
        WaitSet {
            set: self,
            wait: RwLock::new(vec![None; self.lists.len()]),
        }
    }
}

/// Scan-time state over a [`Set`]. Each slot is `None` while its list
/// still waits on everything, otherwise the local indexes still awaited.
pub struct WaitSet<'a> {
    set: &'a Set,
    wait: RwLock<Vec<Option<Vec<usize>>>>,
}

impl WaitSet<'_> {
    /// Whether a list can still produce matches at the given progress
    /// points. A zero max offset means the list has no stake in that
    /// direction; a negative one means it always does.
    fn awaiting(&self, idx: usize, bof: i64, eof: i64) -> bool {
        let (mb, me) = self.set.max_offsets[idx];
        if mb < 0 || (mb > 0 && mb >= bof) {
            return true;
        }
        me < 0 || (me > 0 && me >= eof)
    }

    /// Records a match for signature `i` at the given progress points.
    /// Returns true when no list has anything left worth waiting for and
    /// the scan can stop.
    pub fn put_at(&self, i: usize, bof: i64, eof: i64) -> bool {
        let (idx, prev) = self.set.index(i);
        let l = &self.set.lists[idx][i - prev];
        if l.is_none() && self.awaiting(idx, bof, eof) {
            return false;
        }
        let mut wait = self.wait.write().unwrap();
        if let Some(v) = l {
            match &mut wait[idx] {
                Some(cur) => cur.retain(|j| v.binary_search(j).is_ok()),
                slot => *slot = Some(v.clone()),
            }
            if !wait[idx].as_ref().unwrap().is_empty() && self.awaiting(idx, bof, eof) {
                return false;
            }
        }
        if wait.len() == 1 {
            return true;
        }
        for (i2, v) in wait.iter().enumerate() {
            if i2 == idx {
                continue;
            }
            if self.awaiting(i2, bof, eof) {
                match v {
                    None => return false,
                    Some(v) if !v.is_empty() => return false,
                    _ => {}
                }
            }
        }
        true
    }

    /// Records a match for signature `i` regardless of scan progress:
    /// every list with a stake in either direction is treated as still in
    /// range. Returns true when the scan can stop.
    pub fn put(&self, i: usize) -> bool {
        self.put_at(i, 0, 0)
    }

    /// Whether signature `i` is still worth pursuing.
    pub fn check(&self, i: usize) -> bool {
        let (idx, prev) = self.set.index(i);
        let wait = self.wait.read().unwrap();
        match &wait[idx] {
            None => true,
            Some(v) => v.binary_search(&(i - prev)).is_ok(),
        }
    }

    /// The global indexes of all signatures still awaited, regardless of
    /// scan progress, or `None` when a live list still waits on
    /// everything.
    pub fn waiting_on(&self) -> Option<Vec<usize>> {
        self.waiting_on_at(0, 0)
    }

    /// Retains the indexes still worth pursuing.
    pub fn filter(&self, l: &[usize]) -> Vec<usize> {
        l.iter().copied().filter(|&i| self.check(i)).collect()
    }

    /// The global indexes of all signatures still awaited at the given
    /// progress points, or `None` when a live list still waits on
    /// everything. Lists past their maximum offsets are ignored.
    pub fn waiting_on_at(&self, bof: i64, eof: i64) -> Option<Vec<usize>> {
        let wait = self.wait.read().unwrap();
        let mut ret = Vec::new();
        for (idx, v) in wait.iter().enumerate() {
            if !self.awaiting(idx, bof, eof) {
                continue;
            }
            match v {
                None => return None,
                Some(v) => {
                    let prev = if idx == 0 { 0 } else { self.set.idx[idx - 1] };
                    ret.extend(v.iter().map(|&j| j + prev));
                }
            }
        }
        Some(ret)
    }
}
