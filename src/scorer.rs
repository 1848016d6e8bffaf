//! The scorer: turns raw strikes from the automata and frame sets into
//! signature matches.
//!
//! Strikes arrive in offset order per direction. Cheap strikes (those that
//! might complete a signature) are tested immediately against their test
//! tree; expensive ones are cached until the signature's other keyframes
//! have reported. Progress strikes carry no hit, only how far each scan
//! has advanced, and drive the early-exit decision: once nothing in the
//! wait set can still match at the current offsets, the quit flag is
//! raised and the producers wind down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use crossbeam_channel::Sender;
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::frames::OffType;
use crate::keyframes::{check_related, one_enough, KeyFrameId};
use crate::matcher::Matcher;
use crate::priority::WaitSet;
use crate::testtree::match_test_nodes;

/// A raw hit from one of the scanners, or a progress report.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Strike {
    Progress { offset: i64, reverse: bool },
    Hit(Hit),
}

/// `idxa + idxb` is a test tree index: `idxa` is the index of the first
/// choice slot of the matched sequence, `idxb` the slot within it. Frame
/// set hits always have `idxb` zero.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Hit {
    pub idxa: usize,
    pub idxb: usize,
    pub offset: i64,
    pub length: usize,
    pub reverse: bool,
    pub frame: bool,
}

/// A successful identification: the signature index and a human-readable
/// account of the bytes that proved it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub index: usize,
    pub basis: String,
}

/// A cached strike: the first hit plus the offset and length of any
/// successive hits on the same test tree index. `idx` records how many
/// have been popped for testing.
struct StrikeItem {
    first: Hit,
    idx: isize,
    successive: Vec<(i64, i64)>,
}

impl StrikeItem {
    fn has_potential(&self) -> bool {
        self.idx + 1 <= self.successive.len() as isize
    }

    fn num_potentials(&self) -> usize {
        (self.successive.len() as isize - self.idx) as usize
    }

    fn pop(&mut self) -> Hit {
        self.idx += 1;
        if self.idx > 0 {
            let (o, l) = self.successive[self.idx as usize - 1];
            self.first.offset = o;
            self.first.length = l as usize;
        }
        self.first
    }
}

/// Per-signature progress: for each keyframe, a link into the strike
/// cache (index plus one, zero meaning none) and the offsets of any
/// confirmed hits.
struct HitItem {
    potential_idxs: Vec<usize>,
    partials: Vec<Option<Vec<(i64, i64)>>>,
    matched: bool,
}

impl HitItem {
    fn new(l: usize) -> HitItem {
        HitItem {
            potential_idxs: vec![0; l],
            partials: vec![None; l],
            matched: false,
        }
    }
}

/// Does every keyframe slot (bar `skip`) have either a confirmed partial
/// or an untested cached strike?
fn potentially_complete(
    h: &HitItem,
    skip: Option<usize>,
    strikes: &AHashMap<usize, StrikeItem>,
) -> bool {
    if h.matched {
        return false;
    }
    for (i, &v) in h.potential_idxs.iter().enumerate() {
        if Some(i) == skip {
            continue;
        }
        let live = v > 0 && strikes.get(&(v - 1)).is_some_and(|s| s.has_potential());
        if !live && h.partials[i].is_none() {
            return false;
        }
    }
    true
}

/// Pops the most promising cached strike for this signature: a slot with
/// no partials yet, else the slot with the fewest untested strikes.
fn next_potential(h: &HitItem, strikes: &mut AHashMap<usize, StrikeItem>) -> Option<Hit> {
    if !potentially_complete(h, None, strikes) {
        return None;
    }
    let mut min_idx = 0;
    let mut min = 0;
    for (i, &v) in h.potential_idxs.iter().enumerate() {
        if h.partials[i].is_none() && v > 0 {
            if let Some(s) = strikes.get_mut(&(v - 1)) {
                return Some(s.pop());
            }
        }
        if v > 0 {
            if let Some(s) = strikes.get(&(v - 1)) {
                if s.has_potential() && (min == 0 || s.num_potentials() < min) {
                    min_idx = v - 1;
                    min = s.num_potentials();
                }
            }
        }
    }
    if min == 0 {
        return None;
    }
    strikes.get_mut(&min_idx).map(|s| s.pop())
}

/// An odometer over the cross product of per-keyframe hit lists. The
/// `start` and `end` window is advanced by the caller as chain validation
/// checkpoints or fails, pruning combinations that cannot change the
/// outcome.
fn iterate_partials<'a>(
    partials: &'a [&'a [(i64, i64)]],
) -> impl FnMut(usize, usize) -> Option<Vec<(i64, i64)>> + 'a {
    let mut idxs = vec![0usize; partials.len()];
    let mut ret = vec![(0i64, 0i64); partials.len()];
    let mut done = false;
    let mut ev = 0usize;
    move |start: usize, end: usize| {
        if done || start >= idxs.len() || ev >= end {
            return None;
        }
        for i in start..idxs.len() {
            ret[i] = partials[i][idxs[i]];
        }
        for i in start..partials.len() {
            if idxs[i] == partials[i].len() - 1 {
                if i == partials.len() - 1 {
                    done = true;
                    break;
                }
                if i >= end {
                    ev = end;
                }
                idxs[i] = 0;
                continue;
            }
            idxs[i] += 1;
            break;
        }
        Some(ret.clone())
    }
}

/// A keyframe proven by a strike: BOF-normalised offset and full length.
#[derive(Clone, Copy, Debug)]
struct KfHit {
    id: KeyFrameId,
    offset: i64,
    length: usize,
}

#[derive(Clone, Default)]
struct Partial {
    ldistances: Vec<usize>,
    rdistances: Vec<usize>,
}

fn filter_kf(mut kfs: Vec<KeyFrameId>, ws: &WaitSet<'_>) -> Vec<KeyFrameId> {
    kfs.retain(|kf| ws.check(kf.0));
    kfs
}

pub(crate) struct Scorer<'a> {
    matcher: &'a Matcher,
    buf: &'a Buffer,
    wait_set: &'a WaitSet<'a>,
    quit: Arc<AtomicBool>,
    results: Sender<Match>,
    hits: AHashMap<usize, HitItem>,
    strikes: AHashMap<usize, StrikeItem>,
    bof: i64,
    eof: i64,
    quitting: bool,
}

impl<'a> Scorer<'a> {
    pub(crate) fn new(
        matcher: &'a Matcher,
        buf: &'a Buffer,
        wait_set: &'a WaitSet<'a>,
        results: Sender<Match>,
    ) -> Scorer<'a> {
        Scorer {
            matcher,
            buf,
            wait_set,
            quit: buf.quit_flag(),
            results,
            hits: AHashMap::new(),
            strikes: AHashMap::new(),
            bof: 0,
            eof: 0,
            quitting: false,
        }
    }

    fn quit(&mut self) {
        self.quit.store(true, Ordering::Relaxed);
        self.quitting = true;
    }

    pub(crate) fn score(&mut self, st: Strike) {
        // drain without testing once a verdict is in
        if self.quitting {
            return;
        }
        match st {
            Strike::Progress { offset, reverse } => self.progress(offset, reverse),
            Strike::Hit(h) => self.strike(h),
        }
    }

    fn progress(&mut self, offset: i64, reverse: bool) {
        if reverse {
            self.eof = offset;
        } else {
            self.bof = offset;
        }
        let w = match self.wait_set.waiting_on_at(self.bof, self.eof) {
            Some(w) => w,
            None => {
                // a waitlist is still open to everything; only once past
                // the offsets where every front and back anchored
                // signature should have reported do the cached hits decide
                let m = self.matcher;
                if m.known_bof < 0 || m.known_bof > self.bof || m.known_eof > self.eof {
                    return;
                }
                self.hits.keys().copied().collect()
            }
        };
        if !self.continue_waiting(&w) {
            trace!(bof = self.bof, eof = self.eof, "nothing left to wait for");
            self.quit();
        }
    }

    // given the current bof and eof, is any of the signatures in w a live
    // contender?
    fn continue_waiting(&self, w: &[usize]) -> bool {
        for &v in w {
            let kf = &self.matcher.key_frames[v];
            for (i, f) in kf.iter().enumerate() {
                let off = if f.typ > OffType::Prev { self.eof } else { self.bof };
                let mut waitfor = false;
                if f.key.pmax == -1 || f.key.pmax + f.key.lmax as i64 > off {
                    waitfor = true;
                } else if let Some(hit) = self.hits.get(&v) {
                    if hit.partials[i].is_some() {
                        waitfor = true;
                    } else if hit.potential_idxs[i] > 0
                        && self
                            .strikes
                            .get(&(hit.potential_idxs[i] - 1))
                            .is_some_and(|s| s.has_potential())
                    {
                        waitfor = true;
                    }
                }
                if waitfor {
                    if i == kf.len() - 1 {
                        return true;
                    }
                    continue;
                }
                break;
            }
        }
        false
    }

    fn strike(&mut self, h: Hit) {
        let m = self.matcher;
        let tti = h.idxa + h.idxb;
        let mut potentials = filter_kf(m.tests[tti].key_frames(), self.wait_set);
        let mut has_potential = false;
        for pot in &potentials {
            // single-keyframe signatures are satisfiable on the spot
            if m.key_frames[pot.0].len() == 1 {
                has_potential = true;
                break;
            }
            if let Some(hit) = self.hits.get(&pot.0) {
                if potentially_complete(hit, Some(pot.1), &self.strikes) {
                    has_potential = true;
                    break;
                }
            }
        }
        if !has_potential {
            self.cache(h, tti, &potentials);
            return;
        }
        let mut current = h;
        loop {
            let ks = self.test_strike(current);
            for k in ks {
                if let Some(basis) = self.apply_key_frame(&k) {
                    if self.wait_set.check(k.id.0) {
                        debug!(signature = k.id.0, %basis, "match");
                        if self.results.send(Match { index: k.id.0, basis }).is_err() {
                            self.quit();
                            return;
                        }
                        if self.wait_set.put_at(k.id.0, self.bof, self.eof) {
                            self.quit();
                            return;
                        }
                    }
                    if let Some(hi) = self.hits.get_mut(&k.id.0) {
                        hi.matched = true;
                    }
                }
            }
            // the wait set may have narrowed; drain any cached strikes
            // that could still complete a remaining contender
            potentials = filter_kf(potentials, self.wait_set);
            let hits = &self.hits;
            let strikes = &mut self.strikes;
            let mut nxt = None;
            for pot in &potentials {
                if let Some(hi) = hits.get(&pot.0) {
                    if let Some(s) = next_potential(hi, strikes) {
                        nxt = Some(s);
                        break;
                    }
                }
            }
            match nxt {
                Some(s) => current = s,
                None => break,
            }
        }
    }

    fn cache(&mut self, h: Hit, tti: usize, potentials: &[KeyFrameId]) {
        let m = self.matcher;
        match self.strikes.entry(tti) {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                e.get_mut().successive.push((h.offset, h.length as i64));
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(StrikeItem { first: h, idx: -1, successive: Vec::new() });
            }
        }
        for pot in potentials {
            if m.key_frames[pot.0][pot.1].check(h.offset) {
                let hit = self
                    .hits
                    .entry(pot.0)
                    .or_insert_with(|| HitItem::new(m.key_frames[pot.0].len()));
                hit.potential_idxs[pot.1] = tti + 1;
            }
        }
    }

    // recorded offsets are always BOF offsets; a strike from a reverse
    // scan is normalised against the buffer size
    fn test_strike(&self, st: Hit) -> Vec<KfHit> {
        let m = self.matcher;
        let mut off = st.offset;
        if st.reverse {
            let sz = self.buf.size().unwrap_or_else(|_| self.buf.size_now());
            off = sz - st.offset - st.length as i64;
        }
        let t = &m.tests[st.idxa + st.idxb];
        let mut res = Vec::new();
        for &kf in &t.complete {
            if m.key_frames[kf.0][kf.1].check(st.offset) && self.wait_set.check(kf.0) {
                res.push(KfHit { id: kf, offset: off, length: st.length });
            }
        }
        if t.incomplete.is_empty() {
            return res;
        }
        let (mut checkl, mut checkr) = (false, false);
        for v in &t.incomplete {
            if checkl && checkr {
                break;
            }
            if m.key_frames[v.kf.0][v.kf.1].check(st.offset) && self.wait_set.check(v.kf.0) {
                checkl |= v.l;
                checkr |= v.r;
            }
        }
        if !checkl && !checkr {
            return res;
        }
        let (lpos, llen, rpos, rlen) = if st.reverse {
            let mut rpos = st.offset - t.max_right_distance as i64;
            let mut rlen = t.max_right_distance;
            if rpos < 0 {
                rlen = (rlen as i64 + rpos) as usize;
                rpos = 0;
            }
            (st.offset + st.length as i64, t.max_left_distance, rpos, rlen)
        } else {
            let mut lpos = st.offset - t.max_left_distance as i64;
            let mut llen = t.max_left_distance;
            if lpos < 0 {
                llen = (llen as i64 + lpos) as usize;
                lpos = 0;
            }
            (lpos, llen, st.offset + st.length as i64, t.max_right_distance)
        };
        let mut partials: Vec<Partial> = vec![Partial::default(); t.incomplete.len()];
        if checkl {
            let slc = if st.reverse {
                self.buf.eof_slice(lpos, llen)
            } else {
                self.buf.slice(lpos, llen)
            };
            if let Ok((slc, _)) = slc {
                for lp in match_test_nodes(&t.left, &slc, true) {
                    partials[lp.follow_up].ldistances.extend(lp.distances);
                }
            }
        }
        if checkr {
            let slc = if st.reverse {
                self.buf.eof_slice(rpos, rlen)
            } else {
                self.buf.slice(rpos, rlen)
            };
            if let Ok((slc, _)) = slc {
                for rp in match_test_nodes(&t.right, &slc, false) {
                    partials[rp.follow_up].rdistances.extend(rp.distances);
                }
            }
        }
        for (i, p) in partials.iter_mut().enumerate() {
            if !p.ldistances.is_empty() != t.incomplete[i].l
                || !p.rdistances.is_empty() != t.incomplete[i].r
            {
                continue;
            }
            let kf = t.incomplete[i].kf;
            if !m.key_frames[kf.0][kf.1].check(st.offset) || !self.wait_set.check(kf.0) {
                continue;
            }
            if p.ldistances.is_empty() {
                p.ldistances.push(0);
            }
            if p.rdistances.is_empty() {
                p.rdistances.push(0);
            }
            if one_enough(kf.1, &m.key_frames[kf.0]) {
                res.push(KfHit {
                    id: kf,
                    offset: off - p.ldistances[0] as i64,
                    length: p.ldistances[0] + st.length + p.rdistances[0],
                });
                continue;
            }
            for &ld in &p.ldistances {
                for &rd in &p.rdistances {
                    res.push(KfHit {
                        id: kf,
                        offset: off - ld as i64,
                        length: ld + st.length + rd,
                    });
                }
            }
        }
        res
    }

    // registers a proven keyframe; returns the match basis once every
    // keyframe of the signature has a hit and some combination of the
    // hits chains correctly
    fn apply_key_frame(&mut self, hit: &KfHit) -> Option<String> {
        let m = self.matcher;
        let kfs = &m.key_frames[hit.id.0];
        if kfs.len() == 1 {
            return Some(format!("byte match at {}, {}", hit.offset, hit.length));
        }
        let h = self
            .hits
            .entry(hit.id.0)
            .or_insert_with(|| HitItem::new(kfs.len()));
        match &mut h.partials[hit.id.1] {
            Some(v) => v.push((hit.offset, hit.length as i64)),
            slot => *slot = Some(vec![(hit.offset, hit.length as i64)]),
        }
        if h.partials.iter().any(|p| p.is_none()) {
            return None;
        }
        let parts: Vec<&[(i64, i64)]> = h
            .partials
            .iter()
            .map(|p| p.as_deref().unwrap_or(&[]))
            .collect();
        let mut next = iterate_partials(&parts);
        let mut start = 0;
        let mut end = 0;
        let mut basis = next(start, kfs.len() - 1);
        while let Some(b) = basis {
            let mut ok = false;
            for (i, kf) in kfs.iter().enumerate().skip(1) {
                let (o, checkpoint) = check_related(kf, &kfs[0], b[i], b[i - 1]);
                ok = o;
                if !ok {
                    if end < i {
                        end = i;
                    }
                    break;
                }
                if checkpoint && start < i {
                    start = i;
                }
            }
            if ok {
                return Some(format!("byte match at {:?}", b));
            }
            basis = next(start, end);
        }
        None
    }
}
