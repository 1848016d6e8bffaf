//! File backings: whole-slab for small files, a memory map where the
//! platform grants one, and a head/tail/wheel arrangement over positional
//! reads for large files that cannot be mapped.

use std::borrow::Cow;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use memmap2::Mmap;

use crate::error::BufferError;

use super::{EOF_SZ, INITIAL_READ, READ_SZ, WHEEL_SZ};

fn clamp(sz: i64, off: i64, l: usize) -> Option<(usize, bool)> {
    if off >= sz {
        return None;
    }
    if off + l as i64 > sz {
        Some(((sz - off) as usize, true))
    } else {
        Some((l, false))
    }
}

pub(super) struct SmallFile {
    buf: Vec<u8>,
}

impl SmallFile {
    pub(super) fn new(buf: Vec<u8>) -> SmallFile {
        SmallFile { buf }
    }

    pub(super) fn read_from(
        f: &File,
        sz: usize,
        mut slab: Vec<u8>,
    ) -> Result<SmallFile, BufferError> {
        slab.clear();
        slab.resize(sz, 0);
        f.read_exact_at(&mut slab, 0)?;
        Ok(SmallFile { buf: slab })
    }

    pub(super) fn slice(&self, off: i64, l: usize) -> (Cow<'_, [u8]>, bool) {
        match clamp(self.size(), off, l) {
            None => (Cow::Borrowed(&[][..]), true),
            Some((l, eof)) => {
                let off = off as usize;
                (Cow::Borrowed(&self.buf[off..off + l]), eof)
            }
        }
    }

    pub(super) fn eof_slice(&self, off: i64, l: usize) -> (Cow<'_, [u8]>, bool) {
        let start = self.size() - off - l as i64;
        if start < 0 {
            let end = (self.size() - off).max(0) as usize;
            return (Cow::Borrowed(&self.buf[..end]), true);
        }
        self.slice(start, l)
    }

    pub(super) fn size(&self) -> i64 {
        self.buf.len() as i64
    }

    pub(super) fn into_slab(self) -> Vec<u8> {
        self.buf
    }
}

pub(super) struct MmapFile {
    map: Mmap,
    sz: i64,
}

impl MmapFile {
    pub(super) fn map(f: &File, sz: i64) -> std::io::Result<MmapFile> {
        let map = unsafe { Mmap::map(f)? };
        Ok(MmapFile { map, sz })
    }

    pub(super) fn slice(&self, off: i64, l: usize) -> (Cow<'_, [u8]>, bool) {
        match clamp(self.sz, off, l) {
            None => (Cow::Borrowed(&[][..]), true),
            Some((l, eof)) => {
                let off = off as usize;
                (Cow::Borrowed(&self.map[off..off + l]), eof)
            }
        }
    }

    pub(super) fn eof_slice(&self, off: i64, l: usize) -> (Cow<'_, [u8]>, bool) {
        let start = self.sz - off - l as i64;
        if start < 0 {
            let end = (self.sz - off).max(0) as usize;
            return (Cow::Borrowed(&self.map[..end]), true);
        }
        self.slice(start, l)
    }

    pub(super) fn size(&self) -> i64 {
        self.sz
    }
}

/// A large file without a memory map. The head and tail are read eagerly;
/// the middle is served from a wheel that tracks a single sequential
/// scanner, falling back to positional reads for anything else.
pub(super) struct BigFile {
    file: File,
    sz: i64,
    peek: Vec<u8>,
    eof: Vec<u8>,
    wheel: Mutex<Wheel>,
}

struct Wheel {
    buf: Vec<u8>,
    i: usize,
    start: i64,
    end: i64,
    progress: i64,
}

impl BigFile {
    pub(super) fn new(
        file: File,
        sz: i64,
        mut peek: Vec<u8>,
        mut eof: Vec<u8>,
        mut wheel: Vec<u8>,
    ) -> Result<BigFile, BufferError> {
        peek.clear();
        peek.resize(INITIAL_READ, 0);
        file.read_exact_at(&mut peek, 0)?;
        eof.clear();
        eof.resize(EOF_SZ, 0);
        file.read_exact_at(&mut eof, (sz - EOF_SZ as i64) as u64)?;
        wheel.clear();
        wheel.resize(WHEEL_SZ, 0);
        Ok(BigFile {
            file,
            sz,
            peek,
            eof,
            wheel: Mutex::new(Wheel { buf: wheel, i: 0, start: 0, end: 0, progress: INITIAL_READ as i64 }),
        })
    }

    fn read_at(&self, off: i64, l: usize) -> Result<Vec<u8>, BufferError> {
        let mut out = vec![0; l];
        self.file.read_exact_at(&mut out, off as u64)?;
        Ok(out)
    }

    pub(super) fn slice(&self, off: i64, l: usize) -> Result<(Cow<'_, [u8]>, bool), BufferError> {
        let (l, eof) = match clamp(self.sz, off, l) {
            None => return Ok((Cow::Borrowed(&[][..]), true)),
            Some(c) => c,
        };
        if off + (l as i64) <= INITIAL_READ as i64 {
            let off = off as usize;
            return Ok((Cow::Borrowed(&self.peek[off..off + l]), eof));
        }
        if self.sz - off <= EOF_SZ as i64 {
            let x = (EOF_SZ as i64 - (self.sz - off)) as usize;
            return Ok((Cow::Borrowed(&self.eof[x..x + l]), eof));
        }
        let mut w = self.wheel.lock().unwrap();
        // fast path for a sequential scanner making steady progress
        if l == READ_SZ && w.progress == off {
            w.progress += READ_SZ as i64;
            if w.i == 0 {
                w.start = off;
                let want = (WHEEL_SZ as i64).min(self.sz - off) as usize;
                self.file.read_exact_at(&mut w.buf[..want], off as u64)?;
                w.end = off + want as i64;
            }
            if w.start + (w.i + l) as i64 <= w.end {
                let slc = w.buf[w.i..w.i + l].to_vec();
                w.i += READ_SZ;
                if w.i >= WHEEL_SZ {
                    w.i = 0;
                }
                return Ok((Cow::Owned(slc), eof));
            }
        }
        if off >= w.start && off + (l as i64) <= w.end {
            let x = (off - w.start) as usize;
            return Ok((Cow::Owned(w.buf[x..x + l].to_vec()), eof));
        }
        drop(w);
        Ok((Cow::Owned(self.read_at(off, l)?), eof))
    }

    pub(super) fn eof_slice(
        &self,
        off: i64,
        l: usize,
    ) -> Result<(Cow<'_, [u8]>, bool), BufferError> {
        let start = self.sz - off - l as i64;
        if start < 0 {
            let end = (self.sz - off).max(0) as usize;
            if end == 0 {
                return Ok((Cow::Borrowed(&[][..]), true));
            }
            return Ok((Cow::Owned(self.read_at(0, end)?), true));
        }
        if off + (l as i64) <= EOF_SZ as i64 {
            let x = (EOF_SZ as i64 - off) as usize - l;
            return Ok((Cow::Borrowed(&self.eof[x..x + l]), false));
        }
        Ok((Cow::Owned(self.read_at(start, l)?), false))
    }

    pub(super) fn size(&self) -> i64 {
        self.sz
    }

    pub(super) fn into_slabs(self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (self.peek, self.eof, self.wheel.into_inner().unwrap().buf)
    }
}
