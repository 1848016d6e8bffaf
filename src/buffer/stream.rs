//! Stream backing: a slab grown in fixed chunks as reads demand.

use std::borrow::Cow;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::BufferError;

use super::READ_SZ;

pub(super) struct Stream {
    inner: Mutex<Inner>,
}

struct Inner {
    src: Box<dyn Read + Send>,
    buf: Vec<u8>,
    sz: i64,
    eof: bool,
}

impl Inner {
    /// Reads one chunk from the source into the slab.
    fn fill(&mut self, quit: &AtomicBool) -> Result<(), BufferError> {
        if self.eof {
            return Ok(());
        }
        if quit.load(Ordering::Relaxed) {
            return Err(BufferError::Quit);
        }
        let start = self.sz as usize;
        self.buf.resize(start + READ_SZ, 0);
        let mut n = 0;
        while n < READ_SZ {
            match self.src.read(&mut self.buf[start + n..start + READ_SZ]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(k) => n += k,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.eof = true;
                    self.buf.truncate(start + n);
                    self.sz += n as i64;
                    return Err(e.into());
                }
            }
        }
        self.buf.truncate(start + n);
        self.sz += n as i64;
        Ok(())
    }

    fn fill_to(&mut self, bound: i64, quit: &AtomicBool) -> Result<(), BufferError> {
        while self.sz < bound && !self.eof {
            self.fill(quit)?;
        }
        Ok(())
    }

    fn fill_all(&mut self, quit: &AtomicBool) -> Result<(), BufferError> {
        while !self.eof {
            self.fill(quit)?;
        }
        Ok(())
    }

    fn take(&self, off: i64, l: usize) -> (Cow<'static, [u8]>, bool) {
        if off >= self.sz {
            return (Cow::Owned(Vec::new()), true);
        }
        let off = off as usize;
        let end = (off + l).min(self.sz as usize);
        (Cow::Owned(self.buf[off..end].to_vec()), off + l > self.sz as usize)
    }
}

impl Stream {
    pub(super) fn new(
        src: Box<dyn Read + Send>,
        mut slab: Vec<u8>,
        quit: &AtomicBool,
    ) -> Result<Stream, BufferError> {
        slab.clear();
        let mut inner = Inner { src, buf: slab, sz: 0, eof: false };
        inner.fill(quit)?;
        if inner.sz == 0 {
            return Err(BufferError::Empty);
        }
        Ok(Stream { inner: Mutex::new(inner) })
    }

    pub(super) fn slice(
        &self,
        quit: &AtomicBool,
        off: i64,
        l: usize,
    ) -> Result<(Cow<'_, [u8]>, bool), BufferError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fill_to(off + l as i64, quit)?;
        Ok(inner.take(off, l))
    }

    pub(super) fn eof_slice(
        &self,
        quit: &AtomicBool,
        off: i64,
        l: usize,
    ) -> Result<(Cow<'_, [u8]>, bool), BufferError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fill_all(quit)?;
        let start = inner.sz - off - l as i64;
        if start < 0 {
            let clamped = (inner.sz - off).max(0) as usize;
            let (slc, _) = inner.take(0, clamped);
            return Ok((slc, true));
        }
        Ok(inner.take(start, l))
    }

    pub(super) fn size(&self, quit: &AtomicBool) -> Result<i64, BufferError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fill_all(quit)?;
        Ok(inner.sz)
    }

    pub(super) fn size_now(&self) -> i64 {
        self.inner.lock().unwrap().sz
    }

    pub(super) fn can_seek(
        &self,
        quit: &AtomicBool,
        off: i64,
        rev: bool,
    ) -> Result<bool, BufferError> {
        let mut inner = self.inner.lock().unwrap();
        if rev {
            inner.fill_all(quit)?;
            return Ok(inner.sz - off >= 0);
        }
        inner.fill_to(off, quit)?;
        Ok(inner.sz >= off)
    }

    pub(super) fn into_slab(self) -> Vec<u8> {
        self.inner.into_inner().unwrap().buf
    }
}
