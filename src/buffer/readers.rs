//! Byte iterators over a buffer, refilling a scratch slice chunk by chunk
//! so the automaton never touches the buffer internals directly.

use std::borrow::Cow;

use super::{Buffer, READ_SZ};

/// Yields bytes from the start of the buffer. Stops at `limit` bytes when
/// the limit is non-negative, at end of data, or when quit is raised.
pub struct ForwardBytes<'a> {
    buf: &'a Buffer,
    scratch: Cow<'a, [u8]>,
    j: usize,
    i: i64,
    limit: i64,
    end: bool,
}

impl<'a> ForwardBytes<'a> {
    pub(super) fn new(buf: &'a Buffer, limit: i64) -> ForwardBytes<'a> {
        ForwardBytes { buf, scratch: Cow::Borrowed(&[]), j: 0, i: 0, limit, end: false }
    }
}

impl Iterator for ForwardBytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        loop {
            if self.j < self.scratch.len() {
                let b = self.scratch[self.j];
                self.j += 1;
                self.i += 1;
                return Some(b);
            }
            if self.end || self.buf.quit_raised() {
                return None;
            }
            let mut want = READ_SZ;
            if self.limit >= 0 {
                if self.i >= self.limit {
                    return None;
                }
                want = want.min((self.limit - self.i) as usize);
            }
            match self.buf.slice(self.i, want) {
                Ok((s, eof)) => {
                    if eof {
                        self.end = true;
                    }
                    if s.is_empty() {
                        return None;
                    }
                    self.scratch = s;
                    self.j = 0;
                }
                Err(_) => return None,
            }
        }
    }
}

/// Yields bytes from the end of the buffer in reverse order. Stops at
/// `limit` bytes when the limit is non-negative, at the start of data, or
/// when quit is raised.
pub struct ReverseBytes<'a> {
    buf: &'a Buffer,
    scratch: Cow<'a, [u8]>,
    j: usize,
    i: i64,
    limit: i64,
    end: bool,
}

impl<'a> ReverseBytes<'a> {
    pub(super) fn new(buf: &'a Buffer, limit: i64) -> ReverseBytes<'a> {
        ReverseBytes { buf, scratch: Cow::Borrowed(&[]), j: 0, i: 0, limit, end: false }
    }
}

impl Iterator for ReverseBytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        loop {
            if self.j > 0 {
                self.j -= 1;
                let b = self.scratch[self.j];
                self.i += 1;
                return Some(b);
            }
            if self.end || self.buf.quit_raised() {
                return None;
            }
            let mut want = READ_SZ;
            if self.limit >= 0 {
                if self.i >= self.limit {
                    return None;
                }
                want = want.min((self.limit - self.i) as usize);
            }
            match self.buf.eof_slice(self.i, want) {
                Ok((s, bof)) => {
                    if bof {
                        self.end = true;
                    }
                    if s.is_empty() {
                        return None;
                    }
                    self.j = s.len();
                    self.scratch = s;
                }
                Err(_) => return None,
            }
        }
    }
}
