//! A buffer that lets several readers scan one source independently.
//!
//! The backing is chosen when the source is attached: in-memory slabs for
//! byte slices and small files, a memory map where one can be made, a
//! head/tail/wheel arrangement for large files that cannot be mapped, and
//! a growing slab for plain streams. Whatever the backing, the head
//! (`INITIAL_READ` bytes) is available immediately, and the tail (`EOF_SZ`
//! bytes) is available immediately for files or once a stream has been
//! read through.
//!
//! Invariants:
//! - `slice` and `eof_slice` may be called concurrently; internal growth
//!   and wheel state are serialised with a mutex.
//! - every blocking path observes the quit flag and returns
//!   [`BufferError::Quit`] instead of stalling.

mod file;
mod readers;
mod stream;

use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::BufferError;

pub use readers::{ForwardBytes, ReverseBytes};

pub const READ_SZ: usize = 4096;
pub const INITIAL_READ: usize = READ_SZ * 3;
pub const EOF_SZ: usize = READ_SZ * 2;
pub const SMALL_FILE_SZ: usize = READ_SZ * 3;
pub const WHEEL_SZ: usize = READ_SZ * 32;

enum Source {
    Stream(stream::Stream),
    Small(file::SmallFile),
    Mmap(file::MmapFile),
    Big(file::BigFile),
}

pub struct Buffer {
    quit: Arc<AtomicBool>,
    src: Source,
}

impl Buffer {
    /// Buffers an in-memory byte slab.
    pub fn bytes(b: Vec<u8>) -> Result<Buffer, BufferError> {
        if b.is_empty() {
            return Err(BufferError::Empty);
        }
        Ok(Buffer {
            quit: Arc::new(AtomicBool::new(false)),
            src: Source::Small(file::SmallFile::new(b)),
        })
    }

    /// Buffers an arbitrary reader, growing an in-memory slab as reads
    /// demand.
    pub fn stream(src: impl Read + Send + 'static) -> Result<Buffer, BufferError> {
        Self::stream_recycled(src, Vec::new())
    }

    fn stream_recycled(
        src: impl Read + Send + 'static,
        slab: Vec<u8>,
    ) -> Result<Buffer, BufferError> {
        let quit = Arc::new(AtomicBool::new(false));
        let s = stream::Stream::new(Box::new(src), slab, &quit)?;
        Ok(Buffer { quit, src: Source::Stream(s) })
    }

    /// Buffers a file: fully read when small, memory mapped when possible,
    /// otherwise head, tail and a sliding wheel over positional reads.
    pub fn file(f: File) -> Result<Buffer, BufferError> {
        Self::file_recycled(f, Vec::new(), Vec::new(), Vec::new())
    }

    fn file_recycled(
        f: File,
        small_slab: Vec<u8>,
        eof_slab: Vec<u8>,
        wheel_slab: Vec<u8>,
    ) -> Result<Buffer, BufferError> {
        let sz = f.metadata()?.len() as i64;
        if sz == 0 {
            return Err(BufferError::Empty);
        }
        let quit = Arc::new(AtomicBool::new(false));
        if sz as usize <= SMALL_FILE_SZ {
            let sf = file::SmallFile::read_from(&f, sz as usize, small_slab)?;
            return Ok(Buffer { quit, src: Source::Small(sf) });
        }
        match file::MmapFile::map(&f, sz) {
            Ok(m) => Ok(Buffer { quit, src: Source::Mmap(m) }),
            Err(_) => {
                let bf = file::BigFile::new(f, sz, small_slab, eof_slab, wheel_slab)?;
                Ok(Buffer { quit, src: Source::Big(bf) })
            }
        }
    }

    /// The shared cancellation flag; raising it unblocks pending reads.
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    pub(crate) fn quit_raised(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    /// Returns `l` bytes starting at `off`, or fewer if the data ends
    /// first; the flag reports such truncation. Blocks on streams until
    /// the range has been read.
    pub fn slice(&self, off: i64, l: usize) -> Result<(Cow<'_, [u8]>, bool), BufferError> {
        match &self.src {
            Source::Stream(s) => s.slice(&self.quit, off, l),
            Source::Small(s) => Ok(s.slice(off, l)),
            Source::Mmap(m) => Ok(m.slice(off, l)),
            Source::Big(b) => b.slice(off, l),
        }
    }

    /// As [`slice`](Self::slice) but `off` counts back from the end of the
    /// data; the returned bytes are in forward order. Forces a full read
    /// of a stream.
    pub fn eof_slice(&self, off: i64, l: usize) -> Result<(Cow<'_, [u8]>, bool), BufferError> {
        match &self.src {
            Source::Stream(s) => s.eof_slice(&self.quit, off, l),
            Source::Small(s) => Ok(s.eof_slice(off, l)),
            Source::Mmap(m) => Ok(m.eof_slice(off, l)),
            Source::Big(b) => b.eof_slice(off, l),
        }
    }

    /// Final size. Forces a full read of a stream.
    pub fn size(&self) -> Result<i64, BufferError> {
        match &self.src {
            Source::Stream(s) => s.size(&self.quit),
            Source::Small(s) => Ok(s.size()),
            Source::Mmap(m) => Ok(m.size()),
            Source::Big(b) => Ok(b.size()),
        }
    }

    /// Size read so far; may undershoot for streams.
    pub fn size_now(&self) -> i64 {
        match &self.src {
            Source::Stream(s) => s.size_now(),
            Source::Small(s) => s.size(),
            Source::Mmap(m) => m.size(),
            Source::Big(b) => b.size(),
        }
    }

    /// Whether `off` (from the end when `rev`) is reachable; streams read
    /// forward as far as needed to answer.
    pub fn can_seek(&self, off: i64, rev: bool) -> Result<bool, BufferError> {
        match &self.src {
            Source::Stream(s) => s.can_seek(&self.quit, off, rev),
            _ => {
                let sz = self.size_now();
                Ok(off <= sz)
            }
        }
    }

    /// Byte iterator from the start of the data. A non-negative `limit`
    /// caps the bytes yielded.
    pub fn iter_forward(&self, limit: i64) -> ForwardBytes<'_> {
        ForwardBytes::new(self, limit)
    }

    /// Byte iterator from the end of the data, yielding bytes in reverse
    /// order. A non-negative `limit` caps the bytes yielded.
    pub fn iter_reverse(&self, limit: i64) -> ReverseBytes<'_> {
        ReverseBytes::new(self, limit)
    }
}

/// Recycles buffer slabs between files, segmented by backing variant.
#[derive(Default)]
pub struct Buffers {
    stream_slabs: Mutex<Vec<Vec<u8>>>,
    small_slabs: Mutex<Vec<Vec<u8>>>,
    big_slabs: Mutex<Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>>,
}

fn pop(slabs: &Mutex<Vec<Vec<u8>>>) -> Vec<u8> {
    slabs.lock().unwrap().pop().unwrap_or_default()
}

impl Buffers {
    pub fn new() -> Buffers {
        Buffers::default()
    }

    pub fn get_stream(&self, src: impl Read + Send + 'static) -> Result<Buffer, BufferError> {
        Buffer::stream_recycled(src, pop(&self.stream_slabs))
    }

    pub fn get_file(&self, f: File) -> Result<Buffer, BufferError> {
        let (peek, eof, wheel) = self
            .big_slabs
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_default();
        let small = if peek.is_empty() { pop(&self.small_slabs) } else { peek };
        Buffer::file_recycled(f, small, eof, wheel)
    }

    /// Returns a buffer's slabs to the pool.
    pub fn put(&self, b: Buffer) {
        match b.src {
            Source::Stream(s) => {
                let mut slab = s.into_slab();
                slab.clear();
                self.stream_slabs.lock().unwrap().push(slab);
            }
            Source::Small(s) => {
                let mut slab = s.into_slab();
                slab.clear();
                self.small_slabs.lock().unwrap().push(slab);
            }
            Source::Big(bf) => {
                let (mut peek, mut eof, mut wheel) = bf.into_slabs();
                peek.clear();
                eof.clear();
                wheel.clear();
                self.big_slabs.lock().unwrap().push((peek, eof, wheel));
            }
            Source::Mmap(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bytes_buffer_slices_both_ways() {
        let b = Buffer::bytes(b"hello world".to_vec()).unwrap();
        let (s, eof) = b.slice(0, 5).unwrap();
        assert_eq!(&*s, b"hello");
        assert!(!eof);
        let (s, eof) = b.slice(6, 100).unwrap();
        assert_eq!(&*s, b"world");
        assert!(eof);
        let (s, _) = b.eof_slice(0, 5).unwrap();
        assert_eq!(&*s, b"world");
        let (s, _) = b.eof_slice(6, 5).unwrap();
        assert_eq!(&*s, b"hello");
        assert_eq!(b.size().unwrap(), 11);
    }

    #[test]
    fn empty_sources_are_rejected() {
        assert!(matches!(Buffer::bytes(Vec::new()), Err(BufferError::Empty)));
        assert!(matches!(
            Buffer::stream(std::io::empty()),
            Err(BufferError::Empty)
        ));
    }

    #[test]
    fn stream_buffer_grows_on_demand() {
        let data: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let b = Buffer::stream(std::io::Cursor::new(data.clone())).unwrap();
        assert!(b.size_now() < 20000);
        let (s, _) = b.slice(15000, 100).unwrap();
        assert_eq!(&*s, &data[15000..15100]);
        let (s, _) = b.eof_slice(0, 4).unwrap();
        assert_eq!(&*s, &data[19996..]);
        assert_eq!(b.size().unwrap(), 20000);
    }

    #[test]
    fn quit_unblocks_stream_reads() {
        let data = vec![7u8; 100000];
        let b = Buffer::stream(std::io::Cursor::new(data)).unwrap();
        b.quit_flag().store(true, Ordering::Relaxed);
        assert!(matches!(b.slice(50000, 10), Err(BufferError::Quit)));
    }

    #[test]
    fn file_buffers_pick_a_backing() {
        let mut small = tempfile::NamedTempFile::new().unwrap();
        small.write_all(b"small contents").unwrap();
        let b = Buffer::file(small.reopen().unwrap()).unwrap();
        let (s, _) = b.slice(0, 5).unwrap();
        assert_eq!(&*s, b"small");

        let mut large = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..300000u32).map(|i| (i % 241) as u8).collect();
        large.write_all(&data).unwrap();
        let b = Buffer::file(large.reopen().unwrap()).unwrap();
        assert_eq!(b.size().unwrap(), 300000);
        let (s, _) = b.slice(123456, 32).unwrap();
        assert_eq!(&*s, &data[123456..123488]);
        let (s, _) = b.eof_slice(0, 16).unwrap();
        assert_eq!(&*s, &data[299984..]);
    }

    #[test]
    fn forward_and_reverse_iterators_agree() {
        let data: Vec<u8> = (0..10000u32).map(|i| (i % 239) as u8).collect();
        let b = Buffer::bytes(data.clone()).unwrap();
        let fwd: Vec<u8> = b.iter_forward(-1).collect();
        assert_eq!(fwd, data);
        let mut rev: Vec<u8> = b.iter_reverse(-1).collect();
        rev.reverse();
        assert_eq!(rev, data);
        let limited: Vec<u8> = b.iter_forward(10).collect();
        assert_eq!(limited, &data[..10]);
        let rlimited: Vec<u8> = b.iter_reverse(10).collect();
        assert_eq!(rlimited.len(), 10);
        assert_eq!(rlimited[0], data[9999]);
    }

    #[test]
    fn pooled_buffers_recycle_slabs() {
        let pool = Buffers::new();
        let b = pool
            .get_stream(std::io::Cursor::new(vec![1u8; 5000]))
            .unwrap();
        assert_eq!(b.size().unwrap(), 5000);
        pool.put(b);
        let b = pool
            .get_stream(std::io::Cursor::new(vec![2u8; 3000]))
            .unwrap();
        let (s, _) = b.slice(2990, 10).unwrap();
        assert_eq!(&*s, &[2u8; 10][..]);
    }
}
