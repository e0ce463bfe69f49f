use std::io::{self, Read, Write};

use tinyvec::TinyVec;

/// Bytes kept inline before a buffer migrates to a heap allocation.
pub const INLINE_CAP: usize = 1024;

/// Minimum spare capacity `read_from_fd` guarantees before each `recv`.
const READ_CHUNK: usize = 4096;

/// Result of draining a readable fd into a [`Buffer`].
///
/// Mirrors the source proxy's sentinel scheme (`-1` error / `-2` EOF / `>=0`
/// bytes read) as a proper enum instead of magic numbers sharing a return
/// type with byte counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were appended (`n` may be 0: nothing was ready yet).
    Read(usize),
    /// The peer closed its write half; no bytes were read this call.
    Eof,
    /// A non-recoverable read error (e.g. connection reset).
    Error,
}

/// Result of draining a [`Buffer`] into a writable fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `n` bytes were sent (`n` may be 0: the socket isn't ready yet).
    Wrote(usize),
    /// `send` returned 0 with nothing written this call; treated as a peer
    /// close, matching the reference implementation.
    Eof,
    /// A non-recoverable write error (e.g. broken pipe, connection reset).
    Error,
}

/// A hybrid inline/heap byte buffer with independent consumer (`offset`) and
/// producer (`len`) cursors.
///
/// Backed by [`tinyvec::TinyVec`], which already implements the inline/heap
/// migration this buffer needs: it starts as a fixed `[u8; INLINE_CAP]`
/// array and moves to a `Vec<u8>` the first time it must grow past that,
/// copying existing bytes along the way. `offset` marks how much of the
/// readable region has been consumed; `compact` is available but is never
/// required — callers may let `offset` grow unbounded relative to a
/// (re)compacted buffer, since nothing but `consume`/`compact` ever reads
/// it.
#[derive(Debug, Default)]
pub struct Buffer {
    storage: TinyVec<[u8; INLINE_CAP]>,
    offset: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self { storage: TinyVec::new(), offset: 0 }
    }

    /// True once the buffer has migrated off its inline storage.
    pub fn is_heap(&self) -> bool {
        matches!(self.storage, TinyVec::Heap(_))
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn readable_len(&self) -> usize {
        self.storage.len() - self.offset
    }

    pub fn readable(&self) -> &[u8] {
        &self.storage[self.offset..]
    }

    /// Guarantees at least `need` bytes of writable capacity.
    pub fn ensure_space(&mut self, need: usize) {
        let free = self.storage.capacity() - self.storage.len();
        if free < need {
            self.storage.reserve(need - free);
        }
    }

    /// Appends `bytes`, growing (and migrating to heap, if still inline) as
    /// needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_space(bytes.len());
        self.storage.extend_from_slice(bytes);
    }

    /// Ensures `need` spare bytes, then lets `f` write directly into that
    /// spare region (mirroring the original "caller writes through
    /// `write_ptr`, then manually advances `len`" contract for external
    /// writers like the request rebuilder), advancing the producer cursor
    /// by whatever byte count `f` reports on success.
    pub fn write_with<E>(
        &mut self,
        need: usize,
        f: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        self.ensure_space(need);
        let start = self.storage.len();
        let cap = self.storage.capacity();
        self.storage.resize(cap, 0);
        match f(&mut self.storage[start..cap]) {
            Ok(n) => {
                self.storage.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.storage.truncate(start);
                Err(e)
            }
        }
    }

    /// Advances the consumer cursor by `n`. Panics if that would move it
    /// past the producer cursor (the precondition is a programming error,
    /// not a runtime condition callers should recover from).
    pub fn consume(&mut self, n: usize) {
        assert!(self.offset + n <= self.storage.len(), "consume past len");
        self.offset += n;
    }

    /// Moves the unconsumed tail to the front and resets `offset` to 0.
    pub fn compact(&mut self) {
        if self.offset == 0 {
            return;
        }
        self.storage.drain(..self.offset);
        self.offset = 0;
    }

    /// Drains `source` into this buffer until it would block, hits EOF, or
    /// errors. Always ensures at least [`READ_CHUNK`] bytes of spare
    /// capacity before each `read`, matching the reference's "ensure 4 KiB
    /// writable" loop invariant.
    pub fn read_from_fd(&mut self, source: &mut impl Read) -> ReadOutcome {
        let mut total = 0usize;
        loop {
            self.ensure_space(READ_CHUNK);
            let start = self.storage.len();
            let cap = self.storage.capacity();
            self.storage.resize(cap, 0);
            let result = source.read(&mut self.storage[start..cap]);
            match result {
                Ok(0) => {
                    self.storage.truncate(start);
                    return if total > 0 { ReadOutcome::Read(total) } else { ReadOutcome::Eof };
                }
                Ok(n) => {
                    self.storage.truncate(start + n);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.storage.truncate(start);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.storage.truncate(start);
                    return ReadOutcome::Read(total);
                }
                Err(_) => {
                    self.storage.truncate(start);
                    return ReadOutcome::Error;
                }
            }
        }
    }

    /// Drains the readable region into `dest` until it would block, the
    /// buffer empties, or an error occurs. Unlike `read_from_fd`, a transient
    /// `EINTR`/`WouldBlock` here returns immediately with whatever was sent
    /// so far instead of retrying locally — the reference implementation
    /// treats both the same way on the send path, leaving the retry to the
    /// next writable event.
    pub fn write_to_fd(&mut self, dest: &mut impl Write) -> WriteOutcome {
        let mut total = 0usize;
        loop {
            if self.readable_len() == 0 {
                return WriteOutcome::Wrote(total);
            }
            match dest.write(self.readable()) {
                Ok(0) => {
                    return if total > 0 { WriteOutcome::Wrote(total) } else { WriteOutcome::Eof };
                }
                Ok(n) => {
                    self.consume(n);
                    total += n;
                }
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) =>
                {
                    return WriteOutcome::Wrote(total);
                }
                Err(_) => return WriteOutcome::Error,
            }
        }
    }
}
