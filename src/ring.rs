//! Circular byte buffer for the down-channel.
//!
//! Unlike a record queue, this ring hands out raw contiguous runs: `produce`
//! and `consume` both return a pointer valid for exactly the requested/granted
//! length and never spanning the wrap boundary. Callers that want more than
//! one contiguous run loop. There is no internal waiting and no atomics; the
//! caller serializes access (see the crate-level concurrency contract).
//!
//! A zero-capacity ring is valid and permanently empty/full. It is how the
//! down-channel is disabled at init time without a null-pointer special case.

/// Byte ring over caller-provided storage.
pub struct RingBuf {
    base: *mut u8,
    capacity: u32,
    read_cursor: u32,
    write_cursor: u32,
    used: u32,
}

// SAFETY: the ring does not share its cursors; the storage it points into is
// the caller's to synchronize, same as the rest of the crate.
unsafe impl Send for RingBuf {}

impl RingBuf {
    /// Wrap `capacity` bytes of storage starting at `base`.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `capacity` bytes for the
    /// lifetime of the ring, and must not be accessed through other aliases
    /// while the ring is live.
    pub unsafe fn new(base: *mut u8, capacity: u32) -> Self {
        Self {
            base,
            capacity,
            read_cursor: 0,
            write_cursor: 0,
            used: 0,
        }
    }

    /// A ring that always reports zero space. Never dereferences its base.
    pub fn disabled() -> Self {
        Self {
            base: core::ptr::null_mut(),
            capacity: 0,
            read_cursor: 0,
            write_cursor: 0,
            used: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.capacity == 0
    }

    /// Written-but-unread bytes, counting across the wrap boundary.
    #[inline]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    pub fn free(&self) -> u32 {
        self.capacity - self.used
    }

    /// Largest single `produce` that can currently succeed.
    #[inline]
    pub fn contiguous_free(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        self.free().min(self.capacity - self.write_cursor)
    }

    /// Largest single `consume` that can currently succeed.
    #[inline]
    pub fn contiguous_used(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        self.used.min(self.capacity - self.read_cursor)
    }

    /// Reserve a contiguous writable run of exactly `len` bytes.
    ///
    /// Fails if the run before wraparound, or before colliding with the read
    /// cursor, is smaller than `len`. The returned pointer is valid until the
    /// matching bytes are consumed.
    pub fn produce(&mut self, len: u32) -> Option<*mut u8> {
        if len == 0 || len > self.contiguous_free() {
            return None;
        }
        let ptr = unsafe { self.base.add(self.write_cursor as usize) };
        self.write_cursor += len;
        if self.write_cursor == self.capacity {
            self.write_cursor = 0;
        }
        self.used += len;
        Some(ptr)
    }

    /// Take the next contiguous unread run, at most `max_len` bytes long.
    ///
    /// Returns `None` when nothing is buffered. Never busy-waits.
    pub fn consume(&mut self, max_len: u32) -> Option<(*const u8, u32)> {
        let avail = self.contiguous_used();
        if avail == 0 || max_len == 0 {
            return None;
        }
        let len = avail.min(max_len);
        let ptr = unsafe { self.base.add(self.read_cursor as usize) as *const u8 };
        self.read_cursor += len;
        if self.read_cursor == self.capacity {
            self.read_cursor = 0;
        }
        self.used -= len;
        Some((ptr, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Rng(u64);

    impl Rng {
        fn next_u32(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            self.0 = x;
            ((x.wrapping_mul(0x2545F4914F6CDD1D)) >> 32) as u32
        }
    }

    fn ring_over(storage: &mut [u8]) -> RingBuf {
        unsafe { RingBuf::new(storage.as_mut_ptr(), storage.len() as u32) }
    }

    fn push_all(ring: &mut RingBuf, bytes: &[u8]) -> bool {
        let mut off = 0;
        while off < bytes.len() {
            let chunk = (bytes.len() - off).min(ring.contiguous_free() as usize);
            if chunk == 0 {
                return false;
            }
            let dst = ring.produce(chunk as u32).unwrap();
            unsafe {
                core::ptr::copy_nonoverlapping(bytes[off..].as_ptr(), dst, chunk);
            }
            off += chunk;
        }
        true
    }

    fn pop_up_to(ring: &mut RingBuf, max: u32) -> Vec<u8> {
        match ring.consume(max) {
            Some((ptr, len)) => {
                let mut out = vec![0u8; len as usize];
                unsafe {
                    core::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), len as usize);
                }
                out
            }
            None => Vec::new(),
        }
    }

    #[test]
    fn disabled_ring_reports_zero_everywhere() {
        let mut ring = RingBuf::disabled();
        assert!(ring.is_disabled());
        assert_eq!(ring.contiguous_free(), 0);
        assert!(ring.produce(1).is_none());
        assert!(ring.produce(0).is_none());
        assert!(ring.consume(16).is_none());
    }

    #[test]
    fn produce_fails_without_contiguous_room() {
        let mut storage = [0u8; 16];
        let mut ring = ring_over(&mut storage);

        assert!(ring.produce(12).is_some());
        // 4 bytes remain before the wrap boundary; 6 do not fit contiguously.
        assert!(ring.produce(6).is_none());
        assert!(ring.produce(4).is_some());
        assert_eq!(ring.free(), 0);
        assert!(ring.produce(1).is_none());
    }

    #[test]
    fn consume_stops_at_wrap_boundary() {
        let mut storage = [0u8; 8];
        let mut ring = ring_over(&mut storage);

        push_all(&mut ring, b"abcdef");
        assert_eq!(pop_up_to(&mut ring, 6), b"abcdef");
        // Cursors now sit at offset 6; the next 4 bytes wrap.
        push_all(&mut ring, b"wxyz");
        assert_eq!(pop_up_to(&mut ring, 4), b"wx");
        assert_eq!(pop_up_to(&mut ring, 4), b"yz");
        assert!(ring.consume(4).is_none());
    }

    #[test]
    fn fifo_order_survives_wraparound() {
        // Random produce/consume against a VecDeque model, with a capacity
        // small enough to wrap hundreds of times.
        let mut storage = [0u8; 32];
        let mut ring = ring_over(&mut storage);
        let mut model: VecDeque<u8> = VecDeque::new();
        let mut rng = Rng(0x9E3779B97F4A7C15);
        let mut next_byte = 0u8;

        for _ in 0..10_000 {
            if rng.next_u32() & 1 == 0 {
                let want = rng.next_u32() % 9;
                let chunk: Vec<u8> = (0..want)
                    .map(|_| {
                        next_byte = next_byte.wrapping_add(1);
                        next_byte
                    })
                    .collect();
                if (ring.free() as usize) >= chunk.len() {
                    assert!(push_all(&mut ring, &chunk));
                    model.extend(chunk.iter());
                } else {
                    next_byte = next_byte.wrapping_sub(chunk.len() as u8);
                }
            } else {
                let got = pop_up_to(&mut ring, rng.next_u32() % 9);
                for b in got {
                    assert_eq!(Some(b), model.pop_front());
                }
            }
            assert_eq!(ring.used() as usize, model.len());
        }

        loop {
            let got = pop_up_to(&mut ring, 32);
            if got.is_empty() {
                break;
            }
            for b in got {
                assert_eq!(Some(b), model.pop_front());
            }
        }
        assert!(model.is_empty());
    }
}
