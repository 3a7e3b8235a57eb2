//! Typed views over guest linear memory, and the host frame region.
//!
//! A view borrows the store's memory bytes, so it can't be held across
//! any call that might grow (and reallocate) the buffer. Re-derive a view
//! immediately before each access; see `state::with_view`.
//!
//! All accesses are bounds-checked and fail with `HostError::OutOfBounds`.
//! Multi-byte values are little-endian.

use std::ops::Range;

use hostbridge_hostapi::{Handle, HostError};

use crate::config::WordSize;

/// WASM page size in bytes.
pub const PAGE_SIZE: usize = 65536;

/// Scalar that can be stored in linear memory.
pub trait Primitive: Copy {
    const SIZE: usize;
    fn from_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_primitive {
    ($($t:ty),*) => {
        $(
            impl Primitive for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_primitive!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

/// Validate `[offset, offset+len)` against a buffer of `size` bytes.
fn checked_range(size: usize, offset: u64, len: u64) -> Result<Range<usize>, HostError> {
    let oob = || HostError::out_of_bounds(offset, len, size);
    let start = usize::try_from(offset).map_err(|_| oob())?;
    let len_usize = usize::try_from(len).map_err(|_| oob())?;
    let end = start.checked_add(len_usize).ok_or_else(oob)?;
    if end > size {
        return Err(oob());
    }
    Ok(start..end)
}

fn frame_bytes(word: WordSize, count: u64) -> Result<u64, HostError> {
    count
        .checked_mul(word.bytes() as u64)
        .ok_or(HostError::out_of_bounds(0, u64::MAX, 0))
}

/// Read-only typed view of guest memory.
pub struct MemoryView<'a> {
    data: &'a [u8],
    word: WordSize,
}

impl<'a> MemoryView<'a> {
    pub fn new(data: &'a [u8], word: WordSize) -> Self {
        Self { data, word }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn word_size(&self) -> WordSize {
        self.word
    }

    pub fn read_bytes(&self, offset: u64, len: u64) -> Result<&'a [u8], HostError> {
        let range = checked_range(self.data.len(), offset, len)?;
        Ok(&self.data[range])
    }

    pub fn read<T: Primitive>(&self, offset: u64) -> Result<T, HostError> {
        Ok(T::from_le(self.read_bytes(offset, T::SIZE as u64)?))
    }

    /// Decode `len` bytes at `offset` as UTF-8, replacing invalid sequences.
    pub fn read_string(&self, offset: u64, len: u64) -> Result<String, HostError> {
        let bytes = self.read_bytes(offset, len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Unsigned word at `offset`.
    pub fn read_word(&self, offset: u64) -> Result<u64, HostError> {
        match self.word {
            WordSize::W32 => self.read::<u32>(offset).map(u64::from),
            WordSize::W64 => self.read::<u64>(offset),
        }
    }

    /// Signed word at `offset`.
    pub fn read_int(&self, offset: u64) -> Result<i64, HostError> {
        match self.word {
            WordSize::W32 => self.read::<i32>(offset).map(i64::from),
            WordSize::W64 => self.read::<i64>(offset),
        }
    }

    /// Handles of a call frame of `count` words at `ptr`.
    pub fn read_frame(&self, ptr: u64, count: u64) -> Result<Vec<Handle>, HostError> {
        let width = self.word.bytes() as u64;
        // Bounds-check the whole frame before reading any entry.
        checked_range(self.data.len(), ptr, frame_bytes(self.word, count)?)?;
        (0..count)
            .map(|i| Handle::from_word(self.read_word(ptr + i * width)?))
            .collect()
    }
}

/// Mutable typed view of guest memory.
pub struct MemoryViewMut<'a> {
    data: &'a mut [u8],
    word: WordSize,
}

impl<'a> MemoryViewMut<'a> {
    pub fn new(data: &'a mut [u8], word: WordSize) -> Self {
        Self { data, word }
    }

    /// Read-only view of the same bytes.
    pub fn view(&self) -> MemoryView<'_> {
        MemoryView::new(&*self.data, self.word)
    }

    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), HostError> {
        let range = checked_range(self.data.len(), offset, bytes.len() as u64)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write<T: Primitive>(&mut self, offset: u64, value: T) -> Result<(), HostError> {
        let range = checked_range(self.data.len(), offset, T::SIZE as u64)?;
        value.write_le(&mut self.data[range]);
        Ok(())
    }

    /// Write the UTF-8 encoding of `text` and return its byte length.
    pub fn write_string(&mut self, offset: u64, text: &str) -> Result<usize, HostError> {
        self.write_bytes(offset, text.as_bytes())?;
        Ok(text.len())
    }

    pub fn write_word(&mut self, offset: u64, word: u64) -> Result<(), HostError> {
        match self.word {
            WordSize::W32 => self.write::<u32>(offset, word as u32),
            WordSize::W64 => self.write::<u64>(offset, word),
        }
    }

    pub fn write_int(&mut self, offset: u64, value: i64) -> Result<(), HostError> {
        match self.word {
            WordSize::W32 => self.write::<i32>(offset, value as i32),
            WordSize::W64 => self.write::<i64>(offset, value),
        }
    }

    pub fn write_frame(&mut self, ptr: u64, handles: &[Handle]) -> Result<(), HostError> {
        let width = self.word.bytes() as u64;
        checked_range(
            self.data.len(),
            ptr,
            frame_bytes(self.word, handles.len() as u64)?,
        )?;
        for (i, h) in handles.iter().enumerate() {
            self.write_word(ptr + i as u64 * width, h.to_word())?;
        }
        Ok(())
    }
}

/// Compute how many 8-byte-aligned bytes are needed.
fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// Stack of host-written call frames inside guest memory.
///
/// After instantiation the runtime grows memory and reserves the new
/// pages for frames. Nested host-to-guest calls push above their caller's
/// frame; each call releases back to its mark when it returns.
#[derive(Debug, Clone)]
pub struct FrameStack {
    /// Base address of the frame region in guest memory.
    base: usize,
    /// Bytes in use above `base`.
    top: usize,
    /// Total bytes in the region.
    capacity: usize,
}

impl FrameStack {
    pub fn new(base: usize, capacity: usize) -> Self {
        Self {
            base,
            top: 0,
            capacity,
        }
    }

    /// Reserve `size` bytes and return the frame's address.
    pub fn push(&mut self, size: usize) -> Result<u64, HostError> {
        let aligned = align8(size.max(1));
        let available = self.capacity - self.top;
        if aligned > available {
            return Err(HostError::FrameOverflow {
                needed: aligned,
                available,
            });
        }
        let ptr = self.base + self.top;
        self.top += aligned;
        Ok(ptr as u64)
    }

    /// Current stack position, to pass to [`release`](Self::release).
    pub fn mark(&self) -> usize {
        self.top
    }

    /// Pop every frame pushed since `mark`.
    pub fn release(&mut self, mark: usize) {
        self.top = mark.min(self.top);
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Primitive + PartialEq + std::fmt::Debug>(values: &[T]) {
        let mut mem = vec![0u8; 32];
        for &v in values {
            for offset in [0u64, 3, 32 - T::SIZE as u64] {
                let mut view = MemoryViewMut::new(&mut mem, WordSize::W32);
                view.write(offset, v).unwrap();
                assert_eq!(view.view().read::<T>(offset).unwrap(), v);
            }
        }
    }

    #[test]
    fn test_primitive_round_trip() {
        round_trip(&[i8::MIN, -1, 0, i8::MAX]);
        round_trip(&[0u8, 0x7f, u8::MAX]);
        round_trip(&[i16::MIN, -2, i16::MAX]);
        round_trip(&[0u16, u16::MAX]);
        round_trip(&[i32::MIN, -3, 0x1234_5678, i32::MAX]);
        round_trip(&[0u32, u32::MAX]);
        round_trip(&[i64::MIN, -4, i64::MAX]);
        round_trip(&[0u64, u64::MAX]);
        round_trip(&[0.0f32, -1.5, f32::MAX, f32::MIN_POSITIVE]);
        round_trip(&[0.0f64, 2.5e300, -7.25, f64::MIN]);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut mem = vec![0u8; 8];
        MemoryViewMut::new(&mut mem, WordSize::W32)
            .write::<u32>(0, 0x0403_0201)
            .unwrap();
        assert_eq!(&mem[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut mem = vec![0u8; 8];
        let mut view = MemoryViewMut::new(&mut mem, WordSize::W32);
        assert_eq!(
            view.write::<u32>(6, 1).unwrap_err(),
            HostError::out_of_bounds(6, 4, 8)
        );
        assert!(view.view().read::<u64>(1).is_err());
        assert!(view.view().read_bytes(u64::MAX, 2).is_err());
        assert!(view.write_bytes(8, &[1]).is_err());
        assert!(view.write_bytes(8, &[]).is_ok());
    }

    #[test]
    fn test_string_round_trip() {
        let mut mem = vec![0u8; 64];
        let mut view = MemoryViewMut::new(&mut mem, WordSize::W32);
        for s in ["", "hello", "héllo wörld", "日本語", "emoji 🦀"] {
            let n = view.write_string(5, s).unwrap();
            assert_eq!(n, s.len());
            assert_eq!(view.view().read_string(5, n as u64).unwrap(), s);
        }
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mem = vec![b'a', 0xff, b'b'];
        let view = MemoryView::new(&mem, WordSize::W32);
        assert_eq!(view.read_string(0, 3).unwrap(), "a\u{fffd}b");
    }

    #[test]
    fn test_word_width() {
        let mut mem = vec![0u8; 16];
        let mut w32 = MemoryViewMut::new(&mut mem, WordSize::W32);
        w32.write_int(0, -1).unwrap();
        assert_eq!(w32.view().read_int(0).unwrap(), -1);
        assert_eq!(w32.view().read_word(0).unwrap(), u32::MAX as u64);
        assert_eq!(w32.view().read::<u32>(4).unwrap(), 0);

        let mut w64 = MemoryViewMut::new(&mut mem, WordSize::W64);
        w64.write_word(8, 1 << 40).unwrap();
        assert_eq!(w64.view().read_word(8).unwrap(), 1 << 40);
        w64.write_int(0, -5).unwrap();
        assert_eq!(w64.view().read_int(0).unwrap(), -5);
    }

    #[test]
    fn test_frame_round_trip() {
        let handles = [Handle::new(3), Handle::NONE, Handle::new(70000)];
        for word in [WordSize::W32, WordSize::W64] {
            let mut mem = vec![0u8; 64];
            let mut view = MemoryViewMut::new(&mut mem, word);
            view.write_frame(8, &handles).unwrap();
            assert_eq!(view.view().read_frame(8, 3).unwrap(), handles);
            assert!(view.view().read_frame(8, 100).is_err());
            assert!(view.view().read_frame(8, u64::MAX).is_err());
        }
    }

    #[test]
    fn test_frame_stack_nesting() {
        let mut frames = FrameStack::new(65536, 64);
        let outer_mark = frames.mark();
        let outer = frames.push(12).unwrap();
        assert_eq!(outer, 65536);

        let inner_mark = frames.mark();
        let inner = frames.push(4).unwrap();
        assert_eq!(inner, 65536 + 16); // 12 aligned to 16
        frames.release(inner_mark);

        assert_eq!(frames.push(4).unwrap(), inner);
        frames.release(outer_mark);
        assert_eq!(frames.mark(), 0);
    }

    #[test]
    fn test_frame_stack_overflow() {
        let mut frames = FrameStack::new(0, 16);
        frames.push(8).unwrap();
        assert_eq!(
            frames.push(16).unwrap_err(),
            HostError::FrameOverflow {
                needed: 16,
                available: 8
            }
        );
        // Empty frames still take a slot so nested pointers stay distinct.
        assert!(frames.push(0).is_ok());
    }
}
