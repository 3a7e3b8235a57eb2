//! Handle table: integer ids standing in for host values.
//!
//! Slot 0 is the permanent "no value" sentinel. Freed slots are recycled
//! in LIFO order. A handle is only ever reused after an explicit `free`,
//! so a handle can't be recycled while its original owner still holds it.

use std::fmt;

use tracing::debug;

use crate::error::HostError;
use crate::types::HostConfig;
use crate::value::HostValue;

/// Integer naming a host value within one bridge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(u32);

impl Handle {
    /// The "no value" sentinel.
    pub const NONE: Handle = Handle(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Handle from a word read out of guest memory or an import argument.
    pub fn from_word(word: u64) -> Result<Self, HostError> {
        u32::try_from(word)
            .map(Self)
            .map_err(|_| HostError::InvalidHandle(u32::MAX))
    }

    /// Handle carried as a host number. Only non-negative whole numbers
    /// that fit a handle qualify.
    pub fn from_number(n: f64) -> Result<Self, HostError> {
        if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
            Ok(Self(n as u32))
        } else {
            Err(HostError::InvalidHandle(u32::MAX))
        }
    }

    pub const fn to_word(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Id-indexed store of host values with free-list recycling.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Option<HostValue>>,
    free_list: Vec<u32>,
    /// Handles below this id are pinned roots and are never freed.
    pinned: u32,
    max_slots: usize,
}

impl HandleTable {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            // Slot 0 is the sentinel and never holds a value.
            slots: vec![None],
            free_list: Vec::new(),
            pinned: 1,
            max_slots: config.max_handles,
        }
    }

    /// Store `value` and return its handle.
    ///
    /// `Absent` is never stored: it always maps to `Handle::NONE`.
    pub fn alloc(&mut self, value: HostValue) -> Result<Handle, HostError> {
        if value.is_absent() {
            return Ok(Handle::NONE);
        }
        if let Some(id) = self.free_list.pop() {
            self.slots[id as usize] = Some(value);
            debug!(handle = id, "handle reused");
            return Ok(Handle(id));
        }
        if self.slots.len() >= self.max_slots {
            return Err(HostError::HandleLimit(self.max_slots));
        }
        let id = self.slots.len() as u32;
        self.slots.push(Some(value));
        debug!(handle = id, "handle allocated");
        Ok(Handle(id))
    }

    /// Allocate a handle that can never be freed.
    ///
    /// Only valid before any ordinary allocation, so pinned handles form a
    /// contiguous prefix starting at 1.
    pub fn alloc_pinned(&mut self, value: HostValue) -> Result<Handle, HostError> {
        if self.slots.len() as u32 != self.pinned || !self.free_list.is_empty() {
            return Err(HostError::Internal(
                "pinned handles must be allocated first".into(),
            ));
        }
        let handle = self.alloc(value)?;
        if handle.is_none() {
            return Err(HostError::Internal("cannot pin an absent value".into()));
        }
        self.pinned += 1;
        Ok(handle)
    }

    /// Release `handle` for reuse.
    ///
    /// Freeing `Handle::NONE` or a pinned root does nothing. Freeing an
    /// empty or unknown slot is an error and leaves the free list intact.
    pub fn free(&mut self, handle: Handle) -> Result<(), HostError> {
        if handle.is_none() {
            return Ok(());
        }
        if handle.0 < self.pinned {
            debug!(handle = handle.0, "ignoring free of pinned handle");
            return Ok(());
        }
        let slot = self
            .slots
            .get_mut(handle.0 as usize)
            .ok_or(HostError::InvalidHandle(handle.0))?;
        if slot.take().is_none() {
            return Err(HostError::InvalidHandle(handle.0));
        }
        self.free_list.push(handle.0);
        debug!(handle = handle.0, "handle freed");
        Ok(())
    }

    /// Value named by `handle`. `Handle::NONE` resolves to `Absent`.
    pub fn get(&self, handle: Handle) -> Result<HostValue, HostError> {
        if handle.is_none() {
            return Ok(HostValue::Absent);
        }
        match self.slots.get(handle.0 as usize) {
            Some(Some(value)) => Ok(value.clone()),
            _ => Err(HostError::InvalidHandle(handle.0)),
        }
    }

    /// Resolve and release `handle` in one step.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue, HostError> {
        let value = self.get(handle)?;
        self.free(handle)?;
        Ok(value)
    }

    /// Allocate one handle per value, all or nothing.
    ///
    /// If any allocation fails, every handle already allocated by this call
    /// is freed before the error is returned.
    pub fn alloc_all(&mut self, values: &[HostValue]) -> Result<Vec<Handle>, HostError> {
        let mut handles = Vec::with_capacity(values.len());
        for value in values {
            match self.alloc(value.clone()) {
                Ok(h) => handles.push(h),
                Err(e) => {
                    self.free_all(&handles);
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Free every handle in `handles`, ignoring individual failures.
    pub fn free_all(&mut self, handles: &[Handle]) {
        for &h in handles {
            if let Err(e) = self.free(h) {
                debug!(handle = h.0, error = %e, "free during cleanup failed");
            }
        }
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        matches!(self.slots.get(handle.0 as usize), Some(Some(_)))
    }

    /// Number of slots holding a value, pinned roots included.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Total slots ever created, sentinel included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new(&HostConfig::default())
    }
}
