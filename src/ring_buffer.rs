//! Bounded ring buffer with a resizable bound.
//!
//! - **Bounded**: `len() <= bound()` after every operation
//! - **Shrink drops oldest**: lowering the bound truncates from the front
//! - **Grow is lazy**: raising the bound keeps contents; new pushes fill it
//!
//! # Example
//!
//! ```rust
//! use memsweep::ring_buffer::RingBuffer;
//!
//! let mut buffer = RingBuffer::new(3).unwrap();
//! for i in 0..5 {
//!     buffer.push(i);
//! }
//! assert_eq!(buffer.to_vec(), vec![2, 3, 4]);
//!
//! buffer.resize(2).unwrap();
//! assert_eq!(buffer.to_vec(), vec![3, 4]);
//! ```

use crate::error::{MonitorError, Result};
use std::collections::VecDeque;

/// Capacity reserved up front; larger buffers grow as they fill.
const PREALLOCATE_LIMIT: usize = 1024;

/// A ring buffer holding at most `bound` values, oldest first.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: VecDeque<T>,
    bound: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidBound`] if `bound` is 0.
    pub fn new(bound: usize) -> Result<Self> {
        check_bound(bound)?;
        Ok(Self { data: VecDeque::with_capacity(bound.min(PREALLOCATE_LIMIT)), bound })
    }

    /// Pushes a value, discarding the oldest one when full.
    pub fn push(&mut self, value: T) {
        while self.data.len() >= self.bound {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    /// Changes the bound. Shrinking drops the oldest values; growing is a no-op
    /// on contents.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidBound`] if `bound` is 0.
    pub fn resize(&mut self, bound: usize) -> Result<()> {
        check_bound(bound)?;
        let excess = self.data.len().saturating_sub(bound);
        self.data.drain(..excess);
        self.bound = bound;
        Ok(())
    }

    /// Returns the most recent value, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.data.back()
    }

    /// Returns the oldest value, if any.
    #[must_use]
    pub fn oldest(&self) -> Option<&T> {
        self.data.front()
    }

    /// Returns the current number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the current bound.
    #[must_use]
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Removes all values, keeping the bound.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies the contents, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

fn check_bound(bound: usize) -> Result<()> {
    if bound == 0 {
        return Err(MonitorError::InvalidBound {
            what: "ring buffer bound",
            value: bound.to_string(),
        });
    }
    Ok(())
}
