//! Moving average over the most recent pitch estimates.

use std::collections::VecDeque;

/// Fixed-capacity moving average; the oldest estimate is evicted first.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    capacity: usize,
    values: VecDeque<f32>,
}

impl SmoothingBuffer {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends an estimate and returns the new mean.
    pub fn push(&mut self, frequency: f32) -> f32 {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(frequency);
        // never empty after a push
        self.mean().unwrap_or(frequency)
    }

    pub fn mean(&self) -> Option<f32> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f32>() / self.values.len() as f32)
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn averages_until_full_then_slides() {
        let mut buffer = SmoothingBuffer::new(3);
        assert_eq!(buffer.mean(), None);
        assert_abs_diff_eq!(buffer.push(100.0), 100.0);
        assert_abs_diff_eq!(buffer.push(110.0), 105.0);
        assert_abs_diff_eq!(buffer.push(120.0), 110.0);
        // 100 is evicted
        assert_abs_diff_eq!(buffer.push(130.0), 120.0);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn zero_capacity_behaves_as_one() {
        let mut buffer = SmoothingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(50.0);
        assert_abs_diff_eq!(buffer.push(70.0), 70.0);
    }

    #[test]
    fn clear_empties() {
        let mut buffer = SmoothingBuffer::new(5);
        buffer.push(1.0);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.mean(), None);
    }
}
