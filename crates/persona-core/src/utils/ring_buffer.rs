// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A bounded, oldest-first rolling window.

use std::collections::VecDeque;

/// A fixed-capacity circular buffer that overwrites its oldest value when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a new, empty ring buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a new value, returning the value it displaced if the buffer was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let displaced = if self.data.len() == self.capacity {
            self.data.pop_front()
        } else {
            None
        };
        self.data.push_back(value);
        displaced
    }

    /// Returns the number of elements currently in the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer holds no values.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the maximum number of values retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the most recently pushed value.
    pub fn latest(&self) -> Option<&T> {
        self.data.back()
    }

    /// Iterates over the values in chronological order (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Removes every value.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Arithmetic mean of a projection of the values, or `0.0` if empty.
    pub fn average_by(&self, f: impl Fn(&T) -> f64) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(f).sum::<f64>() / self.data.len() as f64
    }

    /// Maximum of a projection of the values, or `0.0` if empty.
    pub fn max_by(&self, f: impl Fn(&T) -> f64) -> f64 {
        self.data.iter().map(f).fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        })
        .unwrap_or(0.0)
    }

    /// Difference between the mean of the newer half and the older half.
    /// Positive when the projected value is increasing.
    pub fn trend_by(&self, f: impl Fn(&T) -> f64) -> f64 {
        let count = self.data.len();
        if count < 2 {
            return 0.0;
        }
        let half = count / 2;
        let older: f64 = self.data.iter().take(half).map(&f).sum::<f64>() / half as f64;
        let newer: f64 = self.data.iter().skip(count - half).map(&f).sum::<f64>() / half as f64;
        newer - older
    }
}
