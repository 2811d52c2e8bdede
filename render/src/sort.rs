//! Command ordering.
//!
//! Contexts carry one 64-bit sort key per reserved command. Before dispatch
//! the keys are radix-sorted into an index permutation; the sort is stable,
//! so equal keys preserve reservation order and a sequential key counter
//! yields pure submission order.

use crate::context::Context;

/// Stable LSD radix sort over u64 keys, producing an index permutation.
///
/// The workspace is sized once and reused frame to frame. Passes whose byte
/// is constant across all keys are skipped.
pub struct RadixSort {
    order: Vec<u32>,
    scratch: Vec<u32>,
}

impl RadixSort {
    pub fn new(capacity: usize) -> RadixSort {
        RadixSort {
            order: Vec::with_capacity(capacity),
            scratch: vec![0; capacity],
        }
    }

    /// Sorts `keys` and returns indices such that
    /// `keys[order[i]] <= keys[order[i + 1]]`, ties in input order.
    pub fn sort(&mut self, keys: &[u64]) -> &[u32] {
        let count = keys.len();
        self.order.clear();
        self.order.extend(0..count as u32);
        if self.scratch.len() < count {
            self.scratch.resize(count, 0);
        }

        for pass in 0..8 {
            let shift = pass * 8;

            let mut histogram = [0u32; 256];
            for &key in keys {
                histogram[((key >> shift) & 0xff) as usize] += 1;
            }
            // All keys share this byte, nothing to reorder
            if histogram.iter().any(|&n| n as usize == count) {
                continue;
            }

            let mut offsets = [0u32; 256];
            let mut sum = 0;
            for (offset, &n) in offsets.iter_mut().zip(histogram.iter()) {
                *offset = sum;
                sum += n;
            }

            for &index in &self.order {
                let byte = ((keys[index as usize] >> shift) & 0xff) as usize;
                self.scratch[offsets[byte] as usize] = index;
                offsets[byte] += 1;
            }
            std::mem::swap(&mut self.order, &mut self.scratch);
            self.order.truncate(count);
            self.scratch.resize(count, 0);
        }

        &self.order
    }

    pub fn order(&self) -> &[u32] {
        &self.order
    }
}

/// Sorts every context's reserved keys, leaving the permutation inside each
/// context for the subsequent dispatch. Requires quiescent producers.
pub fn sort_merge(contexts: &[&Context]) {
    for context in contexts {
        context.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_sorted(keys: &[u64]) {
        let mut sorter = RadixSort::new(keys.len());
        let order = sorter.sort(keys);
        assert_eq!(order.len(), keys.len());
        for window in order.windows(2) {
            let (a, b) = (keys[window[0] as usize], keys[window[1] as usize]);
            assert!(a <= b);
            if a == b {
                // Stability: equal keys keep input order
                assert!(window[0] < window[1]);
            }
        }
    }

    #[test]
    fn sorts_small_sequences() {
        check_sorted(&[]);
        check_sorted(&[42]);
        check_sorted(&[3, 1, 2]);
        check_sorted(&[5, 5, 5, 5]);
    }

    #[test]
    fn sorts_wide_keys() {
        let keys: Vec<u64> = (0..512)
            .map(|i| {
                let i = i as u64;
                (i.wrapping_mul(0x9e37_79b9_7f4a_7c15)) ^ (i << 40)
            })
            .collect();
        check_sorted(&keys);
    }

    #[test]
    fn sequential_keys_preserve_order() {
        let keys: Vec<u64> = (1..=100).collect();
        let mut sorter = RadixSort::new(keys.len());
        let order = sorter.sort(&keys);
        let expected: Vec<u32> = (0..100).collect();
        assert_eq!(order, expected.as_slice());
    }

    #[test]
    fn high_byte_only_keys() {
        let keys = vec![3u64 << 56, 1u64 << 56, 2u64 << 56];
        let mut sorter = RadixSort::new(keys.len());
        assert_eq!(sorter.sort(&keys), &[1, 2, 0]);
    }
}
