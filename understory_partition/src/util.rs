// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Returns the base-2 logarithm of the number, rounded up (0 for 0 and 1).
#[inline]
pub(crate) const fn log2_ceil(num: usize) -> usize {
    if num <= 1 {
        return 0;
    }
    // `num - 1` has its highest set bit one below the result for every `num >= 2`.
    (usize::BITS - (num - 1).leading_zeros()) as usize
}
