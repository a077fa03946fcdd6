// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by every partition.

use alloc::collections::TryReserveError;

/// Failures reported by [`SpatialPartition`][crate::SpatialPartition] operations.
///
/// Every error is raised synchronously at the offending call and leaves the partition
/// exactly as it was before that call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// `add` was called for an item that is already present.
    #[error("item is already present in the partition")]
    DuplicateItem,
    /// `remove` or `update` was called for an item that is not present.
    #[error("item is not present in the partition")]
    NotFound,
    /// The item's bounds are NaN, infinite, or inverted (`min > max`).
    #[error("item bounds are NaN, infinite, or inverted")]
    InvalidAabb,
    /// Storage for a rebuild could not be reserved; the previous structure is kept.
    #[error("failed to reserve storage for a rebuild")]
    Allocation(#[from] TryReserveError),
}
