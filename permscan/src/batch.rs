/*
 * Copyright Permscan Contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Partitioning of permission lists into API-size-limited batches.

use std::num::NonZeroUsize;

/// Lazily partition `items` into consecutive sub-slices of at most `size`
/// elements.
///
/// Chunks cover the input exactly once, in order, with no gaps or overlaps;
/// the final chunk may be shorter. An empty input yields no chunks. A zero
/// bound is unrepresentable by construction.
pub fn batches<T>(items: &[T], size: NonZeroUsize) -> impl Iterator<Item = &[T]> {
    items.chunks(size.get())
}

/// Number of chunks [`batches`] will yield for `len` items: ⌈len / size⌉.
pub fn batch_count(len: usize, size: NonZeroUsize) -> usize {
    len.div_ceil(size.get())
}
