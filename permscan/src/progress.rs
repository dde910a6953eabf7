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

//! Presentation seam for pipeline progress.
//!
//! Progress reporting is observational only: implementations must not affect
//! the result of a run. The CLI installs an interactive implementation; tests
//! substitute recording sinks or [`NullProgress`].

/// Receives progress events from the catalog fetcher and the verifier.
pub trait Progress {
    /// Called periodically during a catalog fetch with the number of pages
    /// retrieved so far and the size of the accumulated set.
    fn pages_fetched(&self, pages: usize, total_permissions: usize) {
        let _ = (pages, total_permissions);
    }

    /// Called after each verification batch completes (successfully or not).
    fn batch_done(&self, completed: usize, total: usize) {
        let _ = (completed, total);
    }

    /// Called as soon as a batch confirms permissions, before the run ends.
    fn permissions_granted(&self, permissions: &[String]) {
        let _ = permissions;
    }
}

/// Discards all progress events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl Progress for NullProgress {}
