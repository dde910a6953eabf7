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

//! Cooperative cancellation for the long-running pipelines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

/// Cancellation token checked between network calls.
///
/// Clones share state, so a signal handler can cancel a run held by the
/// pipeline. Cancellation is one-way; a cancelled token stays cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A run was cancelled by the user before it completed.
///
/// Surfaced without a stack trace and mapped to a dedicated exit status by
/// the CLI; no output file is written for a cancelled run.
#[derive(Debug, Error, Diagnostic)]
#[error("operation cancelled by user")]
pub struct Interrupted;
