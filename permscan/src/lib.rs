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

//! Empirical GCP IAM permission inventory.
//!
//! Two pipelines compose this crate. The catalog fetcher ([`catalog`])
//! enumerates every permission the IAM backend is willing to evaluate for a
//! resource, paginating `queryTestablePermissions` until exhausted, and
//! persists the deduplicated, sorted list. The batched verifier ([`verify`])
//! reads such a list, partitions it into API-size-limited batches, issues one
//! `testIamPermissions` call per batch, and aggregates the permissions the
//! backend confirms the caller actually holds.
//!
//! The two pipelines never call each other; they share only the persisted
//! permission list as a file contract, plus the [`iam::IamService`] seam and
//! the [`auth`] credential model.

pub mod auth;
pub mod batch;
pub mod cancel;
pub mod catalog;
pub mod iam;
pub mod progress;
pub mod report;
pub mod verify;

pub use cancel::{CancelToken, Interrupted};
pub use progress::{NullProgress, Progress};
pub use report::OutputFormat;
pub use verify::{verify_permissions, RunReport};
