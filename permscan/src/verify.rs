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

//! The batched verifier: which of a list of permissions does the caller
//! actually hold on a resource.

use std::collections::{BTreeSet, HashSet};
use std::num::NonZeroUsize;

use tracing::{debug, warn};

use crate::batch::{batch_count, batches};
use crate::cancel::{CancelToken, Interrupted};
use crate::iam::{IamService, MAX_TEST_BATCH};
use crate::progress::Progress;

/// Outcome of one verifier run.
///
/// `granted` holds every permission the endpoint confirmed, deduplicated and
/// sorted. `unknown` holds permissions whose every occurrence fell in a
/// failed batch: the verification call itself errored, so "not granted" and
/// "call failed" cannot be told apart, and they are reported separately
/// rather than silently merged. The two sets are disjoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub granted: BTreeSet<String>,
    pub unknown: BTreeSet<String>,
    pub failed_batches: usize,
    pub total_batches: usize,
}

/// Qualify a bare project ID as a resource path. Already-qualified targets
/// pass through unchanged.
pub fn normalize_project_resource(target: &str) -> String {
    if target.starts_with("projects/") {
        target.to_owned()
    } else {
        format!("projects/{target}")
    }
}

/// Test `permissions` against `target` in batches of at most `batch_size`.
///
/// Batches follow input order; each failed verification call is logged as a
/// warning and skipped without aborting the run. The final granted set is a
/// subset of the input, independent of batch order. Returns [`Interrupted`]
/// when `cancel` is set between batches.
pub fn verify_permissions(
    service: &dyn IamService,
    target: &str,
    permissions: &[String],
    batch_size: NonZeroUsize,
    progress: &dyn Progress,
    cancel: &CancelToken,
) -> Result<RunReport, Interrupted> {
    let resource = normalize_project_resource(target);
    let bound = clamp_batch_size(batch_size);
    let total = batch_count(permissions.len(), bound);
    let mut report = RunReport {
        total_batches: total,
        ..RunReport::default()
    };

    for (index, batch) in batches(permissions, bound).enumerate() {
        if cancel.is_cancelled() {
            return Err(Interrupted);
        }
        match service.test_permissions(&resource, batch) {
            Ok(confirmed) => {
                let requested: HashSet<&str> = batch.iter().map(String::as_str).collect();
                let mut fresh = Vec::new();
                for permission in confirmed {
                    if !requested.contains(permission.as_str()) {
                        debug!(%permission, "endpoint confirmed a permission that was not requested; ignoring");
                        continue;
                    }
                    if report.granted.insert(permission.clone()) {
                        fresh.push(permission);
                    }
                }
                if !fresh.is_empty() {
                    progress.permissions_granted(&fresh);
                }
            }
            Err(err) => {
                warn!(
                    batch = index + 1,
                    total,
                    error = %err,
                    "verification call failed; batch skipped"
                );
                report.failed_batches += 1;
                report.unknown.extend(batch.iter().cloned());
            }
        }
        progress.batch_done(index + 1, total);
    }

    let RunReport {
        granted, unknown, ..
    } = &mut report;
    unknown.retain(|permission| !granted.contains(permission));
    Ok(report)
}

fn clamp_batch_size(batch_size: NonZeroUsize) -> NonZeroUsize {
    if batch_size.get() > MAX_TEST_BATCH {
        warn!(
            requested = batch_size.get(),
            max = MAX_TEST_BATCH,
            "batch size exceeds the API maximum; clamping"
        );
        NonZeroUsize::new(MAX_TEST_BATCH).unwrap_or(batch_size)
    } else {
        batch_size
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::{normalize_project_resource, verify_permissions, RunReport};
    use crate::cancel::CancelToken;
    use crate::iam::{IamError, IamService, PermissionPage};
    use crate::progress::{NullProgress, Progress};
    use std::cell::RefCell;
    use std::collections::{BTreeSet, HashSet};
    use std::num::NonZeroUsize;

    /// Grants a fixed set of permissions; optionally fails selected calls.
    /// Records every batch it receives.
    struct FakeService {
        granted: HashSet<String>,
        fail_calls: HashSet<usize>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl FakeService {
        fn granting(granted: &[&str]) -> Self {
            Self {
                granted: granted.iter().map(|p| (*p).to_owned()).collect(),
                fail_calls: HashSet::new(),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing_call(mut self, call: usize) -> Self {
            self.fail_calls.insert(call);
            self
        }
    }

    impl IamService for FakeService {
        fn query_testable_permissions(
            &self,
            _full_resource: &str,
            _page_size: usize,
            _page_token: Option<&str>,
        ) -> Result<PermissionPage, IamError> {
            panic!("the verifier never lists permissions")
        }

        fn test_permissions(
            &self,
            _resource: &str,
            permissions: &[String],
        ) -> Result<Vec<String>, IamError> {
            let call = self.calls.borrow().len();
            self.calls.borrow_mut().push(permissions.to_vec());
            if self.fail_calls.contains(&call) {
                return Err(IamError::Transport {
                    operation: "testIamPermissions",
                    detail: "connection reset".to_owned(),
                });
            }
            // Reversed to exercise order-independence of the aggregate.
            Ok(permissions
                .iter()
                .rev()
                .filter(|p| self.granted.contains(p.as_str()))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        batches: RefCell<Vec<(usize, usize)>>,
        granted: RefCell<Vec<String>>,
    }

    impl Progress for RecordingProgress {
        fn batch_done(&self, completed: usize, total: usize) {
            self.batches.borrow_mut().push((completed, total));
        }

        fn permissions_granted(&self, permissions: &[String]) {
            self.granted.borrow_mut().extend_from_slice(permissions);
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn normalizes_bare_project_ids() {
        assert_eq!(normalize_project_resource("my-project"), "projects/my-project");
        assert_eq!(
            normalize_project_resource("projects/my-project"),
            "projects/my-project"
        );
    }

    #[test]
    fn duplicated_unsorted_input_yields_sorted_deduplicated_report() {
        let service = FakeService::granting(&["a.b.get", "c.d.list"]);
        let input = strings(&["a.b.get", "a.b.get", "a.b.set", "c.d.list"]);
        let report = verify_permissions(
            &service,
            "demo",
            &input,
            size(2),
            &NullProgress,
            &CancelToken::new(),
        )
        .unwrap();

        let expected: BTreeSet<String> = ["a.b.get", "c.d.list"]
            .iter()
            .map(|p| (*p).to_owned())
            .collect();
        assert_eq!(report.granted, expected);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(report.total_batches, 2);

        // Batches preserve input order, duplicates included.
        let calls = service.calls.borrow();
        assert_eq!(calls[0], strings(&["a.b.get", "a.b.get"]));
        assert_eq!(calls[1], strings(&["a.b.set", "c.d.list"]));
    }

    #[test]
    fn result_is_subset_of_input() {
        let service = FakeService::granting(&["a.b.get", "x.y.z"]);
        let input = strings(&["a.b.get", "a.b.set"]);
        let report = verify_permissions(
            &service,
            "demo",
            &input,
            size(25),
            &NullProgress,
            &CancelToken::new(),
        )
        .unwrap();
        let input_set: BTreeSet<&str> = input.iter().map(String::as_str).collect();
        assert!(report
            .granted
            .iter()
            .all(|p| input_set.contains(p.as_str())));
        assert!(!report.granted.contains("x.y.z"));
    }

    #[test]
    fn unrequested_confirmations_are_discarded() {
        struct InventingService;
        impl IamService for InventingService {
            fn query_testable_permissions(
                &self,
                _full_resource: &str,
                _page_size: usize,
                _page_token: Option<&str>,
            ) -> Result<PermissionPage, IamError> {
                panic!("the verifier never lists permissions")
            }

            fn test_permissions(
                &self,
                _resource: &str,
                _permissions: &[String],
            ) -> Result<Vec<String>, IamError> {
                Ok(strings(&["made.up.permission"]))
            }
        }
        let report = verify_permissions(
            &InventingService,
            "demo",
            &strings(&["a.b.get"]),
            size(25),
            &NullProgress,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(report.granted.is_empty());
    }

    #[test]
    fn failed_batch_is_skipped_and_later_batches_still_run() {
        let service = FakeService::granting(&["a.a.get", "b.b.get", "c.c.get"]).failing_call(1);
        let input = strings(&["a.a.get", "b.b.get", "c.c.get"]);
        let progress = RecordingProgress::default();
        let report = verify_permissions(
            &service,
            "demo",
            &input,
            size(1),
            &progress,
            &CancelToken::new(),
        )
        .unwrap();

        assert!(report.granted.contains("a.a.get"));
        assert!(!report.granted.contains("b.b.get"));
        assert!(report.granted.contains("c.c.get"));
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.total_batches, 3);
        assert!(report.unknown.contains("b.b.get"));
        assert_eq!(service.calls.borrow().len(), 3);
        assert_eq!(
            *progress.batches.borrow(),
            vec![(1, 3), (2, 3), (3, 3)]
        );
    }

    #[test]
    fn unknown_excludes_permissions_confirmed_elsewhere() {
        // "a.a.get" appears in both batches; the first fails, the second
        // confirms it, so it must come out granted, not unknown.
        let service = FakeService::granting(&["a.a.get"]).failing_call(0);
        let input = strings(&["a.a.get", "b.b.get", "a.a.get"]);
        let report = verify_permissions(
            &service,
            "demo",
            &input,
            size(2),
            &NullProgress,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(report.granted.contains("a.a.get"));
        assert!(!report.unknown.contains("a.a.get"));
        assert!(report.unknown.contains("b.b.get"));
    }

    #[test]
    fn confirmed_permissions_are_reported_as_they_arrive() {
        let service = FakeService::granting(&["a.a.get", "b.b.get"]);
        let input = strings(&["a.a.get", "b.b.get"]);
        let progress = RecordingProgress::default();
        verify_permissions(
            &service,
            "demo",
            &input,
            size(1),
            &progress,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(*progress.granted.borrow(), strings(&["a.a.get", "b.b.get"]));
    }

    #[test]
    fn oversized_batch_size_is_clamped_to_api_maximum() {
        let service = FakeService::granting(&[]);
        let input: Vec<String> = (0..250).map(|i| format!("svc.res.verb{i}")).collect();
        let report = verify_permissions(
            &service,
            "demo",
            &input,
            size(1000),
            &NullProgress,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(report.total_batches, 3);
        assert!(service.calls.borrow().iter().all(|b| b.len() <= 100));
    }

    #[test]
    fn cancelled_token_stops_before_the_next_batch() {
        let service = FakeService::granting(&["a.a.get"]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = verify_permissions(
            &service,
            "demo",
            &strings(&["a.a.get"]),
            size(25),
            &NullProgress,
            &cancel,
        );
        assert!(result.is_err());
        assert!(service.calls.borrow().is_empty());
    }

    #[test]
    fn empty_input_produces_an_empty_successful_report() {
        let service = FakeService::granting(&["a.a.get"]);
        let report = verify_permissions(
            &service,
            "demo",
            &[],
            size(25),
            &NullProgress,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(report, RunReport::default());
        assert!(service.calls.borrow().is_empty());
    }
}
