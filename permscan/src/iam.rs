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

//! The IAM introspection seam: listing testable permissions and testing
//! which of them the caller holds.

use std::fmt;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Maximum number of permissions accepted by one `testIamPermissions` call.
pub const MAX_TEST_BATCH: usize = 100;

/// Page size requested from `queryTestablePermissions` (the API maximum).
pub const LIST_PAGE_SIZE: usize = 1000;

const QUERY_TESTABLE_URL: &str =
    "https://iam.googleapis.com/v1/permissions:queryTestablePermissions";
const RESOURCE_MANAGER_BASE: &str = "https://cloudresourcemanager.googleapis.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of testable permissions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionPage {
    pub permissions: Vec<String>,
    /// Continuation token; `None` when this is the final page.
    pub next_page_token: Option<String>,
}

/// Errors from the IAM introspection endpoints.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum IamError {
    /// The listing API is not enabled on the project backing the credential.
    #[error("the IAM API is disabled: {detail}")]
    #[diagnostic(help("enable the IAM API (iam.googleapis.com) on the project, then retry"))]
    ApiDisabled { detail: String },
    /// The service answered with a non-success status.
    #[error("{operation} failed with HTTP {status}: {detail}")]
    Status {
        operation: &'static str,
        status: u16,
        detail: String,
    },
    /// The request never produced an HTTP response.
    #[error("{operation} failed: {detail}")]
    Transport {
        operation: &'static str,
        detail: String,
    },
    /// The response body was not the expected JSON shape.
    #[error("{operation} returned an unexpected body: {detail}")]
    Decode {
        operation: &'static str,
        detail: String,
    },
}

/// Network boundary used by the catalog fetcher and the batched verifier.
///
/// [`HttpIamService`] is the production implementation; tests substitute
/// in-memory fakes, so the pipelines never need a live backend.
pub trait IamService {
    /// Fetch one page of permissions testable against `full_resource` (a
    /// fully-qualified resource name, e.g.
    /// `//cloudresourcemanager.googleapis.com/projects/my-project`).
    fn query_testable_permissions(
        &self,
        full_resource: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<PermissionPage, IamError>;

    /// Return the sub-sequence of `permissions` the caller holds on
    /// `resource` (a relative resource path, e.g. `projects/my-project`).
    ///
    /// The response order is not guaranteed to match the request order.
    fn test_permissions(
        &self,
        resource: &str,
        permissions: &[String],
    ) -> Result<Vec<String>, IamError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryTestablePermissionsRequest<'a> {
    full_resource_name: &'a str,
    page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryTestablePermissionsResponse {
    #[serde(default)]
    permissions: Vec<TestablePermission>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct TestablePermission {
    name: String,
}

#[derive(Serialize)]
struct TestIamPermissionsRequest<'a> {
    permissions: &'a [String],
}

#[derive(Deserialize)]
struct TestIamPermissionsResponse {
    #[serde(default)]
    permissions: Vec<String>,
}

/// Blocking HTTPS implementation of [`IamService`].
pub struct HttpIamService {
    agent: ureq::Agent,
    token: String,
}

impl fmt::Debug for HttpIamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpIamService")
            .field("token", &"[redacted]")
            .finish()
    }
}

impl HttpIamService {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            token: token.into(),
        }
    }

    fn post_json<T>(
        &self,
        operation: &'static str,
        url: &str,
        body: impl Serialize,
    ) -> Result<T, IamError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .agent
            .post(url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Content-Type", "application/json")
            .send_json(body);
        match response {
            Ok(resp) => resp.into_json::<T>().map_err(|err| IamError::Decode {
                operation,
                detail: err.to_string(),
            }),
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                debug!(operation, status, "IAM request rejected");
                Err(classify_status_error(operation, status, &body))
            }
            Err(err) => Err(IamError::Transport {
                operation,
                detail: err.to_string(),
            }),
        }
    }
}

impl IamService for HttpIamService {
    fn query_testable_permissions(
        &self,
        full_resource: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<PermissionPage, IamError> {
        let request = QueryTestablePermissionsRequest {
            full_resource_name: full_resource,
            page_size,
            page_token,
        };
        let response: QueryTestablePermissionsResponse =
            self.post_json("queryTestablePermissions", QUERY_TESTABLE_URL, &request)?;
        Ok(PermissionPage {
            permissions: response
                .permissions
                .into_iter()
                .map(|permission| permission.name)
                .collect(),
            next_page_token: response.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    fn test_permissions(
        &self,
        resource: &str,
        permissions: &[String],
    ) -> Result<Vec<String>, IamError> {
        let url = format!("{RESOURCE_MANAGER_BASE}/{resource}:testIamPermissions");
        let request = TestIamPermissionsRequest { permissions };
        let response: TestIamPermissionsResponse =
            self.post_json("testIamPermissions", &url, &request)?;
        Ok(response.permissions)
    }
}

fn classify_status_error(operation: &'static str, status: u16, body: &str) -> IamError {
    let detail = error_detail(body).unwrap_or_else(|| short_body(body));
    if body.contains("SERVICE_DISABLED") {
        IamError::ApiDisabled { detail }
    } else {
        IamError::Status {
            operation,
            status,
            detail,
        }
    }
}

/// Pull the human-readable message out of a structured Google error body.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_owned)
}

fn short_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_owned();
    }
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::{classify_status_error, error_detail, short_body, IamError};

    #[test]
    fn error_detail_extracts_structured_message() {
        let body = r#"{"error":{"code":403,"message":"The caller does not have permission","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(
            error_detail(body).as_deref(),
            Some("The caller does not have permission")
        );
    }

    #[test]
    fn error_detail_rejects_unstructured_bodies() {
        assert_eq!(error_detail("<html>Bad Gateway</html>"), None);
        assert_eq!(error_detail(r#"{"message":"no error wrapper"}"#), None);
    }

    #[test]
    fn unstructured_body_falls_back_to_raw_text() {
        let err = classify_status_error("testIamPermissions", 502, "<html>Bad Gateway</html>");
        match err {
            IamError::Status { status, detail, .. } => {
                assert_eq!(status, 502);
                assert_eq!(detail, "<html>Bad Gateway</html>");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn disabled_service_maps_to_dedicated_variant() {
        let body = r#"{"error":{"code":403,"message":"IAM API has not been used in project 123 before or it is disabled.","status":"PERMISSION_DENIED","details":[{"reason":"SERVICE_DISABLED"}]}}"#;
        let err = classify_status_error("queryTestablePermissions", 403, body);
        match err {
            IamError::ApiDisabled { detail } => {
                assert!(detail.contains("it is disabled"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn short_body_truncates_and_handles_empty_input() {
        assert_eq!(short_body("   "), "no response body");
        let long = "x".repeat(500);
        assert_eq!(short_body(&long).len(), 200);
    }

    #[test]
    fn testable_response_tolerates_missing_fields() {
        let response: super::QueryTestablePermissionsResponse =
            serde_json::from_str("{}").unwrap();
        assert!(response.permissions.is_empty());
        assert!(response.next_page_token.is_none());
    }

    #[test]
    fn test_response_defaults_to_no_permissions() {
        let response: super::TestIamPermissionsResponse = serde_json::from_str("{}").unwrap();
        assert!(response.permissions.is_empty());
    }
}
