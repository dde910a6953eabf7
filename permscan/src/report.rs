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

//! Rendering and persisting run reports.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::verify::RunReport;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ReportError {
    #[error("failed to serialize report")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write report to {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk report format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Newline-delimited permission strings.
    #[default]
    Txt,
    /// `{"valid_permissions": [...]}`.
    Json,
}

impl OutputFormat {
    /// Infer the format from a path's extension; only `.json` is meaningful.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(OsStr::to_str)?;
        ext.eq_ignore_ascii_case("json").then_some(Self::Json)
    }

    /// An explicit flag wins over the output extension; the default is txt.
    pub fn select(explicit: Option<Self>, output: Option<&Path>) -> Self {
        explicit
            .or_else(|| output.and_then(Self::from_path))
            .unwrap_or_default()
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    valid_permissions: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unknown_permissions: Option<Vec<&'a str>>,
}

/// Render a report. The JSON form always carries the `valid_permissions`
/// key; an empty granted set serializes as `[]`, never null. The txt form
/// lists granted permissions only.
pub fn render(
    report: &RunReport,
    format: OutputFormat,
    show_unknown: bool,
) -> Result<String, ReportError> {
    match format {
        OutputFormat::Txt => {
            let mut out = String::new();
            for permission in &report.granted {
                out.push_str(permission);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let body = JsonReport {
                valid_permissions: report.granted.iter().map(String::as_str).collect(),
                unknown_permissions: show_unknown
                    .then(|| report.unknown.iter().map(String::as_str).collect()),
            };
            let mut rendered =
                serde_json::to_string_pretty(&body).map_err(ReportError::Serialize)?;
            rendered.push('\n');
            Ok(rendered)
        }
    }
}

/// Render and write a report in one step.
pub fn write_report(
    path: &Path,
    report: &RunReport,
    format: OutputFormat,
    show_unknown: bool,
) -> Result<(), ReportError> {
    let rendered = render(report, format, show_unknown)?;
    fs::write(path, rendered).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Group permissions by their leading `service` segment for human-readable
/// summaries. The segment before the first `.`; permissions without one
/// group under themselves.
pub fn service_counts(permissions: &BTreeSet<String>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for permission in permissions {
        let service = permission
            .split('.')
            .next()
            .unwrap_or(permission.as_str());
        *counts.entry(service.to_owned()).or_insert(0) += 1;
    }
    counts
}
