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

//! The catalog fetcher and the on-disk permission-list contract.
//!
//! The persisted catalog is one permission per line, lexicographically
//! sorted, with no duplicates and no blank lines. Writes are atomic: either
//! the full set lands on disk or the previous file is left untouched.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, info};

use crate::cancel::{CancelToken, Interrupted};
use crate::iam::{IamError, IamService, LIST_PAGE_SIZE};
use crate::progress::Progress;
use crate::verify::normalize_project_resource;

/// Pages between progress reports during a fetch.
const PROGRESS_EVERY_PAGES: usize = 5;

const RESOURCE_NAME_PREFIX: &str = "//cloudresourcemanager.googleapis.com/";

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum CatalogError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Service(#[from] IamError),
    #[error("failed to read permissions from {path}")]
    #[diagnostic(help("generate the file with `permscan fetch`, or pass the right path"))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write catalog to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Fully-qualify a target for `queryTestablePermissions`. Bare project IDs
/// and `projects/...` paths gain the resource-manager prefix;
/// already-qualified names pass through.
pub fn full_resource_name(target: &str) -> String {
    if target.starts_with("//") {
        target.to_owned()
    } else {
        format!("{RESOURCE_NAME_PREFIX}{}", normalize_project_resource(target))
    }
}

/// Retrieve every permission testable against `full_resource`, following
/// continuation tokens until the listing is exhausted.
///
/// The accumulated set is deduplicated and sorted by construction.
pub fn fetch_catalog(
    service: &dyn IamService,
    full_resource: &str,
    progress: &dyn Progress,
    cancel: &CancelToken,
) -> Result<BTreeSet<String>, CatalogError> {
    let mut catalog = BTreeSet::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Err(Interrupted.into());
        }
        let page =
            service.query_testable_permissions(full_resource, LIST_PAGE_SIZE, page_token.as_deref())?;
        pages += 1;
        catalog.extend(page.permissions);
        debug!(pages, total = catalog.len(), "fetched permission page");
        if pages % PROGRESS_EVERY_PAGES == 0 {
            progress.pages_fetched(pages, catalog.len());
        }
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
    info!(pages, total = catalog.len(), "catalog fetch complete");
    Ok(catalog)
}

/// Persist a catalog, one permission per line, replacing `path` atomically.
pub fn write_catalog(path: &Path, catalog: &BTreeSet<String>) -> Result<(), CatalogError> {
    let write_err = |source| CatalogError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        for permission in catalog {
            writeln!(out, "{permission}").map_err(write_err)?;
        }
        out.flush().map_err(write_err)?;
    }
    tmp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}

/// Read a permission list: UTF-8, one permission per line, blank lines
/// ignored. Order and duplicates are preserved; the verifier handles both.
pub fn read_permissions_file(path: &Path) -> Result<Vec<String>, CatalogError> {
    let raw = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}
