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

// This module makes use of `return` to exit early with a particular exit
// code. For consistency, it also uses `return` in some places where it could
// be omitted.
#![allow(clippy::needless_return)]

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::{ExitCode, Termination};

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use miette::{Diagnostic, Report};
use thiserror::Error;
use tracing::{info, warn};

use permscan::auth::CredentialSource;
use permscan::catalog::{
    fetch_catalog, full_resource_name, read_permissions_file, write_catalog, CatalogError,
};
use permscan::iam::HttpIamService;
use permscan::report::{render, service_counts, write_report};
use permscan::{verify_permissions, CancelToken, Interrupted, OutputFormat, Progress};

/// Empirically audit which IAM permissions a credential holds on a project
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)] // Pull from `Cargo.toml`
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Test a list of permissions against a project and report the granted ones
    Check(CheckArgs),
    /// Download the catalog of testable permissions for a project
    Fetch(FetchArgs),
}

/// How to authenticate. With neither flag set, application-default
/// credentials are used.
#[derive(Args, Debug)]
pub struct CredentialArgs {
    /// Path to a service-account JSON key file
    #[arg(short, long = "key-file", value_name = "FILE")]
    pub key_file: Option<PathBuf>,
    /// OAuth2 access token to use directly (requires --project)
    #[arg(
        long = "access-token",
        value_name = "TOKEN",
        conflicts_with = "key_file",
        env = "GOOGLE_OAUTH_ACCESS_TOKEN",
        hide_env_values = true
    )]
    pub access_token: Option<String>,
}

impl CredentialArgs {
    fn source(&self) -> CredentialSource {
        if let Some(path) = &self.key_file {
            return CredentialSource::KeyFile(path.clone());
        }
        if let Some(token) = &self.access_token {
            return CredentialSource::AccessToken(token.clone());
        }
        return CredentialSource::Default;
    }
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub credential: CredentialArgs,
    /// Project ID to test against; taken from the credential when omitted
    #[arg(short, long, value_name = "PROJECT_ID")]
    pub project: Option<String>,
    /// File containing the permissions to test, one per line
    #[arg(
        long = "permissions",
        value_name = "FILE",
        default_value = "permissions.txt"
    )]
    pub permissions_file: PathBuf,
    /// Write the report here instead of printing it
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Report format; inferred from the output extension when omitted
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub format: Option<ReportFormat>,
    /// Permissions per verification call (the API accepts at most 100)
    #[arg(long, value_name = "N", default_value = "25")]
    pub batch_size: NonZeroUsize,
    /// Include permissions from failed batches in the report as unknown
    #[arg(long)]
    pub show_unknown: bool,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub credential: CredentialArgs,
    /// Project ID whose testable permissions to list; taken from the
    /// credential when omitted
    #[arg(short, long, value_name = "PROJECT_ID")]
    pub project: Option<String>,
    /// Where to write the catalog
    #[arg(short, long, value_name = "FILE", default_value = "permissions.txt")]
    pub out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ReportFormat {
    Txt,
    Json,
}

impl From<ReportFormat> for OutputFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Txt => OutputFormat::Txt,
            ReportFormat::Json => OutputFormat::Json,
        }
    }
}

/// Process exit status.
#[derive(Eq, PartialEq, Debug)]
pub enum ScanExitCode {
    /// The command completed; an empty report still counts as success.
    Success,
    /// A fatal configuration, authentication, or fetch error.
    Failure,
    /// The user interrupted the run (conventional SIGINT status, 130).
    Interrupted,
}

impl Termination for ScanExitCode {
    fn report(self) -> ExitCode {
        match self {
            ScanExitCode::Success => ExitCode::SUCCESS,
            ScanExitCode::Failure => ExitCode::FAILURE,
            ScanExitCode::Interrupted => ExitCode::from(130),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
enum ConfigError {
    #[error("no project ID available")]
    #[diagnostic(help(
        "pass --project, or use a credential that carries one (service-account key or ADC)"
    ))]
    MissingProject,
}

enum CommandError {
    Interrupted,
    Fatal(Report),
}

impl From<Interrupted> for CommandError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl From<CatalogError> for CommandError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Interrupted(_) => Self::Interrupted,
            other => Self::Fatal(Report::new(other)),
        }
    }
}

impl From<permscan::auth::AuthError> for CommandError {
    fn from(err: permscan::auth::AuthError) -> Self {
        Self::Fatal(Report::new(err))
    }
}

impl From<permscan::report::ReportError> for CommandError {
    fn from(err: permscan::report::ReportError) -> Self {
        Self::Fatal(Report::new(err))
    }
}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        Self::Fatal(Report::new(err))
    }
}

pub fn check(args: &CheckArgs, cancel: &CancelToken) -> ScanExitCode {
    match check_inner(args, cancel) {
        Ok(()) => ScanExitCode::Success,
        Err(CommandError::Interrupted) => {
            eprintln!("operation cancelled by user");
            return ScanExitCode::Interrupted;
        }
        Err(CommandError::Fatal(err)) => {
            eprintln!("{err:?}");
            return ScanExitCode::Failure;
        }
    }
}

pub fn fetch(args: &FetchArgs, cancel: &CancelToken) -> ScanExitCode {
    match fetch_inner(args, cancel) {
        Ok(()) => ScanExitCode::Success,
        Err(CommandError::Interrupted) => {
            eprintln!("operation cancelled by user");
            return ScanExitCode::Interrupted;
        }
        Err(CommandError::Fatal(err)) => {
            eprintln!("{err:?}");
            return ScanExitCode::Failure;
        }
    }
}

fn check_inner(args: &CheckArgs, cancel: &CancelToken) -> Result<(), CommandError> {
    let credentials = args.credential.source().load()?;
    let project = args
        .project
        .clone()
        .or_else(|| credentials.project().map(str::to_owned))
        .ok_or(ConfigError::MissingProject)?;
    let permissions = read_permissions_file(&args.permissions_file)?;

    if let Some(identity) = credentials.identity() {
        info!(identity, "authenticated");
    }
    let unique: BTreeSet<&str> = permissions.iter().map(String::as_str).collect();
    info!(
        %project,
        candidates = unique.len(),
        "testing permissions against project"
    );

    let token = credentials.access_token()?;
    let service = HttpIamService::new(token);

    let progress = ScanProgress::new(permissions.len().div_ceil(args.batch_size.get()));
    let result = verify_permissions(
        &service,
        &project,
        &permissions,
        args.batch_size,
        &progress,
        cancel,
    );
    progress.finish();
    let report = result?;

    info!(
        granted = report.granted.len(),
        batches = report.total_batches,
        "scan complete"
    );
    if report.failed_batches > 0 {
        warn!(
            failed_batches = report.failed_batches,
            unknown = report.unknown.len(),
            "some verification calls failed; their permissions are unknown, not denied"
        );
    }
    for (service_name, count) in service_counts(&report.granted) {
        info!(service = %service_name, granted = count, "granted by service");
    }

    let format = OutputFormat::select(args.format.map(Into::into), args.output.as_deref());
    match &args.output {
        Some(path) => {
            write_report(path, &report, format, args.show_unknown)?;
            info!(path = %path.display(), "report written");
        }
        None => {
            print!("{}", render(&report, format, args.show_unknown)?);
        }
    }
    Ok(())
}

fn fetch_inner(args: &FetchArgs, cancel: &CancelToken) -> Result<(), CommandError> {
    let credentials = args.credential.source().load()?;
    let project = args
        .project
        .clone()
        .or_else(|| credentials.project().map(str::to_owned))
        .ok_or(ConfigError::MissingProject)?;

    if let Some(identity) = credentials.identity() {
        info!(identity, "authenticated");
    }

    let token = credentials.access_token()?;
    let service = HttpIamService::new(token);
    let resource = full_resource_name(&project);
    info!(%resource, "querying testable permissions; this can take a while");

    let catalog = fetch_catalog(&service, &resource, &LogProgress, cancel)?;
    write_catalog(&args.out, &catalog)?;
    info!(
        permissions = catalog.len(),
        path = %args.out.display(),
        "catalog written"
    );
    Ok(())
}

/// Logs fetch progress through the diagnostic sink; the page count is
/// unknown up front, so there is no bar to draw.
#[derive(Clone, Copy, Debug, Default)]
struct LogProgress;

impl Progress for LogProgress {
    fn pages_fetched(&self, pages: usize, total_permissions: usize) {
        info!(pages, total = total_permissions, "still fetching testable permissions");
    }
}

/// Interactive batch progress: a bar over batches, with confirmed
/// permissions printed above it as they arrive.
struct ScanProgress {
    bar: ProgressBar,
}

impl fmt::Debug for ScanProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanProgress").finish_non_exhaustive()
    }
}

impl ScanProgress {
    fn new(total_batches: usize) -> Self {
        let bar = ProgressBar::new(u64::try_from(total_batches).unwrap_or(u64::MAX));
        bar.set_style(scan_progress_style());
        bar.set_message("scanning");
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Progress for ScanProgress {
    fn batch_done(&self, completed: usize, total: usize) {
        // The verifier may clamp the batch size, so trust its total over the
        // construction-time estimate.
        self.bar.set_length(u64::try_from(total).unwrap_or(u64::MAX));
        self.bar
            .set_position(u64::try_from(completed).unwrap_or(u64::MAX));
    }

    fn permissions_granted(&self, permissions: &[String]) {
        for permission in permissions {
            self.bar.println(format!("granted: {permission}"));
        }
    }
}

fn scan_progress_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>.")
}
