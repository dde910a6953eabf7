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

#![forbid(unsafe_code)]

use clap::Parser;
use permscan::CancelToken;
use permscan_cli::{check, fetch, Cli, Commands, ScanExitCode};
use tracing_subscriber::EnvFilter;

fn main() -> ScanExitCode {
    init_tracing();
    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    match Cli::parse().command {
        Commands::Check(args) => check(&args, &cancel),
        Commands::Fetch(args) => fetch(&args, &cancel),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("PERMSCAN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The handler only flips the cancellation token; the pipelines notice it
/// between network calls and unwind without touching any output file.
fn install_interrupt_handler(cancel: &CancelToken) {
    let token = cancel.clone();
    let result = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("interrupt received, stopping after the current call");
        token.cancel();
    });
    if let Err(err) = result {
        tracing::warn!(error = %err, "could not install the Ctrl-C handler");
    }
}
