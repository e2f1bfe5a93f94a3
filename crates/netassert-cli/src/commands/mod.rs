//! CLI commands

use std::path::PathBuf;

use clap::Args;
use kube::Client;
use netassert_common::kube_utils::create_client;
use netassert_common::testcase::{load_from_dir, load_from_file, Test};
use tracing::info;

use crate::{Error, GlobalArgs, Result};

pub mod ping;
pub mod run;
pub mod validate;
pub mod version;

/// Where test cases are read from. Exactly one source is required.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct InputArgs {
    /// Test-case file; `-` reads from stdin
    #[arg(short = 'f', long)]
    pub input_file: Option<PathBuf>,

    /// Directory of .yaml/.yml test-case files
    #[arg(short = 'd', long)]
    pub input_dir: Option<PathBuf>,
}

impl InputArgs {
    /// Load, default and validate the test cases
    pub fn load(&self) -> Result<Vec<Test>> {
        let tests = match (&self.input_file, &self.input_dir) {
            (Some(file), None) => {
                info!(file = %file.display(), "Loading test cases from file");
                load_from_file(file)?
            }
            (None, Some(dir)) => {
                info!(dir = %dir.display(), "Loading test cases from directory");
                load_from_dir(dir)?
            }
            _ => {
                return Err(Error::command_failed(
                    "exactly one of --input-file or --input-dir must be set",
                ))
            }
        };
        info!(count = tests.len(), "Loaded test cases");
        Ok(tests)
    }
}

/// Build a kube client from the global flags
pub async fn client(global: &GlobalArgs) -> Result<Client> {
    Ok(create_client(global.kubeconfig.as_deref()).await?)
}
