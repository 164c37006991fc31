// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the spotcraft control-plane server

use clap::Parser;
use spotcraft::cmd::fatal;
use spotcraft::cmd::CmdError;
use spotcraft::run_server;
use spotcraft::Config;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(
    name = "spotcraftd",
    about = "Control plane for ephemeral game servers on spot capacity"
)]
struct Args {
    #[clap(name = "CONFIG_FILE_PATH")]
    config_file_path: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(cmd_error) = do_run().await {
        fatal(cmd_error);
    }
}

async fn do_run() -> Result<(), CmdError> {
    let args = Args::try_parse()
        .map_err(|error| CmdError::Usage(error.to_string()))?;
    let config = Config::from_file(&args.config_file_path)
        .map_err(CmdError::Failure)?;
    run_server(&config).await.map_err(CmdError::Failure)
}
