// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities used by the command-line tools

use std::env;
use std::path::Path;
use std::process::exit;

/// Represents a failure from a command-line program
pub enum CmdError {
    /// incorrect command-line arguments
    Usage(String),
    /// the command failed for some other reason
    Failure(String),
}

/// Print the error to stderr and exit with a status conventional for the
/// kind of failure.
pub fn fatal(cmd_error: CmdError) -> ! {
    let arg0_path = env::args().next().unwrap_or_else(|| String::from("command"));
    let arg0 = Path::new(&arg0_path)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("command");
    let (exit_code, message) = match cmd_error {
        CmdError::Usage(message) => (2, message),
        CmdError::Failure(message) => (1, message),
    };
    eprintln!("{}: {}", arg0, message);
    exit(exit_code);
}
