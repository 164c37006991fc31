// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! First-boot bootstrap script generation for game-server instances
//!
//! The provisioning backend hands the generated text to a fresh instance as
//! its user data, where it runs once with elevated privileges.  Everything
//! interpolated into the script is validated against the shell-safe
//! character set first, so the output never contains a value the shell would
//! interpret.

use slog::warn;
use slog::Logger;
use std::convert::TryFrom;

use crate::config::InfraSetting;
use crate::config::InfraSettings;
use crate::error::Error;
use crate::model::ServerId;
use crate::model::ShellSafeString;

/// Home directory the script works out of
const INSTANCE_HOME: &str = "/home/ec2-user";
/// Unprivileged account that downloads and runs the startup script
const INSTANCE_USER: &str = "ec2-user";
/// Key of the remote startup script within the resource bucket
const STARTUP_SCRIPT_KEY: &str = "server-startup/startup.sh";

/// Generates the first-boot shell script for the given server.
///
/// The script exports the deployment's environment (validated pairs only)
/// plus `SERVER_ID`, then downloads the real startup script from the
/// resource bucket and pipes it to a shell running as the unprivileged
/// account.  Same inputs produce byte-identical output.
pub fn user_data(
    server_id: ServerId,
    settings: &dyn InfraSettings,
    log: &Logger,
) -> Result<String, Error> {
    let bucket = ShellSafeString::from_param(
        settings.value(InfraSetting::ResourceBucket),
        "resource bucket name",
    )?;

    let mut script = String::new();
    /* Lets the instance know that the remaining commands run under bash. */
    script.push_str("#!/bin/bash\n");
    script.push_str(&format!("cd {}\n", INSTANCE_HOME));

    for (key, value) in settings.environment() {
        let safe_key = ShellSafeString::try_from(key.as_str());
        let safe_value = ShellSafeString::try_from(value.as_str());
        match (safe_key, safe_value) {
            (Ok(key), Ok(value)) => {
                script.push_str(&format!("export {}={}\n", key, value));
            }
            _ => {
                warn!(log, "skipping environment variable that is not \
                    shell-safe"; "key" => key);
            }
        }
    }
    script.push_str(&format!("export SERVER_ID={}\n", server_id));

    /*
     * The trailing hyphen tells the download tool to write the script to
     * stdout.
     */
    let download = format!(
        "aws s3 cp s3://{}/{} -",
        bucket, STARTUP_SCRIPT_KEY
    );
    script.push_str(&format!(
        "su -c '{} | bash' {}\n",
        download, INSTANCE_USER
    ));
    Ok(script)
}
