// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared integration testing facilities

use dropshot::test_util::ClientTestContext;
use dropshot::test_util::LogContext;
use slog::o;
use spotcraft::Config;
use spotcraft::ControlServer;
use std::path::Path;

pub struct ControlPlaneTestContext {
    pub client: ClientTestContext,
    pub server: ControlServer,
    pub logctx: LogContext,
}

impl ControlPlaneTestContext {
    pub async fn teardown(self) {
        self.server.close().await.unwrap();
        self.logctx.cleanup_successful();
    }
}

pub async fn test_setup(test_name: &str) -> ControlPlaneTestContext {
    /*
     * We load as much configuration as we can from the test suite
     * configuration file.  The TCP port must be 0 so that parallel tests
     * don't collide, but users can change the logging level and the launch
     * template if they want while debugging.
     */
    let config_file_path = Path::new("tests/config.test.toml");
    let config = Config::from_file(config_file_path)
        .expect("failed to load config.test.toml");
    let logctx = LogContext::new(test_name, &config.log);

    let server = ControlServer::start(&config, &logctx.log)
        .await
        .expect("failed to start control server");
    let client = ClientTestContext::new(
        server.local_addr(),
        logctx.log.new(o!("component" => "client test context")),
    );

    ControlPlaneTestContext { client, server, logctx }
}
