// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Library interface to the control-plane server

use slog::info;
use slog::o;
use slog::Logger;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::controller::Controller;
use crate::http_entrypoints;

/// Packages up a [`Controller`] and the dropshot server running its API
pub struct ControlServer {
    /// shared state available to API request handlers
    pub controller: Arc<Controller>,
    /// dropshot server for the API
    pub http_server: dropshot::HttpServer<Arc<Controller>>,
}

impl ControlServer {
    /// Start a control-plane server
    pub async fn start(
        config: &Config,
        log: &Logger,
    ) -> Result<ControlServer, String> {
        info!(log, "setting up control server");

        let controller = Arc::new(Controller::new(
            config,
            log.new(o!("component" => "Controller")),
        ));

        let dropshot_log = log.new(o!("component" => "dropshot"));
        let http_server = dropshot::HttpServerStarter::new(
            &config.dropshot,
            http_entrypoints::api(),
            Arc::clone(&controller),
            &dropshot_log,
        )
        .map_err(|error| format!("initializing server: {}", error))?
        .start();

        info!(log, "listening"; "local_addr" => %http_server.local_addr());

        Ok(ControlServer { controller, http_server })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.http_server.local_addr()
    }

    /// Runs until the server stops for some reason.
    pub async fn wait_for_finish(self) -> Result<(), String> {
        self.http_server.await
    }

    /// Shuts the server down cleanly (used by the test suite).
    pub async fn close(self) -> Result<(), String> {
        self.http_server.close().await
    }
}

/// Run the control-plane server to completion with the given configuration.
pub async fn run_server(config: &Config) -> Result<(), String> {
    let log = config
        .log
        .to_logger("spotcraft")
        .map_err(|error| format!("initializing logger: {}", error))?;
    let server = ControlServer::start(config, &log).await?;
    server.wait_for_finish().await
}
