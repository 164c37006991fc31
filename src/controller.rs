// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP-agnostic interface to the control plane
//!
//! The `Controller` owns the long-lived handles (record store, provisioning
//! backend, deployment settings) and builds a fresh lifecycle manager for
//! each logical operation.  Right now it wires in the in-memory store and
//! the simulated capacity backend; real implementations plug in behind the
//! same traits.

use slog::info;
use slog::o;
use slog::Logger;
use std::sync::Arc;

use crate::config::Config;
use crate::config::InfraConfig;
use crate::config::InfraSettings;
use crate::error::Error;
use crate::lifecycle::ServerLifecycle;
use crate::lifecycle::ServerTarget;
use crate::lifecycle::SpotServer;
use crate::model::Server;
use crate::model::ServerId;
use crate::model::ServerRuntime;
use crate::model::ServerState;
use crate::model::SpotRequestId;
use crate::provision::CapacityClient;
use crate::provision::LaunchTemplate;
use crate::provision::SimCapacity;
use crate::provision::SpotRequest;
use crate::store::MemStore;
use crate::store::ServerStore;

/// Represents the state of the control plane that we're managing
pub struct Controller {
    log: Logger,
    store: Arc<MemStore>,
    capacity: Arc<SimCapacity>,
    template: LaunchTemplate,
    settings: Arc<InfraConfig>,
}

impl Controller {
    pub fn new(config: &Config, log: Logger) -> Controller {
        let capacity = SimCapacity::new(
            config.sim_mode,
            log.new(o!("component" => "SimCapacity")),
        );
        info!(log, "created controller");
        Controller {
            log,
            store: Arc::new(MemStore::new()),
            capacity: Arc::new(capacity),
            template: config.launch.clone(),
            settings: Arc::new(config.infra.clone()),
        }
    }

    /// Builds the per-operation lifecycle manager for one server.
    fn server_lifecycle(&self, id: ServerId) -> SpotServer {
        SpotServer::new(
            id,
            Arc::clone(&self.store) as Arc<dyn ServerStore>,
            Arc::clone(&self.capacity) as Arc<dyn CapacityClient>,
            self.template.clone(),
            Arc::clone(&self.settings) as Arc<dyn InfraSettings>,
            self.log.new(o!("server_id" => id.to_string())),
        )
    }

    pub async fn server_create(&self, id: ServerId) -> Result<Server, Error> {
        let server = self.store.server_create(id).await?;
        info!(self.log, "created server record"; "server_id" => %id);
        Ok(server)
    }

    pub async fn server_fetch(&self, id: ServerId) -> Result<Server, Error> {
        self.store.server_fetch(id).await
    }

    pub async fn servers_list(&self) -> Result<Vec<Server>, Error> {
        self.store.servers_list().await
    }

    pub async fn server_state(
        &self,
        id: ServerId,
    ) -> Result<ServerState, Error> {
        self.server_lifecycle(id).state().await
    }

    pub async fn server_start(
        &self,
        id: ServerId,
    ) -> Result<ServerRuntime, Error> {
        self.server_lifecycle(id).start().await
    }

    pub async fn server_stop(
        &self,
        id: ServerId,
    ) -> Result<ServerRuntime, Error> {
        self.server_lifecycle(id).stop().await
    }

    pub async fn server_reconcile(
        &self,
        id: ServerId,
    ) -> Result<ServerRuntime, Error> {
        self.server_lifecycle(id).reconcile().await
    }

    pub async fn server_ensure_target(
        &self,
        id: ServerId,
        target: ServerTarget,
    ) -> Result<ServerRuntime, Error> {
        self.server_lifecycle(id).ensure_target(target).await
    }

    /// Test interface: pokes the simulated provisioning backend to fulfill a
    /// pending request.
    pub async fn spot_request_poke(
        &self,
        id: &SpotRequestId,
    ) -> Result<SpotRequest, Error> {
        self.capacity.request_poke(id).await
    }
}
