// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Control plane for ephemeral Minecraft game servers on spot compute
//! capacity
//!
//! A logical game server is a persisted record: a numeric id, a lifecycle
//! state (`OFFLINE`, `ONLINE`, or the provisional `UNKNOWN`), and the
//! identifiers of whatever compute is backing it.  The lifecycle manager in
//! [`lifecycle`] reconciles that record against a spot-capacity provisioning
//! backend, generating each instance's first-boot bootstrap script along the
//! way.  The record store, the provisioning backend, and the deployment
//! settings provider all sit behind traits; the daemon currently wires in an
//! in-memory store and a simulated backend.

pub mod backoff;
pub mod bootstrap;
pub mod cmd;
pub mod config;
mod controller;
pub mod error;
mod http_entrypoints;
pub mod lifecycle;
pub mod model;
pub mod provision;
mod server;
pub mod store;

pub use config::Config;
pub use controller::Controller;
pub use http_entrypoints::ServerCreateParams;
pub use http_entrypoints::ServerEnsureBody;
pub use server::run_server;
pub use server::ControlServer;
