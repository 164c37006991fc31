// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle management for game servers backed by spot capacity
//!
//! The persisted record is the source of truth.  Before any operation whose
//! outcome is uncertain, the manager writes the provisional `UNKNOWN` state;
//! if the operation then fails or the process dies, the next reader is
//! forced to reconcile against the provisioning backend instead of trusting
//! a stale `OFFLINE` or `ONLINE`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use once_cell::sync::OnceCell;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::info;
use slog::warn;
use slog::Logger;
use std::sync::Arc;

use crate::backoff;
use crate::backoff::BackoffError;
use crate::bootstrap;
use crate::config::InfraSettings;
use crate::error::Error;
use crate::model::InstanceId;
use crate::model::ServerId;
use crate::model::ServerRuntime;
use crate::model::ServerState;
use crate::model::SpotRequestId;
use crate::provision::CapacityClient;
use crate::provision::CapacitySpec;
use crate::provision::LaunchTemplate;
use crate::provision::SpotRequestState;
use crate::store::ServerStore;

/// Desired lifecycle target for [`ServerLifecycle::ensure_target`]
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerTarget {
    Offline,
    Online,
}

/// Lifecycle operations on one logical game server
///
/// The spot-capacity implementation is [`SpotServer`]; other deployment
/// targets (on-demand capacity, containers) would implement the same trait.
#[async_trait]
pub trait ServerLifecycle: Send + Sync {
    /// Returns the numeric id of the server.
    fn id(&self) -> ServerId;

    /// Returns the server's persisted lifecycle state.  Never fails on
    /// malformed data; see [`ServerState`].
    async fn state(&self) -> Result<ServerState, Error>;

    /// Returns true iff the server is recorded `ONLINE`.  An `UNKNOWN`
    /// record reports false here; use [`ServerLifecycle::reconcile`] to
    /// verify it first.
    async fn is_online(&self) -> Result<bool, Error>;

    /// Launches the server.  Fails with an invalid-request error, taking no
    /// action, if the server is currently online.
    async fn start(&self) -> Result<ServerRuntime, Error>;

    /// Takes the server offline, cancelling its capacity request and
    /// terminating its instance.  Fails with an invalid-request error if the
    /// server is already offline.
    async fn stop(&self) -> Result<ServerRuntime, Error>;

    /// Verifies an `UNKNOWN` record against the provisioning backend and
    /// settles it to `ONLINE` (recording the instance id) or `OFFLINE`.
    /// Records in any other state are returned unchanged.
    async fn reconcile(&self) -> Result<ServerRuntime, Error>;

    /// Drives the server toward the given target state, starting or stopping
    /// as needed.  A server already at the target is left alone.
    async fn ensure_target(
        &self,
        target: ServerTarget,
    ) -> Result<ServerRuntime, Error>;
}

/// Builds the successor runtime for a transition from `prev`.
fn next_runtime(
    prev: &ServerRuntime,
    state: ServerState,
    spot_request_id: Option<SpotRequestId>,
    instance_id: Option<InstanceId>,
) -> ServerRuntime {
    ServerRuntime {
        state,
        spot_request_id,
        instance_id,
        gen: prev.gen.next(),
        time_updated: Utc::now(),
    }
}

/// Manages one game server's lifecycle on spot capacity
///
/// A `SpotServer` is constructed per logical operation and holds no record
/// state of its own: every operation reads the persisted record through the
/// store handle.  The only thing it caches is the bootstrap payload, which
/// is computed at most once per instance.
pub struct SpotServer {
    id: ServerId,
    store: Arc<dyn ServerStore>,
    capacity: Arc<dyn CapacityClient>,
    template: LaunchTemplate,
    settings: Arc<dyn InfraSettings>,
    log: Logger,
    user_data: OnceCell<String>,
}

impl SpotServer {
    pub fn new(
        id: ServerId,
        store: Arc<dyn ServerStore>,
        capacity: Arc<dyn CapacityClient>,
        template: LaunchTemplate,
        settings: Arc<dyn InfraSettings>,
        log: Logger,
    ) -> SpotServer {
        SpotServer {
            id,
            store,
            capacity,
            template,
            settings,
            log,
            user_data: OnceCell::new(),
        }
    }

    /// Returns the bootstrap payload, computing it on first use.  Later
    /// calls return the same text even if the settings provider would answer
    /// differently now; a fresh payload requires a fresh manager.
    fn user_data(&self) -> Result<&str, Error> {
        self.user_data
            .get_or_try_init(|| {
                bootstrap::user_data(self.id, &*self.settings, &self.log)
            })
            .map(String::as_str)
    }

    async fn fetch_runtime(&self) -> Result<ServerRuntime, Error> {
        Ok(self.store.server_fetch(self.id).await?.runtime)
    }

    /// Writes `next`, conditional on the generation in `observed`.  Losing
    /// the condition means another transition is in flight for this server.
    async fn try_update(
        &self,
        observed: &ServerRuntime,
        next: ServerRuntime,
    ) -> Result<ServerRuntime, Error> {
        let updated = self
            .store
            .server_update_runtime(self.id, observed.gen, next.clone())
            .await?;
        if !updated {
            return Err(Error::unavail(
                "a concurrent state change is in progress for this server",
            ));
        }
        Ok(next)
    }
}

#[async_trait]
impl ServerLifecycle for SpotServer {
    fn id(&self) -> ServerId {
        self.id
    }

    async fn state(&self) -> Result<ServerState, Error> {
        Ok(self.fetch_runtime().await?.state)
    }

    async fn is_online(&self) -> Result<bool, Error> {
        Ok(self.state().await?.is_online())
    }

    async fn start(&self) -> Result<ServerRuntime, Error> {
        let observed = self.fetch_runtime().await?;
        if observed.state.is_online() {
            return Err(Error::invalid_request("server is already online"));
        }

        /*
         * Record the provisional state before contacting the provisioning
         * backend.  If the capacity request fails or we crash mid-flight,
         * the record stays UNKNOWN and the next reader must reconcile,
         * rather than seeing a false OFFLINE or ONLINE.  This write is also
         * the mutual-exclusion point: a concurrent start loses the
         * generation condition here, before it can issue its own request.
         */
        let provisional =
            next_runtime(&observed, ServerState::Unknown, None, None);
        let provisional = self.try_update(&observed, provisional).await?;

        let encoded = BASE64.encode(self.user_data()?);
        let spec = CapacitySpec::from_template(&self.template, encoded);

        /*
         * Only transient backend failures are retried; everything else
         * propagates and leaves the record at UNKNOWN, which is exactly what
         * that state is for.
         */
        let capacity = Arc::clone(&self.capacity);
        let acks = backoff::retry_notify(
            backoff::provisioning_retry_policy(),
            || async {
                capacity.capacity_request(&spec, 1).await.map_err(|error| {
                    if error.retryable() {
                        BackoffError::transient(error)
                    } else {
                        BackoffError::permanent(error)
                    }
                })
            },
            |error, delay| {
                warn!(self.log,
                    "capacity request failed, will retry in {:?}", delay;
                    "error" => %error);
            },
        )
        .await?;

        /* A count-1 request is acknowledged exactly once. */
        assert_eq!(
            acks.len(),
            1,
            "provisioning backend returned {} acknowledgments for a \
             single-instance capacity request",
            acks.len()
        );
        let ack = acks.into_iter().next().unwrap();
        info!(self.log, "requested spot capacity";
            "spot_request_id" => %ack.id);

        /*
         * Record the in-flight request id.  The state stays UNKNOWN until a
         * reconcile pass confirms the instance is actually running; start()
         * itself never writes ONLINE.
         */
        let requested = next_runtime(
            &provisional,
            ServerState::Unknown,
            Some(ack.id),
            None,
        );
        self.try_update(&provisional, requested).await.map_err(|_| {
            Error::internal_error(
                "server record changed while a capacity request was in flight",
            )
        })
    }

    async fn stop(&self) -> Result<ServerRuntime, Error> {
        let observed = self.fetch_runtime().await?;
        if observed.state == ServerState::Offline {
            return Err(Error::invalid_request("server is already offline"));
        }

        /* Same provisional-state discipline as start(). */
        let provisional = next_runtime(
            &observed,
            ServerState::Unknown,
            observed.spot_request_id.clone(),
            observed.instance_id.clone(),
        );
        let provisional = self.try_update(&observed, provisional).await?;

        if let Some(request_id) = &provisional.spot_request_id {
            self.capacity.capacity_request_cancel(request_id).await?;
        }
        if let Some(instance_id) = &provisional.instance_id {
            self.capacity.instance_terminate(instance_id).await?;
        }
        info!(self.log, "stopped server");

        let stopped =
            next_runtime(&provisional, ServerState::Offline, None, None);
        self.try_update(&provisional, stopped).await
    }

    async fn reconcile(&self) -> Result<ServerRuntime, Error> {
        let observed = self.fetch_runtime().await?;
        if observed.state != ServerState::Unknown {
            return Ok(observed);
        }

        let request_id = match &observed.spot_request_id {
            Some(request_id) => request_id.clone(),
            None => {
                /*
                 * Nothing in flight: the transition that wrote UNKNOWN never
                 * got as far as provisioning.
                 */
                let next =
                    next_runtime(&observed, ServerState::Offline, None, None);
                return self.try_update(&observed, next).await;
            }
        };

        let request = match self
            .capacity
            .capacity_request_fetch(&request_id)
            .await
        {
            Ok(request) => request,
            Err(Error::ObjectNotFound { .. }) => {
                let next =
                    next_runtime(&observed, ServerState::Offline, None, None);
                return self.try_update(&observed, next).await;
            }
            Err(error) => return Err(error),
        };

        match request.state {
            SpotRequestState::Active if request.instance_id.is_some() => {
                let instance_id = request.instance_id.unwrap();
                info!(self.log, "spot request fulfilled, server online";
                    "spot_request_id" => %request_id,
                    "instance_id" => %instance_id);
                let next = next_runtime(
                    &observed,
                    ServerState::Online,
                    Some(request_id),
                    Some(instance_id),
                );
                self.try_update(&observed, next).await
            }

            /* Still waiting on the backend; nothing to record yet. */
            SpotRequestState::Pending | SpotRequestState::Active => {
                Ok(observed)
            }

            SpotRequestState::Cancelled
            | SpotRequestState::Failed
            | SpotRequestState::Closed => {
                info!(self.log, "spot request did not produce an instance";
                    "spot_request_id" => %request_id,
                    "request_state" => ?request.state);
                let next =
                    next_runtime(&observed, ServerState::Offline, None, None);
                self.try_update(&observed, next).await
            }
        }
    }

    async fn ensure_target(
        &self,
        target: ServerTarget,
    ) -> Result<ServerRuntime, Error> {
        let observed = self.fetch_runtime().await?;
        match target {
            ServerTarget::Online if observed.state.is_online() => Ok(observed),
            ServerTarget::Online => self.start().await,
            ServerTarget::Offline
                if observed.state == ServerState::Offline =>
            {
                Ok(observed)
            }
            ServerTarget::Offline => self.stop().await,
        }
    }
}
