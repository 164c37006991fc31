// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the spot capacity provisioning backend
//!
//! [`CapacityClient`] is the seam between the lifecycle manager and whatever
//! actually allocates compute.  The current implementation simulates the
//! backend directly in this program; a client for a real cloud SDK plugs in
//! behind the same trait.

use async_trait::async_trait;
use futures::lock::Mutex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::info;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Error;
use crate::error::LookupType;
use crate::error::ResourceType;
use crate::model::InstanceId;
use crate::model::SpotRequestId;

/// Fixed launch parameters for game-server instances, set once per deployment
#[derive(Clone, Debug, Deserialize)]
pub struct LaunchTemplate {
    /// compute instance type to request
    pub instance_type: String,
    /// machine image the instance boots from
    pub image_id: String,
    /// subnet the instance is placed in
    pub subnet_id: String,
    /// instance profile attached to the instance
    pub instance_profile_arn: String,
    /// security group attached to the instance
    pub security_group_id: String,
}

/// Everything the provisioning backend needs to launch instances for one
/// server: the deployment's launch template plus the per-server startup
/// payload
#[derive(Clone, Debug)]
pub struct CapacitySpec {
    pub instance_type: String,
    pub image_id: String,
    pub subnet_id: String,
    pub instance_profile_arn: String,
    pub security_group_id: String,
    /// base64-encoded first-boot script, run once with elevated privileges
    pub user_data_base64: String,
}

impl CapacitySpec {
    pub fn from_template(
        template: &LaunchTemplate,
        user_data_base64: String,
    ) -> CapacitySpec {
        CapacitySpec {
            instance_type: template.instance_type.clone(),
            image_id: template.image_id.clone(),
            subnet_id: template.subnet_id.clone(),
            instance_profile_arn: template.instance_profile_arn.clone(),
            security_group_id: template.security_group_id.clone(),
            user_data_base64,
        }
    }
}

/// State of a spot capacity request as reported by the backend
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SpotRequestState {
    /// capacity has been requested but not yet fulfilled
    Pending,
    /// the request has been fulfilled and an instance is running
    Active,
    /// the request was cancelled before or after fulfillment
    Cancelled,
    /// the backend could not fulfill the request
    Failed,
    /// the request is finished (e.g., its instance was terminated)
    Closed,
}

impl SpotRequestState {
    /// Returns true if the request can no longer produce a running instance.
    pub fn is_terminal(&self) -> bool {
        match self {
            SpotRequestState::Pending | SpotRequestState::Active => false,
            SpotRequestState::Cancelled
            | SpotRequestState::Failed
            | SpotRequestState::Closed => true,
        }
    }
}

/// A spot capacity request acknowledged by the provisioning backend
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct SpotRequest {
    pub id: SpotRequestId,
    pub state: SpotRequestState,
    /// instance fulfilling the request, once one is running
    pub instance_id: Option<InstanceId>,
}

/// Client interface to the provisioning backend
///
/// **It's important to be careful about the interface exposed by this
/// trait.**  The intent is for it to eventually be implemented using requests
/// to a remote service.  The tighter the coupling that exists now, the harder
/// that will be to do later.
#[async_trait]
pub trait CapacityClient: Send + Sync {
    /// Requests `count` instances of spot capacity.  The backend acknowledges
    /// each requested instance with exactly one [`SpotRequest`]; a response
    /// with any other number of acknowledgments violates the contract.
    async fn capacity_request(
        &self,
        spec: &CapacitySpec,
        count: usize,
    ) -> Result<Vec<SpotRequest>, Error>;

    /// Returns the current state of a previously issued capacity request.
    async fn capacity_request_fetch(
        &self,
        id: &SpotRequestId,
    ) -> Result<SpotRequest, Error>;

    /// Cancels a capacity request.  Cancelling does not terminate an instance
    /// that already fulfilled the request.
    async fn capacity_request_cancel(
        &self,
        id: &SpotRequestId,
    ) -> Result<(), Error>;

    /// Terminates a running instance.
    async fn instance_terminate(&self, id: &InstanceId) -> Result<(), Error>;
}

/// How a [`SimCapacity`] fulfills pending requests
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SimMode {
    /// requests move to `Active` on their own after a short delay
    Auto,
    /// requests move only when poked through [`SimCapacity::request_poke`]
    Explicit,
}

/// How long an auto-mode request stays `Pending` before fulfillment
const SIM_FULFILL_DELAY: Duration = Duration::from_millis(500);

/// Simulated provisioning backend
///
/// We only simulate spot capacity from the perspective of an API consumer:
/// accepting a request, reporting it as pending, and then some time later
/// (or when poked by the test suite) reporting that an instance is running.
pub struct SimCapacity {
    log: Logger,
    sim_mode: SimMode,
    requests: Arc<Mutex<BTreeMap<SpotRequestId, SpotRequest>>>,
    instances: Arc<Mutex<BTreeSet<InstanceId>>>,
}

impl SimCapacity {
    pub fn new(sim_mode: SimMode, log: Logger) -> SimCapacity {
        info!(log, "created simulated capacity backend";
            "sim_mode" => ?sim_mode);
        SimCapacity {
            log,
            sim_mode,
            requests: Arc::new(Mutex::new(BTreeMap::new())),
            instances: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Moves a pending request to `Active` with a freshly minted instance.
    /// Used by the test suite (and by auto mode's background task) to
    /// simulate the backend fulfilling the request.
    pub async fn request_poke(
        &self,
        id: &SpotRequestId,
    ) -> Result<SpotRequest, Error> {
        Self::fulfill(&self.requests, &self.instances, id, &self.log).await
    }

    async fn fulfill(
        requests: &Mutex<BTreeMap<SpotRequestId, SpotRequest>>,
        instances: &Mutex<BTreeSet<InstanceId>>,
        id: &SpotRequestId,
        log: &Logger,
    ) -> Result<SpotRequest, Error> {
        let mut requests = requests.lock().await;
        let request = requests.get_mut(id).ok_or(Error::ObjectNotFound {
            type_name: ResourceType::SpotRequest,
            lookup_type: LookupType::ByRequestId(id.clone()),
        })?;

        if request.state == SpotRequestState::Pending {
            let instance_id = InstanceId(mint_id("i", 17));
            request.state = SpotRequestState::Active;
            request.instance_id = Some(instance_id.clone());
            instances.lock().await.insert(instance_id.clone());
            info!(log, "spot request fulfilled";
                "spot_request_id" => %request.id,
                "instance_id" => %instance_id);
        }

        Ok(request.clone())
    }
}

#[async_trait]
impl CapacityClient for SimCapacity {
    async fn capacity_request(
        &self,
        _spec: &CapacitySpec,
        count: usize,
    ) -> Result<Vec<SpotRequest>, Error> {
        let mut acks = Vec::with_capacity(count);
        let mut requests = self.requests.lock().await;
        for _ in 0..count {
            let request = SpotRequest {
                id: SpotRequestId(mint_id("sir", 8)),
                state: SpotRequestState::Pending,
                instance_id: None,
            };
            info!(self.log, "accepted capacity request";
                "spot_request_id" => %request.id);
            requests.insert(request.id.clone(), request.clone());

            if self.sim_mode == SimMode::Auto {
                let requests = Arc::clone(&self.requests);
                let instances = Arc::clone(&self.instances);
                let id = request.id.clone();
                let log = self.log.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(SIM_FULFILL_DELAY).await;
                    /*
                     * The request can only be gone or already terminal if the
                     * consumer cancelled it in the meantime; either way
                     * there's nothing for the fulfillment task to do.
                     */
                    let _ = Self::fulfill(&requests, &instances, &id, &log)
                        .await;
                });
            }

            acks.push(request);
        }
        Ok(acks)
    }

    async fn capacity_request_fetch(
        &self,
        id: &SpotRequestId,
    ) -> Result<SpotRequest, Error> {
        let requests = self.requests.lock().await;
        requests.get(id).cloned().ok_or(Error::ObjectNotFound {
            type_name: ResourceType::SpotRequest,
            lookup_type: LookupType::ByRequestId(id.clone()),
        })
    }

    async fn capacity_request_cancel(
        &self,
        id: &SpotRequestId,
    ) -> Result<(), Error> {
        let mut requests = self.requests.lock().await;
        let request = requests.get_mut(id).ok_or(Error::ObjectNotFound {
            type_name: ResourceType::SpotRequest,
            lookup_type: LookupType::ByRequestId(id.clone()),
        })?;
        if !request.state.is_terminal() {
            request.state = SpotRequestState::Cancelled;
            info!(self.log, "cancelled capacity request";
                "spot_request_id" => %request.id);
        }
        Ok(())
    }

    async fn instance_terminate(&self, id: &InstanceId) -> Result<(), Error> {
        /* Lock ordering: requests before instances, as in fulfill(). */
        let mut requests = self.requests.lock().await;
        let mut instances = self.instances.lock().await;
        if !instances.remove(id) {
            return Err(Error::ObjectNotFound {
                type_name: ResourceType::Instance,
                lookup_type: LookupType::ByCompositeId(id.to_string()),
            });
        }
        info!(self.log, "terminated instance"; "instance_id" => %id);

        /*
         * Close out the request that this instance was fulfilling so that a
         * later reconcile pass sees a terminal request, not a live one.
         */
        for request in requests.values_mut() {
            if request.instance_id.as_ref() == Some(id) {
                request.state = SpotRequestState::Closed;
            }
        }
        Ok(())
    }
}

/// Mints an identifier in the backend's format: a prefix plus `len` hex
/// characters.
fn mint_id(prefix: &str, len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &hex[..len])
}

#[cfg(test)]
mod test {
    use super::CapacityClient;
    use super::CapacitySpec;
    use super::LaunchTemplate;
    use super::SimCapacity;
    use super::SimMode;
    use super::SpotRequestState;
    use crate::error::Error;
    use crate::model::SpotRequestId;
    use slog::o;
    use slog::Logger;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn test_spec() -> CapacitySpec {
        let template = LaunchTemplate {
            instance_type: String::from("m5.large"),
            image_id: String::from("ami-0233c2d874b811deb"),
            subnet_id: String::from("subnet-0f00ba11"),
            instance_profile_arn: String::from(
                "arn:aws:iam::123456789012:instance-profile/game-server",
            ),
            security_group_id: String::from("sg-0c0ffee0"),
        };
        CapacitySpec::from_template(&template, String::from("IyEvYmluL2Jhc2g="))
    }

    #[tokio::test]
    async fn test_sim_request_lifecycle() {
        let sim = SimCapacity::new(SimMode::Explicit, test_logger());
        let acks = sim.capacity_request(&test_spec(), 1).await.unwrap();
        assert_eq!(acks.len(), 1);
        let ack = &acks[0];
        assert_eq!(ack.state, SpotRequestState::Pending);
        assert!(ack.instance_id.is_none());

        /* Nothing happens in explicit mode until the request is poked. */
        let fetched = sim.capacity_request_fetch(&ack.id).await.unwrap();
        assert_eq!(fetched.state, SpotRequestState::Pending);

        let fulfilled = sim.request_poke(&ack.id).await.unwrap();
        assert_eq!(fulfilled.state, SpotRequestState::Active);
        let instance_id = fulfilled.instance_id.expect("expected an instance");

        /* Poking a fulfilled request changes nothing. */
        let again = sim.request_poke(&ack.id).await.unwrap();
        assert_eq!(again.instance_id.as_ref(), Some(&instance_id));

        /* Terminating the instance closes out the request. */
        sim.instance_terminate(&instance_id).await.unwrap();
        let closed = sim.capacity_request_fetch(&ack.id).await.unwrap();
        assert_eq!(closed.state, SpotRequestState::Closed);
        let error = sim.instance_terminate(&instance_id).await.unwrap_err();
        assert!(matches!(error, Error::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_sim_cancel() {
        let sim = SimCapacity::new(SimMode::Explicit, test_logger());
        let acks = sim.capacity_request(&test_spec(), 1).await.unwrap();
        sim.capacity_request_cancel(&acks[0].id).await.unwrap();
        let cancelled = sim.capacity_request_fetch(&acks[0].id).await.unwrap();
        assert_eq!(cancelled.state, SpotRequestState::Cancelled);

        let error = sim
            .capacity_request_cancel(&SpotRequestId(String::from("sir-nope")))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_sim_requests_multiple() {
        let sim = SimCapacity::new(SimMode::Explicit, test_logger());
        let acks = sim.capacity_request(&test_spec(), 3).await.unwrap();
        assert_eq!(acks.len(), 3);
        /* Each acknowledgment gets a distinct request id. */
        let mut ids: Vec<_> = acks.iter().map(|a| a.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }
}
