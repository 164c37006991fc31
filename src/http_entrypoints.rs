// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP entrypoint functions for the control plane's exposed API

use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::HttpError;
use dropshot::HttpResponseAccepted;
use dropshot::HttpResponseCreated;
use dropshot::HttpResponseOk;
use dropshot::Path;
use dropshot::RequestContext;
use dropshot::TypedBody;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;

use crate::controller::Controller;
use crate::lifecycle::ServerTarget;
use crate::model::Server;
use crate::model::ServerId;
use crate::model::ServerRuntime;
use crate::model::ServerState;
use crate::model::ServerView;
use crate::model::SpotRequestId;
use crate::provision::SpotRequest;

type ControllerApiDescription = ApiDescription<Arc<Controller>>;

/// Returns a description of the control plane API
pub fn api() -> ControllerApiDescription {
    fn register_endpoints(
        api: &mut ControllerApiDescription,
    ) -> Result<(), String> {
        api.register(server_list)?;
        api.register(server_create)?;
        api.register(server_get)?;
        api.register(server_state_get)?;
        api.register(server_state_put)?;
        api.register(server_start)?;
        api.register(server_stop)?;
        api.register(server_reconcile)?;
        api.register(spot_request_poke)?;
        Ok(())
    }

    let mut api = ControllerApiDescription::new();
    if let Err(message) = register_endpoints(&mut api) {
        panic!("failed to register entrypoints: {}", message);
    }
    api
}

/// Create-time parameters for a server record
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ServerCreateParams {
    pub id: ServerId,
}

/// Body of a request to drive a server toward a target state
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ServerEnsureBody {
    pub target: ServerTarget,
}

#[derive(Deserialize, JsonSchema)]
struct ServerPathParam {
    server_id: ServerId,
}

#[derive(Deserialize, JsonSchema)]
struct SpotRequestPathParam {
    request_id: SpotRequestId,
}

/// List all server records.
#[endpoint {
    method = GET,
    path = "/servers",
}]
async fn server_list(
    rqctx: RequestContext<Arc<Controller>>,
) -> Result<HttpResponseOk<Vec<ServerView>>, HttpError> {
    let controller = rqctx.context();
    let servers = controller.servers_list().await?;
    Ok(HttpResponseOk(servers.iter().map(Server::to_view).collect()))
}

/// Create a new server record, initially offline.
#[endpoint {
    method = POST,
    path = "/servers",
}]
async fn server_create(
    rqctx: RequestContext<Arc<Controller>>,
    new_server: TypedBody<ServerCreateParams>,
) -> Result<HttpResponseCreated<ServerView>, HttpError> {
    let controller = rqctx.context();
    let params = new_server.into_inner();
    let server = controller.server_create(params.id).await?;
    Ok(HttpResponseCreated(server.to_view()))
}

/// Fetch one server record.
#[endpoint {
    method = GET,
    path = "/servers/{server_id}",
}]
async fn server_get(
    rqctx: RequestContext<Arc<Controller>>,
    path_params: Path<ServerPathParam>,
) -> Result<HttpResponseOk<ServerView>, HttpError> {
    let controller = rqctx.context();
    let server =
        controller.server_fetch(path_params.into_inner().server_id).await?;
    Ok(HttpResponseOk(server.to_view()))
}

/// Fetch a server's lifecycle state.
#[endpoint {
    method = GET,
    path = "/servers/{server_id}/state",
}]
async fn server_state_get(
    rqctx: RequestContext<Arc<Controller>>,
    path_params: Path<ServerPathParam>,
) -> Result<HttpResponseOk<ServerState>, HttpError> {
    let controller = rqctx.context();
    let state =
        controller.server_state(path_params.into_inner().server_id).await?;
    Ok(HttpResponseOk(state))
}

/// Drive a server toward a target state, starting or stopping it as needed.
#[endpoint {
    method = PUT,
    path = "/servers/{server_id}/state",
}]
async fn server_state_put(
    rqctx: RequestContext<Arc<Controller>>,
    path_params: Path<ServerPathParam>,
    body: TypedBody<ServerEnsureBody>,
) -> Result<HttpResponseAccepted<ServerRuntime>, HttpError> {
    let controller = rqctx.context();
    let runtime = controller
        .server_ensure_target(
            path_params.into_inner().server_id,
            body.into_inner().target,
        )
        .await?;
    Ok(HttpResponseAccepted(runtime))
}

/// Launch a server.  Fails if the server is currently online.
#[endpoint {
    method = POST,
    path = "/servers/{server_id}/start",
}]
async fn server_start(
    rqctx: RequestContext<Arc<Controller>>,
    path_params: Path<ServerPathParam>,
) -> Result<HttpResponseAccepted<ServerRuntime>, HttpError> {
    let controller = rqctx.context();
    let runtime =
        controller.server_start(path_params.into_inner().server_id).await?;
    Ok(HttpResponseAccepted(runtime))
}

/// Take a server offline.  Fails if the server is already offline.
#[endpoint {
    method = POST,
    path = "/servers/{server_id}/stop",
}]
async fn server_stop(
    rqctx: RequestContext<Arc<Controller>>,
    path_params: Path<ServerPathParam>,
) -> Result<HttpResponseAccepted<ServerRuntime>, HttpError> {
    let controller = rqctx.context();
    let runtime =
        controller.server_stop(path_params.into_inner().server_id).await?;
    Ok(HttpResponseAccepted(runtime))
}

/// Verify an UNKNOWN server against the provisioning backend and settle its
/// record.
#[endpoint {
    method = POST,
    path = "/servers/{server_id}/reconcile",
}]
async fn server_reconcile(
    rqctx: RequestContext<Arc<Controller>>,
    path_params: Path<ServerPathParam>,
) -> Result<HttpResponseOk<ServerRuntime>, HttpError> {
    let controller = rqctx.context();
    let runtime = controller
        .server_reconcile(path_params.into_inner().server_id)
        .await?;
    Ok(HttpResponseOk(runtime))
}

/// Fulfill a pending spot request in the simulated provisioning backend.
/// This endpoint only exists because the backend is simulated; the test suite
/// uses it to drive fulfillment deterministically.
#[endpoint {
    method = POST,
    path = "/spot-requests/{request_id}/poke",
}]
async fn spot_request_poke(
    rqctx: RequestContext<Arc<Controller>>,
    path_params: Path<SpotRequestPathParam>,
) -> Result<HttpResponseOk<SpotRequest>, HttpError> {
    let controller = rqctx.context();
    let request = controller
        .spot_request_poke(&path_params.into_inner().request_id)
        .await?;
    Ok(HttpResponseOk(request))
}
