// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent record store for game servers
//!
//! The record store owns the server records; the lifecycle manager holds a
//! handle and mutates records through it, never caching state across calls.
//! Writes are conditional on the generation observed at read time, which is
//! the only concurrency control the system needs: the loser of a race gets
//! its write refused before it can take any external action.

use async_trait::async_trait;
use chrono::Utc;
use futures::lock::Mutex;
use std::collections::BTreeMap;

use crate::error::Error;
use crate::error::ResourceType;
use crate::model::Generation;
use crate::model::Server;
use crate::model::ServerId;
use crate::model::ServerRuntime;
use crate::model::ServerState;

/*
 * These type aliases exist primarily to make it easier to be consistent
 * about return values from this module.
 */

/// Result of a create operation.
pub type CreateResult = Result<Server, Error>;
/// Result of a lookup operation.
pub type LookupResult = Result<Server, Error>;
/// Result of a list operation.
pub type ListResult = Result<Vec<Server>, Error>;
/// Result of a conditional update: true if the record was written.
pub type UpdateResult = Result<bool, Error>;

/// Interface to the backing table of server records
///
/// The in-memory [`MemStore`] backs the daemon today; an implementation over
/// a managed key-value table plugs in behind the same trait.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Creates a new server record in state `OFFLINE`.
    async fn server_create(&self, id: ServerId) -> CreateResult;

    /// Fetches the current record for the given server.
    async fn server_fetch(&self, id: ServerId) -> LookupResult;

    /// Lists all server records in id order.
    async fn servers_list(&self) -> ListResult;

    /// Conditionally replaces a server's runtime.  The write happens only if
    /// the stored generation still equals `observed_gen`; otherwise the
    /// record is left untouched and `false` is returned.  `runtime` must
    /// carry the successor generation.
    async fn server_update_runtime(
        &self,
        id: ServerId,
        observed_gen: Generation,
        runtime: ServerRuntime,
    ) -> UpdateResult;
}

/// In-memory implementation of [`ServerStore`]
pub struct MemStore {
    servers: Mutex<BTreeMap<ServerId, Server>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore { servers: Mutex::new(BTreeMap::new()) }
    }
}

impl Default for MemStore {
    fn default() -> MemStore {
        MemStore::new()
    }
}

#[async_trait]
impl ServerStore for MemStore {
    async fn server_create(&self, id: ServerId) -> CreateResult {
        let mut servers = self.servers.lock().await;
        if servers.contains_key(&id) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Server,
                object_name: id.to_string(),
            });
        }
        let server = Server {
            id,
            runtime: ServerRuntime {
                state: ServerState::Offline,
                spot_request_id: None,
                instance_id: None,
                gen: Generation::new(),
                time_updated: Utc::now(),
            },
        };
        servers.insert(id, server.clone());
        Ok(server)
    }

    async fn server_fetch(&self, id: ServerId) -> LookupResult {
        let servers = self.servers.lock().await;
        servers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Server, id))
    }

    async fn servers_list(&self) -> ListResult {
        let servers = self.servers.lock().await;
        Ok(servers.values().cloned().collect())
    }

    async fn server_update_runtime(
        &self,
        id: ServerId,
        observed_gen: Generation,
        runtime: ServerRuntime,
    ) -> UpdateResult {
        let mut servers = self.servers.lock().await;
        let server = servers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Server, id))?;
        if server.runtime.gen != observed_gen {
            return Ok(false);
        }
        server.runtime = runtime;
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::MemStore;
    use super::ServerStore;
    use crate::error::Error;
    use crate::model::Generation;
    use crate::model::ServerId;
    use crate::model::ServerRuntime;
    use crate::model::ServerState;
    use chrono::Utc;

    #[tokio::test]
    async fn test_create_fetch_list() {
        let store = MemStore::new();
        let error = store.server_fetch(ServerId(1)).await.unwrap_err();
        assert!(matches!(error, Error::ObjectNotFound { .. }));

        store.server_create(ServerId(3)).await.unwrap();
        let server = store.server_create(ServerId(1)).await.unwrap();
        assert_eq!(server.runtime.state, ServerState::Offline);
        assert!(server.runtime.spot_request_id.is_none());
        assert!(server.runtime.instance_id.is_none());

        let error = store.server_create(ServerId(1)).await.unwrap_err();
        assert!(matches!(error, Error::ObjectAlreadyExists { .. }));

        /* Listing is ordered by id. */
        let servers = store.servers_list().await.unwrap();
        let ids: Vec<_> = servers.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![ServerId(1), ServerId(3)]);
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = MemStore::new();
        let server = store.server_create(ServerId(7)).await.unwrap();
        let observed = server.runtime;

        let next = ServerRuntime {
            state: ServerState::Unknown,
            spot_request_id: None,
            instance_id: None,
            gen: observed.gen.next(),
            time_updated: Utc::now(),
        };
        let updated = store
            .server_update_runtime(ServerId(7), observed.gen, next.clone())
            .await
            .unwrap();
        assert!(updated);
        let fetched = store.server_fetch(ServerId(7)).await.unwrap();
        assert_eq!(fetched.runtime, next);

        /*
         * A writer that observed the original generation loses the race and
         * must not clobber the record.
         */
        let stale = ServerRuntime {
            state: ServerState::Online,
            gen: observed.gen.next(),
            ..next.clone()
        };
        let updated = store
            .server_update_runtime(ServerId(7), observed.gen, stale)
            .await
            .unwrap();
        assert!(!updated);
        let fetched = store.server_fetch(ServerId(7)).await.unwrap();
        assert_eq!(fetched.runtime, next);

        let error = store
            .server_update_runtime(ServerId(9), Generation::new(), next)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ObjectNotFound { .. }));
    }
}
