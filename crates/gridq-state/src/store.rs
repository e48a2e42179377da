//! StateStore: redb-backed state persistence for gridq.
//!
//! Provides typed operations over clusters, deployments, and pending
//! triggers. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).
//!
//! Ledger operations (`try_reserve`, `release`, `commit_admission`,
//! `commit_release`) each run inside one write transaction, so a
//! deployment's status and its cluster's available capacity are always
//! written together or not at all.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(TRIGGERS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Register a cluster. Available capacity starts equal to the total.
    pub fn create_cluster(&self, new: &NewCluster) -> StateResult<Cluster> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let cluster = {
            let id = next_id(&txn, CLUSTER_SEQ)?;
            let cluster = Cluster {
                id,
                name: new.name.clone(),
                organization_id: new.organization_id,
                total: new.total,
                available: new.total,
                version: 0,
                created_at: epoch_secs(),
            };
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            put_record(&mut table, id, &cluster)?;
            cluster
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = cluster.id, name = %cluster.name, "cluster stored");
        Ok(cluster)
    }

    /// Get a cluster by id.
    pub fn get_cluster(&self, id: ClusterId) -> StateResult<Option<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        get_record(&table, id)
    }

    /// List all clusters in registration order.
    pub fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        scan_records(&table, |_: &Cluster| true)
    }

    /// List the clusters owned by one organization.
    pub fn list_clusters_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> StateResult<Vec<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        scan_records(&table, |c: &Cluster| c.organization_id == organization_id)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Persist a new deployment as `Queued`.
    ///
    /// Fails with `NotFound` (and writes nothing) if the referenced
    /// cluster does not exist.
    pub fn insert_deployment(&self, new: &NewDeployment) -> StateResult<Deployment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            if get_record::<Cluster, _>(&clusters, new.cluster_id)?.is_none() {
                return Err(StateError::NotFound(format!("cluster {}", new.cluster_id)));
            }
        }
        let deployment = {
            let id = next_id(&txn, DEPLOYMENT_SEQ)?;
            let now = epoch_secs();
            let deployment = Deployment {
                id,
                cluster_id: new.cluster_id,
                docker_image: new.docker_image.clone(),
                request: new.request,
                priority: new.priority,
                status: DeploymentStatus::Queued,
                created_at: now,
                updated_at: now,
            };
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            put_record(&mut table, id, &deployment)?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            deployment_id = deployment.id,
            cluster_id = deployment.cluster_id,
            priority = deployment.priority,
            "deployment stored"
        );
        Ok(deployment)
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, id: DeploymentId) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        get_record(&table, id)
    }

    /// List every deployment on a cluster in submission order.
    pub fn list_deployments(&self, cluster_id: ClusterId) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        scan_records(&table, |d: &Deployment| d.cluster_id == cluster_id)
    }

    /// List the deployments on a cluster with the given status, in
    /// submission order.
    pub fn list_deployments_with_status(
        &self,
        cluster_id: ClusterId,
        status: DeploymentStatus,
    ) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        scan_records(&table, |d: &Deployment| {
            d.cluster_id == cluster_id && d.status == status
        })
    }

    /// Queued deployments on a cluster, highest priority first, ties in
    /// submission order.
    pub fn list_queued(&self, cluster_id: ClusterId) -> StateResult<Vec<Deployment>> {
        let mut queued = self.list_deployments_with_status(cluster_id, DeploymentStatus::Queued)?;
        sort_by_priority(&mut queued);
        Ok(queued)
    }

    /// Queued deployments on every cluster, grouped by cluster and ordered
    /// like [`StateStore::list_queued`] within each group.
    pub fn list_all_queued(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut queued = scan_records(&table, |d: &Deployment| {
            d.status == DeploymentStatus::Queued
        })?;
        queued.sort_by(|a, b| {
            a.cluster_id
                .cmp(&b.cluster_id)
                .then(b.priority.cmp(&a.priority))
                .then(a.id.cmp(&b.id))
        });
        Ok(queued)
    }

    /// Move a deployment from `from` to `to` if it is currently in `from`.
    ///
    /// Only for transitions that leave the ledger untouched. Entering or
    /// leaving `Running` goes through [`StateStore::commit_admission`] and
    /// [`StateStore::commit_release`] instead.
    pub fn transition_status(
        &self,
        id: DeploymentId,
        from: DeploymentStatus,
        to: DeploymentStatus,
    ) -> StateResult<Deployment> {
        if from == DeploymentStatus::Running || to == DeploymentStatus::Running {
            return Err(StateError::Invariant(format!(
                "deployment {id}: {from} -> {to} must be paired with a ledger change"
            )));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deployment = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment = get_record(&table, id)?
                .ok_or_else(|| StateError::NotFound(format!("deployment {id}")))?;
            if deployment.status != from {
                return Err(StateError::Conflict(format!(
                    "deployment {id} is {}, expected {from}",
                    deployment.status
                )));
            }
            deployment.status = to;
            deployment.updated_at = epoch_secs();
            put_record(&mut table, id, &deployment)?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = id, %from, %to, "deployment status changed");
        Ok(deployment)
    }

    // ── Ledger ─────────────────────────────────────────────────────

    /// Reserve `amount` on a cluster if every dimension fits.
    ///
    /// Returns `false` and writes nothing when any dimension is short.
    /// Capacity only; [`StateStore::commit_admission`] is the variant that
    /// also marks a deployment running.
    pub fn try_reserve(&self, cluster_id: ClusterId, amount: &Resources) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let mut cluster: Cluster = get_record(&table, cluster_id)?
                .ok_or_else(|| StateError::NotFound(format!("cluster {cluster_id}")))?;
            let Some(remaining) = cluster.available.checked_sub(amount) else {
                return Ok(false);
            };
            cluster.available = remaining;
            cluster.version += 1;
            put_record(&mut table, cluster_id, &cluster)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id, %amount, "capacity reserved");
        Ok(true)
    }

    /// Return `amount` to a cluster's available capacity.
    ///
    /// Fails with `Invariant` if the result would exceed the total.
    /// Capacity only; [`StateStore::commit_release`] also settles the
    /// deployment.
    pub fn release(&self, cluster_id: ClusterId, amount: &Resources) -> StateResult<Cluster> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let cluster = {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let mut cluster: Cluster = get_record(&table, cluster_id)?
                .ok_or_else(|| StateError::NotFound(format!("cluster {cluster_id}")))?;
            credit(&mut cluster, amount)?;
            put_record(&mut table, cluster_id, &cluster)?;
            cluster
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id, %amount, "capacity released");
        Ok(cluster)
    }

    /// Admit a queued deployment: debit its request from the cluster and
    /// mark it `Running`, in one transaction.
    ///
    /// `expected_version` is the cluster version the admission decision
    /// was made against. If the cluster changed since, or the deployment
    /// is no longer queued, nothing is written and `Conflict` is returned.
    pub fn commit_admission(
        &self,
        deployment_id: DeploymentId,
        expected_version: u64,
    ) -> StateResult<(Deployment, Cluster)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (deployment, cluster) = {
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;

            let mut deployment: Deployment = get_record(&deployments, deployment_id)?
                .ok_or_else(|| StateError::NotFound(format!("deployment {deployment_id}")))?;
            let mut cluster: Cluster = get_record(&clusters, deployment.cluster_id)?
                .ok_or_else(|| StateError::NotFound(format!("cluster {}", deployment.cluster_id)))?;

            if cluster.version != expected_version {
                return Err(StateError::Conflict(format!(
                    "cluster {} moved from version {expected_version} to {}",
                    cluster.id, cluster.version
                )));
            }
            if deployment.status != DeploymentStatus::Queued {
                return Err(StateError::Conflict(format!(
                    "deployment {deployment_id} is {}, expected queued",
                    deployment.status
                )));
            }
            cluster.available = cluster.available.checked_sub(&deployment.request).ok_or_else(|| {
                StateError::Conflict(format!(
                    "cluster {} has {} available, deployment {deployment_id} needs {}",
                    cluster.id, cluster.available, deployment.request
                ))
            })?;
            cluster.version += 1;
            deployment.status = DeploymentStatus::Running;
            deployment.updated_at = epoch_secs();

            put_record(&mut clusters, cluster.id, &cluster)?;
            put_record(&mut deployments, deployment_id, &deployment)?;
            (deployment, cluster)
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            deployment_id,
            cluster_id = cluster.id,
            version = cluster.version,
            "admission committed"
        );
        Ok((deployment, cluster))
    }

    /// Finish a running deployment: move it to the terminal status `to`
    /// and return its request to the cluster, in one transaction.
    pub fn commit_release(
        &self,
        deployment_id: DeploymentId,
        to: DeploymentStatus,
    ) -> StateResult<(Deployment, Cluster)> {
        if !to.is_terminal() {
            return Err(StateError::Invariant(format!(
                "deployment {deployment_id}: running -> {to} is not a release"
            )));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (deployment, cluster) = {
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;

            let mut deployment: Deployment = get_record(&deployments, deployment_id)?
                .ok_or_else(|| StateError::NotFound(format!("deployment {deployment_id}")))?;
            if deployment.status != DeploymentStatus::Running {
                return Err(StateError::Conflict(format!(
                    "deployment {deployment_id} is {}, expected running",
                    deployment.status
                )));
            }
            let mut cluster: Cluster = get_record(&clusters, deployment.cluster_id)?
                .ok_or_else(|| StateError::NotFound(format!("cluster {}", deployment.cluster_id)))?;

            credit(&mut cluster, &deployment.request)?;
            deployment.status = to;
            deployment.updated_at = epoch_secs();

            put_record(&mut clusters, cluster.id, &cluster)?;
            put_record(&mut deployments, deployment_id, &deployment)?;
            (deployment, cluster)
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id, cluster_id = cluster.id, status = %to, "release committed");
        Ok((deployment, cluster))
    }

    // ── Triggers ───────────────────────────────────────────────────

    /// Append a trigger payload. Returns its sequence number.
    pub fn enqueue_trigger(&self, payload: &[u8]) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq = next_id(&txn, TRIGGER_SEQ)?;
        {
            let mut table = txn.open_table(TRIGGERS).map_err(map_err!(Table))?;
            table.insert(seq, payload).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    /// All pending triggers, oldest first.
    pub fn list_triggers(&self) -> StateResult<Vec<StoredTrigger>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRIGGERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push(StoredTrigger {
                seq: key.value(),
                payload: value.value().to_vec(),
            });
        }
        Ok(results)
    }

    /// Remove a trigger once it has been handled. Returns true if it existed.
    pub fn remove_trigger(&self, seq: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TRIGGERS).map_err(map_err!(Table))?;
            existed = table.remove(seq).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Move a pending trigger behind every other pending trigger by
    /// re-inserting its payload under a fresh sequence number. Returns the
    /// new sequence number, or `None` if `seq` is not pending.
    pub fn requeue_trigger(&self, seq: u64) -> StateResult<Option<u64>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let payload = {
            let mut table = txn.open_table(TRIGGERS).map_err(map_err!(Table))?;
            let removed = table.remove(seq).map_err(map_err!(Write))?;
            removed.map(|value| value.value().to_vec())
        };
        let Some(payload) = payload else {
            return Ok(None);
        };
        let new_seq = next_id(&txn, TRIGGER_SEQ)?;
        {
            let mut table = txn.open_table(TRIGGERS).map_err(map_err!(Table))?;
            table.insert(new_seq, payload.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some(new_seq))
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Hand out the next id of a sequence within `txn`.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let last = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = last + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn get_record<T, R>(table: &R, id: u64) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => {
            let record = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn scan_records<T, R, F>(table: &R, mut keep: F) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
    F: FnMut(&T) -> bool,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let record: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        if keep(&record) {
            results.push(record);
        }
    }
    Ok(results)
}

fn put_record<T: Serialize>(
    table: &mut Table<'_, u64, &'static [u8]>,
    id: u64,
    record: &T,
) -> StateResult<()> {
    let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
    table
        .insert(id, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Add `amount` back to a cluster, refusing to exceed its total.
fn credit(cluster: &mut Cluster, amount: &Resources) -> StateResult<()> {
    cluster.available = cluster
        .available
        .checked_add_within(amount, &cluster.total)
        .ok_or_else(|| {
            StateError::Invariant(format!(
                "releasing {amount} on cluster {} would exceed total ({} available of {})",
                cluster.id, cluster.available, cluster.total
            ))
        })?;
    cluster.version += 1;
    Ok(())
}

/// Highest priority first, ties broken by submission order.
fn sort_by_priority(deployments: &mut [Deployment]) {
    deployments.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn test_cluster(store: &StateStore, ram: u64, cpu: u64, gpu: u64) -> Cluster {
        store
            .create_cluster(&NewCluster {
                name: "gpu-pool".to_string(),
                organization_id: 1,
                total: Resources::new(ram, cpu, gpu),
            })
            .unwrap()
    }

    fn submit(
        store: &StateStore,
        cluster_id: ClusterId,
        request: Resources,
        priority: i64,
    ) -> Deployment {
        store
            .insert_deployment(&NewDeployment {
                cluster_id,
                docker_image: "registry.local/train:latest".to_string(),
                request,
                priority,
            })
            .unwrap()
    }

    // ── Clusters ───────────────────────────────────────────────────

    #[test]
    fn cluster_create_starts_fully_available() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);

        assert_eq!(cluster.id, 1);
        assert_eq!(cluster.available, cluster.total);
        assert_eq!(cluster.version, 0);
        assert_eq!(store.get_cluster(cluster.id).unwrap(), Some(cluster));
    }

    #[test]
    fn cluster_ids_are_sequential() {
        let store = test_store();
        let a = test_cluster(&store, 1, 1, 1);
        let b = test_cluster(&store, 1, 1, 1);
        assert_eq!(b.id, a.id + 1);
    }

    #[test]
    fn cluster_list_filters_by_organization() {
        let store = test_store();
        test_cluster(&store, 1, 1, 1);
        store
            .create_cluster(&NewCluster {
                name: "other".to_string(),
                organization_id: 7,
                total: Resources::new(8, 8, 0),
            })
            .unwrap();

        assert_eq!(store.list_clusters().unwrap().len(), 2);
        let org7 = store.list_clusters_for_organization(7).unwrap();
        assert_eq!(org7.len(), 1);
        assert_eq!(org7[0].name, "other");
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn deployment_insert_starts_queued() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        let d = submit(&store, cluster.id, Resources::new(512, 2, 1), 1);

        assert_eq!(d.status, DeploymentStatus::Queued);
        assert_eq!(store.get_deployment(d.id).unwrap(), Some(d));
    }

    #[test]
    fn deployment_insert_requires_cluster() {
        let store = test_store();
        let result = store.insert_deployment(&NewDeployment {
            cluster_id: 42,
            docker_image: "img".to_string(),
            request: Resources::default(),
            priority: 0,
        });

        assert!(matches!(result, Err(StateError::NotFound(_))));
        assert!(store.get_deployment(1).unwrap().is_none());
        assert!(store.list_all_queued().unwrap().is_empty());
    }

    #[test]
    fn list_queued_orders_by_priority_then_submission() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        let low = submit(&store, cluster.id, Resources::default(), 1);
        let high = submit(&store, cluster.id, Resources::default(), 5);
        let low_again = submit(&store, cluster.id, Resources::default(), 1);

        let ids: Vec<_> = store
            .list_queued(cluster.id)
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![high.id, low.id, low_again.id]);
    }

    #[test]
    fn list_queued_is_scoped_to_cluster_and_status() {
        let store = test_store();
        let a = test_cluster(&store, 1024, 4, 2);
        let b = test_cluster(&store, 1024, 4, 2);
        let on_a = submit(&store, a.id, Resources::new(1, 1, 0), 1);
        submit(&store, b.id, Resources::new(1, 1, 0), 9);
        let running = submit(&store, a.id, Resources::new(1, 1, 0), 3);
        store.commit_admission(running.id, 0).unwrap();

        let queued = store.list_queued(a.id).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, on_a.id);
        assert_eq!(store.list_deployments(a.id).unwrap().len(), 2);
        assert_eq!(
            store
                .list_deployments_with_status(a.id, DeploymentStatus::Running)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn transition_status_is_conditional() {
        let store = test_store();
        let cluster = test_cluster(&store, 8, 8, 0);
        let d = submit(&store, cluster.id, Resources::default(), 0);

        let failed = store
            .transition_status(d.id, DeploymentStatus::Queued, DeploymentStatus::Failed)
            .unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);

        let again =
            store.transition_status(d.id, DeploymentStatus::Queued, DeploymentStatus::Failed);
        assert!(matches!(again, Err(StateError::Conflict(_))));
    }

    #[test]
    fn transition_status_refuses_running() {
        let store = test_store();
        let cluster = test_cluster(&store, 8, 8, 0);
        let d = submit(&store, cluster.id, Resources::default(), 0);

        let result =
            store.transition_status(d.id, DeploymentStatus::Queued, DeploymentStatus::Running);
        assert!(matches!(result, Err(StateError::Invariant(_))));
        assert_eq!(
            store.get_deployment(d.id).unwrap().unwrap().status,
            DeploymentStatus::Queued
        );
    }

    // ── Ledger ─────────────────────────────────────────────────────

    #[test]
    fn try_reserve_debits_when_everything_fits() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);

        assert!(store.try_reserve(cluster.id, &Resources::new(512, 2, 1)).unwrap());
        let after = store.get_cluster(cluster.id).unwrap().unwrap();
        assert_eq!(after.available, Resources::new(512, 2, 1));
        assert_eq!(after.version, 1);
    }

    #[test]
    fn try_reserve_changes_nothing_when_one_dimension_is_short() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);

        assert!(!store.try_reserve(cluster.id, &Resources::new(1, 1, 3)).unwrap());
        assert_eq!(store.get_cluster(cluster.id).unwrap(), Some(cluster));
    }

    #[test]
    fn try_reserve_unknown_cluster() {
        let store = test_store();
        let result = store.try_reserve(9, &Resources::default());
        assert!(matches!(result, Err(StateError::NotFound(_))));
    }

    #[test]
    fn release_cannot_exceed_total() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        assert!(store.try_reserve(cluster.id, &Resources::new(100, 1, 0)).unwrap());

        let restored = store.release(cluster.id, &Resources::new(100, 1, 0)).unwrap();
        assert_eq!(restored.available, restored.total);

        let result = store.release(cluster.id, &Resources::new(1, 0, 0));
        assert!(matches!(result, Err(StateError::Invariant(_))));
        assert!(store.get_cluster(cluster.id).unwrap().unwrap().is_consistent());
    }

    #[test]
    fn commit_admission_writes_status_and_debit_together() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        let d = submit(&store, cluster.id, Resources::new(512, 2, 1), 1);

        let (deployment, after) = store.commit_admission(d.id, cluster.version).unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Running);
        assert_eq!(after.available, Resources::new(512, 2, 1));
        assert_eq!(store.get_deployment(d.id).unwrap().unwrap(), deployment);
        assert_eq!(store.get_cluster(cluster.id).unwrap().unwrap(), after);
    }

    #[test]
    fn commit_admission_rejects_stale_version() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        let d = submit(&store, cluster.id, Resources::new(512, 2, 1), 1);
        assert!(store.try_reserve(cluster.id, &Resources::new(1, 0, 0)).unwrap());

        let result = store.commit_admission(d.id, cluster.version);
        assert!(matches!(result, Err(StateError::Conflict(_))));

        let unchanged = store.get_deployment(d.id).unwrap().unwrap();
        assert_eq!(unchanged.status, DeploymentStatus::Queued);
        assert_eq!(
            store.get_cluster(cluster.id).unwrap().unwrap().available,
            Resources::new(1023, 4, 2)
        );
    }

    #[test]
    fn commit_admission_twice_debits_once() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        let d = submit(&store, cluster.id, Resources::new(512, 2, 1), 1);

        let (_, after) = store.commit_admission(d.id, 0).unwrap();
        let second = store.commit_admission(d.id, after.version);
        assert!(matches!(second, Err(StateError::Conflict(_))));
        assert_eq!(
            store.get_cluster(cluster.id).unwrap().unwrap().available,
            Resources::new(512, 2, 1)
        );
    }

    #[test]
    fn commit_release_returns_capacity() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        let d = submit(&store, cluster.id, Resources::new(512, 2, 1), 1);
        store.commit_admission(d.id, 0).unwrap();

        let (done, after) = store
            .commit_release(d.id, DeploymentStatus::Completed)
            .unwrap();
        assert_eq!(done.status, DeploymentStatus::Completed);
        assert_eq!(after.available, after.total);

        let again = store.commit_release(d.id, DeploymentStatus::Completed);
        assert!(matches!(again, Err(StateError::Conflict(_))));
    }

    #[test]
    fn commit_release_requires_terminal_target() {
        let store = test_store();
        let cluster = test_cluster(&store, 1024, 4, 2);
        let d = submit(&store, cluster.id, Resources::new(1, 1, 1), 1);
        store.commit_admission(d.id, 0).unwrap();

        let result = store.commit_release(d.id, DeploymentStatus::Queued);
        assert!(matches!(result, Err(StateError::Invariant(_))));
    }

    // ── Triggers ───────────────────────────────────────────────────

    #[test]
    fn triggers_are_listed_oldest_first_and_removed() {
        let store = test_store();
        let first = store.enqueue_trigger(b"{\"deployment_id\":1}").unwrap();
        let second = store.enqueue_trigger(b"{\"deployment_id\":2}").unwrap();

        let pending = store.list_triggers().unwrap();
        assert_eq!(pending.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![first, second]);

        assert!(store.remove_trigger(first).unwrap());
        assert!(!store.remove_trigger(first).unwrap());
        assert_eq!(store.list_triggers().unwrap().len(), 1);
    }

    #[test]
    fn requeued_trigger_moves_behind_later_ones() {
        let store = test_store();
        let first = store.enqueue_trigger(b"{\"deployment_id\":1}").unwrap();
        let second = store.enqueue_trigger(b"{\"deployment_id\":2}").unwrap();

        let moved = store.requeue_trigger(first).unwrap().unwrap();
        assert!(moved > second);

        let pending = store.list_triggers().unwrap();
        assert_eq!(pending.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![second, moved]);
        assert_eq!(pending[1].payload, b"{\"deployment_id\":1}".to_vec());
        assert_eq!(store.requeue_trigger(first).unwrap(), None);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let cluster_id = {
            let store = StateStore::open(&db_path).unwrap();
            let cluster = test_cluster(&store, 64, 8, 0);
            submit(&store, cluster.id, Resources::new(1, 1, 0), 2);
            store.enqueue_trigger(b"{\"deployment_id\":1}").unwrap();
            cluster.id
        };

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_queued(cluster_id).unwrap().len(), 1);
        assert_eq!(store.list_triggers().unwrap().len(), 1);

        // Sequences continue after reopen.
        let next = submit(&store, cluster_id, Resources::default(), 0);
        assert_eq!(next.id, 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = test_store();

        assert!(store.list_clusters().unwrap().is_empty());
        assert!(store.list_deployments(1).unwrap().is_empty());
        assert!(store.list_queued(1).unwrap().is_empty());
        assert!(store.list_triggers().unwrap().is_empty());
        assert!(store.get_cluster(1).unwrap().is_none());
        assert!(!store.remove_trigger(1).unwrap());
    }
}
