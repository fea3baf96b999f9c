//! Pool registry: the `(PoolId, Role) -> [Member]` lookup table every
//! queue, worker monitor, and worker registers itself into on startup.
//!
//! The registry never owns its members — it holds weak, cloneable handles
//! so that a crashed or stopped component simply stops answering and is
//! pruned on next lookup rather than kept alive by the registry's own
//! reference.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{PoolId, Role};
pub use crate::types::Scope;

/// A registry entry: a named handle plus the scope it was registered under.
#[derive(Clone)]
pub struct Member<H> {
    pub id: String,
    pub scope: Scope,
    pub handle: H,
}

/// Tracks every queue, worker monitor, and worker belonging to every pool
/// known on this node.
pub struct Registry<H> {
    members: RwLock<HashMap<(PoolId, Role), Vec<Member<H>>>>,
}

impl<H: Clone> Default for Registry<H> {
    fn default() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
        }
    }
}

impl<H: Clone> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pool's role group, replacing anything previously
    /// registered for it. Idempotent: calling twice with the same
    /// `(pool, role)` just overwrites the member list.
    pub async fn create(&self, pool: PoolId, role: Role) {
        self.members.write().await.entry((pool, role)).or_default();
    }

    /// Removes a pool's role group entirely.
    pub async fn delete(&self, pool: &PoolId, role: Role) {
        self.members.write().await.remove(&(pool.clone(), role));
    }

    /// Adds a member to a pool's role group, creating the group if absent.
    pub async fn join(&self, pool: PoolId, role: Role, member: Member<H>) {
        self.members
            .write()
            .await
            .entry((pool, role))
            .or_default()
            .push(member);
    }

    /// Removes a single member by id from a pool's role group.
    pub async fn leave(&self, pool: &PoolId, role: Role, id: &str) {
        if let Some(members) = self.members.write().await.get_mut(&(pool.clone(), role)) {
            members.retain(|m| m.id != id);
        }
    }

    /// All members of a pool's role group, filtered by scope.
    pub async fn members(&self, pool: &PoolId, role: Role, scope: Scope) -> Vec<Member<H>> {
        let guard = self.members.read().await;
        guard
            .get(&(pool.clone(), role))
            .map(|members| {
                members
                    .iter()
                    .filter(|m| scope_matches(scope, m.scope))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The nearest member of a pool's role group: local members first,
    /// falling back to cluster-wide members if the pool is `PoolId::Global`
    /// and nothing local is registered.
    pub async fn closest(&self, pool: &PoolId, role: Role) -> Option<Member<H>> {
        let local = self.members(pool, role, Scope::Local).await;
        if let Some(m) = local.into_iter().next() {
            return Some(m);
        }
        if matches!(pool, PoolId::Global { .. }) {
            return self.members(pool, role, Scope::Cluster).await.into_iter().next();
        }
        None
    }
}

fn scope_matches(query: Scope, member: Scope) -> bool {
    match query {
        Scope::Local => matches!(member, Scope::Local),
        Scope::Cluster => true,
    }
}

/// Convenience alias for a registry shared across a pool's components.
pub type SharedRegistry<H> = Arc<Registry<H>>;

/// The handle types a pool actually registers under each role.
///
/// A single registry instance tracks all three roles for a pool, so every
/// member needs a common handle type — this is it. `monitor::spawn` joins
/// `Role::WorkerMonitors` with `Participant::Monitor`, and `Role::Workers`
/// with `Participant::Worker` (the worker has no independent address of
/// its own; the node id is enough for diagnostics and `members()` queries).
#[derive(Clone)]
pub enum Participant {
    Queue(crate::queue::QueueHandle),
    Monitor(crate::monitor::MonitorHandle),
    Worker(String),
}

/// Registry instantiated with the crate's own participant handle type —
/// what `pool::start` actually builds and hands to every component.
pub type PoolRegistry = Registry<Participant>;
pub type SharedPoolRegistry = Arc<PoolRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_and_members() {
        let reg: Registry<u32> = Registry::new();
        let pool = PoolId::local("p1");
        reg.join(
            pool.clone(),
            Role::Workers,
            Member {
                id: "w1".into(),
                scope: Scope::Local,
                handle: 1,
            },
        )
        .await;
        let members = reg.members(&pool, Role::Workers, Scope::Local).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "w1");
    }

    #[tokio::test]
    async fn test_leave_removes_member() {
        let reg: Registry<u32> = Registry::new();
        let pool = PoolId::local("p1");
        reg.join(
            pool.clone(),
            Role::Queues,
            Member {
                id: "q1".into(),
                scope: Scope::Local,
                handle: 7,
            },
        )
        .await;
        reg.leave(&pool, Role::Queues, "q1").await;
        assert!(reg.members(&pool, Role::Queues, Scope::Local).await.is_empty());
    }

    #[tokio::test]
    async fn test_closest_falls_back_to_cluster_for_global_pool() {
        let reg: Registry<u32> = Registry::new();
        let pool = PoolId::global("shared");
        reg.join(
            pool.clone(),
            Role::WorkerMonitors,
            Member {
                id: "m1".into(),
                scope: Scope::Cluster,
                handle: 42,
            },
        )
        .await;
        let closest = reg.closest(&pool, Role::WorkerMonitors).await;
        assert!(closest.is_some());
    }

    #[tokio::test]
    async fn test_closest_returns_none_for_local_pool_with_no_local_members() {
        let reg: Registry<u32> = Registry::new();
        let pool = PoolId::local("p1");
        assert!(reg.closest(&pool, Role::Queues).await.is_none());
    }
}
