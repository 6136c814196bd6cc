//! Resolver caches.
//!
//! Two short-lived maps sit in front of storage:
//!
//! - **roles**: `user -> Option<roles>` (`None` caches an unknown user)
//! - **members**: `(user, resource) -> Option<member>`
//!
//! Negative results are cached for the same TTL as positive ones. Membership
//! caching is disabled when its TTL is zero.
//!
//! Writes invalidate synchronously. Every invalidation bumps an epoch; a
//! lookup that started before the bump will not repopulate the cache with
//! what it read, so a revoke is never masked by an in-flight read. Puts hold
//! the shared side of `gate` across the epoch check and the insert, and an
//! invalidation holds the exclusive side across the bump and the removal, so
//! the two never interleave.
//!
//! # Usage
//!
//! ```rust,ignore
//! let epoch = cache.epoch();
//! let roles = store.user_roles(&user).await?;
//! cache.put_roles(epoch, &user, roles.clone());
//!
//! cache.invalidate(InvalidationEvent::user(user));
//! ```

pub mod invalidation;

pub use invalidation::InvalidationEvent;

use dashmap::DashMap;
use metrics::counter;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::CacheConfig;
use crate::rbac::models::{ResourceMember, ResourceRef, RoleSlug, UserId};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Cached<T> {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

type RolesValue = Option<Arc<[RoleSlug]>>;
type MemberValue = Option<Arc<ResourceMember>>;

/// Snapshot of the invalidation epoch taken before a storage read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEpoch(u64);

/// Entry counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub role_entries: usize,
    pub member_entries: usize,
    pub epoch: u64,
}

/// TTL caches in front of the role and membership stores.
pub struct ResolverCache {
    roles: DashMap<UserId, Cached<RolesValue>>,
    members: DashMap<(UserId, ResourceRef), Cached<MemberValue>>,
    role_ttl: Duration,
    membership_ttl: Duration,
    max_entries: usize,
    epoch: AtomicU64,
    gate: RwLock<()>,
    events: broadcast::Sender<InvalidationEvent>,
}

impl ResolverCache {
    pub fn new(config: &CacheConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            roles: DashMap::new(),
            members: DashMap::new(),
            role_ttl: config.role_ttl,
            membership_ttl: config.membership_ttl,
            max_entries: config.max_entries.max(1),
            epoch: AtomicU64::new(0),
            gate: RwLock::new(()),
            events,
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            role_ttl: Duration::ZERO,
            membership_ttl: Duration::ZERO,
            ..CacheConfig::default()
        })
    }

    pub fn epoch(&self) -> CacheEpoch {
        CacheEpoch(self.epoch.load(Ordering::Acquire))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    /// `Some(value)` on hit, where `value` may itself cache an unknown user.
    pub fn get_roles(&self, user: &UserId) -> Option<RolesValue> {
        if self.role_ttl.is_zero() {
            return None;
        }
        let hit = lookup(&self.roles, user);
        record_lookup("roles", hit.is_some());
        hit
    }

    pub fn put_roles(&self, epoch: CacheEpoch, user: &UserId, roles: Option<Vec<RoleSlug>>) {
        if self.role_ttl.is_zero() {
            return;
        }
        let _gate = self.gate.read();
        if !self.is_current(epoch) {
            return;
        }
        self.make_room(&self.roles);
        self.roles.insert(
            user.clone(),
            Cached {
                value: roles.map(Arc::from),
                expires_at: Instant::now() + self.role_ttl,
            },
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_member(&self, user: &UserId, resource: &ResourceRef) -> Option<MemberValue> {
        if self.membership_ttl.is_zero() {
            return None;
        }
        let key = (user.clone(), resource.clone());
        let hit = lookup(&self.members, &key);
        record_lookup("members", hit.is_some());
        hit
    }

    pub fn put_member(
        &self,
        epoch: CacheEpoch,
        user: &UserId,
        resource: &ResourceRef,
        member: Option<ResourceMember>,
    ) {
        if self.membership_ttl.is_zero() {
            return;
        }
        let _gate = self.gate.read();
        if !self.is_current(epoch) {
            return;
        }
        self.make_room(&self.members);
        self.members.insert(
            (user.clone(), resource.clone()),
            Cached {
                value: member.map(Arc::new),
                expires_at: Instant::now() + self.membership_ttl,
            },
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invalidation
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply an invalidation and broadcast it to subscribers.
    pub fn invalidate(&self, event: InvalidationEvent) {
        let gate = self.gate.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);

        match &event {
            InvalidationEvent::User { user_id } => {
                self.roles.remove(user_id);
            }
            InvalidationEvent::Membership { user_id, resource } => {
                self.members.remove(&(user_id.clone(), resource.clone()));
            }
            InvalidationEvent::Resource { resource } => {
                self.members.retain(|(_, r), _| r != resource);
            }
            InvalidationEvent::All => {
                self.roles.clear();
                self.members.clear();
            }
        }
        drop(gate);

        counter!("warden_cache_invalidations_total", "kind" => event.kind()).increment(1);
        debug!(kind = event.kind(), "Cache invalidated");

        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            role_entries: self.roles.len(),
            member_entries: self.members.len(),
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }

    fn is_current(&self, epoch: CacheEpoch) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch.0
    }

    fn make_room<K, V>(&self, map: &DashMap<K, Cached<V>>)
    where
        K: Eq + std::hash::Hash,
    {
        if map.len() < self.max_entries {
            return;
        }
        map.retain(|_, entry| !entry.is_expired());
        if map.len() >= self.max_entries {
            map.clear();
        }
    }
}

fn lookup<K, V>(map: &DashMap<K, Cached<V>>, key: &K) -> Option<V>
where
    K: Eq + std::hash::Hash,
    V: Clone,
{
    let entry = map.get(key)?;
    if entry.is_expired() {
        drop(entry);
        map.remove_if(key, |_, e| e.is_expired());
        return None;
    }
    Some(entry.value.clone())
}

fn record_lookup(cache: &'static str, hit: bool) {
    if hit {
        counter!("warden_cache_hits_total", "cache" => cache).increment(1);
    } else {
        counter!("warden_cache_misses_total", "cache" => cache).increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn config(role_ms: u64, member_ms: u64) -> CacheConfig {
        CacheConfig {
            role_ttl: Duration::from_millis(role_ms),
            membership_ttl: Duration::from_millis(member_ms),
            ..CacheConfig::default()
        }
    }

    fn project(id: &str) -> ResourceRef {
        ResourceRef::project(id).unwrap()
    }

    #[test]
    fn test_roles_hit_and_negative_cache() {
        let cache = ResolverCache::new(&config(60_000, 60_000));
        let user = UserId::from("u1");
        assert!(cache.get_roles(&user).is_none());

        cache.put_roles(cache.epoch(), &user, None);
        assert_eq!(cache.get_roles(&user), Some(None));

        cache.put_roles(cache.epoch(), &user, Some(vec![RoleSlug::from("admin")]));
        let cached = cache.get_roles(&user).unwrap().unwrap();
        assert_eq!(cached.as_ref(), &[RoleSlug::from("admin")]);
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = ResolverCache::new(&config(1, 1));
        let user = UserId::from("u1");
        cache.put_roles(cache.epoch(), &user, Some(vec![]));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_roles(&user).is_none());
    }

    #[test]
    fn test_zero_membership_ttl_disables() {
        let cache = ResolverCache::new(&config(60_000, 0));
        let user = UserId::from("u1");
        cache.put_member(cache.epoch(), &user, &project("p"), None);
        assert!(cache.get_member(&user, &project("p")).is_none());
    }

    #[test]
    fn test_stale_epoch_does_not_repopulate() {
        let cache = ResolverCache::new(&config(60_000, 60_000));
        let user = UserId::from("u1");
        let member = ResourceMember::new(user.clone(), project("p")).with_permission("projects.edit");

        let epoch = cache.epoch();
        cache.invalidate(InvalidationEvent::membership(user.clone(), project("p")));
        cache.put_member(epoch, &user, &project("p"), Some(member));

        assert!(cache.get_member(&user, &project("p")).is_none());
    }

    #[test]
    fn test_concurrent_put_never_outlives_invalidation() {
        let cache = Arc::new(ResolverCache::new(&config(60_000, 60_000)));
        let user = UserId::from("u1");

        for _ in 0..500 {
            let epoch = cache.epoch();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let writer = {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let user = user.clone();
                std::thread::spawn(move || {
                    let member =
                        ResourceMember::new(user.clone(), project("p")).with_permission("projects.edit");
                    barrier.wait();
                    cache.put_member(epoch, &user, &project("p"), Some(member));
                    cache.put_roles(epoch, &user, Some(vec![RoleSlug::from("admin")]));
                })
            };

            barrier.wait();
            cache.invalidate(InvalidationEvent::user(user.clone()));
            cache.invalidate(InvalidationEvent::membership(user.clone(), project("p")));
            writer.join().unwrap();

            // Whichever side ran first, nothing read before the invalidation survives it.
            assert!(cache.get_member(&user, &project("p")).is_none());
            assert!(cache.get_roles(&user).is_none());
        }
    }

    #[test]
    fn test_resource_invalidation_drops_all_members() {
        let cache = ResolverCache::new(&config(60_000, 60_000));
        for user in ["a", "b"] {
            cache.put_member(cache.epoch(), &user.into(), &project("p"), None);
        }
        cache.put_member(cache.epoch(), &"a".into(), &project("q"), None);

        cache.invalidate(InvalidationEvent::resource(project("p")));
        assert!(cache.get_member(&"b".into(), &project("p")).is_none());
        assert!(cache.get_member(&"a".into(), &project("q")).is_some());
    }

    #[test]
    fn test_capacity_bound() {
        let cache = ResolverCache::new(&CacheConfig {
            max_entries: 2,
            ..config(60_000, 60_000)
        });
        for user in ["a", "b", "c"] {
            cache.put_roles(cache.epoch(), &user.into(), Some(vec![]));
        }
        assert!(cache.stats().role_entries <= 2);
    }

    #[tokio::test]
    async fn test_invalidation_broadcast() {
        let cache = ResolverCache::new(&config(60_000, 60_000));
        let mut rx = cache.subscribe();
        cache.invalidate(InvalidationEvent::user("u1".into()));
        assert_eq!(rx.recv().await.unwrap(), InvalidationEvent::user("u1".into()));
    }
}
