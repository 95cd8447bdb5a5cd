//! Management closure over the group forest, with an invalidatable cache.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use tessera_core::GroupName;

use crate::{Group, IntegrityViolation};

/// Default bound on management chain length.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Read-only group lookups the engine needs from the identity store.
pub trait GroupSource: Send + Sync {
    fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError>;
}

impl<S> GroupSource for Arc<S>
where
    S: GroupSource + ?Sized,
{
    fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError> {
        (**self).group(name)
    }
}

/// Fixed in-process group table (tests, benches, static deployments).
impl GroupSource for HashMap<GroupName, Group> {
    fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError> {
        Ok(self.get(name).cloned())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("group source unavailable: {0}")]
pub struct GroupSourceError(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    #[error(transparent)]
    Source(#[from] GroupSourceError),
}

#[derive(Debug)]
struct CachedClosure {
    chain: Arc<[GroupName]>,
    /// Manager the walk stopped at because no such group existed.
    dangling: Option<GroupName>,
    cached_at: Instant,
}

impl CachedClosure {
    fn depends_on(&self, name: &GroupName) -> bool {
        self.chain.contains(name) || self.dangling.as_ref() == Some(name)
    }
}

#[derive(Debug, Default)]
struct ClosureCache {
    entries: HashMap<GroupName, CachedClosure>,
    /// Bumped on every invalidation; a walk that started under an older
    /// generation is not written back.
    generation: u64,
}

/// Resolves management closures: a group, then its manager, then the
/// manager's manager, up to the root.
///
/// Closures are memoized per group name. The identity layer must call
/// [`GroupHierarchy::invalidate`] whenever a group is created, deleted, or has
/// its manager or level changed. An optional `max_age` additionally bounds how
/// long any entry is served.
#[derive(Debug)]
pub struct GroupHierarchy<S> {
    source: S,
    cache: RwLock<ClosureCache>,
    max_depth: usize,
    max_age: Option<Duration>,
}

impl<S> GroupHierarchy<S>
where
    S: GroupSource,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(ClosureCache::default()),
            max_depth: DEFAULT_MAX_DEPTH,
            max_age: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Direct (uncached) group lookup.
    pub fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError> {
        self.source.group(name)
    }

    /// The management closure of `name`, starting with `name` itself.
    ///
    /// Unknown groups have an empty closure, which is never cached. A manager
    /// link to a missing group ends the chain there.
    pub fn management_closure(&self, name: &GroupName) -> Result<Arc<[GroupName]>, HierarchyError> {
        let generation = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.entries.get(name) {
                if self.is_fresh(hit) {
                    return Ok(hit.chain.clone());
                }
            }
            cache.generation
        };

        let (chain, dangling) = self.walk(name)?;
        let chain: Arc<[GroupName]> = chain.into();
        if chain.is_empty() {
            return Ok(chain);
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.generation == generation {
            cache.entries.insert(
                name.clone(),
                CachedClosure {
                    chain: chain.clone(),
                    dangling,
                    cached_at: Instant::now(),
                },
            );
        }

        Ok(chain)
    }

    /// Drop every cached closure that passes through `name`, or that ended at
    /// a manager link to `name` while no such group existed.
    pub fn invalidate(&self, name: &GroupName) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.generation += 1;
        let before = cache.entries.len();
        cache
            .entries
            .retain(|key, cached| key != name && !cached.depends_on(name));
        debug!(
            group = %name,
            dropped = before - cache.entries.len(),
            "invalidated management closures"
        );
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.generation += 1;
        cache.entries.clear();
    }

    fn is_fresh(&self, cached: &CachedClosure) -> bool {
        match self.max_age {
            Some(max_age) => cached.cached_at.elapsed() < max_age,
            None => true,
        }
    }

    fn walk(&self, name: &GroupName) -> Result<(Vec<GroupName>, Option<GroupName>), HierarchyError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(name.clone());

        while let Some(current) = next {
            let Some(group) = self.source.group(&current)? else {
                let dangling = (!chain.is_empty()).then_some(current);
                return Ok((chain, dangling));
            };

            if chain.len() >= self.max_depth || !seen.insert(current.clone()) {
                return Err(IntegrityViolation::Cycle {
                    group: name.clone(),
                    depth: chain.len(),
                }
                .into());
            }

            next = group.manager().cloned();
            chain.push(current);
        }

        Ok((chain, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};

    fn name(s: &str) -> GroupName {
        GroupName::parse(s).unwrap()
    }

    /// Mutable source that counts lookups.
    #[derive(Default)]
    struct CountingSource {
        groups: RwLock<HashMap<GroupName, Group>>,
        lookups: AtomicUsize,
    }

    impl CountingSource {
        fn put(&self, group: Group) {
            self.groups.write().unwrap().insert(group.name().clone(), group);
        }

        fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl GroupSource for CountingSource {
        fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.groups.read().unwrap().get(name).cloned())
        }
    }

    fn chain() -> Arc<CountingSource> {
        let source = Arc::new(CountingSource::default());
        let root = Group::root(name("root"), 0);
        let mid = Group::new(name("mid"), 1, Some(&root)).unwrap();
        let leaf = Group::new(name("leaf"), 2, Some(&mid)).unwrap();
        source.put(root);
        source.put(mid);
        source.put(leaf);
        source
    }

    #[test]
    fn closure_walks_to_root() {
        let hierarchy = GroupHierarchy::new(chain());
        let closure = hierarchy.management_closure(&name("leaf")).unwrap();
        assert_eq!(&*closure, &[name("leaf"), name("mid"), name("root")]);
        assert_eq!(&*hierarchy.management_closure(&name("root")).unwrap(), &[name("root")]);
    }

    #[test]
    fn unknown_group_has_empty_closure() {
        let hierarchy = GroupHierarchy::new(chain());
        assert!(hierarchy.management_closure(&name("ghost")).unwrap().is_empty());
    }

    #[test]
    fn dangling_manager_ends_chain() {
        let source = chain();
        source.put(Group::from_parts(name("orphan"), 5, Some(name("deleted"))));
        let hierarchy = GroupHierarchy::new(source);
        assert_eq!(&*hierarchy.management_closure(&name("orphan")).unwrap(), &[name("orphan")]);
    }

    #[test]
    fn cycle_is_an_integrity_error() {
        let source = Arc::new(CountingSource::default());
        source.put(Group::from_parts(name("a"), 1, Some(name("b"))));
        source.put(Group::from_parts(name("b"), 2, Some(name("a"))));
        let hierarchy = GroupHierarchy::new(source);

        let err = hierarchy.management_closure(&name("a")).unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::Integrity(IntegrityViolation::Cycle { depth: 2, .. })
        ));
    }

    #[test]
    fn chain_longer_than_max_depth_is_rejected() {
        let hierarchy = GroupHierarchy::new(chain()).with_max_depth(2);
        assert!(hierarchy.management_closure(&name("leaf")).is_err());
        assert!(hierarchy.management_closure(&name("mid")).is_ok());
    }

    #[test]
    fn repeated_lookups_hit_the_cache() {
        let source = chain();
        let hierarchy = GroupHierarchy::new(source.clone());

        hierarchy.management_closure(&name("leaf")).unwrap();
        let after_first = source.lookups();
        hierarchy.management_closure(&name("leaf")).unwrap();
        assert_eq!(source.lookups(), after_first);
    }

    #[test]
    fn manager_change_is_visible_after_invalidation() {
        let source = chain();
        let hierarchy = GroupHierarchy::new(source.clone());
        assert_eq!(hierarchy.management_closure(&name("leaf")).unwrap().len(), 3);

        // Re-parent `mid` under a new root.
        source.put(Group::root(name("other"), 0));
        source.put(Group::from_parts(name("mid"), 1, Some(name("other"))));

        // Cached until told otherwise.
        assert!(hierarchy.management_closure(&name("leaf")).unwrap().contains(&name("root")));

        hierarchy.invalidate(&name("mid"));
        let closure = hierarchy.management_closure(&name("leaf")).unwrap();
        assert_eq!(&*closure, &[name("leaf"), name("mid"), name("other")]);
    }

    #[test]
    fn unknown_groups_are_not_cached() {
        let source = chain();
        let hierarchy = GroupHierarchy::new(source.clone());
        assert!(hierarchy.management_closure(&name("new")).unwrap().is_empty());
        let before = source.lookups();
        assert!(hierarchy.management_closure(&name("new")).unwrap().is_empty());
        assert!(source.lookups() > before);

        // Visible without any invalidation.
        source.put(Group::root(name("new"), 4));
        assert_eq!(&*hierarchy.management_closure(&name("new")).unwrap(), &[name("new")]);
    }

    #[test]
    fn creating_a_dangling_manager_invalidates_its_dependents() {
        let source = chain();
        source.put(Group::from_parts(name("orphan"), 5, Some(name("late"))));
        let hierarchy = GroupHierarchy::new(source.clone());
        assert_eq!(&*hierarchy.management_closure(&name("orphan")).unwrap(), &[name("orphan")]);

        source.put(Group::from_parts(name("late"), 4, Some(name("root"))));
        hierarchy.invalidate(&name("late"));
        assert_eq!(
            &*hierarchy.management_closure(&name("orphan")).unwrap(),
            &[name("orphan"), name("late"), name("root")]
        );
    }

    /// Re-parents `mid` under `other` and invalidates it while a walk is
    /// reading `mid`, handing that walk the old record.
    struct ReparentingSource {
        inner: CountingSource,
        hierarchy: OnceLock<Weak<GroupHierarchy<Arc<ReparentingSource>>>>,
        armed: AtomicBool,
    }

    impl GroupSource for ReparentingSource {
        fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError> {
            let found = self.inner.group(name)?;
            if name.as_str() == "mid" && self.armed.swap(false, Ordering::SeqCst) {
                let other = GroupName::parse("other").unwrap();
                self.inner.put(Group::root(other.clone(), 0));
                self.inner.put(Group::from_parts(name.clone(), 1, Some(other)));
                if let Some(hierarchy) = self.hierarchy.get().and_then(Weak::upgrade) {
                    hierarchy.invalidate(name);
                }
            }
            Ok(found)
        }
    }

    #[test]
    fn walk_racing_an_invalidation_is_not_cached() {
        let base = chain();
        let inner = CountingSource::default();
        for n in ["root", "mid", "leaf"] {
            inner.put(base.group(&name(n)).unwrap().unwrap());
        }
        let source = Arc::new(ReparentingSource {
            inner,
            hierarchy: OnceLock::new(),
            armed: AtomicBool::new(true),
        });
        let hierarchy = Arc::new(GroupHierarchy::new(source.clone()));
        let _ = source.hierarchy.set(Arc::downgrade(&hierarchy));

        // The racing walk may return what it read.
        let stale = hierarchy.management_closure(&name("leaf")).unwrap();
        assert_eq!(&*stale, &[name("leaf"), name("mid"), name("root")]);

        let before = source.inner.lookups();
        let fresh = hierarchy.management_closure(&name("leaf")).unwrap();
        assert!(source.inner.lookups() > before);
        assert_eq!(&*fresh, &[name("leaf"), name("mid"), name("other")]);
    }

    #[test]
    fn invalidation_keeps_unrelated_entries() {
        let source = chain();
        source.put(Group::root(name("island"), 0));
        let hierarchy = GroupHierarchy::new(source.clone());
        hierarchy.management_closure(&name("island")).unwrap();
        hierarchy.management_closure(&name("leaf")).unwrap();

        hierarchy.invalidate(&name("mid"));
        let before = source.lookups();
        hierarchy.management_closure(&name("island")).unwrap();
        assert_eq!(source.lookups(), before);
    }

    #[test]
    fn zero_max_age_disables_caching() {
        let source = chain();
        let hierarchy = GroupHierarchy::new(source.clone()).with_max_age(Some(Duration::ZERO));
        hierarchy.management_closure(&name("root")).unwrap();
        let before = source.lookups();
        hierarchy.management_closure(&name("root")).unwrap();
        assert!(source.lookups() > before);
    }
}
