//! Decides which watch notifications start a reconciliation cycle.
//!
//! The kube watcher only reports "applied" and "deleted" objects, so a
//! [`ChangeTracker`] keeps the last seen copy of every object to tell
//! creations from updates and to recover deletions missed during a relist.
//! [`should_reconcile`] then applies the per-kind rules.

use std::collections::{HashMap, HashSet};

use futures::{Stream, StreamExt, future, stream};
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    ResourceExt,
    runtime::watcher::{self, Event},
};

use crate::crd::PredictApp;

/// Which side of the ownership relation a watched kind is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The user-authored record.
    Owner,
    /// A resource created by the reconciler.
    Owned,
}

/// The closed set of kinds this operator watches.
pub trait Watched: ResourceExt + Clone {
    const ROLE: Role;

    fn spec_differs(old: &Self, new: &Self) -> bool;
}

impl Watched for PredictApp {
    const ROLE: Role = Role::Owner;

    fn spec_differs(old: &Self, new: &Self) -> bool {
        old.spec != new.spec
    }
}

impl Watched for Deployment {
    const ROLE: Role = Role::Owned;

    fn spec_differs(old: &Self, new: &Self) -> bool {
        old.spec != new.spec
    }
}

impl Watched for Service {
    const ROLE: Role = Role::Owned;

    fn spec_differs(old: &Self, new: &Self) -> bool {
        old.spec != new.spec
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Change<K> {
    Created(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> Change<K> {
    /// The most recent state of the object.
    pub fn into_object(self) -> K {
        match self {
            Change::Created(obj) | Change::Deleted(obj) => obj,
            Change::Updated { new, .. } => new,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Change::Created(_) => "created",
            Change::Updated { .. } => "updated",
            Change::Deleted(_) => "deleted",
        }
    }
}

pub fn should_reconcile<K: Watched>(change: &Change<K>) -> bool {
    match (K::ROLE, change) {
        (Role::Owner, Change::Created(_)) => true,
        // owned resources go away with the owner
        (Role::Owner, Change::Deleted(_)) => false,
        // only the reconciler creates owned resources
        (Role::Owned, Change::Created(_)) => false,
        // recreate what was deleted behind our back
        (Role::Owned, Change::Deleted(_)) => true,
        (_, Change::Updated { old, new }) => {
            old.resource_version() != new.resource_version() && K::spec_differs(old, new)
        }
    }
}

type ObjectId = (Option<String>, String);

fn id_of<K: ResourceExt>(obj: &K) -> ObjectId {
    (obj.namespace(), obj.name_any())
}

/// Turns watcher events into [`Change`]s.
#[derive(Debug)]
pub struct ChangeTracker<K> {
    known: HashMap<ObjectId, K>,
    relisted: Option<HashSet<ObjectId>>,
}

impl<K> Default for ChangeTracker<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K: ResourceExt + Clone> ChangeTracker<K> {
    pub fn observe(&mut self, event: Event<K>) -> Vec<Change<K>> {
        match event {
            Event::Apply(obj) => vec![self.applied(obj)],
            Event::Delete(obj) => {
                self.known.remove(&id_of(&obj));
                vec![Change::Deleted(obj)]
            }
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(id_of(&obj));
                }
                vec![self.applied(obj)]
            }
            Event::InitDone => {
                let seen = self.relisted.take().unwrap_or_default();
                let gone: Vec<ObjectId> = self
                    .known
                    .keys()
                    .filter(|id| !seen.contains(*id))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|id| self.known.remove(&id))
                    .map(Change::Deleted)
                    .collect()
            }
        }
    }

    fn applied(&mut self, obj: K) -> Change<K> {
        match self.known.insert(id_of(&obj), obj.clone()) {
            Some(old) => Change::Updated { old, new: obj },
            None => Change::Created(obj),
        }
    }
}

/// Reduce a watch stream to the objects whose changes warrant a cycle.
/// Watcher errors are passed through untouched.
pub fn triggers<K, S>(events: S) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: Watched + Send + 'static,
    S: Stream<Item = Result<Event<K>, watcher::Error>> + Send,
{
    events
        .scan(ChangeTracker::default(), |tracker, event| {
            let out: Vec<Result<K, watcher::Error>> = match event {
                Ok(event) => tracker
                    .observe(event)
                    .into_iter()
                    .filter(|change| {
                        let keep = should_reconcile(change);
                        if !keep {
                            trace!(verb = change.verb(), role = ?K::ROLE, "change filtered out");
                        }
                        keep
                    })
                    .map(|change| Ok(change.into_object()))
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "watch stream error");
                    vec![Err(e)]
                }
            };
            future::ready(Some(stream::iter(out)))
        })
        .flatten()
}
