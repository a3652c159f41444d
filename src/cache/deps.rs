use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};

use crate::query::QueryKey;

/// Maps resource names to the cache entries that declared a dependency on
/// them, e.g. a course class's student list declaring `students`.
///
/// An entry's own resource is not recorded: sibling entries of one
/// resource are unrelated unless a caller selects them.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    dependents: HashMap<String, HashSet<QueryKey>>,
    links: HashMap<QueryKey, HashSet<String>>,
}

impl DependencyIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the declared dependencies of `key`.
    pub fn link(&mut self, key: &QueryKey, declared: impl IntoIterator<Item = String>) {
        self.unlink(key);

        let deps: HashSet<String> = declared
            .into_iter()
            .filter(|dep| *dep != key.resource)
            .collect();
        if deps.is_empty() {
            return;
        }

        for dep in &deps {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(key.clone());
        }
        self.links.insert(key.clone(), deps);
    }

    /// Forgets every declared dependency of `key`.
    pub fn unlink(&mut self, key: &QueryKey) {
        let Some(deps) = self.links.remove(key) else {
            return;
        };
        for dep in &deps {
            if let Some(keys) = self.dependents.get_mut(dep) {
                keys.remove(key);
                if keys.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
    }

    /// Resources `key` declared.
    pub fn dependencies_of(&self, key: &QueryKey) -> Option<&HashSet<String>> {
        self.links.get(key)
    }

    /// Entries that declared `resource`.
    pub fn dependents_of(&self, resource: &str) -> HashSet<QueryKey> {
        self.dependents.get(resource).cloned().unwrap_or_default()
    }

    /// Grows `seed` until closed: every entry that declared the resource of
    /// an entry already in the set, or one of `roots`, is added too.
    pub fn expand(
        &self,
        seed: HashSet<QueryKey>,
        roots: impl IntoIterator<Item = String>,
    ) -> HashSet<QueryKey> {
        let mut impacted = seed;
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = impacted
            .iter()
            .map(|k| k.resource.clone())
            .chain(roots)
            .collect();

        while let Some(resource) = queue.pop_front() {
            if !visited.insert(resource.clone()) {
                continue;
            }
            let Some(keys) = self.dependents.get(resource.as_str()) else {
                continue;
            };
            for key in keys {
                if impacted.insert(key.clone()) {
                    queue.push_back(key.resource.clone());
                }
            }
        }

        impacted
    }

    /// Number of entries with declared dependencies.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True when no entry declared a dependency.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
