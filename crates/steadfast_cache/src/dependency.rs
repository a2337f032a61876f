// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::pattern::KeyPattern;

/// Edges from tags to the keys that depend on them.
///
/// A key may itself be used as a tag, which makes invalidation transitive: removing a key
/// also removes everything tagged with it.
#[derive(Debug, Clone, Default)]
pub(crate) struct DependencyGraph {
    dependents: HashMap<String, HashSet<String>>,
    tags_of: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Replaces the recorded tags of `key`.
    pub fn record(&mut self, key: &str, tags: &[String]) {
        self.forget(key);

        if tags.is_empty() {
            return;
        }

        for tag in tags {
            self.dependents.entry(tag.clone()).or_default().insert(key.to_owned());
        }
        self.tags_of.insert(key.to_owned(), tags.to_vec());
    }

    /// Drops the outgoing edges of `key`. Keys depending on `key` keep their edges.
    pub fn forget(&mut self, key: &str) {
        let Some(tags) = self.tags_of.remove(key) else {
            return;
        };

        for tag in tags {
            if let Some(keys) = self.dependents.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.dependents.remove(&tag);
                }
            }
        }
    }

    /// Number of keys with recorded tags.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tags_of.len()
    }

    pub fn clear(&mut self) {
        self.dependents.clear();
        self.tags_of.clear();
    }

    /// Expands `seeds` with keys tagged by anything matching `pattern`, then with the
    /// transitive dependents of every key found.
    pub fn closure(&self, seeds: HashSet<String>, pattern: &KeyPattern) -> HashSet<String> {
        let mut found = seeds;

        for (tag, keys) in &self.dependents {
            if pattern.matches(tag) {
                found.extend(keys.iter().cloned());
            }
        }

        let mut queue: VecDeque<String> = found.iter().cloned().collect();
        while let Some(key) = queue.pop_front() {
            let Some(keys) = self.dependents.get(&key) else {
                continue;
            };

            for dependent in keys {
                if found.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn closure_follows_tags_and_keys_transitively() {
        let mut graph = DependencyGraph::default();
        graph.record("positions:7", &tags(&["portfolio:7"]));
        graph.record("exposure:7", &tags(&["positions:7"]));
        graph.record("report:7", &tags(&["exposure:7"]));
        graph.record("positions:8", &tags(&["portfolio:8"]));

        let found = graph.closure(HashSet::new(), &KeyPattern::exact("portfolio:7"));

        assert_eq!(found, set(&["positions:7", "exposure:7", "report:7"]));
    }

    #[test]
    fn closure_without_edges_returns_seeds() {
        let graph = DependencyGraph::default();

        let found = graph.closure(set(&["a"]), &KeyPattern::exact("a"));

        assert_eq!(found, set(&["a"]));
    }

    #[test]
    fn closure_terminates_on_cycles() {
        let mut graph = DependencyGraph::default();
        graph.record("a", &tags(&["b"]));
        graph.record("b", &tags(&["a"]));

        let found = graph.closure(set(&["a"]), &KeyPattern::exact("a"));

        assert_eq!(found, set(&["a", "b"]));
    }

    #[test]
    fn glob_matches_tags() {
        let mut graph = DependencyGraph::default();
        graph.record("x", &tags(&["tenant:1:prices"]));
        graph.record("y", &tags(&["tenant:2:prices"]));
        graph.record("z", &tags(&["tenant:2:limits"]));

        let found = graph.closure(HashSet::new(), &KeyPattern::parse("tenant:*:prices").unwrap());

        assert_eq!(found, set(&["x", "y"]));
    }

    #[test]
    fn record_replaces_previous_tags() {
        let mut graph = DependencyGraph::default();
        graph.record("k", &tags(&["old"]));
        graph.record("k", &tags(&["new"]));

        assert!(graph.closure(HashSet::new(), &KeyPattern::exact("old")).is_empty());
        assert_eq!(graph.closure(HashSet::new(), &KeyPattern::exact("new")), set(&["k"]));
    }

    #[test]
    fn forget_and_clear_drop_edges() {
        let mut graph = DependencyGraph::default();
        graph.record("k", &tags(&["t"]));
        graph.record("j", &tags(&["t"]));

        graph.forget("k");
        assert_eq!(graph.closure(HashSet::new(), &KeyPattern::exact("t")), set(&["j"]));

        graph.clear();
        assert!(graph.closure(HashSet::new(), &KeyPattern::exact("t")).is_empty());
    }
}
