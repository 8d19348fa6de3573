//! Resolution context.
//!
//! A context is the set of runtime facts (farm, colo, cluster, user, ...)
//! scoped overrides are matched against. Its canonical id is the sorted
//! concatenation of every key followed by its value, so two contexts holding
//! the same pairs share cached configuration objects.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// String key/value pairs describing where a lookup happens.
#[derive(Debug, Clone, Default)]
pub struct ConfigContext {
    entries: BTreeMap<String, String>,
    unique_id: OnceLock<String>,
}

impl ConfigContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style `put`
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.put(key, value);
        self
    }

    /// Set `key`, replacing any previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
        self.unique_id = OnceLock::new();
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.unique_id = OnceLock::new();
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical id over every key; computed once per mutation.
    pub fn unique_id(&self) -> &str {
        self.unique_id
            .get_or_init(|| Self::concat(self.entries.iter()))
    }

    /// Canonical id restricted to `keys`. Keys absent from the context do not
    /// contribute.
    pub fn unique_id_for<'a, I>(&self, keys: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut selected: Vec<(&String, &String)> = keys
            .into_iter()
            .filter_map(|k| self.entries.get_key_value(k))
            .collect();
        selected.sort();
        selected.dedup();
        Self::concat(selected.into_iter())
    }

    fn concat<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> String {
        pairs.fold(String::new(), |mut id, (k, v)| {
            id.push_str(k);
            id.push_str(v);
            id
        })
    }
}

impl PartialEq for ConfigContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for ConfigContext {}

impl Hash for ConfigContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entries.hash(state);
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for ConfigContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut ctx = ConfigContext::new();
        for (k, v) in iter {
            ctx.put(k, v);
        }
        ctx
    }
}

impl fmt::Display for ConfigContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id_is_insertion_order_independent() {
        let a = ConfigContext::new().with("FARM", 1).with("COLO", 323);
        let b = ConfigContext::new().with("COLO", 323).with("FARM", 1);
        assert_eq!(a.unique_id(), "COLO323FARM1");
        assert_eq!(a.unique_id(), b.unique_id());
        assert_eq!(a, b);
    }

    #[test]
    fn test_put_invalidates_cached_id() {
        let mut ctx = ConfigContext::new().with("COLO", "323");
        assert_eq!(ctx.unique_id(), "COLO323");
        ctx.put("COLO", "999");
        assert_eq!(ctx.unique_id(), "COLO999");
        ctx.put("USER", "bob");
        assert_eq!(ctx.unique_id(), "COLO999USERbob");
        ctx.remove("COLO");
        assert_eq!(ctx.unique_id(), "USERbob");
    }

    #[test]
    fn test_restricted_id() {
        let ctx: ConfigContext = [("FARM", "7"), ("COLO", "323"), ("USER", "bob")]
            .into_iter()
            .collect();
        assert_eq!(ctx.unique_id_for(["USER", "COLO"]), "COLO323USERbob");
        assert_eq!(ctx.unique_id_for(["COLO", "MISSING"]), "COLO323");
        assert_eq!(ctx.unique_id_for(["COLO", "COLO"]), "COLO323");
        assert_eq!(ctx.unique_id_for(std::iter::empty()), "");
    }

    #[test]
    fn test_display() {
        let ctx = ConfigContext::new().with("TLD", "com").with("COLO", 1);
        assert_eq!(ctx.to_string(), "{COLO=1, TLD=com}");
        assert_eq!(ConfigContext::new().to_string(), "{}");
    }
}
