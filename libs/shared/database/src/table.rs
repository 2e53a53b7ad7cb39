use std::collections::HashSet;
use std::hash::Hash;

use crate::error::DatabaseError;

/// A named uniqueness constraint over keys derived from table rows.
#[derive(Debug)]
pub struct UniqueIndex<K> {
    constraint: &'static str,
    keys: HashSet<K>,
}

impl<K: Eq + Hash> UniqueIndex<K> {
    pub fn new(constraint: &'static str) -> Self {
        Self {
            constraint,
            keys: HashSet::new(),
        }
    }

    pub fn constraint(&self) -> &'static str {
        self.constraint
    }

    pub fn check(&self, key: &K) -> Result<(), DatabaseError> {
        if self.keys.contains(key) {
            return Err(DatabaseError::UniqueViolation {
                constraint: self.constraint.to_string(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, key: K) -> Result<(), DatabaseError> {
        self.check(&key)?;
        self.keys.insert(key);
        Ok(())
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.keys.remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
