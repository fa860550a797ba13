use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InsertError {
    #[error("key already present")]
    KeyAlreadyExists,
    #[error("alternative key already present")]
    AltKeyAlreadyExists,
}

/// Map whose entries are reachable through a primary and an alternative key.
///
/// Both keys are unique: an entry can only be inserted if neither key is taken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiKeyMap<K: Ord, AltK: Ord, V> {
    by_key: BTreeMap<K, (AltK, V)>,
    by_alt_key: BTreeMap<AltK, K>,
}

impl<K: Ord, AltK: Ord, V> Default for MultiKeyMap<K, AltK, V> {
    fn default() -> Self {
        Self {
            by_key: BTreeMap::new(),
            by_alt_key: BTreeMap::new(),
        }
    }
}

impl<K, AltK, V> MultiKeyMap<K, AltK, V>
where
    K: Ord + Clone,
    AltK: Ord + Clone,
{
    pub fn try_insert(&mut self, key: K, alt_key: AltK, value: V) -> Result<(), InsertError> {
        if self.by_key.contains_key(&key) {
            return Err(InsertError::KeyAlreadyExists);
        }
        if self.by_alt_key.contains_key(&alt_key) {
            return Err(InsertError::AltKeyAlreadyExists);
        }
        self.by_alt_key.insert(alt_key.clone(), key.clone());
        self.by_key.insert(key, (alt_key, value));
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.by_key.get(key).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.by_key.get_mut(key).map(|(_, value)| value)
    }

    pub fn get_alt(&self, alt_key: &AltK) -> Option<&V> {
        self.by_alt_key.get(alt_key).and_then(|key| self.get(key))
    }

    /// Alternative key and value stored under `key`.
    pub fn get_entry(&self, key: &K) -> Option<(&AltK, &V)> {
        self.by_key.get(key).map(|(alt_key, value)| (alt_key, value))
    }

    pub fn contains_alt(&self, alt_key: &AltK) -> bool {
        self.by_alt_key.contains_key(alt_key)
    }

    pub fn remove_entry(&mut self, key: &K) -> Option<(K, AltK, V)> {
        let (key, (alt_key, value)) = self.by_key.remove_entry(key)?;
        self.by_alt_key.remove(&alt_key);
        Some((key, alt_key, value))
    }

    pub fn remove_entry_alt(&mut self, alt_key: &AltK) -> Option<(K, AltK, V)> {
        let key = self.by_alt_key.get(alt_key)?.clone();
        self.remove_entry(&key)
    }

    /// Entries in ascending order of the primary key.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &AltK, &V)> {
        self.by_key
            .iter()
            .map(|(key, (alt_key, value))| (key, alt_key, value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.by_key.keys()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
