use crate::{
    memory::grow_capacity,
    objects::object_string::ObjectString,
    value::{is_nil, make_bool_value, make_nil_value, Value},
};

/// Open-addressing hash table keyed by interned-string identity. Globals,
/// instance fields, class method tables and the intern table all share it.
///
/// Capacity is a power of two, probing is linear, and deleted slots become
/// tombstones (null key, `true` value) so probe chains stay intact.
/// Tombstones count toward the 0.75 load ceiling.
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

#[derive(Clone, Copy)]
struct Entry {
    key: *mut ObjectString,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            key: std::ptr::null_mut(),
            value: make_nil_value(),
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_null() && !is_nil(&self.value)
    }
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Live entries (tombstones excluded).
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.key.is_null()).count()
    }

    /// Bytes held by the entry array, for GC accounting.
    pub fn entry_bytes(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    /// The slot for `key`: its current entry, or the insertion target (the
    /// first tombstone on the probe chain if the search ends at an empty
    /// slot).
    fn find_entry(entries: &[Entry], key: *mut ObjectString) -> usize {
        let capacity = entries.len();
        let mut index = unsafe { (*key).hash } as usize & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if entry.key.is_null() {
                if !entry.is_tombstone() {
                    return tombstone.unwrap_or(index);
                }
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if std::ptr::eq(entry.key, key) {
                return index;
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::empty(); capacity];
        self.count = 0;
        for entry in &self.entries {
            if entry.key.is_null() {
                continue;
            }
            let index = Self::find_entry(&entries, entry.key);
            entries[index] = *entry;
            self.count += 1;
        }
        self.entries = entries;
    }

    /// Insert or update. Returns true when the key was not present before.
    pub fn set(&mut self, key: *mut ObjectString, value: Value) -> bool {
        if (self.count + 1) * 4 > self.capacity() * 3 {
            let capacity = grow_capacity!(self.capacity());
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_null();
        // A reused tombstone was already counted toward the load factor.
        if is_new && is_nil(&entry.value) {
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new
    }

    pub fn get(&self, key: *mut ObjectString) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key);
        let entry = &self.entries[index];
        if entry.key.is_null() {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Remove a key, leaving a tombstone so later probes keep walking.
    pub fn delete(&mut self, key: *mut ObjectString) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }
        entry.key = std::ptr::null_mut();
        entry.value = make_bool_value(true);
        true
    }

    /// Copy every live entry of `from` into this table (inheritance).
    pub fn add_all(&mut self, from: &Table) {
        for (key, value) in from.iter() {
            self.set(key, value);
        }
    }

    /// Content-based lookup used by string interning; the only place the
    /// table compares actual characters instead of identities.
    pub fn find_string(&self, content: &str, hash: u32) -> Option<*mut ObjectString> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.capacity();
        let mut index = hash as usize & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                if !entry.is_tombstone() {
                    return None;
                }
            } else {
                let key = unsafe { &*entry.key };
                if key.hash == hash && key.content == content {
                    return Some(entry.key);
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Drop every entry whose key is unmarked. Runs between mark and sweep
    /// so the intern table's keys stay weak.
    pub fn remove_white(&mut self) {
        for entry in &mut self.entries {
            if entry.key.is_null() {
                continue;
            }
            if unsafe { !(*entry.key).object.is_marked } {
                entry.key = std::ptr::null_mut();
                entry.value = make_bool_value(true);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjectString, Value)> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.key.is_null())
            .map(|entry| (entry.key, entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_manager::ObjectManager;
    use crate::objects::object_string::hash_string;
    use crate::value::{as_number, make_number_value};

    fn make_key(
        manager: &mut ObjectManager,
        interned: &mut Table,
        name: &str,
    ) -> *mut ObjectString {
        manager.copy_string(interned, name)
    }

    #[test]
    fn test_set_get_update() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let mut table = Table::new();
        let key = make_key(&mut manager, &mut interned, "answer");

        assert!(table.set(key, make_number_value(1.0)));
        assert!(!table.set(key, make_number_value(42.0)));
        let value = table.get(key).unwrap();
        assert_eq!(as_number(&value), 42.0);
    }

    #[test]
    fn test_get_missing_is_none() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let table = Table::new();
        let key = make_key(&mut manager, &mut interned, "ghost");
        assert!(table.get(key).is_none());
    }

    #[test]
    fn test_delete_leaves_probe_chain_intact() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let mut table = Table::new();

        let keys: Vec<_> = (0..12)
            .map(|i| make_key(&mut manager, &mut interned, &format!("key{}", i)))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            table.set(*key, make_number_value(i as f64));
        }

        assert!(table.delete(keys[3]));
        assert!(!table.delete(keys[3]));
        assert!(table.get(keys[3]).is_none());

        // Every other key must still be reachable through any tombstone.
        for (i, key) in keys.iter().enumerate() {
            if i == 3 {
                continue;
            }
            assert_eq!(as_number(&table.get(*key).unwrap()), i as f64);
        }
        assert_eq!(table.len(), 11);
    }

    #[test]
    fn test_resize_drops_tombstones() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let mut table = Table::new();

        let keys: Vec<_> = (0..40)
            .map(|i| make_key(&mut manager, &mut interned, &format!("entry{}", i)))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            table.set(*key, make_number_value(i as f64));
            if i % 2 == 0 {
                table.delete(*key);
            }
        }

        for (i, key) in keys.iter().enumerate() {
            if i % 2 == 0 {
                assert!(table.get(*key).is_none());
            } else {
                assert_eq!(as_number(&table.get(*key).unwrap()), i as f64);
            }
        }
        assert_eq!(table.len(), 20);
    }

    #[test]
    fn test_find_string_matches_content() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let key = make_key(&mut manager, &mut interned, "needle");

        let hash = hash_string(b"needle");
        let found = interned.find_string("needle", hash).unwrap();
        assert!(std::ptr::eq(found, key));
        assert!(interned.find_string("missing", hash_string(b"missing")).is_none());
    }

    #[test]
    fn test_remove_white_prunes_unmarked_keys() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let keep = make_key(&mut manager, &mut interned, "keep");
        make_key(&mut manager, &mut interned, "drop");

        unsafe {
            (*keep).object.is_marked = true;
        }
        interned.remove_white();
        assert_eq!(interned.len(), 1);
        let hash = unsafe { (*keep).hash };
        assert!(interned.find_string("keep", hash).is_some());
        unsafe {
            (*keep).object.is_marked = false;
        }
    }
}
