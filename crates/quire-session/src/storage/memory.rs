use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{StorageBackend, StorageResult};

/// Backend holding values in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    fn with_values<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut values)
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.with_values(|values| values.get(key).cloned()))
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        self.with_values(|values| values.insert(key.to_string(), value.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.with_values(|values| values.remove(key).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_reports_presence() -> StorageResult<()> {
        let backend = MemoryBackend::default();
        backend.write("k", "v")?;
        assert_eq!(backend.read("k")?.as_deref(), Some("v"));
        assert!(backend.delete("k")?);
        assert!(!backend.delete("k")?);
        assert_eq!(backend.read("k")?, None);
        Ok(())
    }
}
