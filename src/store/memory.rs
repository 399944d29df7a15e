//! In-memory store, for tests and single-process experiments.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{DeliveryRecord, DeliveryStore, RequestStore, Result, StreamStore};
use crate::stream::StreamLog;
use crate::types::{DeliveryId, RepoId, Request, RequestId, Sha};

#[derive(Debug, Default)]
pub struct MemoryStore {
    requests: Mutex<HashMap<RequestId, Request>>,
    deliveries: Mutex<HashMap<DeliveryId, DeliveryRecord>>,
    stream: Mutex<Option<StreamLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivery records held.
    pub fn delivery_count(&self) -> usize {
        lock(&self.deliveries).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl RequestStore for MemoryStore {
    fn get(&self, id: &RequestId) -> Result<Option<Request>> {
        Ok(lock(&self.requests).get(id).cloned())
    }

    fn put(&self, request: &Request) -> Result<()> {
        lock(&self.requests).insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Request>> {
        Ok(lock(&self.requests).values().cloned().collect())
    }

    fn find_candidates(
        &self,
        repo: &RepoId,
        _branch: Option<&str>,
        _head_sha: Option<&Sha>,
    ) -> Result<Vec<Request>> {
        Ok(lock(&self.requests)
            .values()
            .filter(|r| r.repo.as_ref().is_some_and(|own| own.matches(repo)))
            .cloned()
            .collect())
    }
}

impl DeliveryStore for MemoryStore {
    fn head(&self, id: &DeliveryId) -> Result<bool> {
        Ok(lock(&self.deliveries).contains_key(id))
    }

    fn put(&self, record: &DeliveryRecord) -> Result<()> {
        lock(&self.deliveries).insert(record.delivery_id.clone(), record.clone());
        Ok(())
    }
}

impl StreamStore for MemoryStore {
    fn load_stream(&self) -> Result<Option<StreamLog>> {
        Ok(lock(&self.stream).clone())
    }

    fn save_stream(&self, log: &StreamLog) -> Result<()> {
        *lock(&self.stream) = Some(log.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{at_minute, sample_request};

    #[test]
    fn request_put_then_get() {
        let store = MemoryStore::new();
        let request = sample_request("req1");
        RequestStore::put(&store, &request).unwrap();
        assert_eq!(store.get(&request.id).unwrap(), Some(request));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn delivery_head_after_put() {
        let store = MemoryStore::new();
        let id = DeliveryId::new("d1");
        assert!(!store.head(&id).unwrap());
        DeliveryStore::put(
            &store,
            &DeliveryRecord {
                delivery_id: id.clone(),
                request_id: RequestId::new("req1"),
                processed_at: at_minute(0),
            },
        )
        .unwrap();
        assert!(store.head(&id).unwrap());
        assert_eq!(store.delivery_count(), 1);
    }
}
