use crate::{Content, ContentCache, ContentStore, Identifier, Result};
use async_trait::async_trait;
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

/// A process-local [`ContentStore`].
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    rows: Mutex<HashMap<Identifier, Content>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, content: &Content) -> Result<()> {
        self.rows
            .lock()
            .insert(content.identifier.clone(), content.clone());
        Ok(())
    }

    async fn get(&self, id: &Identifier) -> Result<Option<Content>> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn delete(&self, id: &Identifier) -> Result<bool> {
        Ok(self.rows.lock().remove(id).is_some())
    }
}

/// A process-local [`ContentCache`] with lazy expiry on the tokio clock.
#[derive(Debug, Default)]
pub struct MemoryContentCache {
    entries: Mutex<HashMap<Identifier, (String, Instant)>>,
}

impl MemoryContentCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentCache for MemoryContentCache {
    async fn get(&self, id: &Identifier) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some((body, expires_at)) if now < *expires_at => Ok(Some(body.clone())),
            Some(_) => {
                entries.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, id: &Identifier, body: &str, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.entries
            .lock()
            .insert(id.clone(), (body.to_owned(), Instant::now() + ttl));
        Ok(())
    }
}
