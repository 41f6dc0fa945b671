//! In-memory doubles shared by the unit tests

use async_trait::async_trait;
use querydesk_core::{
    Error, Query, QueryChanges, QueryId, QueryStore, QueryStoreResolver, Result,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MemoryQueryStore {
    queries: Mutex<HashMap<QueryId, Query>>,
    pub updates: Mutex<Vec<QueryChanges>>,
}

impl MemoryQueryStore {
    pub fn with(queries: Vec<Query>) -> Arc<Self> {
        Arc::new(Self {
            queries: Mutex::new(queries.into_iter().map(|q| (q.id, q)).collect()),
            updates: Mutex::new(Vec::new()),
        })
    }

    pub fn stored(&self, id: i64) -> Query {
        self.queries.lock().unwrap()[&QueryId::new(id)].clone()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryStore for MemoryQueryStore {
    async fn get_query(&self, id: QueryId) -> Result<Query> {
        self.queries
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(Error::QueryNotFound(id))
    }

    async fn update_query(&self, query: &mut Query, changes: QueryChanges) -> Result<()> {
        let mut queries = self.queries.lock().unwrap();
        let stored = queries
            .get_mut(&query.id)
            .ok_or(Error::QueryNotFound(query.id))?;
        changes.apply_to(stored);
        changes.apply_to(query);
        self.updates.lock().unwrap().push(changes);
        Ok(())
    }
}

pub struct SingleStoreResolver(pub Arc<MemoryQueryStore>);

impl QueryStoreResolver for SingleStoreResolver {
    fn resolve(&self, _store_key: Option<&str>) -> Result<Arc<dyn QueryStore>> {
        Ok(self.0.clone())
    }
}
