use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::{StoreError, VariableStore};

/// Process-local [`VariableStore`] keyed by `graph/execution` namespaces.
#[derive(Default)]
pub struct InMemoryVariableStore {
    namespaces: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(graph_id: &str, execution_id: &str) -> String {
        format!("{graph_id}/{execution_id}")
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn get_run_var(
        &self,
        graph_id: &str,
        execution_id: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(&Self::namespace(graph_id, execution_id))
            .and_then(|vars| vars.get(key).cloned()))
    }

    async fn set_run_var(
        &self,
        graph_id: &str,
        execution_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(Self::namespace(graph_id, execution_id))
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn clear_run_vars(
        &self,
        graph_id: &str,
        execution_id: &str,
    ) -> Result<usize, StoreError> {
        let mut namespaces = self.namespaces.write();
        let removed = namespaces
            .remove(&Self::namespace(graph_id, execution_id))
            .map(|vars| vars.len())
            .unwrap_or(0);
        Ok(removed)
    }

    async fn clear_agent_vars(&self, graph_id: &str, agent_id: &str) -> Result<usize, StoreError> {
        // One agent owns one graph instance, so agent scope covers every
        // namespace under the graph prefix (run-scoped leftovers included).
        let prefix = format!("{graph_id}/");
        let mut namespaces = self.namespaces.write();
        let doomed: Vec<String> = namespaces
            .keys()
            .filter(|ns| ns.starts_with(&prefix))
            .cloned()
            .collect();
        let mut removed = 0;
        for ns in doomed {
            if let Some(vars) = namespaces.remove(&ns) {
                removed += vars.len();
            }
        }
        debug!(graph_id, agent_id, removed, "cleared agent variables");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_var_roundtrip_and_isolation() {
        let store = InMemoryVariableStore::new();
        store
            .set_run_var("wf", "exec-1", "k", json!(1))
            .await
            .unwrap();
        store
            .set_run_var("wf", "exec-2", "k", json!(2))
            .await
            .unwrap();

        assert_eq!(
            store.get_run_var("wf", "exec-1", "k").await.unwrap(),
            Some(json!(1))
        );
        assert_eq!(
            store.get_run_var("wf", "exec-2", "k").await.unwrap(),
            Some(json!(2))
        );
        assert_eq!(store.get_run_var("wf", "exec-1", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_run_vars_scoped_to_execution() {
        let store = InMemoryVariableStore::new();
        store
            .set_run_var("wf", "exec-1", "a", json!(1))
            .await
            .unwrap();
        store
            .set_run_var("wf", "exec-1", "b", json!(2))
            .await
            .unwrap();
        store
            .set_run_var("wf", "exec-2", "a", json!(3))
            .await
            .unwrap();

        assert_eq!(store.clear_run_vars("wf", "exec-1").await.unwrap(), 2);
        assert_eq!(store.get_run_var("wf", "exec-1", "a").await.unwrap(), None);
        assert_eq!(
            store.get_run_var("wf", "exec-2", "a").await.unwrap(),
            Some(json!(3))
        );
    }

    #[tokio::test]
    async fn test_clear_agent_vars_drops_graph_prefix() {
        let store = InMemoryVariableStore::new();
        store
            .set_run_var("wf", "exec-1", "a", json!(1))
            .await
            .unwrap();
        store
            .set_run_var("wf", "exec-2", "b", json!(2))
            .await
            .unwrap();
        store
            .set_run_var("other", "exec-9", "c", json!(3))
            .await
            .unwrap();

        assert_eq!(store.clear_agent_vars("wf", "agent-1").await.unwrap(), 2);
        assert_eq!(store.get_run_var("wf", "exec-1", "a").await.unwrap(), None);
        assert_eq!(
            store.get_run_var("other", "exec-9", "c").await.unwrap(),
            Some(json!(3))
        );
    }
}
