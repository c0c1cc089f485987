//! `database` record access
//!
//! Generic reads and writes against the owner-scoped record store, exposed
//! to flow authors without custom code. String values in `data` and
//! `filter` are rendered against the variable view before hitting the
//! store, so filters like `{"userId": "{userId}"}` work as expected.

use async_trait::async_trait;
use colloquy_core::domain::flow::NodeId;
use colloquy_core::{
    EngineError, NodeContext, NodeHandler, NodeOutcome, Trigger, VarScope, VariablesPatch,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::render_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DatabaseOperation {
    Insert,
    Get,
    Find,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseConfig {
    operation: DatabaseOperation,
    collection: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    filter: Option<Value>,
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    result_variable: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    next_node_id: String,
}

fn rendered_object(
    ctx: &NodeContext,
    value: Option<&Value>,
    field: &str,
) -> Result<Map<String, Value>, EngineError> {
    match value.map(|v| render_value(ctx, v)) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(EngineError::InvalidConfiguration(format!(
            "database node field '{}' must be an object",
            field
        ))),
        None => Err(EngineError::InvalidConfiguration(format!(
            "database node operation requires '{}'",
            field
        ))),
    }
}

/// Insert, fetch, query, update or delete flow-managed records.
#[derive(Debug, Default)]
pub struct DatabaseHandler;

#[async_trait]
impl NodeHandler for DatabaseHandler {
    fn kind(&self) -> &str {
        "database"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: DatabaseConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("database node: {}", e)))?;

        let records = ctx.records();
        let owner = &ctx.owner_id;

        let result = match config.operation {
            DatabaseOperation::Insert => {
                let data = config.data.as_ref().ok_or_else(|| {
                    EngineError::InvalidConfiguration(
                        "database node operation requires 'data'".to_string(),
                    )
                })?;
                let record = records
                    .insert(owner, &config.collection, render_value(ctx, data))
                    .await?;
                serde_json::to_value(record)?
            }
            DatabaseOperation::Get => {
                let record_id = config.record_id.as_ref().ok_or_else(|| {
                    EngineError::InvalidConfiguration(
                        "database node operation requires 'recordId'".to_string(),
                    )
                })?;
                let record = records
                    .get(owner, &config.collection, &ctx.render(record_id))
                    .await?;
                record.map(serde_json::to_value).transpose()?.unwrap_or(Value::Null)
            }
            DatabaseOperation::Find => {
                let filter = match config.filter.as_ref() {
                    Some(value) => rendered_object(ctx, Some(value), "filter")?,
                    None => Map::new(),
                };
                let found = records
                    .find(owner, &config.collection, &filter, config.limit)
                    .await?;
                serde_json::to_value(found)?
            }
            DatabaseOperation::Update => {
                let filter = rendered_object(ctx, config.filter.as_ref(), "filter")?;
                let patch = rendered_object(ctx, config.data.as_ref(), "data")?;
                let updated = records
                    .update_matching(owner, &config.collection, &filter, &patch)
                    .await?;
                json!({ "updated": updated })
            }
            DatabaseOperation::Delete => {
                let filter = rendered_object(ctx, config.filter.as_ref(), "filter")?;
                let deleted = records
                    .delete_matching(owner, &config.collection, &filter)
                    .await?;
                json!({ "deleted": deleted })
            }
        };

        let mut outcome = NodeOutcome::goto(NodeId(config.next_node_id));
        if let Some(variable) = config.result_variable {
            outcome =
                outcome.with_patch(VariablesPatch::new().set(VarScope::Session, variable, result));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit;
    use colloquy_core::domain::repository::memory::MemoryRecordStore;
    use colloquy_core::domain::repository::RecordStore;
    use colloquy_core::VarOp;
    use std::sync::Arc;

    fn stored_value(outcome: &NodeOutcome) -> &Value {
        match outcome.patch.iter().next() {
            Some(VarOp::Set { value, .. }) => value,
            other => panic!("expected a set op, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn insert_renders_data_and_returns_the_record() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut ctx = testkit::context_with_records(store.clone());
        ctx.session.variables.set("name", json!("Ada"));

        let outcome = DatabaseHandler
            .execute(
                &ctx,
                &json!({
                    "operation": "insert",
                    "collection": "guests",
                    "data": {"name": "{name}", "seats": 2},
                    "resultVariable": "guest",
                    "nextNodeId": "next"
                }),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        let record = stored_value(&outcome);
        assert_eq!(record["data"], json!({"name": "Ada", "seats": 2}));
        assert!(record["id"].is_string());

        let kept = store
            .find(&ctx.owner_id, "guests", &Map::new(), None)
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn find_filters_and_limits() {
        let store = Arc::new(MemoryRecordStore::new());
        let ctx = testkit::context_with_records(store.clone());
        for city in ["paris", "paris", "lyon"] {
            store
                .insert(&ctx.owner_id, "stops", json!({"city": city}))
                .await
                .unwrap();
        }

        let outcome = DatabaseHandler
            .execute(
                &ctx,
                &json!({
                    "operation": "find",
                    "collection": "stops",
                    "filter": {"city": "paris"},
                    "limit": 1,
                    "resultVariable": "stops",
                    "nextNodeId": "next"
                }),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        let found = stored_value(&outcome).as_array().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["data"]["city"], json!("paris"));
    }

    #[tokio::test]
    async fn update_and_delete_report_counts() {
        let store = Arc::new(MemoryRecordStore::new());
        let ctx = testkit::context_with_records(store.clone());
        store
            .insert(&ctx.owner_id, "orders", json!({"state": "open"}))
            .await
            .unwrap();

        let outcome = DatabaseHandler
            .execute(
                &ctx,
                &json!({
                    "operation": "update",
                    "collection": "orders",
                    "filter": {"state": "open"},
                    "data": {"state": "closed"},
                    "resultVariable": "result",
                    "nextNodeId": "next"
                }),
                &testkit::message("hi"),
            )
            .await
            .unwrap();
        assert_eq!(stored_value(&outcome), &json!({"updated": 1}));

        let outcome = DatabaseHandler
            .execute(
                &ctx,
                &json!({
                    "operation": "delete",
                    "collection": "orders",
                    "filter": {"state": "closed"},
                    "resultVariable": "result",
                    "nextNodeId": "next"
                }),
                &testkit::message("hi"),
            )
            .await
            .unwrap();
        assert_eq!(stored_value(&outcome), &json!({"deleted": 1}));
    }

    #[tokio::test]
    async fn get_returns_null_for_unknown_records() {
        let ctx = testkit::context();
        let outcome = DatabaseHandler
            .execute(
                &ctx,
                &json!({
                    "operation": "get",
                    "collection": "guests",
                    "recordId": "nope",
                    "resultVariable": "guest",
                    "nextNodeId": "next"
                }),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert_eq!(stored_value(&outcome), &Value::Null);
    }

    #[tokio::test]
    async fn insert_without_data_is_invalid() {
        let ctx = testkit::context();
        let err = DatabaseHandler
            .execute(
                &ctx,
                &json!({"operation": "insert", "collection": "guests", "nextNodeId": "next"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }
}
