//! Goal tracking tools.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use soulkun_shared::{
    HandlerError, HandlerReply, ParamKind, ParamSpec, RiskLevel, Scope, ToolSpec,
};

use crate::storage::Storage;

use super::{ToolCatalog, ToolHandler};

pub fn register(catalog: &mut ToolCatalog, storage: Arc<dyn Storage>) {
    catalog.register(
        ToolSpec {
            name: "create_goal".to_string(),
            description: "新しいゴールを登録する".to_string(),
            risk: RiskLevel::Medium,
            params: vec![
                ParamSpec::required("title", ParamKind::String, "ゴールの内容"),
                ParamSpec::optional("due", ParamKind::String, "期限 (RFC3339)"),
            ],
        },
        Arc::new(CreateGoal {
            storage: Arc::clone(&storage),
        }),
    );
    catalog.register(
        ToolSpec {
            name: "list_goals".to_string(),
            description: "登録済みゴールの一覧を出す".to_string(),
            risk: RiskLevel::ReadOnly,
            params: vec![],
        },
        Arc::new(ListGoals {
            storage: Arc::clone(&storage),
        }),
    );
    catalog.register(
        ToolSpec {
            name: "update_goal_progress".to_string(),
            description: "ゴールの進捗率を更新する".to_string(),
            risk: RiskLevel::Low,
            params: vec![
                ParamSpec::required("goal_id", ParamKind::Integer, "ゴール番号"),
                ParamSpec::required("progress_pct", ParamKind::Integer, "進捗率 0-100"),
            ],
        },
        Arc::new(UpdateGoalProgress {
            storage: Arc::clone(&storage),
        }),
    );
    catalog.register(
        ToolSpec {
            name: "delete_goal".to_string(),
            description: "ゴールを削除する".to_string(),
            risk: RiskLevel::High,
            params: vec![ParamSpec::required(
                "goal_id",
                ParamKind::Integer,
                "ゴール番号",
            )],
        },
        Arc::new(DeleteGoal { storage }),
    );
}

fn parse_due(params: &serde_json::Value) -> Result<Option<DateTime<Utc>>, HandlerError> {
    match params.get("due").and_then(|d| d.as_str()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| HandlerError::Invalid(format!("due is not RFC3339: {raw}"))),
    }
}

fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerError> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerError::Invalid(format!("{key} missing or not an integer")))
}

struct CreateGoal {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for CreateGoal {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let title = params
            .get("title")
            .and_then(|t| t.as_str())
            .ok_or_else(|| HandlerError::Invalid("title missing".to_string()))?;
        let due = parse_due(params)?;
        let id = self
            .storage
            .create_goal(scope, title, due)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        Ok(HandlerReply::new(
            format!("ゴール「{}」を登録しました (#{})", title, id),
            json!({"goal_id": id}),
        ))
    }
}

struct ListGoals {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for ListGoals {
    async fn call(
        &self,
        _params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let goals = self
            .storage
            .list_goals(scope, 50)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        if goals.is_empty() {
            return Ok(HandlerReply::new(
                "登録されているゴールはまだありません。",
                json!({"goals": []}),
            ));
        }
        let lines: Vec<String> = goals
            .iter()
            .map(|g| format!("#{} {} ({}%)", g.id, g.title, g.progress_pct))
            .collect();
        Ok(HandlerReply::new(
            format!("いまのゴールはこちらです:\n{}", lines.join("\n")),
            serde_json::to_value(&goals).unwrap_or(json!({})),
        ))
    }
}

struct UpdateGoalProgress {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for UpdateGoalProgress {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let goal_id = required_i64(params, "goal_id")?;
        let pct = required_i64(params, "progress_pct")?;
        if !(0..=100).contains(&pct) {
            return Err(HandlerError::Invalid(format!(
                "progress_pct out of range: {pct}"
            )));
        }
        let updated = self
            .storage
            .update_goal_progress(scope, goal_id, pct as u8)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        if !updated {
            return Err(HandlerError::NotFound(format!("goal {goal_id}")));
        }
        Ok(HandlerReply::new(
            format!("ゴール#{}の進捗を{}%に更新しました", goal_id, pct),
            json!({"goal_id": goal_id, "progress_pct": pct}),
        ))
    }
}

struct DeleteGoal {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for DeleteGoal {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let goal_id = required_i64(params, "goal_id")?;
        let deleted = self
            .storage
            .delete_goal(scope, goal_id)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        if !deleted {
            return Err(HandlerError::NotFound(format!("goal {goal_id}")));
        }
        Ok(HandlerReply::new(
            format!("ゴール#{}を削除しました", goal_id),
            json!({"goal_id": goal_id}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use crate::tools::default_catalog;

    fn scope() -> Scope {
        Scope::new("org-1", "room-1", "user-1")
    }

    #[tokio::test]
    async fn test_create_then_list_goals() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let catalog = default_catalog(Arc::clone(&storage));

        let create = catalog.handler("create_goal").unwrap();
        let reply = create
            .call(&json!({"title": "新規顧客10社"}), &scope())
            .await
            .unwrap();
        assert!(reply.message.contains("新規顧客10社"));

        let list = catalog.handler("list_goals").unwrap();
        let reply = list.call(&json!({}), &scope()).await.unwrap();
        assert!(reply.message.contains("新規顧客10社"));
    }

    #[tokio::test]
    async fn test_delete_missing_goal_is_not_found() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let catalog = default_catalog(storage);
        let delete = catalog.handler("delete_goal").unwrap();
        let err = delete.call(&json!({"goal_id": 99}), &scope()).await.unwrap_err();
        assert!(matches!(err, HandlerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_progress_out_of_range_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let catalog = default_catalog(storage);
        let update = catalog.handler("update_goal_progress").unwrap();
        let err = update
            .call(&json!({"goal_id": 1, "progress_pct": 140}), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(_)));
    }
}
