//! Task management and reminder tools.

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
            name: "create_task".to_string(),
            description: "タスクを登録する".to_string(),
            risk: RiskLevel::Low,
            params: vec![
                ParamSpec::required("title", ParamKind::String, "タスクの内容"),
                ParamSpec::optional("due", ParamKind::String, "期限 (RFC3339)"),
            ],
        },
        Arc::new(CreateTask {
            storage: Arc::clone(&storage),
        }),
    );
    catalog.register(
        ToolSpec {
            name: "complete_task".to_string(),
            description: "タスクを完了にする".to_string(),
            risk: RiskLevel::Low,
            params: vec![ParamSpec::required(
                "task_id",
                ParamKind::Integer,
                "タスク番号",
            )],
        },
        Arc::new(CompleteTask {
            storage: Arc::clone(&storage),
        }),
    );
    catalog.register(
        ToolSpec {
            name: "list_tasks".to_string(),
            description: "タスク一覧を出す".to_string(),
            risk: RiskLevel::ReadOnly,
            params: vec![],
        },
        Arc::new(ListTasks {
            storage: Arc::clone(&storage),
        }),
    );
    catalog.register(
        ToolSpec {
            name: "set_reminder".to_string(),
            description: "指定時刻のリマインダーを設定する".to_string(),
            risk: RiskLevel::Low,
            params: vec![
                ParamSpec::required("text", ParamKind::String, "リマインド内容"),
                ParamSpec::required("at", ParamKind::String, "通知時刻 (RFC3339)"),
            ],
        },
        Arc::new(SetReminder { storage }),
    );
}

fn required_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, HandlerError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerError::Invalid(format!("{key} missing")))
}

struct CreateTask {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for CreateTask {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let title = required_str(params, "title")?;
        let due = match params.get("due").and_then(|d| d.as_str()) {
            None => None,
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| HandlerError::Invalid(format!("due is not RFC3339: {raw}")))?,
            ),
        };
        let id = self
            .storage
            .create_task(scope, title, due)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        Ok(HandlerReply::new(
            format!("タスク「{}」を登録しました (#{})", title, id),
            json!({"task_id": id}),
        ))
    }
}

struct CompleteTask {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for CompleteTask {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let task_id = params
            .get("task_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerError::Invalid("task_id missing".to_string()))?;
        let updated = self
            .storage
            .complete_task(scope, task_id)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        if !updated {
            return Err(HandlerError::NotFound(format!("open task {task_id}")));
        }
        Ok(HandlerReply::new(
            format!("タスク#{}を完了にしました。おつかれさま!", task_id),
            json!({"task_id": task_id}),
        ))
    }
}

struct ListTasks {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for ListTasks {
    async fn call(
        &self,
        _params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let tasks = self
            .storage
            .list_tasks(scope, 50)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        if tasks.is_empty() {
            return Ok(HandlerReply::new(
                "タスクはすべて片付いています。",
                json!({"tasks": []}),
            ));
        }
        let lines: Vec<String> = tasks
            .iter()
            .map(|t| {
                format!(
                    "#{} {} {}",
                    t.id,
                    t.title,
                    if t.done { "[完了]" } else { "" }
                )
            })
            .collect();
        Ok(HandlerReply::new(
            format!("いまのタスクはこちらです:\n{}", lines.join("\n")),
            serde_json::to_value(&tasks).unwrap_or(json!({})),
        ))
    }
}

struct SetReminder {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for SetReminder {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let text = required_str(params, "text")?;
        let at_raw = required_str(params, "at")?;
        let at = DateTime::parse_from_rfc3339(at_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| HandlerError::Invalid(format!("at is not RFC3339: {at_raw}")))?;
        if at < Utc::now() {
            return Err(HandlerError::Invalid("reminder time is in the past".to_string()));
        }
        let id = self
            .storage
            .add_reminder(scope, text, at)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        Ok(HandlerReply::new(
            format!("{}に「{}」をお知らせします", at.format("%m/%d %H:%M"), text),
            json!({"reminder_id": id}),
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
    async fn test_task_lifecycle() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let catalog = default_catalog(Arc::clone(&storage));

        let create = catalog.handler("create_task").unwrap();
        let reply = create
            .call(&json!({"title": "請求書を送る"}), &scope())
            .await
            .unwrap();
        let task_id = reply.data["task_id"].as_i64().unwrap();

        let complete = catalog.handler("complete_task").unwrap();
        complete
            .call(&json!({"task_id": task_id}), &scope())
            .await
            .unwrap();

        // Completing again fails: the task is no longer open.
        let err = complete
            .call(&json!({"task_id": task_id}), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reminder_in_past_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let catalog = default_catalog(storage);
        let set = catalog.handler("set_reminder").unwrap();
        let err = set
            .call(
                &json!({"text": "朝会", "at": "2020-01-01T09:00:00+09:00"}),
                &scope(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(_)));
    }
}
