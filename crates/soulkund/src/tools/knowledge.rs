//! Knowledge search and teaching tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use soulkun_shared::{
    HandlerError, HandlerReply, ParamKind, ParamSpec, RiskLevel, Scope, ToolSpec,
};

use crate::storage::Storage;

use super::{ToolCatalog, ToolHandler};

pub fn register(catalog: &mut ToolCatalog, storage: Arc<dyn Storage>) {
    catalog.register(
        ToolSpec {
            name: "search_knowledge".to_string(),
            description: "教わったルールや知識を検索する".to_string(),
            risk: RiskLevel::ReadOnly,
            params: vec![ParamSpec::required(
                "query",
                ParamKind::String,
                "検索キーワード",
            )],
        },
        Arc::new(SearchKnowledge {
            storage: Arc::clone(&storage),
        }),
    );
    catalog.register(
        ToolSpec {
            name: "teach_rule".to_string(),
            description: "新しいルールや知識を覚える".to_string(),
            risk: RiskLevel::Low,
            params: vec![ParamSpec::required(
                "content",
                ParamKind::String,
                "覚える内容",
            )],
        },
        Arc::new(TeachRule { storage }),
    );
}

struct SearchKnowledge {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for SearchKnowledge {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let query = params
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or_else(|| HandlerError::Invalid("query missing".to_string()))?;
        let hits = self
            .storage
            .search_teachings(scope, query, 10)
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        if hits.is_empty() {
            return Ok(HandlerReply::new(
                format!("「{}」に関する知識は見つかりませんでした。", query),
                json!({"hits": []}),
            ));
        }
        let lines: Vec<String> = hits.iter().map(|t| format!("- {}", t.content)).collect();
        Ok(HandlerReply::new(
            format!("「{}」について知っていることです:\n{}", query, lines.join("\n")),
            serde_json::to_value(&hits).unwrap_or(json!({})),
        ))
    }
}

struct TeachRule {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl ToolHandler for TeachRule {
    async fn call(
        &self,
        params: &serde_json::Value,
        scope: &Scope,
    ) -> Result<HandlerReply, HandlerError> {
        let content = params
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| HandlerError::Invalid("content missing".to_string()))?;
        if content.trim().is_empty() {
            return Err(HandlerError::Invalid("content is empty".to_string()));
        }
        self.storage
            .add_teaching(scope, content.trim())
            .await
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;
        Ok(HandlerReply::new(
            "覚えました!今後の判断に使いますね。",
            json!({"content": content.trim()}),
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
    async fn test_teach_then_search() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let catalog = default_catalog(Arc::clone(&storage));

        let teach = catalog.handler("teach_rule").unwrap();
        teach
            .call(&json!({"content": "請求書は毎月25日までに送る"}), &scope())
            .await
            .unwrap();

        let search = catalog.handler("search_knowledge").unwrap();
        let reply = search.call(&json!({"query": "請求書"}), &scope()).await.unwrap();
        assert!(reply.message.contains("請求書は毎月25日までに送る"));
    }

    #[tokio::test]
    async fn test_search_no_hits() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let catalog = default_catalog(storage);
        let search = catalog.handler("search_knowledge").unwrap();
        let reply = search.call(&json!({"query": "存在しない"}), &scope()).await.unwrap();
        assert!(reply.message.contains("見つかりません"));
    }
}
