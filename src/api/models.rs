//! Model catalog endpoint.

use axum::Json;

use crate::convert::model_map;
use crate::models::openai::{ModelInfo, ModelsResponse};

/// `GET /v1/models` -- the fixed external catalog.
pub async fn list_models() -> Json<ModelsResponse> {
    let created = chrono::Utc::now().timestamp();
    Json(ModelsResponse {
        object: "list".to_string(),
        data: model_map::CATALOG
            .iter()
            .map(|id| ModelInfo {
                id: (*id).to_string(),
                object: "model".to_string(),
                created,
                owned_by: "kiro".to_string(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_listed() {
        let Json(response) = list_models().await;
        assert_eq!(response.object, "list");
        assert!(response.data.iter().any(|m| m.id == "auto"));
        assert!(response.data.iter().any(|m| m.id == "claude-sonnet-4-5"));
        assert_eq!(response.data.len(), model_map::CATALOG.len());
    }
}
