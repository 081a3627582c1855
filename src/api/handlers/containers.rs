//! Read-only views of the registry and log sessions

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::ApiError;
use crate::models::{ContainerSummary, RegistrySnapshot, StreamSessionInfo};
use crate::AppState;

/// Latest registry snapshot
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RegistrySnapshot>, ApiError> {
    let snapshot = state
        .broadcaster
        .current_snapshot()
        .ok_or_else(|| ApiError::Unavailable("no registry snapshot yet".to_string()))?;

    Ok(Json((*snapshot).clone()))
}

/// One container from the latest snapshot
pub async fn get_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ContainerSummary>, ApiError> {
    let snapshot = state
        .broadcaster
        .current_snapshot()
        .ok_or_else(|| ApiError::Unavailable("no registry snapshot yet".to_string()))?;

    snapshot
        .find(&id)
        .cloned()
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// Active log streaming sessions
pub async fn list_streams(State(state): State<Arc<AppState>>) -> Json<Vec<StreamSessionInfo>> {
    Json(state.streams.active_sessions().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::runtime::testing::{raw, FakeRuntime};

    fn state() -> Arc<AppState> {
        let runtime = Arc::new(FakeRuntime::with_containers(vec![
            raw("aaa", "web", "running"),
            raw("bbb", "db", "exited"),
        ]));
        Arc::new(AppState::new(AppConfig::default(), runtime))
    }

    #[tokio::test]
    async fn test_list_before_first_poll() {
        let result = list_containers(State(state())).await;
        assert!(matches!(result, Err(ApiError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_get_container_after_refresh() {
        let state = state();
        state.registry.refresh().await;

        let Json(container) = get_container(State(state.clone()), Path("bbb".to_string()))
            .await
            .unwrap();
        assert_eq!(container.name, "db");

        let missing = get_container(State(state), Path("zzz".to_string())).await;
        assert!(matches!(missing, Err(ApiError::NotFound(id)) if id == "zzz"));
    }

    #[tokio::test]
    async fn test_list_streams() {
        let state = state();
        state.streams.start_stream("aaa").await;

        let Json(sessions) = list_streams(State(state.clone())).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].container_id, "aaa");

        state.streams.stop_all().await;
    }
}
