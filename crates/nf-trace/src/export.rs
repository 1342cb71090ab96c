//! Trace export: render stored traces as JSON.

use crate::store::TraceStore;
use crate::TraceError;
use nf_core::trace::TraceEntry;
use uuid::Uuid;

/// Export entries to a pretty JSON array.
pub fn export_json(entries: &[TraceEntry]) -> Result<String, TraceError> {
    serde_json::to_string_pretty(entries).map_err(|e| TraceError::Export(e.to_string()))
}

/// Export one stored run: its summary plus its entries in order.
pub fn export_run_json(store: &TraceStore, execution_id: Uuid) -> Result<String, TraceError> {
    let summary = store
        .get_run(execution_id)?
        .ok_or(TraceError::RunNotFound(execution_id))?;
    let entries = store.entries_for_run(execution_id)?;
    let doc = serde_json::json!({
        "run": summary,
        "execution_trace": entries,
    });
    serde_json::to_string_pretty(&doc).map_err(|e| TraceError::Export(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nf_core::trace::{RunStatus, RunSummary};

    #[test]
    fn missing_run_is_an_error() {
        let store = TraceStore::in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            export_run_json(&store, id),
            Err(TraceError::RunNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn exports_summary_and_entries() {
        let store = TraceStore::in_memory().unwrap();
        let id = Uuid::new_v4();
        store
            .upsert_run(&RunSummary {
                execution_id: id,
                status: RunStatus::Success,
                started_at: Utc::now(),
                completed_at: Utc::now(),
                nodes_executed: 0,
                error: None,
                failed_at_node: None,
            })
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&export_run_json(&store, id).unwrap()).unwrap();
        assert_eq!(json["run"]["status"], "success");
        assert_eq!(json["execution_trace"], serde_json::json!([]));
        assert_eq!(export_json(&[]).unwrap(), "[]");
    }
}
