//! Trace query API: look up entries by run, node, status.

use nf_core::trace::TraceStatus;
use uuid::Uuid;

/// Query parameters for trace lookup.
#[derive(Debug, Default, Clone)]
pub struct TraceQuery {
    pub execution_id: Option<Uuid>,
    pub node_id: Option<String>,
    pub status: Option<TraceStatus>,
    pub limit: Option<u32>,
}

impl TraceQuery {
    pub fn for_run(execution_id: Uuid) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Default::default()
        }
    }

    /// SQL selecting `entry_json` plus its positional arguments.
    pub(crate) fn to_sql(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        if let Some(id) = self.execution_id {
            args.push(id.to_string());
            clauses.push(format!("execution_id = ?{}", args.len()));
        }
        if let Some(node_id) = &self.node_id {
            args.push(node_id.clone());
            clauses.push(format!("node_id = ?{}", args.len()));
        }
        if let Some(status) = self.status {
            args.push(
                match status {
                    TraceStatus::Success => "success",
                    TraceStatus::Failed => "failed",
                }
                .to_string(),
            );
            clauses.push(format!("status = ?{}", args.len()));
        }

        let mut sql = String::from("SELECT entry_json FROM trace_entries");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY execution_id, seq ASC");
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        (sql, args)
    }
}
