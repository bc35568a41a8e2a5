use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "custody_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "custody_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "custody_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "custody_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "custody_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "custody_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "custody_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "custody_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: writes rejected because the interval overlapped an existing assignment.
pub const ASSIGNMENT_CONFLICTS_TOTAL: &str = "custody_assignment_conflicts_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertAssignment { .. } => "insert_assignment",
        Command::UpdateAssignment { .. } => "update_assignment",
        Command::DeleteAssignment { .. } => "delete_assignment",
        Command::SelectAssignment { .. } => "select_assignment",
        Command::SelectAssignments => "select_assignments",
        Command::SelectResourceHistory { .. } => "select_resource_history",
        Command::SelectHoldings { .. } => "select_holdings",
        Command::RegisterItem { .. } => "register_item",
        Command::RetireItem { .. } => "retire_item",
        Command::SelectItems => "select_items",
        Command::RegisterPerson { .. } => "register_person",
        Command::RetirePerson { .. } => "retire_person",
        Command::SelectPersons => "select_persons",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    #[test]
    fn labels_follow_parsed_statement() {
        let id = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
        let cases = [
            (format!("SELECT * FROM assignments WHERE id = '{id}'"), "select_assignment"),
            (format!("SELECT * FROM assignments WHERE resource_id = '{id}'"), "select_resource_history"),
            (format!("SELECT * FROM holdings WHERE assignee_id = '{id}'"), "select_holdings"),
            (format!("DELETE FROM assignments WHERE id = '{id}'"), "delete_assignment"),
            (format!("INSERT INTO items (id) VALUES ('{id}')"), "register_item"),
            ("SELECT * FROM persons".to_string(), "select_persons"),
        ];
        for (sql, label) in cases {
            let cmd = parse_sql(&sql).unwrap();
            assert_eq!(command_label(&cmd), label, "{sql}");
        }
    }

    #[test]
    fn no_port_means_no_exporter() {
        assert!(init(None).is_ok());
    }
}
