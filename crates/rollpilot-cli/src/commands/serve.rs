use chrono::Utc;
use rollpilot_config::RollpilotConfig;
use rollpilot_engine::{CallContext, JsonRpcError, JsonRpcResponse, McpGateway};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::build_manager;
use crate::adapters::{NarratingExecutor, SnapshotFileProbe};

pub(super) async fn cmd_mcp(
    config: RollpilotConfig,
    snapshot: Option<PathBuf>,
    api_key: Option<String>,
) -> rollpilot_core::Result<()> {
    let probe = snapshot.map_or_else(SnapshotFileProbe::unavailable, SnapshotFileProbe::new);
    let manager = build_manager(&config, probe)?;
    let gateway = McpGateway::new(
        manager,
        Arc::new(NarratingExecutor),
        config.policy.clone(),
        config.goal_manager.action_timeout_secs,
    );
    match gateway.ticketing().purge_expired(Utc::now()) {
        Ok(0) => {}
        Ok(purged) => info!(purged, "expired approval tickets removed"),
        Err(e) => warn!(error = %e, "could not purge expired approval tickets"),
    }

    let ctx = CallContext {
        api_key,
        now: None,
    };
    info!("MCP server listening on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(raw) if raw.get("id").is_none() => {
                // Notifications get no reply.
                debug!(method = ?raw.get("method"), "notification ignored");
                continue;
            }
            Ok(raw) => gateway.handle(raw, &ctx).await,
            Err(e) => JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(e.to_string())),
        };

        let mut frame = serde_json::to_vec(&response)?;
        frame.push(b'\n');
        stdout.write_all(&frame).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, MCP server stopping");
    Ok(())
}
