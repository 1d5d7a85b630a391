//! Decision inquiry after restart
//!
//! A participant that recovered PREPARED transactions from its journal must
//! not decide on its own; it asks the coordinator once the recovery timeout
//! elapses. While the coordinator is unreachable or has no decision the
//! transaction stays blocked, which is 2PC's blocking property.

use crate::engine::ParticipantEngine;
use pact_common::protocol::{Decision, TxStatusReply};
use pact_common::TxId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Start the inquiry task; returns immediately if nothing was recovered
pub fn spawn_inquiry(
    engine: Arc<ParticipantEngine>,
    coordinator: String,
    recovery_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if engine.prepared_transactions().is_empty() {
            return;
        }

        info!(
            coordinator = %coordinator,
            "prepared transactions recovered; inquiring after {:?}",
            recovery_timeout
        );
        tokio::time::sleep(recovery_timeout).await;

        let client = reqwest::Client::new();
        loop {
            let pending = engine.prepared_transactions();
            if pending.is_empty() {
                info!("all recovered transactions resolved");
                return;
            }

            for tx_id in pending {
                match fetch_decision(&client, &coordinator, &tx_id).await {
                    Some(Decision::Committed) => {
                        let engine = engine.clone();
                        let id = tx_id.clone();
                        let result =
                            tokio::task::spawn_blocking(move || engine.commit(&id)).await;
                        if let Ok(Err(e)) = result {
                            warn!(tx_id = %tx_id, "failed to apply commit decision: {}", e);
                        }
                    }
                    Some(Decision::Aborted) => {
                        let engine = engine.clone();
                        let id = tx_id.clone();
                        let result =
                            tokio::task::spawn_blocking(move || engine.abort(&id)).await;
                        if let Ok(Err(e)) = result {
                            warn!(tx_id = %tx_id, "failed to apply abort decision: {}", e);
                        }
                    }
                    None => {}
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
}

/// Ask the coordinator for a decision; None means keep waiting
async fn fetch_decision(
    client: &reqwest::Client,
    coordinator: &str,
    tx_id: &TxId,
) -> Option<Decision> {
    let base = if coordinator.starts_with("http://") || coordinator.starts_with("https://") {
        coordinator.to_string()
    } else {
        format!("http://{}", coordinator)
    };
    let url = format!("{}/status/{}", base, tx_id);

    let response = match client
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(tx_id = %tx_id, "coordinator unreachable: {}", e);
            return None;
        }
    };

    if !response.status().is_success() {
        // Unknown at the coordinator: no decision yet, stay blocked
        return None;
    }

    match response.json::<TxStatusReply>().await {
        Ok(reply) => reply.decision,
        Err(e) => {
            warn!(tx_id = %tx_id, "malformed status reply: {}", e);
            None
        }
    }
}
