//! Batch token distribution to a list of addresses.
//!
//! The input is a CSV export with a header row and the resolved wallet address in
//! the second column. Rows whose address is missing, malformed or zero are skipped.

use alloy_primitives::U256;
use std::time::Duration;
use x402_chat_types::chain::{ChainId, ChecksummedAddress, TokenDeployment};

use crate::transfer::{EngineClient, EngineClientError, Recipient};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PER_ADDRESS: u64 = 10;
pub const BATCH_DELAY: Duration = Duration::from_secs(2);

/// Addresses parsed out of an airdrop CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AirdropList {
    pub addresses: Vec<ChecksummedAddress>,
    /// Data rows that yielded no usable address.
    pub skipped: usize,
}

impl AirdropList {
    pub fn parse(csv: &str) -> Self {
        let mut list = AirdropList::default();
        for line in csv.trim().lines().skip(1) {
            let address = line
                .split(',')
                .nth(1)
                .map(str::trim)
                .filter(|s| s.len() == 42 && s.starts_with("0x"))
                .and_then(|s| s.parse::<ChecksummedAddress>().ok())
                .filter(|address| !address.is_zero());
            match address {
                Some(address) => list.addresses.push(address),
                None => list.skipped += 1,
            }
        }
        list
    }

    /// Recipients grouped into batches of at most `batch_size`, each receiving `quantity`.
    pub fn batches(&self, batch_size: usize, quantity: U256) -> Vec<Vec<Recipient>> {
        self.addresses
            .chunks(batch_size.max(1))
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|address| Recipient {
                        address: *address,
                        quantity,
                    })
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AirdropError {
    #[error("Token chain {0} is not an EVM chain")]
    UnsupportedChain(ChainId),
    #[error("Batch {batch} of {total} failed: {source}")]
    Batch {
        batch: usize,
        total: usize,
        /// Transaction ids of the batches that went through before the failure.
        sent: Vec<String>,
        #[source]
        source: EngineClientError,
    },
}

/// Sends every batch in order, pausing `delay` between them. Stops at the first failure.
pub async fn send_batches(
    engine: &EngineClient,
    from: &ChecksummedAddress,
    token: &TokenDeployment,
    batches: &[Vec<Recipient>],
    delay: Duration,
) -> Result<Vec<String>, AirdropError> {
    let chain_id = token
        .chain
        .as_eip155()
        .ok_or_else(|| AirdropError::UnsupportedChain(token.chain.clone()))?;
    let total = batches.len();
    let mut sent = Vec::new();
    for (index, batch) in batches.iter().enumerate() {
        let batch_number = index + 1;
        tracing::info!(batch = batch_number, total, recipients = batch.len(), "Sending batch");
        match engine.send(from, chain_id, &token.address, batch).await {
            Ok(ids) => {
                tracing::info!(batch = batch_number, transaction_ids = ?ids, "Batch sent");
                sent.extend(ids);
            }
            Err(source) => {
                return Err(AirdropError::Batch {
                    batch: batch_number,
                    total,
                    sent,
                    source,
                });
            }
        }
        if batch_number < total {
            tokio::time::sleep(delay).await;
        }
    }
    Ok(sent)
}
