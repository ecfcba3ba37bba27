//! Ethereum anchoring: a zero-value self-transfer carrying the Merkle root
//! as calldata, signed locally and broadcast via a configured JSON-RPC
//! endpoint. EIP-1559 fee fields with a 20% buffer above the node's own gas
//! estimate.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, Eip1559TransactionRequest, TransactionReceipt, U256};
use tracing::instrument;

use crate::anchor::{AnchorError, Broadcaster};
use crate::config::{EthereumConfig, EthereumNetwork};
use crate::database::types::AnchorErrorKind;

pub struct EthereumBroadcaster {
    config: EthereumConfig,
}

impl EthereumBroadcaster {
    #[must_use]
    pub fn new(config: EthereumConfig) -> Self {
        Self { config }
    }

    fn chain_id(&self) -> u64 {
        match self.config.network {
            EthereumNetwork::Mainnet => 1,
            EthereumNetwork::Sepolia => 11_155_111,
        }
    }

    async fn client(&self) -> Result<SignerMiddleware<Provider<Http>, LocalWallet>, AnchorError> {
        let provider = Provider::<Http>::try_from(self.config.rpc_url.expose())
            .map_err(|e| AnchorError::new(AnchorErrorKind::RpcUnreachable, e.to_string()))?;

        let wallet = LocalWallet::from_str(self.config.private_key.expose())
            .map_err(|_| AnchorError::new(AnchorErrorKind::InvalidKey, "private key is not valid secp256k1 hex"))?
            .with_chain_id(self.chain_id());

        Ok(SignerMiddleware::new(provider, wallet))
    }
}

#[async_trait]
impl Broadcaster for EthereumBroadcaster {
    #[instrument(skip(self, merkle_root), level = "debug")]
    async fn broadcast(&self, merkle_root: &[u8; 32], registry_tag: &str) -> Result<String, AnchorError> {
        let client = self.client().await?;
        let self_address = client.address();

        let mut calldata = registry_tag.as_bytes().to_vec();
        calldata.push(b'|');
        calldata.extend_from_slice(merkle_root);

        let probe = Eip1559TransactionRequest::new().to(self_address).data(Bytes::from(calldata.clone()));

        let estimated_gas = client
            .estimate_gas(&probe.clone().into(), None)
            .await
            .map_err(|e| classify_provider_error(&e))?;

        let gas_limit = (estimated_gas * U256::from(120)) / U256::from(100);
        let gas_limit = gas_limit.max(U256::from(self.config.gas_limit));

        let (max_fee_per_gas, max_priority_fee_per_gas) =
            client.estimate_eip1559_fees(None).await.map_err(|e| classify_provider_error(&e))?;

        let tx = probe
            .value(U256::zero())
            .gas(gas_limit)
            .max_fee_per_gas(max_fee_per_gas)
            .max_priority_fee_per_gas(max_priority_fee_per_gas);

        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(|e| classify_provider_error(&e))?;

        Ok(format!("{:#x}", pending.tx_hash()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn confirmations(&self, tx_id: &str) -> Result<u32, AnchorError> {
        let client = self.client().await?;

        let hash = tx_id
            .parse()
            .map_err(|_| AnchorError::new(AnchorErrorKind::Unknown, "malformed transaction hash"))?;

        let receipt: Option<TransactionReceipt> = client
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| classify_provider_error(&e))?;

        let Some(receipt) = receipt else {
            return Ok(0);
        };
        let Some(tx_block) = receipt.block_number else {
            return Ok(0);
        };

        let latest_block = client
            .get_block_number()
            .await
            .map_err(|e| classify_provider_error(&e))?;

        Ok((latest_block.saturating_sub(tx_block).as_u64() + 1) as u32)
    }
}

fn classify_provider_error<E: std::fmt::Display>(error: &E) -> AnchorError {
    let message = error.to_string();
    let lower = message.to_lowercase();

    let kind = if lower.contains("insufficient funds") {
        AnchorErrorKind::InsufficientFunds
    } else if lower.contains("nonce") || lower.contains("replacement") || lower.contains("underpriced") {
        AnchorErrorKind::RejectedByNetwork
    } else if lower.contains("connect") || lower.contains("timeout") || lower.contains("dns") {
        AnchorErrorKind::RpcUnreachable
    } else {
        AnchorErrorKind::Unknown
    };

    AnchorError::new(kind, message)
}
