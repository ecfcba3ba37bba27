//! Bitcoin anchoring: commits a Merkle root via a zero-value OP_RETURN
//! output, funded from the configured key's own P2WPKH UTXO set and signed
//! locally rather than delegated to a node wallet.

use std::str::FromStr;

use ::bitcoin::absolute::LockTime;
use ::bitcoin::consensus::encode::serialize_hex;
use ::bitcoin::opcodes::all::OP_RETURN;
use ::bitcoin::script::Builder;
use ::bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use ::bitcoin::sighash::SighashCache;
use ::bitcoin::{
    Address, Amount, CompressedPublicKey, EcdsaSighashType, OutPoint, PrivateKey, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::anchor::{AnchorError, Broadcaster};
use crate::config::{BitcoinConfig, BitcoinNetwork};
use crate::database::types::AnchorErrorKind;

const SIGNET_DEFAULT_FEE_SAT_VB: u64 = 10;
const MAINNET_DEFAULT_FEE_SAT_VB: u64 = 20;

/// Below this, a P2WPKH change output isn't worth its own future spend cost
/// and is folded into the fee instead.
const DUST_LIMIT_SAT: u64 = 294;
/// Weight-discounted vsize of a single P2WPKH input (prevout txid+vout+nSequence
/// plus a ~73-byte DER signature and 33-byte pubkey in the witness).
const INPUT_VSIZE_P2WPKH: u64 = 68;
/// vsize of a single P2WPKH output (8-byte value + 22-byte script + length prefix).
const OUTPUT_VSIZE_P2WPKH: u64 = 31;
/// Fixed overhead: version, locktime, segwit marker/flag, input/output counts.
const BASE_TX_VSIZE: u64 = 11;

#[derive(Debug, Deserialize)]
struct UnspentEntry {
    txid:   String,
    vout:   u32,
    amount: f64,
}

/// Broadcasts via a configured Bitcoin Core-compatible RPC endpoint
/// (`estimatesmartfee`, `sendrawtransaction`, `gettransaction`).
pub struct BitcoinBroadcaster {
    client:  Client,
    config:  BitcoinConfig,
    tag:     &'static str,
}

impl BitcoinBroadcaster {
    #[must_use]
    pub fn new(config: BitcoinConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            tag: "pohw",
        }
    }

    fn signing_key(&self) -> Result<PrivateKey, AnchorError> {
        PrivateKey::from_wif(self.config.private_key.expose())
            .or_else(|_| {
                let bytes = hex::decode(self.config.private_key.expose())
                    .map_err(|_| ())
                    .and_then(|b| SecretKey::from_slice(&b).map_err(|_| ()))
                    .map_err(|()| AnchorError::new(AnchorErrorKind::InvalidKey, "private key is neither WIF nor raw hex"))?;
                Ok(PrivateKey::new(bytes, self.network()))
            })
    }

    fn network(&self) -> ::bitcoin::Network {
        match self.config.network {
            BitcoinNetwork::Bitcoin => ::bitcoin::Network::Bitcoin,
            BitcoinNetwork::Testnet => ::bitcoin::Network::Testnet,
            BitcoinNetwork::Signet => ::bitcoin::Network::Signet,
        }
    }

    fn default_fee_rate(&self) -> u64 {
        match self.config.network {
            BitcoinNetwork::Bitcoin => MAINNET_DEFAULT_FEE_SAT_VB,
            BitcoinNetwork::Testnet | BitcoinNetwork::Signet => SIGNET_DEFAULT_FEE_SAT_VB,
        }
    }

    async fn estimate_fee_rate(&self) -> u64 {
        // Best-effort: fall back to the network default whenever the RPC
        // call fails or the node has no fee estimate yet.
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "pohw",
            "method": "estimatesmartfee",
            "params": [6],
        });

        let Ok(response) = self
            .client
            .post(self.config.rpc_url.expose())
            .json(&body)
            .send()
            .await
        else {
            return self.default_fee_rate();
        };

        let Ok(parsed) = response.json::<serde_json::Value>().await else {
            return self.default_fee_rate();
        };

        parsed["result"]["feerate"]
            .as_f64()
            .map(|btc_per_kvb| (btc_per_kvb * 100_000_000.0 / 1000.0).round() as u64)
            .unwrap_or_else(|| self.default_fee_rate())
    }

    fn commitment_script(&self, merkle_root: &[u8; 32], registry_tag: &str) -> ScriptBuf {
        let mut data = Vec::with_capacity(merkle_root.len() + registry_tag.len() + 1);
        data.extend_from_slice(registry_tag.as_bytes());
        data.push(b'|');
        data.extend_from_slice(merkle_root);

        Builder::new()
            .push_opcode(OP_RETURN)
            .push_slice(<&::bitcoin::script::PushBytes>::try_from(data.as_slice()).expect("commitment payload fits in a single push"))
            .into_script()
    }

    fn funding_address(&self, signing_key: &PrivateKey, secp: &Secp256k1<::bitcoin::secp256k1::All>) -> Result<Address, AnchorError> {
        let compressed = CompressedPublicKey::from_private_key(secp, signing_key)
            .map_err(|e| AnchorError::new(AnchorErrorKind::InvalidKey, e.to_string()))?;
        Ok(Address::p2wpkh(&compressed, self.network()))
    }

    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentEntry>, AnchorError> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "pohw",
            "method": "listunspent",
            "params": [1, 9_999_999, [address.to_string()]],
        });

        let response = self
            .client
            .post(self.config.rpc_url.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::new(AnchorErrorKind::RpcUnreachable, e.to_string()))?;

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnchorError::new(AnchorErrorKind::RpcUnreachable, e.to_string()))?;

        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            return Err(classify_rpc_error(error));
        }

        serde_json::from_value(parsed["result"].clone())
            .map_err(|e| AnchorError::new(AnchorErrorKind::Unknown, format!("malformed listunspent response: {e}")))
    }

    /// Greedily selects UTXOs, recomputing the required fee as inputs are
    /// added, until the selected total covers the fee (the commitment
    /// output itself carries no value). Returns the selected inputs, total
    /// selected value, and the fee they must cover.
    fn select_inputs(entries: &[UnspentEntry], fee_rate: u64, op_return_script: &ScriptBuf) -> Result<(Vec<&UnspentEntry>, u64, u64), AnchorError> {
        let mut selected: Vec<&UnspentEntry> = Vec::new();
        let mut total_in_sat: u64 = 0;

        for entry in entries {
            selected.push(entry);
            total_in_sat += Amount::from_btc(entry.amount)
                .map_err(|e| AnchorError::new(AnchorErrorKind::Unknown, e.to_string()))?
                .to_sat();

            let vsize = estimate_vsize(selected.len(), true, op_return_script.len());
            let fee_with_change = vsize * fee_rate;
            let change = total_in_sat.saturating_sub(fee_with_change);

            if change >= DUST_LIMIT_SAT {
                return Ok((selected, total_in_sat, fee_with_change));
            }

            // No room for change: check whether the inputs cover the fee alone.
            let vsize_no_change = estimate_vsize(selected.len(), false, op_return_script.len());
            let fee_no_change = vsize_no_change * fee_rate;
            if total_in_sat >= fee_no_change {
                return Ok((selected, total_in_sat, fee_no_change));
            }
        }

        Err(AnchorError::new(AnchorErrorKind::InsufficientFunds, "not enough confirmed UTXOs to cover the anchoring fee"))
    }

    fn build_and_sign_transaction(
        &self,
        op_return_script: ScriptBuf,
        signing_key: &PrivateKey,
        secp: &Secp256k1<::bitcoin::secp256k1::All>,
        change_address: &Address,
        inputs: &[&UnspentEntry],
        total_in_sat: u64,
        fee_sat: u64,
    ) -> Result<Transaction, AnchorError> {
        let change_sat = total_in_sat.saturating_sub(fee_sat);

        let mut outputs = vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: op_return_script,
        }];
        if change_sat >= DUST_LIMIT_SAT {
            outputs.push(TxOut {
                value: Amount::from_sat(change_sat),
                script_pubkey: change_address.script_pubkey(),
            });
        }

        let tx_inputs = inputs
            .iter()
            .map(|entry| {
                let txid = Txid::from_str(&entry.txid)
                    .map_err(|e| AnchorError::new(AnchorErrorKind::Unknown, format!("malformed UTXO txid: {e}")))?;
                Ok(TxIn {
                    previous_output: OutPoint { txid, vout: entry.vout },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<_>, AnchorError>>()?;

        let mut tx = Transaction {
            version: ::bitcoin::transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_inputs,
            output: outputs,
        };

        let prevout_script = change_address.script_pubkey();
        let sighash_type = EcdsaSighashType::All;

        for (index, entry) in inputs.iter().enumerate() {
            let value = Amount::from_btc(entry.amount)
                .map_err(|e| AnchorError::new(AnchorErrorKind::Unknown, e.to_string()))?;

            let sighash = SighashCache::new(&tx)
                .p2wpkh_signature_hash(index, &prevout_script, value, sighash_type)
                .map_err(|e| AnchorError::new(AnchorErrorKind::Unknown, format!("sighash computation failed: {e}")))?;

            let message = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_ecdsa(&message, &signing_key.inner);
            let signature = ::bitcoin::ecdsa::Signature { signature, sighash_type };

            let mut witness = Witness::new();
            witness.push(signature.serialize());
            witness.push(signing_key.public_key(secp).to_bytes());
            tx.input[index].witness = witness;
        }

        Ok(tx)
    }
}

/// Rough vsize estimate: fixed overhead, plus 68 witness-discounted vbytes
/// per P2WPKH input, plus one OP_RETURN output and an optional P2WPKH
/// change output.
fn estimate_vsize(num_inputs: usize, has_change: bool, op_return_script_len: usize) -> u64 {
    let op_return_vsize = 8 + 1 + op_return_script_len as u64;
    let change_vsize = if has_change { OUTPUT_VSIZE_P2WPKH } else { 0 };
    BASE_TX_VSIZE + num_inputs as u64 * INPUT_VSIZE_P2WPKH + op_return_vsize + change_vsize
}

#[async_trait]
impl Broadcaster for BitcoinBroadcaster {
    #[instrument(skip(self, merkle_root), level = "debug")]
    async fn broadcast(&self, merkle_root: &[u8; 32], registry_tag: &str) -> Result<String, AnchorError> {
        let secp = Secp256k1::new();
        let signing_key = self.signing_key()?;
        let fee_rate = self.estimate_fee_rate().await;

        let funding_address = self.funding_address(&signing_key, &secp)?;
        let unspent = self.list_unspent(&funding_address).await?;
        let op_return_script = self.commitment_script(merkle_root, registry_tag);
        let (inputs, total_in_sat, fee_sat) = Self::select_inputs(&unspent, fee_rate, &op_return_script)?;

        let signed = self.build_and_sign_transaction(
            op_return_script,
            &signing_key,
            &secp,
            &funding_address,
            &inputs,
            total_in_sat,
            fee_sat,
        )?;
        let raw_hex = serialize_hex(&signed);

        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "pohw",
            "method": "sendrawtransaction",
            "params": [raw_hex],
        });

        let response = self
            .client
            .post(self.config.rpc_url.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::new(AnchorErrorKind::RpcUnreachable, e.to_string()))?;

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnchorError::new(AnchorErrorKind::RpcUnreachable, e.to_string()))?;

        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            return Err(classify_rpc_error(error));
        }

        parsed["result"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| AnchorError::new(AnchorErrorKind::Unknown, "RPC returned no transaction id"))
    }

    #[instrument(skip(self), level = "debug")]
    async fn confirmations(&self, tx_id: &str) -> Result<u32, AnchorError> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "pohw",
            "method": "gettransaction",
            "params": [tx_id],
        });

        let response = self
            .client
            .post(self.config.rpc_url.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::new(AnchorErrorKind::RpcUnreachable, e.to_string()))?;

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnchorError::new(AnchorErrorKind::RpcUnreachable, e.to_string()))?;

        Ok(parsed["result"]["confirmations"].as_u64().unwrap_or(0) as u32)
    }
}

fn classify_rpc_error(error: &serde_json::Value) -> AnchorError {
    let message = error["message"].as_str().unwrap_or("unknown RPC error").to_owned();
    let kind = match error["code"].as_i64() {
        Some(-25) | Some(-26) => AnchorErrorKind::RejectedByNetwork,
        Some(-6) => AnchorErrorKind::InsufficientFunds,
        _ if message.to_lowercase().contains("insufficient") => AnchorErrorKind::InsufficientFunds,
        _ => AnchorErrorKind::Unknown,
    };

    AnchorError::new(kind, message)
}
