//! The upstream node's JSON-RPC surface this crate actually needs.
//!
//! `NodeClient` is the narrow trait the registry and block updater depend
//! on; `HttpNodeClient` is a real, minimal implementation over `reqwest`
//! with HTTP basic auth so the crate runs end to end against a real
//! daemon. A node's full RPC surface, and anything beyond these four
//! calls, is out of scope.

use {super::*, base64::Engine, serde_json::json, std::collections::BTreeMap};

#[derive(Debug, Clone, Deserialize)]
pub struct RawTemplateTransaction {
    pub data: String,
    pub fee: i64,
}

/// A masternode payout as the node reports it: `payee` is either a base58
/// address (P2PKH) or a 66-hex-character compressed pubkey (P2PK).
#[derive(Debug, Clone, Deserialize)]
pub struct MasternodePayoutInfo {
    pub payee: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetBlockTemplateResult {
    pub height: u64,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    pub coinbasevalue: u64,
    pub bits: String,
    pub curtime: u32,
    pub version: i32,
    pub transactions: Vec<RawTemplateTransaction>,
    #[serde(default)]
    pub coinbaseaux: BTreeMap<String, String>,
    #[serde(default)]
    pub masternode: Vec<MasternodePayoutInfo>,
    #[serde(default)]
    pub coinbase_payload: Option<String>,
}

/// The node calls this crate's template registry depends on. Deliberately
/// narrower than a full RPC client: everything else (wallet management,
/// peer info, mempool inspection) belongs to the external node client the
/// session layer owns.
pub trait NodeClient {
    async fn get_block_template(&self) -> Result<GetBlockTemplateResult>;

    /// Submits a full block. `Ok(None)` means accepted; `Ok(Some(reason))`
    /// means the node rejected it with the given reason string.
    async fn submit_block(&self, block_hex: &str) -> Result<Option<String>>;

    async fn get_best_block_hash(&self) -> Result<String>;

    async fn validate_address(&self, address: &str) -> Result<bool>;
}

pub struct HttpNodeClient {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl HttpNodeClient {
    pub fn new(url: String, username: String, password: String) -> Self {
        HttpNodeClient {
            client: reqwest::Client::new(),
            url,
            username,
            password,
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let auth = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));

        let body = json!({
            "jsonrpc": "1.0",
            "id": "scrypt-pool-core",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Basic {auth}"))
            .json(&body)
            .send()
            .await
            .context(error::HttpSnafu)?;

        let value: serde_json::Value = response.json().await.context(error::HttpSnafu)?;

        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(error::NodeErrorSnafu {
                message: err.to_string(),
            }
            .build());
        }

        Ok(value.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

impl NodeClient for HttpNodeClient {
    async fn get_block_template(&self) -> Result<GetBlockTemplateResult> {
        let result = self
            .call(
                "getblocktemplate",
                json!([{ "rules": ["segwit"], "capabilities": ["coinbasetxn", "workid"] }]),
            )
            .await?;
        serde_json::from_value(result).context(error::JsonSnafu)
    }

    async fn submit_block(&self, block_hex: &str) -> Result<Option<String>> {
        let result = self.call("submitblock", json!([block_hex])).await?;

        match result {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(reason) if reason == "duplicate" || reason == "duplicate-inconclusive" => {
                // the node has already seen this block; confirm it landed
                let best = self.get_best_block_hash().await?;
                let mut submitted_hash = hash::double_sha256(&hex::decode(&block_hex[0..160]).context(error::HexSnafu)?);
                submitted_hash.reverse(); // node RPCs report hashes in reversed display order
                if hex::encode(submitted_hash) == best {
                    Ok(None)
                } else {
                    Ok(Some(reason))
                }
            }
            serde_json::Value::String(reason) => Ok(Some(reason)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn get_best_block_hash(&self) -> Result<String> {
        let result = self.call("getbestblockhash", json!([])).await?;
        serde_json::from_value(result).context(error::JsonSnafu)
    }

    async fn validate_address(&self, address: &str) -> Result<bool> {
        let result = self.call("validateaddress", json!([address])).await?;
        Ok(result.get("isvalid").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::{cell::RefCell, collections::VecDeque};

    /// A scriptable `NodeClient` for registry/updater tests: each call
    /// pops its next canned response, panicking if the queue runs dry so
    /// a test's expectations stay honest.
    pub struct MockNodeClient {
        templates: RefCell<VecDeque<GetBlockTemplateResult>>,
        submissions: RefCell<Vec<String>>,
        best_block_hash: RefCell<String>,
    }

    impl MockNodeClient {
        pub fn new() -> Self {
            MockNodeClient {
                templates: RefCell::new(VecDeque::new()),
                submissions: RefCell::new(Vec::new()),
                best_block_hash: RefCell::new("00".repeat(32)),
            }
        }

        pub fn push_template(&self, template: GetBlockTemplateResult) {
            self.templates.borrow_mut().push_back(template);
        }

        pub fn submissions(&self) -> Vec<String> {
            self.submissions.borrow().clone()
        }

        pub fn set_best_block_hash(&self, hash: String) {
            *self.best_block_hash.borrow_mut() = hash;
        }
    }

    impl NodeClient for MockNodeClient {
        async fn get_block_template(&self) -> Result<GetBlockTemplateResult> {
            self.templates
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| error::NodeErrorSnafu { message: "no template queued" }.build())
        }

        async fn submit_block(&self, block_hex: &str) -> Result<Option<String>> {
            self.submissions.borrow_mut().push(block_hex.to_string());
            Ok(None)
        }

        async fn get_best_block_hash(&self) -> Result<String> {
            Ok(self.best_block_hash.borrow().clone())
        }

        async fn validate_address(&self, _address: &str) -> Result<bool> {
            Ok(true)
        }
    }
}
