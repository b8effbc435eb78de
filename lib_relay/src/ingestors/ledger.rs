//! # Ledger Explorer Source
//!
//! Polls an Etherscan-compatible block explorer for the latest token transfers
//! touching one address. Each transfer becomes a `ledger_tx` event keyed by its
//! transaction hash:
//!
//! ```json
//! {"hash": "0x..", "from": "0x..", "to": "0x..", "type": "in", "status": "Success", "amount": "12.5"}
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::source::EventSource;
use crate::core::{Event, EventKind};
use crate::error::SourceError;
use crate::retrieve::ApiClient;

/// Explorer reply when the address simply has no transfers yet.
const NO_TRANSACTIONS: &str = "No transactions found";

/// Largest accepted token decimals. A uint256 amount has at most 78 digits.
pub const MAX_DECIMALS: u32 = 77;

/// Connection parameters for the explorer.
#[derive(Debug, Clone)]
pub struct LedgerExplorerConfig {
    /// API root, e.g. `https://api-testnet.sonicscan.org/api`.
    pub url: String,
    pub api_key: Option<String>,
    /// Token contract whose transfers are watched.
    pub contract: String,
    /// Address whose transfers are watched.
    pub address: String,
    /// Fallback when a transfer does not carry `tokenDecimal`.
    pub decimals: u32,
    /// Number of most recent transfers per snapshot.
    pub page_size: u32,
    pub timeout: Duration,
}

/// Top-level explorer reply. `result` is a list on success and a message
/// string on failure.
#[derive(Debug, Deserialize)]
struct ExplorerReply {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

/// One entry of `action=tokentx`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenTransfer {
    hash: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    token_decimal: Option<String>,
}

/// # Ledger Explorer Source
pub struct LedgerExplorerSource {
    client: ApiClient,
    config: LedgerExplorerConfig,
}

impl LedgerExplorerSource {
    /// Builds the source and its retrying HTTP client.
    pub fn new(config: LedgerExplorerConfig) -> anyhow::Result<Self> {
        let client = ApiClient::new(&config.url, config.timeout)?;
        Ok(Self { client, config })
    }

    fn normalize(&self, tx: TokenTransfer) -> Result<Event, SourceError> {
        let decimals = match tx.token_decimal.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d
                .parse()
                .map_err(|_| SourceError::Parse(format!("bad tokenDecimal {d:?} in {}", tx.hash)))?,
            _ => self.config.decimals,
        };
        let amount = format_units(&tx.value, decimals)?;
        let direction = if tx.to.eq_ignore_ascii_case(&self.config.address) {
            "in"
        } else {
            "out"
        };
        let payload = json!({
            "hash": tx.hash,
            "from": tx.from,
            "to": tx.to,
            "type": direction,
            "status": "Success",
            "amount": amount,
        });
        Ok(Event::new(tx.hash, EventKind::LedgerTx, payload))
    }

    /// Turns an explorer reply into a snapshot.
    fn parse_reply(&self, reply: ExplorerReply) -> Result<Vec<Event>, SourceError> {
        if reply.status != "1" {
            let detail = reply.result.as_str().unwrap_or_default();
            if reply.message.contains(NO_TRANSACTIONS) || detail.contains(NO_TRANSACTIONS) {
                return Ok(Vec::new());
            }
            return Err(SourceError::Upstream(format!("{}: {}", reply.message, detail)));
        }
        let transfers: Vec<TokenTransfer> = serde_json::from_value(reply.result)?;
        transfers.into_iter().map(|tx| self.normalize(tx)).collect()
    }
}

impl EventSource for LedgerExplorerSource {
    fn name(&self) -> &str {
        "ledger-explorer"
    }

    fn kind(&self) -> EventKind {
        EventKind::LedgerTx
    }

    async fn fetch_snapshot(&self) -> Result<Vec<Event>, SourceError> {
        let page_size = self.config.page_size.to_string();
        let mut query = vec![
            ("module", "account"),
            ("action", "tokentx"),
            ("contractaddress", self.config.contract.as_str()),
            ("address", self.config.address.as_str()),
            ("page", "1"),
            ("offset", page_size.as_str()),
            ("sort", "desc"),
        ];
        if let Some(key) = &self.config.api_key {
            query.push(("apikey", key.as_str()));
        }

        let response = self
            .client
            .get::<ExplorerReply>("", &query)
            .await
            .map_err(|e| SourceError::Transport(format!("{e:#}")))?;

        match response.data {
            Some(reply) if response.success => self.parse_reply(reply),
            _ => Err(SourceError::Upstream(format!(
                "HTTP {}: {}",
                response.status,
                response.error_body.unwrap_or_default()
            ))),
        }
    }
}

/// Scales an integer base-unit amount by `10^decimals` without going through
/// floating point. Trailing fractional zeros are trimmed.
///
/// `raw` must be a decimal integer and `decimals` at most [`MAX_DECIMALS`];
/// anything else is a malformed source response.
pub fn format_units(raw: &str, decimals: u32) -> Result<String, SourceError> {
    if decimals > MAX_DECIMALS {
        return Err(SourceError::Parse(format!(
            "token decimals {decimals} out of range (max {MAX_DECIMALS})"
        )));
    }
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SourceError::Parse(format!("amount {raw:?} is not an integer")));
    }
    let digits = raw.trim_start_matches('0');
    if digits.is_empty() {
        return Ok("0".to_string());
    }

    let decimals = decimals as usize;
    let mut padded = String::with_capacity(digits.len().max(decimals + 1));
    for _ in digits.len()..=decimals {
        padded.push('0');
    }
    padded.push_str(digits);

    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        Ok(int_part.to_string())
    } else {
        Ok(format!("{int_part}.{frac_part}"))
    }
}
