//! Blocking Esplora REST client.

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use satchel_core::address::Address;
use satchel_core::constants::Network;
use satchel_core::error::ProviderError;
use satchel_core::traits::ChainProvider;
use satchel_core::types::{AddressUtxo, FeeEstimates, HistoryTx, Txid};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::model::{CHAIN_PAGE_SIZE, EsploraTx, EsploraUtxo, RecommendedFees, parse_txid};

/// Upper bound on history pages fetched for one address.
const MAX_HISTORY_PAGES: usize = 200;

/// [`ChainProvider`] over an Esplora-compatible HTTP API
/// (Blockstream Esplora, mempool.space).
pub struct EsploraClient {
    client: Client,
    base_url: String,
    network: Network,
}

impl EsploraClient {
    pub fn new(base_url: &str, network: Network, timeout: std::time::Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unreachable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            network,
        })
    }

    /// Client for `network` using the configured URL and timeout.
    pub fn from_config(config: &ProviderConfig, network: Network) -> Result<Self, ProviderError> {
        Self::new(config.url_for(network), network, config.timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.client.get(&url).send().map_err(map_transport)?;
        check_status(response)?.json().map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn check_network(&self, address: &Address) -> Result<(), ProviderError> {
        if address.network() != self.network {
            return Err(ProviderError::Rejected(format!(
                "{address} is not a {} address",
                self.network
            )));
        }
        Ok(())
    }
}

impl ChainProvider for EsploraClient {
    fn get_utxos(&self, address: &Address) -> Result<Vec<AddressUtxo>, ProviderError> {
        self.check_network(address)?;
        let utxos: Vec<EsploraUtxo> = self.get_json(&format!("/address/{address}/utxo"))?;
        utxos.into_iter().map(EsploraUtxo::into_utxo).collect()
    }

    fn get_fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
        let fees: RecommendedFees = self.get_json("/v1/fees/recommended")?;
        Ok(fees.into())
    }

    fn broadcast(&self, raw_tx: &str) -> Result<Txid, ProviderError> {
        let url = self.url("/tx");
        let response = self
            .client
            .post(&url)
            .body(raw_tx.to_string())
            .send()
            .map_err(map_transport)?;
        let status = response.status();
        let body = response.text().map_err(|e| ProviderError::Decode(e.to_string()))?;
        if status == StatusCode::BAD_REQUEST {
            return Err(ProviderError::Rejected(body));
        }
        if !status.is_success() {
            return Err(ProviderError::Http { status: status.as_u16(), body });
        }
        let txid = parse_txid(&body)?;
        info!(%txid, "transaction accepted by esplora");
        Ok(txid)
    }

    /// Mempool transactions plus every confirmed page, newest first.
    fn get_address_history(&self, address: &Address) -> Result<Vec<HistoryTx>, ProviderError> {
        self.check_network(address)?;
        let first: Vec<EsploraTx> = self.get_json(&format!("/address/{address}/txs"))?;
        let mut confirmed_in_page = first.iter().filter(|tx| tx.status.confirmed).count();
        let mut last_seen = first.last().map(|tx| tx.txid.clone());
        let mut all = first;

        // The first page holds up to 50 mempool and 25 confirmed transactions.
        let mut pages = 1;
        while confirmed_in_page >= CHAIN_PAGE_SIZE && pages < MAX_HISTORY_PAGES {
            let Some(after) = last_seen.take() else { break };
            let page: Vec<EsploraTx> = self.get_json(&format!("/address/{address}/txs/chain/{after}"))?;
            confirmed_in_page = page.len();
            last_seen = page.last().map(|tx| tx.txid.clone());
            all.extend(page);
            pages += 1;
        }

        all.into_iter().map(EsploraTx::into_history).collect()
    }

    /// Served from `/address/:address` counters, cheaper than the history.
    fn is_used(&self, address: &Address) -> Result<bool, ProviderError> {
        self.check_network(address)?;
        let stats: serde_json::Value = self.get_json(&format!("/address/{address}"))?;
        let count = |section: &str| stats[section]["tx_count"].as_u64().unwrap_or(0);
        Ok(count("chain_stats") + count("mempool_stats") > 0)
    }
}

fn map_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_decode() {
        ProviderError::Decode(e.to_string())
    } else {
        ProviderError::Unreachable(e.to_string())
    }
}

fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ProviderError::Http { status: status.as_u16(), body })
}
