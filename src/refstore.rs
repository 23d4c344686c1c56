//! Redis-backed instrument reference store.
//!
//! Instrument rows are kept under uppercased composite keys and fetched by
//! transforms to enrich ticker output. A missing row is a normal lookup
//! miss, not an error; transforms enrich with nothing.

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

const KEY_PREFIX: &str = "ftp-engine";

/// Errors from the reference store.
#[derive(Debug, Error)]
pub enum RefStoreError {
    #[error("redis pool error: {0}")]
    Pool(String),

    #[error("redis command error: {0}")]
    Redis(String),

    #[error("instrument encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("instrument decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A reference row for one listed instrument.
///
/// Rows are stored as self-describing MessagePack so writer and reader can
/// evolve independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(rename = "symbol", default)]
    pub symbol: String,

    #[serde(rename = "currencyId", default)]
    pub currency: String,

    #[serde(rename = "exchange", default)]
    pub exchange: String,

    #[serde(rename = "isin", default)]
    pub isin: String,
}

/// Read-side of the reference store, the seam transforms depend on.
#[async_trait]
pub trait InstrumentLookup: Send + Sync {
    async fn by_symbol_exchange(
        &self,
        symbol: &str,
        exchange: &str,
    ) -> Result<Option<Instrument>, RefStoreError>;

    async fn by_symbol_currency(
        &self,
        symbol: &str,
        currency: &str,
    ) -> Result<Option<Instrument>, RefStoreError>;
}

fn symbol_exchange_key(symbol: &str, exchange: &str) -> String {
    format!(
        "{KEY_PREFIX}:symbol-exchange:{}:{}",
        symbol.to_uppercase(),
        exchange.to_uppercase()
    )
}

fn symbol_currency_key(symbol: &str, currency: &str) -> String {
    format!(
        "{KEY_PREFIX}:symbol-currency:{}:{}",
        symbol.to_uppercase(),
        currency.to_uppercase()
    )
}

/// Client over a shared Redis pool.
#[derive(Clone)]
pub struct RefStore {
    pool: Pool,
}

impl RefStore {
    /// Connect to Redis and prove the connection with a short-lived write.
    pub async fn connect(redis_url: &str) -> Result<Self, RefStoreError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RefStoreError::Pool(e.to_string()))?;

        let store = Self { pool };

        let mut conn = store.conn().await?;
        let _: () = cmd("SET")
            .arg(format!("{KEY_PREFIX}:test"))
            .arg("")
            .arg("PX")
            .arg(5)
            .query_async(&mut conn)
            .await
            .map_err(|e| RefStoreError::Redis(e.to_string()))?;

        Ok(store)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, RefStoreError> {
        self.pool.get().await.map_err(|e| {
            error!(error = %e, "Failed to get redis connection");
            RefStoreError::Pool(e.to_string())
        })
    }

    /// Reachability probe for liveness checks.
    pub async fn status(&self) -> Result<(), RefStoreError> {
        let mut conn = self.conn().await?;
        let _: String = cmd("PING").query_async(&mut conn).await.map_err(|e| {
            error!(error = %e, "Redis ping error");
            RefStoreError::Redis(e.to_string())
        })?;
        Ok(())
    }

    pub async fn put_by_symbol_exchange(&self, instrument: &Instrument) -> Result<(), RefStoreError> {
        let key = symbol_exchange_key(&instrument.symbol, &instrument.exchange);
        self.put(&key, instrument).await
    }

    pub async fn put_by_symbol_currency(&self, instrument: &Instrument) -> Result<(), RefStoreError> {
        let key = symbol_currency_key(&instrument.symbol, &instrument.currency);
        self.put(&key, instrument).await
    }

    // Writes carry no TTL: rows live until the next refresh overwrites them.
    async fn put(&self, key: &str, instrument: &Instrument) -> Result<(), RefStoreError> {
        let value = rmp_serde::to_vec_named(instrument)?;
        let mut conn = self.conn().await?;
        let _: () = cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis set error");
                RefStoreError::Redis(e.to_string())
            })?;
        debug!(key = %key, "Instrument stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Instrument>, RefStoreError> {
        let mut conn = self.conn().await?;
        let raw: Option<Vec<u8>> = cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis get error");
                RefStoreError::Redis(e.to_string())
            })?;

        match raw {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => {
                debug!(key = %key, "Instrument not found");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl InstrumentLookup for RefStore {
    async fn by_symbol_exchange(
        &self,
        symbol: &str,
        exchange: &str,
    ) -> Result<Option<Instrument>, RefStoreError> {
        self.get(&symbol_exchange_key(symbol, exchange)).await
    }

    async fn by_symbol_currency(
        &self,
        symbol: &str,
        currency: &str,
    ) -> Result<Option<Instrument>, RefStoreError> {
        self.get(&symbol_currency_key(symbol, currency)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_uppercased_composites() {
        assert_eq!(
            symbol_exchange_key("f", "nyse"),
            "ftp-engine:symbol-exchange:F:NYSE"
        );
        assert_eq!(
            symbol_currency_key("aapl", "usd"),
            "ftp-engine:symbol-currency:AAPL:USD"
        );
    }

    #[test]
    fn test_instrument_encoding_round_trips() {
        let instrument = Instrument {
            symbol: "A".to_string(),
            currency: "USD".to_string(),
            exchange: "NYSE".to_string(),
            isin: "US00846U1016".to_string(),
        };

        let bytes = rmp_serde::to_vec_named(&instrument).unwrap();
        let decoded: Instrument = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, instrument);
    }

    #[test]
    fn test_instrument_decodes_with_missing_fields() {
        // A row written before the isin column existed must still decode.
        #[derive(serde::Serialize)]
        struct OldRow<'a> {
            symbol: &'a str,
            #[serde(rename = "currencyId")]
            currency: &'a str,
        }

        let bytes = rmp_serde::to_vec_named(&OldRow { symbol: "F", currency: "USD" }).unwrap();
        let decoded: Instrument = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.symbol, "F");
        assert_eq!(decoded.isin, "");
    }
}
