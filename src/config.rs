//! CLI/env configuration, split the way `para`'s `Options`/`Settings`
//! pair works: `Options` is what `clap` parses straight off argv/env,
//! `Config` is the validated, immutable form the rest of the crate reads.

use {super::*, std::str::FromStr};

#[derive(Debug, Clone, Parser)]
#[command(name = "scrypt-pool-registryd", about = "Template registry and share validator for a scrypt Stratum pool")]
pub struct Options {
    /// Address the central wallet pays into when no masternode consumes
    /// the full coinbase value.
    #[arg(long, env = "CENTRAL_WALLET")]
    pub central_wallet: String,

    /// Node JSON-RPC URL.
    #[arg(long, env = "NODE_RPC_URL")]
    pub node_rpc_url: String,

    #[arg(long, env = "NODE_RPC_USER")]
    pub node_rpc_user: String,

    #[arg(long, env = "NODE_RPC_PASSWORD")]
    pub node_rpc_password: String,

    /// 5-bit tag distinguishing this registry instance's extranonce1
    /// allocations from any others sharing the same coinbase namespace.
    #[arg(long, env = "INSTANCE_ID", default_value_t = 0)]
    pub instance_id: u8,

    /// Extra bytes appended to the coinbase scriptSig identifying the pool.
    #[arg(long, env = "COINBASE_EXTRAS", default_value = "")]
    pub coinbase_extras: String,

    #[arg(long, env = "PREVHASH_REFRESH_INTERVAL_S", default_value_t = 1)]
    pub prevhash_refresh_interval_s: u64,

    #[arg(long, env = "MERKLE_REFRESH_INTERVAL_S", default_value_t = 30)]
    pub merkle_refresh_interval_s: u64,

    /// Accepted and stored for the session layer; vardiff retargeting
    /// itself is not implemented here.
    #[arg(long, env = "VARDIFF_MIN", default_value_t = 1.0)]
    pub vardiff_min: f64,

    #[arg(long, env = "VARDIFF_MAX", default_value_t = 1_000_000.0)]
    pub vardiff_max: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub central_wallet: bitcoin::ScriptBuf,
    pub node_rpc_url: String,
    pub node_rpc_user: String,
    pub node_rpc_password: String,
    pub instance_id: u8,
    pub coinbase_extras: Vec<u8>,
    pub prevhash_refresh: std::time::Duration,
    pub merkle_refresh: std::time::Duration,
    pub vardiff_min: f64,
    pub vardiff_max: f64,
}

impl Options {
    pub fn into_config(self) -> Result<Config> {
        let central_wallet = bitcoin::Address::from_str(&self.central_wallet)
            .map_err(|_| {
                error::InvalidTemplateSnafu {
                    reason: format!("invalid central wallet address {}", self.central_wallet),
                }
                .build()
            })?
            .assume_checked()
            .script_pubkey();

        ensure!(
            self.instance_id < 32,
            error::InvalidTemplateSnafu {
                reason: "instance_id must fit in 5 bits".to_string(),
            }
        );

        ensure!(
            self.vardiff_min > 0.0 && self.vardiff_max >= self.vardiff_min,
            error::InvalidTemplateSnafu {
                reason: "vardiff_min must be positive and no greater than vardiff_max".to_string(),
            }
        );

        Ok(Config {
            central_wallet,
            node_rpc_url: self.node_rpc_url,
            node_rpc_user: self.node_rpc_user,
            node_rpc_password: self.node_rpc_password,
            instance_id: self.instance_id,
            coinbase_extras: self.coinbase_extras.into_bytes(),
            prevhash_refresh: std::time::Duration::from_secs(self.prevhash_refresh_interval_s),
            merkle_refresh: std::time::Duration::from_secs(self.merkle_refresh_interval_s),
            vardiff_min: self.vardiff_min,
            vardiff_max: self.vardiff_max,
        })
    }
}
