//! Block template registry and share-validation core for a scrypt
//! Dash-family Stratum mining pool. Wire framing (`mining.subscribe`,
//! `mining.authorize`, vardiff interpretation) and share accounting are
//! owned by the session layer that embeds this crate; what lives here is
//! everything between "the node produced a template" and "a share either
//! raises a job's difficulty bar or turns into a submitted block".

pub mod block_template;
pub mod coinbase;
pub mod config;
pub mod error;
pub mod extranonce_counter;
pub mod hash;
pub mod merkle;
pub mod node;
pub mod primitives;
pub mod registry;
pub mod serialize;
pub mod updater;

pub use crate::{
    block_template::{BlockTemplate, Notify},
    config::{Config, Options},
    error::Error,
    node::{GetBlockTemplateResult, HttpNodeClient, NodeClient},
    registry::{Session, ShareOutcome, TemplateRegistry},
    updater::BlockUpdater,
};

pub(crate) use crate::error::Result;

pub(crate) use {
    clap::Parser,
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    snafu::{ensure, OptionExt, ResultExt, Snafu},
    tracing::{debug, error, info, warn},
};
