//! Coinbase transaction assembly: the BIP34 height push, masternode
//! payouts, the optional DIP2-style special-transaction payload, and the
//! extranonce splice point every job's `coinb1`/`coinb2` pair is built
//! around.

use {
    super::*,
    bitcoin::{
        absolute::LockTime,
        opcodes::all::OP_CHECKSIG,
        script::{Builder, PushBytesBuf},
        transaction::Version,
        Address, Amount, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
    },
    std::str::FromStr,
};

/// The 8-byte value spliced out of the finished scriptSig and replaced
/// with `extranonce1 || extranonce2` for each job. Chosen to be
/// implausible as incidental script data so it is safe to locate by exact
/// byte match.
const EXTRANONCE_PLACEHOLDER: [u8; 8] = [0xf0, 0x00, 0x00, 0x0f, 0xf1, 0x11, 0x11, 0x1f];

/// A masternode (or treasury/superblock) payout baked into the coinbase
/// outputs alongside the pool's own payout.
#[derive(Debug, Clone)]
pub struct MasternodePayout {
    pub script_pubkey: ScriptBuf,
    pub amount: Amount,
}

/// Derives the scriptPubKey a masternode's `payee` field pays to: a 66-hex
/// compressed pubkey becomes a P2PK script, anything else is parsed as an
/// address (P2PKH).
pub fn masternode_script_pubkey(payee: &str) -> Result<ScriptBuf> {
    if payee.len() == 66 && payee.bytes().all(|b| b.is_ascii_hexdigit()) {
        let pubkey_bytes = hex::decode(payee).context(error::HexSnafu)?;
        let pubkey = PublicKey::from_slice(&pubkey_bytes).map_err(|_| {
            error::InvalidTemplateSnafu {
                reason: format!("invalid masternode pubkey {payee}"),
            }
            .build()
        })?;
        let push = PushBytesBuf::try_from(pubkey.to_bytes()).map_err(|_| {
            error::InvalidTemplateSnafu {
                reason: "masternode pubkey too large for a single script push".to_string(),
            }
            .build()
        })?;
        Ok(Builder::new().push_slice(push).push_opcode(OP_CHECKSIG).into_script())
    } else {
        Ok(Address::from_str(payee)
            .map_err(|_| {
                error::InvalidTemplateSnafu {
                    reason: format!("invalid masternode payee {payee}"),
                }
                .build()
            })?
            .assume_checked()
            .script_pubkey())
    }
}

#[derive(Debug, Clone)]
pub struct CoinbaseBuilder {
    /// Script the pool's own share of the block reward pays to.
    pub central_wallet: ScriptBuf,
    /// `coinbaseaux.flags` from the node's getblocktemplate response,
    /// concatenated raw into the scriptSig immediately after the height.
    pub aux_flags: Vec<u8>,
    /// A short ASCII signature identifying the pool, length-prefixed into
    /// the scriptSig after the extranonce placeholder.
    pub pool_tag: Vec<u8>,
    pub extranonce1_len: usize,
    pub extranonce2_len: usize,
}

/// The two halves of the serialized coinbase transaction either side of
/// the extranonce splice point, hex-encoded and handed to clients as
/// `coinb1`/`coinb2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinbaseParts {
    pub coinb1: Vec<u8>,
    pub coinb2: Vec<u8>,
}

impl CoinbaseBuilder {
    /// Builds the unsigned coinbase transaction for a template at `height`
    /// and `curtime`, paying `value` total, split between masternode
    /// payouts and the pool's own wallet. `payload` is the DIP2 extra
    /// payload (empty for an ordinary, non-special coinbase).
    pub fn build(
        &self,
        height: u64,
        curtime: primitives::Ntime,
        value: Amount,
        masternodes: &[MasternodePayout],
        payload: &[u8],
    ) -> Result<(CoinbaseParts, Transaction)> {
        ensure!(
            self.extranonce1_len + self.extranonce2_len == EXTRANONCE_PLACEHOLDER.len(),
            error::InvalidTemplateSnafu {
                reason: format!(
                    "extranonce1_len ({}) + extranonce2_len ({}) must equal {}",
                    self.extranonce1_len,
                    self.extranonce2_len,
                    EXTRANONCE_PLACEHOLDER.len()
                ),
            }
        );

        let masternode_total: Amount = masternodes.iter().map(|m| m.amount).sum();
        ensure!(
            masternode_total <= value,
            error::InvalidTemplateSnafu {
                reason: "masternode payouts exceed coinbase value".to_string(),
            }
        );
        let central_value = value - masternode_total;
        ensure!(
            central_value > Amount::ZERO,
            error::InvalidTemplateSnafu {
                reason: "coinbase value must be positive".to_string(),
            }
        );

        let mut script_sig = Vec::new();
        script_sig.extend_from_slice(&serialize::ser_number(height as i64));
        script_sig.extend_from_slice(&self.aux_flags);
        script_sig.extend_from_slice(&serialize::ser_number(curtime.as_u32() as i64));
        script_sig.push(EXTRANONCE_PLACEHOLDER.len() as u8);
        script_sig.extend_from_slice(&EXTRANONCE_PLACEHOLDER);
        script_sig.extend_from_slice(&serialize::ser_string(&self.pool_tag));
        let script_sig = ScriptBuf::from_bytes(script_sig);

        let mut outputs = Vec::with_capacity(masternodes.len() + 1);
        for masternode in masternodes {
            outputs.push(TxOut {
                value: masternode.amount,
                script_pubkey: masternode.script_pubkey.clone(),
            });
        }
        if central_value > Amount::ZERO {
            outputs.push(TxOut {
                value: central_value,
                script_pubkey: self.central_wallet.clone(),
            });
        }

        let version = if payload.is_empty() {
            Version::ONE
        } else {
            // DIP2 special transaction: nType=5 (coinbase) packed into the
            // upper 16 bits of the version field, nVersion=3 in the lower.
            Version(((5i32) << 16) | 3)
        };

        let tx = Transaction {
            version,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig,
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: outputs,
        };

        let serialized = serialize_with_payload(&tx, payload);
        let offset = find_placeholder_offset(&serialized)?;

        let coinb1 = serialized[..offset].to_vec();
        let coinb2 = serialized[offset + EXTRANONCE_PLACEHOLDER.len()..].to_vec();

        Ok((CoinbaseParts { coinb1, coinb2 }, tx))
    }

    /// Splices a specific job's extranonce1/extranonce2 into previously
    /// built coinbase parts and returns the raw transaction bytes, ready
    /// for double-SHA-256 hashing into the coinbase txid.
    pub fn assemble(
        parts: &CoinbaseParts,
        extranonce1: &primitives::Extranonce,
        extranonce2: &primitives::Extranonce,
    ) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(parts.coinb1.len() + extranonce1.len() + extranonce2.len() + parts.coinb2.len());
        out.extend_from_slice(&parts.coinb1);
        out.extend_from_slice(extranonce1.as_bytes());
        out.extend_from_slice(extranonce2.as_bytes());
        out.extend_from_slice(&parts.coinb2);
        out
    }
}

fn serialize_with_payload(tx: &Transaction, payload: &[u8]) -> Vec<u8> {
    let mut bytes = bitcoin::consensus::encode::serialize(tx);
    if !payload.is_empty() {
        bytes.extend_from_slice(&serialize::ser_string(payload));
    }
    bytes
}

fn find_placeholder_offset(haystack: &[u8]) -> Result<usize> {
    let positions: Vec<usize> = haystack
        .windows(EXTRANONCE_PLACEHOLDER.len())
        .enumerate()
        .filter(|(_, window)| *window == EXTRANONCE_PLACEHOLDER)
        .map(|(i, _)| i)
        .collect();

    ensure!(
        positions.len() == 1,
        error::InvalidTemplateSnafu {
            reason: format!(
                "extranonce placeholder must appear exactly once, found {}",
                positions.len()
            ),
        }
    );

    Ok(positions[0])
}
