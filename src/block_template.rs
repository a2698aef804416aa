//! The block template itself: the node's `getblocktemplate` response
//! lifted into typed fields, the coinbase built around it, and the
//! operations a job needs over its lifetime (broadcasting, ntime
//! validation, duplicate-submit tracking, and final block assembly).

use {
    super::*,
    bitcoin::{Amount, Txid},
    std::collections::HashSet,
};

/// Shares submitted more than this far past `curtime` are rejected
/// outright, mirroring the node's own future-block-time tolerance.
const MAX_NTIME_DRIFT_SECONDS: u32 = 7200;

#[derive(Debug, Clone)]
pub struct TemplateTransaction {
    pub data: Vec<u8>,
    pub txid: Txid,
    pub fee: Amount,
}

/// Everything needed to broadcast a job and, later, accept shares against
/// it and reassemble the winning block.
#[derive(Debug)]
pub struct BlockTemplate {
    pub height: u64,
    pub previous_block_hash: primitives::PrevHash,
    pub coinbase_value: Amount,
    pub bits: primitives::Nbits,
    pub curtime: primitives::Ntime,
    pub version: primitives::Version,
    pub transactions: Vec<TemplateTransaction>,
    pub masternodes: Vec<coinbase::MasternodePayout>,
    pub coinbase_payload: Vec<u8>,
    coinbase_parts: coinbase::CoinbaseParts,
    merkle_branch: Vec<[u8; 32]>,
    submits: HashSet<(primitives::Extranonce, primitives::Extranonce, primitives::Ntime, primitives::Nonce)>,
}

/// The job broadcast to stratum clients via `mining.notify`. The wire
/// framing of that message is the session layer's concern; this is just
/// the typed payload it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notify {
    pub job_id: primitives::JobId,
    pub prevhash: String,
    pub coinb1: String,
    pub coinb2: String,
    pub merkle_branch: Vec<String>,
    pub version: primitives::Version,
    pub nbits: primitives::Nbits,
    pub ntime: primitives::Ntime,
    pub clean_jobs: bool,
}

impl BlockTemplate {
    /// Builds a template from the node's raw template fields and a
    /// coinbase builder configured with the pool's own payout script.
    pub fn fill_from_node(
        height: u64,
        previous_block_hash: primitives::PrevHash,
        coinbase_value: Amount,
        bits: primitives::Nbits,
        curtime: primitives::Ntime,
        version: primitives::Version,
        transactions: Vec<TemplateTransaction>,
        masternodes: Vec<coinbase::MasternodePayout>,
        coinbase_payload: Vec<u8>,
        coinbase_builder: &coinbase::CoinbaseBuilder,
    ) -> Result<Self> {
        let (coinbase_parts, placeholder_tx) =
            coinbase_builder.build(height, curtime, coinbase_value, &masternodes, &coinbase_payload)?;

        let placeholder_hash = hash::double_sha256(&bitcoin::consensus::encode::serialize(&placeholder_tx));

        let mut leaves = Vec::with_capacity(transactions.len() + 1);
        leaves.push(placeholder_hash);
        leaves.extend(transactions.iter().map(|tx| *bitcoin::hashes::Hash::as_byte_array(&tx.txid)));

        let merkle_branch = merkle::merkle_branch(&leaves);

        Ok(BlockTemplate {
            height,
            previous_block_hash,
            coinbase_value,
            bits,
            curtime,
            version,
            transactions,
            masternodes,
            coinbase_payload,
            coinbase_parts,
            merkle_branch,
            submits: HashSet::new(),
        })
    }

    /// The job broadcast to clients, `clean_jobs` set by the caller
    /// depending on whether this template replaces the tip or merely
    /// extends the transaction set of the current one.
    pub fn build_broadcast_args(&self, job_id: primitives::JobId, clean_jobs: bool) -> Notify {
        Notify {
            job_id,
            prevhash: self.previous_block_hash.wire_hex(),
            coinb1: hex::encode(&self.coinbase_parts.coinb1),
            coinb2: hex::encode(&self.coinbase_parts.coinb2),
            merkle_branch: self.merkle_branch.iter().map(hex::encode).collect(),
            version: self.version,
            nbits: self.bits,
            ntime: self.curtime,
            clean_jobs,
        }
    }

    /// Rejects shares whose ntime falls outside `[curtime, now + drift]`,
    /// independent of and prior to the proof-of-work check. The upper bound
    /// tracks the wall clock rather than the template's `curtime`, so a
    /// long-lived job doesn't retroactively narrow the window a share can
    /// still land in.
    pub fn check_ntime(&self, job_id: primitives::JobId, ntime: primitives::Ntime) -> Result<()> {
        let max = primitives::Ntime::from(primitives::Ntime::now().as_u32().saturating_add(MAX_NTIME_DRIFT_SECONDS));
        ensure!(
            ntime >= self.curtime && ntime <= max,
            error::NtimeOutOfRangeSnafu { job_id, ntime }
        );
        Ok(())
    }

    /// Records a share submission, rejecting exact repeats. Duplicate
    /// detection is per-template since extranonce2/ntime/nonce tuples are
    /// only unique within the job they were issued against.
    pub fn register_submit(
        &mut self,
        job_id: primitives::JobId,
        extranonce1: primitives::Extranonce,
        extranonce2: primitives::Extranonce,
        ntime: primitives::Ntime,
        nonce: primitives::Nonce,
    ) -> Result<()> {
        ensure!(
            self.submits.insert((extranonce1, extranonce2, ntime, nonce)),
            error::DuplicateSnafu { job_id }
        );
        Ok(())
    }

    /// Builds the 80-byte block header for a specific share's extranonces,
    /// ntime and nonce.
    pub fn serialize_header(
        &self,
        extranonce1: &primitives::Extranonce,
        extranonce2: &primitives::Extranonce,
        ntime: primitives::Ntime,
        nonce: primitives::Nonce,
    ) -> [u8; 80] {
        let coinbase_bytes = coinbase::CoinbaseBuilder::assemble(&self.coinbase_parts, extranonce1, extranonce2);
        let coinbase_hash = hash::double_sha256(&coinbase_bytes);
        let merkle_root = merkle::root_with_first(coinbase_hash, &self.merkle_branch);

        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&self.version.as_i32().to_le_bytes());
        header[4..36].copy_from_slice(&self.previous_block_hash.as_byte_array());
        header[36..68].copy_from_slice(&merkle_root);
        header[68..72].copy_from_slice(&ntime.as_u32().to_le_bytes());
        header[72..76].copy_from_slice(&bitcoin::CompactTarget::from(self.bits).to_consensus().to_le_bytes());
        header[76..80].copy_from_slice(&nonce.as_u32().to_le_bytes());
        header
    }

    /// Fully serializes the winning block (header, coinbase, and every
    /// other template transaction) ready for `submitblock`.
    pub fn finalize(
        &self,
        extranonce1: &primitives::Extranonce,
        extranonce2: &primitives::Extranonce,
        ntime: primitives::Ntime,
        nonce: primitives::Nonce,
    ) -> Vec<u8> {
        let header = self.serialize_header(extranonce1, extranonce2, ntime, nonce);
        let coinbase_bytes = coinbase::CoinbaseBuilder::assemble(&self.coinbase_parts, extranonce1, extranonce2);

        let mut block = Vec::new();
        block.extend_from_slice(&header);
        block.extend_from_slice(&serialize::ser_varint((self.transactions.len() + 1) as u64));
        block.extend_from_slice(&coinbase_bytes);
        for tx in &self.transactions {
            block.extend_from_slice(&tx.data);
        }
        block
    }

    /// Verifies a share's proof of work against a target, returning the
    /// scrypt hash so callers can additionally compare it against the
    /// network target to detect a block.
    pub fn pow_hash(
        &self,
        extranonce1: &primitives::Extranonce,
        extranonce2: &primitives::Extranonce,
        ntime: primitives::Ntime,
        nonce: primitives::Nonce,
    ) -> Result<[u8; 32]> {
        let header = self.serialize_header(extranonce1, extranonce2, ntime, nonce);
        hash::scrypt_pow_hash(&header)
    }

    pub fn meets_network_target(&self, pow_hash: &[u8; 32]) -> bool {
        hash::hash_to_u256(pow_hash) <= hash::target_to_u256(self.bits.target())
    }

    /// Decodes one of the node-supplied raw transactions, attaching the
    /// fee the node reported for it (not recoverable from the raw bytes
    /// alone).
    pub fn decode_raw_transaction(data: &[u8], fee: Amount) -> Result<TemplateTransaction> {
        let tx: bitcoin::Transaction =
            bitcoin::consensus::deserialize(data).map_err(|source| error::ConsensusSnafu { source }.build())?;
        Ok(TemplateTransaction {
            txid: tx.compute_txid(),
            data: data.to_vec(),
            fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, bitcoin::ScriptBuf};

    fn coinbase_builder() -> coinbase::CoinbaseBuilder {
        coinbase::CoinbaseBuilder {
            central_wallet: ScriptBuf::from_hex("76a914000000000000000000000000000000000000000088ac").unwrap(),
            aux_flags: vec![],
            pool_tag: b"/pool/".to_vec(),
            extranonce1_len: 4,
            extranonce2_len: 4,
        }
    }

    fn template() -> BlockTemplate {
        BlockTemplate::fill_from_node(
            100,
            primitives::PrevHash::from(<bitcoin::BlockHash as bitcoin::hashes::Hash>::all_zeros()),
            Amount::from_sat(5_000_000_000),
            primitives::Nbits::from(bitcoin::CompactTarget::from_consensus(0x1e0ffff0)),
            primitives::Ntime::from(1_700_000_000),
            primitives::Version::from(1),
            vec![],
            vec![],
            vec![],
            &coinbase_builder(),
        )
        .unwrap()
    }

    fn e(bytes: [u8; 4]) -> primitives::Extranonce {
        primitives::Extranonce::new(bytes.to_vec())
    }

    #[test]
    fn ntime_within_window_is_accepted() {
        let t = template();
        assert!(t.check_ntime(primitives::JobId::first(), t.curtime).is_ok());
    }

    #[test]
    fn ntime_before_curtime_is_rejected() {
        let t = template();
        let too_early = primitives::Ntime::from(t.curtime.as_u32() - 1);
        assert!(t.check_ntime(primitives::JobId::first(), too_early).is_err());
    }

    #[test]
    fn ntime_far_in_the_future_is_rejected() {
        let t = template();
        let too_late = primitives::Ntime::from(u32::MAX);
        assert!(t.check_ntime(primitives::JobId::first(), too_late).is_err());
    }

    #[test]
    fn duplicate_submit_is_rejected() {
        let mut t = template();
        let job_id = primitives::JobId::first();
        let ntime = t.curtime;
        let nonce = primitives::Nonce::from(1);

        assert!(t
            .register_submit(job_id, e([0; 4]), e([0; 4]), ntime, nonce)
            .is_ok());
        assert!(t
            .register_submit(job_id, e([0; 4]), e([0; 4]), ntime, nonce)
            .is_err());
    }

    #[test]
    fn distinct_submits_are_both_accepted() {
        let mut t = template();
        let job_id = primitives::JobId::first();
        let ntime = t.curtime;

        assert!(t
            .register_submit(job_id, e([0; 4]), e([0; 4]), ntime, primitives::Nonce::from(1))
            .is_ok());
        assert!(t
            .register_submit(job_id, e([0; 4]), e([0; 4]), ntime, primitives::Nonce::from(2))
            .is_ok());
    }

    #[test]
    fn header_is_80_bytes_and_fields_round_trip() {
        let t = template();
        let header = t.serialize_header(&e([1, 2, 3, 4]), &e([5, 6, 7, 8]), t.curtime, primitives::Nonce::from(0x1234));
        assert_eq!(header.len(), 80);
        assert_eq!(u32::from_le_bytes(header[68..72].try_into().unwrap()), t.curtime.as_u32());
        assert_eq!(u32::from_le_bytes(header[76..80].try_into().unwrap()), 0x1234);
    }

    #[test]
    fn finalize_includes_coinbase_and_tx_count() {
        let t = template();
        let block = t.finalize(&e([0; 4]), &e([0; 4]), t.curtime, primitives::Nonce::from(0));
        assert_eq!(block.len(), 80 + 1 /* varint(1) */ + {
            let coinbase = coinbase::CoinbaseBuilder::assemble(&t.coinbase_parts, &e([0; 4]), &e([0; 4]));
            coinbase.len()
        });
    }

    #[test]
    fn broadcast_args_carries_the_given_job_id_and_clean_flag() {
        let t = template();
        let notify = t.build_broadcast_args(primitives::JobId::first().next(), true);
        assert_eq!(notify.job_id, primitives::JobId::first().next());
        assert!(notify.clean_jobs);
        assert_eq!(notify.merkle_branch.len(), 0);
    }
}
