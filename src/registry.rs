//! The template registry: the single-owner store of in-flight jobs, the
//! entry point for refreshing templates from the node and for validating
//! share submissions against them.

use {
    super::*,
    bitcoin::{Amount, ScriptBuf},
    std::collections::HashMap,
};

/// Per-connection state the session layer owns and passes in by
/// reference; the registry never stores it.
#[derive(Debug, Clone)]
pub struct Session {
    pub extranonce1: primitives::Extranonce,
    pub difficulty: primitives::Difficulty,
    /// The job id and difficulty a share is still allowed to be accepted
    /// against for one retarget after `difficulty` changes.
    pub previous_job: Option<(primitives::JobId, primitives::Difficulty)>,
}

impl Session {
    pub fn new(extranonce1: primitives::Extranonce, difficulty: primitives::Difficulty) -> Self {
        Session {
            extranonce1,
            difficulty,
            previous_job: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Accepted,
    Block { block_hex: String },
}

pub struct TemplateRegistry<N: node::NodeClient> {
    node: N,
    coinbase_builder: coinbase::CoinbaseBuilder,
    extranonce_counter: extranonce_counter::ExtranonceCounter,
    prevhashes: HashMap<primitives::PrevHash, Vec<primitives::JobId>>,
    jobs: HashMap<primitives::JobId, block_template::BlockTemplate>,
    last_block: Option<primitives::PrevHash>,
    next_job_id: primitives::JobId,
    update_in_progress: bool,
    last_broadcast_args: Option<block_template::Notify>,
}

impl<N: node::NodeClient> TemplateRegistry<N> {
    pub fn new(node: N, coinbase_builder: coinbase::CoinbaseBuilder, instance_id: u8) -> Self {
        TemplateRegistry {
            node,
            coinbase_builder,
            extranonce_counter: extranonce_counter::ExtranonceCounter::new(instance_id),
            prevhashes: HashMap::new(),
            jobs: HashMap::new(),
            last_block: None,
            next_job_id: primitives::JobId::first(),
            update_in_progress: false,
            last_broadcast_args: None,
        }
    }

    pub fn new_extranonce1(&mut self) -> primitives::Extranonce {
        self.extranonce_counter.next()
    }

    #[cfg(test)]
    fn set_update_in_progress(&mut self, value: bool) {
        self.update_in_progress = value;
    }

    pub fn last_broadcast_args(&self) -> Option<&block_template::Notify> {
        self.last_broadcast_args.as_ref()
    }

    pub fn get_job(&self, job_id: primitives::JobId) -> Option<&block_template::BlockTemplate> {
        self.jobs.get(&job_id)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Cheaply checks the node's chain tip without fetching a full
    /// template. Used by the updater's fast cadence to decide whether a
    /// full `update_block` is warranted.
    pub async fn best_block_hash_changed(&self) -> Result<bool> {
        let best = self.node.get_best_block_hash().await?;
        let best: primitives::PrevHash = best.parse()?;
        Ok(self.last_block != Some(best))
    }

    /// Fetches a fresh template from the node and registers it as a new
    /// job. A single-flight guard (`update_in_progress`) means overlapping
    /// calls return `Ok(None)` instead of racing each other; this is only
    /// safe because the registry is owned by one task (see the crate's
    /// concurrency notes).
    pub async fn update_block(&mut self) -> Result<Option<block_template::Notify>> {
        if self.update_in_progress {
            debug!("template update already in progress, skipping");
            return Ok(None);
        }

        self.update_in_progress = true;
        let result = self.fetch_and_register().await;
        self.update_in_progress = false;

        if let Err(error) = &result {
            warn!("failed to refresh block template: {error}");
        }

        result
    }

    async fn fetch_and_register(&mut self) -> Result<Option<block_template::Notify>> {
        let gbt = self.node.get_block_template().await?;

        let previous_block_hash: primitives::PrevHash = gbt.previous_block_hash.parse()?;
        let clean_jobs = self.last_block != Some(previous_block_hash);

        let masternodes = gbt
            .masternode
            .iter()
            .map(|payout| {
                Ok(coinbase::MasternodePayout {
                    script_pubkey: coinbase::masternode_script_pubkey(&payout.payee)?,
                    amount: Amount::from_sat(payout.amount),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let transactions = gbt
            .transactions
            .iter()
            .map(|tx| {
                let data = hex::decode(&tx.data).context(error::HexSnafu)?;
                block_template::BlockTemplate::decode_raw_transaction(&data, Amount::from_sat(tx.fee.unsigned_abs()))
            })
            .collect::<Result<Vec<_>>>()?;

        let payload = gbt
            .coinbase_payload
            .as_deref()
            .map(hex::decode)
            .transpose()
            .context(error::HexSnafu)?
            .unwrap_or_default();

        let aux_flags = gbt
            .coinbaseaux
            .get("flags")
            .map(|flags| hex::decode(flags))
            .transpose()
            .context(error::HexSnafu)?
            .unwrap_or_default();

        let mut coinbase_builder = self.coinbase_builder.clone();
        coinbase_builder.aux_flags = aux_flags;

        let template = block_template::BlockTemplate::fill_from_node(
            gbt.height,
            previous_block_hash,
            Amount::from_sat(gbt.coinbasevalue),
            gbt.bits.parse()?,
            primitives::Ntime::from(gbt.curtime),
            primitives::Version::from(gbt.version),
            transactions,
            masternodes,
            payload,
            &coinbase_builder,
        )?;

        let job_id = self.next_job_id;
        self.next_job_id = self.next_job_id.next();

        if clean_jobs {
            debug!(height = gbt.height, "new block detected, evicting stale jobs");
            self.jobs.clear();
            self.prevhashes.clear();
            self.last_block = Some(previous_block_hash);
        }

        self.jobs.insert(job_id, template);
        self.prevhashes.entry(previous_block_hash).or_default().push(job_id);

        let notify = self.jobs[&job_id].build_broadcast_args(job_id, clean_jobs);
        self.last_broadcast_args = Some(notify.clone());

        Ok(Some(notify))
    }

    /// Validates a share against the job it claims, accounting for the
    /// one-retarget grace window, and forwards a found block upstream.
    pub async fn submit_share(
        &mut self,
        session: &mut Session,
        job_id: primitives::JobId,
        extranonce2: primitives::Extranonce,
        ntime: primitives::Ntime,
        nonce: primitives::Nonce,
    ) -> Result<ShareOutcome> {
        let template = self
            .jobs
            .get_mut(&job_id)
            .context(error::StaleOrUnknownJobSnafu { job_id })?;

        template.check_ntime(job_id, ntime)?;
        template.register_submit(job_id, session.extranonce1.clone(), extranonce2.clone(), ntime, nonce)?;

        let pow_hash = template.pow_hash(&session.extranonce1, &extranonce2, ntime, nonce)?;
        let pow_value = hash::hash_to_u256(&pow_hash);

        // A share that misses the session's current target is still
        // accepted if it was valid under the difficulty in effect for an
        // older job (prev_jobid < job_id): a vardiff retarget can raise
        // the session's difficulty while a share mined against the
        // easier, pre-retarget target is still in flight.
        let accepted = pow_value <= session.difficulty.to_target()
            || session
                .previous_job
                .is_some_and(|(prev_job_id, prev_difficulty)| {
                    prev_job_id < job_id && pow_value <= prev_difficulty.to_target()
                });

        ensure!(accepted, error::LowDifficultySnafu);

        session.previous_job = Some((job_id, session.difficulty));

        if template.meets_network_target(&pow_hash) {
            let block_hex = hex::encode(template.finalize(&session.extranonce1, &extranonce2, ntime, nonce));

            match self.node.submit_block(&block_hex).await {
                Ok(None) => info!(%job_id, "block accepted by node"),
                Ok(Some(reason)) => error!(%job_id, reason, "node rejected submitted block"),
                Err(error) => error!(%job_id, %error, "failed to submit block to node"),
            }

            Ok(ShareOutcome::Block { block_hex })
        } else {
            Ok(ShareOutcome::Accepted)
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        bitcoin::ScriptBuf,
        node::mock::MockNodeClient,
    };

    fn coinbase_builder() -> coinbase::CoinbaseBuilder {
        coinbase::CoinbaseBuilder {
            central_wallet: ScriptBuf::from_hex("76a914000000000000000000000000000000000000000088ac").unwrap(),
            aux_flags: vec![],
            pool_tag: b"/pool/".to_vec(),
            extranonce1_len: 4,
            extranonce2_len: 4,
        }
    }

    fn sample_gbt(prevhash: &str) -> node::GetBlockTemplateResult {
        node::GetBlockTemplateResult {
            height: 100,
            previous_block_hash: prevhash.to_string(),
            coinbasevalue: 5_000_000_000,
            bits: "1e0ffff0".to_string(),
            curtime: 1_700_000_000,
            version: 1,
            transactions: vec![],
            coinbaseaux: Default::default(),
            masternode: vec![],
            coinbase_payload: None,
        }
    }

    #[tokio::test]
    async fn update_block_registers_a_new_job() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);

        let notify = registry.update_block().await.unwrap();
        assert!(notify.is_some());
        assert_eq!(registry.job_count(), 1);
        assert!(registry.last_broadcast_args().is_some());
    }

    #[tokio::test]
    async fn update_block_is_a_no_op_while_one_is_in_flight() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);

        registry.set_update_in_progress(true);
        let notify = registry.update_block().await.unwrap();
        assert!(notify.is_none());
        assert_eq!(registry.job_count(), 0);
    }

    #[tokio::test]
    async fn second_update_with_same_prevhash_does_not_evict_jobs() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        mock.push_template(sample_gbt(&"11".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);

        registry.update_block().await.unwrap();
        let notify = registry.update_block().await.unwrap().unwrap();
        assert!(!notify.clean_jobs);
        assert_eq!(registry.job_count(), 2);
    }

    #[tokio::test]
    async fn new_prevhash_evicts_prior_jobs() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        mock.push_template(sample_gbt(&"22".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);

        registry.update_block().await.unwrap();
        let notify = registry.update_block().await.unwrap().unwrap();
        assert!(notify.clean_jobs);
        assert_eq!(registry.job_count(), 1);
    }

    #[tokio::test]
    async fn stale_job_submission_is_rejected() {
        let mock = MockNodeClient::new();
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);
        let mut session = Session::new(primitives::Extranonce::zeroed(4), primitives::Difficulty::new(1.0));

        let result = registry
            .submit_share(
                &mut session,
                primitives::JobId::first(),
                primitives::Extranonce::zeroed(4),
                primitives::Ntime::from(0),
                primitives::Nonce::from(0),
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn low_difficulty_share_is_rejected_without_a_grace_job() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);
        registry.update_block().await.unwrap();

        // An astronomically high difficulty makes the target tiny enough
        // that essentially no real hash will satisfy it.
        let mut session = Session::new(primitives::Extranonce::zeroed(4), primitives::Difficulty::new(1e30));

        let result = registry
            .submit_share(
                &mut session,
                primitives::JobId::first(),
                primitives::Extranonce::zeroed(4),
                primitives::Ntime::from(1_700_000_000),
                primitives::Nonce::from(0),
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn grace_window_accepts_share_against_prior_job_after_retarget() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        mock.push_template(sample_gbt(&"11".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);

        registry.update_block().await.unwrap();
        registry.update_block().await.unwrap();

        let mut session = Session::new(primitives::Extranonce::zeroed(4), primitives::Difficulty::new(1.0));
        // simulate the client having already been validated against the
        // first job at a low difficulty, then the operator retargeting it
        // upward before a share for the second (current) job arrives
        session.previous_job = Some((primitives::JobId::first(), primitives::Difficulty::new(1.0)));
        session.difficulty = primitives::Difficulty::new(1e30);

        let result = registry
            .submit_share(
                &mut session,
                primitives::JobId::first().next(),
                primitives::Extranonce::zeroed(4),
                primitives::Ntime::from(1_700_000_000),
                primitives::Nonce::from(0),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn best_block_hash_changed_is_false_until_a_new_tip_appears() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);

        // no block registered yet, so the node's initial tip counts as a change
        assert!(registry.best_block_hash_changed().await.unwrap());

        registry.update_block().await.unwrap();
        registry.node.set_best_block_hash("11".repeat(32));
        assert!(!registry.best_block_hash_changed().await.unwrap());

        registry.node.set_best_block_hash("22".repeat(32));
        assert!(registry.best_block_hash_changed().await.unwrap());
    }

    #[tokio::test]
    async fn grace_window_does_not_apply_when_prior_job_is_not_older() {
        let mock = MockNodeClient::new();
        mock.push_template(sample_gbt(&"11".repeat(32)));
        let mut registry = TemplateRegistry::new(mock, coinbase_builder(), 1);
        registry.update_block().await.unwrap();

        let mut session = Session::new(primitives::Extranonce::zeroed(4), primitives::Difficulty::new(1e30));
        // prev_job_id == job_id, so the `prev_jobid < job_id` condition
        // from the spec does not hold and no grace is granted
        session.previous_job = Some((primitives::JobId::first(), primitives::Difficulty::new(1.0)));

        let result = registry
            .submit_share(
                &mut session,
                primitives::JobId::first(),
                primitives::Extranonce::zeroed(4),
                primitives::Ntime::from(1_700_000_000),
                primitives::Nonce::from(0),
            )
            .await;

        assert!(result.is_err());
    }
}
