//! Follow score tracking
//!
//! Delivery outcomes move the score of the follow edges behind an inbox.
//! Edges that reach zero are evicted by the periodic sweep; successes restore
//! credit up to the ceiling.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ScoreConfig;
use crate::data::{follows, Database};
use crate::data::follows::ScoreBounds;
use crate::error::AppError;

/// Edges examined per eviction batch
const EVICTION_BATCH: i64 = 500;

pub struct ScoreTracker {
    db: Arc<Database>,
    config: ScoreConfig,
    /// Follower in instance-to-instance follows
    system_actor_id: String,
}

impl ScoreTracker {
    pub fn new(db: Arc<Database>, config: ScoreConfig, system_actor_id: String) -> Self {
        Self {
            db,
            config,
            system_actor_id,
        }
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    fn bounds(&self) -> ScoreBounds {
        ScoreBounds {
            floor: self.config.floor,
            max: self.config.max,
        }
    }

    fn record(delta: i64, edges: u64) {
        let direction = if delta >= 0 { "bonus" } else { "penalty" };
        crate::metrics::SCORE_UPDATES_TOTAL
            .with_label_values(&[direction])
            .inc_by(edges);
    }

    /// Add `delta` to every edge reached through `inbox_url`, clamped to
    /// `[floor, max]`
    pub async fn bump(&self, inbox_url: &str, delta: i64) -> Result<u64, AppError> {
        let bounds = self.bounds();
        let updated = self
            .db
            .transaction("score_bump", |mut tx| async move {
                let updated = follows::update_score_by_inbox(&mut *tx, inbox_url, delta, bounds).await?;
                Ok((tx, updated))
            })
            .await?;

        Self::record(delta, updated);
        Ok(updated)
    }

    /// Penalize instance follows of actors hosted on `server_ids`
    pub async fn penalize(&self, server_ids: &[String]) -> Result<u64, AppError> {
        self.adjust_following_servers(server_ids, self.config.penalty)
            .await
    }

    /// Reward instance follows of actors hosted on `server_ids`
    pub async fn reward(&self, server_ids: &[String]) -> Result<u64, AppError> {
        self.adjust_following_servers(server_ids, self.config.bonus)
            .await
    }

    async fn adjust_following_servers(
        &self,
        server_ids: &[String],
        delta: i64,
    ) -> Result<u64, AppError> {
        if server_ids.is_empty() {
            return Ok(0);
        }

        let bounds = self.bounds();
        let follower = self.system_actor_id.as_str();
        let updated = self
            .db
            .transaction("score_servers", |mut tx| async move {
                let updated = follows::update_score_by_following_servers(
                    &mut *tx, follower, server_ids, delta, bounds,
                )
                .await?;
                Ok((tx, updated))
            })
            .await?;

        Self::record(delta, updated);
        Ok(updated)
    }

    /// Apply a batch of delivery results, one net adjustment per inbox
    pub async fn record_delivery_outcomes(
        &self,
        succeeded: &[String],
        failed: &[String],
    ) -> Result<u64, AppError> {
        let mut deltas: BTreeMap<&str, i64> = BTreeMap::new();
        for inbox in succeeded {
            *deltas.entry(inbox.as_str()).or_default() += self.config.bonus;
        }
        for inbox in failed {
            *deltas.entry(inbox.as_str()).or_default() += self.config.penalty;
        }
        deltas.retain(|_, delta| *delta != 0);

        if deltas.is_empty() {
            return Ok(0);
        }

        let bounds = self.bounds();
        let deltas = &deltas;
        let updated = self
            .db
            .transaction("score_outcomes", |mut tx| async move {
                let mut updated = 0;
                for (inbox, delta) in deltas {
                    updated += follows::update_score_by_inbox(&mut *tx, inbox, *delta, bounds).await?;
                }
                Ok((tx, updated))
            })
            .await?;

        for delta in deltas.values() {
            Self::record(*delta, 1);
        }

        tracing::debug!(
            inboxes = deltas.len(),
            edges = updated,
            "Applied delivery outcomes to follow scores"
        );
        Ok(updated)
    }

    /// Remove every edge whose score reached zero
    ///
    /// Each edge is removed in its own transaction through the follow store,
    /// so counts are rebuilt. Returns the number of edges removed.
    pub async fn evict_bad_follows(&self) -> Result<usize, AppError> {
        let mut evicted = 0;

        loop {
            let bad = follows::list_bad(self.db.pool(), EVICTION_BATCH).await?;
            if bad.is_empty() {
                break;
            }

            let batch_len = bad.len();
            for edge in &bad {
                let removed = self
                    .db
                    .transaction("evict_follow", |mut tx| async move {
                        let removed = follows::remove(&mut tx, edge).await?;
                        Ok((tx, removed))
                    })
                    .await?;

                if removed {
                    evicted += 1;
                    tracing::info!(
                        edge_id = %edge.id,
                        actor = %edge.actor_id,
                        target = %edge.target_actor_id,
                        score = edge.score,
                        "Evicted follow with exhausted score"
                    );
                }
            }

            if (batch_len as i64) < EVICTION_BATCH {
                break;
            }
        }

        crate::metrics::FOLLOW_EVICTIONS_TOTAL.inc_by(evicted as u64);
        crate::metrics::FOLLOW_EDGES.set(follows::count_edges(self.db.pool()).await?);

        if evicted > 0 {
            tracing::info!(evicted, "Follow eviction sweep finished");
        }
        Ok(evicted)
    }
}
