//! Reputation Indexer - Trust score and trust points rewards
//!
//! Successful escrow milestones bump the counters on the acting user's
//! profile. Amounts are configured here; the store applies them atomically.

use crate::{
    models::{TrustProfile, MAX_TRUST_SCORE},
    store::SharedStore,
    EscrowResult,
};
use serde::Deserialize;
use tracing::debug;

/// Configuration for the reputation indexer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReputationIndexerConfig {
    /// Points awarded to the buyer when an escrow is initiated
    pub initiate_points: i64,
    /// Score awarded when the buyer releases funds
    pub release_score: i32,
    /// Points awarded when the buyer releases funds
    pub release_points: i64,
    /// Maximum trust score
    pub max_score: i32,
}

impl Default for ReputationIndexerConfig {
    fn default() -> Self {
        Self {
            initiate_points: 10,
            release_score: 5,
            release_points: 25,
            max_score: MAX_TRUST_SCORE,
        }
    }
}

/// Applies trust rewards through the escrow store
pub struct ReputationIndexer {
    config: ReputationIndexerConfig,
    store: SharedStore,
}

impl ReputationIndexer {
    /// Create a new reputation indexer
    pub fn new(config: ReputationIndexerConfig, store: SharedStore) -> Self {
        Self { config, store }
    }

    /// Reward for initiating an escrow
    pub async fn reward_initiation(&self, user_id: &str) -> EscrowResult<TrustProfile> {
        debug!("Awarding {} trust points to {}", self.config.initiate_points, user_id);
        Ok(self
            .store
            .adjust_trust(user_id, 0, self.config.max_score, self.config.initiate_points)
            .await?)
    }

    /// Reward for releasing an escrow
    pub async fn reward_release(&self, user_id: &str) -> EscrowResult<TrustProfile> {
        debug!(
            "Awarding +{} score / +{} points to {}",
            self.config.release_score, self.config.release_points, user_id
        );
        Ok(self
            .store
            .adjust_trust(
                user_id,
                self.config.release_score,
                self.config.max_score,
                self.config.release_points,
            )
            .await?)
    }

    /// Current profile, if the user has one
    pub async fn get_profile(&self, user_id: &str) -> EscrowResult<Option<TrustProfile>> {
        Ok(self.store.get_profile(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::INITIAL_TRUST_SCORE;
    use crate::store::InMemoryEscrowStore;
    use std::sync::Arc;

    fn indexer() -> ReputationIndexer {
        ReputationIndexer::new(
            ReputationIndexerConfig::default(),
            Arc::new(InMemoryEscrowStore::new()),
        )
    }

    #[tokio::test]
    async fn test_initiation_awards_points_only() {
        let indexer = indexer();
        let profile = indexer.reward_initiation("buyer").await.unwrap();

        assert_eq!(profile.trust_points, 10);
        assert_eq!(profile.trust_score, INITIAL_TRUST_SCORE);
    }

    #[tokio::test]
    async fn test_release_score_is_capped() {
        let indexer = indexer();
        for _ in 0..20 {
            indexer.reward_release("buyer").await.unwrap();
        }

        let profile = indexer.get_profile("buyer").await.unwrap().unwrap();
        assert_eq!(profile.trust_score, 100);
        assert_eq!(profile.trust_points, 500);
    }
}
