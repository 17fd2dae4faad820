//! Points ledger and level math.
//!
//! The `actions` table is the ledger. A user's `points` column is a cache of
//! the ledger sum, rewritten after every ledger insert.

use crate::backend::{BackendResult, Credential, Store};
use crate::models::{Action, NewAction, ProfileUpdate};

pub const POST_CREATED_POINTS: i64 = 10;
pub const POST_DELETED_POINTS: i64 = -10;
pub const POINTS_PER_LEVEL: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    PostCreated,
    PostDeleted,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::PostCreated => "post_created",
            ActionKind::PostDeleted => "post_deleted",
        }
    }

    pub fn points(&self) -> i64 {
        match self {
            ActionKind::PostCreated => POST_CREATED_POINTS,
            ActionKind::PostDeleted => POST_DELETED_POINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    pub points: i64,
    pub level: i64,
    pub next_threshold: i64,
    /// Percent of the way through the current level, 0..100.
    pub progress: i64,
    pub to_next: i64,
}

impl LevelProgress {
    pub fn from_points(points: i64) -> Self {
        // A ledger can dip below zero if deletes outnumber creates.
        let counted = points.max(0);
        let level = counted / POINTS_PER_LEVEL + 1;
        let next_threshold = level * POINTS_PER_LEVEL;
        Self {
            points,
            level,
            next_threshold,
            progress: counted % POINTS_PER_LEVEL * 100 / POINTS_PER_LEVEL,
            to_next: next_threshold - counted,
        }
    }
}

/// Append a ledger entry, then rewrite the user's cached total.
///
/// A failed total rewrite is logged and left for the next ledger write to
/// heal; the entry itself is the source of truth.
pub async fn record_action(
    store: &dyn Store,
    cred: &Credential,
    user_id: &str,
    kind: ActionKind,
    description: String,
    post_id: Option<String>,
) -> BackendResult<Action> {
    let action = store
        .insert_action(
            cred,
            &NewAction {
                user_id: user_id.to_string(),
                action_type: kind.as_str().to_string(),
                description,
                points: kind.points(),
                post_id,
            },
        )
        .await?;
    tracing::info!(
        "Recorded {} ({:+}) for user {}",
        kind.as_str(),
        action.points,
        user_id
    );

    if let Err(e) = sync_total(store, cred, user_id).await {
        tracing::warn!("Failed to sync point total for {}: {}", user_id, e);
    }
    Ok(action)
}

/// Recompute `users.points` from the ledger. Returns the new total.
pub async fn sync_total(store: &dyn Store, cred: &Credential, user_id: &str) -> BackendResult<i64> {
    let total = store.ledger_total(cred, user_id).await?;
    store
        .update_profile(
            cred,
            user_id,
            &ProfileUpdate {
                points: Some(total),
                ..Default::default()
            },
        )
        .await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_step_every_hundred_points() {
        let levels: Vec<i64> = [0, 99, 100, 250]
            .iter()
            .map(|p| LevelProgress::from_points(*p).level)
            .collect();
        assert_eq!(levels, vec![1, 1, 2, 3]);
    }

    #[test]
    fn progress_and_threshold_for_250() {
        let progress = LevelProgress::from_points(250);
        assert_eq!(progress.progress, 50);
        assert_eq!(progress.next_threshold, 300);
        assert_eq!(progress.to_next, 50);
    }

    #[test]
    fn negative_totals_stay_on_level_one() {
        let progress = LevelProgress::from_points(-10);
        assert_eq!(progress.level, 1);
        assert_eq!(progress.progress, 0);
        assert_eq!(progress.points, -10);
    }

    #[test]
    fn action_kinds_carry_signed_points() {
        assert_eq!(ActionKind::PostCreated.points(), 10);
        assert_eq!(ActionKind::PostDeleted.points(), -10);
        assert_eq!(ActionKind::PostDeleted.as_str(), "post_deleted");
    }
}
