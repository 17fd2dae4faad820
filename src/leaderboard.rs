use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::backend::{BackendResult, Credential, Store};
use crate::models::{initial_of, LeaderboardRow};

pub const LEADERBOARD_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    AllTime,
    Monthly,
    Weekly,
}

impl Frame {
    pub const ALL: [Frame; 3] = [Frame::AllTime, Frame::Monthly, Frame::Weekly];

    pub fn parse(key: &str) -> Self {
        match key {
            "monthly" => Frame::Monthly,
            "weekly" => Frame::Weekly,
            _ => Frame::AllTime,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Frame::AllTime => "all-time",
            Frame::Monthly => "monthly",
            Frame::Weekly => "weekly",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Frame::AllTime => "All Time",
            Frame::Monthly => "Monthly",
            Frame::Weekly => "Weekly",
        }
    }

    /// Start of the window, or `None` for all time.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Frame::AllTime => None,
            Frame::Monthly => Some(now - Duration::days(30)),
            Frame::Weekly => Some(now - Duration::days(7)),
        }
    }
}

pub struct RankedUser {
    pub rank: usize,
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub initial: String,
    pub photo: Option<String>,
    pub points: i64,
    pub is_viewer: bool,
}

impl RankedUser {
    /// CSS modifier for the podium places.
    pub fn badge(&self) -> &'static str {
        match self.rank {
            1 => "gold",
            2 => "silver",
            3 => "bronze",
            _ => "plain",
        }
    }
}

fn rank(rows: Vec<LeaderboardRow>, viewer_id: &str) -> Vec<RankedUser> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let display_name = if row.full_name.trim().is_empty() {
                row.username.clone()
            } else {
                row.full_name.clone()
            };
            RankedUser {
                rank: i + 1,
                initial: initial_of(&display_name),
                is_viewer: row.id == viewer_id,
                photo: row.profile_photo.filter(|p| !p.is_empty()),
                id: row.id,
                username: row.username,
                display_name,
                points: row.points,
            }
        })
        .collect()
}

/// Top users for a frame. All-time ranks by the stored total; the windowed
/// frames rank by ledger points earned inside the window.
pub async fn load(
    store: &dyn Store,
    cred: &Credential,
    frame: Frame,
    viewer_id: &str,
) -> BackendResult<Vec<RankedUser>> {
    let Some(since) = frame.since(Utc::now()) else {
        let rows = store.top_profiles(cred, LEADERBOARD_SIZE).await?;
        return Ok(rank(rows, viewer_id));
    };

    let mut earned: HashMap<String, i64> = HashMap::new();
    for action in store.actions_since(cred, since).await? {
        *earned.entry(action.user_id).or_default() += action.points;
    }
    let mut totals: Vec<(String, i64)> = earned.into_iter().filter(|(_, p)| *p > 0).collect();
    totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    totals.truncate(LEADERBOARD_SIZE);

    let ids: Vec<String> = totals.iter().map(|(id, _)| id.clone()).collect();
    let profiles: HashMap<String, LeaderboardRow> = store
        .profiles_by_ids(cred, &ids)
        .await?
        .into_iter()
        .map(|row| (row.id.clone(), row))
        .collect();

    let rows = totals
        .into_iter()
        .filter_map(|(id, points)| {
            profiles.get(&id).map(|row| LeaderboardRow {
                points,
                ..row.clone()
            })
        })
        .collect();
    Ok(rank(rows, viewer_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, full_name: &str, points: i64) -> LeaderboardRow {
        LeaderboardRow {
            id: id.into(),
            username: format!("user_{id}"),
            full_name: full_name.into(),
            points,
            profile_photo: Some(String::new()),
        }
    }

    #[test]
    fn frame_keys_round_trip() {
        for frame in Frame::ALL {
            assert_eq!(Frame::parse(frame.key()), frame);
        }
        assert_eq!(Frame::parse("yearly"), Frame::AllTime);
    }

    #[test]
    fn ranks_start_at_one_with_podium_badges() {
        let ranked = rank(
            vec![row("a", "Ada", 30), row("b", "", 20), row("c", "Cy", 10), row("d", "Di", 5)],
            "b",
        );
        let badges: Vec<&str> = ranked.iter().map(|r| r.badge()).collect();
        assert_eq!(badges, vec!["gold", "silver", "bronze", "plain"]);
        assert_eq!(ranked[1].display_name, "user_b");
        assert!(ranked[1].is_viewer);
        assert_eq!(ranked[0].photo, None);
    }
}
