use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parkbeat_relay_types::{
    ContributionKind, ContributionSummary, ProjectContribution, TopContributor,
};

const RECENT_LIMIT: usize = 10;

/// Deterministic contribution rollup. Funding amounts are summed per user;
/// ranking ties break toward the user whose first contribution came earliest.
pub fn summarize(contributions: &[ProjectContribution]) -> ContributionSummary {
    let mut totals: HashMap<&str, i64> = HashMap::new();
    let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut contributors: Vec<&str> = Vec::new();
    let mut total_amount_cents = 0i64;

    for contribution in contributions {
        if !contributors.contains(&contribution.user_id.as_str()) {
            contributors.push(&contribution.user_id);
        }
        first_seen
            .entry(&contribution.user_id)
            .and_modify(|seen| {
                if contribution.created_at < *seen {
                    *seen = contribution.created_at;
                }
            })
            .or_insert(contribution.created_at);
        if contribution.kind == ContributionKind::Funding {
            let amount = contribution.amount_cents.unwrap_or(0);
            total_amount_cents += amount;
            *totals.entry(&contribution.user_id).or_default() += amount;
        }
    }

    let mut top_contributors: Vec<TopContributor> = totals
        .into_iter()
        .map(|(user_id, amount_cents)| TopContributor {
            user_id: user_id.to_string(),
            amount_cents,
        })
        .collect();
    top_contributors.sort_by(|a, b| {
        b.amount_cents
            .cmp(&a.amount_cents)
            .then_with(|| first_seen[a.user_id.as_str()].cmp(&first_seen[b.user_id.as_str()]))
    });

    let mut recent: Vec<ProjectContribution> = contributions.to_vec();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    recent.truncate(RECENT_LIMIT);

    ContributionSummary {
        total_amount_cents,
        contributor_count: contributors.len() as u64,
        top_contributors,
        recent_contributions: recent,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn funding(id: &str, user: &str, cents: i64, minute: u32) -> ProjectContribution {
        ProjectContribution {
            id: id.into(),
            project_id: "p1".into(),
            user_id: user.into(),
            kind: ContributionKind::Funding,
            amount_cents: Some(cents),
            message: None,
            created_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    fn social(id: &str, user: &str, minute: u32) -> ProjectContribution {
        ProjectContribution {
            id: id.into(),
            project_id: "p1".into(),
            user_id: user.into(),
            kind: ContributionKind::Social,
            amount_cents: None,
            message: Some("count me in".into()),
            created_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn sums_funding_and_counts_distinct_contributors() {
        let summary = summarize(&[
            funding("c1", "ana", 500, 0),
            funding("c2", "ben", 300, 1),
            funding("c3", "ana", 200, 2),
            social("c4", "cam", 3),
        ]);
        assert_eq!(summary.total_amount_cents, 1000);
        assert_eq!(summary.contributor_count, 3);
    }

    #[test]
    fn ranks_by_amount_with_earliest_first_contribution_breaking_ties() {
        let summary = summarize(&[
            funding("c1", "ben", 300, 5),
            funding("c2", "ana", 500, 0),
            funding("c3", "cam", 300, 1),
        ]);
        let order: Vec<&str> = summary
            .top_contributors
            .iter()
            .map(|t| t.user_id.as_str())
            .collect();
        // cam ties ben on 300 but contributed first
        assert_eq!(order, vec!["ana", "cam", "ben"]);
    }

    #[test]
    fn recent_keeps_the_last_ten_newest_first() {
        let contributions: Vec<ProjectContribution> = (0..14)
            .map(|i| funding(&format!("c{i}"), "ana", 100, i))
            .collect();
        let summary = summarize(&contributions);
        assert_eq!(summary.recent_contributions.len(), 10);
        assert_eq!(summary.recent_contributions[0].id, "c13");
        assert_eq!(summary.recent_contributions[9].id, "c4");
    }

    #[test]
    fn empty_input_is_an_empty_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_amount_cents, 0);
        assert_eq!(summary.contributor_count, 0);
        assert!(summary.top_contributors.is_empty());
        assert!(summary.recent_contributions.is_empty());
    }
}
