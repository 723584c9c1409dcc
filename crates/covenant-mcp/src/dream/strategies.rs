//! Pluggable dreaming strategies (C11a-d): each takes the manager, the
//! tunable parameters, and an interrupt flag, and returns the [`DreamResult`]s
//! it produced plus whether it was cut short.
//!
//! Every strategy checks the interrupt flag before each unit of work and
//! returns early (cooperative yield, §4.11) rather than racing to finish.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use covenant_core::{
    graph, Category, DreamResult, DreamResultType, EdgeRelationship, Manager, RecallQuery, Storage, Worked,
};

use covenant_core::config::DreamParams;

fn interrupted(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

/// §4.11 FailedDecisionReview: re-evaluate recent `worked=false` decisions
/// against what has been learned since, with a cooldown against re-churning
/// the same verdict.
pub fn failed_decision_review(
    storage: &Storage,
    manager: &Manager,
    project: &str,
    params: &DreamParams,
    interrupt: &AtomicBool,
) -> (Vec<DreamResult>, bool) {
    let mut results = Vec::new();
    let Ok(decisions) = storage.find_failed_decisions(project, params.min_decision_age_hours, params.max_decisions_per_session)
    else {
        return (results, false);
    };

    for decision in decisions {
        if interrupted(interrupt) {
            return (results, true);
        }

        let cooldown_cutoff = Utc::now() - chrono::Duration::hours(params.review_cooldown_hours);
        if let Ok(Some(last_review)) = storage.last_dream_review_time(&decision.id) {
            if last_review > cooldown_cutoff {
                continue;
            }
        }

        let related = manager
            .recall(&RecallQuery {
                topic: decision.content.clone(),
                limit: 6,
                ..Default::default()
            })
            .map(|r| {
                r.buckets
                    .into_values()
                    .flatten()
                    .filter(|m| m.id != decision.id)
                    .take(5)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let result_type = if related.iter().any(|m| m.worked == Worked::True) {
            DreamResultType::Revised
        } else if related.len() < 2 {
            DreamResultType::NeedsMoreData
        } else {
            DreamResultType::ConfirmedFailure
        };

        if result_type == DreamResultType::NeedsMoreData {
            continue;
        }

        let insight = match result_type {
            DreamResultType::Revised => format!(
                "Decision '{}' appears revised by later successes",
                truncate(&decision.content, 80)
            ),
            DreamResultType::ConfirmedFailure => format!(
                "Decision '{}' remains unresolved after re-evaluation",
                truncate(&decision.content, 80)
            ),
            _ => unreachable!(),
        };

        let evidence_memory_ids: Vec<String> = related.iter().map(|m| m.id.clone()).collect();
        let _ = manager.remember(covenant_core::RememberInput {
            category: Category::Learning,
            content: insight.clone(),
            tags: vec!["dream".to_string(), "re-evaluation".to_string(), format!("source-decision:{}", decision.id)],
            ..Default::default()
        });

        results.push(DreamResult {
            source_decision_id: decision.id.clone(),
            original_content: decision.content.clone(),
            original_outcome: decision.outcome.clone(),
            insight,
            result_type,
            evidence_memory_ids,
        });
    }

    (results, false)
}

/// §4.11 ConnectionDiscovery: link unlinked memory pairs sharing >= 2 tags or
/// >= 2 entities.
pub fn connection_discovery(
    storage: &Storage,
    manager: &Manager,
    project: &str,
    params: &DreamParams,
    interrupt: &AtomicBool,
) -> (usize, bool) {
    let Ok(memories) = storage.all_active_memories(project) else {
        return (0, false);
    };
    let Ok(existing_edges) = storage.edges_for_project(project) else {
        return (0, false);
    };
    let mut already_linked: HashSet<(String, String)> = HashSet::new();
    for edge in &existing_edges {
        already_linked.insert(pair_key(&edge.source_id, &edge.target_id));
    }

    let mut created = 0;
    'outer: for (i, a) in memories.iter().enumerate() {
        if interrupted(interrupt) {
            break;
        }
        let entities_a: HashSet<String> = storage.entity_ids_for_memory(&a.id).unwrap_or_default().into_iter().collect();
        let tags_a: HashSet<&str> = a.tags.iter().map(String::as_str).collect();

        for b in memories.iter().skip(i + 1) {
            if interrupted(interrupt) || created >= params.max_connections_per_session {
                break 'outer;
            }
            if already_linked.contains(&pair_key(&a.id, &b.id)) {
                continue;
            }
            let tag_overlap = b.tags.iter().filter(|t| tags_a.contains(t.as_str())).count();
            let entities_b: HashSet<String> = storage.entity_ids_for_memory(&b.id).unwrap_or_default().into_iter().collect();
            let entity_overlap = entities_a.intersection(&entities_b).count();
            if tag_overlap >= 2 || entity_overlap >= 2 {
                if manager.link(&a.id, &b.id, EdgeRelationship::RelatedTo, Some("dream: connection discovery")).is_ok() {
                    already_linked.insert(pair_key(&a.id, &b.id));
                    created += 1;
                }
            }
        }
    }

    (created, interrupted(interrupt))
}

/// §4.11 CommunityRefresh: rebuild C6 communities if the graph has drifted
/// enough since the last build.
pub fn community_refresh(storage: &Storage, project: &str, staleness: chrono::Duration) -> bool {
    let stale = match storage.communities_built_at(project) {
        Ok(Some(last_built)) => Utc::now() - last_built > staleness,
        Ok(None) => true,
        Err(_) => false,
    };
    if !stale {
        return false;
    }

    let Ok(memories) = storage.all_active_memories(project) else {
        return false;
    };
    let Ok(edges) = storage.edges_for_project(project) else {
        return false;
    };
    let node_ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
    let detected = graph::detect_communities(&node_ids, &edges, &graph::CommunityConfig::default());

    let communities: Vec<covenant_core::Community> = detected
        .into_iter()
        .enumerate()
        .map(|(i, c)| covenant_core::Community {
            id: uuid::Uuid::new_v4().to_string(),
            project: project.to_string(),
            level: 0,
            parent_community_id: None,
            member_memory_ids: c.members,
            key_entity_names: Vec::new(),
            summary: format!("community {i}"),
        })
        .collect();

    storage.replace_communities(project, &communities).is_ok()
}

/// §4.11 PendingOutcomeResolver: resolve decisions with no outcome yet once
/// enough corroborating evidence has accumulated. Dry-run downgrades any
/// auto-resolution to `flagged_for_review` and prefixes the insight.
pub fn pending_outcome_resolver(
    storage: &Storage,
    manager: &Manager,
    project: &str,
    params: &DreamParams,
    interrupt: &AtomicBool,
) -> (Vec<DreamResult>, bool) {
    let mut results = Vec::new();
    let Ok(decisions) = storage.find_undecided_decisions(project, params.min_decision_age_hours, params.max_decisions_per_session)
    else {
        return (results, false);
    };

    for decision in decisions {
        if interrupted(interrupt) {
            return (results, true);
        }

        let related = manager
            .recall(&RecallQuery {
                topic: decision.content.clone(),
                limit: 8,
                ..Default::default()
            })
            .map(|r| {
                r.buckets
                    .into_values()
                    .flatten()
                    .filter(|m| m.id != decision.id && m.worked != Worked::Unknown)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if related.len() < params.evidence_threshold {
            results.push(DreamResult {
                source_decision_id: decision.id.clone(),
                original_content: decision.content.clone(),
                original_outcome: None,
                insight: "insufficient evidence to resolve outcome".to_string(),
                result_type: DreamResultType::InsufficientEvidence,
                evidence_memory_ids: related.iter().map(|m| m.id.clone()).collect(),
            });
            continue;
        }

        let positives = related.iter().filter(|m| m.worked == Worked::True).count();
        let negatives = related.iter().filter(|m| m.worked == Worked::False).count();

        let (result_type, worked, mut insight) = if positives > 0 && negatives == 0 {
            (DreamResultType::AutoResolvedSuccess, Worked::True, "evidence unanimously positive".to_string())
        } else if negatives > 0 && positives == 0 {
            (DreamResultType::AutoResolvedFailure, Worked::False, "evidence unanimously negative".to_string())
        } else {
            (DreamResultType::FlaggedForReview, Worked::Unknown, "mixed evidence, needs human review".to_string())
        };

        let mut final_type = result_type;
        if params.dry_run && matches!(result_type, DreamResultType::AutoResolvedSuccess | DreamResultType::AutoResolvedFailure) {
            final_type = DreamResultType::FlaggedForReview;
            insight = format!("[DRY RUN] {insight}");
        } else if matches!(result_type, DreamResultType::AutoResolvedSuccess | DreamResultType::AutoResolvedFailure) {
            let _ = manager.record_outcome(&decision.id, &format!("[DREAM AUTO-RESOLVED] {insight}"), worked);
        }

        results.push(DreamResult {
            source_decision_id: decision.id.clone(),
            original_content: decision.content.clone(),
            original_outcome: decision.outcome.clone(),
            insight,
            result_type: final_type,
            evidence_memory_ids: related.iter().map(|m| m.id.clone()).collect(),
        });
    }

    (results, false)
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a < b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key("a", "b"), pair_key("b", "a"));
    }
}
