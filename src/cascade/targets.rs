use serde::{Deserialize, Serialize};

use crate::cascade::{KindCounts, RemainderPolicy};
use crate::plan::{CascadeConfig, EntityKind, Objective};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CascadeTargets {
    pub objective_count: u64,
    pub global: KindCounts,
    pub per_objective: Vec<ObjectiveTargets>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectiveTargets {
    pub objective_id: String,
    pub title: String,
    pub weight: f64,
    pub target: KindCounts,
    pub current: KindCounts,
}

/// An empty objective list still counts as one bucket.
pub fn objective_count(objectives: &[Objective]) -> u64 {
    (objectives.len() as u64).max(1)
}

/// Targets for the cascade kinds. Pilot demand follows the challenges that
/// already exist, not the challenge target.
pub fn compute_targets(
    objectives: &[Objective],
    cascade: &CascadeConfig,
    current: &KindCounts,
    policy: RemainderPolicy,
) -> CascadeTargets {
    let count = objective_count(objectives);
    let current_of = |kind: EntityKind| current.get(&kind).copied().unwrap_or(0);

    let mut global = KindCounts::new();
    global.insert(
        EntityKind::Challenge,
        count.saturating_mul(u64::from(cascade.challenges_per_objective)),
    );
    global.insert(
        EntityKind::Pilot,
        current_of(EntityKind::Challenge).saturating_mul(u64::from(cascade.pilots_per_challenge)),
    );
    global.insert(
        EntityKind::Campaign,
        count.saturating_mul(u64::from(cascade.campaigns_per_objective)),
    );
    global.insert(
        EntityKind::Event,
        count.saturating_mul(u64::from(cascade.events_per_objective)),
    );

    let per_objective = objectives
        .iter()
        .enumerate()
        .map(|(index, objective)| {
            let attributed: KindCounts = EntityKind::CASCADE
                .iter()
                .map(|kind| {
                    (
                        *kind,
                        attribute_share(current_of(*kind), count, index as u64, policy),
                    )
                })
                .collect();
            let challenges_here = attributed.get(&EntityKind::Challenge).copied().unwrap_or(0);

            let mut target = KindCounts::new();
            target.insert(
                EntityKind::Challenge,
                u64::from(cascade.challenges_per_objective),
            );
            target.insert(
                EntityKind::Pilot,
                challenges_here.saturating_mul(u64::from(cascade.pilots_per_challenge)),
            );
            target.insert(
                EntityKind::Campaign,
                u64::from(cascade.campaigns_per_objective),
            );
            target.insert(EntityKind::Event, u64::from(cascade.events_per_objective));

            ObjectiveTargets {
                objective_id: objective.id.clone(),
                title: objective.title.clone(),
                weight: objective.weight,
                target,
                current: attributed,
            }
        })
        .collect();

    CascadeTargets {
        objective_count: count,
        global,
        per_objective,
    }
}

/// Share of `total` for bucket `index` out of `buckets`.
pub fn attribute_share(total: u64, buckets: u64, index: u64, policy: RemainderPolicy) -> u64 {
    let buckets = buckets.max(1);
    let base = total / buckets;
    match policy {
        RemainderPolicy::Drop => base,
        RemainderPolicy::RoundRobin => base + u64::from(index < total % buckets),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objectives(n: usize) -> Vec<Objective> {
        (0..n)
            .map(|i| Objective::new(format!("Objective {i}"), 1.0))
            .collect()
    }

    fn counts(pairs: &[(EntityKind, u64)]) -> KindCounts {
        pairs.iter().copied().collect()
    }

    #[test]
    fn two_objectives_with_defaults_and_nothing_built() {
        let targets = compute_targets(
            &objectives(2),
            &CascadeConfig::default(),
            &KindCounts::new(),
            RemainderPolicy::RoundRobin,
        );
        assert_eq!(targets.objective_count, 2);
        assert_eq!(targets.global[&EntityKind::Challenge], 10);
        assert_eq!(targets.global[&EntityKind::Campaign], 4);
        assert_eq!(targets.global[&EntityKind::Event], 6);
        assert_eq!(targets.global[&EntityKind::Pilot], 0);
    }

    #[test]
    fn pilot_target_follows_existing_challenges() {
        let current = counts(&[(EntityKind::Challenge, 10)]);
        let targets = compute_targets(
            &objectives(2),
            &CascadeConfig::default(),
            &current,
            RemainderPolicy::RoundRobin,
        );
        assert_eq!(targets.global[&EntityKind::Pilot], 20);
        assert_eq!(targets.per_objective[0].target[&EntityKind::Pilot], 10);
    }

    #[test]
    fn empty_objectives_produce_a_full_single_bucket_target() {
        let targets = compute_targets(
            &[],
            &CascadeConfig::default(),
            &KindCounts::new(),
            RemainderPolicy::RoundRobin,
        );
        assert_eq!(targets.objective_count, 1);
        assert_eq!(targets.global[&EntityKind::Challenge], 5);
        assert!(targets.per_objective.is_empty());
    }

    #[test]
    fn global_targets_never_shrink_as_objectives_grow() {
        let configs = [
            CascadeConfig::default(),
            CascadeConfig {
                challenges_per_objective: 0,
                pilots_per_challenge: 7,
                campaigns_per_objective: 1,
                events_per_objective: 0,
            },
        ];
        let current = counts(&[(EntityKind::Challenge, 3), (EntityKind::Event, 4)]);
        for config in configs {
            let mut previous: Option<KindCounts> = None;
            for n in 0..8 {
                let global =
                    compute_targets(&objectives(n), &config, &current, RemainderPolicy::Drop)
                        .global;
                if let Some(prev) = &previous {
                    for (kind, value) in &global {
                        assert!(value >= &prev[kind], "{kind} shrank at {n} objectives");
                    }
                }
                previous = Some(global);
            }
        }
    }

    #[test]
    fn remainder_policy_controls_attribution() {
        let current = counts(&[(EntityKind::Challenge, 7)]);
        let drop = compute_targets(
            &objectives(3),
            &CascadeConfig::default(),
            &current,
            RemainderPolicy::Drop,
        );
        let shares: Vec<u64> = drop
            .per_objective
            .iter()
            .map(|o| o.current[&EntityKind::Challenge])
            .collect();
        assert_eq!(shares, vec![2, 2, 2]);

        let round_robin = compute_targets(
            &objectives(3),
            &CascadeConfig::default(),
            &current,
            RemainderPolicy::RoundRobin,
        );
        let shares: Vec<u64> = round_robin
            .per_objective
            .iter()
            .map(|o| o.current[&EntityKind::Challenge])
            .collect();
        assert_eq!(shares, vec![3, 2, 2]);
        assert_eq!(shares.iter().sum::<u64>(), 7);
    }
}
