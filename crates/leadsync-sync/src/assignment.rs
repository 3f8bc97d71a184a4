use std::sync::Arc;

use leadsync_core::{DistributionType, WorkflowSettings};
use leadsync_storage::{SettingsStore, StoreError};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Unassigned,
    Employee(String),
    /// Round-robin pick; the cursor must be persisted as `next_index`.
    RoundRobin { employee_id: String, next_index: i64 },
}

impl Selection {
    pub fn employee_id(&self) -> Option<&str> {
        match self {
            Selection::Unassigned => None,
            Selection::Employee(id) => Some(id),
            Selection::RoundRobin { employee_id, .. } => Some(employee_id),
        }
    }
}

/// Walks weights in order and returns the rule where the remaining draw reaches zero.
pub fn pick_weighted<'a>(weighted: &[(&'a str, f64)], draw: f64) -> Option<&'a str> {
    let mut remaining = draw;
    for (employee_id, weight) in weighted {
        remaining -= weight;
        if remaining <= 0.0 {
            return Some(*employee_id);
        }
    }
    weighted.last().map(|(employee_id, _)| *employee_id)
}

/// Evaluates the configured policy for a lead whose source tag is `source`.
///
/// Every fallback resolves to the first active rule in stored order.
pub fn select_employee<R: Rng + ?Sized>(
    settings: &WorkflowSettings,
    source: &str,
    rng: &mut R,
) -> Selection {
    if !settings.auto_assign_enabled {
        return Selection::Unassigned;
    }
    let active = settings.active_weights();
    let Some(&(first, _)) = active.first() else {
        return Selection::Unassigned;
    };

    match settings.distribution_type {
        DistributionType::SheetBased => {
            let source = source.to_lowercase();
            let matched = settings.sheet_mappings.iter().find_map(|mapping| {
                let pattern = mapping.sheet_pattern.as_deref().filter(|p| !p.is_empty())?;
                let employee_id = mapping.employee_id.as_deref().filter(|e| !e.is_empty())?;
                source
                    .contains(&pattern.to_lowercase())
                    .then_some(employee_id)
            });
            Selection::Employee(matched.unwrap_or(first).to_string())
        }
        DistributionType::RoundRobin => {
            let len = active.len() as i64;
            let idx = settings.round_robin_index.rem_euclid(len) as usize;
            Selection::RoundRobin {
                employee_id: active[idx].0.to_string(),
                next_index: settings.round_robin_index.saturating_add(1),
            }
        }
        DistributionType::Percentage => {
            let total: f64 = active.iter().map(|(_, weight)| weight).sum();
            if !total.is_finite() || total <= 0.0 {
                return Selection::Employee(first.to_string());
            }
            let draw = rng.gen_range(0.0..total);
            let chosen = pick_weighted(&active, draw).unwrap_or(first);
            Selection::Employee(chosen.to_string())
        }
    }
}

/// Chooses workers for leads against the persisted workflow settings.
///
/// Evaluations are serialized so the round-robin cursor advances strictly by one per pick.
pub struct AssignmentEngine {
    settings: Arc<dyn SettingsStore>,
    cursor: Mutex<()>,
}

impl AssignmentEngine {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            cursor: Mutex::new(()),
        }
    }

    pub async fn pick_employee(&self, source: &str) -> Result<Option<String>, StoreError> {
        let _cursor = self.cursor.lock().await;
        let Some(settings) = self.settings.load_settings().await? else {
            return Ok(None);
        };

        let selection = select_employee(&settings, source, &mut rand::thread_rng());
        if let Selection::RoundRobin { next_index, .. } = &selection {
            self.settings
                .set_round_robin_index(settings.id, *next_index)
                .await?;
        }
        debug!(source, selection = ?selection, "evaluated assignment policy");
        Ok(selection.employee_id().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadsync_core::{AssignmentRule, SheetMapping, WorkflowSettingsInput};
    use leadsync_storage::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn rule(employee_id: &str, percentage: f64) -> AssignmentRule {
        AssignmentRule {
            employee_id: Some(employee_id.to_string()),
            percentage,
            active: true,
        }
    }

    fn settings(distribution_type: DistributionType, rules: Vec<AssignmentRule>) -> WorkflowSettings {
        WorkflowSettings {
            id: Uuid::new_v4(),
            auto_assign_enabled: true,
            distribution_type,
            rules,
            sheet_mappings: vec![],
            round_robin_index: 0,
            updated_at: Utc::now(),
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn disabled_engine_never_assigns() {
        let mut s = settings(DistributionType::RoundRobin, vec![rule("a", 50.0)]);
        s.auto_assign_enabled = false;
        for source in ["Google Sheet", "Google Sheet: fb", ""] {
            assert_eq!(select_employee(&s, source, &mut rng()), Selection::Unassigned);
        }
    }

    #[test]
    fn no_active_rules_means_unassigned() {
        let mut inactive = rule("a", 100.0);
        inactive.active = false;
        let blank = AssignmentRule {
            employee_id: Some(String::new()),
            percentage: 100.0,
            active: true,
        };
        let s = settings(DistributionType::Percentage, vec![inactive, blank]);
        assert_eq!(select_employee(&s, "Google Sheet", &mut rng()), Selection::Unassigned);
    }

    #[test]
    fn zero_sum_percentages_pick_first_active_rule() {
        let mut inactive = rule("skipped", 0.0);
        inactive.active = false;
        let s = settings(
            DistributionType::Percentage,
            vec![inactive, rule("first", 0.0), rule("second", 0.0)],
        );
        let mut rng = rng();
        for _ in 0..20 {
            assert_eq!(
                select_employee(&s, "Google Sheet", &mut rng),
                Selection::Employee("first".into())
            );
        }
    }

    #[test]
    fn overflowing_weight_sum_picks_first_active_rule() {
        let s = settings(
            DistributionType::Percentage,
            vec![rule("first", 1e308), rule("second", 1e308)],
        );
        assert_eq!(
            select_employee(&s, "Google Sheet", &mut rng()),
            Selection::Employee("first".into())
        );
    }

    #[test]
    fn weighted_walk_respects_boundaries() {
        let weighted = [("a", 30.0), ("b", 70.0)];
        assert_eq!(pick_weighted(&weighted, 0.0), Some("a"));
        assert_eq!(pick_weighted(&weighted, 30.0), Some("a"));
        assert_eq!(pick_weighted(&weighted, 30.5), Some("b"));
        assert_eq!(pick_weighted(&weighted, 99.9), Some("b"));
        assert_eq!(pick_weighted(&weighted, 250.0), Some("b"));
        assert_eq!(pick_weighted(&[], 1.0), None);
    }

    #[test]
    fn percentage_draws_only_return_weighted_rules() {
        let s = settings(
            DistributionType::Percentage,
            vec![rule("a", 80.0), rule("zero", 0.0), rule("b", 20.0)],
        );
        let mut rng = rng();
        let mut seen_a = 0;
        for _ in 0..500 {
            match select_employee(&s, "Google Sheet", &mut rng) {
                Selection::Employee(id) if id == "a" => seen_a += 1,
                Selection::Employee(id) => assert_eq!(id, "b"),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(seen_a > 300, "a picked {seen_a} times");
    }

    #[test]
    fn sheet_patterns_match_case_insensitively_in_order() {
        let mut s = settings(DistributionType::SheetBased, vec![rule("default", 0.0)]);
        s.sheet_mappings = vec![
            SheetMapping { sheet_pattern: Some("".into()), employee_id: Some("blank".into()) },
            SheetMapping { sheet_pattern: Some("GJ".into()), employee_id: Some("gj".into()) },
            SheetMapping { sheet_pattern: Some("gj ad".into()), employee_id: Some("later".into()) },
        ];
        assert_eq!(
            select_employee(&s, "Google Sheet: gj AD", &mut rng()),
            Selection::Employee("gj".into())
        );
    }

    #[test]
    fn unmatched_sheet_falls_back_to_first_active_rule() {
        let mut s = settings(DistributionType::SheetBased, vec![rule("first", 10.0), rule("x-rule", 90.0)]);
        s.sheet_mappings = vec![SheetMapping {
            sheet_pattern: Some("fb".into()),
            employee_id: Some("X".into()),
        }];
        assert_eq!(
            select_employee(&s, "Google Sheet: Unrelated Campaign", &mut rng()),
            Selection::Employee("first".into())
        );
    }

    #[test]
    fn round_robin_index_wraps_at_read_time_only() {
        let mut s = settings(
            DistributionType::RoundRobin,
            vec![rule("a", 0.0), rule("b", 0.0), rule("c", 0.0)],
        );
        s.round_robin_index = 7;
        assert_eq!(
            select_employee(&s, "", &mut rng()),
            Selection::RoundRobin { employee_id: "b".into(), next_index: 8 }
        );
    }

    #[tokio::test]
    async fn round_robin_cycles_and_persists_cursor() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_settings(WorkflowSettingsInput {
                auto_assign_enabled: true,
                distribution_type: DistributionType::RoundRobin,
                rules: vec![rule("a", 0.0), rule("b", 0.0), rule("c", 0.0)],
                sheet_mappings: vec![],
            })
            .await
            .unwrap();
        let engine = AssignmentEngine::new(store.clone());

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(engine.pick_employee("Google Sheet").await.unwrap().unwrap());
        }
        assert_eq!(picks, vec!["a", "b", "c", "a"]);

        let persisted = store.load_settings().await.unwrap().unwrap();
        assert_eq!(persisted.round_robin_index, 4);
    }

    #[tokio::test]
    async fn missing_settings_mean_unassigned() {
        let engine = AssignmentEngine::new(Arc::new(MemoryStore::new()));
        assert_eq!(engine.pick_employee("Google Sheet").await.unwrap(), None);
    }
}
