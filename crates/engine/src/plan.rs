//! Plan expansion — turning filters into a flat, ordered list of run
//! combinations.
//!
//! Eval filters (or an eval-only catalog) produce one combination per
//! enumerated recording; otherwise the plan is the Cartesian product of
//! region × scenario × resolved provider, with providers resolved
//! through: the scenario's explicit list, then its provider group
//! (default `"default"`), then every registered provider, filtered by
//! required capabilities and the external provider filter.

use arena_domain::config::Configuration;
use arena_domain::error::Result;
use arena_domain::run::{RunCombination, RunPlan};
use arena_domain::scenario::Scenario;
use arena_providers::ProviderRegistry;

use crate::adapters::AdapterRegistry;

/// External filters handed in by the caller. Empty lists mean "all".
#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub regions: Vec<String>,
    pub providers: Vec<String>,
    pub scenarios: Vec<String>,
    pub evals: Vec<String>,
}

pub struct PlanBuilder<'a> {
    pub config: &'a Configuration,
    pub providers: &'a ProviderRegistry,
    pub adapters: &'a AdapterRegistry,
}

impl<'a> PlanBuilder<'a> {
    pub fn build(&self, filter: &PlanFilter) -> Result<RunPlan> {
        let eval_mode = !filter.evals.is_empty()
            || (self.config.scenarios.is_empty() && !self.config.evals.is_empty());
        if eval_mode {
            return self.build_eval_plan(filter);
        }
        self.build_scenario_plan(filter)
    }

    fn build_eval_plan(&self, filter: &PlanFilter) -> Result<RunPlan> {
        let mut combinations = Vec::new();
        for eval in &self.config.evals {
            if !filter.evals.is_empty() && !filter.evals.contains(&eval.id) {
                continue;
            }
            let recordings = self.adapters.enumerate(&eval.recording, &eval.adapter)?;
            tracing::debug!(
                eval = %eval.id,
                recordings = recordings.len(),
                "enumerated eval recordings"
            );
            for recording in recordings {
                combinations.push(RunCombination::Eval {
                    eval_id: eval.id.clone(),
                    recording,
                });
            }
        }
        Ok(RunPlan { combinations })
    }

    fn build_scenario_plan(&self, filter: &PlanFilter) -> Result<RunPlan> {
        let regions: Vec<String> = if filter.regions.is_empty() {
            vec!["default".to_string()]
        } else {
            filter.regions.clone()
        };

        let mut combinations = Vec::new();
        for region in &regions {
            for scenario in &self.config.scenarios {
                if !filter.scenarios.is_empty() && !filter.scenarios.contains(&scenario.id) {
                    continue;
                }
                for provider_id in self.resolve_providers(scenario, filter) {
                    combinations.push(RunCombination::Scenario {
                        region: region.clone(),
                        scenario_id: scenario.id.clone(),
                        provider_id,
                    });
                }
            }
        }
        Ok(RunPlan { combinations })
    }

    fn resolve_providers(&self, scenario: &Scenario, filter: &PlanFilter) -> Vec<String> {
        // 1. Explicit list; 2. group match; 3. every registered provider.
        let mut candidates: Vec<String> = if !scenario.providers.is_empty() {
            scenario.providers.clone()
        } else {
            let group = scenario.provider_group.as_deref().unwrap_or("default");
            let grouped = self.providers.ids_in_group(group);
            if !grouped.is_empty() {
                grouped
            } else {
                self.providers.ids()
            }
        };

        // 4. Required-capability filter. Unknown provider IDs survive to
        // fail at run time with a resolution error.
        if !scenario.required_capabilities.is_empty() {
            candidates.retain(|id| match self.providers.get(id) {
                Some(provider) => scenario
                    .required_capabilities
                    .iter()
                    .all(|cap| provider.capabilities().has(cap)),
                None => true,
            });
        }

        // 5. Intersect with the external provider filter.
        if !filter.providers.is_empty() {
            candidates.retain(|id| filter.providers.contains(id));
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_providers::mock::{MockProvider, MockProviderConfig};
    use std::sync::Arc;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (id, group, caps) in [
            ("p1", "default", vec![]),
            ("p2", "default", vec!["audio"]),
            ("rt", "realtime", vec!["audio", "streaming"]),
        ] {
            let mut cfg = MockProviderConfig::named(id);
            cfg.group = group.into();
            cfg.capabilities = caps.into_iter().map(String::from).collect();
            registry.register(Arc::new(MockProvider::new(cfg)));
        }
        registry
    }

    fn config_with(scenarios: Vec<Scenario>) -> Configuration {
        Configuration {
            scenarios,
            ..Default::default()
        }
    }

    #[test]
    fn cartesian_product_in_region_scenario_provider_order() {
        let mut scenario = Scenario::new("s1");
        scenario.providers = vec!["p1".into(), "p2".into()];
        let config = config_with(vec![scenario]);
        let registry = registry();
        let adapters = AdapterRegistry::with_defaults();
        let builder = PlanBuilder {
            config: &config,
            providers: &registry,
            adapters: &adapters,
        };

        let plan = builder
            .build(&PlanFilter {
                regions: vec!["us".into(), "eu".into()],
                ..Default::default()
            })
            .unwrap();

        let labels: Vec<String> = plan.combinations.iter().map(|c| c.label()).collect();
        assert_eq!(
            labels,
            vec!["us/s1/p1", "us/s1/p2", "eu/s1/p1", "eu/s1/p2"]
        );
    }

    #[test]
    fn group_resolution_and_region_default() {
        let mut scenario = Scenario::new("s1");
        scenario.provider_group = Some("realtime".into());
        let config = config_with(vec![scenario]);
        let registry = registry();
        let adapters = AdapterRegistry::with_defaults();
        let builder = PlanBuilder {
            config: &config,
            providers: &registry,
            adapters: &adapters,
        };

        let plan = builder.build(&PlanFilter::default()).unwrap();
        assert_eq!(plan.combinations.len(), 1);
        assert_eq!(plan.combinations[0].label(), "default/s1/rt");
    }

    #[test]
    fn default_group_then_capability_filter() {
        let mut scenario = Scenario::new("s1");
        scenario.required_capabilities = vec!["audio".into()];
        let config = config_with(vec![scenario]);
        let registry = registry();
        let adapters = AdapterRegistry::with_defaults();
        let builder = PlanBuilder {
            config: &config,
            providers: &registry,
            adapters: &adapters,
        };

        // Default group holds p1 + p2; only p2 has the audio capability.
        let plan = builder.build(&PlanFilter::default()).unwrap();
        let labels: Vec<String> = plan.combinations.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["default/s1/p2"]);
    }

    #[test]
    fn external_provider_filter_intersects() {
        let mut scenario = Scenario::new("s1");
        scenario.providers = vec!["p1".into(), "p2".into()];
        let config = config_with(vec![scenario]);
        let registry = registry();
        let adapters = AdapterRegistry::with_defaults();
        let builder = PlanBuilder {
            config: &config,
            providers: &registry,
            adapters: &adapters,
        };

        let plan = builder
            .build(&PlanFilter {
                providers: vec!["p2".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.combinations.len(), 1);
        assert_eq!(plan.combinations[0].label(), "default/s1/p2");
    }

    #[test]
    fn eval_filter_switches_to_eval_plan() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.jsonl", "b.jsonl"] {
            std::fs::write(
                dir.path().join(name),
                r#"{"role":"user","content":"x"}"#,
            )
            .unwrap();
        }

        let mut config = config_with(vec![Scenario::new("s1")]);
        config.evals.push(arena_domain::scenario::EvalSpec {
            id: "e1".into(),
            recording: format!("{}/*.jsonl", dir.path().display()),
            adapter: "jsonl".into(),
            turn_assertions: Vec::new(),
            conversation_assertions: Vec::new(),
            run_pack_evals: false,
        });
        let registry = registry();
        let adapters = AdapterRegistry::with_defaults();
        let builder = PlanBuilder {
            config: &config,
            providers: &registry,
            adapters: &adapters,
        };

        let plan = builder
            .build(&PlanFilter {
                evals: vec!["e1".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.combinations.len(), 2);
        assert!(matches!(
            plan.combinations[0],
            RunCombination::Eval { .. }
        ));
    }
}
