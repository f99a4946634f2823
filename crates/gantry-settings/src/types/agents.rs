use gantry_core::session_key::{DEFAULT_AGENT_ID, normalize_agent_id};
use serde::{Deserialize, Serialize};

/// Agent roster plus shared defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsSettings {
    /// Values applied to every agent unless overridden.
    pub defaults: AgentDefaults,
    /// Configured agents, in configuration order.
    pub list: Vec<AgentEntry>,
}

/// Defaults shared by all agents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    /// Default model selection.
    pub model: ModelChainSettings,
    /// Subagent spawn limits.
    pub subagents: SubagentLimits,
}

/// Primary model plus ordered fallbacks, as `provider/model` refs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelChainSettings {
    /// Primary model ref.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    /// Ordered fallback refs. `Some(vec![])` disables fallbacks; `None` inherits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<String>>,
    /// How the chain is ordered before the walk. `None` inherits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ModelSelectionStrategy>,
}

/// Ordering applied to a resolved candidate chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelectionStrategy {
    /// Keep the resolved order.
    #[default]
    Primary,
    /// Start one position later on each walk over the same chain.
    RoundRobin,
    /// Start at a position derived from the session key.
    StickySession,
}

/// Limits on subagent spawning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentLimits {
    /// Sessions at this depth or deeper may not spawn.
    pub max_spawn_depth: u32,
    /// Maximum concurrently active children per requester session.
    pub max_children_per_agent: usize,
}

impl Default for SubagentLimits {
    fn default() -> Self {
        Self {
            max_spawn_depth: 1,
            max_children_per_agent: 5,
        }
    }
}

/// One configured agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentEntry {
    /// Agent id (normalized on lookup).
    pub id: String,
    /// Marks the default agent.
    pub default: bool,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Per-agent model chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelChainSettings>,
    /// Delegation settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagents: Option<AgentSubagentSettings>,
}

/// Per-agent delegation settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSubagentSettings {
    /// Agents this agent may spawn. `*` allows any.
    pub allow_agents: Vec<String>,
    /// Model override for spawned subagents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AgentsSettings {
    /// Configured agent ids, normalized, in configuration order without duplicates.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.list.len());
        for entry in &self.list {
            let id = normalize_agent_id(&entry.id);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Default agent: first entry marked `default`, else the first entry, else `main`.
    pub fn default_agent_id(&self) -> String {
        self.list
            .iter()
            .find(|e| e.default)
            .or_else(|| self.list.first())
            .map_or_else(|| DEFAULT_AGENT_ID.to_owned(), |e| normalize_agent_id(&e.id))
    }

    /// Look up an agent by (normalized) id.
    pub fn find(&self, agent_id: &str) -> Option<&AgentEntry> {
        let wanted = normalize_agent_id(agent_id);
        self.list.iter().find(|e| normalize_agent_id(&e.id) == wanted)
    }

    /// Normalized allow-list of `agent_id`. Empty when not configured.
    pub fn allow_agents(&self, agent_id: &str) -> Vec<String> {
        self.find(agent_id)
            .and_then(|e| e.subagents.as_ref())
            .map(|s| {
                s.allow_agents
                    .iter()
                    .map(|a| {
                        if a.trim() == "*" {
                            "*".to_owned()
                        } else {
                            normalize_agent_id(a)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Model override for subagents spawned by `agent_id`.
    pub fn subagent_model(&self, agent_id: &str) -> Option<String> {
        self.find(agent_id)
            .and_then(|e| e.subagents.as_ref())
            .and_then(|s| s.model.clone())
    }

    /// Primary model ref for `agent_id`, falling back to the shared default.
    pub fn primary_model(&self, agent_id: &str) -> Option<String> {
        self.find(agent_id)
            .and_then(|e| e.model.as_ref())
            .and_then(|m| m.primary.clone())
            .or_else(|| self.defaults.model.primary.clone())
    }

    /// Selection strategy for `agent_id`: the agent's own, then the shared
    /// default, then [`ModelSelectionStrategy::Primary`].
    pub fn selection_strategy(&self, agent_id: &str) -> ModelSelectionStrategy {
        self.find(agent_id)
            .and_then(|e| e.model.as_ref())
            .and_then(|m| m.strategy)
            .or(self.defaults.model.strategy)
            .unwrap_or_default()
    }

    /// Configured fallback refs for `agent_id`.
    ///
    /// The agent's own list wins when present (even if empty), then the shared
    /// default list. `None` means nothing is configured anywhere.
    pub fn fallbacks(&self, agent_id: &str) -> Option<Vec<String>> {
        self.find(agent_id)
            .and_then(|e| e.model.as_ref())
            .and_then(|m| m.fallbacks.clone())
            .or_else(|| self.defaults.model.fallbacks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> AgentEntry {
        AgentEntry {
            id: id.into(),
            ..AgentEntry::default()
        }
    }

    #[test]
    fn default_agent_prefers_flag() {
        let mut s = AgentsSettings::default();
        s.list = vec![entry("a"), AgentEntry { default: true, ..entry("B") }];
        assert_eq!(s.default_agent_id(), "b");
    }

    #[test]
    fn default_agent_falls_back_to_first_then_main() {
        let mut s = AgentsSettings::default();
        assert_eq!(s.default_agent_id(), "main");
        s.list = vec![entry("alpha"), entry("beta")];
        assert_eq!(s.default_agent_id(), "alpha");
    }

    #[test]
    fn agent_ids_dedupe_in_order() {
        let mut s = AgentsSettings::default();
        s.list = vec![entry("b"), entry("A"), entry("b")];
        assert_eq!(s.agent_ids(), vec!["b", "a"]);
    }

    #[test]
    fn allow_agents_normalized_and_star_kept() {
        let mut s = AgentsSettings::default();
        s.list = vec![AgentEntry {
            subagents: Some(AgentSubagentSettings {
                allow_agents: vec!["Writer".into(), " * ".into()],
                model: None,
            }),
            ..entry("a")
        }];
        assert_eq!(s.allow_agents("A"), vec!["writer", "*"]);
        assert!(s.allow_agents("missing").is_empty());
    }

    #[test]
    fn agent_fallbacks_override_defaults_even_when_empty() {
        let mut s = AgentsSettings::default();
        s.defaults.model.fallbacks = Some(vec!["openai/gpt-4.1".into()]);
        s.list = vec![
            AgentEntry {
                model: Some(ModelChainSettings {
                    fallbacks: Some(vec![]),
                    ..ModelChainSettings::default()
                }),
                ..entry("quiet")
            },
            entry("plain"),
        ];
        assert_eq!(s.fallbacks("quiet"), Some(vec![]));
        assert_eq!(s.fallbacks("plain"), Some(vec!["openai/gpt-4.1".to_owned()]));
        assert_eq!(AgentsSettings::default().fallbacks("x"), None);
    }

    #[test]
    fn primary_model_inherits_default() {
        let mut s = AgentsSettings::default();
        s.defaults.model.primary = Some("openai/gpt-4.1-mini".into());
        s.list = vec![entry("a")];
        assert_eq!(s.primary_model("a").as_deref(), Some("openai/gpt-4.1-mini"));
    }

    #[test]
    fn selection_strategy_inherits_then_defaults_to_primary() {
        let mut s: AgentsSettings = serde_json::from_value(serde_json::json!({
            "list": [
                {"id": "rr", "model": {"strategy": "round_robin"}},
                {"id": "plain"}
            ],
            "defaults": {"model": {"strategy": "sticky_session"}}
        }))
        .unwrap();
        assert_eq!(s.selection_strategy("rr"), ModelSelectionStrategy::RoundRobin);
        assert_eq!(s.selection_strategy("plain"), ModelSelectionStrategy::StickySession);
        s.defaults.model.strategy = None;
        assert_eq!(s.selection_strategy("plain"), ModelSelectionStrategy::Primary);
    }

    #[test]
    fn parses_from_json() {
        let s: AgentsSettings = serde_json::from_value(serde_json::json!({
            "list": [{"id": "main", "default": true, "subagents": {"allowAgents": ["*"]}}],
            "defaults": {"model": {"primary": "anthropic/claude-opus-4-6", "fallbacks": []}}
        }))
        .unwrap();
        assert_eq!(s.allow_agents("main"), vec!["*"]);
        assert_eq!(s.defaults.model.fallbacks, Some(vec![]));
        assert_eq!(s.defaults.subagents.max_spawn_depth, 1);
    }
}
