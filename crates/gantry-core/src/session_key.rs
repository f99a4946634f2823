//! Agent-scoped session keys.
//!
//! A qualified key has the shape `agent:<agentId>:<rest>`. Subagent sessions
//! use `agent:<agentId>:subagent:<uuid>`. Qualification is idempotent: a key
//! that already carries a recognized prefix is returned unchanged.

use serde::{Deserialize, Serialize};

use crate::ids::new_v7;

/// Agent id used when none is configured or a key carries none.
pub const DEFAULT_AGENT_ID: &str = "main";

const PREFIX: &str = "agent:";
const SUBAGENT_MARKER: &str = "subagent:";

/// Components of a parsed `agent:<id>:<rest>` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSessionKey {
    /// Normalized agent id.
    pub agent_id: String,
    /// Everything after the agent segment.
    pub rest: String,
}

/// Normalize a raw agent id.
///
/// Lowercases, maps characters outside `[a-z0-9_-]` to `-`, trims leading and
/// trailing dashes. Empty input yields [`DEFAULT_AGENT_ID`].
pub fn normalize_agent_id(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        DEFAULT_AGENT_ID.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Parse `agent:<id>:<rest>`. Returns `None` unless both segments are non-empty.
pub fn parse_agent_session_key(key: &str) -> Option<ParsedSessionKey> {
    let body = key.trim().strip_prefix(PREFIX)?;
    let (agent, rest) = body.split_once(':')?;
    if agent.trim().is_empty() || rest.is_empty() {
        return None;
    }
    Some(ParsedSessionKey {
        agent_id: normalize_agent_id(agent),
        rest: rest.to_owned(),
    })
}

/// Qualify `key` under `agent_id` unless it already is an agent-scoped key.
pub fn qualify_session_key(agent_id: &str, key: &str) -> String {
    let key = key.trim();
    if parse_agent_session_key(key).is_some() {
        return key.to_owned();
    }
    format!("{PREFIX}{}:{key}", normalize_agent_id(agent_id))
}

/// The main session key for an agent (`agent:<id>:main`).
pub fn main_session_key(agent_id: &str) -> String {
    format!("{PREFIX}{}:main", normalize_agent_id(agent_id))
}

/// Build a fresh subagent session key for `agent_id`.
pub fn subagent_session_key(agent_id: &str) -> String {
    format!(
        "{PREFIX}{}:{SUBAGENT_MARKER}{}",
        normalize_agent_id(agent_id),
        new_v7()
    )
}

/// Agent id a key belongs to, if it is agent-scoped.
pub fn agent_id_from_session_key(key: &str) -> Option<String> {
    parse_agent_session_key(key).map(|p| p.agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_basic() {
        assert_eq!(normalize_agent_id("Research"), "research");
        assert_eq!(normalize_agent_id("  ops team "), "ops-team");
        assert_eq!(normalize_agent_id("--x--"), "x");
        assert_eq!(normalize_agent_id(""), "main");
        assert_eq!(normalize_agent_id("!!!"), "main");
    }

    #[test]
    fn parse_valid_key() {
        let p = parse_agent_session_key("agent:coder:main").unwrap();
        assert_eq!(p.agent_id, "coder");
        assert_eq!(p.rest, "main");
    }

    #[test]
    fn parse_keeps_nested_rest() {
        let p = parse_agent_session_key("agent:coder:subagent:abc").unwrap();
        assert_eq!(p.rest, "subagent:abc");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_agent_session_key("main").is_none());
        assert!(parse_agent_session_key("agent::main").is_none());
        assert!(parse_agent_session_key("agent:coder:").is_none());
        assert!(parse_agent_session_key("agent:coder").is_none());
    }

    #[test]
    fn qualify_prefixes_bare_keys() {
        assert_eq!(qualify_session_key("coder", "telegram:42"), "agent:coder:telegram:42");
    }

    #[test]
    fn qualify_is_idempotent() {
        let once = qualify_session_key("coder", "main");
        let twice = qualify_session_key("coder", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn qualify_never_reprefixes_other_agents_key() {
        assert_eq!(
            qualify_session_key("coder", "agent:writer:main"),
            "agent:writer:main"
        );
    }

    #[test]
    fn subagent_keys() {
        let key = subagent_session_key("Research");
        assert!(key.starts_with("agent:research:subagent:"));
        assert!(parse_agent_session_key(&key).unwrap().rest.starts_with("subagent:"));
        assert_eq!(agent_id_from_session_key(&key).as_deref(), Some("research"));
    }

    #[test]
    fn main_key() {
        assert_eq!(main_session_key("Main"), "agent:main:main");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn qualify_idempotent_for_any_key(agent in "[a-zA-Z0-9 _-]{0,12}", key in "[a-z0-9:]{1,20}") {
                let once = qualify_session_key(&agent, &key);
                prop_assert_eq!(qualify_session_key(&agent, &once), once.clone());
                prop_assert_eq!(qualify_session_key("other", &once), once);
            }

            #[test]
            fn normalized_ids_are_stable(raw in ".{0,24}") {
                let once = normalize_agent_id(&raw);
                prop_assert_eq!(normalize_agent_id(&once), once);
            }
        }
    }
}
