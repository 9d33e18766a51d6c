//! Policy constraint: active policies may forbid an action category on a
//! set of targets.

use regex::Regex;

use super::{Guardrail, GuardrailContext, GuardrailResult};
use crate::domain::models::{GuardrailBlock, Remediation};

pub const NAME: &str = "policy-constraint";

/// Glob match over a target path. `*` stays within one path segment, `**`
/// crosses segments, `?` is one character. A bare `*` matches everything,
/// including actions without a target.
pub fn glob_matches(pattern: &str, target: Option<&str>) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    let Some(target) = target else {
        return false;
    };
    let mut expr = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` also matches zero directories.
                if chars.peek() == Some(&'/') {
                    chars.next();
                    expr.push_str("(?:.*/)?");
                } else {
                    expr.push_str(".*");
                }
            }
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).is_ok_and(|re| re.is_match(target))
}

pub struct PolicyConstraint;

impl Guardrail for PolicyConstraint {
    fn name(&self) -> &str {
        NAME
    }

    fn before_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        let Some(category) = ctx.proposed_category() else {
            return GuardrailResult::Allowed;
        };
        let target = ctx.proposed_target();
        let violated = ctx.policies.iter().filter(|p| p.is_active()).find(|p| {
            p.forbids
                .as_ref()
                .is_some_and(|f| f.category == category && glob_matches(&f.target_glob, target))
        });
        match violated {
            Some(policy) => GuardrailResult::Blocked(GuardrailBlock::new(
                NAME,
                policy.statement.clone(),
                Remediation::ComplyWithPolicy {
                    policy_id: policy.id,
                },
            )),
            None => GuardrailResult::Allowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        ActionCategory, AdviceResponse, GuardrailConfig, Phase, Policy, PolicyOrigin,
    };
    use crate::services::guardrails::testing::{episode, packet};
    use chrono::Utc;

    #[test]
    fn test_glob_matching() {
        assert!(glob_matches("*.pem", Some("server.pem")));
        assert!(!glob_matches("*.pem", Some("certs/server.pem")));
        assert!(glob_matches("**/*.pem", Some("certs/server.pem")));
        assert!(glob_matches("**/*.pem", Some("server.pem")));
        assert!(glob_matches("migrations/**", Some("migrations/001_init.sql")));
        assert!(glob_matches(".env", Some(".env")));
        assert!(!glob_matches(".env", Some("xenv")));
        assert!(glob_matches("*", None));
        assert!(!glob_matches("src/*", None));
    }

    #[test]
    fn test_active_policy_blocks_matching_action() {
        let episode = episode(Phase::Execute);
        let advice = AdviceResponse::default();
        let config = GuardrailConfig::default();
        let now = Utc::now();
        let forbid = Policy::new("never edit applied migrations", PolicyOrigin::User, now)
            .with_forbid(ActionCategory::Mutate, "migrations/**");
        let proposed_policy = Policy::new("proposed only", PolicyOrigin::Learned, now)
            .with_forbid(ActionCategory::Mutate, "*");
        let policies = vec![proposed_policy, forbid.clone()];

        let check = |tool: &str, target: &str| {
            let p = packet(tool, Some(target));
            PolicyConstraint.before_step(&GuardrailContext {
                episode: &episode,
                steps: &[],
                proposed: Some(&p),
                advice: &advice,
                policies: &policies,
                config: &config,
                binding_threshold: 0.75,
            })
        };

        match check("Edit", "migrations/001_init.sql") {
            GuardrailResult::Blocked(block) => {
                assert_eq!(block.reason, "never edit applied migrations");
                assert_eq!(block.remediation, Remediation::ComplyWithPolicy { policy_id: forbid.id });
            }
            other => panic!("expected block, got {other:?}"),
        }
        assert!(check("Read", "migrations/001_init.sql").is_allowed());
        assert!(check("Edit", "src/lib.rs").is_allowed(), "proposed policies are not enforced");
    }
}
