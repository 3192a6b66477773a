//! Declarative checks attached to program actions.

use serde::{Deserialize, Serialize};

use crate::engines::ActionResult;
use crate::hooks::Hook;

/// An assertion over a single action result.
///
/// In YAML: `- status: 200`, `- body_contains: ok`, `- header_present: etag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSpec {
    Status(u16),
    StatusIn(Vec<u16>),
    BodyContains(String),
    HeaderPresent(String),
}

impl CheckSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckSpec::Status(_) => "status",
            CheckSpec::StatusIn(_) => "status_in",
            CheckSpec::BodyContains(_) => "body_contains",
            CheckSpec::HeaderPresent(_) => "header_present",
        }
    }

    pub fn evaluate(&self, result: &ActionResult) -> Result<(), String> {
        match self {
            CheckSpec::Status(expected) => match result.status {
                Some(status) if status == *expected => Ok(()),
                Some(status) => Err(format!("expected status {expected}, got {status}")),
                None => Err(format!("expected status {expected}, got no response")),
            },
            CheckSpec::StatusIn(allowed) => match result.status {
                Some(status) if allowed.contains(&status) => Ok(()),
                Some(status) => Err(format!("status {status} not in {allowed:?}")),
                None => Err(format!("expected one of {allowed:?}, got no response")),
            },
            CheckSpec::BodyContains(needle) => {
                if result.body.as_deref().is_some_and(|body| body.contains(needle.as_str())) {
                    Ok(())
                } else {
                    Err(format!("body does not contain '{needle}'"))
                }
            }
            CheckSpec::HeaderPresent(header) => {
                if result.header(header).is_some() {
                    Ok(())
                } else {
                    Err(format!("header '{header}' is missing"))
                }
            }
        }
    }

    /// Check hook named `{action}_{kind}_{index}` targeting `action`.
    pub fn to_hook(&self, action: &str, index: usize) -> Hook {
        let spec = self.clone();
        let name = format!("{}_{}_{}", action, self.kind(), index);
        Hook::check(name, &[action], move |result: &ActionResult| spec.evaluate(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::EngineType;
    use crate::hooks::HookType;

    fn response(status: u16, body: &str) -> ActionResult {
        let mut result = ActionResult::new("health", EngineType::Http);
        result.status = Some(status);
        result.body = Some(body.to_string());
        result.headers.insert("Content-Type".to_string(), "text/plain".to_string());
        result
    }

    #[test]
    fn test_status_checks() {
        let ok = response(200, "ok");
        assert!(CheckSpec::Status(200).evaluate(&ok).is_ok());
        let err = CheckSpec::Status(999).evaluate(&ok).unwrap_err();
        assert_eq!(err, "expected status 999, got 200");
        assert!(CheckSpec::StatusIn(vec![200, 204]).evaluate(&ok).is_ok());
        assert!(CheckSpec::StatusIn(vec![500]).evaluate(&ok).is_err());

        let failed = ActionResult::new("health", EngineType::Http);
        assert!(CheckSpec::Status(200).evaluate(&failed).unwrap_err().contains("no response"));
    }

    #[test]
    fn test_body_and_header_checks() {
        let ok = response(200, "all good");
        assert!(CheckSpec::BodyContains("good".into()).evaluate(&ok).is_ok());
        assert!(CheckSpec::BodyContains("bad".into()).evaluate(&ok).is_err());
        assert!(CheckSpec::HeaderPresent("content-type".into()).evaluate(&ok).is_ok());
        assert!(CheckSpec::HeaderPresent("etag".into()).evaluate(&ok).is_err());
    }

    #[test]
    fn test_to_hook_targets_action() {
        let hook = CheckSpec::Status(200).to_hook("health", 0);
        assert_eq!(hook.name, "health_status_0");
        assert_eq!(hook.hook_type, HookType::Check);
        assert_eq!(hook.names, vec!["health".to_string()]);
    }
}
