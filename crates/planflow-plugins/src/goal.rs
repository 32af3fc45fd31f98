use async_trait::async_trait;
use planflow_engine::{GoalCompletionChecker, InvocationError, VariableView};
use tracing::debug;

/// A goal condition over the current variables.
///
/// Parsed from goal text:
/// - `name` holds when `name` is set to a non-empty value
/// - `name == value` holds when `name` is set to exactly `value`
/// - `name != value` holds when `name` is unset or set to anything else
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalExpr {
    /// Variable is set and non-empty
    Present(String),
    /// Variable equals a literal
    Equals(String, String),
    /// Variable does not equal a literal
    NotEquals(String, String),
}

impl GoalExpr {
    /// Parse goal text. Values may be wrapped in double quotes.
    pub fn parse(goal: &str) -> Result<Self, InvocationError> {
        let goal = goal.trim();
        let split = |op: &str| {
            goal.split_once(op).map(|(name, value)| {
                (
                    name.trim().to_string(),
                    unquote(value.trim()).to_string(),
                )
            })
        };

        let expr = if let Some((name, value)) = split("!=") {
            GoalExpr::NotEquals(name, value)
        } else if let Some((name, value)) = split("==") {
            GoalExpr::Equals(name, value)
        } else {
            GoalExpr::Present(goal.to_string())
        };

        let name = match &expr {
            GoalExpr::Present(name) | GoalExpr::Equals(name, _) | GoalExpr::NotEquals(name, _) => {
                name
            }
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(InvocationError::InvalidArguments(format!(
                "cannot parse goal '{}'",
                goal
            )));
        }
        Ok(expr)
    }

    /// Evaluate against `variables`
    pub fn evaluate(&self, variables: VariableView<'_>) -> bool {
        match self {
            GoalExpr::Present(name) => variables.get(name).is_some_and(|v| !v.is_empty()),
            GoalExpr::Equals(name, value) => variables.get(name) == Some(value.as_str()),
            GoalExpr::NotEquals(name, value) => variables.get(name) != Some(value.as_str()),
        }
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Goal checker that evaluates goal text as a [`GoalExpr`]
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableGoalChecker;

impl VariableGoalChecker {
    /// Create a new checker
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GoalCompletionChecker for VariableGoalChecker {
    async fn is_satisfied(
        &self,
        goal: &str,
        variables: VariableView<'_>,
    ) -> Result<bool, InvocationError> {
        let expr = GoalExpr::parse(goal)?;
        let satisfied = expr.evaluate(variables);
        debug!(goal, satisfied, "Evaluated goal");
        Ok(satisfied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planflow_engine::Variables;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            GoalExpr::parse("draft").unwrap(),
            GoalExpr::Present("draft".into())
        );
        assert_eq!(
            GoalExpr::parse(" status == \"done\" ").unwrap(),
            GoalExpr::Equals("status".into(), "done".into())
        );
        assert_eq!(
            GoalExpr::parse("status != pending").unwrap(),
            GoalExpr::NotEquals("status".into(), "pending".into())
        );
        assert!(GoalExpr::parse("").is_err());
        assert!(GoalExpr::parse("== x").is_err());
        assert!(GoalExpr::parse("two words").is_err());
    }

    #[tokio::test]
    async fn test_presence_requires_non_empty() {
        let checker = VariableGoalChecker::new();
        let set = vars(&[("draft", "text")]);
        let empty = vars(&[("draft", "")]);

        assert!(checker
            .is_satisfied("draft", VariableView::new(&set))
            .await
            .unwrap());
        assert!(!checker
            .is_satisfied("draft", VariableView::new(&empty))
            .await
            .unwrap());
        assert!(!checker
            .is_satisfied("draft", VariableView::new(&Variables::new()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_comparisons() {
        let checker = VariableGoalChecker::new();
        let variables = vars(&[("status", "done")]);
        let view = VariableView::new(&variables);

        assert!(checker.is_satisfied("status == done", view).await.unwrap());
        assert!(!checker.is_satisfied("status != done", view).await.unwrap());
        assert!(checker.is_satisfied("other != done", view).await.unwrap());
        assert!(!checker.is_satisfied("other == done", view).await.unwrap());
    }

    #[tokio::test]
    async fn test_unparseable_goal_errors() {
        let err = VariableGoalChecker
            .is_satisfied("not a goal", VariableView::new(&Variables::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::InvalidArguments(_)));
    }
}
