//! Compiled rule set.
//!
//! [`RuleEngine::build`] turns the model text and the enforcing policies into an immutable
//! rule set. Every policy contributes one row `(rule, resource, methods)`:
//!
//! - `rule` is kept verbatim and pre-parsed for every `eval(p.<token>)` in the matcher
//! - `resource` is rendered as the anchored regex `^(?:<resource>)$`
//! - `methods` is rendered as `^(GET|POST|...)$`
//!
//! All parsing, name resolution and regex compilation happen here, so evaluation is a pure
//! walk over prepared data and an unknown token in any rule fails startup.

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::policies::Policy;
use crate::policy::expr::{key_match2_regex, Env, Expr, Function, PatternCache};
use crate::policy::model::{Effect, ModelDefinition};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

#[derive(Debug)]
struct PolicyRow {
    values: Vec<(String, Value)>,
    rules: HashMap<String, Expr>,
}

/// Evaluable rule set built once at startup
#[derive(Debug)]
pub struct RuleEngine {
    model: ModelDefinition,
    matcher: Expr,
    rows: Vec<PolicyRow>,
    patterns: PatternCache,
}

impl RuleEngine {
    /// Compile `model_text` and the enforcing (non-whitelist) entries of `policies`.
    pub fn build(model_text: &str, policies: &[Policy]) -> GatewayResult<Self> {
        let model = ModelDefinition::parse(model_text)?;
        let matcher = Expr::parse(&model.matcher)
            .map_err(|e| GatewayError::config(format!("Invalid matcher: {}", e)))?;

        let scope = Scope::new(&model);
        scope.check(&matcher, true).map_err(|e| GatewayError::config(format!("Invalid matcher: {}", e)))?;
        let eval_targets = eval_targets(&matcher);

        let mut rows = Vec::new();
        for (index, policy) in policies.iter().enumerate().filter(|(_, p)| !p.white_list) {
            let methods = policy.methods.iter().map(|m| m.as_str()).collect::<Vec<_>>().join("|");
            let fields = [
                policy.rule.clone(),
                format!("^(?:{})$", policy.resource),
                format!("^({})$", methods),
            ];
            let values: Vec<(String, Value)> = model
                .policy_tokens
                .iter()
                .cloned()
                .zip(fields.into_iter().map(Value::String))
                .collect();

            let mut rules = HashMap::new();
            for target in &eval_targets {
                let source = values
                    .iter()
                    .find(|(name, _)| name == target)
                    .and_then(|(_, value)| value.as_str())
                    .unwrap_or_default();
                let rule = Expr::parse(source).and_then(|rule| scope.check(&rule, false).map(|_| rule));
                let rule = rule.map_err(|e| {
                    GatewayError::config(format!("policy #{} ({}) rule '{}': {}", index, policy.resource, source, e))
                })?;
                rules.insert(target.clone(), rule);
            }

            rows.push(PolicyRow { values, rules });
        }

        let mut patterns = PatternCache::default();
        collect_patterns(&matcher, &rows, &mut patterns)?;
        for row in &rows {
            for rule in row.rules.values() {
                collect_patterns(rule, std::slice::from_ref(row), &mut patterns)?;
            }
        }

        info!(rules = rows.len(), patterns = patterns.len(), "Rule engine compiled");
        Ok(Self {
            model,
            matcher,
            rows,
            patterns,
        })
    }

    /// Decide whether `subject` may perform `action` on `resource`.
    ///
    /// Pure: no I/O and no shared state is touched.
    pub fn evaluate(&self, subject: &Value, resource: &Value, action: &str) -> bool {
        let tokens = &self.model.request_tokens;
        let request = [
            (tokens[0].clone(), subject.clone()),
            (tokens[1].clone(), resource.clone()),
            (tokens[2].clone(), Value::String(action.to_string())),
        ];

        let allowed = match self.model.effect {
            Effect::AllowOverride => self.rows.iter().any(|row| {
                let env = Env {
                    request: &request,
                    policy: &row.values,
                    rules: &row.rules,
                    patterns: &self.patterns,
                };
                self.matcher.matches(&env)
            }),
        };

        debug!(action, allowed, "Rule evaluation finished");
        allowed
    }

    pub fn rule_count(&self) -> usize {
        self.rows.len()
    }
}

/// Names that expressions may reference
struct Scope<'m> {
    request: HashSet<&'m str>,
    policy: HashSet<&'m str>,
}

impl<'m> Scope<'m> {
    fn new(model: &'m ModelDefinition) -> Self {
        Self {
            request: model.request_tokens.iter().map(String::as_str).collect(),
            policy: model.policy_tokens.iter().map(String::as_str).collect(),
        }
    }

    /// Reject unknown roots and tokens. `eval()` is only allowed in the matcher.
    fn check(&self, expr: &Expr, allow_eval: bool) -> GatewayResult<()> {
        let mut problem = None;
        expr.walk(&mut |node| {
            if problem.is_some() {
                return;
            }
            match node {
                Expr::Path(path) => {
                    let known = match path[0].as_str() {
                        "r" => self.request.contains(path[1].as_str()),
                        "p" => self.policy.contains(path[1].as_str()) && path.len() == 2,
                        _ => false,
                    };
                    if !known {
                        problem = Some(format!("unknown attribute '{}'", path.join(".")));
                    }
                }
                Expr::Call {
                    function: Function::Eval,
                    args,
                } => {
                    let target_ok = matches!(&args[0], Expr::Path(p) if p.len() == 2 && p[0] == "p");
                    if !allow_eval {
                        problem = Some("eval() is not allowed inside a rule".to_string());
                    } else if !target_ok {
                        problem = Some("eval() expects a policy field such as p.sub_rule".to_string());
                    }
                }
                _ => {}
            }
        });

        match problem {
            Some(message) => Err(GatewayError::config(message)),
            None => Ok(()),
        }
    }
}

fn eval_targets(matcher: &Expr) -> Vec<String> {
    let mut targets = Vec::new();
    matcher.walk(&mut |node| {
        if let Expr::Call {
            function: Function::Eval,
            args,
        } = node
        {
            if let Expr::Path(path) = &args[0] {
                if !targets.contains(&path[1]) {
                    targets.push(path[1].clone());
                }
            }
        }
    });
    targets
}

/// Precompile every regex a pattern function can receive from a literal or a policy field
fn collect_patterns(expr: &Expr, rows: &[PolicyRow], cache: &mut PatternCache) -> GatewayResult<()> {
    let mut sources = Vec::new();
    expr.walk(&mut |node| {
        let Expr::Call { function, args } = node else {
            return;
        };
        let translate = match function {
            Function::RegexMatch => false,
            Function::KeyMatch2 => true,
            _ => return,
        };
        match &args[1] {
            Expr::Literal(Value::String(pattern)) => sources.push((pattern.clone(), translate)),
            Expr::Path(path) if path[0] == "p" => {
                for row in rows {
                    if let Some((_, Value::String(pattern))) = row.values.iter().find(|(name, _)| *name == path[1]) {
                        sources.push((pattern.clone(), translate));
                    }
                }
            }
            _ => {}
        }
    });

    for (pattern, translate) in sources {
        let pattern = if translate { key_match2_regex(&pattern) } else { pattern };
        cache.insert(&pattern)?;
    }
    Ok(())
}
