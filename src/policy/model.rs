//! Model definition parsing.
//!
//! A model is an INI-like document with four required sections:
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub_rule, obj, act
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = eval(p.sub_rule) && regexMatch(r.obj.resource, p.obj) && regexMatch(r.act, p.act)
//! ```
//!
//! Role definitions (`[role_definition]`) are not supported and rejected at load time.

use crate::core::error::{GatewayError, GatewayResult};
use std::collections::HashMap;

/// How matching policy rows combine into a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// `some(where (p.eft == allow))`: allowed if any row matches
    AllowOverride,
}

impl Effect {
    fn parse(text: &str) -> GatewayResult<Self> {
        let normalized: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        match normalized.as_str() {
            "some(where(p.eft==allow))" => Ok(Self::AllowOverride),
            _ => Err(GatewayError::config(format!("Unsupported policy effect '{}'", text))),
        }
    }
}

/// Parsed model sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
    /// Request tokens, bound positionally to (subject, resource, action)
    pub request_tokens: Vec<String>,
    /// Policy tokens, bound positionally to (rule, resource, methods)
    pub policy_tokens: Vec<String>,
    pub effect: Effect,
    /// Matcher expression source
    pub matcher: String,
}

impl ModelDefinition {
    pub fn parse(text: &str) -> GatewayResult<Self> {
        let sections = parse_sections(text)?;

        let entry = |section: &str, key: &str| -> GatewayResult<&String> {
            sections
                .get(section)
                .and_then(|entries| entries.get(key))
                .ok_or_else(|| GatewayError::config(format!("Model is missing '{}' in [{}]", key, section)))
        };

        let request_tokens = tokens(entry("request_definition", "r")?);
        let policy_tokens = tokens(entry("policy_definition", "p")?);
        let effect = Effect::parse(entry("policy_effect", "e")?)?;
        let matcher = entry("matchers", "m")?.clone();

        if request_tokens.len() != 3 {
            return Err(GatewayError::config(format!(
                "request_definition must declare exactly 3 tokens (subject, resource, action), got {}",
                request_tokens.len()
            )));
        }
        if policy_tokens.len() != 3 {
            return Err(GatewayError::config(format!(
                "policy_definition must declare exactly 3 tokens (rule, resource, methods), got {}",
                policy_tokens.len()
            )));
        }

        Ok(Self {
            request_tokens,
            policy_tokens,
            effect,
            matcher,
        })
    }
}

fn tokens(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_sections(text: &str) -> GatewayResult<HashMap<String, HashMap<String, String>>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;
    let mut pending = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }

        // trailing backslash continues the entry on the next line
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        let line = std::mem::take(&mut pending);
        let line = line.trim();

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            match name.as_str() {
                "request_definition" | "policy_definition" | "policy_effect" | "matchers" => {}
                other => {
                    return Err(GatewayError::config(format!("Unsupported model section [{}]", other)));
                }
            }
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let section = current
            .as_ref()
            .ok_or_else(|| GatewayError::config(format!("Model entry outside of a section: '{}'", line)))?;
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| GatewayError::config(format!("Malformed model entry: '{}'", line)))?;

        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(sections)
}
