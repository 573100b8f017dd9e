//! Rule set: picks modifiers for an exchange from the target host.

use crate::config::{RequestModifierSpec, ResponseModifierSpec, Rule};
use crate::modifiers;
use crate::proxychain::{RequestModifier, ResponseModifier, RuleSelector, SelectedModifiers};
use hyper::header::{HeaderName, HeaderValue};
use regex::Regex;
use tracing::debug;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule #{rule}: invalid domain pattern '{pattern}'")]
    Domain { rule: usize, pattern: String },
    #[error("rule #{rule}: invalid regex '{pattern}': {source}")]
    Regex {
        rule: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule #{rule}: invalid header '{name}': {reason}")]
    Header {
        rule: usize,
        name: String,
        reason: String,
    },
}

/// Compiled domain rules. All rules whose domains match the target host
/// contribute their modifiers, in configuration order.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

struct CompiledRule {
    hosts: Vec<HostPattern>,
    request: Vec<RequestModifier>,
    response: Vec<ResponseModifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Exact(String),
    /// `*.example.com`, stored as `example.com`
    Suffix(String),
}

impl HostPattern {
    fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern == "*" {
            return Some(HostPattern::Any);
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return None;
            }
            return Some(HostPattern::Suffix(suffix.to_string()));
        }
        if pattern.is_empty() || pattern.contains('*') {
            return None;
        }
        Some(HostPattern::Exact(pattern))
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Any => true,
            HostPattern::Exact(exact) => host == exact,
            HostPattern::Suffix(suffix) => host
                .strip_suffix(suffix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.ends_with('.')),
        }
    }
}

impl RuleSet {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn compile(rules: &[Rule]) -> Result<Self, RuleError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (idx, rule) in rules.iter().enumerate() {
            compiled.push(compile_rule(idx, rule)?);
        }
        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleSelector for RuleSet {
    fn select(&self, url: &Url) -> SelectedModifiers {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let mut selected = SelectedModifiers::default();
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.hosts.iter().any(|pattern| pattern.matches(&host)) {
                debug!("Rule #{} matches host '{}'", idx, host);
                selected.request.extend(rule.request.iter().cloned());
                selected.response.extend(rule.response.iter().cloned());
            }
        }
        selected
    }
}

fn compile_rule(idx: usize, rule: &Rule) -> Result<CompiledRule, RuleError> {
    let hosts = rule
        .domains
        .iter()
        .map(|domain| {
            HostPattern::parse(domain).ok_or_else(|| RuleError::Domain {
                rule: idx,
                pattern: domain.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let request = rule
        .request
        .iter()
        .map(|spec| compile_request(idx, spec))
        .collect::<Result<Vec<_>, _>>()?;
    let response = rule
        .response
        .iter()
        .map(|spec| compile_response(idx, spec))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompiledRule {
        hosts,
        request,
        response,
    })
}

fn regex(rule: usize, pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(pattern).map_err(|source| RuleError::Regex {
        rule,
        pattern: pattern.to_string(),
        source,
    })
}

fn check_header(rule: usize, name: &str, value: &str) -> Result<(), RuleError> {
    let invalid = |reason: String| RuleError::Header {
        rule,
        name: name.to_string(),
        reason,
    };
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

fn compile_request(rule: usize, spec: &RequestModifierSpec) -> Result<RequestModifier, RuleError> {
    let modifier = match spec {
        RequestModifierSpec::SpoofUserAgent { user_agent } => {
            check_header(rule, "user-agent", user_agent)?;
            modifiers::spoof_user_agent(user_agent.as_str())
        }
        RequestModifierSpec::SpoofXForwardedFor { ip } => {
            check_header(rule, "x-forwarded-for", ip)?;
            modifiers::spoof_x_forwarded_for(ip.as_str())
        }
        RequestModifierSpec::SpoofReferrer { url } => {
            check_header(rule, "referer", url)?;
            modifiers::spoof_referrer(url.as_str())
        }
        RequestModifierSpec::HideReferrer => modifiers::hide_referrer(),
        RequestModifierSpec::SpoofOrigin { url } => {
            check_header(rule, "origin", url)?;
            modifiers::spoof_origin(url.as_str())
        }
        RequestModifierSpec::HideOrigin => modifiers::hide_origin(),
        RequestModifierSpec::MasqueradeAsGoogleBot => modifiers::masquerade_as_google_bot(),
        RequestModifierSpec::MasqueradeAsBingBot => modifiers::masquerade_as_bing_bot(),
        RequestModifierSpec::BlockOutgoingCookies { except } if except.is_empty() => {
            modifiers::block_outgoing_cookies()
        }
        RequestModifierSpec::BlockOutgoingCookies { except } => {
            modifiers::block_outgoing_cookies_except(except.iter().cloned())
        }
        RequestModifierSpec::ModifyDomainWithRegex {
            pattern,
            replacement,
        } => modifiers::modify_domain_with_regex(regex(rule, pattern)?, replacement.as_str()),
        RequestModifierSpec::ModifyPathWithRegex {
            pattern,
            replacement,
        } => modifiers::modify_path_with_regex(regex(rule, pattern)?, replacement.as_str()),
        RequestModifierSpec::ModifyQueryParam { key, value } => {
            modifiers::modify_query_params(key.as_str(), value.as_str())
        }
        RequestModifierSpec::RequestArchiveIs => modifiers::request_archive_is(),
        RequestModifierSpec::RequestGoogleCache => modifiers::request_google_cache(),
        RequestModifierSpec::RequestWaybackMachine => modifiers::request_wayback_machine(),
        RequestModifierSpec::SetHeader { name, value } => {
            check_header(rule, name, value)?;
            modifiers::set_request_header(name.as_str(), value.as_str())
        }
        RequestModifierSpec::DeleteHeader { name } => {
            check_header(rule, name, "")?;
            modifiers::delete_request_header(name.as_str())
        }
    };
    Ok(modifier)
}

fn compile_response(
    rule: usize,
    spec: &ResponseModifierSpec,
) -> Result<ResponseModifier, RuleError> {
    let modifier = match spec {
        ResponseModifierSpec::SetHeader { name, value } => {
            check_header(rule, name, value)?;
            modifiers::modify_response_header(name.as_str(), value.as_str())
        }
        ResponseModifierSpec::DeleteHeader { name } => {
            check_header(rule, name, "")?;
            modifiers::delete_response_header(name.as_str())
        }
        ResponseModifierSpec::BypassCors => modifiers::bypass_cors(),
        ResponseModifierSpec::BypassCsp => modifiers::bypass_csp(),
        ResponseModifierSpec::Outline => modifiers::outline(),
    };
    Ok(modifier)
}
