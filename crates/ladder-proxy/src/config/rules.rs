//! Domain rules: which modifiers apply to which upstream hosts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    /// Hosts the rule applies to: `example.com`, `*.example.com`, or `*`.
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request: Vec<RequestModifierSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<ResponseModifierSpec>,
}

/// Declarative form of the built-in request modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestModifierSpec {
    SpoofUserAgent {
        user_agent: String,
    },
    SpoofXForwardedFor {
        ip: String,
    },
    /// Empty url removes the header
    SpoofReferrer {
        #[serde(default)]
        url: String,
    },
    HideReferrer,
    SpoofOrigin {
        url: String,
    },
    HideOrigin,
    MasqueradeAsGoogleBot,
    MasqueradeAsBingBot,
    BlockOutgoingCookies {
        /// Cookie names that are still forwarded
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        except: Vec<String>,
    },
    ModifyDomainWithRegex {
        pattern: String,
        replacement: String,
    },
    ModifyPathWithRegex {
        pattern: String,
        replacement: String,
    },
    /// Empty value removes the parameter
    ModifyQueryParam {
        key: String,
        #[serde(default)]
        value: String,
    },
    RequestArchiveIs,
    RequestGoogleCache,
    RequestWaybackMachine,
    /// Empty value removes the header
    SetHeader {
        name: String,
        #[serde(default)]
        value: String,
    },
    DeleteHeader {
        name: String,
    },
}

/// Declarative form of the built-in response modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseModifierSpec {
    /// Empty value removes the header
    SetHeader {
        name: String,
        #[serde(default)]
        value: String,
    },
    DeleteHeader {
        name: String,
    },
    BypassCors,
    BypassCsp,
    Outline,
}
