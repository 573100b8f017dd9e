//! Request modifiers: header spoofing, cookie filtering and URL rewrites.

use super::{header_name, set_header, set_or_remove_header};
use crate::proxychain::{request_modifier, ModifierError, ProxyChain, RequestModifier};
use hyper::header::{HeaderValue, COOKIE, ORIGIN, REFERER, USER_AGENT};
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

const GOOGLE_BOT_UA: &str = "Mozilla/5.0 AppleWebKit/537.36 (KHTML, like Gecko; compatible; Googlebot/2.1; http://www.google.com/bot.html) Chrome/79.0.3945.120 Safari/537.36";
const GOOGLE_BOT_IP: &str = "66.249.78.8";
const BING_BOT_UA: &str = "Mozilla/5.0 AppleWebKit/537.36 (KHTML, like Gecko; compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm) Chrome/79.0.3945.120 Safari/537.36";
const BING_BOT_IP: &str = "13.66.144.9";

const ARCHIVE_IS_URL: &str = "https://archive.is/latest/";
const GOOGLE_CACHE_URL: &str = "https://webcache.googleusercontent.com/search?q=cache:";
const WAYBACK_URL: &str = "https://web.archive.org/web/";

fn target_url(chain: &ProxyChain) -> Result<String, ModifierError> {
    chain
        .url()
        .map(Url::to_string)
        .ok_or(ModifierError::MissingState("target url"))
}

// ===== Headers =====

pub fn set_request_header(name: impl Into<String>, value: impl Into<String>) -> RequestModifier {
    let name = name.into();
    let value = value.into();
    request_modifier(move |chain| {
        set_or_remove_header(&mut chain.request_mut()?.headers, &name, &value)
    })
}

/// Removing a header that is not present is a no-op.
pub fn delete_request_header(name: impl Into<String>) -> RequestModifier {
    let name = name.into();
    request_modifier(move |chain| {
        let header = header_name(&name)?;
        chain.request_mut()?.headers.remove(header);
        Ok(())
    })
}

pub fn spoof_user_agent(user_agent: impl Into<String>) -> RequestModifier {
    let user_agent = user_agent.into();
    request_modifier(move |chain| {
        set_header(&mut chain.request_mut()?.headers, USER_AGENT.as_str(), &user_agent)
    })
}

/// Some upstreams trust `X-Forwarded-For` as the client address.
pub fn spoof_x_forwarded_for(ip: impl Into<String>) -> RequestModifier {
    let ip = ip.into();
    request_modifier(move |chain| {
        set_header(&mut chain.request_mut()?.headers, "x-forwarded-for", &ip)
    })
}

/// Pretend the request came from `url`. An empty `url` removes the header.
pub fn spoof_referrer(url: impl Into<String>) -> RequestModifier {
    let url = url.into();
    request_modifier(move |chain| {
        set_or_remove_header(&mut chain.request_mut()?.headers, REFERER.as_str(), &url)
    })
}

/// Set the referer to the target itself instead of the proxy page.
pub fn hide_referrer() -> RequestModifier {
    request_modifier(|chain| {
        let target = target_url(chain)?;
        set_header(&mut chain.request_mut()?.headers, REFERER.as_str(), &target)
    })
}

pub fn spoof_origin(url: impl Into<String>) -> RequestModifier {
    let url = url.into();
    request_modifier(move |chain| {
        set_header(&mut chain.request_mut()?.headers, ORIGIN.as_str(), &url)
    })
}

/// Set the origin to the target URL instead of the proxy.
pub fn hide_origin() -> RequestModifier {
    request_modifier(|chain| {
        let target = target_url(chain)?;
        set_header(&mut chain.request_mut()?.headers, ORIGIN.as_str(), &target)
    })
}

/// Look like Googlebot: user agent, a crawler address, and no referer.
pub fn masquerade_as_google_bot() -> RequestModifier {
    masquerade_as_trusted_bot(GOOGLE_BOT_UA, GOOGLE_BOT_IP)
}

/// Look like Bingbot: user agent, a crawler address, and no referer.
pub fn masquerade_as_bing_bot() -> RequestModifier {
    masquerade_as_trusted_bot(BING_BOT_UA, BING_BOT_IP)
}

fn masquerade_as_trusted_bot(user_agent: &'static str, ip: &'static str) -> RequestModifier {
    request_modifier(move |chain| {
        chain.add_request_modifiers([
            spoof_user_agent(user_agent),
            spoof_x_forwarded_for(ip),
            spoof_referrer(""),
        ]);
        Ok(())
    })
}

// ===== Cookies =====

/// Strip every cookie from the outbound request.
pub fn block_outgoing_cookies() -> RequestModifier {
    request_modifier(|chain| {
        chain.request_mut()?.headers.remove(COOKIE);
        Ok(())
    })
}

/// Strip all outbound cookies except those named in `allowed`.
pub fn block_outgoing_cookies_except<I, S>(allowed: I) -> RequestModifier
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let allowed: HashSet<String> = allowed.into_iter().map(Into::into).collect();
    request_modifier(move |chain| {
        let headers = &mut chain.request_mut()?.headers;
        let kept: Vec<String> = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .map(str::trim)
            .filter(|pair| {
                let name = pair.split('=').next().unwrap_or_default().trim();
                !name.is_empty() && allowed.contains(name)
            })
            .map(str::to_string)
            .collect();

        headers.remove(COOKIE);
        if !kept.is_empty() {
            let joined = kept.join("; ");
            let value = HeaderValue::from_str(&joined)
                .map_err(|e| ModifierError::header(COOKIE.as_str(), e))?;
            headers.insert(COOKIE, value);
        }
        Ok(())
    })
}

// ===== URL rewrites =====

/// Rewrite the target host with `pattern`. `replacement` may use `$1`-style
/// group references.
pub fn modify_domain_with_regex(
    pattern: Regex,
    replacement: impl Into<String>,
) -> RequestModifier {
    let replacement = replacement.into();
    request_modifier(move |chain| {
        let url = chain.url_mut()?;
        let host = url.host_str().unwrap_or_default().to_string();
        let rewritten = pattern.replace_all(&host, replacement.as_str());
        if rewritten != host {
            debug!("Rewriting host '{}' -> '{}'", host, rewritten);
            url.set_host(Some(rewritten.as_ref()))?;
        }
        Ok(())
    })
}

/// Rewrite the target path with `pattern`.
pub fn modify_path_with_regex(pattern: Regex, replacement: impl Into<String>) -> RequestModifier {
    let replacement = replacement.into();
    request_modifier(move |chain| {
        let url = chain.url_mut()?;
        let path = url.path().to_string();
        let rewritten = pattern.replace_all(&path, replacement.as_str());
        if rewritten != path {
            debug!("Rewriting path '{}' -> '{}'", path, rewritten);
            url.set_path(rewritten.as_ref());
        }
        Ok(())
    })
}

/// Set query parameter `key` to `value`, replacing existing values. An empty
/// `value` removes the parameter.
pub fn modify_query_params(key: impl Into<String>, value: impl Into<String>) -> RequestModifier {
    let key = key.into();
    let value = value.into();
    request_modifier(move |chain| {
        let url = chain.url_mut()?;
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let position = pairs.iter().position(|(k, _)| *k == key);
        pairs.retain(|(k, _)| *k != key);
        if !value.is_empty() {
            let at = position.unwrap_or(pairs.len());
            pairs.insert(at, (key.clone(), value.clone()));
        }

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        Ok(())
    })
}

fn mirror(chain: &mut ProxyChain, prefix: &str, drop_query: bool) -> Result<(), ModifierError> {
    let url = chain.url_mut()?;
    if drop_query {
        url.set_query(None);
    }
    let mirrored = Url::parse(&format!("{prefix}{url}"))?;
    debug!("Requesting mirror {}", mirrored);
    chain.set_url(mirrored);
    Ok(())
}

/// Fetch the latest archive.is snapshot instead of the live page.
pub fn request_archive_is() -> RequestModifier {
    request_modifier(|chain| mirror(chain, ARCHIVE_IS_URL, true))
}

/// Fetch the Wayback Machine copy instead of the live page.
pub fn request_wayback_machine() -> RequestModifier {
    request_modifier(|chain| mirror(chain, WAYBACK_URL, true))
}

/// Fetch Google's cached copy instead of the live page.
pub fn request_google_cache() -> RequestModifier {
    request_modifier(|chain| {
        let target = target_url(chain)?;
        let cached = Url::parse(&format!(
            "{GOOGLE_CACHE_URL}{}",
            urlencoding::encode(&target)
        ))?;
        debug!("Requesting mirror {}", cached);
        chain.set_url(cached);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, outbound};
    use hyper::header::HeaderMap;

    fn with_headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[tokio::test]
    async fn test_spoof_user_agent_and_forwarded_for() {
        let ctx = context(
            "/https://example.com/",
            with_headers(&[("user-agent", "curl/8")]),
        );
        let (_, req) = outbound(
            ctx,
            vec![spoof_user_agent("ladder"), spoof_x_forwarded_for("10.0.0.1")],
        )
        .await;
        assert_eq!(req.header("user-agent").unwrap(), "ladder");
        assert_eq!(req.header("x-forwarded-for").unwrap(), "10.0.0.1");
    }

    #[tokio::test]
    async fn test_spoof_referrer_empty_removes_header() {
        let ctx = context(
            "/https://example.com/",
            with_headers(&[("referer", "https://proxyhost/https://example.com/")]),
        );
        let (_, req) = outbound(ctx, vec![spoof_referrer("")]).await;
        assert!(req.header("referer").is_none());
    }

    #[tokio::test]
    async fn test_hide_referrer_and_origin_use_target() {
        let ctx = context("/https://example.com/a", HeaderMap::new());
        let (_, req) = outbound(ctx, vec![hide_referrer(), hide_origin()]).await;
        assert_eq!(req.header("referer").unwrap(), "https://example.com/a");
        assert_eq!(req.header("origin").unwrap(), "https://example.com/a");
    }

    #[tokio::test]
    async fn test_spoof_origin() {
        let ctx = context("/https://example.com/a", HeaderMap::new());
        let (_, req) = outbound(ctx, vec![spoof_origin("https://news.example.org")]).await;
        assert_eq!(req.header("origin").unwrap(), "https://news.example.org");
    }

    #[tokio::test]
    async fn test_masquerade_as_google_bot_appends_spoofers() {
        let ctx = context(
            "/https://example.com/",
            with_headers(&[("referer", "https://proxyhost/x"), ("user-agent", "curl/8")]),
        );
        let (_, req) = outbound(ctx, vec![masquerade_as_google_bot()]).await;
        assert_eq!(req.header("user-agent").unwrap(), GOOGLE_BOT_UA);
        assert_eq!(req.header("x-forwarded-for").unwrap(), GOOGLE_BOT_IP);
        assert!(req.header("referer").is_none());
    }

    #[tokio::test]
    async fn test_masquerade_spoofers_run_after_queued_modifiers() {
        // Appended spoofers run after the rest of the queue.
        let ctx = context("/https://example.com/", HeaderMap::new());
        let (_, req) = outbound(
            ctx,
            vec![masquerade_as_bing_bot(), spoof_user_agent("custom")],
        )
        .await;
        assert_eq!(req.header("user-agent").unwrap(), BING_BOT_UA);
        assert_eq!(req.header("x-forwarded-for").unwrap(), BING_BOT_IP);
    }

    #[tokio::test]
    async fn test_block_outgoing_cookies() {
        let ctx = context(
            "/https://example.com/",
            with_headers(&[("cookie", "a=1; b=2")]),
        );
        let (_, req) = outbound(ctx, vec![block_outgoing_cookies()]).await;
        assert!(req.header("cookie").is_none());
    }

    #[tokio::test]
    async fn test_block_outgoing_cookies_except_keeps_allowed() {
        let ctx = context(
            "/https://example.com/",
            with_headers(&[("cookie", "a=1; session=abc; b=2"), ("cookie", "consent=yes")]),
        );
        let (_, req) = outbound(
            ctx,
            vec![block_outgoing_cookies_except(["session", "consent"])],
        )
        .await;
        assert_eq!(req.header("cookie").unwrap(), "session=abc; consent=yes");
        assert_eq!(req.headers.get_all("cookie").iter().count(), 1);
    }

    #[tokio::test]
    async fn test_block_outgoing_cookies_except_none_allowed() {
        let ctx = context("/https://example.com/", with_headers(&[("cookie", "a=1")]));
        let empty: [&str; 0] = [];
        let (_, req) = outbound(ctx, vec![block_outgoing_cookies_except(empty)]).await;
        assert!(req.header("cookie").is_none());
    }

    #[tokio::test]
    async fn test_modify_domain_with_regex() {
        let ctx = context("/https://www.example.com/a", HeaderMap::new());
        let pattern = Regex::new(r"^www\.(.+)$").unwrap();
        let (url, _) = outbound(ctx, vec![modify_domain_with_regex(pattern, "amp.$1")]).await;
        assert_eq!(url.as_str(), "https://amp.example.com/a");
    }

    #[tokio::test]
    async fn test_modify_path_with_regex() {
        let ctx = context("/https://example.com/amp/story/1?x=1", HeaderMap::new());
        let pattern = Regex::new(r"^/amp/").unwrap();
        let (url, _) = outbound(ctx, vec![modify_path_with_regex(pattern, "/")]).await;
        assert_eq!(url.as_str(), "https://example.com/story/1?x=1");
    }

    #[tokio::test]
    async fn test_modify_query_params_sets_and_replaces() {
        let ctx = context("/https://example.com/?a=1&b=2&a=3", HeaderMap::new());
        let (url, _) = outbound(
            ctx,
            vec![modify_query_params("a", "9"), modify_query_params("c", "x y")],
        )
        .await;
        assert_eq!(url.as_str(), "https://example.com/?a=9&b=2&c=x+y");
    }

    #[tokio::test]
    async fn test_modify_query_params_empty_value_deletes() {
        let ctx = context("/https://example.com/?a=1&b=2", HeaderMap::new());
        let (url, _) = outbound(ctx, vec![modify_query_params("a", "")]).await;
        assert_eq!(url.as_str(), "https://example.com/?b=2");

        let ctx = context("/https://example.com/?a=1", HeaderMap::new());
        let (url, _) = outbound(ctx, vec![modify_query_params("a", "")]).await;
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[tokio::test]
    async fn test_request_archive_is_drops_query() {
        let ctx = context("/https://example.com/a?utm=1", HeaderMap::new());
        let (url, _) = outbound(ctx, vec![request_archive_is()]).await;
        assert_eq!(
            url.as_str(),
            "https://archive.is/latest/https://example.com/a"
        );
    }

    #[tokio::test]
    async fn test_request_wayback_machine_drops_query() {
        let ctx = context("/https://example.com/a?utm=1", HeaderMap::new());
        let (url, _) = outbound(ctx, vec![request_wayback_machine()]).await;
        assert_eq!(url.as_str(), "https://web.archive.org/web/https://example.com/a");
    }

    #[tokio::test]
    async fn test_request_google_cache_escapes_target() {
        let ctx = context("/https://example.com/a?b=1", HeaderMap::new());
        let (url, _) = outbound(ctx, vec![request_google_cache()]).await;
        assert_eq!(
            url.as_str(),
            "https://webcache.googleusercontent.com/search?q=cache:https%3A%2F%2Fexample.com%2Fa%3Fb%3D1"
        );
    }

    #[tokio::test]
    async fn test_set_and_delete_request_header() {
        let ctx = context(
            "/https://example.com/",
            with_headers(&[("x-debug", "1"), ("dnt", "1")]),
        );
        let (_, req) = outbound(
            ctx,
            vec![
                set_request_header("x-ladder", "on"),
                delete_request_header("x-debug"),
                delete_request_header("x-absent"),
                set_request_header("dnt", ""),
            ],
        )
        .await;
        assert_eq!(req.header("x-ladder").unwrap(), "on");
        assert!(req.header("x-debug").is_none());
        assert!(req.header("dnt").is_none());
    }
}
