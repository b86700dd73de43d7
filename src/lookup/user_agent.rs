//! Token based User-Agent breakdown.
//!
//! Looks for well known `product/version` tokens and the platform comment.
//! Good enough for dashboards; not a device database.

use super::UserAgentParser;
use crate::ecs::{Device, Os, UserAgent};
use crate::error_handling::types::LookupError;

/// Ordered: the first token present names the browser.
const BROWSERS: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("EdgA/", "Edge"),
    ("EdgiOS/", "Edge"),
    ("OPR/", "Opera"),
    ("SamsungBrowser/", "Samsung Browser"),
    ("YaBrowser/", "Yandex Browser"),
    ("FxiOS/", "Firefox"),
    ("Firefox/", "Firefox"),
    ("CriOS/", "Chrome"),
    ("Chrome/", "Chrome"),
    ("Googlebot/", "Googlebot"),
    ("bingbot/", "Bingbot"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUserAgentParser;

impl TokenUserAgentParser {
    pub fn new() -> Self {
        Self
    }
}

impl UserAgentParser for TokenUserAgentParser {
    fn parse(&self, user_agent: &str) -> Result<UserAgent, LookupError> {
        let ua = user_agent.trim();
        if ua.is_empty() {
            return Err(LookupError::Unrecognized("empty user agent".into()));
        }

        let (name, version) = browser(ua).unwrap_or_default();
        let os = os(ua);
        if name.is_empty() && os.is_none() {
            return Err(LookupError::Unrecognized(user_agent.to_string()));
        }

        Ok(UserAgent {
            original: user_agent.to_string(),
            device: device(ua, &name).map(|name| Device { name }),
            name,
            version,
            os,
        })
    }
}

fn token_version(ua: &str, token: &str) -> Option<String> {
    let start = ua.find(token)? + token.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != ';' && *c != ')')
        .collect();
    Some(version)
}

fn browser(ua: &str) -> Option<(String, String)> {
    for (token, name) in BROWSERS {
        if let Some(version) = token_version(ua, token) {
            return Some((name.to_string(), version));
        }
    }
    if ua.contains("Safari/") {
        if let Some(version) = token_version(ua, "Version/") {
            return Some(("Safari".to_string(), version));
        }
    }
    // plain clients: `curl/8.4.0`, `sqlmap/1.7.2#stable`
    let first = ua.split_whitespace().next()?;
    let (name, version) = first.split_once('/')?;
    if name.is_empty() || name == "Mozilla" {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

fn platform(ua: &str) -> Option<&str> {
    let start = ua.find('(')? + 1;
    let end = ua[start..].find(')').map(|e| start + e).unwrap_or(ua.len());
    Some(&ua[start..end])
}

fn os(ua: &str) -> Option<Os> {
    let platform = platform(ua)?;
    let os = |name: &str, version: String| Some(Os { name: name.to_string(), version });

    if let Some(nt) = token_version(platform, "Windows NT ") {
        let version = match nt.as_str() {
            "10.0" => "10".to_string(),
            "6.3" => "8.1".to_string(),
            "6.2" => "8".to_string(),
            "6.1" => "7".to_string(),
            "6.0" => "Vista".to_string(),
            "5.1" | "5.2" => "XP".to_string(),
            _ => nt,
        };
        return os("Windows", version);
    }
    if let Some(v) = token_version(platform, "Android ") {
        return os("Android", v);
    }
    if platform.contains("Android") {
        return os("Android", String::new());
    }
    if let Some(v) =
        token_version(platform, "iPhone OS ").or_else(|| token_version(platform, "CPU OS "))
    {
        return os("iOS", v.replace('_', "."));
    }
    if let Some(v) = token_version(platform, "Mac OS X ") {
        return os("macOS", v.replace('_', "."));
    }
    if platform.contains("CrOS") {
        return os("Chrome OS", String::new());
    }
    if platform.contains("Linux") {
        return os("Linux", String::new());
    }
    None
}

fn device(ua: &str, browser: &str) -> Option<String> {
    if ua.contains("iPhone") {
        return Some("iPhone".into());
    }
    if ua.contains("iPad") {
        return Some("iPad".into());
    }
    if browser.to_ascii_lowercase().ends_with("bot") {
        return Some("Spider".into());
    }
    if ua.contains("Android") && ua.contains("Mobile") {
        return Some("Android Phone".into());
    }
    None
}
