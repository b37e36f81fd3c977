//! Minimal user-agent parsing for `ua_based` conditions.
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

/// `(pattern, name)` pairs tried in order. The first capture group is the version.
const OS_PATTERNS: &[(&str, &str)] = &[
    (r"Windows Phone (?:OS )?(\d+(?:\.\d+)*)", "Windows Phone"),
    (r"Windows NT (\d+(?:\.\d+)*)", "Windows"),
    (r"(?:iPhone|iPad|iPod).*? OS (\d+(?:_\d+)*)", "iOS"),
    (r"Android[ /]?(\d+(?:\.\d+)*)?", "Android"),
    (r"CrOS \S+ (\d+(?:\.\d+)*)", "Chrome OS"),
    (r"Mac OS X ?(\d+(?:[_.]\d+)*)?", "Mac OS X"),
    (r"Ubuntu(?:/(\d+(?:\.\d+)*))?", "Ubuntu"),
    (r"Linux()", "Linux"),
];

const BROWSER_PATTERNS: &[(&str, &str)] = &[
    (r"Edg(?:e|A|iOS)?/(\d+(?:\.\d+)*)", "Edge"),
    (r"(?:OPR|Opera)/(\d+(?:\.\d+)*)", "Opera"),
    (r"SamsungBrowser/(\d+(?:\.\d+)*)", "Samsung Internet"),
    (r"FxiOS/(\d+(?:\.\d+)*)", "Firefox iOS"),
    (r"Firefox/(\d+(?:\.\d+)*)", "Firefox"),
    (r"CriOS/(\d+(?:\.\d+)*)", "Chrome Mobile iOS"),
    (r"Chrome/(\d+(?:\.\d+)*) Mobile", "Chrome Mobile"),
    (r"Chrome/(\d+(?:\.\d+)*)", "Chrome"),
    (r"Version/(\d+(?:\.\d+)*).*Mobile.*Safari/", "Mobile Safari"),
    (r"Version/(\d+(?:\.\d+)*).*Safari/", "Safari"),
    (r"(?:MSIE |Trident/.*rv:)(\d+(?:\.\d+)*)", "IE"),
];

fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .map(|(pattern, name)| (Regex::new(pattern).expect("invalid user agent pattern"), *name))
        .collect()
}

fn os_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(OS_PATTERNS))
}

fn browser_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(BROWSER_PATTERNS))
}

fn detect(patterns: &[(Regex, &'static str)], user_agent: &str) -> (Option<String>, Option<String>) {
    for (regex, name) in patterns {
        if let Some(captures) = regex.captures(user_agent) {
            let version = captures
                .get(1)
                .map(|m| m.as_str().replace('_', "."))
                .filter(|v| !v.is_empty());
            return (Some((*name).to_owned()), version);
        }
    }
    (None, None)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParsedUserAgent {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
}

impl ParsedUserAgent {
    fn parse(user_agent: &str) -> ParsedUserAgent {
        let (os_name, os_version) = detect(os_patterns(), user_agent);
        let (browser_name, browser_version) = detect(browser_patterns(), user_agent);
        ParsedUserAgent {
            os_name,
            os_version,
            browser_name,
            browser_version,
        }
    }

    fn field(&self, field: &str) -> Option<&str> {
        let value = match field.to_ascii_lowercase().as_str() {
            "os_name" | "osname" => &self.os_name,
            "os_version" | "osversion" => &self.os_version,
            "browser_name" | "browsername" => &self.browser_name,
            "browser_version" | "browserversion" => &self.browser_version,
            _ => return None,
        };
        value.as_deref()
    }
}

/// User-agent parser memoizing only the last parsed string.
#[derive(Debug, Default)]
pub(crate) struct UserAgentParser {
    last: Mutex<Option<(String, Arc<ParsedUserAgent>)>>,
}

impl UserAgentParser {
    pub fn new() -> UserAgentParser {
        UserAgentParser::default()
    }

    /// Read `field` (`os_name`, `os_version`, `browser_name` or `browser_version`) of
    /// `user_agent`.
    pub fn get_field(&self, user_agent: &str, field: &str) -> Option<String> {
        self.parse(user_agent).field(field).map(str::to_owned)
    }

    fn parse(&self, user_agent: &str) -> Arc<ParsedUserAgent> {
        let Ok(mut last) = self.last.lock() else {
            return Arc::new(ParsedUserAgent::parse(user_agent));
        };
        match &*last {
            Some((ua, parsed)) if ua == user_agent => Arc::clone(parsed),
            _ => {
                let parsed = Arc::new(ParsedUserAgent::parse(user_agent));
                *last = Some((user_agent.to_owned(), Arc::clone(&parsed)));
                parsed
            }
        }
    }
}
