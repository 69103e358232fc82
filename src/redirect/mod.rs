//! Open-redirect-safe resolution of post-auth redirect targets.
//!
//! A candidate is accepted when it points at the site's own host or matches
//! an allow-list entry. http(s) entries are globs matched against the
//! normalized candidate; any other entry must equal the raw candidate.

pub mod glob;

use url::{Position, Url};

use crate::config::SiteConfig;
pub use glob::{Glob, GlobError};

/// Separator that `*` and `?` never cross in allow-list globs.
const GLOB_SEPARATOR: char = '.';

#[derive(Clone, Debug)]
enum Matcher {
    Glob(Glob),
    Exact,
}

#[derive(Clone, Debug)]
struct AllowListEntry {
    uri: String,
    matcher: Matcher,
}

impl AllowListEntry {
    fn compile(uri: &str) -> Result<Self, GlobError> {
        let matcher = if uri.starts_with("http") {
            Matcher::Glob(Glob::compile(uri, GLOB_SEPARATOR)?)
        } else {
            Matcher::Exact
        };
        Ok(Self {
            uri: uri.to_string(),
            matcher,
        })
    }

    fn matches(&self, raw: &str, normalized: &str) -> bool {
        match &self.matcher {
            Matcher::Glob(glob) => glob.is_match(normalized),
            Matcher::Exact => raw == self.uri,
        }
    }
}

/// Allow-list and site URL compiled once; read-only while serving.
#[derive(Clone, Debug)]
pub struct RedirectResolver {
    site_url: String,
    site_host: Option<String>,
    allow_list: Vec<AllowListEntry>,
}

impl RedirectResolver {
    /// # Errors
    /// Returns an error if an allow-list glob is malformed.
    pub fn new(site_url: &str, allow_list: &[String]) -> Result<Self, GlobError> {
        let allow_list = allow_list
            .iter()
            .map(String::as_str)
            .filter(|uri| !uri.is_empty())
            .map(AllowListEntry::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            site_url: site_url.to_string(),
            site_host: host_of(site_url),
            allow_list,
        })
    }

    /// # Errors
    /// Returns an error if an allow-list glob is malformed.
    pub fn from_config(config: &SiteConfig) -> Result<Self, GlobError> {
        Self::new(config.site_url(), config.uri_allow_list())
    }

    #[must_use]
    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    /// Whether `candidate` is a safe place to send the browser.
    #[must_use]
    pub fn is_valid(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }

        if let (Some(site), Some(host)) = (self.site_host.as_deref(), host_of(candidate)) {
            if site == host {
                return true;
            }
        }

        let normalized = normalize(candidate);
        self.allow_list
            .iter()
            .any(|entry| entry.matches(candidate, &normalized))
    }

    /// Pick where to send the browser: the explicit `redirect_to` value (header
    /// first, then form/query), else the referrer, else the site URL.
    #[must_use]
    pub fn effective_redirect(
        &self,
        header: Option<&str>,
        form: Option<&str>,
        referrer: Option<&str>,
    ) -> String {
        let requested = header
            .filter(|value| !value.is_empty())
            .or_else(|| form.filter(|value| !value.is_empty()));

        if let Some(requested) = requested.filter(|value| self.is_valid(value)) {
            return requested.to_string();
        }

        match referrer.filter(|value| self.is_valid(value)) {
            Some(referrer) => referrer.to_string(),
            None => self.site_url.clone(),
        }
    }

    /// Like [`Self::effective_redirect`], trying an explicit candidate first.
    #[must_use]
    pub fn resolve_with_candidate(
        &self,
        candidate: Option<&str>,
        header: Option<&str>,
        form: Option<&str>,
        referrer: Option<&str>,
    ) -> String {
        match candidate.filter(|value| self.is_valid(value)) {
            Some(candidate) => candidate.to_string(),
            None => self.effective_redirect(header, form, referrer),
        }
    }
}

fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .filter(|host| !host.is_empty())
}

/// Strip trailing `/` from the path of http(s) URLs so that
/// `https://a.example/cb/` and `https://a.example/cb` compare equal.
///
/// Other schemes and unparsable input come back unchanged.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if !matches!(url.scheme(), "http" | "https") {
        return raw.to_string();
    }

    let path = url.path().trim_end_matches('/');
    format!(
        "{}{}{}",
        &url[..Position::BeforePath],
        path,
        &url[Position::AfterPath..]
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn resolver(allow_list: &[&str]) -> RedirectResolver {
        let allow_list: Vec<String> = allow_list.iter().map(ToString::to_string).collect();
        RedirectResolver::new("https://trusted.example", &allow_list).unwrap()
    }

    #[test]
    fn same_host_is_always_valid() {
        let r = resolver(&[]);
        assert!(r.is_valid("https://trusted.example/any/path?x=1#frag"));
        assert!(r.is_valid("http://trusted.example:8443/"));
        assert!(r.is_valid("https://TRUSTED.example/"));
        assert!(!r.is_valid("https://trusted.example.evil.com/"));
        assert!(!r.is_valid(""));
    }

    #[test]
    fn http_entries_match_normalized_candidates() {
        let r = resolver(&["https://a.example/cb"]);
        assert!(r.is_valid("https://a.example/cb"));
        assert!(r.is_valid("https://a.example/cb/"));
        assert!(!r.is_valid("https://a.example/cb/extra"));
        assert!(!r.is_valid("https://b.example/cb"));
    }

    #[test]
    fn custom_scheme_entries_require_exact_match() {
        let r = resolver(&["myapp://callback"]);
        assert!(r.is_valid("myapp://callback"));
        assert!(!r.is_valid("myapp://callback/"));
        assert!(!r.is_valid("myapp://callback?x=1"));
        assert!(!r.is_valid("MYAPP://callback"));
    }

    #[test]
    fn wildcard_entries() {
        let r = resolver(&["https://*.preview.example/**"]);
        assert!(r.is_valid("https://pr-12.preview.example/login"));
        assert!(!r.is_valid("https://a.b.preview.example/login"));
    }

    #[test]
    fn normalize_is_http_only_and_idempotent() {
        assert_eq!(normalize("https://a.example/cb/"), "https://a.example/cb");
        assert_eq!(normalize("https://a.example/cb/?x=1"), "https://a.example/cb?x=1");
        assert_eq!(normalize("https://a.example/"), "https://a.example");
        assert_eq!(normalize("myapp://callback/"), "myapp://callback/");
        assert_eq!(normalize("not a url"), "not a url");

        for raw in ["https://a.example/cb//", "https://a.example/", "http://x.example/a/b/"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn referrer_used_when_redirect_missing() {
        let r = resolver(&[]);
        assert_eq!(
            r.effective_redirect(None, None, Some("https://trusted.example/page")),
            "https://trusted.example/page"
        );
        assert_eq!(
            r.effective_redirect(Some(""), Some(""), Some("https://evil.example/")),
            "https://trusted.example"
        );
        assert_eq!(r.effective_redirect(None, None, None), "https://trusted.example");
    }

    #[test]
    fn header_wins_over_form() {
        let r = resolver(&["https://a.example/**"]);
        assert_eq!(
            r.effective_redirect(
                Some("https://a.example/from-header"),
                Some("https://a.example/from-form"),
                None
            ),
            "https://a.example/from-header"
        );
        assert_eq!(
            r.effective_redirect(None, Some("https://a.example/from-form"), None),
            "https://a.example/from-form"
        );
        // an invalid header value falls through to the referrer, not the form
        assert_eq!(
            r.effective_redirect(
                Some("https://evil.example/"),
                Some("https://a.example/from-form"),
                Some("https://trusted.example/ref")
            ),
            "https://trusted.example/ref"
        );
    }

    #[test]
    fn explicit_candidate_first() {
        let r = resolver(&["myapp://callback"]);
        assert_eq!(
            r.resolve_with_candidate(Some("myapp://callback"), None, None, None),
            "myapp://callback"
        );
        assert_eq!(
            r.resolve_with_candidate(Some("https://evil.example"), None, None, None),
            "https://trusted.example"
        );
    }

    #[test]
    fn malformed_allow_list_is_rejected() {
        let allow_list = vec!["https://{a,b".to_string()];
        assert!(RedirectResolver::new("https://trusted.example", &allow_list).is_err());
    }
}
