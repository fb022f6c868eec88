//! HTTP session used for asset downloads, carrying cookies copied from the
//! render view so fetches share the browser's authenticated state.

use crate::config::DEFAULT_USER_AGENT;
use crate::render::RenderView;
use crate::{HarvestError, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

impl SessionCookie {
    pub(crate) fn matches(&self, host: &str, path: &str) -> bool {
        let domain = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let host_ok = host == domain || host.ends_with(&format!(".{domain}"));
        host_ok && path.starts_with(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub timeout: Duration,
}

/// Status plus a streaming body; the caller decides whether the status is usable.
pub struct FetchResponse {
    pub status: u16,
    pub body: Box<dyn Read>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpSession {
    /// Insert or replace the cookie keyed by (name, domain, path).
    fn set_cookie(&mut self, cookie: SessionCookie);

    /// Transport failures are `Err`; any HTTP status is `Ok`.
    fn get(&mut self, request: &FetchRequest) -> Result<FetchResponse>;
}

pub(crate) fn upsert_cookie(jar: &mut Vec<SessionCookie>, cookie: SessionCookie) {
    jar.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
    jar.push(cookie);
}

pub(crate) fn cookie_header(jar: &[SessionCookie], url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let pairs: Vec<String> = jar
        .iter()
        .filter(|c| c.matches(&host, parsed.path()))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// `ureq`-backed session with a simple domain/path cookie jar.
pub struct UreqSession {
    agent: ureq::Agent,
    cookies: Vec<SessionCookie>,
}

impl UreqSession {
    pub fn new(user_agent: &str) -> Self {
        let mut config = ureq::Agent::config_builder();
        config = config.http_status_as_error(false).user_agent(user_agent);
        Self {
            agent: config.build().into(),
            cookies: Vec::new(),
        }
    }

    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }
}

impl Default for UreqSession {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl HttpSession for UreqSession {
    fn set_cookie(&mut self, cookie: SessionCookie) {
        upsert_cookie(&mut self.cookies, cookie);
    }

    fn get(&mut self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut builder = self
            .agent
            .get(&request.url)
            .config()
            .timeout_global(Some(request.timeout))
            .build();
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if let Some(cookie) = cookie_header(&self.cookies, &request.url) {
            builder = builder.header("Cookie", cookie.as_str());
        }
        let response = builder
            .call()
            .map_err(|e| HarvestError::Http(format!("GET {} failed: {e}", request.url)))?;
        let status = response.status().as_u16();
        Ok(FetchResponse {
            status,
            body: Box::new(response.into_body().into_reader()),
        })
    }
}

/// Copy every named, non-empty render-view cookie into `session`. Missing
/// domains fall back to `default_domain`, missing paths to `/`.
pub fn sync_cookies<V, S>(view: &mut V, session: &mut S, default_domain: &str) -> Result<usize>
where
    V: RenderView + ?Sized,
    S: HttpSession + ?Sized,
{
    let mut copied = 0;
    for cookie in view.cookies()? {
        if cookie.name.is_empty() || cookie.value.is_empty() {
            continue;
        }
        let domain = cookie
            .domain
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| default_domain.to_string());
        let path = cookie
            .path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "/".to_string());
        session.set_cookie(SessionCookie {
            name: cookie.name,
            value: cookie.value,
            domain,
            path,
        });
        copied += 1;
    }
    Ok(copied)
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Status(u16, Vec<u8>),
    /// Status 200 whose body fails mid-stream after the given bytes.
    Truncated(Vec<u8>),
    TransportError(String),
}

/// In-memory session that answers from a URL → reply table and records every request.
#[derive(Debug, Default)]
pub struct ScriptedSession {
    replies: HashMap<String, ScriptedReply>,
    pub requests: Vec<FetchRequest>,
    pub cookies: Vec<SessionCookie>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, url: &str, reply: ScriptedReply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    pub fn requested_urls(&self) -> Vec<&str> {
        self.requests.iter().map(|r| r.url.as_str()).collect()
    }

    /// `Cookie` header the session would attach for `url`.
    pub fn cookie_header_for(&self, url: &str) -> Option<String> {
        cookie_header(&self.cookies, url)
    }
}

struct FailingReader {
    head: Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.head.read(buf)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset mid-body",
            ));
        }
        Ok(n)
    }
}

impl HttpSession for ScriptedSession {
    fn set_cookie(&mut self, cookie: SessionCookie) {
        upsert_cookie(&mut self.cookies, cookie);
    }

    fn get(&mut self, request: &FetchRequest) -> Result<FetchResponse> {
        self.requests.push(request.clone());
        match self.replies.get(&request.url) {
            Some(ScriptedReply::Status(status, bytes)) => Ok(FetchResponse {
                status: *status,
                body: Box::new(Cursor::new(bytes.clone())),
            }),
            Some(ScriptedReply::Truncated(bytes)) => Ok(FetchResponse {
                status: 200,
                body: Box::new(FailingReader {
                    head: Cursor::new(bytes.clone()),
                }),
            }),
            Some(ScriptedReply::TransportError(message)) => {
                Err(HarvestError::Http(message.clone()))
            }
            None => Ok(FetchResponse {
                status: 404,
                body: Box::new(Cursor::new(Vec::new())),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::BrowserCookie;
    use crate::static_view::SnapshotView;

    fn browser_cookie(name: &str, value: &str, domain: Option<&str>) -> BrowserCookie {
        BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.map(str::to_string),
            path: None,
        }
    }

    #[test]
    fn sync_copies_named_cookies_with_defaults() {
        let mut view = SnapshotView::new()
            .with_cookie(browser_cookie("sid", "abc", None))
            .with_cookie(browser_cookie("cf", "1", Some(".cdn.test")))
            .with_cookie(browser_cookie("", "orphan", None))
            .with_cookie(browser_cookie("empty", "", None));
        let mut session = ScriptedSession::new();

        let copied = sync_cookies(&mut view, &mut session, "www.shop.test").expect("sync");
        assert_eq!(copied, 2);
        assert_eq!(session.cookies[0].domain, "www.shop.test");
        assert_eq!(session.cookies[0].path, "/");
        assert_eq!(session.cookies[1].domain, ".cdn.test");
    }

    #[test]
    fn cookie_header_respects_domain_and_path() {
        let mut session = ScriptedSession::new();
        session.set_cookie(SessionCookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            domain: "www.shop.test".to_string(),
            path: "/".to_string(),
        });
        session.set_cookie(SessionCookie {
            name: "cf".to_string(),
            value: "1".to_string(),
            domain: ".cdn.test".to_string(),
            path: "/img".to_string(),
        });
        session.set_cookie(SessionCookie {
            name: "sid".to_string(),
            value: "def".to_string(),
            domain: "www.shop.test".to_string(),
            path: "/".to_string(),
        });

        assert_eq!(session.cookies.len(), 2);
        assert_eq!(
            session.cookie_header_for("https://www.shop.test/game/x").as_deref(),
            Some("sid=def")
        );
        assert_eq!(
            session.cookie_header_for("https://a.cdn.test/img/1.jpg").as_deref(),
            Some("cf=1")
        );
        assert_eq!(session.cookie_header_for("https://a.cdn.test/other/1.jpg"), None);
        assert_eq!(session.cookie_header_for("https://evilshop.test/"), None);
    }

    #[test]
    fn scripted_session_replies_and_records() {
        let mut session = ScriptedSession::new()
            .with_reply("https://x.test/a.jpg", ScriptedReply::Status(200, b"img".to_vec()))
            .with_reply("https://x.test/b.jpg", ScriptedReply::TransportError("dns".to_string()));
        let request = |url: &str| FetchRequest {
            url: url.to_string(),
            headers: Vec::new(),
            timeout: Duration::from_secs(1),
        };

        let mut ok = session.get(&request("https://x.test/a.jpg")).expect("ok");
        assert!(ok.is_success());
        let mut body = Vec::new();
        ok.body.read_to_end(&mut body).expect("read");
        assert_eq!(body, b"img");

        assert!(session.get(&request("https://x.test/b.jpg")).is_err());
        let missing = session.get(&request("https://x.test/c.jpg")).expect("404");
        assert_eq!(missing.status, 404);
        assert_eq!(session.requested_urls().len(), 3);
    }
}
