//! [`RenderView`] implementations that work from HTML snapshots instead of a
//! live browser: `StaticPageView` fetches server-rendered markup over HTTP,
//! `SnapshotView` replays pre-captured markup (one frame per scroll step).

use crate::config::ACCEPT_LANGUAGE;
use crate::render::{BrowserCookie, ElementHandle, Key, RenderView, WaitOutcome};
use crate::session::{cookie_header, upsert_cookie, SessionCookie};
use crate::{HarvestError, Result};
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::time::Duration;

const MAX_PAGE_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
struct ElementSnapshot {
    attrs: BTreeMap<String, String>,
    text: String,
}

/// Parsed view of one HTML document plus the element arena handed out by `query`.
#[derive(Debug, Clone, Default)]
struct DomSnapshot {
    url: String,
    html: String,
    elements: Vec<ElementSnapshot>,
}

impl DomSnapshot {
    fn new(url: &str, html: String) -> Self {
        Self {
            url: url.to_string(),
            html,
            elements: Vec::new(),
        }
    }

    fn query(&mut self, selector: &str) -> Result<Vec<ElementHandle>> {
        let parsed = Selector::parse(selector)
            .map_err(|e| HarvestError::Render(format!("invalid selector {selector:?}: {e}")))?;
        let document = Html::parse_document(&self.html);
        let mut handles = Vec::new();
        for element in document.select(&parsed) {
            let attrs = element
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let text = element
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            handles.push(ElementHandle(self.elements.len()));
            self.elements.push(ElementSnapshot { attrs, text });
        }
        Ok(handles)
    }

    fn element(&self, handle: ElementHandle) -> Result<&ElementSnapshot> {
        self.elements
            .get(handle.0)
            .ok_or_else(|| HarvestError::Render(format!("stale element handle {}", handle.0)))
    }

    /// Attribute as the browser's property would report it: `href`/`src` resolve to absolute.
    fn attribute(&self, handle: ElementHandle, name: &str) -> Result<Option<String>> {
        let element = self.element(handle)?;
        let Some(raw) = element.attrs.get(name) else {
            return Ok(None);
        };
        if matches!(name, "href" | "src") {
            if let Ok(base) = url::Url::parse(&self.url) {
                if let Ok(joined) = base.join(raw.trim()) {
                    return Ok(Some(joined.to_string()));
                }
            }
        }
        Ok(Some(raw.clone()))
    }

    fn text(&self, handle: ElementHandle) -> Result<String> {
        Ok(self.element(handle)?.text.clone())
    }

    fn title(&mut self) -> Result<String> {
        let handles = self.query("title")?;
        match handles.first() {
            Some(handle) => self.text(*handle),
            None => Ok(String::new()),
        }
    }
}

fn no_page() -> HarvestError {
    HarvestError::Render("no page loaded; call navigate first".to_string())
}

/// Replays captured markup. Each URL maps to one or more frames; every scroll
/// advances to the next frame, and the last frame sticks.
#[derive(Debug, Default)]
pub struct SnapshotView {
    pages: HashMap<String, Vec<String>>,
    cookies: Vec<BrowserCookie>,
    current: Option<DomSnapshot>,
    frame: usize,
    navigations: Vec<String>,
    scrolls: usize,
    keys: Vec<Key>,
}

impl SnapshotView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), vec![html.to_string()]);
        self
    }

    pub fn with_frames(mut self, url: &str, frames: Vec<String>) -> Self {
        self.pages.insert(url.to_string(), frames);
        self
    }

    pub fn with_cookie(mut self, cookie: BrowserCookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn navigations(&self) -> &[String] {
        &self.navigations
    }

    pub fn scroll_count(&self) -> usize {
        self.scrolls
    }

    pub fn keys_sent(&self) -> &[Key] {
        &self.keys
    }

    fn load_frame(&mut self) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let url = current.url.clone();
        let Some(frames) = self.pages.get(&url) else {
            return;
        };
        let idx = self.frame.min(frames.len().saturating_sub(1));
        let html = frames.get(idx).cloned().unwrap_or_default();
        self.current = Some(DomSnapshot::new(&url, html));
    }

    fn current_mut(&mut self) -> Result<&mut DomSnapshot> {
        self.current.as_mut().ok_or_else(no_page)
    }
}

impl RenderView for SnapshotView {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.navigations.push(url.to_string());
        self.frame = 0;
        if !self.pages.contains_key(url) {
            return Err(HarvestError::Render(format!("navigation to {url} timed out")));
        }
        self.current = Some(DomSnapshot::new(url, String::new()));
        self.load_frame();
        Ok(())
    }

    fn query(&mut self, selector: &str) -> Result<Vec<ElementHandle>> {
        self.current_mut()?.query(selector)
    }

    fn attribute(&mut self, element: ElementHandle, name: &str) -> Result<Option<String>> {
        self.current_mut()?.attribute(element, name)
    }

    fn text(&mut self, element: ElementHandle) -> Result<String> {
        self.current_mut()?.text(element)
    }

    fn scroll_by(&mut self, _pixels: i64) -> Result<()> {
        self.scrolls += 1;
        self.frame += 1;
        self.load_frame();
        Ok(())
    }

    fn send_key(&mut self, key: Key) -> Result<()> {
        self.keys.push(key);
        Ok(())
    }

    fn page_source(&mut self) -> Result<String> {
        Ok(self.current_mut()?.html.clone())
    }

    fn current_url(&mut self) -> Result<String> {
        Ok(self.current_mut()?.url.clone())
    }

    fn title(&mut self) -> Result<String> {
        self.current_mut()?.title()
    }

    fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        Ok(self.cookies.clone())
    }

    fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<WaitOutcome> {
        if self.query(selector)?.is_empty() {
            Ok(WaitOutcome::TimedOut)
        } else {
            Ok(WaitOutcome::Satisfied)
        }
    }
}

/// Fetches server-rendered pages with `ureq`. Scripts never run, so scrolling
/// reveals nothing new and the harvester relies on its pagination fallback.
pub struct StaticPageView {
    agent: ureq::Agent,
    user_agent: String,
    cookies: Vec<SessionCookie>,
    current: Option<DomSnapshot>,
}

impl StaticPageView {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let mut config = ureq::Agent::config_builder();
        config = config
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .user_agent(user_agent);
        Self {
            agent: config.build().into(),
            user_agent: user_agent.to_string(),
            cookies: Vec::new(),
            current: None,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Store a `Set-Cookie` value received from `url`. A missing `Domain`
    /// binds the cookie to the responding host, a missing `Path` to `/`.
    fn remember_cookie(&mut self, url: &str, raw: &str) {
        let Some(cookie) = parse_set_cookie(raw) else {
            return;
        };
        let domain = match cookie.domain.filter(|d| !d.trim().is_empty()) {
            Some(domain) => domain.trim_start_matches('.').to_ascii_lowercase(),
            None => match url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            {
                Some(host) => host,
                None => return,
            },
        };
        let path = cookie
            .path
            .filter(|p| p.starts_with('/'))
            .unwrap_or_else(|| "/".to_string());
        upsert_cookie(
            &mut self.cookies,
            SessionCookie {
                name: cookie.name,
                value: cookie.value,
                domain,
                path,
            },
        );
    }

    fn current_mut(&mut self) -> Result<&mut DomSnapshot> {
        self.current.as_mut().ok_or_else(no_page)
    }
}

impl RenderView for StaticPageView {
    fn navigate(&mut self, url: &str) -> Result<()> {
        let mut request = self
            .agent
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", ACCEPT_LANGUAGE);
        if let Some(cookie) = cookie_header(&self.cookies, url) {
            request = request.header("Cookie", cookie.as_str());
        }
        let mut response = request
            .call()
            .map_err(|e| HarvestError::Render(format!("GET {url} failed: {e}")))?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(HarvestError::Render(format!("GET {url} returned {status}")));
        }
        for value in response.headers().get_all("set-cookie") {
            if let Ok(raw) = value.to_str() {
                self.remember_cookie(url, raw);
            }
        }
        let mut buf = Vec::new();
        response
            .body_mut()
            .as_reader()
            .take(MAX_PAGE_BYTES)
            .read_to_end(&mut buf)?;
        let html = String::from_utf8_lossy(&buf).into_owned();
        self.current = Some(DomSnapshot::new(url, html));
        Ok(())
    }

    fn query(&mut self, selector: &str) -> Result<Vec<ElementHandle>> {
        self.current_mut()?.query(selector)
    }

    fn attribute(&mut self, element: ElementHandle, name: &str) -> Result<Option<String>> {
        self.current_mut()?.attribute(element, name)
    }

    fn text(&mut self, element: ElementHandle) -> Result<String> {
        self.current_mut()?.text(element)
    }

    fn scroll_by(&mut self, _pixels: i64) -> Result<()> {
        Ok(())
    }

    fn send_key(&mut self, _key: Key) -> Result<()> {
        Ok(())
    }

    fn page_source(&mut self) -> Result<String> {
        Ok(self.current_mut()?.html.clone())
    }

    fn current_url(&mut self) -> Result<String> {
        Ok(self.current_mut()?.url.clone())
    }

    fn title(&mut self) -> Result<String> {
        self.current_mut()?.title()
    }

    fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        Ok(self
            .cookies
            .iter()
            .map(|c| BrowserCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: Some(c.domain.clone()),
                path: Some(c.path.clone()),
            })
            .collect())
    }
}

fn parse_set_cookie(raw: &str) -> Option<BrowserCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = BrowserCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: None,
        path: None,
    };
    for attr in parts {
        let Some((key, val)) = attr.trim().split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("domain") {
            cookie.domain = Some(val.trim().to_string());
        } else if key.trim().eq_ignore_ascii_case("path") {
            cookie.path = Some(val.trim().to_string());
        }
    }
    Some(cookie)
}
