//! Seam to the page-rendering collaborator.
//!
//! The harvester and resolver only ever talk to a [`RenderView`]; whether it is
//! backed by a real browser, a static HTML fetch, or a scripted fake is the
//! caller's choice.

use crate::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Opaque reference to an element returned by [`RenderView::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    PageDown,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

pub trait RenderView {
    fn navigate(&mut self, url: &str) -> Result<()>;

    fn query(&mut self, selector: &str) -> Result<Vec<ElementHandle>>;

    fn attribute(&mut self, element: ElementHandle, name: &str) -> Result<Option<String>>;

    fn text(&mut self, element: ElementHandle) -> Result<String>;

    fn scroll_by(&mut self, pixels: i64) -> Result<()>;

    fn send_key(&mut self, key: Key) -> Result<()>;

    fn page_source(&mut self) -> Result<String>;

    fn current_url(&mut self) -> Result<String>;

    fn title(&mut self) -> Result<String>;

    fn cookies(&mut self) -> Result<Vec<BrowserCookie>>;

    /// Block until any element matches `selector` or `timeout` elapses.
    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.query(selector)?.is_empty() {
                return Ok(WaitOutcome::Satisfied);
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Result of waiting for a catalog listing to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingState {
    Ready,
    VerificationRequired,
    TimedOut,
}

/// Body text carries both an answer prompt and a submit control.
pub fn page_has_human_check<V: RenderView + ?Sized>(view: &mut V) -> bool {
    let body_text = match view.query("body") {
        Ok(handles) => match handles.first() {
            Some(handle) => view.text(*handle).unwrap_or_default(),
            None => return false,
        },
        Err(_) => return false,
    };
    let lowered = body_text.to_ascii_lowercase();
    lowered.contains("answer:") && lowered.contains("submit")
}

/// Poll until catalog anchors render, a verification challenge shows up, or time runs out.
pub fn wait_for_listing<V: RenderView + ?Sized>(
    view: &mut V,
    anchor_selector: &str,
    timeout: Duration,
) -> Result<ListingState> {
    let deadline = Instant::now() + timeout;
    loop {
        if !view.query(anchor_selector)?.is_empty() {
            return Ok(ListingState::Ready);
        }
        if page_has_human_check(view) {
            return Ok(ListingState::VerificationRequired);
        }
        if Instant::now() >= deadline {
            return Ok(ListingState::TimedOut);
        }
        std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

/// Caller-side handler for a human-verification challenge.
pub trait VerificationGate {
    /// Returns `true` once the challenge is solved and scanning may resume.
    fn await_resolution(&mut self, page_url: &str) -> Result<bool>;
}

/// Prints a notice and waits for the operator to press Enter.
#[derive(Debug, Default)]
pub struct ConsoleGate;

impl VerificationGate for ConsoleGate {
    fn await_resolution(&mut self, page_url: &str) -> Result<bool> {
        eprintln!();
        eprintln!("[attention] Human check detected on {page_url}. Solve it in the browser and submit.");
        eprintln!("Press Enter once it is solved and item links are visible (type 'q' to skip)...");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(!line.trim().eq_ignore_ascii_case("q"))
    }
}

/// Gate for unattended runs: a challenge ends the catalog.
#[derive(Debug, Default)]
pub struct RefuseGate;

impl VerificationGate for RefuseGate {
    fn await_resolution(&mut self, page_url: &str) -> Result<bool> {
        Err(HarvestError::VerificationAborted(page_url.to_string()))
    }
}
