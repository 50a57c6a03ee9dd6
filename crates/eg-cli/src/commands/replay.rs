//! Replay command: drives one page session from a recorded signal trace.
//!
//! A trace is JSONL. An optional first line `{"page": {...}}` describes the
//! page load; every other line is a browser signal with its offset from the
//! load in milliseconds:
//!
//! ```text
//! {"page": {"url": "https://example.com/docs?utm_source=news", "referrer": "https://t.co/x"}}
//! {"offset_ms": 1200, "type": "scroll", "offset": 600, "content_height": 4000}
//! {"offset_ms": 9000, "type": "visibility_change", "hidden": true}
//! ```
//!
//! The simulated clock advances in poll-interval steps between entries, with
//! one idle poll per step, the way a browser timer would fire.

use std::cell::RefCell;
use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use eg_core::{
    BrowserSignal, ClientId, EngineOptions, ManualClock, PageContext, PageSession, Screen,
    Transport, TransportError,
};
use eg_store::IdentityDb;
use eg_transport::{DeliveryReport, HttpTransport};
use serde::Deserialize;
use url::Url;

use crate::Config;

/// Page load description from the trace header.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageSpec {
    pub url: String,
    pub referrer: String,
    pub is_mobile: bool,
    pub screen: Screen,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            url: "http://localhost/".to_string(),
            referrer: String::new(),
            is_mobile: false,
            screen: Screen {
                width: 1280.0,
                height: 800.0,
                pixel_ratio: 1.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceEntry {
    pub offset_ms: u64,
    #[serde(flatten)]
    pub signal: BrowserSignal,
}

/// A parsed trace file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trace {
    pub page: PageSpec,
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    /// Parses JSONL trace text. Offsets must never decrease.
    pub fn parse(input: &str) -> Result<Self> {
        let mut page = None;
        let mut entries: Vec<TraceEntry> = Vec::new();

        for (index, line) in input.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: serde_json::Value = serde_json::from_str(line)
                .with_context(|| format!("line {line_no}: invalid JSON"))?;

            if let Some(spec) = value.get("page") {
                if page.is_some() || !entries.is_empty() {
                    bail!("line {line_no}: the page header must be the first entry");
                }
                let spec = serde_json::from_value(spec.clone())
                    .with_context(|| format!("line {line_no}: invalid page header"))?;
                page = Some(spec);
                continue;
            }

            let entry: TraceEntry = serde_json::from_value(value)
                .with_context(|| format!("line {line_no}: invalid signal"))?;
            if entries
                .last()
                .is_some_and(|prev| entry.offset_ms < prev.offset_ms)
            {
                bail!("line {line_no}: offset_ms goes backwards");
            }
            entries.push(entry);
        }

        Ok(Self {
            page: page.unwrap_or_default(),
            entries,
        })
    }
}

/// What a replay produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub dispatched: u64,
    pub failed: u64,
    /// Delivery results when snapshots were POSTed to an endpoint.
    pub delivery: Option<DeliveryReport>,
}

/// Where snapshots go.
enum Sink<'a, W> {
    Lines(RefCell<&'a mut W>),
    Http(HttpTransport),
}

impl<W: Write> Transport for Sink<'_, W> {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        match self {
            Self::Lines(out) => {
                let mut out = out.borrow_mut();
                writeln!(out, "{payload}")
                    .map_err(|err| TransportError::Failed(format!("failed to write snapshot: {err}")))
            }
            Self::Http(http) => http.send(payload),
        }
    }
}

/// Replays `trace` as one page load starting at `start`.
///
/// Snapshots are written to `writer` as JSON lines, or POSTed when the
/// configuration names an endpoint.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    db: &mut IdentityDb,
    trace: &Trace,
    start: DateTime<Utc>,
    finish: bool,
) -> Result<ReplaySummary> {
    let client_id = ClientId::new(config.client_id.as_str()).context("invalid client_id")?;
    let url = Url::parse(&trace.page.url)
        .with_context(|| format!("invalid page URL: {}", trace.page.url))?;
    let page = PageContext::from_url(
        &url,
        trace.page.referrer.as_str(),
        trace.page.is_mobile,
        trace.page.screen,
    );

    let runtime = match config.endpoint {
        Some(_) => Some(tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?),
        None => None,
    };
    let sink = match &config.endpoint {
        Some(endpoint) => Sink::Http(
            HttpTransport::new(endpoint)
                .with_context(|| format!("invalid endpoint: {endpoint}"))?,
        ),
        None => Sink::Lines(RefCell::new(writer)),
    };

    let guard = runtime.as_ref().map(tokio::runtime::Runtime::enter);
    let clock = ManualClock::new(start);
    let mut session = PageSession::start(&config.engine, clock.clone(), db, sink, client_id, page)
        .context("failed to start page session")?;

    let step = poll_step_ms(&config.engine)?;
    let mut elapsed: i64 = 0;
    for entry in &trace.entries {
        let target = i64::try_from(entry.offset_ms).context("offset_ms out of range")?;
        while elapsed + step <= target {
            clock.advance_ms(step);
            elapsed += step;
            session.poll();
        }
        clock.advance_ms(target - elapsed);
        elapsed = target;
        session.handle(&entry.signal);
    }
    if finish {
        session.handle(&BrowserSignal::PageHide);
    }
    drop(guard);

    let delivery = match (&runtime, session.dispatcher().transport()) {
        (Some(runtime), Sink::Http(http)) => Some(runtime.block_on(http.drain())),
        _ => None,
    };

    let summary = ReplaySummary {
        dispatched: session.dispatch_count(),
        failed: session.dispatcher().failures(),
        delivery,
    };
    tracing::info!(
        dispatched = summary.dispatched,
        failed = summary.failed,
        entries = trace.entries.len(),
        "replay finished"
    );
    Ok(summary)
}

fn poll_step_ms(options: &EngineOptions) -> Result<i64> {
    i64::try_from(options.poll_interval_ms).context("poll_interval_ms out of range")
}
