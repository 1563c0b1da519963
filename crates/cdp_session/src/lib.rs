//! CDP session management over chromiumoxide.
//!
//! Owns one long-lived session against the dev-server tab plus an ephemeral
//! fresh-fetch session used by the polling loop. The browser caches
//! stylesheet text per session after the first fetch; a brand-new session
//! re-announces every sheet and returns current text, which is the whole
//! point of the ephemeral connection.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::css::{
    self, EventStyleSheetAdded, EventStyleSheetChanged, GetStyleSheetTextParams, StyleSheetId,
};
use chromiumoxide::cdp::browser_protocol::dom::{
    self, GetAttributesParams, GetDocumentParams, GetOuterHtmlParams, QuerySelectorAllParams,
};
use chromiumoxide::cdp::browser_protocol::page::{self, ReloadParams};
use chromiumoxide::page::Page;
use futures::StreamExt as _;
use log::{debug, info};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Ports probed in order when no explicit debug port is configured.
pub const DEFAULT_PORTS: &[u16] = &[9222, 9333, 9229, 9230];

/// How long the ephemeral session waits for `styleSheetAdded` events.
const FRESH_SETTLE: Duration = Duration::from_millis(200);

/// Stylesheet metadata snapshot as announced by the browser.
#[derive(Debug, Clone)]
pub struct SheetHeader {
    pub id: String,
    pub source_url: String,
    pub source_map_url: Option<String>,
    pub is_inline: bool,
}

/// Push event delivered to the orchestrator, in browser order.
#[derive(Debug, Clone)]
pub enum SheetEvent {
    Added(SheetHeader),
    Changed(String),
}

/// One stylesheet as seen by a brand-new session.
#[derive(Debug, Clone)]
pub struct FreshSheet {
    pub id: String,
    pub text: String,
    pub content_key: String,
}

/// A `<style data-vite-dev-id>` element matched to a tracked stylesheet.
#[derive(Debug, Clone)]
pub struct ViteSheet {
    pub id: String,
    pub dev_id: String,
}

/// First 100 characters, trimmed; the identity prefix used to match live
/// `<style>` elements and fresh-session sheets to tracked records.
pub fn content_key(text: &str) -> String {
    text.chars().take(100).collect::<String>().trim().to_string()
}

/// True when the error is the browser telling us the stylesheet is gone.
pub fn is_missing_sheet(err: &anyhow::Error) -> bool {
    err.to_string().to_ascii_lowercase().contains("no style sheet")
}

pub struct SessionManager {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    endpoint: String,
    target_prefix: String,
    events: Option<UnboundedReceiver<SheetEvent>>,
    event_tasks: Vec<JoinHandle<()>>,
}

impl SessionManager {
    /// Connect to the debug endpoint, attach to the first page tab whose URL
    /// starts with `target_prefix`, and enable DOM, CSS, and Page (in that
    /// order; CSS requires DOM). Event streams are registered before the
    /// enables so no announcement is lost.
    ///
    /// # Errors
    ///
    /// A refused TCP connection and a missing target tab are fatal; the
    /// returned errors carry the operator-facing instruction text.
    pub async fn connect(host: &str, port: Option<u16>, target_prefix: &str) -> Result<Self> {
        let port = probe_port(host, port)?;
        let endpoint = format!("http://{host}:{port}");

        let (browser, mut handler) = Browser::connect(&endpoint)
            .await
            .map_err(|err| anyhow!("failed to attach to the browser on {endpoint}: {err}"))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("browser handler error: {err}");
                }
            }
            debug!("browser handler stream ended");
        });

        let page = find_target_page(&browser, target_prefix).await?;
        info!("attached to {}", endpoint);

        let (sender, receiver) = unbounded_channel();
        let event_tasks = subscribe_sheet_events(&page, sender).await?;
        enable_domains(&page).await?;

        Ok(Self {
            browser,
            handler_task,
            page,
            endpoint,
            target_prefix: target_prefix.to_string(),
            events: Some(receiver),
            event_tasks,
        })
    }

    /// Take the ordered event stream; the orchestrator consumes it.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<SheetEvent>> {
        self.events.take()
    }

    /// Fetch a stylesheet's text on the long-lived session. Note the browser
    /// caches this per session; use `fresh_stylesheets` for current text.
    ///
    /// # Errors
    ///
    /// Propagates CDP errors, including the "no style sheet with given id"
    /// case callers detect with [`is_missing_sheet`].
    pub async fn stylesheet_text(&self, id: &str) -> Result<String> {
        let params = GetStyleSheetTextParams::builder()
            .style_sheet_id(StyleSheetId::new(id))
            .build()
            .map_err(|err| anyhow!("bad getStyleSheetText params: {err}"))?;
        let response = self
            .page
            .execute(params)
            .await
            .map_err(|err| anyhow!("getStyleSheetText({id}) failed: {err}"))?;
        Ok(response.text.clone())
    }

    /// Reload the attached tab.
    pub async fn reload_page(&self) -> Result<()> {
        self.page
            .execute(ReloadParams::default())
            .await
            .map_err(|err| anyhow!("page reload failed: {err}"))?;
        Ok(())
    }

    /// Open a transient session, wait for the browser to re-announce every
    /// stylesheet, and pull current text for each. All errors here are
    /// recoverable: the poll cycle simply gets an empty list.
    pub async fn fresh_stylesheets(&self) -> Vec<FreshSheet> {
        match self.fetch_fresh().await {
            Ok(sheets) => sheets,
            Err(err) => {
                debug!("fresh-fetch session failed: {err}");
                Vec::new()
            }
        }
    }

    async fn fetch_fresh(&self) -> Result<Vec<FreshSheet>> {
        let (browser, mut handler) = Browser::connect(&self.endpoint)
            .await
            .map_err(|err| anyhow!("ephemeral connect failed: {err}"))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = fresh_sheets_on(&browser, &self.target_prefix).await;

        // disconnect only: the browser belongs to the user
        drop(browser);
        handler_task.abort();
        result
    }

    /// Query the DOM for Vite-injected `<style data-vite-dev-id>` elements
    /// and match each to a tracked stylesheet by content key.
    ///
    /// `known` pairs tracked stylesheet ids with the content key of their
    /// stored text.
    pub async fn vite_stylesheets(&self, known: &[(String, String)]) -> Result<Vec<ViteSheet>> {
        let document = self
            .page
            .execute(GetDocumentParams::default())
            .await
            .map_err(|err| anyhow!("getDocument failed: {err}"))?;
        let root_id = document.root.node_id.clone();

        let query = QuerySelectorAllParams::builder()
            .node_id(root_id)
            .selector("style[data-vite-dev-id]")
            .build()
            .map_err(|err| anyhow!("bad querySelectorAll params: {err}"))?;
        let nodes = self
            .page
            .execute(query)
            .await
            .map_err(|err| anyhow!("querySelectorAll failed: {err}"))?;

        let mut matched = Vec::new();
        for node_id in nodes.node_ids.clone() {
            let attrs = GetAttributesParams::builder()
                .node_id(node_id.clone())
                .build()
                .map_err(|err| anyhow!("bad getAttributes params: {err}"))?;
            let attributes = match self.page.execute(attrs).await {
                Ok(response) => response.attributes.clone(),
                Err(err) => {
                    debug!("getAttributes failed for style node: {err}");
                    continue;
                }
            };
            let Some(dev_id) = attribute_value(&attributes, "data-vite-dev-id") else {
                continue;
            };

            let outer = GetOuterHtmlParams::builder().node_id(node_id).build();
            let html = match self.page.execute(outer).await {
                Ok(response) => response.outer_html.clone(),
                Err(err) => {
                    debug!("getOuterHTML failed for style node: {err}");
                    continue;
                }
            };
            let key = content_key(inner_style_text(&html));

            if let Some((id, _)) = known.iter().find(|(_, tracked_key)| *tracked_key == key) {
                matched.push(ViteSheet {
                    id: id.clone(),
                    dev_id,
                });
            } else {
                debug!("vite style element with dev id {dev_id} matched no tracked sheet");
            }
        }
        Ok(matched)
    }

    /// Drop the session. This only disconnects; the browser stays up.
    pub async fn close(self) {
        for task in &self.event_tasks {
            task.abort();
        }
        drop(self.page);
        drop(self.browser);
        self.handler_task.abort();
        info!("detached from {}", self.endpoint);
    }
}

/// Find a listening debug port, probing the defaults when none is set.
fn probe_port(host: &str, configured: Option<u16>) -> Result<u16> {
    let candidates: Vec<u16> = match configured {
        Some(port) => vec![port],
        None => DEFAULT_PORTS.to_vec(),
    };
    for &port in &candidates {
        if TcpStream::connect(format!("{host}:{port}")).is_ok() {
            return Ok(port);
        }
    }
    Err(anyhow!(
        "no browser debug endpoint on {host} (probed ports {candidates:?}).\n\
         Start the browser with --remote-debugging-port={} and retry.",
        candidates[0]
    ))
}

/// First `type=page` target whose URL starts with the prefix. The handler
/// needs a moment to learn about targets after connect, hence the retry loop.
async fn find_target_page(browser: &Browser, target_prefix: &str) -> Result<Page> {
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut seen_urls = Vec::new();
    loop {
        let pages = browser
            .pages()
            .await
            .map_err(|err| anyhow!("failed to list browser targets: {err}"))?;
        seen_urls.clear();
        for page in pages {
            match page.url().await {
                Ok(Some(url)) => {
                    if url.starts_with(target_prefix) {
                        return Ok(page);
                    }
                    seen_urls.push(url);
                }
                Ok(None) => {}
                Err(err) => debug!("target url fetch failed: {err}"),
            }
        }
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "no open tab starts with {target_prefix}; open tabs: {seen_urls:?}"
            ));
        }
        sleep(Duration::from_millis(100)).await;
    }
}

/// Register both stylesheet event streams and pump them into one channel.
async fn subscribe_sheet_events(
    page: &Page,
    sender: UnboundedSender<SheetEvent>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut added = page
        .event_listener::<EventStyleSheetAdded>()
        .await
        .map_err(|err| anyhow!("failed to listen for styleSheetAdded: {err}"))?;
    let mut changed = page
        .event_listener::<EventStyleSheetChanged>()
        .await
        .map_err(|err| anyhow!("failed to listen for styleSheetChanged: {err}"))?;

    let added_sender = sender.clone();
    let added_task = tokio::spawn(async move {
        while let Some(event) = added.next().await {
            let header = SheetHeader {
                id: event.header.style_sheet_id.inner().clone(),
                source_url: event.header.source_url.clone(),
                source_map_url: event.header.source_map_url.clone(),
                is_inline: event.header.is_inline,
            };
            if added_sender.send(SheetEvent::Added(header)).is_err() {
                break;
            }
        }
    });
    let changed_task = tokio::spawn(async move {
        while let Some(event) = changed.next().await {
            let id = event.style_sheet_id.inner().clone();
            if sender.send(SheetEvent::Changed(id)).is_err() {
                break;
            }
        }
    });
    Ok(vec![added_task, changed_task])
}

async fn enable_domains(page: &Page) -> Result<()> {
    page.execute(dom::EnableParams::default())
        .await
        .map_err(|err| anyhow!("DOM.enable failed: {err}"))?;
    page.execute(css::EnableParams::default())
        .await
        .map_err(|err| anyhow!("CSS.enable failed: {err}"))?;
    page.execute(page::EnableParams::default())
        .await
        .map_err(|err| anyhow!("Page.enable failed: {err}"))?;
    Ok(())
}

/// Collect announced sheets on a transient session and fetch their texts.
async fn fresh_sheets_on(browser: &Browser, target_prefix: &str) -> Result<Vec<FreshSheet>> {
    let page = find_target_page(browser, target_prefix)
        .await
        .context("ephemeral session lost the target tab")?;

    let mut added = page
        .event_listener::<EventStyleSheetAdded>()
        .await
        .map_err(|err| anyhow!("ephemeral event listener failed: {err}"))?;
    page.execute(dom::EnableParams::default())
        .await
        .map_err(|err| anyhow!("ephemeral DOM.enable failed: {err}"))?;
    page.execute(css::EnableParams::default())
        .await
        .map_err(|err| anyhow!("ephemeral CSS.enable failed: {err}"))?;

    let mut ids = Vec::new();
    let deadline = Instant::now() + FRESH_SETTLE;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, added.next()).await {
            Ok(Some(event)) => ids.push(event.header.style_sheet_id.inner().clone()),
            Ok(None) | Err(_) => break,
        }
    }

    let mut sheets = Vec::with_capacity(ids.len());
    for id in ids {
        let params = GetStyleSheetTextParams::builder()
            .style_sheet_id(StyleSheetId::new(id.clone()))
            .build()
            .map_err(|err| anyhow!("bad getStyleSheetText params: {err}"))?;
        match page.execute(params).await {
            Ok(response) => {
                let text = response.text.clone();
                sheets.push(FreshSheet {
                    id,
                    content_key: content_key(&text),
                    text,
                });
            }
            Err(err) => debug!("ephemeral text fetch for {id} failed: {err}"),
        }
    }
    Ok(sheets)
}

/// Flattened name/value pairs from `DOM.getAttributes`.
fn attribute_value(attributes: &[String], name: &str) -> Option<String> {
    attributes
        .chunks(2)
        .find(|pair| pair.first().map(String::as_str) == Some(name))
        .and_then(|pair| pair.get(1).cloned())
}

/// Inner text of a serialized `<style ...>text</style>` element.
fn inner_style_text(outer_html: &str) -> &str {
    let start = outer_html.find('>').map_or(0, |idx| idx + 1);
    let end = outer_html.rfind("</style").unwrap_or(outer_html.len());
    outer_html.get(start..end).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_trims_first_100_chars() {
        let text = format!("  {}tail", "x".repeat(200));
        let key = content_key(&text);
        assert_eq!(key.len(), 98);
        assert!(key.chars().all(|c| c == 'x'));
        assert_eq!(content_key("  .a { }  "), ".a { }");
    }

    #[test]
    fn attribute_pairs_flatten() {
        let attrs = vec![
            "type".to_string(),
            "text/css".to_string(),
            "data-vite-dev-id".to_string(),
            "/app/src/styles/app.css".to_string(),
        ];
        assert_eq!(
            attribute_value(&attrs, "data-vite-dev-id").as_deref(),
            Some("/app/src/styles/app.css")
        );
        assert!(attribute_value(&attrs, "missing").is_none());
    }

    #[test]
    fn style_inner_text_extraction() {
        assert_eq!(
            inner_style_text("<style data-x=\"1\">.a{color:red}</style>"),
            ".a{color:red}"
        );
        assert_eq!(inner_style_text("<style></style>"), "");
    }

    #[test]
    fn missing_sheet_errors_are_recognized() {
        let err = anyhow!("-32000: No style sheet with given id found");
        assert!(is_missing_sheet(&err));
        let other = anyhow!("connection reset");
        assert!(!is_missing_sheet(&other));
    }
}
