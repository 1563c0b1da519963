//! Event handlers and the polling loop tying the pipeline together.
//!
//! Everything runs on one task: a `select!` over the browser event channel,
//! the 1 s poll interval, and the shutdown signal. Poll cycles therefore
//! never overlap, and a loop-guard registration always completes before the
//! next event is examined.

use crate::config::RestyleConfig;
use crate::file_queue::FileQueue;
use crate::loop_guard::{sheet_key, LoopGuard};
use crate::registry::StylesheetRegistry;
use anyhow::{anyhow, Result};
use cdp_session::{content_key, is_missing_sheet, SessionManager, SheetEvent, SheetHeader};
use css_diff::{diff, DeclarationChange};
use css_patch::{patch_file, PatchReport};
use log::{debug, info, warn};
use source_locator::{rewrite_compiled_selector, SelectorResolver, SourceMapResolver, UrlResolver};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// How long the reloaded page gets to settle and announce its stylesheets.
const RELOAD_SETTLE: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run the agent until ctrl-c or the browser goes away.
///
/// # Errors
///
/// Only startup failures (unreachable endpoint, missing tab) propagate;
/// everything after the watch loop starts is handled and logged in place.
pub async fn run(config: RestyleConfig) -> Result<()> {
    let mut session = SessionManager::connect(
        &config.chrome_host,
        config.chrome_port,
        &config.dev_server_base,
    )
    .await?;
    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow!("browser event stream unavailable"))?;

    let mut agent = Orchestrator::new(config, session);

    // start from a clean slate: reload so the browser re-announces every
    // sheet, then let the page settle
    agent.registry.clear();
    agent.session.reload_page().await?;
    sleep(RELOAD_SETTLE).await;
    while let Ok(event) = events.try_recv() {
        agent.handle_event(event).await;
    }

    agent.detect_vite_stylesheets().await;
    agent.detect_webpack_stylesheets();

    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "tracking {} stylesheet(s), {} file-backed",
        agent.registry.len(),
        agent.registry.file_based().len()
    );

    loop {
        tokio::select! {
            maybe_event = events.recv() => match maybe_event {
                Some(event) => agent.handle_event(event).await,
                None => {
                    warn!("browser event stream closed");
                    break;
                }
            },
            _ = poll.tick() => agent.poll_cycle().await,
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("ctrl-c handler failed: {err}");
                }
                info!("shutting down");
                break;
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}

struct Orchestrator {
    session: SessionManager,
    registry: StylesheetRegistry,
    url_resolver: UrlResolver,
    sourcemaps: SourceMapResolver,
    selectors: SelectorResolver,
    guard: LoopGuard,
    queue: FileQueue,
}

impl Orchestrator {
    fn new(config: RestyleConfig, session: SessionManager) -> Self {
        Self {
            session,
            registry: StylesheetRegistry::new(),
            url_resolver: UrlResolver::new(&config.project_root, config.mappings.clone()),
            sourcemaps: SourceMapResolver::new(&config.project_root),
            selectors: SelectorResolver::new(&config.project_root),
            guard: LoopGuard::new(Duration::from_millis(config.loop_guard_ttl_ms)),
            queue: FileQueue::new(),
        }
    }

    async fn handle_event(&mut self, event: SheetEvent) {
        match event {
            SheetEvent::Added(header) => self.on_stylesheet_added(header).await,
            SheetEvent::Changed(id) => self.on_stylesheet_changed(&id).await,
        }
    }

    async fn on_stylesheet_added(&mut self, header: SheetHeader) {
        let id = header.id.clone();
        let source_url = header.source_url.clone();
        self.registry.register(header);

        if !source_url.is_empty() {
            if let Some(path) = self.url_resolver.resolve(&source_url) {
                info!("{source_url} -> {}", path.display());
            }
        }

        match self.session.stylesheet_text(&id).await {
            Ok(text) => self.registry.update_text(&id, text),
            Err(err) if is_missing_sheet(&err) => self.registry.remove(&id),
            Err(err) => warn!("initial text fetch for sheet {id} failed: {err}"),
        }
    }

    /// Push notification: fetch current text through a fresh session (the
    /// long-lived session's copy is cached and stale) and diff against the
    /// stored snapshot.
    async fn on_stylesheet_changed(&mut self, id: &str) {
        let stored = self.registry.previous_text(id);

        let fresh_text = match &stored {
            Some(old) => {
                let fresh = self.session.fresh_stylesheets().await;
                pick_fresh(&fresh, old).map(|sheet| sheet.text.clone())
            }
            None => None,
        };
        let new_text = match fresh_text {
            Some(text) => text,
            None => match self.session.stylesheet_text(id).await {
                Ok(text) => text,
                Err(err) if is_missing_sheet(&err) => {
                    debug!("sheet {id} vanished; dropping");
                    self.registry.remove(id);
                    return;
                }
                Err(err) => {
                    warn!("text fetch for changed sheet {id} failed: {err}");
                    return;
                }
            },
        };

        if stored.as_deref() == Some(new_text.as_str()) {
            return;
        }
        self.handle_change(id, new_text).await;
    }

    /// Pull path: one fresh snapshot per cycle, matched to every tracked
    /// file-backed sheet by content key.
    async fn poll_cycle(&mut self) {
        let tracked: Vec<(String, Option<String>)> = self
            .registry
            .file_based()
            .iter()
            .map(|record| (record.header.id.clone(), record.text.clone()))
            .collect();
        if tracked.is_empty() {
            return;
        }

        let fresh = self.session.fresh_stylesheets().await;
        if fresh.is_empty() {
            return;
        }

        for (id, old_text) in tracked {
            let Some(old) = old_text else { continue };
            let Some(found) = pick_fresh(&fresh, &old) else {
                continue;
            };
            if found.text != old {
                self.handle_change(&id, found.text.clone()).await;
            }
        }
    }

    /// The change-propagation pipeline for one stylesheet.
    async fn handle_change(&mut self, id: &str, new_text: String) {
        if self.guard.should_ignore(&sheet_key(id), &new_text) {
            debug!("own write echoed back on sheet {id}");
            self.registry.update_text(id, new_text);
            return;
        }

        let Some(old_text) = self.registry.previous_text(id) else {
            self.registry.update_text(id, new_text);
            return;
        };
        if old_text == new_text {
            self.registry.update_text(id, new_text);
            return;
        }

        let changes = match diff(&old_text, &new_text) {
            Ok(changes) => changes,
            Err(err) => {
                // keep the old snapshot so the next event retries the diff
                warn!("sheet {id} did not parse, skipping this cycle: {err}");
                return;
            }
        };
        if changes.is_empty() {
            self.registry.update_text(id, new_text);
            return;
        }
        info!("{} declaration change(s) on sheet {id}", changes.len());
        for change in &changes {
            debug!(
                "  {:?} {} {{ {}: {} }}",
                change.kind,
                change.selector,
                change.property,
                change.new_value.as_deref().unwrap_or("<removed>")
            );
        }

        let target = self.resolve_target(id);

        // compiled Next.js output and unresolvable sheets go through
        // CSS-module reverse-mapping
        if target.as_deref().map_or(true, is_under_next) {
            if self.patch_via_modules(id, &new_text, &changes).await {
                self.registry.update_text(id, new_text);
                return;
            }
        }
        let Some(mut target) = target.filter(|path| !is_under_next(path)) else {
            debug!("no authored source for sheet {id}; storing text only");
            self.registry.update_text(id, new_text);
            return;
        };

        // a plain .css target may itself be compiled output; a source map
        // can redirect the patch to the authored preprocessor file
        if has_extension(&target, "css") {
            if let Some(first) = changes.first() {
                if let Some(original) = self.sourcemaps.original_position_for(
                    &target,
                    first.position.line,
                    first.position.column,
                ) {
                    if is_preprocessor_source(&original.source) && original.source.is_file() {
                        debug!(
                            "source map redirects {} -> {}",
                            target.display(),
                            original.source.display()
                        );
                        target = original.source;
                    }
                }
            }
        }

        match self.enqueue_patch(&target, changes).await {
            Ok((report, file_content)) if report.succeeded > 0 => {
                info!(
                    "patched {} ({} applied, {} failed)",
                    target.display(),
                    report.succeeded,
                    report.failed
                );
                if let Some(content) = file_content {
                    self.guard.register_write(&target.to_string_lossy(), &content);
                }
                self.guard.register_write(&sheet_key(id), &new_text);
            }
            Ok((report, _)) => {
                warn!(
                    "no change applied to {} ({} failed)",
                    target.display(),
                    report.failed
                );
            }
            Err(err) => warn!("patch of {} failed: {err}", target.display()),
        }

        self.registry.update_text(id, new_text);
    }

    /// Patch-source preference: vite dev id, then inline-map source, then the
    /// URL heuristics.
    fn resolve_target(&mut self, id: &str) -> Option<PathBuf> {
        let record = self.registry.get(id)?;
        if let Some(path) = &record.vite_dev_id {
            return Some(path.clone());
        }
        if let Some(path) = &record.original_source {
            return Some(path.clone());
        }
        let source_url = record.header.source_url.clone();
        self.url_resolver.resolve(&source_url)
    }

    /// Resolve each change's compiled selector to its authored module file,
    /// group by file, and patch. Returns true when any file took a change.
    async fn patch_via_modules(
        &mut self,
        id: &str,
        new_text: &str,
        changes: &[DeclarationChange],
    ) -> bool {
        let mut grouped: HashMap<PathBuf, Vec<DeclarationChange>> = HashMap::new();
        for change in changes {
            let Some(found) = self.selectors.resolve(&change.selector) else {
                continue;
            };
            let mut rewritten = change.clone();
            rewritten.selector = rewrite_compiled_selector(&change.selector);
            grouped.entry(found.file).or_default().push(rewritten);
        }
        if grouped.is_empty() {
            return false;
        }

        let mut any_patched = false;
        for (file, file_changes) in grouped {
            match self.enqueue_patch(&file, file_changes).await {
                Ok((report, file_content)) if report.succeeded > 0 => {
                    info!(
                        "patched module {} ({} applied, {} failed)",
                        file.display(),
                        report.succeeded,
                        report.failed
                    );
                    if let Some(content) = file_content {
                        self.guard.register_write(&file.to_string_lossy(), &content);
                    }
                    any_patched = true;
                }
                Ok((report, _)) => warn!(
                    "no change applied to module {} ({} failed)",
                    file.display(),
                    report.failed
                ),
                Err(err) => warn!("patch of module {} failed: {err}", file.display()),
            }
        }
        if any_patched {
            self.guard.register_write(&sheet_key(id), new_text);
        }
        any_patched
    }

    /// Run the patch inside the per-path queue slot; the file is re-read at
    /// patch time so a queued successor sees its predecessor's writes.
    async fn enqueue_patch(
        &self,
        path: &Path,
        changes: Vec<DeclarationChange>,
    ) -> Result<(PatchReport, Option<String>)> {
        let task_path = path.to_path_buf();
        let receiver = self.queue.enqueue(path, async move {
            let report = patch_file(&task_path, &changes)?;
            let content = (report.succeeded > 0)
                .then(|| std::fs::read_to_string(&task_path).ok())
                .flatten();
            Ok::<_, anyhow::Error>((report, content))
        });
        receiver
            .await
            .map_err(|_| anyhow!("patch task for {} was dropped", path.display()))?
    }

    /// Annotate inline sheets injected by a Vite-style dev server with the
    /// absolute source path the bundler advertises on the `<style>` element.
    async fn detect_vite_stylesheets(&mut self) {
        let known: Vec<(String, String)> = self
            .registry
            .records()
            .filter_map(|record| {
                let text = record.text.as_deref()?;
                Some((record.header.id.clone(), content_key(text)))
            })
            .collect();
        if known.is_empty() {
            return;
        }

        match self.session.vite_stylesheets(&known).await {
            Ok(matches) => {
                for vite in matches {
                    // dev ids may carry a `?t=...` cache-buster
                    let path = PathBuf::from(vite.dev_id.split('?').next().unwrap_or(&vite.dev_id));
                    if path.is_file() {
                        info!("vite sheet {} -> {}", vite.id, path.display());
                        self.registry.set_vite_dev_id(&vite.id, path);
                    } else {
                        debug!("vite dev id {} is not a local file", vite.dev_id);
                    }
                }
            }
            Err(err) => debug!("vite detection failed: {err}"),
        }
    }

    /// Annotate inline sheets whose text embeds a webpack/Next.js inline
    /// source map naming an existing authored file.
    fn detect_webpack_stylesheets(&mut self) {
        let candidates: Vec<(String, String)> = self
            .registry
            .records()
            .filter(|record| record.header.is_inline && record.vite_dev_id.is_none())
            .filter_map(|record| Some((record.header.id.clone(), record.text.clone()?)))
            .collect();

        for (id, text) in candidates {
            if let Some(source) = self.sourcemaps.original_source_from_inline(&text) {
                info!("webpack sheet {id} -> {}", source.display());
                self.registry.set_original_source(&id, source);
            }
        }
    }

    async fn shutdown(mut self) {
        self.guard.shutdown();
        self.sourcemaps.clear();
        self.selectors.clear();
        self.session.close().await;
    }
}

/// Match a tracked sheet's stored text against a fresh snapshot: content key
/// first, equal length as the fallback.
fn pick_fresh<'a>(
    fresh: &'a [cdp_session::FreshSheet],
    old_text: &str,
) -> Option<&'a cdp_session::FreshSheet> {
    let key = content_key(old_text);
    fresh
        .iter()
        .find(|sheet| sheet.content_key == key)
        .or_else(|| fresh.iter().find(|sheet| sheet.text.len() == old_text.len()))
}

fn is_under_next(path: &Path) -> bool {
    path.components()
        .any(|component| component.as_os_str() == ".next")
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

fn is_preprocessor_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ext.eq_ignore_ascii_case("scss")
                || ext.eq_ignore_ascii_case("sass")
                || ext.eq_ignore_ascii_case("less")
        })
}
