//! Render Bridge: a blocking, cancellable, deadline-bounded `load` over a
//! script-capable page renderer.
//!
//! The renderer lives on its own thread for its whole life, the way a browser
//! tab is bound to the context that created it. Callers talk to it through a
//! command channel; each load gets a single-use reply channel plus a ticket.
//! The render thread only delivers a result while its ticket is still the
//! active one, so a completion that arrives after the waiter gave up is
//! dropped instead of reaching a later `load`.

use crate::cancel::CancellationToken;
use crate::net::{redact_url_for_log, Document};
use crate::{EngineError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const NO_ACTIVE_TICKET: u64 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// URL the renderer reported as finished; redirects show up here.
    pub finished_url: String,
    pub html: String,
}

/// A page renderer bound to the thread that created it.
pub trait PageRenderer {
    /// Navigates to `url` and blocks until the page reports finished.
    fn render(&mut self, url: &str) -> Result<RenderedPage>;

    /// Releases the renderer's resources; called once, on the render thread.
    fn close(&mut self) {}
}

/// Builds a renderer on the render thread from the run's request headers.
pub type RendererFactory =
    Arc<dyn Fn(&[(String, String)]) -> Result<Box<dyn PageRenderer>> + Send + Sync>;

enum RenderCommand {
    Load {
        ticket: u64,
        url: String,
        reply: SyncSender<Option<Document>>,
    },
    Shutdown,
}

/// One rendering session (one virtual tab), owned by a single resolution run.
pub struct RenderSession {
    commands: Option<Sender<RenderCommand>>,
    worker: Option<JoinHandle<()>>,
    active_ticket: Arc<AtomicU64>,
    next_ticket: u64,
    poll_interval: Duration,
}

impl RenderSession {
    pub fn spawn(
        factory: RendererFactory,
        headers: Vec<(String, String)>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<RenderCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::result::Result<(), String>>(1);
        let active_ticket = Arc::new(AtomicU64::new(NO_ACTIVE_TICKET));

        let thread_ticket = active_ticket.clone();
        let worker = thread::Builder::new()
            .name("render-bridge".to_string())
            .spawn(move || {
                let renderer = match factory(&headers) {
                    Ok(renderer) => {
                        let _ = ready_tx.send(Ok(()));
                        renderer
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                render_loop(renderer, command_rx, thread_ticket);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = worker.join();
                return Err(EngineError::Render(reason));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(EngineError::Render(
                    "render thread exited during startup".to_string(),
                ));
            }
        }

        Ok(Self {
            commands: Some(command_tx),
            worker: Some(worker),
            active_ticket,
            next_ticket: NO_ACTIVE_TICKET,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        })
    }

    /// Loads `url` and waits for the rendered snapshot.
    ///
    /// Returns `None` on timeout, cancellation, render failure, or when the
    /// renderer finished on a different URL than the one requested.
    ///
    /// A finish on any other URL ends the wait at once. The renderer is idle
    /// after finishing, so the target can no longer arrive before the
    /// deadline and the result would be `None` either way.
    pub fn load_blocking(
        &mut self,
        url: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Option<Document> {
        if cancel.is_cancelled() {
            return None;
        }
        let commands = self.commands.as_ref()?;

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.active_ticket.store(ticket, Ordering::SeqCst);

        let (reply_tx, reply_rx) = mpsc::sync_channel::<Option<Document>>(1);
        let sent = commands.send(RenderCommand::Load {
            ticket,
            url: url.to_string(),
            reply: reply_tx,
        });
        if sent.is_err() {
            self.active_ticket.store(NO_ACTIVE_TICKET, Ordering::SeqCst);
            return None;
        }

        let outcome = wait_for_reply(&reply_rx, cancel, timeout, self.poll_interval);
        self.active_ticket.store(NO_ACTIVE_TICKET, Ordering::SeqCst);

        match outcome {
            WaitOutcome::Delivered(doc) => doc,
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    url = %redact_url_for_log(url),
                    timeout_ms = timeout.as_millis() as u64,
                    "render_load_timed_out"
                );
                None
            }
            WaitOutcome::Cancelled => None,
            WaitOutcome::Disconnected => {
                tracing::warn!(url = %redact_url_for_log(url), "render_thread_gone");
                None
            }
        }
    }

    /// Stops the render thread and waits for it to release the renderer.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.active_ticket.store(NO_ACTIVE_TICKET, Ordering::SeqCst);
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(RenderCommand::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

enum WaitOutcome {
    Delivered(Option<Document>),
    TimedOut,
    Cancelled,
    Disconnected,
}

fn wait_for_reply(
    reply_rx: &Receiver<Option<Document>>,
    cancel: &CancellationToken,
    timeout: Duration,
    poll_interval: Duration,
) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let wait = poll_interval.min(deadline - now);
        match reply_rx.recv_timeout(wait) {
            Ok(doc) => return WaitOutcome::Delivered(doc),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Disconnected,
        }
    }
}

fn render_loop(
    mut renderer: Box<dyn PageRenderer>,
    commands: Receiver<RenderCommand>,
    active_ticket: Arc<AtomicU64>,
) {
    while let Ok(command) = commands.recv() {
        match command {
            RenderCommand::Load { ticket, url, reply } => {
                if active_ticket.load(Ordering::SeqCst) != ticket {
                    continue;
                }
                let doc = match renderer.render(&url) {
                    Ok(page) if same_page(&page.finished_url, &url) => {
                        Some(Document::new(url.clone(), page.html))
                    }
                    Ok(page) => {
                        tracing::debug!(
                            target_url = %redact_url_for_log(&url),
                            finished_url = %redact_url_for_log(&page.finished_url),
                            "render_finished_elsewhere"
                        );
                        None
                    }
                    Err(err) => {
                        tracing::warn!(
                            url = %redact_url_for_log(&url),
                            error = %err,
                            "render_failed"
                        );
                        None
                    }
                };
                if active_ticket.load(Ordering::SeqCst) == ticket {
                    let _ = reply.try_send(doc);
                }
            }
            RenderCommand::Shutdown => break,
        }
    }
    renderer.close();
}

fn same_page(finished: &str, target: &str) -> bool {
    finished
        .trim_end_matches('/')
        .eq_ignore_ascii_case(target.trim_end_matches('/'))
}

#[cfg(feature = "chrome")]
pub use chrome::chrome_renderer_factory;

#[cfg(feature = "chrome")]
mod chrome {
    use super::{PageRenderer, RenderedPage, RendererFactory};
    use crate::{EngineError, Result};
    use headless_chrome::{Browser, LaunchOptions, Tab};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct ChromeRenderer {
        _browser: Browser,
        tab: Arc<Tab>,
    }

    fn render_error(err: impl std::fmt::Display) -> EngineError {
        EngineError::Render(err.to_string())
    }

    impl ChromeRenderer {
        fn launch(
            user_agent: &str,
            headers: &[(String, String)],
            navigation_timeout: Duration,
        ) -> Result<Self> {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .window_size(Some((1280, 800)))
                .build()
                .map_err(render_error)?;
            let browser = Browser::new(options).map_err(render_error)?;
            let tab = browser.new_tab().map_err(render_error)?;
            tab.set_default_timeout(navigation_timeout);
            tab.set_user_agent(user_agent, None, None)
                .map_err(render_error)?;
            if !headers.is_empty() {
                let extra: HashMap<&str, &str> = headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str()))
                    .collect();
                tab.set_extra_http_headers(extra).map_err(render_error)?;
            }
            Ok(Self {
                _browser: browser,
                tab,
            })
        }
    }

    impl PageRenderer for ChromeRenderer {
        fn render(&mut self, url: &str) -> Result<RenderedPage> {
            self.tab
                .navigate_to(url)
                .and_then(|tab| tab.wait_until_navigated())
                .map_err(render_error)?;
            let html = self.tab.get_content().map_err(render_error)?;
            Ok(RenderedPage {
                finished_url: self.tab.get_url(),
                html,
            })
        }

        fn close(&mut self) {
            let _ = self.tab.close(true);
        }
    }

    /// Headless Chrome with one tab per session. `navigation_timeout` bounds a
    /// single navigation so the render thread never outlives its session for long.
    pub fn chrome_renderer_factory(
        user_agent: String,
        navigation_timeout: Duration,
    ) -> RendererFactory {
        Arc::new(move |headers: &[(String, String)]| -> Result<Box<dyn PageRenderer>> {
            let renderer = ChromeRenderer::launch(&user_agent, headers, navigation_timeout)?;
            Ok(Box::new(renderer) as Box<dyn PageRenderer>)
        })
    }
}
