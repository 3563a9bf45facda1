use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use herald_core::error::AppError;
use herald_core::pool::ResourceManager;
use herald_core::strategy::{PageSession, PooledPageFetcher};
use tokio::task::JoinHandle;

/// Reliable-tier fetcher: pooled headless Chrome instances driving the
/// render-and-verify routine from `herald_core::strategy`.
pub type BrowserFetcher = PooledPageFetcher<BrowserManager>;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// One Chrome process with a single reusable tab.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    pid: Option<u32>,
    navigation_timeout: Duration,
}

fn browser_err(action: &str, e: impl Display) -> AppError {
    AppError::BrowserError(format!("{action}: {e}"))
}

/// Run a page-load step under `timeout`; expiry is [`AppError::Timeout`].
async fn bounded<T, E: Display>(
    timeout: Duration,
    action: &str,
    step: impl Future<Output = Result<T, E>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(timeout, step).await {
        Ok(result) => result.map_err(|e| browser_err(action, e)),
        Err(_) => {
            tracing::warn!(action, timeout_secs = timeout.as_secs(), "Page load timed out");
            Err(AppError::Timeout(timeout.as_secs()))
        }
    }
}

impl PageSession for BrowserSession {
    async fn navigate(&mut self, url: &str) -> Result<(), AppError> {
        let action = format!("Failed to navigate to {url}");
        bounded(self.navigation_timeout, &action, self.page.goto(url)).await?;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let page = &self.page;
        let found = tokio::time::timeout(timeout, async {
            loop {
                if page.find_element(selector).await.is_ok() {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await;

        found.map_err(|_| AppError::Timeout(timeout.as_secs()))
    }

    async fn page_source(&mut self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(|e| browser_err("Failed to read page content", e))
    }

    async fn reload(&mut self) -> Result<(), AppError> {
        bounded(
            self.navigation_timeout,
            "Failed to reload page",
            self.page.reload(),
        )
        .await?;
        Ok(())
    }

    async fn element_html(&mut self, selector: &str) -> Result<Option<String>, AppError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        element
            .outer_html()
            .await
            .map_err(|e| browser_err(&format!("Failed to read '{selector}'"), e))
    }
}

/// Launches and tears down headless Chrome for the browser pool.
#[derive(Debug, Clone)]
pub struct BrowserManager {
    executable: Option<PathBuf>,
    navigation_timeout: Duration,
}

impl Default for BrowserManager {
    fn default() -> Self {
        Self {
            executable: None,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }
}

impl BrowserManager {
    /// Uses `$CHROME_BIN` or the first well-known install location found,
    /// leaving the lookup to `chromiumoxide` when neither exists.
    pub fn new() -> Self {
        Self {
            executable: find_chrome_binary(),
            ..Self::default()
        }
    }

    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
            ..Self::default()
        }
    }

    /// Bound on each navigation and reload.
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    fn config(&self) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = &self.executable {
            builder = builder.chrome_executable(bin);
        }
        builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::PoolError(format!("Browser config error: {e}")))
    }
}

impl ResourceManager for BrowserManager {
    type Resource = BrowserSession;

    fn kind(&self) -> &'static str {
        "browser"
    }

    async fn create(&self) -> Result<BrowserSession, AppError> {
        let (mut browser, mut handler) = Browser::launch(self.config()?)
            .await
            .map_err(|e| AppError::PoolError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "Browser CDP handler stopped");
                    break;
                }
            }
        });

        let pid = browser
            .get_mut_child()
            .and_then(|child| child.as_mut_inner().id());

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler.abort();
                return Err(AppError::PoolError(format!("Failed to open tab: {e}")));
            }
        };

        tracing::debug!(pid = ?pid, "Browser launched");
        Ok(BrowserSession {
            browser,
            page,
            handler,
            pid,
            navigation_timeout: self.navigation_timeout,
        })
    }

    async fn probe(&self, session: &mut BrowserSession) -> bool {
        if session.handler.is_finished() {
            return false;
        }
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, session.browser.version()).await,
            Ok(Ok(_))
        )
    }

    async fn destroy(&self, mut session: BrowserSession) -> Result<(), AppError> {
        let _ = session.page.close().await;
        let closed = session.browser.close().await;
        let _ = session.browser.wait().await;
        session.handler.abort();
        closed
            .map(|_| ())
            .map_err(|e| browser_err("Failed to close browser", e))
    }

    fn process_id(&self, session: &BrowserSession) -> Option<u32> {
        session.pid
    }

    async fn kill_process(&self, pid: u32) -> Result<(), AppError> {
        let status = if cfg!(windows) {
            tokio::process::Command::new("taskkill")
                .args(["/F", "/T", "/PID", &pid.to_string()])
                .status()
                .await
        } else {
            tokio::process::Command::new("kill")
                .args(["-9", &pid.to_string()])
                .status()
                .await
        };

        match status {
            Ok(status) if status.success() => {
                tracing::warn!(pid, "Force-killed browser process");
                Ok(())
            }
            // Already gone.
            Ok(_) => Ok(()),
            Err(e) => Err(AppError::PoolError(format!(
                "Failed to kill browser process {pid}: {e}"
            ))),
        }
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via **snap**, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags and breaks headless mode,
/// so the binary inside the snap is preferred.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}
