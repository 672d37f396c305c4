//! Headless Chromium renderer.
//!
//! One browser process per render:
//!
//! ```text
//! launch ─→ new page ─→ viewport 994×768, screen media
//!        ─→ navigate file:// ─→ wait networkAlmostIdle
//!        ─→ inject print CSS ─→ measure scroll size ─→ printToPDF
//!        ─→ locate headings ─→ close page ─→ close browser
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, trace};
use url::Url;

use super::cdp::{CdpConnection, CdpEvent};
use super::{detect, DocumentRenderer, RenderOutput, RenderRequest, PRINT_OVERRIDE_CSS};
use crate::config::ExportConfig;
use crate::error::{render_err, Result};
use crate::heading::{decode_located, LOCATOR_SCRIPT};
use crate::mapping::paper_dimension_pt;

/// Bound on a single DevTools command. Printing a very tall page is the slow
/// one.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bytes requested per `IO.read` while streaming the printed PDF.
const READ_CHUNK: u32 = 1 << 20;

const DEVTOOLS_BANNER: &str = "DevTools listening on ";

const DIMENSIONS_SCRIPT: &str =
    "({ width: document.body.scrollWidth, height: document.body.scrollHeight })";

const BASE_ARGS: [&str; 7] = [
    "--headless=new",
    "--remote-debugging-port=0",
    "--no-first-run",
    "--no-default-browser-check",
    "--hide-scrollbars",
    "--mute-audio",
    "--disable-background-networking",
];

/// Renders with a locally installed Chromium-family browser.
#[derive(Debug, Clone, Default)]
pub struct ChromeRenderer {
    executable: Option<PathBuf>,
}

impl ChromeRenderer {
    /// `None` auto-detects the browser at render time.
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(config.chrome_executable.clone())
    }
}

#[async_trait]
impl DocumentRenderer for ChromeRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let executable = detect::find_browser(self.executable.as_deref())?;
        let mut browser =
            BrowserProcess::launch(&executable, &request.launch_args, request.launch_timeout).await?;
        let outcome = render_in_browser(&mut browser, request).await;
        browser.shutdown().await;
        outcome
    }
}

/// A running browser and its browser-level DevTools session.
struct BrowserProcess {
    child: Child,
    ws_url: String,
    connection: CdpConnection,
    // Removed when the process is gone
    _profile: TempDir,
}

impl BrowserProcess {
    async fn launch(executable: &Path, launch_args: &[String], timeout: Duration) -> Result<Self> {
        let profile = tempfile::Builder::new().prefix("nbpdf-profile").tempdir()?;

        let mut std_cmd = std::process::Command::new(executable);
        std_cmd
            .args(BASE_ARGS)
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .args(launch_args)
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group: terminal signals go to the exporter, which owns
        // the browser's lifetime.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_cmd, 0);
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| render_err(format!("failed to launch {}: {e}", executable.display())))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| render_err("browser stderr unavailable"))?;
        let mut lines = BufReader::new(stderr).lines();

        let banner = tokio::time::timeout(timeout, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(url) = devtools_url(&line) {
                    return Ok(Some(url));
                }
                trace!("browser: {}", line);
            }
            Ok::<_, std::io::Error>(None)
        })
        .await;

        let ws_url = match banner {
            Ok(Ok(Some(url))) => url,
            Ok(Ok(None)) => return Err(render_err("browser exited before DevTools was ready")),
            Ok(Err(e)) => return Err(render_err(format!("failed to read browser output: {e}"))),
            Err(_) => {
                return Err(render_err(format!(
                    "browser did not start within {}s",
                    timeout.as_secs()
                )))
            }
        };

        // Keep draining stderr so the browser never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!("browser: {}", line);
            }
        });

        let connection = CdpConnection::connect(&ws_url).await?;
        info!("Launched {} ({})", executable.display(), ws_url);
        Ok(Self {
            child,
            ws_url,
            connection,
            _profile: profile,
        })
    }

    /// Close the browser. Never fails: the render outcome is already decided.
    async fn shutdown(mut self) {
        let _ = self
            .connection
            .call::<_, Value>("Browser.close", json!({}), SHUTDOWN_GRACE)
            .await;
        let _ = self.connection.close().await;
        if tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await.is_err() {
            let _ = self.child.kill().await;
        }
        debug!("Browser closed");
    }
}

fn devtools_url(line: &str) -> Option<String> {
    line.trim()
        .strip_prefix(DEVTOOLS_BANNER)
        .map(|url| url.trim().to_string())
}

/// Page-level endpoint on the same DevTools server as `browser_ws`.
fn page_ws_url(browser_ws: &str, target_id: &str) -> Result<String> {
    let mut url = Url::parse(browser_ws)
        .map_err(|e| render_err(format!("bad DevTools URL {browser_ws}: {e}")))?;
    url.set_path(&format!("/devtools/page/{target_id}"));
    Ok(url.to_string())
}

fn is_network_almost_idle(event: &CdpEvent, frame_id: &str, loader_id: Option<&str>) -> bool {
    if event.method != "Page.lifecycleEvent" {
        return false;
    }
    let params = &event.params;
    params["name"] == "networkAlmostIdle"
        && params["frameId"] == frame_id
        && loader_id.map_or(true, |id| params["loaderId"] == id)
}

fn add_style_expression(css: &str) -> Result<String> {
    Ok(format!(
        "(() => {{ const style = document.createElement('style'); \
         style.textContent = {}; \
         (document.head || document.documentElement).appendChild(style); }})()",
        serde_json::to_string(css).map_err(|e| render_err(format!("cannot quote stylesheet: {e}")))?
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedTarget {
    target_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Navigation {
    frame_id: String,
    loader_id: Option<String>,
    error_text: Option<String>,
}

#[derive(Deserialize)]
struct Dimensions {
    width: f64,
    height: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Evaluation {
    result: RemoteObject,
    exception_details: Option<ExceptionDetails>,
}

#[derive(Deserialize)]
struct RemoteObject {
    value: Option<Value>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct ExceptionDetails {
    text: String,
    exception: Option<RemoteObject>,
}

#[derive(Deserialize)]
struct Printed {
    data: Option<String>,
    stream: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    data: String,
    #[serde(default)]
    base64_encoded: bool,
    eof: bool,
}

async fn render_in_browser(browser: &mut BrowserProcess, request: &RenderRequest) -> Result<RenderOutput> {
    let target: CreatedTarget = browser
        .connection
        .call("Target.createTarget", json!({ "url": "about:blank" }), COMMAND_TIMEOUT)
        .await?;
    let page_url = page_ws_url(&browser.ws_url, &target.target_id)?;
    let mut page = CdpConnection::connect(&page_url).await?;
    let outcome = drive_page(&mut page, request).await;
    let _ = page.close().await;
    outcome
}

async fn drive_page(page: &mut CdpConnection, request: &RenderRequest) -> Result<RenderOutput> {
    page.call::<_, Value>("Page.enable", json!({}), COMMAND_TIMEOUT).await?;
    page.call::<_, Value>(
        "Page.setLifecycleEventsEnabled",
        json!({ "enabled": true }),
        COMMAND_TIMEOUT,
    )
    .await?;
    page.call::<_, Value>(
        "Emulation.setDeviceMetricsOverride",
        json!({
            "width": request.viewport_width,
            "height": request.viewport_height,
            "deviceScaleFactor": 1,
            "mobile": false,
        }),
        COMMAND_TIMEOUT,
    )
    .await?;
    page.call::<_, Value>(
        "Emulation.setEmulatedMedia",
        json!({ "media": "screen" }),
        COMMAND_TIMEOUT,
    )
    .await?;

    let url = Url::from_file_path(&request.html_path).map_err(|()| {
        render_err(format!("{} is not an absolute path", request.html_path.display()))
    })?;
    page.clear_events();
    let nav: Navigation = page
        .call("Page.navigate", json!({ "url": url.as_str() }), request.navigation_timeout)
        .await?;
    if let Some(error) = nav.error_text {
        return Err(render_err(format!("navigation to {url} failed: {error}")));
    }
    page.wait_for_event(
        |event| is_network_almost_idle(event, &nav.frame_id, nav.loader_id.as_deref()),
        request.navigation_timeout,
    )
    .await
    .map_err(|e| render_err(format!("{url} never went network-idle: {e}")))?;
    debug!("Loaded {}", url);

    evaluate(page, &add_style_expression(PRINT_OVERRIDE_CSS)?).await?;

    let dims: Dimensions = serde_json::from_value(evaluate(page, DIMENSIONS_SCRIPT).await?)
        .map_err(|e| render_err(format!("unexpected document size: {e}")))?;
    let paper_width_pt = paper_dimension_pt(dims.width, request.pixel_scale, request.page_ceiling_pt);
    let paper_height_pt = paper_dimension_pt(dims.height, request.pixel_scale, request.page_ceiling_pt);

    let printed: Printed = page
        .call(
            "Page.printToPDF",
            json!({
                "paperWidth": paper_width_pt / 72.0,
                "paperHeight": paper_height_pt / 72.0,
                "marginTop": 0,
                "marginBottom": 0,
                "marginLeft": 0,
                "marginRight": 0,
                "printBackground": true,
                "preferCSSPageSize": false,
                "transferMode": "ReturnAsStream",
            }),
            COMMAND_TIMEOUT,
        )
        .await?;
    let pdf = read_printed(page, printed).await?;
    if pdf.is_empty() {
        return Err(render_err("browser produced an empty PDF"));
    }
    tokio::fs::write(&request.pdf_path, &pdf).await?;
    info!(
        "Printed {}x{} px document to {} ({} bytes)",
        dims.width,
        dims.height,
        request.pdf_path.display(),
        pdf.len()
    );

    let headings = decode_located(evaluate(page, LOCATOR_SCRIPT).await?)?;
    debug!("Located {} headings", headings.len());

    Ok(RenderOutput {
        headings,
        scroll_width_px: dims.width,
        scroll_height_px: dims.height,
        paper_width_pt,
        paper_height_pt,
    })
}

/// Evaluate `expression` in the page and return its JSON value.
async fn evaluate(page: &mut CdpConnection, expression: &str) -> Result<Value> {
    let evaluation: Evaluation = page
        .call(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
            COMMAND_TIMEOUT,
        )
        .await?;
    if let Some(details) = evaluation.exception_details {
        let description = details
            .exception
            .and_then(|e| e.description)
            .unwrap_or(details.text);
        return Err(render_err(format!("page script failed: {description}")));
    }
    Ok(evaluation.result.value.unwrap_or(Value::Null))
}

async fn read_printed(page: &mut CdpConnection, printed: Printed) -> Result<Vec<u8>> {
    let engine = base64::engine::general_purpose::STANDARD;
    if let Some(handle) = printed.stream {
        let mut pdf = Vec::new();
        loop {
            let chunk: Chunk = page
                .call(
                    "IO.read",
                    json!({ "handle": handle, "size": READ_CHUNK }),
                    COMMAND_TIMEOUT,
                )
                .await?;
            if chunk.base64_encoded {
                pdf.extend(
                    engine
                        .decode(chunk.data.as_bytes())
                        .map_err(|e| render_err(format!("bad PDF chunk: {e}")))?,
                );
            } else {
                pdf.extend_from_slice(chunk.data.as_bytes());
            }
            if chunk.eof {
                break;
            }
        }
        let _ = page
            .call::<_, Value>("IO.close", json!({ "handle": handle }), COMMAND_TIMEOUT)
            .await;
        return Ok(pdf);
    }
    let data = printed.data.unwrap_or_default();
    engine
        .decode(data.as_bytes())
        .map_err(|e| render_err(format!("bad PDF data: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_devtools_banner() {
        assert_eq!(
            devtools_url("DevTools listening on ws://127.0.0.1:40123/devtools/browser/abc\n"),
            Some("ws://127.0.0.1:40123/devtools/browser/abc".to_string())
        );
        assert_eq!(devtools_url("[0101/000000.000:ERROR] something"), None);
    }

    #[test]
    fn page_url_shares_host_and_port() {
        let url = page_ws_url("ws://127.0.0.1:40123/devtools/browser/abc", "T9").unwrap();
        assert_eq!(url, "ws://127.0.0.1:40123/devtools/page/T9");
        assert!(page_ws_url("not a url", "T9").is_err());
    }

    #[test]
    fn network_idle_matches_frame_and_loader() {
        let event = CdpEvent {
            method: "Page.lifecycleEvent".to_string(),
            params: json!({"name": "networkAlmostIdle", "frameId": "F", "loaderId": "L2"}),
        };
        assert!(is_network_almost_idle(&event, "F", Some("L2")));
        assert!(is_network_almost_idle(&event, "F", None));
        assert!(!is_network_almost_idle(&event, "F", Some("L1")));
        assert!(!is_network_almost_idle(&event, "G", Some("L2")));

        let load = CdpEvent {
            method: "Page.lifecycleEvent".to_string(),
            params: json!({"name": "load", "frameId": "F", "loaderId": "L2"}),
        };
        assert!(!is_network_almost_idle(&load, "F", Some("L2")));
    }

    #[test]
    fn style_expression_quotes_css() {
        let expr = add_style_expression("a { content: \"x\" }").unwrap();
        assert!(add_style_expression(PRINT_OVERRIDE_CSS).is_ok());
        assert!(expr.contains(r#"style.textContent = "a { content: \"x\" }";"#));
    }

    #[tokio::test]
    async fn missing_browser_is_reported() {
        let renderer = ChromeRenderer::new(Some(PathBuf::from("/nonexistent/nbpdf/chromium")));
        let request = RenderRequest::new(
            PathBuf::from("/tmp/in.html"),
            PathBuf::from("/tmp/out.pdf"),
            &ExportConfig::default(),
        );
        let err = renderer.render(&request).await.unwrap_err();
        assert!(matches!(err, crate::error::ExportError::BrowserNotFound(_)));
    }

    /// Real browser round trip; opt in with `NBPDF_BROWSER_TESTS=1`.
    #[tokio::test]
    async fn renders_with_installed_browser() {
        if std::env::var("NBPDF_BROWSER_TESTS").map_or(true, |v| v != "1") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("nb.html");
        let pdf = dir.path().join("nb.pdf");
        std::fs::write(
            &html,
            "<html><body><h1>Title</h1><div style=\"height:3000px\"></div><h2>Part</h2></body></html>",
        )
        .unwrap();
        let request = RenderRequest::new(html, pdf.clone(), &ExportConfig::default());
        let output = ChromeRenderer::default().render(&request).await.unwrap();

        assert_eq!(output.headings.len(), 2);
        assert!(output.headings[0].top_offset_px < output.headings[1].top_offset_px);
        assert!(pdf.exists());
    }
}
