/// Layout probe backed by a headless-browser measurement sidecar.
///
/// The sidecar owns the real layout engine. It mounts the phantom HTML in an
/// off-screen container, waits two animation frames on `settle`, and reports the
/// bounding box and computed spacing of every `[data-phantom-box]` element.
///
/// Endpoints (relative to `LAYOUT_PROBE_URL`):
/// - `POST   /mounts`               `{id, html, width}`
/// - `POST   /mounts/{id}/settle`
/// - `GET    /mounts/{id}/boxes`    → `[{id, width, height, marginTop, ...}]`
/// - `DELETE /mounts/{id}`
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, warn};

use crate::layout::phantom::PhantomDocument;
use crate::layout::probe::{LayoutProbe, MeasuredBox, MountId, ProbeError};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct MountRequest<'a> {
    id: MountId,
    html: &'a str,
    width: f64,
}

#[derive(Clone)]
pub struct HttpLayoutProbe {
    client: Client,
    base_url: String,
}

impl HttpLayoutProbe {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProbeError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request, retrying on transport errors, 429 and 5xx with
    /// exponential backoff (250ms, 500ms).
    async fn send<F>(&self, build: F) -> Result<Response, ProbeError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error: Option<ProbeError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_millis(250 * (1 << (attempt - 1)));
                warn!(attempt, delay_ms = delay.as_millis() as u64, "probe call failed, retrying");
                tokio::time::sleep(delay).await;
            }

            let response = match build().send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(ProbeError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), %body, "probe sidecar unavailable");
                last_error = Some(ProbeError::Sidecar {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProbeError::Sidecar {
                    status: status.as_u16(),
                    message: body,
                });
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(ProbeError::Exhausted {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl LayoutProbe for HttpLayoutProbe {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn attach(&self, document: &PhantomDocument) -> Result<MountId, ProbeError> {
        let mount = MountId::new();
        let body = MountRequest {
            id: mount,
            html: &document.html,
            width: document.width,
        };
        self.send(|| self.client.post(self.url("/mounts")).json(&body))
            .await?;
        debug!(%mount, "phantom document mounted in sidecar");
        Ok(mount)
    }

    async fn settle(&self, mount: MountId) -> Result<(), ProbeError> {
        let url = self.url(&format!("/mounts/{mount}/settle"));
        self.send(|| self.client.post(&url)).await?;
        Ok(())
    }

    async fn measure(&self, mount: MountId) -> Result<Vec<MeasuredBox>, ProbeError> {
        let url = self.url(&format!("/mounts/{mount}/boxes"));
        let response = self.send(|| self.client.get(&url)).await?;
        Ok(response.json().await?)
    }

    async fn detach(&self, mount: MountId) -> Result<(), ProbeError> {
        let url = self.url(&format!("/mounts/{mount}"));
        match self.send(|| self.client.request(Method::DELETE, &url)).await {
            Err(ProbeError::Sidecar { status: 404, .. }) => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let probe = HttpLayoutProbe::new("http://probe:9222/").expect("client");
        assert_eq!(probe.url("/mounts"), "http://probe:9222/mounts");
    }

    #[test]
    fn test_measured_box_decodes_flattened_geometry() {
        let raw = r#"[{"id":"m0-title","width":674,"height":48,"marginBottom":16,"breakInside":"avoid"}]"#;
        let boxes: Vec<MeasuredBox> = serde_json::from_str(raw).expect("decode");
        assert_eq!(boxes[0].id, "m0-title");
        assert_eq!(boxes[0].geometry.height, 48.0);
        assert!(boxes[0].geometry.avoids_break_inside());
    }

    #[tokio::test]
    async fn test_unreachable_sidecar_exhausts_retries() {
        let probe = HttpLayoutProbe::new("http://127.0.0.1:9").expect("client");
        let err = probe.settle(MountId::new()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Http(_)));
    }
}
