//! Per-session operations.
//!
//! Every operation looks the session up under the registry read lock,
//! verifies page membership (navigate creates the page instead), issues the
//! target-scoped protocol calls, stamps last-activity, and refreshes the
//! durable TTL best-effort.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cdp_client::CdpError;
use serde_json::{json, Value};

use crate::accessibility::{self, AxTree};
use crate::error::RegistryError;
use crate::registry::SessionRegistry;
use crate::session::Session;

impl SessionRegistry {
    /// Opens a new page at `url` inside the session's context and returns
    /// its page id.
    pub async fn navigate(&self, session_id: &str, url: &str) -> Result<String, RegistryError> {
        let session = self.get_session(session_id).await?;
        let page_id = session
            .client()
            .create_target(url, &session.context_id)
            .await?;
        session.add_page(page_id.clone());
        self.persist_pages_best_effort(&session).await;
        self.refresh_ttl_best_effort(session_id).await;
        Ok(page_id)
    }

    /// Evaluates a script on the page; the returned value may be any JSON.
    pub async fn evaluate(
        &self,
        session_id: &str,
        page_id: &str,
        script: &str,
    ) -> Result<Value, RegistryError> {
        let session = self.get_session(session_id).await?;
        ensure_page(&session, page_id)?;

        let result = session
            .client()
            .send_to_target(
                page_id,
                "Runtime.evaluate",
                json!({ "expression": script, "returnByValue": true }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            return Err(RegistryError::Script(details.clone()));
        }
        let value = result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null);

        session.touch();
        self.refresh_ttl_best_effort(session_id).await;
        Ok(value)
    }

    /// Captures the page as raw image bytes (png unless told otherwise).
    pub async fn screenshot(
        &self,
        session_id: &str,
        page_id: &str,
        format: Option<&str>,
    ) -> Result<Vec<u8>, RegistryError> {
        let session = self.get_session(session_id).await?;
        ensure_page(&session, page_id)?;

        let format = format.unwrap_or("png");
        let result = session
            .client()
            .send_to_target(page_id, "Page.captureScreenshot", json!({ "format": format }))
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| CdpError::Malformed("captureScreenshot response missing data".into()))?;
        let bytes = STANDARD
            .decode(data)
            .map_err(|err| CdpError::Malformed(format!("screenshot payload: {err}")))?;

        session.touch();
        self.refresh_ttl_best_effort(session_id).await;
        Ok(bytes)
    }

    /// Returns the page's full HTML.
    pub async fn content(&self, session_id: &str, page_id: &str) -> Result<String, RegistryError> {
        let session = self.get_session(session_id).await?;
        ensure_page(&session, page_id)?;
        let client = session.client();

        let document = client
            .send_to_target(page_id, "DOM.getDocument", Value::Null)
            .await?;
        let node_id = document
            .pointer("/root/nodeId")
            .and_then(Value::as_i64)
            .ok_or_else(|| CdpError::Malformed("getDocument response missing root nodeId".into()))?;

        let html = client
            .send_to_target(page_id, "DOM.getOuterHTML", json!({ "nodeId": node_id }))
            .await?;
        let content = html
            .get("outerHTML")
            .and_then(Value::as_str)
            .ok_or_else(|| CdpError::Malformed("getOuterHTML response missing outerHTML".into()))?
            .to_string();

        session.touch();
        self.refresh_ttl_best_effort(session_id).await;
        Ok(content)
    }

    /// Projects the page's full accessibility tree into cleaned nodes.
    pub async fn accessibility_tree(
        &self,
        session_id: &str,
        page_id: &str,
    ) -> Result<AxTree, RegistryError> {
        let session = self.get_session(session_id).await?;
        ensure_page(&session, page_id)?;

        let payload = session
            .client()
            .send_to_target(page_id, "Accessibility.getFullAXTree", Value::Null)
            .await?;
        let tree = accessibility::build_tree(page_id, payload)
            .map_err(|err| CdpError::Malformed(format!("accessibility tree: {err}")))?;

        session.touch();
        self.refresh_ttl_best_effort(session_id).await;
        Ok(tree)
    }

    /// Closes a page and drops it from the session's tracking. The browser
    /// context stays up because other pages may still be open.
    pub async fn close_page(&self, session_id: &str, page_id: &str) -> Result<(), RegistryError> {
        let session = self.get_session(session_id).await?;
        ensure_page(&session, page_id)?;

        session.client().close_target(page_id).await?;
        session.remove_page(page_id);
        self.persist_pages_best_effort(&session).await;
        self.refresh_ttl_best_effort(session_id).await;
        Ok(())
    }
}

fn ensure_page(session: &Session, page_id: &str) -> Result<(), RegistryError> {
    if session.contains_page(page_id) {
        Ok(())
    } else {
        Err(RegistryError::PageNotFound(page_id.to_string()))
    }
}
