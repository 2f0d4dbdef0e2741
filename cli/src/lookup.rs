// MAC vendor lookup
//
// Thin client for a macvendors-style HTTP service: GET <base>/<mac> returns the
// vendor name as plain text. ureq is blocking, so calls run on the blocking pool.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream response, forwarded to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorResponse {
    pub mac: String,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub data: String,
}

#[derive(Clone)]
pub struct VendorLookup {
    base_url: String,
    agent: ureq::Agent,
}

impl VendorLookup {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(LOOKUP_TIMEOUT).build(),
        }
    }

    pub fn url_for(&self, mac: &str) -> String {
        format!("{}/{}", self.base_url, mac)
    }

    /// Look up an already validated hardware address
    pub async fn lookup(&self, mac: &str) -> Result<VendorResponse> {
        let agent = self.agent.clone();
        let url = self.url_for(mac);
        let mac = mac.to_string();

        tokio::task::spawn_blocking(move || fetch(&agent, &url, mac))
            .await
            .context("Vendor lookup task failed")?
    }
}

fn fetch(agent: &ureq::Agent, url: &str, mac: String) -> Result<VendorResponse> {
    debug!("Vendor lookup: GET {}", url);

    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            warn!("Vendor lookup for {} returned {}: {}", mac, code, body);
            anyhow::bail!("vendor service returned {}: {}", code, body.trim());
        }
        Err(e) => {
            warn!("Vendor lookup for {} failed: {}", mac, e);
            return Err(e).context("vendor service unreachable");
        }
    };

    let status = response.status();
    let status_text = response.status_text().to_string();
    let headers = response
        .headers_names()
        .into_iter()
        .filter_map(|name| {
            let value = response.header(&name)?.to_string();
            Some((name, value))
        })
        .collect();
    let data = response
        .into_string()
        .context("Failed to read vendor response body")?;

    Ok(VendorResponse {
        mac,
        status,
        status_text,
        headers,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_strips_trailing_slash() {
        let lookup = VendorLookup::new("https://api.macvendors.com/");
        assert_eq!(
            lookup.url_for("00:1a:7d:da:71:13"),
            "https://api.macvendors.com/00:1a:7d:da:71:13"
        );
    }

    #[test]
    fn test_vendor_response_shape() {
        let response = VendorResponse {
            mac: "00:1a:7d:da:71:13".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: BTreeMap::new(),
            data: "cyber-blue(HK)Ltd".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["statusText"], "OK");
        assert_eq!(json["data"], "cyber-blue(HK)Ltd");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        // port 9 (discard) on localhost is not expected to serve HTTP
        let lookup = VendorLookup::new("http://127.0.0.1:9");
        assert!(lookup.lookup("00:1a:7d:da:71:13").await.is_err());
    }
}
