use crate::app::ports::{HttpClientPort, HttpGetResult, SourceRequest};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl Default for ReqwestHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestHttp {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, request: &SourceRequest, timeout: Duration) -> Result<HttpGetResult, String> {
        let resp = self
            .client
            .get(&request.url)
            .query(&request.query)
            .timeout(timeout)
            .send()
            .await
            // without_url keeps query parameters (and so the API key) out of the message
            .map_err(|e| e.without_url().to_string())?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| e.without_url().to_string())?
            .to_vec();
        Ok(HttpGetResult {
            status,
            bytes,
            content_type,
        })
    }
}
