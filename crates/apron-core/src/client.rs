use std::time::Duration;

use anyhow::{
  Context,
  anyhow,
  bail
};
use reqwest::{
  StatusCode,
  Url
};
use serde_json::Value;
use tracing::{
  debug,
  info,
  warn
};

use crate::config::Config;
use crate::response::{
  NormalizedResponse,
  normalize_response_str
};
use crate::task::View;

const BODY_SNIPPET_CHARS: usize = 200;

/// Thin client for the task backend.
/// Only the "my tasks" listing is
/// used; everything it returns goes
/// through response normalization.
#[derive(Debug, Clone)]
pub struct ApiClient {
  base_url: Url,
  token:    Option<String>,
  http:     reqwest::Client
}

impl ApiClient {
  pub fn new(
    base_url: &str,
    token: Option<String>,
    timeout: Duration
  ) -> anyhow::Result<Self> {
    let http =
      reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context(
          "failed building HTTP client \
           for task backend"
        )?;
    Self::with_http(base_url, token, http)
  }

  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let base_url = cfg
      .get("api.base_url")
      .ok_or_else(|| {
        anyhow!("api.base_url is not set")
      })?;
    let token = cfg
      .get("api.token")
      .map(|token| token.trim().to_string())
      .filter(|token| !token.is_empty());
    Self::new(
      &base_url,
      token,
      cfg.api_timeout()?
    )
  }

  fn with_http(
    base_url: &str,
    token: Option<String>,
    http: reqwest::Client
  ) -> anyhow::Result<Self> {
    let base_url =
      Url::parse(base_url.trim())
        .with_context(|| {
          format!(
            "invalid api.base_url: \
             {base_url}"
          )
        })?;
    if base_url.cannot_be_a_base() {
      bail!(
        "api.base_url cannot carry a \
         path: {base_url}"
      );
    }
    Ok(Self {
      base_url,
      token,
      http
    })
  }

  pub fn my_tasks_url(
    &self,
    view: View
  ) -> anyhow::Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|()| {
        anyhow!(
          "api.base_url cannot carry \
           a path"
        )
      })?
      .pop_if_empty()
      .extend(["tasks", "my"]);
    url
      .query_pairs_mut()
      .append_pair("type", view.as_str());
    Ok(url)
  }

  #[tracing::instrument(skip(self), fields(view = %view))]
  pub async fn fetch_my_tasks(
    &self,
    view: View
  ) -> anyhow::Result<NormalizedResponse>
  {
    let url = self.my_tasks_url(view)?;
    info!(url = %url, "fetching task list");

    let mut request = self
      .http
      .get(url.clone())
      .header(
        reqwest::header::ACCEPT,
        "application/json"
      );
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    } else {
      debug!(
        "no api.token configured; \
         sending anonymous request"
      );
    }

    let response = request
      .send()
      .await
      .with_context(|| {
        format!("failed requesting {url}")
      })?;

    let status = response.status();
    let body =
      response.text().await.with_context(
        || {
          format!(
            "failed reading response \
             body from {url}"
          )
        }
      )?;

    if !status.is_success() {
      warn!(
        status = %status,
        "task backend returned an \
         error status"
      );
      return Err(status_error(
        status, &body
      ));
    }

    normalize_response_str(&body)
      .with_context(|| {
        format!(
          "unusable task list from {url}"
        )
      })
  }
}

fn status_error(
  status: StatusCode,
  body: &str
) -> anyhow::Error {
  let message =
    serde_json::from_str::<Value>(body)
      .ok()
      .and_then(|value| {
        value
          .get("message")
          .and_then(Value::as_str)
          .map(str::to_string)
      })
      .unwrap_or_else(|| {
        body
          .chars()
          .take(BODY_SNIPPET_CHARS)
          .collect()
      });

  match status {
    | StatusCode::UNAUTHORIZED
    | StatusCode::FORBIDDEN => {
      anyhow!(
        "task backend rejected \
         credentials (HTTP {status}); \
         check api.token: {message}"
      )
    }
    | _ => {
      anyhow!(
        "task backend returned HTTP \
         {status}: {message}"
      )
    }
  }
}
