// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/alert/twilio.rs - Twilio 短信通道
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

use crate::alert::{AlertError, AlertTransport};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TwilioError {
  #[error("HTTP 请求错误: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("Twilio 拒绝请求 ({status}): {body}")]
  Rejected {
    status: reqwest::StatusCode,
    body: String,
  },
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
  pub account_sid: String,
  pub auth_token: String,
  /// 发信号码
  pub from: String,
}

impl TwilioConfig {
  /// 三项都给出时才启用短信
  pub fn from_parts(
    account_sid: Option<String>,
    auth_token: Option<String>,
    from: Option<String>,
  ) -> Option<Self> {
    match (account_sid, auth_token, from) {
      (Some(account_sid), Some(auth_token), Some(from))
        if !account_sid.is_empty() && !auth_token.is_empty() && !from.is_empty() =>
      {
        Some(Self {
          account_sid,
          auth_token,
          from,
        })
      }
      _ => None,
    }
  }
}

/// 通过 Twilio REST API 发送短信
///
/// 使用阻塞客户端，必须在 tokio 运行时之外创建，并由告警线程调用。
pub struct TwilioTransport {
  config: TwilioConfig,
  client: Client,
  base_url: String,
}

impl TwilioTransport {
  pub fn new(config: TwilioConfig) -> Result<Self, TwilioError> {
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    Ok(Self {
      config,
      client,
      base_url: TWILIO_API_BASE.to_string(),
    })
  }

  pub fn messages_url(&self) -> String {
    format!(
      "{}/Accounts/{}/Messages.json",
      self.base_url, self.config.account_sid
    )
  }

  fn send(&self, destination: &str, body: &str) -> Result<(), TwilioError> {
    let url = self.messages_url();
    debug!("POST {}", url);

    let response = self
      .client
      .post(&url)
      .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
      .form(&[
        ("To", destination),
        ("From", self.config.from.as_str()),
        ("Body", body),
      ])
      .send()?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().unwrap_or_default();
      return Err(TwilioError::Rejected { status, body });
    }
    Ok(())
  }
}

impl AlertTransport for TwilioTransport {
  fn send_message(&self, destination: &str, body: &str) -> Result<(), AlertError> {
    self.send(destination, body).map_err(AlertError::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn incomplete_credentials_disable_sms() {
    assert!(TwilioConfig::from_parts(Some("AC1".into()), None, Some("+1".into())).is_none());
    assert!(
      TwilioConfig::from_parts(Some("AC1".into()), Some(String::new()), Some("+1".into()))
        .is_none()
    );
    assert!(
      TwilioConfig::from_parts(Some("AC1".into()), Some("t".into()), Some("+1".into())).is_some()
    );
  }

  #[test]
  fn messages_endpoint_uses_account_sid() {
    let config = TwilioConfig {
      account_sid: "AC123".into(),
      auth_token: "token".into(),
      from: "+15550000".into(),
    };
    let transport = TwilioTransport::new(config).unwrap();
    assert_eq!(
      transport.messages_url(),
      "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
    );
  }
}
