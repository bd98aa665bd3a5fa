// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/alert.rs - 布防状态与一次性告警
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

use std::{
  sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
    mpsc,
  },
  thread,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{detector::DetectionResult, output::format_confidence};

#[cfg(feature = "sms_twilio")]
mod twilio;
#[cfg(feature = "sms_twilio")]
pub use self::twilio::{TwilioConfig, TwilioError, TwilioTransport};

/// 操作端与采集循环共享的状态
///
/// `armed` 与告警号码由 HTTP 层写入，采集循环每一帧读取。
#[derive(Debug, Default)]
pub struct Session {
  armed: AtomicBool,
  target: RwLock<Option<String>>,
}

impl Session {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_armed(&self) -> bool {
    self.armed.load(Ordering::Acquire)
  }

  pub fn set_armed(&self, armed: bool) {
    let previous = self.armed.swap(armed, Ordering::AcqRel);
    if previous != armed {
      info!("布防状态: {}", if armed { "开启" } else { "关闭" });
    }
  }

  /// 当前告警号码
  pub fn target(&self) -> Option<String> {
    self
      .target
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn has_target(&self) -> bool {
    self
      .target
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  /// 设置告警号码，空白输入被忽略；号码只能被覆盖，不能清除
  pub fn set_target(&self, target: &str) -> bool {
    let target = target.trim();
    if target.is_empty() {
      return false;
    }
    *self.target.write().unwrap_or_else(PoisonError::into_inner) = Some(target.to_string());
    info!("告警号码已更新");
    true
  }
}

#[derive(Error, Debug)]
pub enum AlertError {
  #[cfg(feature = "sms_twilio")]
  #[error("Twilio 短信发送失败: {0}")]
  TwilioError(#[from] TwilioError),
  #[error("告警线程已停止")]
  WorkerStopped,
  #[error("告警发送失败: {0}")]
  Transport(String),
}

/// 告警通道
pub trait AlertTransport: Send + Sync {
  fn send_message(&self, destination: &str, body: &str) -> Result<(), AlertError>;
}

impl<T: AlertTransport + ?Sized> AlertTransport for Box<T> {
  fn send_message(&self, destination: &str, body: &str) -> Result<(), AlertError> {
    (**self).send_message(destination, body)
  }
}

impl<T: AlertTransport + ?Sized> AlertTransport for Arc<T> {
  fn send_message(&self, destination: &str, body: &str) -> Result<(), AlertError> {
    (**self).send_message(destination, body)
  }
}

/// 只写日志，不真正发送；未配置短信凭据时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

impl AlertTransport for LogTransport {
  fn send_message(&self, destination: &str, body: &str) -> Result<(), AlertError> {
    warn!("未配置短信通道，告警发往 {}: {}", destination, body);
    Ok(())
  }
}

struct AlertMessage {
  destination: String,
  body: String,
}

/// 在独立线程上发送告警，`send_message` 只负责入队
///
/// 发送失败只记录日志，不重试。
pub struct AlertWorker {
  sender: Option<mpsc::Sender<AlertMessage>>,
  handle: Option<thread::JoinHandle<()>>,
}

impl AlertWorker {
  pub fn spawn<T: AlertTransport + 'static>(transport: T) -> std::io::Result<Self> {
    let (sender, receiver) = mpsc::channel::<AlertMessage>();
    let handle = thread::Builder::new()
      .name("alert-worker".into())
      .spawn(move || {
        for message in receiver {
          match transport.send_message(&message.destination, &message.body) {
            Ok(()) => info!("告警已发送"),
            Err(e) => error!("告警发送失败: {}", e),
          }
        }
        debug!("告警线程退出");
      })?;

    Ok(Self {
      sender: Some(sender),
      handle: Some(handle),
    })
  }
}

impl AlertTransport for AlertWorker {
  fn send_message(&self, destination: &str, body: &str) -> Result<(), AlertError> {
    let sender = self.sender.as_ref().ok_or(AlertError::WorkerStopped)?;
    sender
      .send(AlertMessage {
        destination: destination.to_string(),
        body: body.to_string(),
      })
      .map_err(|_| AlertError::WorkerStopped)
  }
}

impl Drop for AlertWorker {
  fn drop(&mut self) {
    // 先关闭通道，让线程发送完剩余消息后退出
    self.sender.take();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      error!("告警线程异常退出");
    }
  }
}

/// 一次评估的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
  /// 本帧没有目标，重置告警状态
  Clear,
  /// 有目标但未布防
  Disarmed,
  /// 本次检测已经告警过
  Suppressed,
  /// 告警已交给通道
  Dispatched,
  /// 未设置告警号码，仅记录日志
  NoTarget,
  /// 通道返回错误
  Failed,
}

impl GateOutcome {
  /// 本帧是否触发了这一轮检测的告警
  pub fn fired(&self) -> bool {
    matches!(
      self,
      GateOutcome::Dispatched | GateOutcome::NoTarget | GateOutcome::Failed
    )
  }
}

/// 保证一段连续检测最多只告警一次
pub struct AlertGate<T> {
  session: Arc<Session>,
  transport: T,
  already_fired: bool,
}

impl<T: AlertTransport> AlertGate<T> {
  pub fn new(session: Arc<Session>, transport: T) -> Self {
    Self {
      session,
      transport,
      already_fired: false,
    }
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  pub fn already_fired(&self) -> bool {
    self.already_fired
  }

  pub fn evaluate(&mut self, result: &DetectionResult) -> GateOutcome {
    let Some(top) = result.top() else {
      if self.already_fired {
        debug!("目标消失，告警状态复位");
      }
      self.already_fired = false;
      return GateOutcome::Clear;
    };

    if !self.session.is_armed() {
      return GateOutcome::Disarmed;
    }
    if self.already_fired {
      return GateOutcome::Suppressed;
    }
    self.already_fired = true;

    let body = alert_message(&top.label, top.confidence);
    let Some(target) = self.session.target() else {
      warn!("未设置告警号码，跳过告警: {}", body);
      return GateOutcome::NoTarget;
    };

    info!("发送告警: {}", body);
    match self.transport.send_message(&target, &body) {
      Ok(()) => GateOutcome::Dispatched,
      Err(e) => {
        error!("告警发送失败: {}", e);
        GateOutcome::Failed
      }
    }
  }
}

pub fn alert_message(label: &str, confidence: f32) -> String {
  format!(
    "Object detected: {} with confidence {}",
    label,
    format_confidence(confidence)
  )
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::detector::{BBox, Detection};

  #[derive(Default)]
  struct Recorder {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
  }

  impl Recorder {
    fn count(&self) -> usize {
      self.sent.lock().unwrap().len()
    }
  }

  impl AlertTransport for Recorder {
    fn send_message(&self, destination: &str, body: &str) -> Result<(), AlertError> {
      self
        .sent
        .lock()
        .unwrap()
        .push((destination.to_string(), body.to_string()));
      if self.fail {
        Err(AlertError::Transport("boom".into()))
      } else {
        Ok(())
      }
    }
  }

  fn result(detected: bool) -> DetectionResult {
    let detections = if detected {
      vec![
        Detection {
          class_id: 0,
          label: "cat".into(),
          confidence: 0.9,
          bbox: BBox::new(0, 0, 10, 10),
        },
        Detection {
          class_id: 0,
          label: "cat".into(),
          confidence: 0.6,
          bbox: BBox::new(50, 50, 10, 10),
        },
      ]
    } else {
      vec![]
    };
    DetectionResult { detections }
  }

  fn gate(armed: bool, target: Option<&str>) -> (AlertGate<Arc<Recorder>>, Arc<Recorder>) {
    let session = Arc::new(Session::new());
    session.set_armed(armed);
    if let Some(target) = target {
      session.set_target(target);
    }
    let recorder = Arc::new(Recorder::default());
    (AlertGate::new(session, recorder.clone()), recorder)
  }

  #[test]
  fn one_alert_per_episode() {
    let (mut gate, recorder) = gate(true, Some("+15550100"));
    let outcomes = [true, true, true, false, true]
      .into_iter()
      .map(|d| gate.evaluate(&result(d)))
      .collect::<Vec<_>>();

    assert_eq!(recorder.count(), 2);
    assert_eq!(
      outcomes,
      vec![
        GateOutcome::Dispatched,
        GateOutcome::Suppressed,
        GateOutcome::Suppressed,
        GateOutcome::Clear,
        GateOutcome::Dispatched,
      ]
    );

    let sent = recorder.sent.lock().unwrap();
    assert_eq!(sent[0].0, "+15550100");
    assert_eq!(sent[0].1, "Object detected: cat with confidence 0.9");
  }

  #[test]
  fn disarmed_never_alerts() {
    let (mut gate, recorder) = gate(false, Some("+15550100"));
    for _ in 0..5 {
      assert_eq!(gate.evaluate(&result(true)), GateOutcome::Disarmed);
    }
    assert_eq!(recorder.count(), 0);
    assert!(!gate.already_fired());
  }

  #[test]
  fn arming_mid_episode_fires_once() {
    let (mut gate, recorder) = gate(false, Some("+15550100"));
    gate.evaluate(&result(true));
    gate.session().set_armed(true);
    gate.evaluate(&result(true));
    gate.evaluate(&result(true));
    assert_eq!(recorder.count(), 1);
  }

  #[test]
  fn missing_target_still_counts_as_fired() {
    let (mut gate, recorder) = gate(true, None);
    assert_eq!(gate.evaluate(&result(true)), GateOutcome::NoTarget);
    assert_eq!(gate.evaluate(&result(true)), GateOutcome::Suppressed);
    assert_eq!(recorder.count(), 0);
    assert!(gate.already_fired());
  }

  #[test]
  fn transport_failure_is_not_retried() {
    let session = Arc::new(Session::new());
    session.set_armed(true);
    session.set_target("+15550100");
    let recorder = Arc::new(Recorder {
      fail: true,
      ..Default::default()
    });
    let mut gate = AlertGate::new(session, recorder.clone());

    assert_eq!(gate.evaluate(&result(true)), GateOutcome::Failed);
    assert_eq!(gate.evaluate(&result(true)), GateOutcome::Suppressed);
    assert_eq!(recorder.count(), 1);
  }

  #[test]
  fn blank_target_is_ignored() {
    let session = Session::new();
    assert!(!session.set_target("   "));
    assert!(!session.has_target());
    assert!(session.set_target(" +15550100 "));
    assert_eq!(session.target().as_deref(), Some("+15550100"));
  }

  #[test]
  fn worker_delivers_in_background() {
    let recorder = Arc::new(Recorder::default());
    let worker = AlertWorker::spawn(recorder.clone()).unwrap();
    worker.send_message("+15550100", "hello").unwrap();
    // 析构时等待队列清空
    drop(worker);
    assert_eq!(recorder.count(), 1);
  }
}
