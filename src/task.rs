// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/task.rs - 采集循环
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
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  alert::{AlertGate, AlertTransport, GateOutcome},
  bus::FrameBus,
  detector::{Detector, DetectorError},
  frame::{Frame, FrameError},
  input::Camera,
  model::Model,
  output::{AnnotatedFrame, Annotator},
};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum CaptureLoopError {
  #[error("摄像头采集失败: {0}")]
  CaptureError(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("颜色转换失败: {0}")]
  FrameError(#[from] FrameError),
  #[error("检测失败: {0}")]
  DetectorError(#[from] DetectorError),
  #[error("无法启动采集线程: {0}")]
  SpawnError(#[from] std::io::Error),
}

/// 采集循环的运行计数
#[derive(Debug, Default)]
pub struct PipelineStats {
  frames_captured: AtomicU64,
  capture_failures: AtomicU64,
  inference_failures: AtomicU64,
  alerts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  pub frames_captured: u64,
  pub capture_failures: u64,
  pub inference_failures: u64,
  pub alerts: u64,
}

impl PipelineStats {
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      frames_captured: self.frames_captured.load(Ordering::Relaxed),
      capture_failures: self.capture_failures.load(Ordering::Relaxed),
      inference_failures: self.inference_failures.load(Ordering::Relaxed),
      alerts: self.alerts.load(Ordering::Relaxed),
    }
  }

  fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

/// 一次迭代的摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
  pub sequence: u64,
  pub detections: usize,
  pub outcome: GateOutcome,
  pub armed: bool,
}

/// 唯一的生产者：采集、检测、告警判定、标注、发布
///
/// 摄像头与模型由它独占。任何一帧的失败都只记录日志并跳过。
pub struct CaptureLoop<C, M, T> {
  camera: C,
  detector: Detector<M>,
  gate: AlertGate<T>,
  annotator: Annotator<'static>,
  bus: FrameBus<AnnotatedFrame>,
  stats: Arc<PipelineStats>,
  running: Arc<AtomicBool>,
  retry_delay: Duration,
  sequence: u64,
}

impl<C, M, T> CaptureLoop<C, M, T>
where
  C: Camera,
  M: Model,
  T: AlertTransport,
{
  pub fn new(
    camera: C,
    detector: Detector<M>,
    gate: AlertGate<T>,
    bus: FrameBus<AnnotatedFrame>,
  ) -> Self {
    Self {
      camera,
      detector,
      gate,
      annotator: Annotator::default(),
      bus,
      stats: Arc::new(PipelineStats::default()),
      running: Arc::new(AtomicBool::new(true)),
      retry_delay: DEFAULT_RETRY_DELAY,
      sequence: 0,
    }
  }

  pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
    self.retry_delay = retry_delay;
    self
  }

  /// 置为 `false` 后循环在当前迭代结束时退出
  pub fn running(&self) -> Arc<AtomicBool> {
    self.running.clone()
  }

  pub fn stats(&self) -> Arc<PipelineStats> {
    self.stats.clone()
  }

  pub fn run_iteration(&mut self) -> Result<Iteration, CaptureLoopError> {
    let raw = self.camera.capture_frame().map_err(|e| {
      PipelineStats::bump(&self.stats.capture_failures);
      CaptureLoopError::CaptureError(Box::new(e))
    })?;
    let image = raw.into_rgb().inspect_err(|_| {
      PipelineStats::bump(&self.stats.capture_failures);
    })?;

    self.sequence += 1;
    let frame = Frame::new(image, self.sequence);
    PipelineStats::bump(&self.stats.frames_captured);

    let now = Instant::now();
    let result = self.detector.detect(&frame.image).inspect_err(|_| {
      PipelineStats::bump(&self.stats.inference_failures);
    })?;
    debug!(
      "第 {} 帧检测完成，{} 个目标，耗时: {:.2?}",
      frame.sequence,
      result.len(),
      now.elapsed()
    );

    let outcome = self.gate.evaluate(&result);
    if outcome.fired() {
      PipelineStats::bump(&self.stats.alerts);
    }

    let armed = self.gate.session().is_armed();
    let annotated = self.annotator.annotate(&frame, &result, armed);
    self.bus.publish(annotated);

    Ok(Iteration {
      sequence: frame.sequence,
      detections: result.len(),
      outcome,
      armed,
    })
  }

  pub fn run(mut self) {
    info!("采集循环开始");
    while self.running.load(Ordering::Acquire) {
      match self.run_iteration() {
        Ok(_) => {}
        Err(e @ (CaptureLoopError::CaptureError(_) | CaptureLoopError::FrameError(_))) => {
          warn!("{}，{:?} 后重试", e, self.retry_delay);
          thread::sleep(self.retry_delay);
        }
        Err(e) => warn!("跳过本帧: {}", e),
      }
    }

    self.bus.close();
    info!("采集循环退出，统计: {:?}", self.stats.snapshot());
  }
}

impl<C, M, T> CaptureLoop<C, M, T>
where
  C: Camera + 'static,
  M: Model + 'static,
  T: AlertTransport + 'static,
{
  /// 在名为 `capture-loop` 的线程上运行
  pub fn spawn(self) -> Result<thread::JoinHandle<()>, CaptureLoopError> {
    let handle = thread::Builder::new()
      .name("capture-loop".into())
      .spawn(move || self.run())?;
    Ok(handle)
  }
}
