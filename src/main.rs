// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/main.rs - 检测服务主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::{
  net::SocketAddr,
  sync::{Arc, atomic::Ordering},
  thread,
  time::Duration,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use maoyan::{
  FromUrl,
  alert::{AlertGate, AlertTransport, AlertWorker, LogTransport, Session},
  bus::FrameBus,
  detector::Detector,
  input::InputWrapper,
  model::{Labels, Model, ModelWrapper},
  server::{self, AppState},
  stream::StreamEncoder,
  task::CaptureLoop,
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 阻塞的 HTTP 客户端不能在 tokio 运行时内创建，因此在启动运行时之前构建
fn alert_transport(args: &args::Args) -> Result<Box<dyn AlertTransport>> {
  #[cfg(feature = "sms_twilio")]
  {
    use maoyan::alert::{TwilioConfig, TwilioTransport};

    if let Some(config) = TwilioConfig::from_parts(
      args.twilio_account_sid.clone(),
      args.twilio_auth_token.clone(),
      args.twilio_from.clone(),
    ) {
      info!("使用 Twilio 短信告警，发信号码: {}", config.from);
      return Ok(Box::new(TwilioTransport::new(config)?));
    }
  }
  #[cfg(not(feature = "sms_twilio"))]
  let _ = args;

  warn!("未配置短信通道，告警只写入日志");
  Ok(Box::new(LogTransport))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型地址: {}", args.model);
  info!("摄像头地址: {}", args.input);
  info!("置信度阈值: {}", args.confidence);
  info!("NMS 阈值: {} ({:?})", args.nms_threshold, args.nms_policy);

  let labels = match &args.labels {
    Some(path) => Labels::from_file(path)
      .with_context(|| format!("无法读取类别文件: {}", path.display()))?,
    None => Labels::default(),
  };
  let model = ModelWrapper::from_url(&args.model).context("无法加载模型")?;
  info!("模型输入分辨率: {:?}", model.input_size());
  let camera = InputWrapper::from_url(&args.input).context("无法打开摄像头")?;

  let session = Arc::new(Session::new());
  if let Some(target) = &args.target {
    session.set_target(target);
  }

  let worker = AlertWorker::spawn(alert_transport(&args)?).context("无法启动告警线程")?;
  let detector = Detector::new(model, labels, args.detector_config());
  let gate = AlertGate::new(session.clone(), worker);
  let bus = FrameBus::new(args.bus_capacity);

  let capture = CaptureLoop::new(camera, detector, gate, bus.clone())
    .with_retry_delay(Duration::from_millis(args.retry_delay_ms));
  let running = capture.running();
  let stats = capture.stats();
  let capture_handle = capture.spawn()?;

  let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
  let mut shutdown_tx = Some(shutdown_tx);
  let handler_running = running.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler_running.store(false, Ordering::Release);
    if let Some(tx) = shutdown_tx.take() {
      let _ = tx.send(());
    }
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理")?;

  let state = AppState {
    session,
    bus,
    encoder: StreamEncoder::new(args.jpeg_quality),
    stats,
  };
  let addr = SocketAddr::new(args.bind, args.port);

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("无法创建异步运行时")?;
  let served = runtime.block_on(async move {
    let listener = TcpListener::bind(addr)
      .await
      .with_context(|| format!("无法监听 {}", addr))?;
    server::serve(listener, state, async {
      let _ = shutdown_rx.await;
    })
    .await
    .context("HTTP 服务异常退出")
  });

  running.store(false, Ordering::Release);
  served?;

  capture_handle
    .join()
    .map_err(|_| anyhow!("采集线程异常退出"))?;
  info!("任务完成，退出");

  Ok(())
}
