// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use maoyan::{
  FromUrl,
  detector::{Detector, DetectorConfig, NmsPolicy},
  frame::Frame,
  input::{Camera, ImageFileInput},
  model::{Labels, ModelWrapper},
  output::{Annotator, OutputWrapper, Render},
};
use tracing::info;

/// 对一张图像做检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 类别名称文件
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 输入图像，例如 image:///tmp/cat.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 image:///tmp/cat-out.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,
  /// NMS 抑制范围
  #[arg(long, value_enum, default_value_t = NmsPolicy::ClassAgnostic)]
  pub nms_policy: NmsPolicy,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let labels = match &args.labels {
    Some(path) => Labels::from_file(path)
      .with_context(|| format!("无法读取类别文件: {}", path.display()))?,
    None => Labels::default(),
  };
  let mut input = ImageFileInput::from_url(&args.input)?;
  let model = ModelWrapper::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let config = DetectorConfig {
    confidence_threshold: args.confidence,
    nms_policy: args.nms_policy,
    ..Default::default()
  };
  let mut detector = Detector::new(model, labels, config);

  let frame = Frame::new(input.capture_frame()?.into_rgb()?, 1);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result = detector.detect(&frame.image)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  for det in result.iter() {
    info!(
      "  - {}: {:.2}% at ({}, {}, {}x{})",
      det.label,
      det.confidence * 100.0,
      det.bbox.x,
      det.bbox.y,
      det.bbox.width,
      det.bbox.height
    );
  }

  let annotated = Annotator::default().annotate(&frame, &result, false);
  output.render(&annotated)?;

  Ok(())
}
