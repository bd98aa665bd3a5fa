// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{net::IpAddr, path::PathBuf};

use clap::Parser;
use url::Url;

use maoyan::detector::{DetectorConfig, NmsPolicy};

/// Maoyan 检测服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 onnx:///opt/maoyan/cat.onnx?size=320
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 类别名称文件，每行一个；缺省只有 cat
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 摄像头地址
  /// 支持:
  /// - 图片/目录回放: image:///path/to/cat.jpg?interval_ms=100
  /// - V4L2: v4l2:///dev/video0?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 监听地址
  #[arg(long, default_value = "0.0.0.0", value_name = "ADDR")]
  pub bind: IpAddr,

  /// 监听端口
  #[arg(long, default_value_t = maoyan::server::DEFAULT_PORT, value_name = "PORT")]
  pub port: u16,

  /// 置信度阈值 (0.0 - 1.0)，严格大于才保留
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.4", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// NMS 抑制范围
  #[arg(long, value_enum, default_value_t = NmsPolicy::ClassAgnostic)]
  pub nms_policy: NmsPolicy,

  /// 输入模型前交换 R/B 通道
  #[arg(long)]
  pub swap_rb: bool,

  /// 帧总线容量
  #[arg(long, default_value_t = maoyan::bus::DEFAULT_CAPACITY, value_name = "FRAMES")]
  pub bus_capacity: usize,

  /// 视频流 JPEG 质量 (1 - 100)
  #[arg(long, default_value_t = maoyan::stream::DEFAULT_JPEG_QUALITY, value_name = "QUALITY")]
  pub jpeg_quality: u8,

  /// 采集失败后的等待时间（毫秒）
  #[arg(long, default_value = "100", value_name = "MS")]
  pub retry_delay_ms: u64,

  /// 启动时的告警号码
  #[arg(long, env = "MAOYAN_TARGET", value_name = "PHONE")]
  pub target: Option<String>,

  /// Twilio 账号 SID
  #[cfg(feature = "sms_twilio")]
  #[arg(long, env = "TWILIO_ACCOUNT_SID", hide_env_values = true)]
  pub twilio_account_sid: Option<String>,

  /// Twilio 认证令牌
  #[cfg(feature = "sms_twilio")]
  #[arg(long, env = "TWILIO_AUTH_TOKEN", hide_env_values = true)]
  pub twilio_auth_token: Option<String>,

  /// Twilio 发信号码
  #[cfg(feature = "sms_twilio")]
  #[arg(long, env = "TWILIO_PHONE_NUMBER", value_name = "PHONE")]
  pub twilio_from: Option<String>,
}

impl Args {
  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      confidence_threshold: self.confidence,
      nms_threshold: self.nms_threshold,
      nms_policy: self.nms_policy,
      swap_rb: self.swap_rb,
    }
  }
}
