// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/server.rs - HTTP 操作端与视频流
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

use std::{future::Future, sync::Arc};

use axum::{
  Form, Json, Router,
  body::Body,
  extract::State,
  http::{StatusCode, header},
  response::{Html, IntoResponse, Redirect, Response},
  routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
  alert::Session,
  bus::FrameBus,
  output::AnnotatedFrame,
  stream::{CONTENT_TYPE, StreamEncoder},
  task::{PipelineStats, StatsSnapshot},
};

mod html;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Clone)]
pub struct AppState {
  pub session: Arc<Session>,
  pub bus: FrameBus<AnnotatedFrame>,
  pub encoder: StreamEncoder,
  pub stats: Arc<PipelineStats>,
}

#[derive(Debug, Deserialize)]
struct TargetForm {
  phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArmForm {
  on: Option<String>,
  off: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
  pub armed: bool,
  pub target_set: bool,
  pub viewers: usize,
  pub frames_published: u64,
  pub frames_buffered: usize,
  pub pipeline: StatsSnapshot,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(index).post(set_target))
    .route("/video", get(video).post(set_armed))
    .route("/video_feed", get(video_feed))
    .route("/status", get(status))
    .with_state(state)
}

async fn index() -> Html<String> {
  Html(html::index_page())
}

async fn set_target(State(state): State<AppState>, Form(form): Form<TargetForm>) -> Redirect {
  let accepted = form
    .phone
    .as_deref()
    .is_some_and(|phone| state.session.set_target(phone));
  if !accepted {
    warn!("忽略空的告警号码");
  }
  Redirect::to("/video")
}

async fn video(State(state): State<AppState>) -> Html<String> {
  Html(html::video_page(state.session.is_armed()))
}

async fn set_armed(State(state): State<AppState>, Form(form): Form<ArmForm>) -> Redirect {
  if form.on.is_some() {
    state.session.set_armed(true);
  } else if form.off.is_some() {
    state.session.set_armed(false);
  }
  Redirect::to("/video")
}

async fn video_feed(State(state): State<AppState>) -> Response {
  let subscriber = state.bus.subscribe();
  info!("新的观看者，当前 {} 个", state.bus.subscriber_count());
  let body = Body::from_stream(state.encoder.stream(subscriber));

  (
    StatusCode::OK,
    [
      (header::CONTENT_TYPE, CONTENT_TYPE),
      (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    ],
    body,
  )
    .into_response()
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
  Json(StatusReport {
    armed: state.session.is_armed(),
    target_set: state.session.has_target(),
    viewers: state.bus.subscriber_count(),
    frames_published: state.bus.published(),
    frames_buffered: state.bus.len(),
    pipeline: state.stats.snapshot(),
  })
}

/// 在给定监听器上提供服务，`shutdown` 完成后优雅退出
pub async fn serve(
  listener: TcpListener,
  state: AppState,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
  info!("HTTP 服务监听于 {}", listener.local_addr()?);
  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown)
    .await
}
