// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/bus.rs - 采集循环与观看端之间的帧总线
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

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use tokio::sync::{
  broadcast::{self, error::RecvError, error::TryRecvError},
  watch,
};
use tracing::{debug, trace};

pub const DEFAULT_CAPACITY: usize = 10;

/// 有界、有损的广播帧总线
///
/// 只有采集循环调用 `publish`，且永不阻塞；满了就挤掉最旧的帧。
/// 每个订阅者有自己的读取位置，落后太多时跳到仍保留的最旧帧。
/// 实际容量为请求容量向上取整到 2 的幂。
pub struct FrameBus<T> {
  tx: broadcast::Sender<Arc<T>>,
  closed: Arc<watch::Sender<bool>>,
  published: Arc<AtomicU64>,
  capacity: usize,
}

impl<T> Clone for FrameBus<T> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      closed: self.closed.clone(),
      published: self.published.clone(),
      capacity: self.capacity,
    }
  }
}

impl<T> Default for FrameBus<T> {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

impl<T> FrameBus<T> {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1).next_power_of_two();
    let (tx, _) = broadcast::channel(capacity);
    let (closed, _) = watch::channel(false);
    Self {
      tx,
      closed: Arc::new(closed),
      published: Arc::new(AtomicU64::new(0)),
      capacity,
    }
  }

  /// 发布一帧，返回是否挤掉了某个订阅者还没读的最旧帧
  ///
  /// 没有订阅者时帧直接丢弃。
  pub fn publish(&self, frame: T) -> bool {
    let evicted = self.tx.len() >= self.capacity;
    self.published.fetch_add(1, Ordering::Relaxed);
    match self.tx.send(Arc::new(frame)) {
      Ok(_) => {
        if evicted {
          trace!("帧总线已满，丢弃最旧的帧");
        }
        evicted
      }
      Err(_) => false,
    }
  }

  /// 新订阅者从下一帧开始读取
  pub fn subscribe(&self) -> Subscriber<T> {
    let subscriber = Subscriber {
      rx: self.tx.subscribe(),
      closed: self.closed.subscribe(),
    };
    debug!("新的订阅者，当前 {} 个", self.subscriber_count());
    subscriber
  }

  /// 关闭总线，订阅者读完剩余帧后结束
  pub fn close(&self) {
    self.closed.send_replace(true);
  }

  pub fn is_closed(&self) -> bool {
    *self.closed.borrow()
  }

  /// 还有订阅者未读的帧数
  pub fn len(&self) -> usize {
    self.tx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tx.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn subscriber_count(&self) -> usize {
    self.tx.receiver_count()
  }

  /// 已发布的帧总数
  pub fn published(&self) -> u64 {
    self.published.load(Ordering::Relaxed)
  }
}

pub struct Subscriber<T> {
  rx: broadcast::Receiver<Arc<T>>,
  closed: watch::Receiver<bool>,
}

impl<T> Subscriber<T> {
  /// 不等待，取下一帧
  pub fn try_consume(&mut self) -> Option<Arc<T>> {
    loop {
      match self.rx.try_recv() {
        Ok(frame) => return Some(frame),
        Err(TryRecvError::Lagged(skipped)) => trace!("订阅者落后，跳过 {} 帧", skipped),
        Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
      }
    }
  }

  /// 等待下一帧；总线关闭且没有剩余帧时返回 `None`
  ///
  /// 可以随时取消（丢弃返回的 future），不会影响其他订阅者。
  pub async fn consume(&mut self) -> Option<Arc<T>> {
    loop {
      if let Some(frame) = self.try_consume() {
        return Some(frame);
      }
      if *self.closed.borrow_and_update() {
        return None;
      }
      tokio::select! {
        biased;
        received = self.rx.recv() => match received {
          Ok(frame) => return Some(frame),
          Err(RecvError::Lagged(skipped)) => trace!("订阅者落后，跳过 {} 帧", skipped),
          Err(RecvError::Closed) => return None,
        },
        changed = self.closed.changed() => {
          if changed.is_err() {
            return None;
          }
        }
      }
    }
  }
}
