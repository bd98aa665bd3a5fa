// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/detector/nms.rs - 非极大值抑制
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

use crate::detector::{BBox, Detection};

/// 重叠框的抑制范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum NmsPolicy {
  /// 不区分类别，任意两个重叠框都会互相抑制
  #[default]
  ClassAgnostic,
  /// 只在同一类别内抑制
  PerClass,
}

impl NmsPolicy {
  fn competes(&self, a: &Detection, b: &Detection) -> bool {
    match self {
      NmsPolicy::ClassAgnostic => true,
      NmsPolicy::PerClass => a.class_id == b.class_id,
    }
  }
}

/// 交并比
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = a.right().min(b.right());
  let y2 = a.bottom().min(b.bottom());

  if x2 <= x1 || y2 <= y1 {
    return 0.0;
  }

  let intersection =
    (i64::from(x2) - i64::from(x1)) as f32 * (i64::from(y2) - i64::from(y1)) as f32;
  let union = a.area() + b.area() - intersection;
  if union <= 0.0 {
    return 0.0;
  }
  intersection / union
}

/// 按置信度从高到低贪心保留，IoU 大于阈值的竞争框被丢弃
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32, policy: NmsPolicy) {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept = 0;
  for index in 0..detections.len() {
    let drop = (0..kept).any(|prev| {
      policy.competes(&detections[prev], &detections[index])
        && iou(&detections[prev].bbox, &detections[index].bbox) > iou_threshold
    });
    if !drop {
      detections.swap(kept, index);
      kept += 1;
    }
  }
  detections.truncate(kept);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(class_id: usize, confidence: f32, x: i32, y: i32, w: i32, h: i32) -> Detection {
    Detection {
      class_id,
      label: format!("c{}", class_id),
      confidence,
      bbox: BBox::new(x, y, w, h),
    }
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BBox::new(0, 0, 10, 10);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &BBox::new(20, 20, 5, 5)), 0.0);
    // 边相接不算重叠
    assert_eq!(iou(&a, &BBox::new(10, 0, 10, 10)), 0.0);
    // 一半重叠: 50 / 150
    assert!((iou(&a, &BBox::new(5, 0, 10, 10)) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn extreme_boxes_do_not_overflow() {
    let a = BBox::new(-1_000_000_000, 0, i32::MAX, 10);
    assert_eq!(a.right(), i32::MAX);
    assert!(iou(&a, &a).is_finite());
  }

  #[test]
  fn keeps_highest_confidence_of_overlapping_pair() {
    let mut dets = vec![det(0, 0.6, 0, 0, 100, 100), det(0, 0.9, 5, 5, 100, 100)];
    non_max_suppression(&mut dets, 0.4, NmsPolicy::ClassAgnostic);
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].confidence, 0.9);
  }

  #[test]
  fn overlap_at_threshold_is_kept() {
    // IoU 恰好等于 1/3，小于 0.4，不抑制
    let mut dets = vec![det(0, 0.9, 0, 0, 10, 10), det(0, 0.8, 5, 0, 10, 10)];
    non_max_suppression(&mut dets, 0.4, NmsPolicy::ClassAgnostic);
    assert_eq!(dets.len(), 2);
  }

  #[test]
  fn per_class_policy_keeps_other_classes() {
    let mut agnostic = vec![det(0, 0.9, 0, 0, 50, 50), det(1, 0.8, 0, 0, 50, 50)];
    let mut per_class = agnostic.clone();
    non_max_suppression(&mut agnostic, 0.4, NmsPolicy::ClassAgnostic);
    non_max_suppression(&mut per_class, 0.4, NmsPolicy::PerClass);
    assert_eq!(agnostic.len(), 1);
    assert_eq!(per_class.len(), 2);
  }

  #[test]
  fn kept_pairs_never_exceed_threshold() {
    // 一组伪随机的框，检查保留下来的任意两框 IoU 不超过阈值
    let mut seed = 7u32;
    let mut next = || {
      seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
      (seed >> 16) % 200
    };
    let dets = (0..60)
      .map(|i| {
        let (x, y) = (next() as i32, next() as i32);
        let (w, h) = (next() as i32 % 80 + 10, next() as i32 % 80 + 10);
        det(i % 3, 0.5 + (next() as f32) / 400.0, x, y, w, h)
      })
      .collect::<Vec<_>>();

    for policy in [NmsPolicy::ClassAgnostic, NmsPolicy::PerClass] {
      let mut kept = dets.clone();
      non_max_suppression(&mut kept, 0.4, policy);
      for (i, a) in kept.iter().enumerate() {
        for b in kept.iter().skip(i + 1) {
          let exempt = policy == NmsPolicy::PerClass && a.class_id != b.class_id;
          assert!(exempt || iou(&a.bbox, &b.bbox) <= 0.4);
        }
      }
      assert!(kept.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }
  }
}
