//! 位时序映射
//!
//! 将主机下发的位时序换算为控制器可接受的时序：prop_seg 与 phase_seg1
//! 之间按时间量子（TQ）守恒互相搬移，使两段都落入控制器的上下限。
//! 映射不增减 TQ 总数、不改变波特率；phase_seg2、sjw、prescaler 原样透传。

use tracing::debug;

use crate::controller::CanTiming;
use crate::protocol::DeviceBittiming;

/// 主机位时序 → 控制器位时序（标称相位与数据相位共用）
pub fn map_bittiming(dbt: &DeviceBittiming, min: &CanTiming, max: &CanTiming) -> CanTiming {
    let mut result = CanTiming {
        prop_seg: dbt.prop_seg,
        phase_seg1: dbt.phase_seg1,
        phase_seg2: dbt.phase_seg2,
        sjw: dbt.sjw,
        prescaler: dbt.brp,
    };

    // 模 2^32 搬移：总量不可满足的请求保持守恒地越界，由控制器拒绝
    if result.prop_seg < min.prop_seg {
        // 从 phase segment 1 向 propagation segment 搬移 TQ
        result.phase_seg1 = result.phase_seg1.wrapping_sub(min.prop_seg - result.prop_seg);
        result.prop_seg = min.prop_seg;
    } else if result.prop_seg > max.prop_seg {
        // 从 propagation segment 向 phase segment 1 搬移 TQ
        result.phase_seg1 = result.phase_seg1.wrapping_add(result.prop_seg - max.prop_seg);
        result.prop_seg = max.prop_seg;
    }

    if result.phase_seg1 < min.phase_seg1 {
        result.prop_seg = result.prop_seg.wrapping_sub(min.phase_seg1 - result.phase_seg1);
        result.phase_seg1 = min.phase_seg1;
    } else if result.phase_seg1 > max.phase_seg1 {
        result.prop_seg = result.prop_seg.wrapping_add(result.phase_seg1 - max.phase_seg1);
        result.phase_seg1 = max.phase_seg1;
    }

    debug!(
        "request: prop_seg {}, phase_seg1 {}, phase_seg2 {}, sjw {}, brp {}",
        dbt.prop_seg, dbt.phase_seg1, dbt.phase_seg2, dbt.sjw, dbt.brp
    );
    debug!(
        "result: prop_seg {}, phase_seg1 {}, phase_seg2 {}, sjw {}, brp {}",
        result.prop_seg, result.phase_seg1, result.phase_seg2, result.sjw, result.prescaler
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> (CanTiming, CanTiming) {
        let min = CanTiming {
            prop_seg: 1,
            phase_seg1: 1,
            phase_seg2: 1,
            sjw: 1,
            prescaler: 1,
        };
        let max = CanTiming {
            prop_seg: 8,
            phase_seg1: 16,
            phase_seg2: 8,
            sjw: 4,
            prescaler: 1024,
        };
        (min, max)
    }

    #[test]
    fn test_in_range_passthrough() {
        let (min, max) = limits();
        let dbt = DeviceBittiming {
            prop_seg: 4,
            phase_seg1: 8,
            phase_seg2: 2,
            sjw: 1,
            brp: 6,
        };

        let result = map_bittiming(&dbt, &min, &max);
        assert_eq!(result.prop_seg, 4);
        assert_eq!(result.phase_seg1, 8);
        assert_eq!(result.phase_seg2, 2);
        assert_eq!(result.sjw, 1);
        assert_eq!(result.prescaler, 6);
    }

    #[test]
    fn test_prop_seg_excess_moves_to_phase_seg1() {
        let (min, max) = limits();
        // prop_seg 超上限 8，多出的 4 个 TQ 搬进 phase_seg1
        let dbt = DeviceBittiming {
            prop_seg: 12,
            phase_seg1: 4,
            phase_seg2: 2,
            sjw: 1,
            brp: 3,
        };

        let result = map_bittiming(&dbt, &min, &max);
        assert_eq!(result.prop_seg, 8);
        assert_eq!(result.phase_seg1, 8);
        // TQ 总数守恒
        assert_eq!(
            result.prop_seg + result.phase_seg1,
            dbt.prop_seg + dbt.phase_seg1
        );
    }

    #[test]
    fn test_phase_seg1_excess_moves_to_prop_seg() {
        let (min, max) = limits();
        let dbt = DeviceBittiming {
            prop_seg: 2,
            phase_seg1: 20,
            phase_seg2: 2,
            sjw: 1,
            brp: 3,
        };

        let result = map_bittiming(&dbt, &min, &max);
        assert_eq!(result.phase_seg1, 16);
        assert_eq!(result.prop_seg, 6);
        assert_eq!(
            result.prop_seg + result.phase_seg1,
            dbt.prop_seg + dbt.phase_seg1
        );
    }

    #[test]
    fn test_prop_seg_below_min_takes_from_phase_seg1() {
        let (max, _) = (limits().1, ());
        let min = CanTiming {
            prop_seg: 2,
            phase_seg1: 1,
            phase_seg2: 1,
            sjw: 1,
            prescaler: 1,
        };
        // 主机常发 prop_seg=0 / tseg1 全在 phase_seg1 的布局
        let dbt = DeviceBittiming {
            prop_seg: 0,
            phase_seg1: 13,
            phase_seg2: 2,
            sjw: 1,
            brp: 6,
        };

        let result = map_bittiming(&dbt, &min, &max);
        assert_eq!(result.prop_seg, 2);
        assert_eq!(result.phase_seg1, 11);
        assert_eq!(
            result.prop_seg + result.phase_seg1,
            dbt.prop_seg + dbt.phase_seg1
        );
    }

    #[test]
    fn test_passthrough_fields_untouched() {
        let (min, max) = limits();
        let dbt = DeviceBittiming {
            prop_seg: 16,
            phase_seg1: 2,
            phase_seg2: 7,
            sjw: 3,
            brp: 500,
        };

        let result = map_bittiming(&dbt, &min, &max);
        assert_eq!(result.phase_seg2, 7);
        assert_eq!(result.sjw, 3);
        assert_eq!(result.prescaler, 500);
    }

    #[test]
    fn test_result_within_limits() {
        let (min, max) = limits();
        let dbt = DeviceBittiming {
            prop_seg: 10,
            phase_seg1: 10,
            phase_seg2: 2,
            sjw: 1,
            brp: 1,
        };

        let result = map_bittiming(&dbt, &min, &max);
        assert!(result.prop_seg >= min.prop_seg && result.prop_seg <= max.prop_seg);
        assert!(result.phase_seg1 >= min.phase_seg1 && result.phase_seg1 <= max.phase_seg1);
    }
}
