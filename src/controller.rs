//! CAN 控制器抽象层
//!
//! 定义协议引擎消费的 CAN 控制器窄接口。驱动侧实现 `CanController`，
//! 协议引擎通过 `(通道号, 设备句柄)` 显式传递上下文，不做任何指针运算。

use thiserror::Error;

/// 控制器能力位 / 模式位（`capabilities()` 与 `set_mode()` 共用同一组位）
pub const CAN_MODE_NORMAL: u32 = 0;
pub const CAN_MODE_LOOPBACK: u32 = 1 << 0;
pub const CAN_MODE_LISTEN_ONLY: u32 = 1 << 1;
pub const CAN_MODE_FD: u32 = 1 << 2;
pub const CAN_MODE_ONE_SHOT: u32 = 1 << 3;
pub const CAN_MODE_TRIPLE_SAMPLE: u32 = 1 << 4;

/// 原生 CAN 帧标志位
pub const CAN_FRAME_IDE: u8 = 1 << 0;
pub const CAN_FRAME_RTR: u8 = 1 << 1;
pub const CAN_FRAME_FDF: u8 = 1 << 2;
pub const CAN_FRAME_BRS: u8 = 1 << 3;
pub const CAN_FRAME_ESI: u8 = 1 << 4;

/// RX 过滤器标志位
pub const CAN_FILTER_IDE: u8 = 1 << 0;

/// 控制器（或环境回调）返回的数字错误
///
/// 数值按原样回传给主机侧的控制请求；`-EALREADY` 用于区分
/// "已处于目标状态" 的停止/启动请求。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("controller error (err {code})")]
pub struct ControllerError {
    pub code: i32,
}

impl ControllerError {
    pub const ALREADY: i32 = -114;

    pub fn new(code: i32) -> Self {
        Self { code }
    }

    /// 已处于目标状态（如对已停止的控制器调用 stop）
    pub fn is_already(&self) -> bool {
        self.code == Self::ALREADY
    }
}

/// 控制器错误状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanState {
    ErrorActive,
    ErrorWarning,
    ErrorPassive,
    BusOff,
    Stopped,
}

/// 收发错误计数器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanBusErrCnt {
    pub tx_err_cnt: u8,
    pub rx_err_cnt: u8,
}

/// 位时序（以时间量子 TQ 为单位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanTiming {
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub prescaler: u32,
}

/// 原生 CAN 帧
///
/// `data` 固定 64 字节以同时容纳经典帧与 FD 帧，未使用部分为 0。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub dlc: u8,
    pub flags: u8,
    pub data: [u8; 64],
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {
            id: 0,
            dlc: 0,
            flags: 0,
            data: [0u8; 64],
        }
    }
}

impl CanFrame {
    pub fn is_extended(&self) -> bool {
        (self.flags & CAN_FRAME_IDE) != 0
    }

    pub fn is_rtr(&self) -> bool {
        (self.flags & CAN_FRAME_RTR) != 0
    }

    pub fn is_fd(&self) -> bool {
        (self.flags & CAN_FRAME_FDF) != 0
    }
}

/// RX 过滤器（注册时安装两条全通过滤：标准帧 + 扩展帧）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFilter {
    pub id: u32,
    pub mask: u32,
    pub flags: u8,
}

/// 发送完成回调：每个被接受的发送恰好回调一次
pub type TxCompletion = Box<dyn FnOnce(Result<(), ControllerError>) + Send>;

/// RX 帧回调
pub type RxCallback = Box<dyn Fn(&CanFrame) + Send + Sync>;

/// 控制器状态变化回调
pub type StateChangeCallback = Box<dyn Fn(CanState, CanBusErrCnt) + Send + Sync>;

/// CAN 控制器驱动接口
///
/// 实现方须保证：`send()` 接受的每一帧恰好触发一次完成回调；
/// 回调可以在任意线程上下文执行。
pub trait CanController: Send + Sync {
    /// 控制器支持的模式能力位
    fn capabilities(&self) -> Result<u32, ControllerError>;

    /// CAN 核心时钟（Hz）
    fn core_clock(&self) -> Result<u32, ControllerError>;

    /// 标称位时序下限/上限
    fn timing_min(&self) -> CanTiming;
    fn timing_max(&self) -> CanTiming;

    /// 数据相位时序下限/上限（不支持 FD 时返回 None）
    fn timing_data_min(&self) -> Option<CanTiming>;
    fn timing_data_max(&self) -> Option<CanTiming>;

    fn set_timing(&self, timing: &CanTiming) -> Result<(), ControllerError>;
    fn set_timing_data(&self, timing: &CanTiming) -> Result<(), ControllerError>;

    fn set_mode(&self, mode: u32) -> Result<(), ControllerError>;

    fn start(&self) -> Result<(), ControllerError>;
    fn stop(&self) -> Result<(), ControllerError>;

    fn state(&self) -> Result<(CanState, CanBusErrCnt), ControllerError>;

    /// 发送一帧；控制器确认（或失败）后调用 `completion`
    fn send(&self, frame: &CanFrame, completion: TxCompletion) -> Result<(), ControllerError>;

    fn add_rx_filter(
        &self,
        filter: &CanFilter,
        callback: RxCallback,
    ) -> Result<(), ControllerError>;

    fn set_state_change_callback(&self, callback: StateChangeCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_error_is_already() {
        assert!(ControllerError::new(ControllerError::ALREADY).is_already());
        assert!(!ControllerError::new(-22).is_already());
    }

    #[test]
    fn test_controller_error_display() {
        let err = ControllerError::new(-5);
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn test_can_frame_flags() {
        let mut frame = CanFrame::default();
        assert!(!frame.is_extended());
        assert!(!frame.is_rtr());
        assert!(!frame.is_fd());

        frame.flags = CAN_FRAME_IDE | CAN_FRAME_FDF;
        assert!(frame.is_extended());
        assert!(frame.is_fd());
        assert!(!frame.is_rtr());
    }

    #[test]
    fn test_can_frame_default_data() {
        let frame = CanFrame::default();
        assert_eq!(frame.data, [0u8; 64]);
        assert_eq!(frame.dlc, 0);
    }
}
