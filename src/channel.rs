//! 通道模型
//!
//! 每个通道的运行时状态（特性位、模式位、启动/bus-off 标志、RX 溢出计数），
//! 以及能力位 → 特性位的纯函数映射。
//!
//! 写入约束：`mode`/`started` 只由控制请求分发器写入，`busoff` 只由状态
//! 变化回调写入，溢出计数只由 RX 路径增减；因此原子变量用宽松序即可。

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::{error, warn};

use crate::controller::{
    CanController, CAN_MODE_FD, CAN_MODE_LISTEN_ONLY, CAN_MODE_LOOPBACK, CAN_MODE_ONE_SHOT,
    CAN_MODE_TRIPLE_SAMPLE,
};
use crate::error::GsUsbError;
use crate::ops::GsUsbOps;
use crate::protocol::*;

/// 通道运行时状态
#[derive(Debug, Default)]
pub struct ChannelState {
    /// 注册时计算的特性位集合
    features: AtomicU32,
    /// 启动时记住的模式位（停止时为 0，恒为 features 的子集）
    mode: AtomicU32,
    started: AtomicBool,
    busoff: AtomicBool,
    /// RX 溢出计数（计数信号量语义：分配失败 +1，下一帧携带 OVERFLOW -1）
    rx_overflows: AtomicU32,
}

impl ChannelState {
    pub fn features(&self) -> u32 {
        self.features.load(Ordering::Relaxed)
    }

    pub(crate) fn set_features(&self, features: u32) {
        self.features.store(features, Ordering::Relaxed);
    }

    pub fn mode(&self) -> u32 {
        self.mode.load(Ordering::Relaxed)
    }

    pub(crate) fn set_mode(&self, mode: u32) {
        self.mode.store(mode, Ordering::Relaxed);
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    pub(crate) fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Relaxed);
    }

    pub fn busoff(&self) -> bool {
        self.busoff.load(Ordering::Relaxed)
    }

    pub(crate) fn set_busoff(&self, busoff: bool) {
        self.busoff.store(busoff, Ordering::Relaxed);
    }

    /// 硬件时间戳模式是否生效
    pub fn hw_timestamp_enabled(&self) -> bool {
        (self.mode() & GS_USB_CAN_MODE_HW_TIMESTAMP) != 0
    }

    /// 记录一次 RX 溢出
    pub(crate) fn give_overflow(&self) {
        self.rx_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// 非阻塞取走一次溢出记录；有则返回 true
    pub(crate) fn take_overflow(&self) -> bool {
        self.rx_overflows
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .is_ok()
    }

    /// 清空溢出计数
    pub(crate) fn drain_overflows(&self) {
        self.rx_overflows.store(0, Ordering::Relaxed);
    }
}

/// 控制器能力位 → gs_usb 特性位
pub fn features_from_capabilities(caps: u32) -> u32 {
    let mut features = 0;

    if (caps & CAN_MODE_LOOPBACK) != 0 {
        features |= GS_USB_CAN_FEATURE_LOOP_BACK;
    }

    if (caps & CAN_MODE_LISTEN_ONLY) != 0 {
        features |= GS_USB_CAN_FEATURE_LISTEN_ONLY;
    }

    if (caps & CAN_MODE_FD) != 0 {
        features |= GS_USB_CAN_FEATURE_FD;
        features |= GS_USB_CAN_FEATURE_BT_CONST_EXT;
    }

    if (caps & CAN_MODE_ONE_SHOT) != 0 {
        features |= GS_USB_CAN_FEATURE_ONE_SHOT;
    }

    if (caps & CAN_MODE_TRIPLE_SAMPLE) != 0 {
        features |= GS_USB_CAN_FEATURE_TRIPLE_SAMPLE;
    }

    features
}

/// 操作回调 → gs_usb 特性位（运行时能力探测）
pub fn features_from_ops(ops: &GsUsbOps) -> u32 {
    let mut features = 0;

    if ops.timestamp.is_some() {
        features |= GS_USB_CAN_FEATURE_HW_TIMESTAMP;
    }

    if ops.identify.is_some() {
        features |= GS_USB_CAN_FEATURE_IDENTIFY;
    }

    if ops.set_termination.is_some() && ops.get_termination.is_some() {
        features |= GS_USB_CAN_FEATURE_TERMINATION;
    }

    features
}

/// 复位通道：清除模式与标志、清空溢出计数、停止控制器
///
/// 控制器已处于停止状态视为成功（USB 断开与重复 RESET 都会走到这里）。
pub(crate) fn reset_channel(
    ch: u16,
    state: &ChannelState,
    controller: &dyn CanController,
) -> Result<(), GsUsbError> {
    state.set_mode(GS_USB_CAN_MODE_NORMAL);
    state.set_started(false);
    state.set_busoff(false);
    state.drain_overflows();

    match controller.stop() {
        Ok(()) => Ok(()),
        Err(err) if err.is_already() => {
            warn!("channel {} already stopped", ch);
            Ok(())
        }
        Err(err) => {
            error!("failed to stop channel {} (err {})", ch, err.code);
            Err(GsUsbError::Controller(err.code))
        }
    }
}
