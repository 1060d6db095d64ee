//! 嵌入方操作回调
//!
//! 设备通过 `GsUsbOps` 回调进入环境：时间戳源、LED 事件、识别、
//! 终端电阻。特性位按回调是否注册在运行时推导，不使用编译期开关。

use crate::controller::ControllerError;

/// 通道事件（由上层翻译为 LED 指示）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GsUsbEvent {
    ChannelStarted,
    ChannelStopped,
    ChannelActivityRx,
    ChannelActivityTx,
    ChannelIdentifyOn,
    ChannelIdentifyOff,
}

/// 32 位微秒时间戳源
pub type TimestampCallback = Box<dyn Fn() -> Result<u32, ControllerError> + Send + Sync>;

/// 通道事件回调 `(通道号, 事件)`
pub type EventCallback = Box<dyn Fn(u16, GsUsbEvent) + Send + Sync>;

/// 识别回调 `(通道号, 开/关)`
pub type IdentifyCallback = Box<dyn Fn(u16, bool) -> Result<(), ControllerError> + Send + Sync>;

/// 设置终端电阻回调 `(通道号, 接入/断开)`
pub type SetTerminationCallback =
    Box<dyn Fn(u16, bool) -> Result<(), ControllerError> + Send + Sync>;

/// 查询终端电阻回调 `(通道号) -> 是否接入`
pub type GetTerminationCallback =
    Box<dyn Fn(u16) -> Result<bool, ControllerError> + Send + Sync>;

/// 嵌入方操作回调集合
///
/// 所有字段均可缺省；缺省回调对应的控制请求返回 "not supported"。
#[derive(Default)]
pub struct GsUsbOps {
    pub timestamp: Option<TimestampCallback>,
    pub event: Option<EventCallback>,
    pub identify: Option<IdentifyCallback>,
    pub set_termination: Option<SetTerminationCallback>,
    pub get_termination: Option<GetTerminationCallback>,
}

impl GsUsbOps {
    pub(crate) fn raise_event(&self, ch: u16, event: GsUsbEvent) {
        if let Some(ref cb) = self.event {
            cb(ch, event);
        }
    }
}
