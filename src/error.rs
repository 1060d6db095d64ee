//! GS-USB 协议引擎错误类型
//!
//! 错误分类对应协议的数字错误码：控制请求处理失败时通过 `errno()` 转换为
//! USB 栈可见的负数错误码（主机观察到控制传输 STALL）。

use thiserror::Error;

/// GS-USB 协议引擎错误类型
#[derive(Error, Debug)]
pub enum GsUsbError {
    /// 无效参数（通道号越界、载荷长度不符、未知枚举值）
    #[error("invalid {what}: {detail}")]
    Invalid { what: &'static str, detail: String },

    /// 通道已启动时请求修改配置
    #[error("channel {0} busy")]
    Busy(u16),

    /// 通道已处于启动状态
    #[error("channel {0} already started")]
    AlreadyStarted(u16),

    /// 特性缺失或回调未注册
    #[error("not supported")]
    NotSupported,

    /// 通道未配置或控制器未就绪
    #[error("no device")]
    NoDevice,

    /// 缓冲池耗尽（不上报主机，转为 OVERFLOW 标志）
    #[error("no memory")]
    NoMemory,

    /// CAN 控制器或环境回调返回的原始错误码
    #[error("controller error (err {0})")]
    Controller(i32),
}

impl GsUsbError {
    /// 无效载荷长度
    pub fn invalid_length(request: &'static str, actual: usize, expected: usize) -> Self {
        GsUsbError::Invalid {
            what: "length",
            detail: format!("{} request ({} != {})", request, actual, expected),
        }
    }

    /// 无效通道号
    pub fn invalid_channel(ch: u16) -> Self {
        GsUsbError::Invalid {
            what: "channel",
            detail: format!("{}", ch),
        }
    }

    /// 无效枚举值
    pub fn invalid_value(what: &'static str, value: u32) -> Self {
        GsUsbError::Invalid {
            what,
            detail: format!("{}", value),
        }
    }

    /// 转换为 USB 栈可见的负数错误码
    ///
    /// 控制器错误按其原始值透传。
    pub fn errno(&self) -> i32 {
        match self {
            GsUsbError::Invalid { .. } => -22,     // EINVAL
            GsUsbError::Busy(_) => -16,            // EBUSY
            GsUsbError::AlreadyStarted(_) => -114, // EALREADY
            GsUsbError::NotSupported => -95,       // ENOTSUP
            GsUsbError::NoDevice => -19,           // ENODEV
            GsUsbError::NoMemory => -12,           // ENOMEM
            GsUsbError::Controller(code) => *code,
        }
    }
}
