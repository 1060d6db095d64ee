//! GS-USB 设备侧协议引擎
//!
//! 把主机 PC 桥接到 1-256 个 CAN 控制器的 Geschwister Schneider
//! USB/CAN（gs_usb）设备类实现：控制请求分发、bulk 端点帧管线、
//! 通道状态机与 LED 指示。
//!
//! # 架构层次
//!
//! - **协议层** (`protocol`, `frame`): gs_usb 线格式编解码
//! - **引擎层** (`device`, `dispatch`, `pipeline`): 控制请求分发与帧管线
//! - **环境接口** (`controller`, `usb`, `ops`, `led`): USB 栈、CAN 驱动、
//!   LED/终端电阻等外部协作者的窄契约

pub mod channel;
pub mod controller;
pub mod device;
pub mod error;
pub mod frame;
pub mod led;
pub mod ops;
pub mod protocol;
pub mod timing;
pub mod usb;

mod dispatch;
mod pipeline;
mod pool;

// Re-export 核心类型（简化用户导入）
pub use controller::{CanBusErrCnt, CanController, CanFrame, CanState, CanTiming, ControllerError};
pub use device::{Config, GsUsbDevice, InterfaceRegistry};
pub use error::GsUsbError;
pub use led::{Led, LedDriver, LedIndicator};
pub use ops::{GsUsbEvent, GsUsbOps};
pub use usb::{SetupPacket, UsbBus, UsbSpeed, UsbTransferError};
