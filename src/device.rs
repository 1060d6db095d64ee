//! 设备上下文与注册 API
//!
//! `GsUsbDevice` 是协议引擎的进程内句柄（`Arc` 浅拷贝）：持有通道数组、
//! 操作回调、缓冲池、FIFO 与工作线程。注册时绑定 CAN 控制器并安装
//! RX / 状态变化回调，回调通过 `(通道号, Weak 句柄)` 显式回到设备，
//! 不做任何指针运算。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::channel::{self, features_from_capabilities, features_from_ops, ChannelState};
use crate::controller::{CanController, CanFilter, CAN_FILTER_IDE};
use crate::error::GsUsbError;
use crate::frame::HOST_FRAME_MAX_SIZE;
use crate::ops::GsUsbOps;
use crate::pipeline;
use crate::pool::{BufferPool, PooledBuf};
use crate::protocol::GS_USB_CAN_FEATURE_GET_STATE;
use crate::usb::UsbBus;

/// USB 类实例状态位
const GS_USB_STATE_CLASS_ENABLED: u32 = 1 << 0;

/// 设备配置
#[derive(Debug, Clone)]
pub struct Config {
    /// 主机帧缓冲池大小（所有通道与两个方向共享）
    pub pool_size: usize,
    /// 启用 USB SoF 时间戳捕获：TIMESTAMP 请求优先返回最近一次
    /// SoF 时刻采样的时间戳
    pub sof_timestamp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 16,
            sof_timestamp: false,
        }
    }
}

/// SoF 时间戳捕获槽
#[derive(Debug, Default)]
pub(crate) struct SofCapture {
    pub timestamp: u32,
    pub seen: bool,
}

/// 通道条目：控制器引用 + 运行时状态
pub(crate) struct ChannelEntry {
    pub controller: Arc<dyn CanController>,
    pub state: ChannelState,
}

pub(crate) struct DeviceInner {
    pub channels: Vec<ChannelEntry>,
    pub ops: GsUsbOps,
    pub config: Config,
    pub pool: BufferPool,
    state: AtomicU32,
    pub sof: Mutex<SofCapture>,
    pub tx_fifo: Sender<PooledBuf>,
    rx_fifo: Sender<PooledBuf>,
    pub bus: RwLock<Option<Arc<dyn UsbBus>>>,
}

impl DeviceInner {
    pub fn is_enabled(&self) -> bool {
        (self.state.load(Ordering::Relaxed) & GS_USB_STATE_CLASS_ENABLED) != 0
    }

    fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.state
                .fetch_or(GS_USB_STATE_CLASS_ENABLED, Ordering::Relaxed);
        } else {
            self.state
                .fetch_and(!GS_USB_STATE_CLASS_ENABLED, Ordering::Relaxed);
        }
    }

    /// 把主机帧放入 RX FIFO（IN worker 消费）
    pub fn push_rx(&self, buf: PooledBuf) {
        let _ = self.rx_fifo.send(buf);
    }
}

/// gs_usb 设备句柄
#[derive(Clone)]
pub struct GsUsbDevice {
    inner: Arc<DeviceInner>,
}

impl GsUsbDevice {
    /// 注册设备：绑定 CAN 通道与操作回调，计算特性位，安装控制器回调，
    /// 启动 TX / IN 工作线程
    ///
    /// 通道数限制 1 到 256（DEVICE_CONFIG 用 u8 表示 nchannels-1）。
    pub fn register(
        controllers: Vec<Arc<dyn CanController>>,
        ops: GsUsbOps,
        config: Config,
    ) -> Result<Self, GsUsbError> {
        if controllers.is_empty() || controllers.len() > 256 {
            error!(
                "unsupported number of CAN channels {}",
                controllers.len()
            );
            return Err(GsUsbError::NotSupported);
        }

        let common_features = GS_USB_CAN_FEATURE_GET_STATE | features_from_ops(&ops);

        let (tx_fifo, tx_fifo_rx) = unbounded();
        let (rx_fifo, rx_fifo_rx) = unbounded();

        let pool = BufferPool::new(config.pool_size, HOST_FRAME_MAX_SIZE);

        let channels = controllers
            .into_iter()
            .map(|controller| ChannelEntry {
                controller,
                state: ChannelState::default(),
            })
            .collect();

        let inner = Arc::new(DeviceInner {
            channels,
            ops,
            config,
            pool,
            state: AtomicU32::new(0),
            sof: Mutex::new(SofCapture::default()),
            tx_fifo,
            rx_fifo,
            bus: RwLock::new(None),
        });

        for ch in 0..inner.channels.len() as u16 {
            register_channel(&inner, ch, common_features)?;
        }

        pipeline::spawn_tx_worker(Arc::downgrade(&inner), tx_fifo_rx);
        pipeline::spawn_in_worker(Arc::downgrade(&inner), rx_fifo_rx);

        Ok(Self { inner })
    }

    /// 通道数
    pub fn nchannels(&self) -> usize {
        self.inner.channels.len()
    }

    /// USB 类实例是否已启用
    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// 类实例启用（USB 配置完成）：记录总线句柄并启动 OUT 工作线程
    pub fn enable(&self, bus: Arc<dyn UsbBus>) {
        *self.inner.bus.write() = Some(bus.clone());
        self.inner.set_enabled(true);
        debug!("enabled");

        pipeline::spawn_out_worker(Arc::downgrade(&self.inner), bus);
    }

    /// 类实例停用（USB 断开）：复位所有通道并丢弃总线句柄
    ///
    /// 工作线程随后观察到的传输取消按警告处理；在途缓冲在下一次循环
    /// 迭代中经由 Drop 归还缓冲池。
    pub fn disable(&self) {
        self.inner.set_enabled(false);

        for (ch, entry) in self.inner.channels.iter().enumerate() {
            if let Err(err) =
                channel::reset_channel(ch as u16, &entry.state, entry.controller.as_ref())
            {
                warn!("failed to reset channel {} on disable ({})", ch, err);
            }
        }

        *self.inner.bus.write() = None;
        self.inner.sof.lock().seen = false;

        debug!("disabled");
    }

    /// USB SoF 事件：采样当前时间戳供 TIMESTAMP 请求消费
    ///
    /// 并非所有 USB 控制器都支持 SoF 事件；未启用捕获选项时为空操作。
    pub fn on_sof(&self) {
        if !self.inner.config.sof_timestamp {
            return;
        }

        let Some(ref timestamp) = self.inner.ops.timestamp else {
            return;
        };

        match timestamp() {
            Ok(value) => {
                let mut sof = self.inner.sof.lock();
                sof.timestamp = value;
                sof.seen = true;
            }
            Err(err) => {
                error!("failed to get current timestamp (err {})", err.code);
            }
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DeviceInner> {
        &self.inner
    }
}

/// 单个通道的注册：查询能力、计算特性位、安装 RX 过滤与状态回调
fn register_channel(
    inner: &Arc<DeviceInner>,
    ch: u16,
    common_features: u32,
) -> Result<(), GsUsbError> {
    let entry = &inner.channels[ch as usize];

    let caps = entry.controller.capabilities().map_err(|err| {
        error!(
            "failed to get capabilities for channel {} (err {})",
            ch, err.code
        );
        GsUsbError::Controller(err.code)
    })?;

    // 标准帧 + 扩展帧各一条全通过滤
    let filters = [
        CanFilter::default(),
        CanFilter {
            flags: CAN_FILTER_IDE,
            ..Default::default()
        },
    ];

    for (i, filter) in filters.iter().enumerate() {
        let weak: Weak<DeviceInner> = Arc::downgrade(inner);
        let result = entry.controller.add_rx_filter(
            filter,
            Box::new(move |frame| {
                if let Some(inner) = weak.upgrade() {
                    pipeline::handle_can_rx(&inner, ch, frame);
                }
            }),
        );

        if let Err(err) = result {
            error!(
                "failed to add filter {} to channel {} (err {})",
                i, ch, err.code
            );
            return Err(GsUsbError::Controller(err.code));
        }
    }

    let weak: Weak<DeviceInner> = Arc::downgrade(inner);
    entry
        .controller
        .set_state_change_callback(Box::new(move |state, err_cnt| {
            if let Some(inner) = weak.upgrade() {
                pipeline::handle_state_change(&inner, ch, state, err_cnt);
            }
        }));

    entry
        .state
        .set_features(common_features | features_from_capabilities(caps));

    debug!(
        "channel {} features = 0x{:08x}",
        ch,
        entry.state.features()
    );

    Ok(())
}

/// USB 接口号 → 设备句柄注册表
///
/// 注册时写入一次，之后只做索引读取；多设备嵌入方用它把 SETUP 包
/// 路由到对应的类实例。
#[derive(Default)]
pub struct InterfaceRegistry {
    map: RwLock<HashMap<u8, GsUsbDevice>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, interface: u8, device: GsUsbDevice) {
        self.map.write().insert(interface, device);
    }

    pub fn lookup(&self, interface: u8) -> Option<GsUsbDevice> {
        self.map.read().get(&interface).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{
        CanBusErrCnt, CanFrame, CanState, CanTiming, ControllerError, RxCallback,
        StateChangeCallback, TxCompletion,
    };

    /// 最小控制器桩：注册路径需要的查询全部成功，其余操作为空
    struct StubController;

    impl CanController for StubController {
        fn capabilities(&self) -> Result<u32, ControllerError> {
            Ok(0)
        }

        fn core_clock(&self) -> Result<u32, ControllerError> {
            Ok(80_000_000)
        }

        fn timing_min(&self) -> CanTiming {
            CanTiming::default()
        }

        fn timing_max(&self) -> CanTiming {
            CanTiming::default()
        }

        fn timing_data_min(&self) -> Option<CanTiming> {
            None
        }

        fn timing_data_max(&self) -> Option<CanTiming> {
            None
        }

        fn set_timing(&self, _timing: &CanTiming) -> Result<(), ControllerError> {
            Ok(())
        }

        fn set_timing_data(&self, _timing: &CanTiming) -> Result<(), ControllerError> {
            Ok(())
        }

        fn set_mode(&self, _mode: u32) -> Result<(), ControllerError> {
            Ok(())
        }

        fn start(&self) -> Result<(), ControllerError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), ControllerError> {
            Ok(())
        }

        fn state(&self) -> Result<(CanState, CanBusErrCnt), ControllerError> {
            Ok((CanState::Stopped, CanBusErrCnt::default()))
        }

        fn send(
            &self,
            _frame: &CanFrame,
            _completion: TxCompletion,
        ) -> Result<(), ControllerError> {
            Err(ControllerError::new(-19))
        }

        fn add_rx_filter(
            &self,
            _filter: &CanFilter,
            _callback: RxCallback,
        ) -> Result<(), ControllerError> {
            Ok(())
        }

        fn set_state_change_callback(&self, _callback: StateChangeCallback) {}
    }

    fn stub_device(nchannels: usize) -> GsUsbDevice {
        let controllers: Vec<Arc<dyn CanController>> = (0..nchannels)
            .map(|_| Arc::new(StubController) as Arc<dyn CanController>)
            .collect();
        GsUsbDevice::register(controllers, GsUsbOps::default(), Config::default())
            .expect("register failed")
    }

    #[test]
    fn test_register_rejects_zero_channels() {
        let result = GsUsbDevice::register(Vec::new(), GsUsbOps::default(), Config::default());
        assert!(matches!(result, Err(GsUsbError::NotSupported)));
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.pool_size, 16);
        assert!(!config.sof_timestamp);
    }

    #[test]
    fn test_interface_registry_lookup() {
        let registry = InterfaceRegistry::new();

        // 两个设备挂到不同的接口号上
        registry.insert(0, stub_device(1));
        registry.insert(3, stub_device(2));

        let dev = registry.lookup(0).expect("interface 0 not found");
        assert_eq!(dev.nchannels(), 1);

        let dev = registry.lookup(3).expect("interface 3 not found");
        assert_eq!(dev.nchannels(), 2);

        // 未注册的接口号
        assert!(registry.lookup(1).is_none());
        assert!(registry.lookup(255).is_none());
    }

    #[test]
    fn test_interface_registry_insert_overwrites() {
        let registry = InterfaceRegistry::new();

        registry.insert(0, stub_device(1));
        registry.insert(0, stub_device(2));

        let dev = registry.lookup(0).expect("interface 0 not found");
        assert_eq!(dev.nchannels(), 2);
    }
}
