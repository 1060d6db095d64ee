//! 厂商控制请求分发器
//!
//! 解释并校验所有 gs_usb 控制请求：接口接收者的 `wValue` 为通道号；
//! 设备接收者只处理 Microsoft OS 2.0 描述符请求。每个请求先校验
//! 通道号与载荷长度，再操作通道状态或调用控制器。
//!
//! SETUP 回调由 USB 栈串行化；分发器从不阻塞在 FIFO 上。失败通过
//! `GsUsbError::errno()` 转换为 USB 栈可见的数字错误码。

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, warn};

use crate::channel::reset_channel;
use crate::controller::{
    CanState, CAN_MODE_FD, CAN_MODE_LISTEN_ONLY, CAN_MODE_LOOPBACK, CAN_MODE_NORMAL,
    CAN_MODE_ONE_SHOT, CAN_MODE_TRIPLE_SAMPLE,
};
use crate::device::{ChannelEntry, GsUsbDevice};
use crate::error::GsUsbError;
use crate::ops::GsUsbEvent;
use crate::protocol::*;
use crate::timing::map_bittiming;
use crate::usb::{msosv2_descriptor, SetupPacket, UsbRecipient, GS_USB_MS_VENDORCODE,
    MS_OS_20_DESCRIPTOR_INDEX};

impl GsUsbDevice {
    /// 处理主机→设备控制请求（载荷随 SETUP 到达，成功即应答）
    pub fn handle_control_out(
        &self,
        setup: &SetupPacket,
        payload: &[u8],
    ) -> Result<(), GsUsbError> {
        if setup.recipient() != UsbRecipient::Interface {
            return Err(GsUsbError::NotSupported);
        }

        let ch = setup.value;

        match GsUsbRequest::from_u8(setup.request) {
            Some(GsUsbRequest::HostFormat) => self.request_host_format(payload),
            Some(GsUsbRequest::Bittiming) => self.request_bittiming(ch, payload),
            Some(GsUsbRequest::Mode) => self.request_mode(ch, payload),
            Some(GsUsbRequest::Identify) => self.request_identify(ch, payload),
            Some(GsUsbRequest::DataBittiming) => self.request_data_bittiming(ch, payload),
            Some(GsUsbRequest::SetTermination) => self.request_set_termination(ch, payload),
            Some(GsUsbRequest::SetUserId) => Err(GsUsbError::NotSupported),
            _ => {
                error!(
                    "control_to_dev: bmRequestType 0x{:02x} bRequest 0x{:02x} not supported",
                    setup.request_type, setup.request
                );
                Err(GsUsbError::NotSupported)
            }
        }
    }

    /// 处理设备→主机控制请求，返回响应载荷
    pub fn handle_control_in(&self, setup: &SetupPacket) -> Result<Bytes, GsUsbError> {
        match setup.recipient() {
            UsbRecipient::Device => {
                if setup.is_to_host()
                    && setup.request == GS_USB_MS_VENDORCODE
                    && setup.index == MS_OS_20_DESCRIPTOR_INDEX
                {
                    return Ok(msosv2_descriptor());
                }

                Err(GsUsbError::NotSupported)
            }
            UsbRecipient::Interface => {
                let ch = setup.value;

                match GsUsbRequest::from_u8(setup.request) {
                    Some(GsUsbRequest::Berr) | Some(GsUsbRequest::GetUserId) => {
                        Err(GsUsbError::NotSupported)
                    }
                    Some(GsUsbRequest::BtConst) => self.request_bt_const(ch),
                    Some(GsUsbRequest::DeviceConfig) => self.request_device_config(),
                    Some(GsUsbRequest::Timestamp) => self.request_timestamp(),
                    Some(GsUsbRequest::BtConstExt) => self.request_bt_const_ext(ch),
                    Some(GsUsbRequest::GetTermination) => self.request_get_termination(ch),
                    Some(GsUsbRequest::GetState) => self.request_get_state(ch),
                    _ => {
                        error!(
                            "control_to_host: bmRequestType 0x{:02x} bRequest 0x{:02x} not supported",
                            setup.request_type, setup.request
                        );
                        Err(GsUsbError::NotSupported)
                    }
                }
            }
            UsbRecipient::Other(_) => Err(GsUsbError::NotSupported),
        }
    }

    /// 通道号校验
    fn channel(&self, ch: u16, request: &'static str) -> Result<&ChannelEntry, GsUsbError> {
        self.inner()
            .channels
            .get(ch as usize)
            .ok_or_else(|| {
                error!("{} request for non-existing channel {}", request, ch);
                GsUsbError::invalid_channel(ch)
            })
    }

    fn request_host_format(&self, payload: &[u8]) -> Result<(), GsUsbError> {
        let hc = HostConfig::unpack_from(payload)?;

        if hc.byte_order != GS_USB_HOST_FORMAT_LITTLE_ENDIAN {
            error!("unsupported host byte order (0x{:08x})", hc.byte_order);
            return Err(GsUsbError::NotSupported);
        }

        Ok(())
    }

    fn request_bittiming(&self, ch: u16, payload: &[u8]) -> Result<(), GsUsbError> {
        let entry = self.channel(ch, "bittiming")?;
        let dbt = DeviceBittiming::unpack_from(payload)?;

        if entry.state.started() {
            warn!("cannot change timing for already started channel {}", ch);
            return Err(GsUsbError::Busy(ch));
        }

        let min = entry.controller.timing_min();
        let max = entry.controller.timing_max();
        let timing = map_bittiming(&dbt, &min, &max);

        entry.controller.set_timing(&timing).map_err(|err| {
            error!("failed to set timing for channel {} (err {})", ch, err.code);
            GsUsbError::Controller(err.code)
        })
    }

    fn request_data_bittiming(&self, ch: u16, payload: &[u8]) -> Result<(), GsUsbError> {
        let entry = self.channel(ch, "data_bittiming")?;
        let dbt = DeviceBittiming::unpack_from(payload)?;

        if (entry.state.features() & GS_USB_CAN_FEATURE_FD) == 0 {
            return Err(GsUsbError::NotSupported);
        }

        if entry.state.started() {
            warn!(
                "cannot change data phase timing for already started channel {}",
                ch
            );
            return Err(GsUsbError::Busy(ch));
        }

        let (min, max) = match (
            entry.controller.timing_data_min(),
            entry.controller.timing_data_max(),
        ) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                error!("failed to get min/max data phase timing for channel {}", ch);
                return Err(GsUsbError::NotSupported);
            }
        };

        let timing = map_bittiming(&dbt, &min, &max);

        entry.controller.set_timing_data(&timing).map_err(|err| {
            error!(
                "failed to set data phase timing for channel {} (err {})",
                ch, err.code
            );
            GsUsbError::Controller(err.code)
        })
    }

    fn request_mode(&self, ch: u16, payload: &[u8]) -> Result<(), GsUsbError> {
        let entry = self.channel(ch, "mode")?;
        let dm = DeviceMode::unpack_from(payload)?;

        match dm.mode {
            GS_USB_CHANNEL_MODE_RESET => {
                reset_channel(ch, &entry.state, entry.controller.as_ref())?;
            }
            GS_USB_CHANNEL_MODE_START => {
                if entry.state.started() {
                    warn!("channel {} already started", ch);
                    return Err(GsUsbError::AlreadyStarted(ch));
                }

                if (dm.flags & !entry.state.features()) != 0 {
                    error!("unsupported flags 0x{:08x} for channel {}", dm.flags, ch);
                    return Err(GsUsbError::NotSupported);
                }

                let mut mode = CAN_MODE_NORMAL;

                if (dm.flags & GS_USB_CAN_MODE_LISTEN_ONLY) != 0 {
                    mode |= CAN_MODE_LISTEN_ONLY;
                }

                if (dm.flags & GS_USB_CAN_MODE_LOOP_BACK) != 0 {
                    mode |= CAN_MODE_LOOPBACK;
                }

                if (dm.flags & GS_USB_CAN_MODE_TRIPLE_SAMPLE) != 0 {
                    mode |= CAN_MODE_TRIPLE_SAMPLE;
                }

                if (dm.flags & GS_USB_CAN_MODE_ONE_SHOT) != 0 {
                    mode |= CAN_MODE_ONE_SHOT;
                }

                if (dm.flags & GS_USB_CAN_MODE_FD) != 0 {
                    mode |= CAN_MODE_FD;
                }

                entry.controller.set_mode(mode).map_err(|err| {
                    error!(
                        "failed to set channel {} mode 0x{:08x} (err {})",
                        ch, mode, err.code
                    );
                    GsUsbError::Controller(err.code)
                })?;

                // 启动失败时通道模式保持 NORMAL、started 保持 false
                entry.controller.start().map_err(|err| {
                    error!("failed to start channel {} (err {})", ch, err.code);
                    GsUsbError::Controller(err.code)
                })?;

                entry.state.set_mode(dm.flags);
                entry.state.set_started(true);
            }
            other => {
                error!("unsupported mode {} requested for channel {}", other, ch);
                return Err(GsUsbError::invalid_value("mode", other));
            }
        }

        let event = if entry.state.started() {
            GsUsbEvent::ChannelStarted
        } else {
            GsUsbEvent::ChannelStopped
        };
        self.inner().ops.raise_event(ch, event);

        Ok(())
    }

    fn request_identify(&self, ch: u16, payload: &[u8]) -> Result<(), GsUsbError> {
        let Some(ref identify) = self.inner().ops.identify else {
            error!("identify not supported");
            return Err(GsUsbError::NotSupported);
        };

        self.channel(ch, "identify")?;
        let im = IdentifyMode::unpack_from(payload)?;

        let on = match im.mode {
            GS_USB_CHANNEL_IDENTIFY_MODE_OFF => false,
            GS_USB_CHANNEL_IDENTIFY_MODE_ON => true,
            other => {
                error!("unsupported identify mode {} for channel {}", other, ch);
                return Err(GsUsbError::invalid_value("identify mode", other));
            }
        };

        identify(ch, on).map_err(|err| GsUsbError::Controller(err.code))
    }

    fn request_set_termination(&self, ch: u16, payload: &[u8]) -> Result<(), GsUsbError> {
        self.channel(ch, "set termination")?;

        let Some(ref set_termination) = self.inner().ops.set_termination else {
            error!("set termination not supported");
            return Err(GsUsbError::NotSupported);
        };

        let ts = TerminationState::unpack_from(payload)?;

        let terminate = match ts.state {
            GS_USB_CHANNEL_TERMINATION_STATE_OFF => false,
            GS_USB_CHANNEL_TERMINATION_STATE_ON => true,
            other => {
                error!(
                    "unsupported set termination state {} for channel {}",
                    other, ch
                );
                return Err(GsUsbError::invalid_value("termination state", other));
            }
        };

        set_termination(ch, terminate).map_err(|err| GsUsbError::Controller(err.code))
    }

    fn request_get_termination(&self, ch: u16) -> Result<Bytes, GsUsbError> {
        self.channel(ch, "get_termination")?;

        let Some(ref get_termination) = self.inner().ops.get_termination else {
            error!("get termination not supported");
            return Err(GsUsbError::NotSupported);
        };

        let terminated = get_termination(ch).map_err(|err| {
            error!(
                "failed to get termination state for channel {} (err {})",
                ch, err.code
            );
            GsUsbError::Controller(err.code)
        })?;

        let ts = TerminationState {
            state: if terminated {
                GS_USB_CHANNEL_TERMINATION_STATE_ON
            } else {
                GS_USB_CHANNEL_TERMINATION_STATE_OFF
            },
        };

        let mut buf = BytesMut::with_capacity(TerminationState::SIZE);
        ts.pack_to(&mut buf);
        Ok(buf.freeze())
    }

    fn request_bt_const(&self, ch: u16) -> Result<Bytes, GsUsbError> {
        let entry = self.channel(ch, "bt_const")?;

        let rate = entry.controller.core_clock().map_err(|err| {
            error!(
                "failed to get core clock for channel {} (err {})",
                ch, err.code
            );
            GsUsbError::Controller(err.code)
        })?;

        let min = entry.controller.timing_min();
        let max = entry.controller.timing_max();

        let bt_const = BtConst {
            feature: entry.state.features(),
            fclk_can: rate,
            tseg1_min: min.prop_seg + min.phase_seg1,
            tseg1_max: max.prop_seg + max.phase_seg1,
            tseg2_min: min.phase_seg2,
            tseg2_max: max.phase_seg2,
            sjw_max: max.sjw,
            brp_min: min.prescaler,
            brp_max: max.prescaler,
            brp_inc: 1,
        };

        let mut buf = BytesMut::with_capacity(BtConst::SIZE);
        bt_const.pack_to(&mut buf);
        Ok(buf.freeze())
    }

    fn request_bt_const_ext(&self, ch: u16) -> Result<Bytes, GsUsbError> {
        let entry = self.channel(ch, "bt_const_ext")?;

        if (entry.state.features() & GS_USB_CAN_FEATURE_FD) == 0 {
            return Err(GsUsbError::NotSupported);
        }

        let rate = entry.controller.core_clock().map_err(|err| {
            error!(
                "failed to get core clock for channel {} (err {})",
                ch, err.code
            );
            GsUsbError::Controller(err.code)
        })?;

        let min = entry.controller.timing_min();
        let max = entry.controller.timing_max();

        let (dmin, dmax) = match (
            entry.controller.timing_data_min(),
            entry.controller.timing_data_max(),
        ) {
            (Some(dmin), Some(dmax)) => (dmin, dmax),
            _ => {
                error!("failed to get min/max data phase timing for channel {}", ch);
                return Err(GsUsbError::NotSupported);
            }
        };

        let bt_const_ext = BtConstExt {
            feature: entry.state.features(),
            fclk_can: rate,
            tseg1_min: min.prop_seg + min.phase_seg1,
            tseg1_max: max.prop_seg + max.phase_seg1,
            tseg2_min: min.phase_seg2,
            tseg2_max: max.phase_seg2,
            sjw_max: max.sjw,
            brp_min: min.prescaler,
            brp_max: max.prescaler,
            brp_inc: 1,
            dtseg1_min: dmin.prop_seg + dmin.phase_seg1,
            dtseg1_max: dmax.prop_seg + dmax.phase_seg1,
            dtseg2_min: dmin.phase_seg2,
            dtseg2_max: dmax.phase_seg2,
            dsjw_max: dmax.sjw,
            dbrp_min: dmin.prescaler,
            dbrp_max: dmax.prescaler,
            dbrp_inc: 1,
        };

        let mut buf = BytesMut::with_capacity(BtConstExt::SIZE);
        bt_const_ext.pack_to(&mut buf);
        Ok(buf.freeze())
    }

    fn request_device_config(&self) -> Result<Bytes, GsUsbError> {
        let dc = DeviceConfig {
            // u8 表示 1 到 256 个通道
            nchannels: (self.nchannels() - 1) as u8,
            sw_version: GS_USB_SW_VERSION,
            hw_version: GS_USB_HW_VERSION,
            ..Default::default()
        };

        let mut buf = BytesMut::with_capacity(DeviceConfig::SIZE);
        dc.pack_to(&mut buf);
        Ok(buf.freeze())
    }

    fn request_timestamp(&self) -> Result<Bytes, GsUsbError> {
        let inner = self.inner();

        let Some(ref timestamp_cb) = inner.ops.timestamp else {
            error!("timestamp not supported");
            return Err(GsUsbError::NotSupported);
        };

        let timestamp = if inner.config.sof_timestamp {
            let mut sof = inner.sof.lock();
            if sof.seen {
                sof.seen = false;
                Some(sof.timestamp)
            } else {
                None
            }
        } else {
            None
        };

        let timestamp = match timestamp {
            Some(value) => value,
            None => timestamp_cb().map_err(|err| {
                error!("failed to get current timestamp (err {})", err.code);
                GsUsbError::Controller(err.code)
            })?,
        };

        debug!("timestamp: 0x{:08x}", timestamp);

        let mut buf = BytesMut::with_capacity(4);
        buf.extend_from_slice(&timestamp.to_le_bytes());
        Ok(buf.freeze())
    }

    fn request_get_state(&self, ch: u16) -> Result<Bytes, GsUsbError> {
        let entry = self.channel(ch, "get_state")?;

        let (state, err_cnt) = entry.controller.state().map_err(|err| {
            error!("failed to get state for channel {} (err {})", ch, err.code);
            GsUsbError::Controller(err.code)
        })?;

        let state = match state {
            CanState::ErrorActive => GS_USB_CHANNEL_STATE_ERROR_ACTIVE,
            CanState::ErrorWarning => GS_USB_CHANNEL_STATE_ERROR_WARNING,
            CanState::ErrorPassive => GS_USB_CHANNEL_STATE_ERROR_PASSIVE,
            CanState::BusOff => GS_USB_CHANNEL_STATE_BUS_OFF,
            CanState::Stopped => GS_USB_CHANNEL_STATE_STOPPED,
        };

        let ds = DeviceState {
            state,
            rxerr: err_cnt.rx_err_cnt as u32,
            txerr: err_cnt.tx_err_cnt as u32,
        };

        let mut buf = BytesMut::with_capacity(DeviceState::SIZE);
        ds.pack_to(&mut buf);
        Ok(buf.freeze())
    }
}
