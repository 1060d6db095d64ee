//! GS-USB 协议常量与控制请求载荷编码/解码
//!
//! 定义 gs_usb 协议的全部线上格式：请求码、特性位、模式位、帧标志位，
//! 以及所有控制传输载荷结构体的打包/解包（固定长度、小端序）。
//!
//! **注意**：所有结构体不使用 `#[repr(packed)]`，完全使用 `bytes` 库手动
//! 打包/解包，不依赖结构体的内存布局。

use crate::error::GsUsbError;
use bytes::{Buf, BufMut, BytesMut};

/// 软件版本（DEVICE_CONFIG 上报）
pub const GS_USB_SW_VERSION: u32 = 2;
/// 硬件版本（DEVICE_CONFIG 上报）
pub const GS_USB_HW_VERSION: u32 = 1;

/// 主机字节序标识（HOST_FORMAT 请求，仅支持小端）
pub const GS_USB_HOST_FORMAT_LITTLE_ENDIAN: u32 = 0x0000_beef;

/// RX 帧（设备→主机）的 echo_id 固定值；其余值均为主机发起的 TX 回显 ID
pub const GS_USB_RX_ECHO_ID: u32 = u32::MAX;

// ============================================================================
// 控制请求码
// ============================================================================

/// GS-USB 厂商控制请求码
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GsUsbRequest {
    HostFormat = 0,
    Bittiming = 1,
    Mode = 2,
    Berr = 3, // Unsupported
    BtConst = 4,
    DeviceConfig = 5,
    Timestamp = 6,
    Identify = 7,
    GetUserId = 8, // Unsupported
    SetUserId = 9, // Unsupported
    DataBittiming = 10,
    BtConstExt = 11,
    SetTermination = 12,
    GetTermination = 13,
    GetState = 14,
}

impl GsUsbRequest {
    /// 从 bRequest 字节解析请求码
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(GsUsbRequest::HostFormat),
            1 => Some(GsUsbRequest::Bittiming),
            2 => Some(GsUsbRequest::Mode),
            3 => Some(GsUsbRequest::Berr),
            4 => Some(GsUsbRequest::BtConst),
            5 => Some(GsUsbRequest::DeviceConfig),
            6 => Some(GsUsbRequest::Timestamp),
            7 => Some(GsUsbRequest::Identify),
            8 => Some(GsUsbRequest::GetUserId),
            9 => Some(GsUsbRequest::SetUserId),
            10 => Some(GsUsbRequest::DataBittiming),
            11 => Some(GsUsbRequest::BtConstExt),
            12 => Some(GsUsbRequest::SetTermination),
            13 => Some(GsUsbRequest::GetTermination),
            14 => Some(GsUsbRequest::GetState),
            _ => None,
        }
    }
}

// ============================================================================
// 通道模式 / 状态 / 识别 / 终端电阻 枚举值
// ============================================================================

/// MODE 请求：复位通道
pub const GS_USB_CHANNEL_MODE_RESET: u32 = 0;
/// MODE 请求：启动通道
pub const GS_USB_CHANNEL_MODE_START: u32 = 1;

/// GET_STATE 上报的通道状态
pub const GS_USB_CHANNEL_STATE_ERROR_ACTIVE: u32 = 0;
pub const GS_USB_CHANNEL_STATE_ERROR_WARNING: u32 = 1;
pub const GS_USB_CHANNEL_STATE_ERROR_PASSIVE: u32 = 2;
pub const GS_USB_CHANNEL_STATE_BUS_OFF: u32 = 3;
pub const GS_USB_CHANNEL_STATE_STOPPED: u32 = 4;

/// IDENTIFY 请求模式
pub const GS_USB_CHANNEL_IDENTIFY_MODE_OFF: u32 = 0;
pub const GS_USB_CHANNEL_IDENTIFY_MODE_ON: u32 = 1;

/// 终端电阻状态
pub const GS_USB_CHANNEL_TERMINATION_STATE_OFF: u32 = 0;
pub const GS_USB_CHANNEL_TERMINATION_STATE_ON: u32 = 1;

// ============================================================================
// 通道特性位（BT_CONST.feature 上报）
// ============================================================================

pub const GS_USB_CAN_FEATURE_LISTEN_ONLY: u32 = 1 << 0;
pub const GS_USB_CAN_FEATURE_LOOP_BACK: u32 = 1 << 1;
pub const GS_USB_CAN_FEATURE_TRIPLE_SAMPLE: u32 = 1 << 2;
pub const GS_USB_CAN_FEATURE_ONE_SHOT: u32 = 1 << 3;
pub const GS_USB_CAN_FEATURE_HW_TIMESTAMP: u32 = 1 << 4;
pub const GS_USB_CAN_FEATURE_IDENTIFY: u32 = 1 << 5;
pub const GS_USB_CAN_FEATURE_USER_ID: u32 = 1 << 6; // Unsupported
pub const GS_USB_CAN_FEATURE_PAD_PKTS_TO_MAX_PKT_SIZE: u32 = 1 << 7; // Unsupported
pub const GS_USB_CAN_FEATURE_FD: u32 = 1 << 8;
pub const GS_USB_CAN_FEATURE_BT_CONST_EXT: u32 = 1 << 10;
pub const GS_USB_CAN_FEATURE_TERMINATION: u32 = 1 << 11;
pub const GS_USB_CAN_FEATURE_GET_STATE: u32 = 1 << 13;

// ============================================================================
// 通道模式位（MODE 请求 flags，与对应特性位同位）
// ============================================================================

pub const GS_USB_CAN_MODE_NORMAL: u32 = 0;
pub const GS_USB_CAN_MODE_LISTEN_ONLY: u32 = 1 << 0;
pub const GS_USB_CAN_MODE_LOOP_BACK: u32 = 1 << 1;
pub const GS_USB_CAN_MODE_TRIPLE_SAMPLE: u32 = 1 << 2;
pub const GS_USB_CAN_MODE_ONE_SHOT: u32 = 1 << 3;
pub const GS_USB_CAN_MODE_HW_TIMESTAMP: u32 = 1 << 4;
pub const GS_USB_CAN_MODE_FD: u32 = 1 << 8;

// ============================================================================
// 主机帧标志位（host frame hdr.flags）
// ============================================================================

pub const GS_USB_CAN_FLAG_OVERFLOW: u8 = 1 << 0;
pub const GS_USB_CAN_FLAG_FD: u8 = 1 << 1;
pub const GS_USB_CAN_FLAG_BRS: u8 = 1 << 2;
pub const GS_USB_CAN_FLAG_ESI: u8 = 1 << 3;

// ============================================================================
// CAN ID 标志位与掩码
// ============================================================================

/// 扩展帧标志（IDE，29-bit ID）
pub const GS_USB_CAN_ID_FLAG_IDE: u32 = 1 << 31;
/// 远程帧标志（RTR）
pub const GS_USB_CAN_ID_FLAG_RTR: u32 = 1 << 30;
/// 错误帧标志
pub const GS_USB_CAN_ID_FLAG_ERR: u32 = 1 << 29;

/// 错误帧 CAN ID 附加标志
pub const GS_USB_CAN_ID_FLAG_ERR_CRTL: u32 = 1 << 2;
pub const GS_USB_CAN_ID_FLAG_ERR_BUSOFF: u32 = 1 << 6;
pub const GS_USB_CAN_ID_FLAG_ERR_RESTARTED: u32 = 1 << 8;
pub const GS_USB_CAN_ID_FLAG_ERR_CNT: u32 = 1 << 9;

/// 错误帧 payload[1] 中的控制器状态位
pub const GS_USB_CAN_ERR_CRTL_RX_WARNING: u8 = 1 << 2;
pub const GS_USB_CAN_ERR_CRTL_TX_WARNING: u8 = 1 << 3;
pub const GS_USB_CAN_ERR_CRTL_RX_PASSIVE: u8 = 1 << 4;
pub const GS_USB_CAN_ERR_CRTL_TX_PASSIVE: u8 = 1 << 5;
pub const GS_USB_CAN_ERR_CRTL_ACTIVE: u8 = 1 << 6;

/// 标准帧 ID 掩码（11 bit）
pub const CAN_STD_ID_MASK: u32 = 0x0000_07FF;
/// 扩展帧 ID 掩码（29 bit）
pub const CAN_EXT_ID_MASK: u32 = 0x1FFF_FFFF;

/// 经典 CAN 最大 DLC
pub const CAN_MAX_DLC: u8 = 8;
/// CAN FD 最大 DLC
pub const CANFD_MAX_DLC: u8 = 15;

/// DLC → 数据字节数（CAN FD 编码表）
pub fn can_dlc_to_bytes(dlc: u8) -> usize {
    match dlc {
        0..=8 => dlc as usize,
        9 => 12,
        10 => 16,
        11 => 20,
        12 => 24,
        13 => 32,
        14 => 48,
        _ => 64,
    }
}

/// 数据字节数 → 最小可容纳的 DLC
pub fn can_bytes_to_dlc(bytes: usize) -> u8 {
    match bytes {
        0..=8 => bytes as u8,
        9..=12 => 9,
        13..=16 => 10,
        17..=20 => 11,
        21..=24 => 12,
        25..=32 => 13,
        33..=48 => 14,
        _ => 15,
    }
}

// ============================================================================
// 控制请求载荷结构体
// ============================================================================

/// 长度校验辅助：载荷长度必须与结构体定义完全一致
fn check_len(request: &'static str, data: &[u8], expected: usize) -> Result<(), GsUsbError> {
    if data.len() != expected {
        return Err(GsUsbError::invalid_length(request, data.len(), expected));
    }
    Ok(())
}

/// HOST_FORMAT 载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    pub byte_order: u32,
}

impl HostConfig {
    pub const SIZE: usize = 4;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.byte_order);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("host format", data, Self::SIZE)?;
        Ok(Self {
            byte_order: data.get_u32_le(),
        })
    }
}

/// DEVICE_CONFIG 载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    pub reserved1: u8,
    pub reserved2: u8,
    pub reserved3: u8,
    /// 通道数减一（u8 表示 1 到 256 个通道）
    pub nchannels: u8,
    pub sw_version: u32,
    pub hw_version: u32,
}

impl DeviceConfig {
    pub const SIZE: usize = 12;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.reserved1);
        buf.put_u8(self.reserved2);
        buf.put_u8(self.reserved3);
        buf.put_u8(self.nchannels);
        buf.put_u32_le(self.sw_version);
        buf.put_u32_le(self.hw_version);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("device config", data, Self::SIZE)?;
        Ok(Self {
            reserved1: data.get_u8(),
            reserved2: data.get_u8(),
            reserved3: data.get_u8(),
            nchannels: data.get_u8(),
            sw_version: data.get_u32_le(),
            hw_version: data.get_u32_le(),
        })
    }
}

/// MODE 载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMode {
    pub mode: u32,
    pub flags: u32,
}

impl DeviceMode {
    pub const SIZE: usize = 8;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.mode);
        buf.put_u32_le(self.flags);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("mode", data, Self::SIZE)?;
        Ok(Self {
            mode: data.get_u32_le(),
            flags: data.get_u32_le(),
        })
    }
}

/// GET_STATE 载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub state: u32,
    pub rxerr: u32,
    pub txerr: u32,
}

impl DeviceState {
    pub const SIZE: usize = 12;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.state);
        buf.put_u32_le(self.rxerr);
        buf.put_u32_le(self.txerr);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("state", data, Self::SIZE)?;
        Ok(Self {
            state: data.get_u32_le(),
            rxerr: data.get_u32_le(),
            txerr: data.get_u32_le(),
        })
    }
}

/// BITTIMING / DATA_BITTIMING 载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceBittiming {
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub brp: u32,
}

impl DeviceBittiming {
    pub const SIZE: usize = 20;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.prop_seg);
        buf.put_u32_le(self.phase_seg1);
        buf.put_u32_le(self.phase_seg2);
        buf.put_u32_le(self.sjw);
        buf.put_u32_le(self.brp);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("bittiming", data, Self::SIZE)?;
        Ok(Self {
            prop_seg: data.get_u32_le(),
            phase_seg1: data.get_u32_le(),
            phase_seg2: data.get_u32_le(),
            sjw: data.get_u32_le(),
            brp: data.get_u32_le(),
        })
    }
}

/// IDENTIFY 载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyMode {
    pub mode: u32,
}

impl IdentifyMode {
    pub const SIZE: usize = 4;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.mode);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("identify", data, Self::SIZE)?;
        Ok(Self {
            mode: data.get_u32_le(),
        })
    }
}

/// SET_TERMINATION / GET_TERMINATION 载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationState {
    pub state: u32,
}

impl TerminationState {
    pub const SIZE: usize = 4;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.state);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("termination", data, Self::SIZE)?;
        Ok(Self {
            state: data.get_u32_le(),
        })
    }
}

/// BT_CONST 载荷：特性位 + 核心时钟 + 标称位时序上下限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BtConst {
    pub feature: u32,
    pub fclk_can: u32,
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

impl BtConst {
    pub const SIZE: usize = 40;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.feature);
        buf.put_u32_le(self.fclk_can);
        buf.put_u32_le(self.tseg1_min);
        buf.put_u32_le(self.tseg1_max);
        buf.put_u32_le(self.tseg2_min);
        buf.put_u32_le(self.tseg2_max);
        buf.put_u32_le(self.sjw_max);
        buf.put_u32_le(self.brp_min);
        buf.put_u32_le(self.brp_max);
        buf.put_u32_le(self.brp_inc);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("bt_const", data, Self::SIZE)?;
        Ok(Self {
            feature: data.get_u32_le(),
            fclk_can: data.get_u32_le(),
            tseg1_min: data.get_u32_le(),
            tseg1_max: data.get_u32_le(),
            tseg2_min: data.get_u32_le(),
            tseg2_max: data.get_u32_le(),
            sjw_max: data.get_u32_le(),
            brp_min: data.get_u32_le(),
            brp_max: data.get_u32_le(),
            brp_inc: data.get_u32_le(),
        })
    }
}

/// BT_CONST_EXT 载荷：BT_CONST 加数据相位时序上下限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BtConstExt {
    pub feature: u32,
    pub fclk_can: u32,
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
    pub dtseg1_min: u32,
    pub dtseg1_max: u32,
    pub dtseg2_min: u32,
    pub dtseg2_max: u32,
    pub dsjw_max: u32,
    pub dbrp_min: u32,
    pub dbrp_max: u32,
    pub dbrp_inc: u32,
}

impl BtConstExt {
    pub const SIZE: usize = 72;

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.feature);
        buf.put_u32_le(self.fclk_can);
        buf.put_u32_le(self.tseg1_min);
        buf.put_u32_le(self.tseg1_max);
        buf.put_u32_le(self.tseg2_min);
        buf.put_u32_le(self.tseg2_max);
        buf.put_u32_le(self.sjw_max);
        buf.put_u32_le(self.brp_min);
        buf.put_u32_le(self.brp_max);
        buf.put_u32_le(self.brp_inc);
        buf.put_u32_le(self.dtseg1_min);
        buf.put_u32_le(self.dtseg1_max);
        buf.put_u32_le(self.dtseg2_min);
        buf.put_u32_le(self.dtseg2_max);
        buf.put_u32_le(self.dsjw_max);
        buf.put_u32_le(self.dbrp_min);
        buf.put_u32_le(self.dbrp_max);
        buf.put_u32_le(self.dbrp_inc);
    }

    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        check_len("bt_const_ext", data, Self::SIZE)?;
        Ok(Self {
            feature: data.get_u32_le(),
            fclk_can: data.get_u32_le(),
            tseg1_min: data.get_u32_le(),
            tseg1_max: data.get_u32_le(),
            tseg2_min: data.get_u32_le(),
            tseg2_max: data.get_u32_le(),
            sjw_max: data.get_u32_le(),
            brp_min: data.get_u32_le(),
            brp_max: data.get_u32_le(),
            brp_inc: data.get_u32_le(),
            dtseg1_min: data.get_u32_le(),
            dtseg1_max: data.get_u32_le(),
            dtseg2_min: data.get_u32_le(),
            dtseg2_max: data.get_u32_le(),
            dsjw_max: data.get_u32_le(),
            dbrp_min: data.get_u32_le(),
            dbrp_max: data.get_u32_le(),
            dbrp_inc: data.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_u8() {
        assert_eq!(GsUsbRequest::from_u8(0), Some(GsUsbRequest::HostFormat));
        assert_eq!(GsUsbRequest::from_u8(2), Some(GsUsbRequest::Mode));
        assert_eq!(GsUsbRequest::from_u8(14), Some(GsUsbRequest::GetState));
        assert_eq!(GsUsbRequest::from_u8(15), None);
        assert_eq!(GsUsbRequest::from_u8(0xFF), None);
    }

    #[test]
    fn test_dlc_to_bytes() {
        assert_eq!(can_dlc_to_bytes(0), 0);
        assert_eq!(can_dlc_to_bytes(8), 8);
        assert_eq!(can_dlc_to_bytes(9), 12);
        assert_eq!(can_dlc_to_bytes(13), 32);
        assert_eq!(can_dlc_to_bytes(15), 64);
    }

    #[test]
    fn test_bytes_to_dlc() {
        assert_eq!(can_bytes_to_dlc(0), 0);
        assert_eq!(can_bytes_to_dlc(8), 8);
        assert_eq!(can_bytes_to_dlc(9), 9);
        assert_eq!(can_bytes_to_dlc(64), 15);
    }

    #[test]
    fn test_dlc_roundtrip() {
        // 合法 DLC 值经过 bytes 转换后保持不变
        for dlc in 0..=CANFD_MAX_DLC {
            assert_eq!(can_bytes_to_dlc(can_dlc_to_bytes(dlc)), dlc);
        }
    }

    #[test]
    fn test_host_config_pack() {
        // 握手场景：EF BE 00 00
        let hc = HostConfig {
            byte_order: GS_USB_HOST_FORMAT_LITTLE_ENDIAN,
        };
        let mut buf = BytesMut::new();
        hc.pack_to(&mut buf);
        assert_eq!(&buf[..], &[0xEF, 0xBE, 0x00, 0x00]);
    }

    #[test]
    fn test_host_config_roundtrip() {
        let hc = HostConfig {
            byte_order: 0x12345678,
        };
        let mut buf = BytesMut::new();
        hc.pack_to(&mut buf);
        assert_eq!(HostConfig::unpack_from(&buf).unwrap(), hc);
    }

    #[test]
    fn test_host_config_invalid_length() {
        assert!(HostConfig::unpack_from(&[0xEF, 0xBE]).is_err());
        assert!(HostConfig::unpack_from(&[0xEF, 0xBE, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_device_config_pack() {
        // 单通道设备：nchannels-1=0, sw=2, hw=1
        let dc = DeviceConfig {
            nchannels: 0,
            sw_version: GS_USB_SW_VERSION,
            hw_version: GS_USB_HW_VERSION,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        dc.pack_to(&mut buf);
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 0, 0x02, 0, 0, 0, 0x01, 0, 0, 0]
        );
    }

    #[test]
    fn test_device_mode_roundtrip() {
        let dm = DeviceMode {
            mode: GS_USB_CHANNEL_MODE_START,
            flags: GS_USB_CAN_MODE_LOOP_BACK | GS_USB_CAN_MODE_HW_TIMESTAMP,
        };
        let mut buf = BytesMut::new();
        dm.pack_to(&mut buf);
        assert_eq!(buf.len(), DeviceMode::SIZE);
        assert_eq!(DeviceMode::unpack_from(&buf).unwrap(), dm);
    }

    #[test]
    fn test_device_state_roundtrip() {
        let ds = DeviceState {
            state: GS_USB_CHANNEL_STATE_ERROR_WARNING,
            rxerr: 96,
            txerr: 128,
        };
        let mut buf = BytesMut::new();
        ds.pack_to(&mut buf);
        assert_eq!(DeviceState::unpack_from(&buf).unwrap(), ds);
    }

    #[test]
    fn test_device_bittiming_unpack() {
        // 场景 2 的时序：5 个 u32 小端
        let mut buf = BytesMut::new();
        for v in [1u32, 12, 2, 1, 6] {
            buf.put_u32_le(v);
        }
        let dbt = DeviceBittiming::unpack_from(&buf).unwrap();
        assert_eq!(dbt.prop_seg, 1);
        assert_eq!(dbt.phase_seg1, 12);
        assert_eq!(dbt.phase_seg2, 2);
        assert_eq!(dbt.sjw, 1);
        assert_eq!(dbt.brp, 6);
    }

    #[test]
    fn test_device_bittiming_invalid_length() {
        let buf = [0u8; 16];
        assert!(DeviceBittiming::unpack_from(&buf).is_err());
    }

    #[test]
    fn test_identify_mode_roundtrip() {
        let im = IdentifyMode {
            mode: GS_USB_CHANNEL_IDENTIFY_MODE_ON,
        };
        let mut buf = BytesMut::new();
        im.pack_to(&mut buf);
        assert_eq!(IdentifyMode::unpack_from(&buf).unwrap(), im);
    }

    #[test]
    fn test_termination_state_roundtrip() {
        let ts = TerminationState {
            state: GS_USB_CHANNEL_TERMINATION_STATE_ON,
        };
        let mut buf = BytesMut::new();
        ts.pack_to(&mut buf);
        assert_eq!(TerminationState::unpack_from(&buf).unwrap(), ts);
    }

    #[test]
    fn test_bt_const_roundtrip() {
        let bt = BtConst {
            feature: GS_USB_CAN_FEATURE_GET_STATE | GS_USB_CAN_FEATURE_LOOP_BACK,
            fclk_can: 80_000_000,
            tseg1_min: 2,
            tseg1_max: 256,
            tseg2_min: 1,
            tseg2_max: 128,
            sjw_max: 128,
            brp_min: 1,
            brp_max: 512,
            brp_inc: 1,
        };
        let mut buf = BytesMut::new();
        bt.pack_to(&mut buf);
        assert_eq!(buf.len(), BtConst::SIZE);
        assert_eq!(BtConst::unpack_from(&buf).unwrap(), bt);
    }

    #[test]
    fn test_bt_const_ext_roundtrip() {
        let bt = BtConstExt {
            feature: GS_USB_CAN_FEATURE_FD | GS_USB_CAN_FEATURE_BT_CONST_EXT,
            fclk_can: 80_000_000,
            tseg1_min: 2,
            tseg1_max: 256,
            tseg2_min: 1,
            tseg2_max: 128,
            sjw_max: 128,
            brp_min: 1,
            brp_max: 512,
            brp_inc: 1,
            dtseg1_min: 1,
            dtseg1_max: 32,
            dtseg2_min: 1,
            dtseg2_max: 16,
            dsjw_max: 16,
            dbrp_min: 1,
            dbrp_max: 32,
            dbrp_inc: 1,
        };
        let mut buf = BytesMut::new();
        bt.pack_to(&mut buf);
        assert_eq!(buf.len(), BtConstExt::SIZE);
        assert_eq!(BtConstExt::unpack_from(&buf).unwrap(), bt);
    }
}
