//! USB 设备类表面
//!
//! 定义协议引擎消费的 USB 总线窄接口（bulk 端点读写）、SETUP 包解析、
//! 端点地址/描述符布局，以及 BOS 平台能力与 Microsoft OS 2.0 描述符块。
//!
//! 枚举、端点传输与 SETUP 递交由外部 USB 栈负责；嵌入方把 bulk 端点
//! 封装成 `UsbBus`，把 SETUP 包转发给控制请求分发器。

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Bulk IN 端点地址（现有主机驱动硬编码 0x81/0x02）
pub const GS_USB_IN_EP_ADDR: u8 = 0x81;
/// 占位 bulk OUT 端点地址（兼容模式下保持端点地址不被重排）
pub const GS_USB_DUMMY_EP_ADDR: u8 = 0x01;
/// Bulk OUT 端点地址
pub const GS_USB_OUT_EP_ADDR: u8 = 0x02;

/// 全速 bulk 最大包长
pub const GS_USB_MPS_FS: u16 = 64;
/// 高速 bulk 最大包长
pub const GS_USB_MPS_HS: u16 = 512;

/// Microsoft OS 2.0 厂商请求码
pub const GS_USB_MS_VENDORCODE: u8 = 0xAA;
/// MS OS 2.0 描述符索引（厂商请求的 wIndex）
pub const MS_OS_20_DESCRIPTOR_INDEX: u16 = 0x07;

/// USB 总线速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    Full,
    High,
}

/// Bulk 端点传输错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbTransferError {
    /// 传输被取消（断开/复位时端点出队；按警告处理）
    #[error("transfer cancelled")]
    Cancelled,

    /// 总线已断开
    #[error("bus disconnected")]
    Disconnected,

    /// 其它栈错误
    #[error("transfer failed (err {0})")]
    Other(i32),
}

/// USB 总线窄接口：协议引擎只使用两个 bulk 端点
///
/// 两个方法都阻塞到传输完成；断开时返回 `Cancelled`/`Disconnected`，
/// 工作线程据此退出或丢弃缓冲。
pub trait UsbBus: Send + Sync {
    /// 在 bulk OUT 端点上保持一个读请求，返回收到的字节数
    fn read_bulk_out(&self, buf: &mut [u8]) -> Result<usize, UsbTransferError>;

    /// 向 bulk IN 端点写入一个完整主机帧并等待完成
    fn write_bulk_in(&self, data: &[u8]) -> Result<(), UsbTransferError>;
}

// ============================================================================
// SETUP 包
// ============================================================================

const USB_REQTYPE_RECIPIENT_MASK: u8 = 0x1F;
const USB_REQTYPE_DIR_TO_HOST: u8 = 0x80;

/// SETUP 包接收者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbRecipient {
    Device,
    Interface,
    Other(u8),
}

/// USB SETUP 包
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn recipient(&self) -> UsbRecipient {
        match self.request_type & USB_REQTYPE_RECIPIENT_MASK {
            0 => UsbRecipient::Device,
            1 => UsbRecipient::Interface,
            other => UsbRecipient::Other(other),
        }
    }

    /// 传输方向为设备→主机
    pub fn is_to_host(&self) -> bool {
        (self.request_type & USB_REQTYPE_DIR_TO_HOST) != 0
    }
}

// ============================================================================
// 接口 / 端点描述符
// ============================================================================

const USB_DESC_INTERFACE: u8 = 0x04;
const USB_DESC_ENDPOINT: u8 = 0x05;
const USB_BCC_VENDOR: u8 = 0xFF;
const USB_EP_TYPE_BULK: u8 = 0x02;

fn put_endpoint_descriptor(buf: &mut BytesMut, addr: u8, mps: u16) {
    buf.put_u8(7); // bLength
    buf.put_u8(USB_DESC_ENDPOINT);
    buf.put_u8(addr);
    buf.put_u8(USB_EP_TYPE_BULK);
    buf.put_u16_le(mps);
    buf.put_u8(0); // bInterval
}

/// 生成厂商类接口描述符与 bulk 端点描述符
///
/// 兼容模式在 0x01 追加占位 bulk OUT 端点，使 IN=0x81 / OUT=0x02 的
/// 端点地址不被主机驱动的地址修正逻辑重排。
pub fn interface_descriptors(interface_number: u8, speed: UsbSpeed, compat_dummy: bool) -> Bytes {
    let mps = match speed {
        UsbSpeed::Full => GS_USB_MPS_FS,
        UsbSpeed::High => GS_USB_MPS_HS,
    };
    let mut buf = BytesMut::new();

    buf.put_u8(9); // bLength
    buf.put_u8(USB_DESC_INTERFACE);
    buf.put_u8(interface_number);
    buf.put_u8(0); // bAlternateSetting
    buf.put_u8(if compat_dummy { 3 } else { 2 }); // bNumEndpoints
    buf.put_u8(USB_BCC_VENDOR);
    buf.put_u8(0); // bInterfaceSubClass
    buf.put_u8(0); // bInterfaceProtocol
    buf.put_u8(0); // iInterface

    put_endpoint_descriptor(&mut buf, GS_USB_IN_EP_ADDR, mps);
    if compat_dummy {
        put_endpoint_descriptor(&mut buf, GS_USB_DUMMY_EP_ADDR, mps);
    }
    put_endpoint_descriptor(&mut buf, GS_USB_OUT_EP_ADDR, mps);

    buf.freeze()
}

// ============================================================================
// BOS 能力与 Microsoft OS 2.0 描述符
// ============================================================================

const USB_DESC_DEVICE_CAPABILITY: u8 = 0x10;
const USB_BOS_CAPABILITY_PLATFORM: u8 = 0x05;

const MS_OS_20_SET_HEADER_DESCRIPTOR: u16 = 0x00;
const MS_OS_20_FEATURE_COMPATIBLE_ID: u16 = 0x03;
const MS_OS_20_FEATURE_REG_PROPERTY: u16 = 0x04;
const MS_OS_20_FEATURE_VENDOR_REVISION: u16 = 0x08;
const MS_OS_20_PROPERTY_DATA_REG_MULTI_SZ: u16 = 0x07;

/// Windows 8.1 (0x06030000)
const MSOSV2_WINDOWS_VERSION: u32 = 0x0603_0000;

/// 随机生成的 DeviceInterfaceGUID
const DEVICE_INTERFACE_GUID: &str = "{B24D8379-235F-4853-95E7-7772516FA2D5}";

const MSOSV2_SET_HEADER_SIZE: u16 = 10;
const MSOSV2_COMPATIBLE_ID_SIZE: u16 = 20;
const MSOSV2_GUIDS_PROPERTY_SIZE: u16 = 132;
const MSOSV2_VENDOR_REVISION_SIZE: u16 = 6;
const MSOSV2_TOTAL_SIZE: u16 = MSOSV2_SET_HEADER_SIZE
    + MSOSV2_COMPATIBLE_ID_SIZE
    + MSOSV2_GUIDS_PROPERTY_SIZE
    + MSOSV2_VENDOR_REVISION_SIZE;

/// REG_MULTI_SZ 尾部带双重 NUL
fn put_utf16le(buf: &mut BytesMut, s: &str, trailing_nuls: usize) {
    for c in s.encode_utf16() {
        buf.put_u16_le(c);
    }
    for _ in 0..trailing_nuls {
        buf.put_u16_le(0);
    }
}

/// Microsoft OS 2.0 描述符集
///
/// 标识 WINUSB 兼容 ID 与 DeviceInterfaceGUIDs 注册表属性，使 Windows
/// 自动绑定 WinUSB 驱动。
pub fn msosv2_descriptor() -> Bytes {
    let mut buf = BytesMut::with_capacity(MSOSV2_TOTAL_SIZE as usize);

    // Descriptor set header
    buf.put_u16_le(MSOSV2_SET_HEADER_SIZE);
    buf.put_u16_le(MS_OS_20_SET_HEADER_DESCRIPTOR);
    buf.put_u32_le(MSOSV2_WINDOWS_VERSION);
    buf.put_u16_le(MSOSV2_TOTAL_SIZE);

    // WINUSB compatible ID
    buf.put_u16_le(MSOSV2_COMPATIBLE_ID_SIZE);
    buf.put_u16_le(MS_OS_20_FEATURE_COMPATIBLE_ID);
    buf.put_slice(b"WINUSB\0\0");
    buf.put_slice(&[0u8; 8]); // SubCompatibleID

    // DeviceInterfaceGUIDs registry property
    buf.put_u16_le(MSOSV2_GUIDS_PROPERTY_SIZE);
    buf.put_u16_le(MS_OS_20_FEATURE_REG_PROPERTY);
    buf.put_u16_le(MS_OS_20_PROPERTY_DATA_REG_MULTI_SZ);
    buf.put_u16_le(42); // wPropertyNameLength
    put_utf16le(&mut buf, "DeviceInterfaceGUIDs", 1);
    buf.put_u16_le(80); // wPropertyDataLength
    put_utf16le(&mut buf, DEVICE_INTERFACE_GUID, 2);

    // Vendor revision
    buf.put_u16_le(MSOSV2_VENDOR_REVISION_SIZE);
    buf.put_u16_le(MS_OS_20_FEATURE_VENDOR_REVISION);
    buf.put_u16_le(1);

    debug_assert_eq!(buf.len(), MSOSV2_TOTAL_SIZE as usize);
    buf.freeze()
}

/// MS OS 2.0 平台能力 UUID: D8DD60DF-4589-4CC7-9CD2-659D9E648A9F
const MSOSV2_PLATFORM_CAPABILITY_UUID: [u8; 16] = [
    0xDF, 0x60, 0xDD, 0xD8, 0x89, 0x45, 0xC7, 0x4C, 0x9C, 0xD2, 0x65, 0x9D, 0x9E, 0x64, 0x8A,
    0x9F,
];

/// BOS 平台能力描述符：向主机通告 MS OS 2.0 厂商请求码
pub fn bos_msosv2_capability() -> Bytes {
    let mut buf = BytesMut::with_capacity(28);

    buf.put_u8(28); // bLength
    buf.put_u8(USB_DESC_DEVICE_CAPABILITY);
    buf.put_u8(USB_BOS_CAPABILITY_PLATFORM);
    buf.put_u8(0); // bReserved
    buf.put_slice(&MSOSV2_PLATFORM_CAPABILITY_UUID);
    buf.put_u32_le(MSOSV2_WINDOWS_VERSION);
    buf.put_u16_le(MSOSV2_TOTAL_SIZE);
    buf.put_u8(GS_USB_MS_VENDORCODE);
    buf.put_u8(0); // bAltEnumCode

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_packet_recipient() {
        let setup = SetupPacket {
            request_type: 0xC1, // D2H | vendor | interface
            request: 5,
            value: 0,
            index: 0,
            length: 12,
        };
        assert_eq!(setup.recipient(), UsbRecipient::Interface);
        assert!(setup.is_to_host());

        let setup = SetupPacket {
            request_type: 0x41, // H2D | vendor | interface
            request: 0,
            value: 0,
            index: 0,
            length: 4,
        };
        assert_eq!(setup.recipient(), UsbRecipient::Interface);
        assert!(!setup.is_to_host());

        let setup = SetupPacket {
            request_type: 0xC0, // D2H | vendor | device
            request: GS_USB_MS_VENDORCODE,
            value: 0,
            index: MS_OS_20_DESCRIPTOR_INDEX,
            length: 0xFF,
        };
        assert_eq!(setup.recipient(), UsbRecipient::Device);
    }

    #[test]
    fn test_interface_descriptors_fs() {
        let desc = interface_descriptors(0, UsbSpeed::Full, true);

        // 接口描述符 + 3 个端点描述符
        assert_eq!(desc.len(), 9 + 3 * 7);
        assert_eq!(desc[1], 0x04); // INTERFACE
        assert_eq!(desc[4], 3); // bNumEndpoints
        assert_eq!(desc[5], 0xFF); // vendor class

        // 端点顺序：IN, DUMMY, OUT
        assert_eq!(desc[9 + 2], GS_USB_IN_EP_ADDR);
        assert_eq!(desc[9 + 7 + 2], GS_USB_DUMMY_EP_ADDR);
        assert_eq!(desc[9 + 14 + 2], GS_USB_OUT_EP_ADDR);

        // 全速 MPS = 64
        assert_eq!(&desc[9 + 4..9 + 6], &[64, 0]);
    }

    #[test]
    fn test_interface_descriptors_hs_no_dummy() {
        let desc = interface_descriptors(0, UsbSpeed::High, false);

        assert_eq!(desc.len(), 9 + 2 * 7);
        assert_eq!(desc[4], 2); // bNumEndpoints
        assert_eq!(desc[9 + 2], GS_USB_IN_EP_ADDR);
        assert_eq!(desc[9 + 7 + 2], GS_USB_OUT_EP_ADDR);

        // 高速 MPS = 512
        assert_eq!(&desc[9 + 4..9 + 6], &[0x00, 0x02]);
    }

    #[test]
    fn test_msosv2_descriptor_layout() {
        let desc = msosv2_descriptor();

        assert_eq!(desc.len(), MSOSV2_TOTAL_SIZE as usize);

        // set header
        assert_eq!(&desc[0..2], &[10, 0]);
        assert_eq!(
            u32::from_le_bytes(desc[4..8].try_into().unwrap()),
            MSOSV2_WINDOWS_VERSION
        );
        assert_eq!(
            u16::from_le_bytes(desc[8..10].try_into().unwrap()),
            MSOSV2_TOTAL_SIZE
        );

        // WINUSB compatible ID
        assert_eq!(&desc[14..20], b"WINUSB");
    }

    #[test]
    fn test_bos_capability_layout() {
        let cap = bos_msosv2_capability();

        assert_eq!(cap.len(), 28);
        assert_eq!(cap[0], 28);
        assert_eq!(cap[1], USB_DESC_DEVICE_CAPABILITY);
        assert_eq!(cap[2], USB_BOS_CAPABILITY_PLATFORM);
        assert_eq!(cap[26], GS_USB_MS_VENDORCODE);
        assert_eq!(
            u16::from_le_bytes(cap[24..26].try_into().unwrap()),
            MSOSV2_TOTAL_SIZE
        );
    }
}
