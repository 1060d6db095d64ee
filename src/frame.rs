//! 主机帧（host frame）编码/解码
//!
//! bulk 端点上交换的线格式：12 字节小端头部，后跟 8 字节（经典 CAN）或
//! 64 字节（CAN FD）数据区，可选再跟 4 字节小端时间戳。

use crate::error::GsUsbError;
use crate::protocol::GS_USB_RX_ECHO_ID;
use bytes::{Buf, BufMut, BytesMut};

/// 头部大小
pub const HOST_FRAME_HDR_SIZE: usize = 12;
/// 经典 CAN 数据区大小
pub const HOST_FRAME_CLASSIC_DATA_SIZE: usize = 8;
/// CAN FD 数据区大小
pub const HOST_FRAME_FD_DATA_SIZE: usize = 64;
/// 时间戳字段大小
pub const HOST_FRAME_TIMESTAMP_SIZE: usize = 4;

/// 主机帧最大尺寸（FD 数据区 + 时间戳）
pub const HOST_FRAME_MAX_SIZE: usize =
    HOST_FRAME_HDR_SIZE + HOST_FRAME_FD_DATA_SIZE + HOST_FRAME_TIMESTAMP_SIZE;

/// 头部内字段偏移（IN worker 就地修改 flags / 读取 can_id 时使用）
pub const HOST_FRAME_CAN_ID_OFFSET: usize = 4;
pub const HOST_FRAME_FLAGS_OFFSET: usize = 10;

/// 主机帧头部
///
/// `echo_id == 0xFFFFFFFF` 表示设备→主机的 RX 帧（含错误帧）；
/// 其余值为主机发起的 TX 请求，完成后按原值回显。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostFrameHdr {
    pub echo_id: u32,
    pub can_id: u32,
    pub can_dlc: u8,
    pub channel: u8,
    pub flags: u8,
    pub reserved: u8,
}

impl HostFrameHdr {
    /// RX 帧头部（设备→主机）
    pub fn rx(can_id: u32, can_dlc: u8, channel: u8, flags: u8) -> Self {
        Self {
            echo_id: GS_USB_RX_ECHO_ID,
            can_id,
            can_dlc,
            channel,
            flags,
            reserved: 0,
        }
    }

    /// TX 回显头部：仅保留 echo_id、通道与标志，其余清零
    pub fn echo(echo_id: u32, channel: u8, flags: u8) -> Self {
        Self {
            echo_id,
            can_id: 0,
            can_dlc: 0,
            channel,
            flags,
            reserved: 0,
        }
    }

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.echo_id);
        buf.put_u32_le(self.can_id);
        buf.put_u8(self.can_dlc);
        buf.put_u8(self.channel);
        buf.put_u8(self.flags);
        buf.put_u8(self.reserved);
    }

    /// 从缓冲区前缀解析头部（缓冲区可以比头部长）
    pub fn unpack_from(mut data: &[u8]) -> Result<Self, GsUsbError> {
        if data.len() < HOST_FRAME_HDR_SIZE {
            return Err(GsUsbError::Invalid {
                what: "length",
                detail: format!(
                    "host frame contains no header ({} < {})",
                    data.len(),
                    HOST_FRAME_HDR_SIZE
                ),
            });
        }

        Ok(Self {
            echo_id: data.get_u32_le(),
            can_id: data.get_u32_le(),
            can_dlc: data.get_u8(),
            channel: data.get_u8(),
            flags: data.get_u8(),
            reserved: data.get_u8(),
        })
    }

    pub fn is_rx_frame(&self) -> bool {
        self.echo_id == GS_USB_RX_ECHO_ID
    }
}
