//! 主机帧管线
//!
//! 三个协作的工作线程共享一个缓冲池：
//!
//! - OUT worker：在 bulk OUT 端点上保持一个读请求，收到主机帧后装入
//!   池缓冲，经 TX FIFO 交给 TX worker；
//! - TX worker：解析主机帧、构造原生 CAN 帧下发控制器，并把缓冲改写
//!   为回显头部，由发送完成回调补齐数据区后进入 RX FIFO；
//! - IN worker：逐帧从 RX FIFO 取出缓冲写入 bulk IN 端点，按需携带
//!   OVERFLOW 标志，完成后上报活动事件。
//!
//! CAN 控制器的 RX / 状态变化回调是 RX FIFO 的另外两个生产者。
//! 缓冲所有权在任一时刻单手持有：OUT worker → TX worker → 发送完成
//! 回调 → IN worker → 归还缓冲池。

use std::sync::{Arc, Weak};
use std::thread;

use bytes::BufMut;
use crossbeam_channel::Receiver;
use tracing::{error, trace, warn};

use crate::controller::{
    CanBusErrCnt, CanFrame, CanState, ControllerError, TxCompletion, CAN_FRAME_BRS, CAN_FRAME_ESI,
    CAN_FRAME_FDF, CAN_FRAME_IDE, CAN_FRAME_RTR,
};
use crate::device::DeviceInner;
use crate::frame::{
    HostFrameHdr, HOST_FRAME_CLASSIC_DATA_SIZE, HOST_FRAME_FD_DATA_SIZE, HOST_FRAME_FLAGS_OFFSET,
    HOST_FRAME_HDR_SIZE,
};
use crate::ops::GsUsbEvent;
use crate::pool::PooledBuf;
use crate::protocol::*;
use crate::usb::{UsbBus, UsbTransferError};

/// OUT 端点读缓冲（高速 bulk 最大包长）
const OUT_SCRATCH_SIZE: usize = 512;

/// 环境时间戳采样；失败记录错误并返回 0
fn fetch_timestamp(inner: &DeviceInner, what: &str) -> u32 {
    let Some(ref timestamp) = inner.ops.timestamp else {
        return 0;
    };

    match timestamp() {
        Ok(value) => value,
        Err(err) => {
            error!("failed to get {} timestamp (err {})", what, err.code);
            0
        }
    }
}

// ============================================================================
// TX worker：主机帧 → CAN 发送
// ============================================================================

pub(crate) fn spawn_tx_worker(weak: Weak<DeviceInner>, fifo: Receiver<PooledBuf>) {
    thread::Builder::new()
        .name("gs_usb_tx".into())
        .spawn(move || {
            while let Ok(buf) = fifo.recv() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                handle_tx_host_frame(&inner, buf);
            }
        })
        .expect("failed to spawn gs_usb_tx thread");
}

fn handle_tx_host_frame(inner: &Arc<DeviceInner>, mut buf: PooledBuf) {
    trace!("TX host frame ({} bytes)", buf.len());

    let hdr = match HostFrameHdr::unpack_from(&buf) {
        Ok(hdr) => hdr,
        Err(err) => {
            error!("{}", err);
            return;
        }
    };

    if hdr.channel as usize >= inner.channels.len() {
        error!("TX host frame for non-existing channel {}", hdr.channel);
        return;
    }

    let entry = &inner.channels[hdr.channel as usize];
    if !entry.state.started() {
        error!(
            "channel {} not started, ignoring TX host frame",
            hdr.channel
        );
        return;
    }

    let mut frame = CanFrame::default();

    if (hdr.can_id & GS_USB_CAN_ID_FLAG_IDE) != 0 {
        frame.flags |= CAN_FRAME_IDE;
        frame.id = hdr.can_id & CAN_EXT_ID_MASK;
    } else {
        frame.id = hdr.can_id & CAN_STD_ID_MASK;
    }

    // FD/BRS 仅在通道具备 FD 特性时生效；TX 从不设置 ESI
    if (entry.state.features() & GS_USB_CAN_FEATURE_FD) != 0 {
        if (hdr.flags & GS_USB_CAN_FLAG_FD) != 0 {
            frame.flags |= CAN_FRAME_FDF;
        }

        if (hdr.flags & GS_USB_CAN_FLAG_BRS) != 0 {
            frame.flags |= CAN_FRAME_BRS;
        }
    }

    frame.dlc = hdr.can_dlc;

    if (hdr.can_id & GS_USB_CAN_ID_FLAG_RTR) != 0 {
        frame.flags |= CAN_FRAME_RTR;
    } else if hdr.can_dlc != 0 {
        let nbytes = can_dlc_to_bytes(frame.dlc);
        if nbytes > buf.len() - HOST_FRAME_HDR_SIZE {
            error!(
                "TX host frame DLC exceeds buffer length ({} > {})",
                nbytes,
                buf.len() - HOST_FRAME_HDR_SIZE
            );
            return;
        }

        frame.data[..nbytes]
            .copy_from_slice(&buf[HOST_FRAME_HDR_SIZE..HOST_FRAME_HDR_SIZE + nbytes]);
    }

    // 缓冲改写为回显头部，发送完成回调补齐数据区后进入 RX FIFO
    let ch = hdr.channel as u16;
    buf.clear();
    HostFrameHdr::echo(hdr.echo_id, hdr.channel, hdr.flags).pack_to(&mut buf);

    let weak = Arc::downgrade(inner);
    let completion: TxCompletion = Box::new(move |result| {
        if let Some(inner) = weak.upgrade() {
            handle_tx_completion(&inner, ch, buf, result);
        }
    });

    if let Err(err) = entry.controller.send(&frame, completion) {
        // 协议没有向主机上报丢帧的手段
        error!("failed to enqueue CAN frame for TX (err {})", err.code);
    }
}

fn handle_tx_completion(
    inner: &Arc<DeviceInner>,
    ch: u16,
    mut buf: PooledBuf,
    result: Result<(), ControllerError>,
) {
    if let Err(err) = result {
        // 协议没有向主机上报丢帧的手段
        error!("failed to send CAN frame (err {})", err.code);
        return;
    }

    let entry = &inner.channels[ch as usize];
    let hw_timestamp = entry.state.hw_timestamp_enabled();
    let timestamp = if hw_timestamp {
        fetch_timestamp(inner, "TX")
    } else {
        0
    };

    let padding = if (buf[HOST_FRAME_FLAGS_OFFSET] & GS_USB_CAN_FLAG_FD) != 0 {
        HOST_FRAME_FD_DATA_SIZE
    } else {
        HOST_FRAME_CLASSIC_DATA_SIZE
    };
    buf.put_bytes(0, padding);

    if hw_timestamp {
        buf.put_u32_le(timestamp);
    }

    trace!("TX done");
    inner.push_rx(buf);
}

// ============================================================================
// RX FIFO 生产者：CAN 控制器回调
// ============================================================================

pub(crate) fn handle_can_rx(inner: &Arc<DeviceInner>, ch: u16, frame: &CanFrame) {
    let entry = &inner.channels[ch as usize];
    let fd_capable = (entry.state.features() & GS_USB_CAN_FEATURE_FD) != 0;

    let hw_timestamp = entry.state.hw_timestamp_enabled();
    let timestamp = if hw_timestamp {
        fetch_timestamp(inner, "RX")
    } else {
        0
    };

    let Some(mut buf) = inner.pool.alloc() else {
        error!("failed to allocate RX host frame for channel {}", ch);
        entry.state.give_overflow();
        return;
    };

    let mut can_id = frame.id;
    let mut flags = 0u8;

    if frame.is_extended() {
        can_id |= GS_USB_CAN_ID_FLAG_IDE;
    }

    if frame.is_rtr() {
        can_id |= GS_USB_CAN_ID_FLAG_RTR;
    }

    if fd_capable && frame.is_fd() {
        flags |= GS_USB_CAN_FLAG_FD;

        if (frame.flags & CAN_FRAME_BRS) != 0 {
            flags |= GS_USB_CAN_FLAG_BRS;
        }

        if (frame.flags & CAN_FRAME_ESI) != 0 {
            flags |= GS_USB_CAN_FLAG_ESI;
        }
    }

    HostFrameHdr::rx(can_id, frame.dlc, ch as u8, flags).pack_to(&mut buf);

    let data_size = if fd_capable && frame.is_fd() {
        HOST_FRAME_FD_DATA_SIZE
    } else {
        HOST_FRAME_CLASSIC_DATA_SIZE
    };
    let nbytes = can_dlc_to_bytes(frame.dlc).min(data_size);
    buf.extend_from_slice(&frame.data[..nbytes]);
    buf.put_bytes(0, data_size - nbytes);

    if hw_timestamp {
        buf.put_u32_le(timestamp);
    }

    inner.push_rx(buf);
}

pub(crate) fn handle_state_change(
    inner: &Arc<DeviceInner>,
    ch: u16,
    state: CanState,
    err_cnt: CanBusErrCnt,
) {
    // STOPPED 跃迁不上报
    if state == CanState::Stopped {
        return;
    }

    let entry = &inner.channels[ch as usize];

    let hw_timestamp = entry.state.hw_timestamp_enabled();
    let timestamp = if hw_timestamp {
        fetch_timestamp(inner, "RX")
    } else {
        0
    };

    let Some(mut buf) = inner.pool.alloc() else {
        error!("failed to allocate error frame for channel {}", ch);
        entry.state.give_overflow();
        return;
    };

    let mut can_id = GS_USB_CAN_ID_FLAG_ERR;
    let mut payload = [0u8; HOST_FRAME_CLASSIC_DATA_SIZE];

    match state {
        CanState::ErrorActive => {
            can_id |= GS_USB_CAN_ID_FLAG_ERR_CRTL;
            payload[1] |= GS_USB_CAN_ERR_CRTL_ACTIVE;

            // 从 bus-off 恢复到 error-active 时标记 restart
            if entry.state.busoff() {
                can_id |= GS_USB_CAN_ID_FLAG_ERR_RESTARTED;
            }
        }
        CanState::ErrorWarning => {
            can_id |= GS_USB_CAN_ID_FLAG_ERR_CRTL;
            payload[1] |= GS_USB_CAN_ERR_CRTL_TX_WARNING | GS_USB_CAN_ERR_CRTL_RX_WARNING;
        }
        CanState::ErrorPassive => {
            can_id |= GS_USB_CAN_ID_FLAG_ERR_CRTL;
            payload[1] |= GS_USB_CAN_ERR_CRTL_TX_PASSIVE | GS_USB_CAN_ERR_CRTL_RX_PASSIVE;
        }
        CanState::BusOff => {
            can_id |= GS_USB_CAN_ID_FLAG_ERR_BUSOFF;
        }
        CanState::Stopped => unreachable!(),
    }

    entry.state.set_busoff(state == CanState::BusOff);

    can_id |= GS_USB_CAN_ID_FLAG_ERR_CNT;
    payload[6] = err_cnt.tx_err_cnt;
    payload[7] = err_cnt.rx_err_cnt;

    let dlc = can_bytes_to_dlc(payload.len());
    HostFrameHdr::rx(can_id, dlc, ch as u8, 0).pack_to(&mut buf);
    buf.extend_from_slice(&payload);

    if hw_timestamp {
        buf.put_u32_le(timestamp);
    }

    inner.push_rx(buf);
}

// ============================================================================
// IN worker：RX FIFO → bulk IN
// ============================================================================

pub(crate) fn spawn_in_worker(weak: Weak<DeviceInner>, fifo: Receiver<PooledBuf>) {
    thread::Builder::new()
        .name("gs_usb_rx".into())
        .spawn(move || {
            while let Ok(buf) = fifo.recv() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                handle_in_host_frame(&inner, buf);
            }
        })
        .expect("failed to spawn gs_usb_rx thread");
}

fn handle_in_host_frame(inner: &Arc<DeviceInner>, mut buf: PooledBuf) {
    let hdr = match HostFrameHdr::unpack_from(&buf) {
        Ok(hdr) => hdr,
        Err(err) => {
            error!("{}", err);
            return;
        }
    };

    let ch = hdr.channel as u16;
    if ch as usize >= inner.channels.len() {
        error!("RX host frame for non-existing channel {}", ch);
        return;
    }

    let entry = &inner.channels[ch as usize];
    if entry.state.take_overflow() {
        buf[HOST_FRAME_FLAGS_OFFSET] |= GS_USB_CAN_FLAG_OVERFLOW;
    }

    trace!("RX host frame ({} bytes)", buf.len());

    let bus = inner.bus.read().clone();
    let Some(bus) = bus else {
        warn!("class not enabled, dropping IN host frame");
        return;
    };

    match bus.write_bulk_in(&buf) {
        Ok(()) => {}
        Err(UsbTransferError::Cancelled) | Err(UsbTransferError::Disconnected) => {
            warn!("IN transfer cancelled for channel {}", ch);
            return;
        }
        Err(err) => {
            error!("IN transfer failed for channel {} ({})", ch, err);
            return;
        }
    }

    drop(buf);

    // 错误帧不算总线活动
    if (hdr.can_id & GS_USB_CAN_ID_FLAG_ERR) != 0 {
        return;
    }

    let event = if hdr.is_rx_frame() {
        GsUsbEvent::ChannelActivityRx
    } else {
        GsUsbEvent::ChannelActivityTx
    };
    inner.ops.raise_event(ch, event);
}

// ============================================================================
// OUT worker：bulk OUT → TX FIFO
// ============================================================================

pub(crate) fn spawn_out_worker(weak: Weak<DeviceInner>, bus: Arc<dyn UsbBus>) {
    thread::Builder::new()
        .name("gs_usb_out".into())
        .spawn(move || {
            let mut scratch = [0u8; OUT_SCRATCH_SIZE];

            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };

                if !inner.is_enabled() {
                    break;
                }

                let n = match bus.read_bulk_out(&mut scratch) {
                    Ok(n) => n,
                    Err(UsbTransferError::Cancelled) | Err(UsbTransferError::Disconnected) => {
                        warn!("OUT transfer cancelled");
                        break;
                    }
                    Err(err) => {
                        error!("OUT transfer failed ({})", err);
                        break;
                    }
                };

                if n == 0 {
                    continue;
                }

                let Some(mut buf) = inner.pool.alloc() else {
                    error!("failed to allocate buffer for OUT transfer");
                    continue;
                };

                buf.extend_from_slice(&scratch[..n.min(scratch.len())]);
                let _ = inner.tx_fifo.send(buf);
            }
        })
        .expect("failed to spawn gs_usb_out thread");
}
