//! 固定缓冲池
//!
//! 主机帧的唯一分配来源：固定数量、固定容量的 `BytesMut` 通过
//! crossbeam 通道构成空闲链。分配是非阻塞的（控制路径与回调上下文
//! 禁止阻塞在 FIFO 上）；`PooledBuf` 在 Drop 时自动归还，工作线程
//! 在取消路径上丢弃缓冲也不会泄漏。

use std::ops::{Deref, DerefMut};

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, Sender};

/// 固定缓冲池
pub(crate) struct BufferPool {
    free: Receiver<BytesMut>,
    ret: Sender<BytesMut>,
}

impl BufferPool {
    /// 创建 `count` 个容量为 `capacity` 的缓冲
    pub fn new(count: usize, capacity: usize) -> Self {
        let (ret, free) = bounded(count);
        for _ in 0..count {
            ret.send(BytesMut::with_capacity(capacity))
                .expect("free list sized to pool count");
        }
        Self { free, ret }
    }

    /// 非阻塞分配；池耗尽返回 None
    pub fn alloc(&self) -> Option<PooledBuf> {
        let buf = self.free.try_recv().ok()?;
        Some(PooledBuf {
            buf: Some(buf),
            ret: self.ret.clone(),
        })
    }
}

/// 池缓冲：Drop 时清空并归还空闲链
pub(crate) struct PooledBuf {
    buf: Option<BytesMut>,
    ret: Sender<BytesMut>,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            // 池本身被销毁时归还失败，直接丢弃即可
            let _ = self.ret.send(buf);
        }
    }
}
