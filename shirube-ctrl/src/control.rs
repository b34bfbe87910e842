//! 制御レイヤとのインターフェース
//!
//! セッションコアは `ControlLayer` トレイト越しにのみ制御レイヤと通信します。
//! `ChannelControl` はメッセージとイベントを tokio の mpsc チャネルで受け渡す実装で、
//! 反対側の `ControlPeer` を実際にターゲットを操作する側が保持します。

use crate::{CtrlEvent, CtrlHandle, CtrlMsg, MemoryCache, RegisterCache, Unwind};
use std::ops::Range;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// セッションコアから見た制御レイヤ
pub trait ControlLayer {
    /// メッセージをまとめて送信する。失敗した場合は false を返し、呼び出し側が再送する
    fn send(&mut self, msgs: Vec<CtrlMsg>) -> bool;

    /// 届いているイベントを発行順にすべて取り出す
    fn poll_events(&mut self) -> Vec<CtrlEvent>;

    /// 実行中のターゲットに停止を要求する
    fn halt(&mut self);

    /// スレッドの命令ポインタ
    fn thread_rip(&self, thread: CtrlHandle) -> Option<u64>;

    /// プロセスメモリの読み取り
    fn read_memory(&self, process: CtrlHandle, range: Range<u64>) -> Option<Vec<u8>>;

    /// スレッドのアンワインド
    fn unwind(&self, thread: CtrlHandle) -> Option<Unwind>;

    /// レジスタ世代
    fn reg_gen(&self) -> u64;

    /// メモリ世代
    fn mem_gen(&self) -> u64;
}

/// チャネルで接続された制御レイヤ（セッション側）
pub struct ChannelControl {
    msg_tx: UnboundedSender<CtrlMsg>,
    event_rx: UnboundedReceiver<CtrlEvent>,
    registers: RegisterCache,
    memory: MemoryCache,
}

/// チャネルで接続された制御レイヤ（ターゲット操作側）
pub struct ControlPeer {
    msg_rx: UnboundedReceiver<CtrlMsg>,
    event_tx: UnboundedSender<CtrlEvent>,
}

/// 接続済みの `ChannelControl` と `ControlPeer` の組を作成する
pub fn channel() -> (ChannelControl, ControlPeer) {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        ChannelControl {
            msg_tx,
            event_rx,
            registers: RegisterCache::new(),
            memory: MemoryCache::new(),
        },
        ControlPeer { msg_rx, event_tx },
    )
}

impl ChannelControl {
    /// スナップショットイベントをキャッシュへ取り込む
    ///
    /// キャッシュ用イベントであれば true を返します。
    fn absorb(&mut self, event: &CtrlEvent) -> bool {
        match event {
            CtrlEvent::ThreadRegs { thread, rip } => {
                self.registers.set_rip(*thread, *rip);
                true
            }
            CtrlEvent::MemoryBlock { process, base, bytes } => {
                self.memory.insert(*process, *base, bytes.clone());
                true
            }
            CtrlEvent::ThreadUnwind { thread, unwind } => {
                self.registers.set_unwind(*thread, unwind.clone());
                true
            }
            CtrlEvent::NewThread { thread, rip, .. } => {
                self.registers.set_rip(*thread, *rip);
                false
            }
            CtrlEvent::EndThread { thread } => {
                self.registers.forget_thread(*thread);
                false
            }
            CtrlEvent::EndProc { process, .. } => {
                self.memory.forget_process(*process);
                false
            }
            _ => false,
        }
    }
}

impl ControlLayer for ChannelControl {
    fn send(&mut self, msgs: Vec<CtrlMsg>) -> bool {
        for msg in msgs {
            tracing::debug!(kind = msg.name(), "ctrl send");
            if self.msg_tx.send(msg).is_err() {
                tracing::warn!("control peer disconnected; messages kept for retry");
                return false;
            }
        }
        true
    }

    fn poll_events(&mut self) -> Vec<CtrlEvent> {
        let mut events = Vec::new();
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    if !self.absorb(&event) {
                        events.push(event);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    fn halt(&mut self) {
        if self.msg_tx.send(CtrlMsg::Halt).is_err() {
            tracing::warn!("control peer disconnected; halt dropped");
        }
    }

    fn thread_rip(&self, thread: CtrlHandle) -> Option<u64> {
        self.registers.rip(thread)
    }

    fn read_memory(&self, process: CtrlHandle, range: Range<u64>) -> Option<Vec<u8>> {
        self.memory.read(process, range)
    }

    fn unwind(&self, thread: CtrlHandle) -> Option<Unwind> {
        self.registers.unwind(thread).cloned()
    }

    fn reg_gen(&self) -> u64 {
        self.registers.reg_gen()
    }

    fn mem_gen(&self) -> u64 {
        self.memory.mem_gen()
    }
}

impl ControlPeer {
    /// 届いているメッセージをすべて取り出す
    pub fn drain_messages(&mut self) -> Vec<CtrlMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.msg_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// メッセージを1つ待つ（非同期の制御レイヤ実装向け）
    pub async fn recv(&mut self) -> Option<CtrlMsg> {
        self.msg_rx.recv().await
    }

    /// イベントを送信する
    pub fn emit(&self, event: CtrlEvent) -> crate::Result<()> {
        self.event_tx
            .send(event)
            .map_err(|e| anyhow::anyhow!("Failed to emit control event: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RunParams, StopCause, UnwindFrame};

    #[test]
    fn test_messages_reach_peer_in_order() {
        let (mut ctrl, mut peer) = channel();
        assert!(ctrl.send(vec![
            CtrlMsg::Run(RunParams::default()),
            CtrlMsg::SingleStep(RunParams::default()),
        ]));
        ctrl.halt();

        let names: Vec<&str> = peer.drain_messages().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["run", "single_step", "halt"]);
    }

    #[test]
    fn test_send_fails_when_peer_dropped() {
        let (mut ctrl, peer) = channel();
        drop(peer);
        assert!(!ctrl.send(vec![CtrlMsg::Halt]));
    }

    #[test]
    fn test_snapshot_events_fill_query_cache() {
        let (mut ctrl, peer) = channel();
        let thread = CtrlHandle(3);
        let process = CtrlHandle(2);

        peer.emit(CtrlEvent::ThreadRegs { thread, rip: 0x401000 }).unwrap();
        peer.emit(CtrlEvent::MemoryBlock {
            process,
            base: 0x401000,
            bytes: vec![0xc3],
        })
        .unwrap();
        peer.emit(CtrlEvent::ThreadUnwind {
            thread,
            unwind: Unwind::new(vec![UnwindFrame { rip: 0x401000, rsp: 0x100 }]),
        })
        .unwrap();
        peer.emit(CtrlEvent::Stopped {
            cause: StopCause::InterruptedByHalt,
            machine: Default::default(),
            process,
            thread,
            vaddr: 0,
            exception_code: 0,
        })
        .unwrap();

        let events = ctrl.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(ctrl.thread_rip(thread), Some(0x401000));
        assert_eq!(ctrl.read_memory(process, 0x401000..0x401001), Some(vec![0xc3]));
        assert_eq!(ctrl.unwind(thread).map(|u| u.len()), Some(1));
        assert!(ctrl.reg_gen() >= 2);
        assert_eq!(ctrl.mem_gen(), 1);
    }
}
