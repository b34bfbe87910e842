//! 制御レイヤから受信するイベント

use crate::{Arch, CtrlHandle, MachineId, Unwind};
use std::ops::Range;
use std::path::PathBuf;

/// 停止理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopCause {
    #[default]
    Null,
    Error,
    Finished,
    EntryPoint,
    UserBreakpoint,
    InterruptedByTrap,
    InterruptedByException,
    InterruptedByHalt,
}

/// 制御レイヤからのイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlEvent {
    Started,
    Stopped {
        cause: StopCause,
        machine: MachineId,
        process: CtrlHandle,
        thread: CtrlHandle,
        vaddr: u64,
        exception_code: u32,
    },
    NewProc {
        machine: MachineId,
        process: CtrlHandle,
        pid: u64,
        arch: Arch,
    },
    NewThread {
        machine: MachineId,
        process: CtrlHandle,
        thread: CtrlHandle,
        tid: u64,
        arch: Arch,
        stack_base: u64,
        tls_root: u64,
        rip: u64,
    },
    NewModule {
        machine: MachineId,
        process: CtrlHandle,
        module: CtrlHandle,
        path: PathBuf,
        vaddr_range: Range<u64>,
    },
    EndProc {
        process: CtrlHandle,
        exit_code: u32,
    },
    EndThread {
        thread: CtrlHandle,
    },
    EndModule {
        module: CtrlHandle,
    },
    ModuleDebugInfoPathChange {
        module: CtrlHandle,
        path: PathBuf,
    },
    ThreadName {
        machine: MachineId,
        process: CtrlHandle,
        thread: CtrlHandle,
        tid: u64,
        name: String,
    },
    DebugString {
        thread: CtrlHandle,
        text: String,
    },
    MemReserve {
        process: CtrlHandle,
        range: Range<u64>,
    },
    MemCommit {
        process: CtrlHandle,
        range: Range<u64>,
    },
    MemDecommit {
        process: CtrlHandle,
        range: Range<u64>,
    },
    MemRelease {
        process: CtrlHandle,
        range: Range<u64>,
    },
    LaunchDone {
        msg_id: u64,
        process: CtrlHandle,
    },
    AttachDone {
        msg_id: u64,
        process: CtrlHandle,
    },
    KillDone {
        msg_id: u64,
    },
    DetachDone {
        msg_id: u64,
    },
    Error {
        text: String,
    },
    /// スレッドのレジスタスナップショット（クエリキャッシュ用）
    ThreadRegs {
        thread: CtrlHandle,
        rip: u64,
    },
    /// プロセスメモリのスナップショット（クエリキャッシュ用）
    MemoryBlock {
        process: CtrlHandle,
        base: u64,
        bytes: Vec<u8>,
    },
    /// スレッドのアンワインド結果（クエリキャッシュ用）
    ThreadUnwind {
        thread: CtrlHandle,
        unwind: Unwind,
    },
}

impl CtrlEvent {
    /// クエリキャッシュのみを更新するイベントかどうか
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            CtrlEvent::ThreadRegs { .. } | CtrlEvent::MemoryBlock { .. } | CtrlEvent::ThreadUnwind { .. }
        )
    }
}
