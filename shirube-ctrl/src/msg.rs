//! 制御レイヤへ送信するメッセージ

use crate::{CtrlHandle, MachineId, TrapList};
use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// 実行時に停止せず通過させる例外の種別
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionFilters: u64 {
        const ACCESS_VIOLATION   = 1 << 0;
        const ILLEGAL_INSTRUCTION = 1 << 1;
        const DIVIDE_BY_ZERO     = 1 << 2;
        const STACK_OVERFLOW     = 1 << 3;
        const CPP_EXCEPTION      = 1 << 4;
        const SIGNAL             = 1 << 5;
    }
}

/// ユーザーブレークポイントの位置指定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserBreakpointKind {
    /// ソースファイルの行
    FileLine { file: PathBuf, line: u64 },
    /// 仮想アドレス
    VirtualAddress(u64),
    /// シンボル名（関数の入口）
    SymbolName(String),
}

/// 実行メッセージに同梱するユーザーブレークポイント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBreakpoint {
    pub kind: UserBreakpointKind,
    pub condition: Option<String>,
}

/// 実行時のスレッド凍結状態
///
/// `solo` が true の場合、`threads` は「このスレッドだけを動かす」指定になります。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeState {
    pub solo: bool,
    pub threads: Vec<(MachineId, CtrlHandle)>,
}

/// Run / SingleStep に共通するパラメータ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunParams {
    pub msg_id: u64,
    pub machine: MachineId,
    pub process: CtrlHandle,
    pub thread: CtrlHandle,
    pub exception_filters: ExceptionFilters,
    pub traps: TrapList,
    pub user_breakpoints: Vec<UserBreakpoint>,
    pub freeze: FreezeState,
}

/// 制御レイヤへのメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlMsg {
    Launch {
        msg_id: u64,
        cmd_line: Vec<String>,
        working_dir: PathBuf,
        env_inherit: bool,
        exception_filters: ExceptionFilters,
    },
    Attach {
        msg_id: u64,
        machine: MachineId,
        pid: u64,
    },
    Detach {
        msg_id: u64,
        machine: MachineId,
        process: CtrlHandle,
    },
    Kill {
        msg_id: u64,
        machine: MachineId,
        process: CtrlHandle,
        exit_code: u32,
    },
    Run(RunParams),
    SingleStep(RunParams),
    Halt,
    /// 停止中のスレッドの命令ポインタを書き換える
    SetThreadIp {
        machine: MachineId,
        thread: CtrlHandle,
        vaddr: u64,
    },
}

impl CtrlMsg {
    /// メッセージ種別名（ログ用）
    pub fn name(&self) -> &'static str {
        match self {
            CtrlMsg::Launch { .. } => "launch",
            CtrlMsg::Attach { .. } => "attach",
            CtrlMsg::Detach { .. } => "detach",
            CtrlMsg::Kill { .. } => "kill",
            CtrlMsg::Run(_) => "run",
            CtrlMsg::SingleStep(_) => "single_step",
            CtrlMsg::Halt => "halt",
            CtrlMsg::SetThreadIp { .. } => "set_thread_ip",
        }
    }

    /// Run / SingleStep であれば実行パラメータを返す
    pub fn run_params(&self) -> Option<&RunParams> {
        match self {
            CtrlMsg::Run(params) | CtrlMsg::SingleStep(params) => Some(params),
            _ => None,
        }
    }
}
