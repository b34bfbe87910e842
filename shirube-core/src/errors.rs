//! エラー型とユーザー向けエラーメッセージ定数

/// 実行中にステップしようとした
pub const ERR_MUST_HALT_BEFORE_STEPPING: &str = "Must halt before stepping.";

/// 凍結中のスレッドをステップしようとした
pub const ERR_MUST_THAW_BEFORE_STEPPING: &str = "Must thaw selected thread before stepping.";

/// 全スレッドが凍結されている
pub const ERR_ALL_THREADS_FROZEN: &str = "Cannot run with all threads frozen.";

/// 起動できるターゲットがない
pub const ERR_NO_ACTIVE_TARGETS: &str = "No active targets exist; cannot launch.";

/// 終了させるプロセスがない
pub const ERR_NO_PROCESSES_TO_KILL: &str = "No attached running processes exist; cannot kill.";

/// ステップアウトの戻り先が見つからない
pub const ERR_NO_RETURN_ADDRESS: &str =
    "Could not find the return address of the current callstack frame successfully.";

/// スレッドが選択されていない
pub const ERR_NO_SELECTED_THREAD: &str = "No thread is selected.";

/// 操作が許可されていない種別
pub const ERR_OPERATION_NOT_PERMITTED: &str = "Operation is not permitted on this entity.";

pub const ERR_NOT_A_THREAD: &str = "The specified entity is not a thread.";

pub const ERR_NO_PROCESSES_TO_RUN: &str = "No attached processes exist; cannot continue.";

pub const ERR_NO_PROCESS_TO_DETACH: &str = "No attached process was specified; cannot detach.";

pub const ERR_NO_PROCESS_ID: &str = "No process ID was specified; cannot attach.";

pub const ERR_NO_ADDRESS: &str = "No address was specified.";

pub const ERR_NO_LOCATION: &str = "No breakpoint location was specified.";

pub const ERR_TARGET_HAS_NO_EXECUTABLE: &str = "Target has no executable; cannot launch.";

/// 命令ポインタが読めない
pub const ERR_NO_THREAD_REGISTERS: &str = "Could not read the registers of the selected thread.";

/// コアのエラー
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("install disassembler: {0}")]
    DisAsmInit(capstone::Error),
    #[error("instruction disassembly error: {0}")]
    DisAsm(capstone::Error),
}
