//! Shirube 制御レイヤ境界
//!
//! このクレートは、セッションコアと実際にターゲットを操作する制御レイヤとの境界を定義します。
//! 送信メッセージ、受信イベント、トラップ、およびチャネルで接続された実装を提供します。

pub mod handle;
pub mod trap;
pub mod msg;
pub mod event;
pub mod memory;
pub mod registers;
pub mod control;

pub use handle::{Arch, CtrlHandle, MachineId};
pub use trap::{Trap, TrapFlags, TrapList};
pub use msg::{
    CtrlMsg, ExceptionFilters, FreezeState, RunParams, UserBreakpoint, UserBreakpointKind,
};
pub use event::{CtrlEvent, StopCause};
pub use memory::MemoryCache;
pub use registers::{RegisterCache, Unwind, UnwindFrame};
pub use control::{channel, ChannelControl, ControlLayer, ControlPeer};

/// 制御レイヤ操作の結果型
pub type Result<T> = anyhow::Result<T>;
