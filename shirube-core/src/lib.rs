//! Shirube デバッガのコア機能
//!
//! このクレートは、デバッグセッションの中核となる状態と制御を提供します。
//! エンティティストアと変更履歴、ステップ実行のトラップ網、そしてフレーム単位で
//! 制御レイヤとやり取りするセッションの制御ループを統合します。

pub mod handle;
pub mod kind;
pub mod names;
pub mod history;
pub mod entity;
pub mod disasm;
pub mod trapnet;
pub mod command;
pub mod parse;
pub mod config;
pub mod breakpoint;
pub mod errors;
pub mod session;
mod events;
mod dispatch;

pub use handle::{Entity, Handle};
pub use kind::{EntityFlags, EntityKind, KindFlags, OpFlags};
pub use history::{History, Side, WindOutcome};
pub use entity::{EntityStore, Field, MutationSignals};
pub use disasm::{CapstoneDisassembler, DecodedInst, Disassembler, InstFlags};
pub use trapnet::{LineStep, StepContext, StepError};
pub use command::{Cmd, CmdKind, CmdParams, ParamSlots};
pub use config::SessionConfig;
pub use errors::CoreError;
pub use session::{ConfigWrites, Session, StopInfo};

// 他のクレートから使用するために再エクスポート
pub use shirube_ctrl::{ControlLayer, CtrlEvent, CtrlMsg, StopCause};
pub use shirube_dwarf::{DebugInfo, LineInfo};

/// デバッガの結果型
pub type Result<T> = anyhow::Result<T>;
