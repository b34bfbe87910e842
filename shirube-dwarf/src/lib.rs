//! Shirube DWARF デバッグ情報解析
//!
//! このクレートは、ELFファイルとDWARFデバッグ情報の解析機能を提供します。
//! モジュール内オフセットからソース行範囲とシンボル名を求めます。

pub mod loader;
pub mod symbols;
pub mod lines;
pub mod debug_info;

pub use loader::DwarfLoader;
pub use symbols::{Symbol, SymbolResolver};
pub use lines::{is_hidden_line, LineInfo, LineTable};
pub use debug_info::{DebugInfo, DwarfDebugInfo, ModuleDebugInfo};

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
