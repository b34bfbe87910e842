//! デバッグ情報プロバイダ
//!
//! セッションコアはモジュールのパスとモジュール先頭からのオフセットで問い合わせます。

use crate::{DwarfLoader, LineInfo, LineTable, Result, SymbolResolver};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// デバッグ情報の問い合わせ
pub trait DebugInfo {
    /// オフセットを含むソース行
    fn line_info(&self, module: &Path, voff: u64) -> Option<LineInfo>;

    /// オフセットを含む関数のシンボル名
    fn symbol_name(&self, module: &Path, voff: u64) -> Option<String>;
}

/// 1モジュールぶんのデバッグ情報
pub struct ModuleDebugInfo {
    lines: Option<LineTable>,
    symbols: SymbolResolver,
    image_base: u64,
}

impl ModuleDebugInfo {
    /// ELFファイルから読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let loader = DwarfLoader::load(path.as_ref())?;
        let image_base = loader.image_base();
        let symbols = SymbolResolver::new(&loader)?;
        let lines = match loader.line_context() {
            Ok(context) => Some(LineTable::new(context, image_base)),
            Err(e) => {
                tracing::warn!(path = ?path.as_ref(), error = %e, "no line table");
                None
            }
        };
        Ok(Self {
            lines,
            symbols,
            image_base,
        })
    }

    pub fn line_info(&self, voff: u64) -> Option<LineInfo> {
        self.lines.as_ref()?.lookup(voff)
    }

    pub fn symbol_name(&self, voff: u64) -> Option<String> {
        let addr = voff.checked_add(self.image_base)?;
        self.symbols
            .reverse_resolve(addr)
            .map(|sym| sym.display_name().to_string())
    }
}

/// ELF/DWARF に基づくデバッグ情報プロバイダ
///
/// モジュールは最初の問い合わせ時に一度だけ読み込みます。読み込みに失敗したモジュールも
/// 記録し、以後は問い合わせに None を返します。
#[derive(Default)]
pub struct DwarfDebugInfo {
    modules: RefCell<HashMap<PathBuf, Option<Rc<ModuleDebugInfo>>>>,
}

impl DwarfDebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// モジュールのデバッグ情報を取得する（未読み込みなら読み込む）
    pub fn module(&self, path: &Path) -> Option<Rc<ModuleDebugInfo>> {
        if let Some(cached) = self.modules.borrow().get(path) {
            return cached.clone();
        }

        let loaded = match ModuleDebugInfo::load(path) {
            Ok(info) => {
                tracing::debug!(?path, "loaded debug info");
                Some(Rc::new(info))
            }
            Err(e) => {
                tracing::warn!(?path, error = %e, "failed to load debug info");
                None
            }
        };
        self.modules
            .borrow_mut()
            .insert(path.to_path_buf(), loaded.clone());
        loaded
    }
}

impl DebugInfo for DwarfDebugInfo {
    fn line_info(&self, module: &Path, voff: u64) -> Option<LineInfo> {
        self.module(module)?.line_info(voff)
    }

    fn symbol_name(&self, module: &Path, voff: u64) -> Option<String> {
        self.module(module)?.symbol_name(voff)
    }
}
