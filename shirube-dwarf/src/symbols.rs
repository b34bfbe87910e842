//! シンボル解決機能

use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol, SymbolKind};
use std::collections::HashMap;

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.address && (self.size == 0 || addr < self.address.saturating_add(self.size))
    }
}

/// シンボル名をデマングルする（Rust以外はそのまま）
fn demangle_symbol(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }
    name.to_string()
}

/// シンボル解決
pub struct SymbolResolver {
    symbols_by_name: HashMap<String, u64>,
    /// アドレス順にソート済み
    symbols_by_address: Vec<Symbol>,
}

impl SymbolResolver {
    /// オブジェクトファイルのシンボルテーブルから作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let symbols = loader
            .object_file()
            .symbols()
            .filter(|symbol| matches!(symbol.kind(), SymbolKind::Text | SymbolKind::Unknown))
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                (!name.is_empty()).then(|| Symbol::new(name.to_string(), symbol.address(), symbol.size()))
            })
            .collect();
        Ok(Self::from_symbols(symbols))
    }

    /// シンボル一覧から作成する
    pub fn from_symbols(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.address);
        let symbols_by_name = symbols
            .iter()
            .map(|s| (s.name.clone(), s.address))
            .collect();
        Self {
            symbols_by_name,
            symbols_by_address: symbols,
        }
    }

    /// シンボル名からアドレスを解決する
    pub fn resolve(&self, symbol: &str) -> Option<u64> {
        self.symbols_by_name.get(symbol).copied()
    }

    /// アドレスを含むシンボルを解決する
    ///
    /// サイズ情報がないシンボルは、次のシンボルまでを範囲とみなします。
    pub fn reverse_resolve(&self, addr: u64) -> Option<&Symbol> {
        let idx = self
            .symbols_by_address
            .partition_point(|s| s.address <= addr);
        let sym = self.symbols_by_address.get(idx.checked_sub(1)?)?;
        sym.contains(addr).then_some(sym)
    }

    /// マングル名とデマングル名の両方で部分一致検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<&Symbol> {
        self.symbols_by_address
            .iter()
            .filter(|s| s.name.contains(pattern) || s.demangled_name.contains(pattern))
            .collect()
    }
}
