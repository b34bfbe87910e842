//! DWARFローダーとシンボル解決のテスト

use shirube_dwarf::{DebugInfo, DwarfDebugInfo, DwarfLoader, SymbolResolver};
use std::path::Path;

#[test]
fn test_load_own_test_binary() {
    // テストバイナリ自身をデバッグ対象として読み込む
    let binary_path = std::env::current_exe().expect("current exe");

    let loader = DwarfLoader::load(&binary_path)
        .expect("Failed to load DWARF from test binary");
    let resolver = SymbolResolver::new(&loader)
        .expect("Failed to create symbol resolver");

    let main_symbols = resolver.find_symbols("main");
    println!("Found {} symbols containing 'main'", main_symbols.len());
    assert!(!main_symbols.is_empty(), "Should find main symbols");

    // アドレスからシンボルを逆引き
    let first = main_symbols[0];
    let sym = resolver
        .reverse_resolve(first.address)
        .expect("symbol at its own address");
    assert_eq!(sym.address, first.address);
}

#[test]
fn test_missing_module_yields_nothing() {
    let debug_info = DwarfDebugInfo::new();
    let missing = Path::new("/nonexistent/shirube/module.so");

    assert!(debug_info.line_info(missing, 0x10).is_none());
    assert!(debug_info.symbol_name(missing, 0x10).is_none());
    // 失敗も記録され、2回目も None
    assert!(debug_info.module(missing).is_none());
}

#[test]
fn test_load_rejects_missing_file() {
    assert!(DwarfLoader::load("/nonexistent/shirube/binary").is_err());
}
