//! ブレークポイント管理
//!
//! ブレークポイントはエンティティとして保持されます。テキスト位置のブレークポイントは
//! File エンティティの子、アドレスと関数名のブレークポイントはルートの子です。
//! 位置は vaddr、テキスト位置、名前の順に優先されます。

use crate::entity::EntityStore;
use crate::kind::EntityKind;
use crate::Entity;
use shirube_ctrl::{UserBreakpoint, UserBreakpointKind};
use std::path::{Path, PathBuf};

/// 停止位置の情報
#[derive(Debug, Clone, Copy, Default)]
pub struct StopSite<'a> {
    pub vaddr: u64,
    pub file: Option<&'a str>,
    pub line: Option<u64>,
    pub symbol: Option<&'a str>,
}

/// ブレークポイントエンティティの位置指定
pub fn location_of(store: &EntityStore, bp: Entity) -> Option<UserBreakpointKind> {
    if let Some(vaddr) = store.vaddr(bp) {
        return Some(UserBreakpointKind::VirtualAddress(vaddr));
    }
    if let Some((line, _)) = store.text_point(bp) {
        let file = store.ancestor_of_kind(bp, EntityKind::File);
        if file.is_nil() {
            return None;
        }
        return Some(UserBreakpointKind::FileLine {
            file: PathBuf::from(store.name(file)),
            line,
        });
    }
    let name = store.name(bp);
    (!name.is_empty()).then(|| UserBreakpointKind::SymbolName(name.to_string()))
}

/// 有効なブレークポイントを実行メッセージ用に集める
pub fn user_breakpoints(store: &EntityStore) -> Vec<UserBreakpoint> {
    store
        .entities_of_kind(EntityKind::Breakpoint)
        .into_iter()
        .filter(|&bp| !store.is_disabled(bp))
        .filter_map(|bp| {
            let kind = location_of(store, bp)?;
            let condition = store.child_of_kind(bp, EntityKind::Condition);
            let condition = (!condition.is_nil() && !store.name(condition).is_empty())
                .then(|| store.name(condition).to_string());
            Some(UserBreakpoint { kind, condition })
        })
        .collect()
}

/// 停止位置に一致する有効なブレークポイント
pub fn breakpoints_hit(store: &EntityStore, site: &StopSite<'_>) -> Vec<Entity> {
    store
        .entities_of_kind(EntityKind::Breakpoint)
        .into_iter()
        .filter(|&bp| !store.is_disabled(bp))
        .filter(|&bp| match location_of(store, bp) {
            Some(UserBreakpointKind::VirtualAddress(vaddr)) => vaddr == site.vaddr,
            Some(UserBreakpointKind::FileLine { file, line }) => {
                site.line == Some(line)
                    && site.file.is_some_and(|f| Path::new(f).ends_with(&file))
            }
            Some(UserBreakpointKind::SymbolName(name)) => site.symbol == Some(name.as_str()),
            None => false,
        })
        .collect()
}

/// ヒットしたブレークポイントのカウントを進め、ヒット数を返す
pub fn record_hits(store: &mut EntityStore, site: &StopSite<'_>) -> usize {
    let hits = breakpoints_hit(store, site);
    for &bp in &hits {
        let count = store.value(bp) + 1;
        store.equip_value(bp, count);
    }
    hits.len()
}

/// ヒット数を 0 に戻す（0 のものには触れない）
pub fn reset_hit_counts(store: &mut EntityStore) {
    for bp in store.entities_of_kind(EntityKind::Breakpoint) {
        if store.value(bp) != 0 {
            store.equip_value(bp, 0);
        }
    }
}

pub fn find_file(store: &EntityStore, path: &Path) -> Entity {
    store.child_from_name_and_kind(store.root(), &path.to_string_lossy(), EntityKind::File)
}

pub fn find_or_create_file(store: &mut EntityStore, path: &Path) -> Entity {
    let file = find_file(store, path);
    if !file.is_nil() {
        return file;
    }
    let file = store.alloc(Entity::NIL, EntityKind::File, None);
    store.equip_name(file, &path.to_string_lossy(), None);
    file
}

/// ファイルの指定行にあるブレークポイント
pub fn find_text_breakpoint(store: &EntityStore, path: &Path, line: u64) -> Entity {
    let file = find_file(store, path);
    store
        .children(file)
        .find(|&bp| {
            store.kind(bp) == EntityKind::Breakpoint
                && !store.is_deleted(bp)
                && store.text_point(bp).is_some_and(|(l, _)| l == line)
        })
        .unwrap_or(Entity::NIL)
}

pub fn find_address_breakpoint(store: &EntityStore, vaddr: u64) -> Entity {
    store
        .entities_of_kind(EntityKind::Breakpoint)
        .into_iter()
        .find(|&bp| store.vaddr(bp) == Some(vaddr))
        .unwrap_or(Entity::NIL)
}

pub fn find_function_breakpoint(store: &EntityStore, symbol: &str) -> Entity {
    store
        .entities_of_kind(EntityKind::Breakpoint)
        .into_iter()
        .find(|&bp| {
            store.vaddr(bp).is_none() && store.text_point(bp).is_none() && store.name(bp) == symbol
        })
        .unwrap_or(Entity::NIL)
}
