//! ステップ実行用トラップ

use bitflags::bitflags;

bitflags! {
    /// トラップに付与されるステップ動作フラグ
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TrapFlags: u32 {
        const IGNORE_STACK_POINTER_CHECK = 1 << 0;
        const SINGLE_STEP_AFTER_HIT      = 1 << 1;
        const SAVE_STACK_POINTER         = 1 << 2;
        const BEGIN_SPOOF_MODE           = 1 << 3;
        const END_STEPPING               = 1 << 4;
    }
}

/// ステップ動作を伴う一時的な命令アドレスブレークポイント
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trap {
    pub flags: TrapFlags,
    pub vaddr: u64,
}

impl Trap {
    pub fn new(flags: TrapFlags, vaddr: u64) -> Self {
        Self { flags, vaddr }
    }
}

/// 1回の実行で制御レイヤへ渡すトラップの並び
///
/// 生成順を保持します。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrapList {
    traps: Vec<Trap>,
}

impl TrapList {
    pub fn new() -> Self {
        Self { traps: Vec::new() }
    }

    pub fn push(&mut self, flags: TrapFlags, vaddr: u64) {
        self.traps.push(Trap::new(flags, vaddr));
    }

    pub fn len(&self) -> usize {
        self.traps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trap> {
        self.traps.iter()
    }

    pub fn as_slice(&self) -> &[Trap] {
        &self.traps
    }
}

impl From<Vec<Trap>> for TrapList {
    fn from(traps: Vec<Trap>) -> Self {
        Self { traps }
    }
}

impl FromIterator<Trap> for TrapList {
    fn from_iter<I: IntoIterator<Item = Trap>>(iter: I) -> Self {
        Self {
            traps: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TrapList {
    type Item = &'a Trap;
    type IntoIter = std::slice::Iter<'a, Trap>;

    fn into_iter(self) -> Self::IntoIter {
        self.traps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_list_keeps_push_order() {
        let mut traps = TrapList::new();
        traps.push(TrapFlags::END_STEPPING, 0x2000);
        traps.push(TrapFlags::SINGLE_STEP_AFTER_HIT, 0x1000);

        let addrs: Vec<u64> = traps.iter().map(|t| t.vaddr).collect();
        assert_eq!(addrs, vec![0x2000, 0x1000]);
        assert_eq!(traps.len(), 2);
    }

    #[test]
    fn test_trap_flags_bits() {
        assert_eq!(TrapFlags::END_STEPPING.bits(), 1 << 4);
        let flags = TrapFlags::END_STEPPING | TrapFlags::IGNORE_STACK_POINTER_CHECK;
        assert!(flags.contains(TrapFlags::IGNORE_STACK_POINTER_CHECK));
        assert!(!flags.contains(TrapFlags::BEGIN_SPOOF_MODE));
    }
}
