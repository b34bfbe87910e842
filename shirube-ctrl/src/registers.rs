//! スレッドのレジスタとアンワインドのキャッシュ

use crate::CtrlHandle;
use std::collections::HashMap;

/// アンワインドの1フレーム
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindFrame {
    pub rip: u64,
    pub rsp: u64,
}

/// スレッドのコールスタック（先頭が現在のフレーム）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unwind {
    pub frames: Vec<UnwindFrame>,
}

impl Unwind {
    pub fn new(frames: Vec<UnwindFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// スレッドごとの命令ポインタとアンワインドを保持する
///
/// レジスタ世代はスナップショットが届くたびに進みます。
#[derive(Debug, Default)]
pub struct RegisterCache {
    rips: HashMap<CtrlHandle, u64>,
    unwinds: HashMap<CtrlHandle, Unwind>,
    reg_gen: u64,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命令ポインタを更新する
    ///
    /// 命令ポインタが変わるとそのスレッドのアンワインドは古くなるため破棄します。
    pub fn set_rip(&mut self, thread: CtrlHandle, rip: u64) {
        if self.rips.insert(thread, rip) != Some(rip) {
            self.unwinds.remove(&thread);
        }
        self.reg_gen += 1;
    }

    pub fn set_unwind(&mut self, thread: CtrlHandle, unwind: Unwind) {
        self.unwinds.insert(thread, unwind);
        self.reg_gen += 1;
    }

    pub fn rip(&self, thread: CtrlHandle) -> Option<u64> {
        self.rips.get(&thread).copied()
    }

    pub fn unwind(&self, thread: CtrlHandle) -> Option<&Unwind> {
        self.unwinds.get(&thread)
    }

    pub fn forget_thread(&mut self, thread: CtrlHandle) {
        self.rips.remove(&thread);
        self.unwinds.remove(&thread);
        self.reg_gen += 1;
    }

    pub fn reg_gen(&self) -> u64 {
        self.reg_gen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rip_change_drops_unwind() {
        let mut regs = RegisterCache::new();
        let thread = CtrlHandle(7);
        regs.set_rip(thread, 0x1000);
        regs.set_unwind(
            thread,
            Unwind::new(vec![UnwindFrame { rip: 0x1000, rsp: 0x7ff0 }]),
        );
        assert!(regs.unwind(thread).is_some());

        regs.set_rip(thread, 0x1000);
        assert!(regs.unwind(thread).is_some());

        regs.set_rip(thread, 0x1004);
        assert!(regs.unwind(thread).is_none());
        assert_eq!(regs.rip(thread), Some(0x1004));
    }
}
