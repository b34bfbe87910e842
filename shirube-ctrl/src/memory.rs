//! プロセスメモリのスナップショットキャッシュ

use crate::CtrlHandle;
use std::collections::HashMap;
use std::ops::Range;

/// 1つのメモリブロック
#[derive(Debug, Clone)]
struct MemoryBlock {
    base: u64,
    bytes: Vec<u8>,
}

impl MemoryBlock {
    fn end(&self) -> u64 {
        self.base.saturating_add(self.bytes.len() as u64)
    }

    fn covers(&self, range: &Range<u64>) -> bool {
        self.base <= range.start && range.end <= self.end()
    }
}

/// 制御レイヤから届いたメモリブロックを保持し、範囲読み取りに答える
///
/// 新しいブロックほど優先されます。メモリ世代はブロックが届くたびに進みます。
#[derive(Debug, Default)]
pub struct MemoryCache {
    blocks: HashMap<CtrlHandle, Vec<MemoryBlock>>,
    mem_gen: u64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// ブロックを追加する
    pub fn insert(&mut self, process: CtrlHandle, base: u64, bytes: Vec<u8>) {
        let blocks = self.blocks.entry(process).or_default();
        let incoming = MemoryBlock { base, bytes };
        // 完全に覆われた古いブロックは捨てる
        blocks.retain(|b| !(incoming.base <= b.base && b.end() <= incoming.end()));
        blocks.push(incoming);
        self.mem_gen += 1;
    }

    /// 範囲を読み取る
    ///
    /// 1つのブロックで範囲全体を賄えない場合は None を返します。
    pub fn read(&self, process: CtrlHandle, range: Range<u64>) -> Option<Vec<u8>> {
        if range.start > range.end {
            return None;
        }
        let blocks = self.blocks.get(&process)?;
        let block = blocks.iter().rev().find(|b| b.covers(&range))?;
        let start = (range.start - block.base) as usize;
        let end = (range.end - block.base) as usize;
        Some(block.bytes[start..end].to_vec())
    }

    /// プロセスのブロックをすべて破棄する
    pub fn forget_process(&mut self, process: CtrlHandle) {
        if self.blocks.remove(&process).is_some() {
            self.mem_gen += 1;
        }
    }

    pub fn mem_gen(&self) -> u64 {
        self.mem_gen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_inside_block() {
        let mut cache = MemoryCache::new();
        let proc_handle = CtrlHandle(1);
        cache.insert(proc_handle, 0x1000, vec![0x90, 0xe8, 0x00, 0x00, 0x00, 0x00, 0xc3]);

        assert_eq!(cache.read(proc_handle, 0x1001..0x1006), Some(vec![0xe8, 0, 0, 0, 0]));
        assert_eq!(cache.read(proc_handle, 0x1005..0x1010), None);
        assert_eq!(cache.read(CtrlHandle(2), 0x1000..0x1001), None);
    }

    #[test]
    fn test_newer_block_wins() {
        let mut cache = MemoryCache::new();
        let proc_handle = CtrlHandle(1);
        cache.insert(proc_handle, 0x1000, vec![0x00; 4]);
        cache.insert(proc_handle, 0x1000, vec![0xcc; 2]);

        assert_eq!(cache.read(proc_handle, 0x1000..0x1002), Some(vec![0xcc, 0xcc]));
        assert_eq!(cache.read(proc_handle, 0x1002..0x1004), Some(vec![0x00, 0x00]));
        assert_eq!(cache.mem_gen(), 2);
    }
}
