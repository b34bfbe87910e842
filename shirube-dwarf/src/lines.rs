//! ソース行情報

use crate::loader::DwarfReader;
use std::ops::Range;

/// 1行ぶんの行テーブル行を連結する上限
const MAX_MERGED_ROWS: usize = 256;

/// ソース行情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    /// この行に属するモジュール先頭からのオフセット範囲
    pub voff_range: Range<u64>,
}

/// Just-My-Code の「隠し行」マーカーかどうか
pub fn is_hidden_line(line: u32) -> bool {
    line == 0xf00f00 || line == 0xfeefee
}

/// addr2line による行テーブル検索
pub struct LineTable {
    context: addr2line::Context<DwarfReader>,
    image_base: u64,
}

impl LineTable {
    pub fn new(context: addr2line::Context<DwarfReader>, image_base: u64) -> Self {
        Self {
            context,
            image_base,
        }
    }

    /// オフセットを含む行の情報を返す
    ///
    /// 同じファイル・行を持つ連続した行テーブル行は1つの範囲にまとめます。
    pub fn lookup(&self, voff: u64) -> Option<LineInfo> {
        let svma = voff.checked_add(self.image_base)?;
        let (start, len, location) = self.row_at(svma)?;
        let line = location.0?;
        let file = location.1.clone();
        let column = location.2;

        let mut end = start.checked_add(len)?;
        for _ in 0..MAX_MERGED_ROWS {
            match self.row_at(end) {
                Some((next_start, next_len, next))
                    if next_start == end && next.0 == Some(line) && next.1 == file && next_len > 0 =>
                {
                    end = next_start + next_len;
                }
                _ => break,
            }
        }

        Some(LineInfo {
            file: file.unwrap_or_default(),
            line,
            column,
            voff_range: (start - self.image_base)..(end - self.image_base),
        })
    }

    /// アドレスを含む行テーブル行 (開始, 長さ, (行, ファイル, 列))
    #[allow(clippy::type_complexity)]
    fn row_at(&self, svma: u64) -> Option<(u64, u64, (Option<u32>, Option<String>, Option<u32>))> {
        let mut rows = self
            .context
            .find_location_range(svma, svma.checked_add(1)?)
            .ok()?;
        let (start, len, location) = rows.next()?;
        if start < self.image_base {
            return None;
        }
        Some((
            start,
            len,
            (location.line, location.file.map(str::to_string), location.column),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_line_markers() {
        assert!(is_hidden_line(0xf00f00));
        assert!(is_hidden_line(0xfeefee));
        assert!(!is_hidden_line(42));
    }
}
