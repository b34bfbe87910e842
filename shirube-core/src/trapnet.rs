//! ステップ実行のトラップ網
//!
//! スレッドの命令ポインタ、デバッグ情報、逆アセンブル結果だけから、
//! 1回のステップ操作に必要なトラップの集合を組み立てます。呼び出し間で状態は持ちません。

use crate::disasm::{Disassembler, InstFlags};
use shirube_ctrl::{Arch, TrapFlags, TrapList, Unwind};
use shirube_dwarf::{is_hidden_line, DebugInfo};
use std::ops::Range;
use std::path::Path;

/// 隠し行で行範囲を延長する最大回数
const MAX_HIDDEN_LINE_EXTENSIONS: usize = 64;

/// トラップ網を組み立てられなかった理由
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("no line information for address {0:#x}")]
    NoLineInfo(u64),
    #[error("instruction memory unavailable at {0:#x}")]
    MemoryUnavailable(u64),
    #[error("unwind unavailable")]
    UnwindUnavailable,
    #[error("unwind has fewer than two frames")]
    UnwindTooShallow,
    #[error("unwind is stale (computed at register generation {unwind_gen}, now {reg_gen})")]
    StaleUnwind { unwind_gen: u64, reg_gen: u64 },
}

/// 行ステップの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStep {
    Into,
    Over,
}

/// トラップ網の入力
pub struct StepContext<'a> {
    pub arch: Arch,
    pub rip: u64,
    /// 命令ポインタを含むモジュールのパスとロードベース
    pub module: Option<(&'a Path, u64)>,
    pub read_memory: &'a dyn Fn(Range<u64>) -> Option<Vec<u8>>,
    pub debug_info: &'a dyn DebugInfo,
    pub disasm: &'a dyn Disassembler,
}

/// 命令単位のステップオーバー
///
/// 命令ポインタの命令が呼び出しかリピート命令なら、その直後に終了トラップを1つ置きます。
/// それ以外は空を返し、呼び出し側は単純なシングルステップで代用します。
pub fn inst_step_over(ctx: &StepContext<'_>) -> TrapList {
    let mut traps = TrapList::new();
    let read_end = ctx.rip.saturating_add(ctx.arch.max_instruction_size());
    let Some(bytes) = (ctx.read_memory)(ctx.rip..read_end) else {
        return traps;
    };
    let Some(inst) = ctx.disasm.decode(ctx.arch, ctx.rip, &bytes) else {
        return traps;
    };
    if inst
        .flags
        .intersects(InstFlags::CALL | InstFlags::REPEATS)
    {
        traps.push(TrapFlags::END_STEPPING, ctx.rip.wrapping_add(inst.size));
    }
    traps
}

/// 命令ポインタを含むソース行の仮想アドレス範囲
///
/// 直後に隠し行（0xf00f00 / 0xfeefee）が続く場合は範囲をその先まで延ばします。
pub fn line_vaddr_range(ctx: &StepContext<'_>) -> Result<Range<u64>, StepError> {
    let (path, base) = ctx.module.ok_or(StepError::NoLineInfo(ctx.rip))?;
    let voff = ctx.rip.wrapping_sub(base);
    let line = ctx
        .debug_info
        .line_info(path, voff)
        .ok_or(StepError::NoLineInfo(ctx.rip))?;

    let mut range = line.voff_range.clone();
    for _ in 0..MAX_HIDDEN_LINE_EXTENSIONS {
        match ctx.debug_info.line_info(path, range.end) {
            Some(next) if is_hidden_line(next.line) && next.voff_range.start == range.end => {
                range.end = next.voff_range.end;
            }
            _ => break,
        }
    }
    Ok(range.start.wrapping_add(base)..range.end.wrapping_add(base))
}

/// 行単位のステップイン/ステップオーバー
pub fn line_step(ctx: &StepContext<'_>, step: LineStep) -> Result<TrapList, StepError> {
    let range = line_vaddr_range(ctx)?;
    let bytes =
        (ctx.read_memory)(range.clone()).ok_or(StepError::MemoryUnavailable(range.start))?;

    let into = step == LineStep::Into;
    let mut traps = TrapList::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let vaddr = range.start.wrapping_add(offset as u64);
        let Some(inst) = ctx.disasm.decode(ctx.arch, vaddr, &bytes[offset..]) else {
            tracing::debug!(vaddr, "stopped scanning line at undecodable instruction");
            break;
        };
        if inst.size == 0 {
            break;
        }

        if inst.flags.contains(InstFlags::CALL) {
            let flags = if into {
                TrapFlags::END_STEPPING
                    | TrapFlags::SINGLE_STEP_AFTER_HIT
                    | TrapFlags::IGNORE_STACK_POINTER_CHECK
            } else {
                TrapFlags::SINGLE_STEP_AFTER_HIT | TrapFlags::BEGIN_SPOOF_MODE
            };
            traps.push(flags, vaddr);
        } else if inst.is_jump() {
            match inst.jump_dest {
                Some(dest) if range.contains(&dest) => {}
                Some(dest) => {
                    let mut flags = TrapFlags::END_STEPPING;
                    if into {
                        flags |= TrapFlags::IGNORE_STACK_POINTER_CHECK;
                    }
                    traps.push(flags, dest);
                }
                None => {
                    let mut flags = TrapFlags::END_STEPPING | TrapFlags::SINGLE_STEP_AFTER_HIT;
                    if into {
                        flags |= TrapFlags::IGNORE_STACK_POINTER_CHECK;
                    }
                    traps.push(flags, vaddr);
                }
            }
        } else if inst.flags.contains(InstFlags::RETURN) {
            traps.push(
                TrapFlags::END_STEPPING | TrapFlags::SINGLE_STEP_AFTER_HIT,
                vaddr,
            );
        } else if inst.flags.contains(InstFlags::CHANGES_STACK_POINTER) {
            traps.push(
                TrapFlags::SINGLE_STEP_AFTER_HIT | TrapFlags::SAVE_STACK_POINTER,
                vaddr,
            );
        }

        offset += inst.size as usize;
    }

    traps.push(TrapFlags::END_STEPPING, range.end);
    Ok(traps)
}

/// ステップアウト
///
/// 呼び出し元フレームの戻りアドレスに終了トラップを1つ置きます。アンワインドが
/// 現在のレジスタ世代より古い場合は使いません。
pub fn step_out(unwind: Option<&Unwind>, unwind_gen: u64, reg_gen: u64) -> Result<TrapList, StepError> {
    let unwind = unwind.ok_or(StepError::UnwindUnavailable)?;
    if unwind_gen != reg_gen {
        return Err(StepError::StaleUnwind { unwind_gen, reg_gen });
    }
    let caller = unwind.frames.get(1).ok_or(StepError::UnwindTooShallow)?;
    let mut traps = TrapList::new();
    traps.push(
        TrapFlags::END_STEPPING | TrapFlags::IGNORE_STACK_POINTER_CHECK,
        caller.rip,
    );
    Ok(traps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::{CapstoneDisassembler, DecodedInst};
    use shirube_ctrl::{Trap, UnwindFrame};
    use shirube_dwarf::LineInfo;
    use std::collections::HashMap;

    struct FakeDisasm(HashMap<u64, DecodedInst>);

    impl Disassembler for FakeDisasm {
        fn decode(&self, _arch: Arch, vaddr: u64, _bytes: &[u8]) -> Option<DecodedInst> {
            self.0.get(&vaddr).copied()
        }
    }

    /// (開始, 終了, 行) の表
    struct FakeLines(Vec<(u64, u64, u32)>);

    impl DebugInfo for FakeLines {
        fn line_info(&self, _module: &Path, voff: u64) -> Option<LineInfo> {
            self.0
                .iter()
                .find(|(start, end, _)| (*start..*end).contains(&voff))
                .map(|&(start, end, line)| LineInfo {
                    file: "main.rs".to_string(),
                    line,
                    column: None,
                    voff_range: start..end,
                })
        }

        fn symbol_name(&self, _module: &Path, _voff: u64) -> Option<String> {
            None
        }
    }

    fn inst(size: u64, flags: InstFlags, jump_dest: Option<u64>) -> DecodedInst {
        DecodedInst {
            size,
            flags,
            jump_dest,
        }
    }

    fn zeros(range: Range<u64>) -> Option<Vec<u8>> {
        Some(vec![0; (range.end - range.start) as usize])
    }

    /// 0x1000..0x1010 の1行: mov / je (行内) / call / mov
    fn line_with_jump_and_call() -> FakeDisasm {
        FakeDisasm(HashMap::from([
            (0x1000, inst(3, InstFlags::empty(), None)),
            (0x1003, inst(2, InstFlags::BRANCH, Some(0x100a))),
            (0x1005, inst(5, InstFlags::CALL, Some(0x2000))),
            (0x100a, inst(6, InstFlags::empty(), None)),
        ]))
    }

    fn ctx<'a>(
        rip: u64,
        lines: &'a FakeLines,
        disasm: &'a dyn Disassembler,
        read: &'a dyn Fn(Range<u64>) -> Option<Vec<u8>>,
    ) -> StepContext<'a> {
        StepContext {
            arch: Arch::X64,
            rip,
            module: Some((Path::new("/bin/app"), 0)),
            read_memory: read,
            debug_info: lines,
            disasm,
        }
    }

    #[test]
    fn test_inst_step_over_call_rel32() {
        let disasm = CapstoneDisassembler::new().unwrap();
        let lines = FakeLines(vec![]);
        let a = 0x401000;
        let read = move |r: Range<u64>| {
            let mut code = vec![0xe8, 0x00, 0x01, 0x00, 0x00];
            code.resize((r.end - r.start) as usize, 0x90);
            Some(code)
        };
        let traps = inst_step_over(&ctx(a, &lines, &disasm, &read));
        assert_eq!(traps.as_slice(), &[Trap::new(TrapFlags::END_STEPPING, a + 5)]);
    }

    #[test]
    fn test_inst_step_over_plain_instruction_is_empty() {
        let disasm = FakeDisasm(HashMap::from([(0x1000, inst(3, InstFlags::empty(), None))]));
        let lines = FakeLines(vec![]);
        let traps = inst_step_over(&ctx(0x1000, &lines, &disasm, &zeros));
        assert!(traps.is_empty());
    }

    #[test]
    fn test_inst_step_over_rep() {
        let disasm = FakeDisasm(HashMap::from([(0x1000, inst(2, InstFlags::REPEATS, None))]));
        let lines = FakeLines(vec![]);
        let traps = inst_step_over(&ctx(0x1000, &lines, &disasm, &zeros));
        assert_eq!(traps.as_slice(), &[Trap::new(TrapFlags::END_STEPPING, 0x1002)]);
    }

    #[test]
    fn test_line_step_over_internal_jump_and_call() {
        let disasm = line_with_jump_and_call();
        let lines = FakeLines(vec![(0x1000, 0x1010, 7)]);
        let traps = line_step(&ctx(0x1003, &lines, &disasm, &zeros), LineStep::Over).unwrap();
        assert_eq!(
            traps.as_slice(),
            &[
                Trap::new(
                    TrapFlags::SINGLE_STEP_AFTER_HIT | TrapFlags::BEGIN_SPOOF_MODE,
                    0x1005
                ),
                Trap::new(TrapFlags::END_STEPPING, 0x1010),
            ]
        );
    }

    #[test]
    fn test_line_step_into_traps_call_site() {
        let disasm = line_with_jump_and_call();
        let lines = FakeLines(vec![(0x1000, 0x1010, 7)]);
        let traps = line_step(&ctx(0x1000, &lines, &disasm, &zeros), LineStep::Into).unwrap();
        assert_eq!(
            traps.as_slice(),
            &[
                Trap::new(
                    TrapFlags::END_STEPPING
                        | TrapFlags::SINGLE_STEP_AFTER_HIT
                        | TrapFlags::IGNORE_STACK_POINTER_CHECK,
                    0x1005
                ),
                Trap::new(TrapFlags::END_STEPPING, 0x1010),
            ]
        );
    }

    #[test]
    fn test_line_step_exit_kinds() {
        let disasm = FakeDisasm(HashMap::from([
            (0x1000, inst(1, InstFlags::CHANGES_STACK_POINTER, None)),
            (0x1001, inst(2, InstFlags::UNCONDITIONAL_JUMP, Some(0x3000))),
            (0x1003, inst(2, InstFlags::UNCONDITIONAL_JUMP, None)),
            (0x1005, inst(1, InstFlags::RETURN, None)),
        ]));
        let lines = FakeLines(vec![(0x1000, 0x1006, 3)]);

        let over = line_step(&ctx(0x1000, &lines, &disasm, &zeros), LineStep::Over).unwrap();
        assert_eq!(
            over.as_slice(),
            &[
                Trap::new(
                    TrapFlags::SINGLE_STEP_AFTER_HIT | TrapFlags::SAVE_STACK_POINTER,
                    0x1000
                ),
                Trap::new(TrapFlags::END_STEPPING, 0x3000),
                Trap::new(
                    TrapFlags::END_STEPPING | TrapFlags::SINGLE_STEP_AFTER_HIT,
                    0x1003
                ),
                Trap::new(
                    TrapFlags::END_STEPPING | TrapFlags::SINGLE_STEP_AFTER_HIT,
                    0x1005
                ),
                Trap::new(TrapFlags::END_STEPPING, 0x1006),
            ]
        );

        let into = line_step(&ctx(0x1000, &lines, &disasm, &zeros), LineStep::Into).unwrap();
        assert_eq!(
            into.as_slice()[1],
            Trap::new(
                TrapFlags::END_STEPPING | TrapFlags::IGNORE_STACK_POINTER_CHECK,
                0x3000
            )
        );
        assert_eq!(
            into.as_slice()[2],
            Trap::new(
                TrapFlags::END_STEPPING
                    | TrapFlags::SINGLE_STEP_AFTER_HIT
                    | TrapFlags::IGNORE_STACK_POINTER_CHECK,
                0x1003
            )
        );
    }

    #[test]
    fn test_line_range_extends_over_hidden_lines() {
        let disasm = FakeDisasm(HashMap::new());
        let lines = FakeLines(vec![
            (0x1000, 0x1008, 10),
            (0x1008, 0x1010, 0xfeefee),
            (0x1010, 0x1018, 0xf00f00),
            (0x1018, 0x1020, 11),
        ]);
        let c = ctx(0x1004, &lines, &disasm, &zeros);
        assert_eq!(line_vaddr_range(&c).unwrap(), 0x1000..0x1018);
        let traps = line_step(&c, LineStep::Over).unwrap();
        assert_eq!(traps.as_slice(), &[Trap::new(TrapFlags::END_STEPPING, 0x1018)]);
    }

    #[test]
    fn test_line_step_applies_module_base() {
        let disasm = FakeDisasm(HashMap::new());
        let lines = FakeLines(vec![(0x100, 0x110, 1)]);
        let read = zeros;
        let c = StepContext {
            module: Some((Path::new("/lib/libfoo.so"), 0x7f00_0000)),
            ..ctx(0x7f00_0104, &lines, &disasm, &read)
        };
        let traps = line_step(&c, LineStep::Over).unwrap();
        assert_eq!(
            traps.as_slice(),
            &[Trap::new(TrapFlags::END_STEPPING, 0x7f00_0110)]
        );
    }

    #[test]
    fn test_inst_step_over_call_at_top_of_address_space() {
        let rip = u64::MAX - 1;
        let disasm = FakeDisasm(HashMap::from([(rip, inst(5, InstFlags::CALL, None))]));
        let lines = FakeLines(vec![]);
        let traps = inst_step_over(&ctx(rip, &lines, &disasm, &zeros));
        assert_eq!(traps.as_slice(), &[Trap::new(TrapFlags::END_STEPPING, 3)]);
    }

    #[test]
    fn test_line_range_wraps_with_module_base() {
        let disasm = FakeDisasm(HashMap::new());
        let lines = FakeLines(vec![(u64::MAX - 0x1f, u64::MAX - 0x7, 1)]);
        let read = zeros;
        let c = StepContext {
            module: Some((Path::new("/lib/libfoo.so"), 0x20)),
            ..ctx(0x10, &lines, &disasm, &read)
        };
        assert_eq!(line_vaddr_range(&c).unwrap(), 0..0x18);
    }

    #[test]
    fn test_line_step_without_line_info() {
        let disasm = FakeDisasm(HashMap::new());
        let lines = FakeLines(vec![]);
        let err = line_step(&ctx(0x1000, &lines, &disasm, &zeros), LineStep::Over).unwrap_err();
        assert_eq!(err, StepError::NoLineInfo(0x1000));
    }

    #[test]
    fn test_step_out() {
        let unwind = Unwind::new(vec![
            UnwindFrame { rip: 0x1000, rsp: 0x7000 },
            UnwindFrame { rip: 0x2040, rsp: 0x7040 },
        ]);
        let traps = step_out(Some(&unwind), 3, 3).unwrap();
        assert_eq!(
            traps.as_slice(),
            &[Trap::new(
                TrapFlags::END_STEPPING | TrapFlags::IGNORE_STACK_POINTER_CHECK,
                0x2040
            )]
        );
    }

    #[test]
    fn test_step_out_failures() {
        let shallow = Unwind::new(vec![UnwindFrame { rip: 0x1000, rsp: 0x7000 }]);
        assert_eq!(step_out(None, 0, 0), Err(StepError::UnwindUnavailable));
        assert_eq!(step_out(Some(&shallow), 1, 1), Err(StepError::UnwindTooShallow));
        assert_eq!(
            step_out(Some(&shallow), 1, 2),
            Err(StepError::StaleUnwind {
                unwind_gen: 1,
                reg_gen: 2
            })
        );
    }
}
