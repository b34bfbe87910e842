//! 逆アセンブル機能
//!
//! 1命令をデコードし、制御フローに影響する性質（呼び出し、分岐、リターン、
//! スタックポインタ変更、リピート）と分岐先を返します。ステップ実行のトラップ網は
//! この結果だけを使って組み立てられます。

use crate::errors::CoreError;
use bitflags::bitflags;
use capstone::arch::x86::X86OperandType;
use capstone::arch::ArchDetail;
use capstone::prelude::*;
use shirube_ctrl::Arch;

bitflags! {
    /// 命令の制御フロー上の性質
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct InstFlags: u32 {
        const CALL                  = 1 << 0;
        const BRANCH                = 1 << 1;
        const UNCONDITIONAL_JUMP    = 1 << 2;
        const RETURN                = 1 << 3;
        const CHANGES_STACK_POINTER = 1 << 4;
        const REPEATS               = 1 << 5;
    }
}

/// デコード済みの1命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInst {
    pub size: u64,
    pub flags: InstFlags,
    /// 即値で決まる分岐先・呼び出し先
    pub jump_dest: Option<u64>,
}

impl DecodedInst {
    pub fn is_jump(&self) -> bool {
        self.flags
            .intersects(InstFlags::BRANCH | InstFlags::UNCONDITIONAL_JUMP)
    }
}

/// 命令デコーダ
pub trait Disassembler {
    /// `vaddr` に置かれた `bytes` の先頭1命令をデコードする
    ///
    /// デコードできない場合は None を返します。
    fn decode(&self, arch: Arch, vaddr: u64, bytes: &[u8]) -> Option<DecodedInst>;
}

/// Capstone を使ったデコーダ（x86-64）
pub struct CapstoneDisassembler {
    cs: Capstone,
}

impl CapstoneDisassembler {
    pub fn new() -> Result<Self, CoreError> {
        let cs = Capstone::new()
            .x86()
            .mode(arch::x86::ArchMode::Mode64)
            .syntax(arch::x86::ArchSyntax::Intel)
            .detail(true)
            .build()
            .map_err(CoreError::DisAsmInit)?;
        Ok(Self { cs })
    }

    fn decode_x64(&self, vaddr: u64, bytes: &[u8]) -> Result<Option<DecodedInst>, CoreError> {
        let insns = self
            .cs
            .disasm_count(bytes, vaddr, 1)
            .map_err(CoreError::DisAsm)?;
        let Some(insn) = insns.iter().next() else {
            return Ok(None);
        };
        let detail = self.cs.insn_detail(insn).map_err(CoreError::DisAsm)?;
        let mnemonic = insn.mnemonic().unwrap_or("");

        let mut flags = InstFlags::empty();
        for &group in detail.groups() {
            match self.cs.group_name(group).as_deref() {
                Some("call") => flags |= InstFlags::CALL,
                Some("ret") => flags |= InstFlags::RETURN,
                Some("jump") => {
                    if mnemonic == "jmp" {
                        flags |= InstFlags::UNCONDITIONAL_JUMP;
                    } else {
                        flags |= InstFlags::BRANCH;
                    }
                }
                _ => {}
            }
        }

        let mut jump_dest = None;
        let mut first_operand_is_sp = false;
        if let ArchDetail::X86Detail(x86) = detail.arch_detail() {
            if x86.prefix().iter().any(|&p| p == 0xf3 || p == 0xf2) {
                flags |= InstFlags::REPEATS;
            }
            for (i, op) in x86.operands().enumerate() {
                match op.op_type {
                    X86OperandType::Imm(imm)
                        if flags.intersects(
                            InstFlags::CALL | InstFlags::BRANCH | InstFlags::UNCONDITIONAL_JUMP,
                        ) =>
                    {
                        jump_dest = Some(imm as u64);
                    }
                    X86OperandType::Reg(reg) if i == 0 => {
                        first_operand_is_sp = self.is_stack_pointer(reg);
                    }
                    _ => {}
                }
            }
        }

        let control_flow = flags.intersects(
            InstFlags::CALL | InstFlags::RETURN | InstFlags::BRANCH | InstFlags::UNCONDITIONAL_JUMP,
        );
        if !control_flow {
            let writes_sp = detail
                .regs_write()
                .iter()
                .any(|&reg| self.is_stack_pointer(reg));
            if writes_sp || first_operand_is_sp || mnemonic == "push" || mnemonic == "pop" {
                flags |= InstFlags::CHANGES_STACK_POINTER;
            }
        }

        Ok(Some(DecodedInst {
            size: insn.bytes().len() as u64,
            flags,
            jump_dest,
        }))
    }

    fn is_stack_pointer(&self, reg: RegId) -> bool {
        matches!(self.cs.reg_name(reg).as_deref(), Some("rsp" | "esp" | "sp"))
    }
}

impl Disassembler for CapstoneDisassembler {
    fn decode(&self, arch: Arch, vaddr: u64, bytes: &[u8]) -> Option<DecodedInst> {
        match arch {
            Arch::X64 => match self.decode_x64(vaddr, bytes) {
                Ok(inst) => inst,
                Err(e) => {
                    tracing::trace!(vaddr, error = %e, "decode failed");
                    None
                }
            },
            Arch::Unknown => None,
        }
    }
}
