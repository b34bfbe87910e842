//! 制御レイヤ側の相関ID

use std::fmt;

/// 制御レイヤがプロセス・スレッド・モジュールを識別するためのハンドル
///
/// 値 0 は「参照なし」を表します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CtrlHandle(pub u64);

impl CtrlHandle {
    pub const ZERO: CtrlHandle = CtrlHandle(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CtrlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// マシンID（ローカルマシンは 0）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MachineId(pub u64);

impl MachineId {
    pub const LOCAL: MachineId = MachineId(0);
}

/// ターゲットのアーキテクチャ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Arch {
    #[default]
    Unknown,
    X64,
}

impl Arch {
    /// 1命令の最大バイト数
    pub fn max_instruction_size(self) -> u64 {
        match self {
            Arch::X64 => 15,
            Arch::Unknown => 0,
        }
    }

    /// エンティティのフィールドに格納するための数値表現
    pub fn to_u64(self) -> u64 {
        match self {
            Arch::Unknown => 0,
            Arch::X64 => 1,
        }
    }

    /// 数値表現から復元する（未知の値は Unknown）
    pub fn from_u64(value: u64) -> Self {
        match value {
            1 => Arch::X64,
            _ => Arch::Unknown,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Unknown => write!(f, "unknown"),
            Arch::X64 => write!(f, "x64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_round_trip_through_u64() {
        assert_eq!(Arch::from_u64(Arch::X64.to_u64()), Arch::X64);
        assert_eq!(Arch::from_u64(99), Arch::Unknown);
        assert_eq!(Arch::X64.max_instruction_size(), 15);
    }
}
