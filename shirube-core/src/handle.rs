//! エンティティのハンドル

use std::fmt;

/// エンティティのアリーナ上の位置
///
/// インデックス 0 は nil エンティティ（番兵）です。nil への操作はすべて何もしません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Entity(pub(crate) u64);

impl Entity {
    pub const NIL: Entity = Entity(0);

    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// アリーナ上のインデックス
    pub fn index(self) -> u64 {
        self.0
    }
}

/// 世代付きの弱参照
///
/// スロットが再利用されると世代が進むため、古いハンドルは nil に解決されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle {
    pub index: u64,
    pub generation: u64,
}

impl Handle {
    /// 「参照なし」
    pub const ZERO: Handle = Handle {
        index: 0,
        generation: 0,
    };

    pub fn new(index: u64, generation: u64) -> Self {
        Self { index, generation }
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}
