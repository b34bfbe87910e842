//! エンティティの種別と種別ごとの静的テーブル

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// 種別ごとの性質
    ///
    /// Leaf* は変更されたエンティティ自身にのみ、Tree* は変更されたエンティティの
    /// 祖先（自身を含む）すべてに適用されます。
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct KindFlags: u32 {
        const LEAF_MUTATION_USER_CONFIG    = 1 << 0;
        const TREE_MUTATION_USER_CONFIG    = 1 << 1;
        const LEAF_MUTATION_PROFILE_CONFIG = 1 << 2;
        const TREE_MUTATION_PROFILE_CONFIG = 1 << 3;
        const LEAF_MUTATION_SOFT_HALT      = 1 << 4;
        const TREE_MUTATION_SOFT_HALT      = 1 << 5;
        const LEAF_MUTATION_DEBUG_INFO_MAP = 1 << 6;
        const TREE_MUTATION_DEBUG_INFO_MAP = 1 << 7;
        const NAME_IS_CODE                 = 1 << 8;
        const USER_DEFINED_LIFETIME        = 1 << 9;
    }
}

bitflags! {
    /// ユーザーが種別に対して行える操作
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u32 {
        const DELETE    = 1 << 0;
        const FREEZE    = 1 << 1;
        const EDIT      = 1 << 2;
        const RENAME    = 1 << 3;
        const ENABLE    = 1 << 4;
        const CONDITION = 1 << 5;
        const DUPLICATE = 1 << 6;
    }
}

/// エンティティの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum EntityKind {
    #[default]
    Nil,
    Root,
    Machine,
    File,
    AutoViewRule,
    OverrideFileLink,
    WatchPin,
    Breakpoint,
    Condition,
    Target,
    Executable,
    Arguments,
    ExecutionPath,
    EntryPointName,
    RecentProject,
    Source,
    Dest,
    Process,
    Thread,
    Module,
    PendingThreadName,
    DebugInfoPath,
    ConversionTask,
    ConversionFail,
    EndedProcess,
    CtrlRequest,
}

impl EntityKind {
    pub const COUNT: usize = 26;

    pub const ALL: [EntityKind; Self::COUNT] = [
        EntityKind::Nil,
        EntityKind::Root,
        EntityKind::Machine,
        EntityKind::File,
        EntityKind::AutoViewRule,
        EntityKind::OverrideFileLink,
        EntityKind::WatchPin,
        EntityKind::Breakpoint,
        EntityKind::Condition,
        EntityKind::Target,
        EntityKind::Executable,
        EntityKind::Arguments,
        EntityKind::ExecutionPath,
        EntityKind::EntryPointName,
        EntityKind::RecentProject,
        EntityKind::Source,
        EntityKind::Dest,
        EntityKind::Process,
        EntityKind::Thread,
        EntityKind::Module,
        EntityKind::PendingThreadName,
        EntityKind::DebugInfoPath,
        EntityKind::ConversionTask,
        EntityKind::ConversionFail,
        EntityKind::EndedProcess,
        EntityKind::CtrlRequest,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// 数値表現から復元する（範囲外は Nil）
    pub fn from_u64(value: u64) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(EntityKind::Nil)
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Nil => "nil",
            EntityKind::Root => "root",
            EntityKind::Machine => "machine",
            EntityKind::File => "file",
            EntityKind::AutoViewRule => "auto_view_rule",
            EntityKind::OverrideFileLink => "override_file_link",
            EntityKind::WatchPin => "watch_pin",
            EntityKind::Breakpoint => "breakpoint",
            EntityKind::Condition => "condition",
            EntityKind::Target => "target",
            EntityKind::Executable => "executable",
            EntityKind::Arguments => "arguments",
            EntityKind::ExecutionPath => "execution_path",
            EntityKind::EntryPointName => "entry_point_name",
            EntityKind::RecentProject => "recent_project",
            EntityKind::Source => "source",
            EntityKind::Dest => "dest",
            EntityKind::Process => "process",
            EntityKind::Thread => "thread",
            EntityKind::Module => "module",
            EntityKind::PendingThreadName => "pending_thread_name",
            EntityKind::DebugInfoPath => "debug_info_path",
            EntityKind::ConversionTask => "conversion_task",
            EntityKind::ConversionFail => "conversion_fail",
            EntityKind::EndedProcess => "ended_process",
            EntityKind::CtrlRequest => "ctrl_request",
        }
    }

    /// 種別ごとの性質テーブル
    pub const fn flags(self) -> KindFlags {
        const USER: KindFlags = KindFlags::USER_DEFINED_LIFETIME;
        match self {
            EntityKind::Breakpoint => KindFlags::from_bits_truncate(
                USER.bits()
                    | KindFlags::TREE_MUTATION_SOFT_HALT.bits()
                    | KindFlags::TREE_MUTATION_PROFILE_CONFIG.bits(),
            ),
            EntityKind::Condition => USER,
            EntityKind::WatchPin => KindFlags::from_bits_truncate(
                USER.bits() | KindFlags::LEAF_MUTATION_PROFILE_CONFIG.bits(),
            ),
            EntityKind::Target => KindFlags::from_bits_truncate(
                USER.bits() | KindFlags::TREE_MUTATION_PROFILE_CONFIG.bits(),
            ),
            EntityKind::Executable
            | EntityKind::Arguments
            | EntityKind::ExecutionPath => USER,
            EntityKind::EntryPointName => KindFlags::from_bits_truncate(
                USER.bits() | KindFlags::NAME_IS_CODE.bits(),
            ),
            EntityKind::RecentProject => KindFlags::from_bits_truncate(
                USER.bits() | KindFlags::LEAF_MUTATION_USER_CONFIG.bits(),
            ),
            EntityKind::AutoViewRule => KindFlags::from_bits_truncate(
                USER.bits() | KindFlags::TREE_MUTATION_USER_CONFIG.bits() | KindFlags::NAME_IS_CODE.bits(),
            ),
            EntityKind::OverrideFileLink => KindFlags::from_bits_truncate(
                USER.bits()
                    | KindFlags::TREE_MUTATION_PROFILE_CONFIG.bits()
                    | KindFlags::TREE_MUTATION_DEBUG_INFO_MAP.bits(),
            ),
            EntityKind::Source | EntityKind::Dest => USER,
            EntityKind::Module | EntityKind::DebugInfoPath => KindFlags::LEAF_MUTATION_DEBUG_INFO_MAP,
            EntityKind::Nil
            | EntityKind::Root
            | EntityKind::Machine
            | EntityKind::File
            | EntityKind::Process
            | EntityKind::Thread
            | EntityKind::PendingThreadName
            | EntityKind::ConversionTask
            | EntityKind::ConversionFail
            | EntityKind::EndedProcess
            | EntityKind::CtrlRequest => KindFlags::empty(),
        }
    }

    /// 種別ごとの操作権限テーブル
    pub const fn op_flags(self) -> OpFlags {
        match self {
            EntityKind::Breakpoint => OpFlags::all(),
            EntityKind::WatchPin => OpFlags::from_bits_truncate(
                OpFlags::DELETE.bits() | OpFlags::EDIT.bits() | OpFlags::RENAME.bits() | OpFlags::DUPLICATE.bits(),
            ),
            EntityKind::Target => OpFlags::from_bits_truncate(
                OpFlags::DELETE.bits()
                    | OpFlags::EDIT.bits()
                    | OpFlags::RENAME.bits()
                    | OpFlags::ENABLE.bits()
                    | OpFlags::DUPLICATE.bits(),
            ),
            EntityKind::OverrideFileLink | EntityKind::AutoViewRule | EntityKind::RecentProject => {
                OpFlags::from_bits_truncate(OpFlags::DELETE.bits() | OpFlags::EDIT.bits())
            }
            EntityKind::Machine | EntityKind::Process | EntityKind::Thread => OpFlags::FREEZE,
            EntityKind::EndedProcess | EntityKind::ConversionFail => OpFlags::DELETE,
            _ => OpFlags::empty(),
        }
    }

    pub fn is_user_defined_lifetime(self) -> bool {
        self.flags().contains(KindFlags::USER_DEFINED_LIFETIME)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

bitflags! {
    /// エンティティごとの「値を持っている」フラグ
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct EntityFlags: u64 {
        const HAS_TEXT_POINT     = 1 << 0;
        const HAS_ENTITY_HANDLE  = 1 << 2;
        const HAS_U64            = 1 << 4;
        const HAS_COLOR          = 1 << 6;
        const DIES_WITH_TIME     = 1 << 7;
        const DIES_ON_RUN_STOP   = 1 << 8;
        const HAS_CTRL_MACHINE_ID = 1 << 9;
        const HAS_CTRL_HANDLE    = 1 << 10;
        const HAS_ARCH           = 1 << 11;
        const HAS_CTRL_ID        = 1 << 12;
        const HAS_STACK_BASE     = 1 << 13;
        const HAS_TLS_ROOT       = 1 << 14;
        const HAS_VADDR_RANGE    = 1 << 15;
        const HAS_VADDR          = 1 << 16;
        const MARKED_FOR_DELETION = 1 << 31;
    }
}
