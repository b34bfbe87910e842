//! セッションコマンド

use crate::parse::{parse_address, parse_location, split_args, Location};
use crate::Handle;
use bitflags::bitflags;
use std::fmt;
use std::path::PathBuf;

macro_rules! cmd_kinds {
    ($($variant:ident => $name:literal,)*) => {
        /// コマンドの種類
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CmdKind {
            $($variant,)*
        }

        impl CmdKind {
            pub const ALL: &'static [CmdKind] = &[$(CmdKind::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(CmdKind::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(CmdKind::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

cmd_kinds! {
    Error => "error",
    Run => "run",
    Continue => "continue",
    Restart => "restart",
    LaunchAndRun => "launch_and_run",
    LaunchAndInit => "launch_and_init",
    Kill => "kill",
    KillAll => "kill_all",
    Detach => "detach",
    Attach => "attach",
    StepInto => "step_into",
    StepOver => "step_over",
    StepIntoInst => "step_into_inst",
    StepOverInst => "step_over_inst",
    StepIntoLine => "step_into_line",
    StepOverLine => "step_over_line",
    StepOut => "step_out",
    RunToAddress => "run_to_address",
    Halt => "halt",
    SoftHaltRefresh => "soft_halt_refresh",
    SetThreadIp => "set_thread_ip",
    SelectThread => "select_thread",
    SelectUnwind => "select_unwind",
    UpOneFrame => "up_one_frame",
    DownOneFrame => "down_one_frame",
    FreezeThread => "freeze_thread",
    ThawThread => "thaw_thread",
    FreezeProcess => "freeze_process",
    ThawProcess => "thaw_process",
    FreezeMachine => "freeze_machine",
    ThawMachine => "thaw_machine",
    FreezeEntity => "freeze_entity",
    ThawEntity => "thaw_entity",
    EnableSoloStepping => "enable_solo_stepping",
    DisableSoloStepping => "disable_solo_stepping",
    Undo => "undo",
    Redo => "redo",
    EnableEntity => "enable_entity",
    DisableEntity => "disable_entity",
    EnableBreakpoint => "enable_breakpoint",
    DisableBreakpoint => "disable_breakpoint",
    EnableTarget => "enable_target",
    DisableTarget => "disable_target",
    RemoveEntity => "remove_entity",
    RemoveBreakpoint => "remove_breakpoint",
    RemoveTarget => "remove_target",
    NameEntity => "name_entity",
    DuplicateEntity => "duplicate_entity",
    EditEntity => "edit_entity",
    TextBreakpoint => "text_breakpoint",
    AddressBreakpoint => "address_breakpoint",
    FunctionBreakpoint => "function_breakpoint",
    ToggleWatchPin => "toggle_watch_pin",
    AddTarget => "add_target",
    RetryEndedProcess => "retry_ended_process",
    WriteUserData => "write_user_data",
    WriteProjectData => "write_project_data",
}

impl fmt::Display for CmdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// CmdParams のうち値が入っている欄
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ParamSlots: u32 {
        const ENTITY      = 1 << 0;
        const ENTITY_LIST = 1 << 1;
        const THREAD      = 1 << 2;
        const VADDR       = 1 << 3;
        const FILE_PATH   = 1 << 4;
        const TEXT_POINT  = 1 << 5;
        const STRING      = 1 << 6;
        const INDEX       = 1 << 7;
        const ID          = 1 << 8;
        const INLINE_DEPTH = 1 << 9;
    }
}

/// コマンドの引数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdParams {
    pub slots: ParamSlots,
    pub entity: Handle,
    pub entity_list: Vec<Handle>,
    pub thread: Handle,
    pub vaddr: u64,
    pub file_path: PathBuf,
    /// (行, 列)
    pub text_point: (u64, u64),
    pub string: String,
    pub index: u64,
    pub id: u64,
    /// 選択フレーム内のインライン展開の深さ
    pub inline_depth: u64,
}

impl CmdParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, slots: ParamSlots) -> bool {
        self.slots.contains(slots)
    }

    pub fn with_entity(mut self, entity: Handle) -> Self {
        self.entity = entity;
        self.slots |= ParamSlots::ENTITY;
        self
    }

    pub fn with_entity_list(mut self, list: Vec<Handle>) -> Self {
        self.entity_list = list;
        self.slots |= ParamSlots::ENTITY_LIST;
        self
    }

    pub fn with_thread(mut self, thread: Handle) -> Self {
        self.thread = thread;
        self.slots |= ParamSlots::THREAD;
        self
    }

    pub fn with_vaddr(mut self, vaddr: u64) -> Self {
        self.vaddr = vaddr;
        self.slots |= ParamSlots::VADDR;
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = path.into();
        self.slots |= ParamSlots::FILE_PATH;
        self
    }

    pub fn with_text_point(mut self, line: u64, column: u64) -> Self {
        self.text_point = (line, column);
        self.slots |= ParamSlots::TEXT_POINT;
        self
    }

    pub fn with_string(mut self, string: impl Into<String>) -> Self {
        self.string = string.into();
        self.slots |= ParamSlots::STRING;
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self.slots |= ParamSlots::INDEX;
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self.slots |= ParamSlots::ID;
        self
    }

    pub fn with_inline_depth(mut self, depth: u64) -> Self {
        self.inline_depth = depth;
        self.slots |= ParamSlots::INLINE_DEPTH;
        self
    }
}

/// キューに積まれるコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub kind: CmdKind,
    pub params: CmdParams,
}

impl Cmd {
    pub fn new(kind: CmdKind, params: CmdParams) -> Self {
        Self { kind, params }
    }

    pub fn bare(kind: CmdKind) -> Self {
        Self::new(kind, CmdParams::new())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(CmdKind::Error, CmdParams::new().with_string(text))
    }

    /// 入力行をコマンドにパースする
    ///
    /// エンティティは `id` 欄で指定され、セッション側で解決されます。
    /// 入力が空、または解釈できない場合は None を返します。
    pub fn parse(input: &str) -> Option<Self> {
        let parts = split_args(input);
        let (head, rest) = parts.split_first()?;
        let arg = |i: usize| rest.get(i).map(String::as_str);
        let id_arg = |i: usize| arg(i).and_then(|s| s.parse::<u64>().ok());
        let by_id = |kind: CmdKind| id_arg(0).map(|id| Cmd::new(kind, CmdParams::new().with_id(id)));

        let cmd = match head.as_str() {
            "run" | "r" => Cmd::bare(CmdKind::Run),
            "continue" | "c" => Cmd::bare(CmdKind::Continue),
            "restart" => Cmd::bare(CmdKind::Restart),
            "launch" => Cmd::bare(CmdKind::LaunchAndRun),
            "start" => Cmd::bare(CmdKind::LaunchAndInit),
            "step" | "s" => Cmd::bare(CmdKind::StepInto),
            "next" | "n" => Cmd::bare(CmdKind::StepOver),
            "stepi" | "si" => Cmd::bare(CmdKind::StepIntoInst),
            "nexti" | "ni" => Cmd::bare(CmdKind::StepOverInst),
            "finish" | "f" => Cmd::bare(CmdKind::StepOut),
            "halt" => Cmd::bare(CmdKind::Halt),
            "kill" | "k" => match id_arg(0) {
                Some(id) => Cmd::new(CmdKind::Kill, CmdParams::new().with_id(id)),
                None => Cmd::bare(CmdKind::KillAll),
            },
            "detach" => by_id(CmdKind::Detach)?,
            "attach" => by_id(CmdKind::Attach)?,
            "until" | "u" => {
                let vaddr = parse_address(arg(0)?).ok()?;
                Cmd::new(CmdKind::RunToAddress, CmdParams::new().with_vaddr(vaddr))
            }
            "jump" => {
                let vaddr = parse_address(arg(0)?).ok()?;
                Cmd::new(CmdKind::SetThreadIp, CmdParams::new().with_vaddr(vaddr))
            }
            "thread" => by_id(CmdKind::SelectThread)?,
            "frame" => {
                let mut params = CmdParams::new().with_index(id_arg(0)?);
                if rest.len() > 1 {
                    params = params.with_inline_depth(id_arg(1)?);
                }
                Cmd::new(CmdKind::SelectUnwind, params)
            }
            "up" => Cmd::bare(CmdKind::UpOneFrame),
            "down" => Cmd::bare(CmdKind::DownOneFrame),
            "freeze" => by_id(CmdKind::FreezeEntity)?,
            "thaw" => by_id(CmdKind::ThawEntity)?,
            "solo" => match arg(0)? {
                "on" => Cmd::bare(CmdKind::EnableSoloStepping),
                "off" => Cmd::bare(CmdKind::DisableSoloStepping),
                _ => return None,
            },
            "undo" => Cmd::bare(CmdKind::Undo),
            "redo" => Cmd::bare(CmdKind::Redo),
            "enable" => by_id(CmdKind::EnableEntity)?,
            "disable" => by_id(CmdKind::DisableEntity)?,
            "delete" | "d" => by_id(CmdKind::RemoveEntity)?,
            "rename" => {
                let id = id_arg(0)?;
                let name = rest.get(1..)?.join(" ");
                Cmd::new(
                    CmdKind::NameEntity,
                    CmdParams::new().with_id(id).with_string(name),
                )
            }
            "dup" => by_id(CmdKind::DuplicateEntity)?,
            "edit" => {
                let id = id_arg(0)?;
                let params = location_params(CmdParams::new().with_id(id), parse_location(arg(1)?)?);
                Cmd::new(CmdKind::EditEntity, params)
            }
            "break" | "b" => {
                let location = parse_location(&rest.join(" "))?;
                let kind = match &location {
                    Location::FileLine { .. } => CmdKind::TextBreakpoint,
                    Location::Address(_) => CmdKind::AddressBreakpoint,
                    Location::Symbol(_) => CmdKind::FunctionBreakpoint,
                };
                Cmd::new(kind, location_params(CmdParams::new(), location))
            }
            "watch" | "w" => {
                if rest.is_empty() {
                    return None;
                }
                Cmd::new(
                    CmdKind::ToggleWatchPin,
                    CmdParams::new().with_string(rest.join(" ")),
                )
            }
            "target" => {
                let exe = arg(0)?;
                let args = rest.get(1..).map(|a| a.join(" ")).unwrap_or_default();
                Cmd::new(
                    CmdKind::AddTarget,
                    CmdParams::new().with_file_path(exe).with_string(args),
                )
            }
            "retry" => by_id(CmdKind::RetryEndedProcess)?,
            _ => return None,
        };
        Some(cmd)
    }
}

fn location_params(params: CmdParams, location: Location) -> CmdParams {
    match location {
        Location::FileLine { file, line, column } => {
            params.with_file_path(file).with_text_point(line, column)
        }
        Location::Address(vaddr) => params.with_vaddr(vaddr),
        Location::Symbol(name) => params.with_string(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Cmd::parse("continue"), Some(Cmd::bare(CmdKind::Continue)));
        assert_eq!(Cmd::parse("c"), Some(Cmd::bare(CmdKind::Continue)));
        assert_eq!(Cmd::parse("step"), Some(Cmd::bare(CmdKind::StepInto)));
        assert_eq!(Cmd::parse("ni"), Some(Cmd::bare(CmdKind::StepOverInst)));
        assert_eq!(Cmd::parse("kill"), Some(Cmd::bare(CmdKind::KillAll)));
        assert_eq!(Cmd::parse(""), None);
        assert_eq!(Cmd::parse("bogus"), None);
    }

    #[test]
    fn test_parse_breakpoints() {
        let text = Cmd::parse("break src/main.rs:42").unwrap();
        assert_eq!(text.kind, CmdKind::TextBreakpoint);
        assert_eq!(text.params.file_path, PathBuf::from("src/main.rs"));
        assert_eq!(text.params.text_point, (42, 1));

        let addr = Cmd::parse("b 0x401000").unwrap();
        assert_eq!(addr.kind, CmdKind::AddressBreakpoint);
        assert_eq!(addr.params.vaddr, 0x401000);

        let func = Cmd::parse("b main").unwrap();
        assert_eq!(func.kind, CmdKind::FunctionBreakpoint);
        assert_eq!(func.params.string, "main");
        assert!(func.params.has(ParamSlots::STRING));
    }

    #[test]
    fn test_parse_entity_commands() {
        let rename = Cmd::parse("rename 7 \"my bp\"").unwrap();
        assert_eq!(rename.kind, CmdKind::NameEntity);
        assert_eq!(rename.params.id, 7);
        assert_eq!(rename.params.string, "my bp");

        assert_eq!(Cmd::parse("delete"), None);
        assert_eq!(Cmd::parse("delete 3").unwrap().params.id, 3);

        let target = Cmd::parse("target ./app --verbose -n 3").unwrap();
        assert_eq!(target.kind, CmdKind::AddTarget);
        assert_eq!(target.params.file_path, PathBuf::from("./app"));
        assert_eq!(target.params.string, "--verbose -n 3");
    }

    #[test]
    fn test_parse_frame_with_inline_depth() {
        let frame = Cmd::parse("frame 2").unwrap();
        assert_eq!(frame.kind, CmdKind::SelectUnwind);
        assert_eq!(frame.params.index, 2);
        assert!(!frame.params.has(ParamSlots::INLINE_DEPTH));

        let inline = Cmd::parse("frame 2 1").unwrap();
        assert_eq!(inline.params.inline_depth, 1);
        assert!(inline.params.has(ParamSlots::INLINE_DEPTH));
        assert_eq!(Cmd::parse("frame 2 x"), None);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for &kind in CmdKind::ALL {
            assert_eq!(CmdKind::from_name(kind.name()), Some(kind));
        }
    }
}
