//! コマンドの実行

use crate::breakpoint;
use crate::command::{Cmd, CmdKind, CmdParams, ParamSlots};
use crate::entity::Field;
use crate::errors::*;
use crate::events::module_location;
use crate::history::Side;
use crate::kind::{EntityKind, OpFlags};
use crate::parse::split_args;
use crate::session::Session;
use crate::trapnet::{self, LineStep, StepContext, StepError};
use crate::Entity;
use shirube_ctrl::{ControlLayer, CtrlMsg, MachineId, TrapFlags, TrapList};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 起動時のエントリポイント名の既定値
const DEFAULT_ENTRY_POINT: &str = "main";

/// ステップの粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    IntoInst,
    OverInst,
    IntoLine,
    OverLine,
}

impl<C: ControlLayer> Session<C> {
    /// コマンドを1つ実行する
    pub(crate) fn run_command(&mut self, cmd: Cmd) {
        let Cmd { kind, params } = cmd;
        match kind {
            CmdKind::Error => {
                warn!("{}", params.string);
                self.errors.push(params.string);
            }

            //- 実行
            CmdKind::Run => {
                let next = if self.processes().is_empty() {
                    CmdKind::LaunchAndRun
                } else {
                    CmdKind::Continue
                };
                self.cmds.push_back(Cmd::bare(next));
            }
            CmdKind::Continue => self.continue_run(),
            CmdKind::Restart => {
                for process in self.processes() {
                    self.kill_process(process);
                }
                self.cmds.push_back(Cmd::bare(CmdKind::LaunchAndRun));
            }
            CmdKind::LaunchAndRun => self.launch_active_targets(false),
            CmdKind::LaunchAndInit => self.launch_active_targets(true),
            CmdKind::Kill => {
                let process = self.param_entity(&params);
                if self.store.kind(process) != EntityKind::Process {
                    self.push_error(ERR_NO_PROCESSES_TO_KILL);
                    return;
                }
                self.kill_process(process);
            }
            CmdKind::KillAll => {
                let processes = self.processes();
                if processes.is_empty() {
                    self.push_error(ERR_NO_PROCESSES_TO_KILL);
                    return;
                }
                for process in processes {
                    self.kill_process(process);
                }
            }
            CmdKind::Detach => {
                let process = self.param_entity(&params);
                if self.store.kind(process) != EntityKind::Process {
                    self.push_error(ERR_NO_PROCESS_TO_DETACH);
                    return;
                }
                let msg_id = self.track_request(Entity::NIL);
                self.msgs.push(CtrlMsg::Detach {
                    msg_id,
                    machine: self.store.ctrl_machine(process),
                    process: self.store.ctrl_handle(process),
                });
            }
            CmdKind::Attach => {
                if !params.has(ParamSlots::ID) {
                    self.push_error(ERR_NO_PROCESS_ID);
                    return;
                }
                let msg_id = self.track_request(Entity::NIL);
                info!("attach to pid {}", params.id);
                self.msgs.push(CtrlMsg::Attach {
                    msg_id,
                    machine: MachineId::LOCAL,
                    pid: params.id,
                });
            }
            CmdKind::Halt => {
                if !self.run.running {
                    debug!("halt ignored; target is not running");
                    return;
                }
                self.run.refresh_after_halt = false;
                self.msgs.push(CtrlMsg::Halt);
            }
            CmdKind::SoftHaltRefresh => self.soft_halt_refresh(),

            //- ステップ
            CmdKind::StepInto | CmdKind::StepOver => {
                if self.processes().is_empty() {
                    self.cmds.push_back(Cmd::bare(CmdKind::LaunchAndInit));
                    return;
                }
                let step = match (kind, self.config.prefer_disassembly) {
                    (CmdKind::StepInto, true) => StepKind::IntoInst,
                    (CmdKind::StepInto, false) => StepKind::IntoLine,
                    (_, true) => StepKind::OverInst,
                    (_, false) => StepKind::OverLine,
                };
                self.step(&params, step);
            }
            CmdKind::StepIntoInst => self.step(&params, StepKind::IntoInst),
            CmdKind::StepOverInst => self.step(&params, StepKind::OverInst),
            CmdKind::StepIntoLine => self.step(&params, StepKind::IntoLine),
            CmdKind::StepOverLine => self.step(&params, StepKind::OverLine),
            CmdKind::StepOut => self.step_out(&params),
            CmdKind::RunToAddress => {
                if !params.has(ParamSlots::VADDR) {
                    self.push_error(ERR_NO_ADDRESS);
                    return;
                }
                let Some(thread) = self.stoppable_thread(&params) else {
                    return;
                };
                let mut traps = TrapList::new();
                traps.push(
                    TrapFlags::END_STEPPING | TrapFlags::IGNORE_STACK_POINTER_CHECK,
                    params.vaddr,
                );
                self.run_with_traps(thread, traps);
            }
            CmdKind::SetThreadIp => {
                if !params.has(ParamSlots::VADDR) {
                    self.push_error(ERR_NO_ADDRESS);
                    return;
                }
                let Some(thread) = self.stoppable_thread(&params) else {
                    return;
                };
                let handle = self.store.ctrl_handle(thread);
                self.unwind_cache.remove(&handle);
                self.msgs.push(CtrlMsg::SetThreadIp {
                    machine: self.store.ctrl_machine(thread),
                    thread: handle,
                    vaddr: params.vaddr,
                });
            }

            //- 選択
            CmdKind::SelectThread => {
                let thread = if params.has(ParamSlots::THREAD) {
                    self.param_thread(&params)
                } else {
                    self.param_entity(&params)
                };
                if self.store.kind(thread) != EntityKind::Thread {
                    self.push_error(ERR_NOT_A_THREAD);
                    return;
                }
                self.selected_thread = self.store.handle_of(thread);
                self.selected_unwind = 0;
                self.selected_inline_depth = 0;
            }
            CmdKind::SelectUnwind => {
                let depth = self.selected_unwind_depth();
                self.selected_unwind = match depth {
                    Some(depth) => params.index.min(depth.saturating_sub(1) as u64),
                    None => params.index,
                };
                self.selected_inline_depth = if params.has(ParamSlots::INLINE_DEPTH) {
                    params.inline_depth
                } else {
                    0
                };
            }
            CmdKind::UpOneFrame => {
                let depth = self.selected_unwind_depth().unwrap_or(0) as u64;
                if self.selected_unwind + 1 < depth {
                    self.selected_unwind += 1;
                }
                self.selected_inline_depth = 0;
            }
            CmdKind::DownOneFrame => {
                self.selected_unwind = self.selected_unwind.saturating_sub(1);
                self.selected_inline_depth = 0;
            }

            //- 凍結
            CmdKind::FreezeThread | CmdKind::ThawThread => {
                let thread = self.param_thread(&params);
                self.set_frozen(thread, Some(EntityKind::Thread), kind == CmdKind::FreezeThread);
            }
            CmdKind::FreezeProcess | CmdKind::ThawProcess => {
                let e = self.param_entity_or_selected(&params, EntityKind::Process);
                self.set_frozen(e, Some(EntityKind::Process), kind == CmdKind::FreezeProcess);
            }
            CmdKind::FreezeMachine | CmdKind::ThawMachine => {
                let e = self.param_entity_or_selected(&params, EntityKind::Machine);
                self.set_frozen(e, Some(EntityKind::Machine), kind == CmdKind::FreezeMachine);
            }
            CmdKind::FreezeEntity | CmdKind::ThawEntity => {
                let e = self.param_entity(&params);
                self.set_frozen(e, None, kind == CmdKind::FreezeEntity);
            }
            CmdKind::EnableSoloStepping | CmdKind::DisableSoloStepping => {
                self.solo_stepping = kind == CmdKind::EnableSoloStepping;
                info!("solo stepping: {}", self.solo_stepping);
                self.request_soft_halt();
            }

            //- 履歴
            CmdKind::Undo => self.wind(Side::Min),
            CmdKind::Redo => self.wind(Side::Max),

            //- エンティティ編集
            CmdKind::EnableEntity | CmdKind::DisableEntity => {
                let e = self.param_entity(&params);
                self.set_disabled(e, None, kind == CmdKind::DisableEntity);
            }
            CmdKind::EnableBreakpoint | CmdKind::DisableBreakpoint => {
                let e = self.param_entity(&params);
                self.set_disabled(e, Some(EntityKind::Breakpoint), kind == CmdKind::DisableBreakpoint);
            }
            CmdKind::EnableTarget | CmdKind::DisableTarget => {
                let e = self.param_entity(&params);
                self.set_disabled(e, Some(EntityKind::Target), kind == CmdKind::DisableTarget);
            }
            CmdKind::RemoveEntity => self.remove(&params, None),
            CmdKind::RemoveBreakpoint => self.remove(&params, Some(EntityKind::Breakpoint)),
            CmdKind::RemoveTarget => self.remove(&params, Some(EntityKind::Target)),
            CmdKind::NameEntity => {
                let e = self.param_entity(&params);
                if !self.permits(e, OpFlags::RENAME, None) {
                    return;
                }
                self.begin_edit(e);
                self.store.equip_name(e, &params.string, Some(&mut self.history));
            }
            CmdKind::DuplicateEntity => {
                let e = self.param_entity(&params);
                if !self.permits(e, OpFlags::DUPLICATE, None) {
                    return;
                }
                self.history.push_batch(&self.store, None);
                let copy = self.store.duplicate(e, Some(&mut self.history));
                debug!("duplicated {} as {}", self.store.handle_of(e), self.store.handle_of(copy));
            }
            CmdKind::EditEntity => self.edit(&params),

            //- ブレークポイント・ウォッチ
            CmdKind::TextBreakpoint => {
                if !params.has(ParamSlots::FILE_PATH | ParamSlots::TEXT_POINT) {
                    self.push_error(ERR_NO_LOCATION);
                    return;
                }
                let (line, column) = params.text_point;
                let existing = breakpoint::find_text_breakpoint(&self.store, &params.file_path, line);
                if !existing.is_nil() {
                    self.remove_entity(existing);
                    return;
                }
                let file = breakpoint::find_or_create_file(&mut self.store, &params.file_path);
                self.history.push_batch(&self.store, None);
                let bp = self
                    .store
                    .alloc(file, EntityKind::Breakpoint, Some(&mut self.history));
                self.store
                    .equip_text_point(bp, line, column, Some(&mut self.history));
                info!("breakpoint at {}:{}", params.file_path.display(), line);
            }
            CmdKind::AddressBreakpoint => {
                if !params.has(ParamSlots::VADDR) {
                    self.push_error(ERR_NO_ADDRESS);
                    return;
                }
                let existing = breakpoint::find_address_breakpoint(&self.store, params.vaddr);
                if !existing.is_nil() {
                    self.remove_entity(existing);
                    return;
                }
                self.history.push_batch(&self.store, None);
                let bp = self
                    .store
                    .alloc(Entity::NIL, EntityKind::Breakpoint, Some(&mut self.history));
                self.store
                    .equip_vaddr(bp, params.vaddr, Some(&mut self.history));
                info!("breakpoint at {:#x}", params.vaddr);
            }
            CmdKind::FunctionBreakpoint => {
                if params.string.is_empty() {
                    self.push_error(ERR_NO_LOCATION);
                    return;
                }
                let existing = breakpoint::find_function_breakpoint(&self.store, &params.string);
                if !existing.is_nil() {
                    self.remove_entity(existing);
                    return;
                }
                self.history.push_batch(&self.store, None);
                let bp = self
                    .store
                    .alloc(Entity::NIL, EntityKind::Breakpoint, Some(&mut self.history));
                self.store
                    .equip_name(bp, &params.string, Some(&mut self.history));
                info!("breakpoint at {}", params.string);
            }
            CmdKind::ToggleWatchPin => {
                let root = self.store.root();
                let existing =
                    self.store
                        .child_from_name_and_kind(root, &params.string, EntityKind::WatchPin);
                if !existing.is_nil() {
                    self.remove_entity(existing);
                    return;
                }
                self.history.push_batch(&self.store, None);
                let pin = self
                    .store
                    .alloc(Entity::NIL, EntityKind::WatchPin, Some(&mut self.history));
                self.store
                    .equip_name(pin, &params.string, Some(&mut self.history));
            }

            //- ターゲット
            CmdKind::AddTarget => self.add_target(&params.file_path, &params.string),
            CmdKind::RetryEndedProcess => {
                let ended = self.param_entity(&params);
                if self.store.kind(ended) != EntityKind::EndedProcess {
                    self.push_error(ERR_OPERATION_NOT_PERMITTED);
                    return;
                }
                let target = self.store.entity_of(self.store.link(ended));
                if self.store.kind(target) != EntityKind::Target || self.store.is_deleted(target) {
                    self.push_error(ERR_NO_ACTIVE_TARGETS);
                    return;
                }
                self.store.mark_for_deletion(ended);
                if self.launch_target(target) {
                    self.run_with_traps(Entity::NIL, TrapList::new());
                }
            }

            //- 設定の書き出し
            CmdKind::WriteUserData => {
                self.config_writes.user += 1;
                debug!("user data write requested ({})", self.config_writes.user);
            }
            CmdKind::WriteProjectData => {
                self.config_writes.project += 1;
                debug!("project data write requested ({})", self.config_writes.project);
            }
        }
    }

    //- 実行

    fn continue_run(&mut self) {
        if self.run.running {
            debug!("continue ignored; target is already running");
            return;
        }
        if self.processes().is_empty() {
            self.push_error(ERR_NO_PROCESSES_TO_RUN);
            return;
        }
        let mut thread = self.selected_thread();
        if thread.is_nil() {
            thread = self
                .store
                .entities_of_kind(EntityKind::Thread)
                .into_iter()
                .next()
                .unwrap_or(Entity::NIL);
        }
        self.run_with_traps(thread, TrapList::new());
    }

    fn run_with_traps(&mut self, thread: Entity, traps: TrapList) {
        match self.build_run_params(thread, traps) {
            Some(params) => self.send_run(params),
            None => self.push_error(ERR_ALL_THREADS_FROZEN),
        }
    }

    /// 停止要求の完了後、直前の実行を最新のブレークポイントと凍結状態で再送する
    fn soft_halt_refresh(&mut self) {
        let Some(last) = self.run.last_run.clone() else {
            return;
        };
        if self.run.running || self.processes().is_empty() {
            return;
        }
        let thread = self.store.entity_from_ctrl(last.machine, last.thread);
        debug!("resuming after soft halt");
        self.run_with_traps(thread, last.traps);
    }

    fn launch_active_targets(&mut self, init: bool) {
        let targets: Vec<Entity> = self
            .store
            .entities_of_kind(EntityKind::Target)
            .into_iter()
            .filter(|&t| !self.store.is_disabled(t))
            .collect();
        if targets.is_empty() {
            self.push_error(ERR_NO_ACTIVE_TARGETS);
            return;
        }

        let mut launched = false;
        for target in targets {
            if init {
                let entry = self.store.child_of_kind(target, EntityKind::EntryPointName);
                let name = match self.store.name(entry) {
                    "" => DEFAULT_ENTRY_POINT.to_string(),
                    name => name.to_string(),
                };
                let bp = self.store.alloc(Entity::NIL, EntityKind::Breakpoint, None);
                self.store.equip_name(bp, &name, None);
                self.store.set_dies_on_run_stop(bp);
                debug!("entry point breakpoint at {}", name);
            }
            launched |= self.launch_target(target);
        }
        if launched {
            self.run_with_traps(Entity::NIL, TrapList::new());
        }
    }

    /// ターゲットの起動メッセージを積む
    fn launch_target(&mut self, target: Entity) -> bool {
        let exe = self.store.child_of_kind(target, EntityKind::Executable);
        let exe = PathBuf::from(self.store.name(exe));
        if exe.as_os_str().is_empty() {
            self.push_error(ERR_TARGET_HAS_NO_EXECUTABLE);
            return false;
        }
        let args = self.store.child_of_kind(target, EntityKind::Arguments);
        let mut cmd_line = vec![exe.to_string_lossy().into_owned()];
        cmd_line.extend(split_args(self.store.name(args)));

        let exec_path = self.store.child_of_kind(target, EntityKind::ExecutionPath);
        let working_dir = match self.store.name(exec_path) {
            "" => exe.parent().map(Path::to_path_buf).unwrap_or_default(),
            dir => PathBuf::from(dir),
        };

        let msg_id = self.track_request(target);
        info!("launch {:?} in {}", cmd_line, working_dir.display());
        self.msgs.push(CtrlMsg::Launch {
            msg_id,
            cmd_line,
            working_dir,
            env_inherit: true,
            exception_filters: self.config.exception_filters,
        });
        true
    }

    fn kill_process(&mut self, process: Entity) {
        let msg_id = self.track_request(Entity::NIL);
        info!("kill {}", self.store.ctrl_handle(process));
        self.msgs.push(CtrlMsg::Kill {
            msg_id,
            machine: self.store.ctrl_machine(process),
            process: self.store.ctrl_handle(process),
            exit_code: 0,
        });
    }

    /// 完了イベントを待つ要求エンティティを作り、メッセージ ID を返す
    fn track_request(&mut self, target: Entity) -> u64 {
        let msg_id = self.next_msg_id();
        let request = self.store.alloc(Entity::NIL, EntityKind::CtrlRequest, None);
        self.store.equip_ctrl_id(request, msg_id);
        if !target.is_nil() {
            let handle = self.store.handle_of(target);
            self.store.equip_link(request, handle);
        }
        msg_id
    }

    //- ステップ

    /// 停止中で凍結されていない対象スレッド
    fn stoppable_thread(&mut self, params: &CmdParams) -> Option<Entity> {
        if self.run.running {
            self.push_error(ERR_MUST_HALT_BEFORE_STEPPING);
            return None;
        }
        let thread = self.param_thread(params);
        if thread.is_nil() {
            self.push_error(ERR_NO_SELECTED_THREAD);
            return None;
        }
        if self.thread_is_frozen(thread) {
            self.push_error(ERR_MUST_THAW_BEFORE_STEPPING);
            return None;
        }
        Some(thread)
    }

    fn step(&mut self, params: &CmdParams, kind: StepKind) {
        let Some(thread) = self.stoppable_thread(params) else {
            return;
        };
        if kind == StepKind::IntoInst {
            self.single_step(thread);
            return;
        }
        let handle = self.store.ctrl_handle(thread);
        let Some(rip) = self.control.thread_rip(handle) else {
            self.push_error(ERR_NO_THREAD_REGISTERS);
            return;
        };

        let process = self.store.ancestor_of_kind(thread, EntityKind::Process);
        let module = self.store.module_from_vaddr(process, rip);
        let module = module_location(&self.store, module);
        let process_handle = self.store.ctrl_handle(process);

        let result = {
            let control = &self.control;
            let read_memory = |range: Range<u64>| control.read_memory(process_handle, range);
            let ctx = StepContext {
                arch: self.store.arch(thread),
                rip,
                module: module.as_ref().map(|(path, base)| (path.as_path(), *base)),
                read_memory: &read_memory,
                debug_info: self.debug_info.as_ref(),
                disasm: self.disasm.as_ref(),
            };
            match kind {
                StepKind::IntoInst | StepKind::OverInst => Ok(trapnet::inst_step_over(&ctx)),
                StepKind::IntoLine => trapnet::line_step(&ctx, LineStep::Into),
                StepKind::OverLine => trapnet::line_step(&ctx, LineStep::Over),
            }
        };

        match result {
            Ok(traps) if traps.is_empty() => self.single_step(thread),
            Ok(traps) => self.run_with_traps(thread, traps),
            Err(StepError::NoLineInfo(vaddr)) => {
                // 行情報がなければ命令単位に落とす
                debug!("no line info at {:#x}; stepping by instruction", vaddr);
                let fallback = match kind {
                    StepKind::IntoLine => StepKind::IntoInst,
                    _ => StepKind::OverInst,
                };
                self.step(params, fallback);
            }
            Err(e) => self.push_error(format!("Could not step: {}.", e)),
        }
    }

    fn single_step(&mut self, thread: Entity) {
        match self.build_run_params(thread, TrapList::new()) {
            Some(params) => self.send_single_step(params),
            None => self.push_error(ERR_ALL_THREADS_FROZEN),
        }
    }

    fn step_out(&mut self, params: &CmdParams) {
        let Some(thread) = self.stoppable_thread(params) else {
            return;
        };
        let handle = self.store.ctrl_handle(thread);
        let unwind = self.thread_unwind(handle);
        let reg_gen = self.control.reg_gen();
        let result = match &unwind {
            Some((unwind, unwind_gen)) => trapnet::step_out(Some(unwind), *unwind_gen, reg_gen),
            None => trapnet::step_out(None, 0, reg_gen),
        };
        match result {
            Ok(traps) => self.run_with_traps(thread, traps),
            Err(e) => {
                debug!("step out failed: {}", e);
                self.push_error(ERR_NO_RETURN_ADDRESS);
            }
        }
    }

    fn selected_unwind_depth(&mut self) -> Option<usize> {
        let thread = self.selected_thread();
        if thread.is_nil() {
            return None;
        }
        let handle = self.store.ctrl_handle(thread);
        self.thread_unwind(handle).map(|(unwind, _)| unwind.len())
    }

    //- 凍結

    fn param_entity_or_selected(&self, params: &CmdParams, kind: EntityKind) -> Entity {
        let e = self.param_entity(params);
        if !e.is_nil() {
            return e;
        }
        let thread = self.selected_thread();
        self.store.ancestor_of_kind(thread, kind)
    }

    fn set_frozen(&mut self, e: Entity, kind: Option<EntityKind>, frozen: bool) {
        if !self.permits(e, OpFlags::FREEZE, kind) {
            return;
        }
        if self.store.is_frozen(e) == frozen {
            return;
        }
        self.store.set_frozen(e, frozen);
        debug!("{} {} frozen: {}", self.store.kind(e), self.store.handle_of(e), frozen);
        self.request_soft_halt();
    }

    //- 編集

    /// 種別と操作権限を確認し、許可されなければエラーを積む
    fn permits(&mut self, e: Entity, op: OpFlags, kind: Option<EntityKind>) -> bool {
        let actual = self.store.kind(e);
        let ok = !e.is_nil()
            && !self.store.is_deleted(e)
            && kind.map_or(true, |k| k == actual)
            && actual.op_flags().contains(op);
        if !ok {
            self.push_error(ERR_OPERATION_NOT_PERMITTED);
        }
        ok
    }

    /// エンティティの世代で保護したアンドゥバッチを開く
    fn begin_edit(&mut self, e: Entity) {
        let guard = self.store.field_addr(e, Field::Generation);
        self.history.push_batch(&self.store, Some(guard));
    }

    fn set_disabled(&mut self, e: Entity, kind: Option<EntityKind>, disabled: bool) {
        if !self.permits(e, OpFlags::ENABLE, kind) {
            return;
        }
        self.begin_edit(e);
        self.store
            .equip_disabled(e, disabled, Some(&mut self.history));
    }

    fn remove(&mut self, params: &CmdParams, kind: Option<EntityKind>) {
        let e = self.param_entity(params);
        if !self.permits(e, OpFlags::DELETE, kind) {
            return;
        }
        self.remove_entity(e);
    }

    /// フレーム末尾の掃除で削除されるよう印を付ける
    fn remove_entity(&mut self, e: Entity) {
        debug!("remove {} {}", self.store.kind(e), self.store.handle_of(e));
        self.store.mark_for_deletion(e);
    }

    fn edit(&mut self, params: &CmdParams) {
        let e = self.param_entity(params);
        if !self.permits(e, OpFlags::EDIT, None) {
            return;
        }
        self.begin_edit(e);
        if params.has(ParamSlots::VADDR) {
            self.store
                .equip_vaddr(e, params.vaddr, Some(&mut self.history));
        }
        if params.has(ParamSlots::TEXT_POINT) {
            let (line, column) = params.text_point;
            if params.has(ParamSlots::FILE_PATH) && self.store.kind(e) == EntityKind::Breakpoint {
                let old_parent = self.store.parent(e);
                let file = breakpoint::find_or_create_file(&mut self.store, &params.file_path);
                if file != old_parent {
                    self.store
                        .change_parent(e, old_parent, file, Some(&mut self.history));
                }
            }
            self.store
                .equip_text_point(e, line, column, Some(&mut self.history));
        }
        if params.has(ParamSlots::STRING) {
            self.store
                .equip_name(e, &params.string, Some(&mut self.history));
        }
    }

    fn wind(&mut self, side: Side) {
        let outcome = self.history.wind(&mut self.store, side);
        debug!("history {:?}: {:?}", side, outcome);
    }

    fn add_target(&mut self, exe: &Path, args: &str) {
        if exe.as_os_str().is_empty() {
            self.push_error(ERR_TARGET_HAS_NO_EXECUTABLE);
            return;
        }
        self.history.push_batch(&self.store, None);
        let target = self
            .store
            .alloc(Entity::NIL, EntityKind::Target, Some(&mut self.history));
        let exe_entity = self
            .store
            .alloc(target, EntityKind::Executable, Some(&mut self.history));
        self.store
            .equip_name(exe_entity, &exe.to_string_lossy(), Some(&mut self.history));
        if !args.is_empty() {
            let args_entity = self
                .store
                .alloc(target, EntityKind::Arguments, Some(&mut self.history));
            self.store
                .equip_name(args_entity, args, Some(&mut self.history));
        }
        info!("added target {}", exe.display());
    }
}
