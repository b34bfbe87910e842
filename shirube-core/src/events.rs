//! 制御レイヤイベントの適用

use crate::breakpoint::{self, StopSite};
use crate::command::{Cmd, CmdKind};
use crate::entity::EntityStore;
use crate::kind::{EntityFlags, EntityKind};
use crate::session::{Session, StopInfo};
use crate::Entity;
use shirube_ctrl::{ControlLayer, CtrlEvent, CtrlHandle, MachineId, StopCause};
use std::path::PathBuf;
use tracing::{debug, info, trace, warn};

/// スレッドに順に割り当てる色（RGBA）
const THREAD_COLORS: [u32; 8] = [
    0x6bc7ffff, 0xff8c6bff, 0x8cff6bff, 0xd98cffff, 0xffd36bff, 0x6bffd3ff, 0xff6bb5ff, 0xb5b5b5ff,
];

impl<C: ControlLayer> Session<C> {
    /// イベントを1つエンティティストアに適用する
    pub(crate) fn apply_event(&mut self, event: CtrlEvent) {
        match event {
            CtrlEvent::Started => info!("target started"),
            CtrlEvent::Stopped {
                cause,
                machine,
                process: _,
                thread,
                vaddr,
                exception_code,
            } => self.on_stopped(cause, machine, thread, vaddr, exception_code),
            CtrlEvent::NewProc {
                machine,
                process,
                pid,
                arch,
            } => {
                if self.processes().is_empty() {
                    breakpoint::reset_hit_counts(&mut self.store);
                }
                let machine_entity = self.machine_entity(machine);
                let e = self.store.alloc(machine_entity, EntityKind::Process, None);
                self.store.equip_ctrl_machine(e, machine);
                self.store.equip_ctrl_handle(e, process);
                self.store.equip_ctrl_id(e, pid);
                self.store.equip_arch(e, arch);
                debug!("new process {} (pid {})", process, pid);
            }
            CtrlEvent::NewThread {
                machine,
                process,
                thread,
                tid,
                arch,
                stack_base,
                tls_root,
                rip,
            } => {
                let process_entity = self.store.entity_from_ctrl(machine, process);
                if process_entity.is_nil() {
                    warn!("new thread {} for unknown process {}", thread, process);
                    return;
                }
                let thread_count = self
                    .store
                    .children(process_entity)
                    .filter(|&c| self.store.kind(c) == EntityKind::Thread)
                    .count();
                let e = self.store.alloc(process_entity, EntityKind::Thread, None);
                self.store.equip_ctrl_machine(e, machine);
                self.store.equip_ctrl_handle(e, thread);
                self.store.equip_ctrl_id(e, tid);
                self.store.equip_arch(e, arch);
                self.store.equip_stack_base(e, stack_base);
                self.store.equip_tls_root(e, tls_root);
                self.store
                    .equip_color(e, THREAD_COLORS[thread_count % THREAD_COLORS.len()]);

                let pending = self.pending_thread_name(machine, tid);
                if !pending.is_nil() {
                    let name = self.store.name(pending).to_string();
                    self.store.equip_name(e, &name, None);
                    self.store.release(pending, None);
                }

                if self.selected_thread().is_nil() {
                    self.selected_thread = self.store.handle_of(e);
                    self.selected_unwind = 0;
                    self.selected_inline_depth = 0;
                }
                debug!("new thread {} (tid {}, rip {:#x})", thread, tid, rip);
            }
            CtrlEvent::NewModule {
                machine,
                process,
                module,
                path,
                vaddr_range,
            } => {
                let process_entity = self.store.entity_from_ctrl(machine, process);
                if process_entity.is_nil() {
                    warn!("new module {} for unknown process {}", module, process);
                    return;
                }
                let e = self.store.alloc(process_entity, EntityKind::Module, None);
                self.store.equip_ctrl_machine(e, machine);
                self.store.equip_ctrl_handle(e, module);
                self.store.equip_vaddr_range(e, vaddr_range.clone());
                self.store.equip_name(e, &path.to_string_lossy(), None);
                let debug_path = self.store.alloc(e, EntityKind::DebugInfoPath, None);
                self.store.equip_name(debug_path, &path.to_string_lossy(), None);
                debug!(
                    "new module {} at {:#x}..{:#x}",
                    path.display(),
                    vaddr_range.start,
                    vaddr_range.end
                );
            }
            CtrlEvent::EndProc { process, exit_code } => self.on_end_proc(process, exit_code),
            CtrlEvent::EndThread { thread } => {
                self.unwind_cache.remove(&thread);
                let e = self.store.entity_from_ctrl_any_machine(thread);
                if e.is_nil() {
                    warn!("end of unknown thread {}", thread);
                    return;
                }
                self.store.release(e, None);
            }
            CtrlEvent::EndModule { module } => {
                let e = self.store.entity_from_ctrl_any_machine(module);
                if e.is_nil() {
                    warn!("end of unknown module {}", module);
                    return;
                }
                self.store.release(e, None);
            }
            CtrlEvent::ModuleDebugInfoPathChange { module, path } => {
                let e = self.store.entity_from_ctrl_any_machine(module);
                if e.is_nil() {
                    warn!("debug info path change for unknown module {}", module);
                    return;
                }
                let mut debug_path = self.store.child_of_kind(e, EntityKind::DebugInfoPath);
                if debug_path.is_nil() {
                    debug_path = self.store.alloc(e, EntityKind::DebugInfoPath, None);
                }
                self.store
                    .equip_name(debug_path, &path.to_string_lossy(), None);
            }
            CtrlEvent::ThreadName {
                machine,
                process: _,
                thread,
                tid,
                name,
            } => {
                let mut e = self.store.entity_from_ctrl(machine, thread);
                if e.is_nil() {
                    e = self.thread_from_tid(machine, tid);
                }
                if e.is_nil() {
                    // スレッドの生成より先に名前が届いた
                    let pending = self
                        .store
                        .alloc(Entity::NIL, EntityKind::PendingThreadName, None);
                    self.store.equip_ctrl_machine(pending, machine);
                    self.store.equip_ctrl_id(pending, tid);
                    self.store.equip_name(pending, &name, None);
                    self.store
                        .equip_death_timer(pending, self.config.death_timer_frames);
                } else {
                    self.store.equip_name(e, &name, None);
                }
            }
            CtrlEvent::DebugString { thread, text } => {
                trace!("debug string from {}: {:?}", thread, text);
                self.output.push_str(&text);
            }
            CtrlEvent::MemReserve { process, range }
            | CtrlEvent::MemCommit { process, range }
            | CtrlEvent::MemDecommit { process, range }
            | CtrlEvent::MemRelease { process, range } => {
                trace!("memory map change in {}: {:#x}..{:#x}", process, range.start, range.end);
            }
            CtrlEvent::LaunchDone { msg_id, process } | CtrlEvent::AttachDone { msg_id, process } => {
                let request = self.ctrl_request(msg_id);
                let process_entity = self.store.entity_from_ctrl_any_machine(process);
                let target = self.store.entity_of(self.store.link(request));
                if !process_entity.is_nil() && !target.is_nil() {
                    let handle = self.store.handle_of(target);
                    self.store.equip_link(process_entity, handle);
                }
                self.store.mark_for_deletion(request);
            }
            CtrlEvent::KillDone { msg_id } | CtrlEvent::DetachDone { msg_id } => {
                let request = self.ctrl_request(msg_id);
                self.store.mark_for_deletion(request);
            }
            CtrlEvent::Error { text } => {
                warn!("control layer error: {}", text);
                self.push_error(text);
            }
            CtrlEvent::ThreadRegs { .. }
            | CtrlEvent::MemoryBlock { .. }
            | CtrlEvent::ThreadUnwind { .. } => {}
        }
    }

    fn on_stopped(
        &mut self,
        cause: StopCause,
        machine: MachineId,
        thread: CtrlHandle,
        vaddr: u64,
        exception_code: u32,
    ) {
        info!("stopped: {:?} at {:#x}", cause, vaddr);
        self.run.running = false;
        self.run.soft_halt_issued = false;

        let thread_entity = self.store.entity_from_ctrl(machine, thread);
        let thread_handle = self.store.handle_of(thread_entity);
        self.last_stop = Some(StopInfo {
            cause,
            thread: thread_handle,
            vaddr,
            exception_code,
            frame: self.frame_index,
        });

        if self.config.select_stopped_thread && !thread_entity.is_nil() {
            self.selected_thread = thread_handle;
            self.selected_unwind = 0;
            self.selected_inline_depth = 0;
        }

        if cause == StopCause::UserBreakpoint {
            let hits = self.record_breakpoint_hits(thread_entity, vaddr);
            debug!("{} breakpoint(s) hit at {:#x}", hits, vaddr);
        }

        for e in self.store.pre_order() {
            if self.store.flags(e).contains(EntityFlags::DIES_ON_RUN_STOP) {
                self.store.mark_for_deletion(e);
            }
        }

        match cause {
            StopCause::InterruptedByException => {
                self.push_error(format!("Stopped by exception {:#x}.", exception_code));
            }
            StopCause::InterruptedByTrap => {
                self.push_error(format!("Stopped by a trap instruction at {:#x}.", vaddr));
            }
            StopCause::Error => self.push_error("Stopped by a control layer error."),
            _ => {}
        }

        if self.run.refresh_after_halt {
            self.run.refresh_after_halt = false;
            if cause == StopCause::InterruptedByHalt {
                self.cmds.push_back(Cmd::bare(CmdKind::SoftHaltRefresh));
            }
        }
    }

    fn on_end_proc(&mut self, process: CtrlHandle, exit_code: u32) {
        let e = self.store.entity_from_ctrl_any_machine(process);
        if e.is_nil() {
            warn!("end of unknown process {}", process);
            return;
        }
        info!("process {} exited with code {}", process, exit_code);

        let target = self.store.entity_of(self.store.link(e));
        if self.store.kind(target) == EntityKind::Target {
            let ended = self.store.alloc(Entity::NIL, EntityKind::EndedProcess, None);
            let handle = self.store.handle_of(target);
            self.store.equip_link(ended, handle);
            self.store.equip_value(ended, exit_code as u64);
            let pid = self.store.ctrl_id(e);
            self.store.equip_ctrl_id(ended, pid);
        }

        let threads: Vec<CtrlHandle> = self
            .store
            .children(e)
            .filter(|&c| self.store.kind(c) == EntityKind::Thread)
            .map(|t| self.store.ctrl_handle(t))
            .collect();
        for thread in threads {
            self.unwind_cache.remove(&thread);
        }
        self.store.release(e, None);
    }

    /// 停止位置をデバッグ情報で解決し、一致するブレークポイントのヒット数を進める
    fn record_breakpoint_hits(&mut self, thread: Entity, vaddr: u64) -> usize {
        let process = self.store.ancestor_of_kind(thread, EntityKind::Process);
        let module = self.store.module_from_vaddr(process, vaddr);
        let (line, symbol) = match module_location(&self.store, module) {
            Some((path, base)) => (
                self.debug_info.line_info(&path, vaddr - base),
                self.debug_info.symbol_name(&path, vaddr - base),
            ),
            None => (None, None),
        };
        let site = StopSite {
            vaddr,
            file: line.as_ref().map(|l| l.file.as_str()),
            line: line.as_ref().map(|l| l.line as u64),
            symbol: symbol.as_deref(),
        };
        breakpoint::record_hits(&mut self.store, &site)
    }

    fn machine_entity(&mut self, machine: MachineId) -> Entity {
        let existing = self.store.machine_from_id(machine);
        if !existing.is_nil() {
            return existing;
        }
        let e = self.store.alloc(Entity::NIL, EntityKind::Machine, None);
        self.store.equip_ctrl_machine(e, machine);
        let name = if machine == MachineId::LOCAL {
            "local".to_string()
        } else {
            format!("machine {}", machine.0)
        };
        self.store.equip_name(e, &name, None);
        e
    }

    fn pending_thread_name(&self, machine: MachineId, tid: u64) -> Entity {
        self.store
            .entities_of_kind(EntityKind::PendingThreadName)
            .into_iter()
            .find(|&p| self.store.ctrl_machine(p) == machine && self.store.ctrl_id(p) == tid)
            .unwrap_or(Entity::NIL)
    }

    fn thread_from_tid(&self, machine: MachineId, tid: u64) -> Entity {
        self.store
            .entities_of_kind(EntityKind::Thread)
            .into_iter()
            .find(|&t| self.store.ctrl_machine(t) == machine && self.store.ctrl_id(t) == tid)
            .unwrap_or(Entity::NIL)
    }

    pub(crate) fn ctrl_request(&self, msg_id: u64) -> Entity {
        self.store
            .entities_of_kind(EntityKind::CtrlRequest)
            .into_iter()
            .find(|&r| self.store.ctrl_id(r) == msg_id)
            .unwrap_or(Entity::NIL)
    }
}

/// モジュールのパスとロードベース
pub(crate) fn module_location(store: &EntityStore, module: Entity) -> Option<(PathBuf, u64)> {
    let range = store.vaddr_range(module)?;
    let name = store.name(module);
    (!name.is_empty()).then(|| (PathBuf::from(name), range.start))
}
