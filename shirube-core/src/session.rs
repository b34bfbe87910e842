//! セッションの制御ループ
//!
//! 外部のドライバが1フレームごとに `begin_frame` → `process_commands` → `end_frame` を
//! 呼び出します。フレーム内で制御レイヤを待つことはありません。停止の要求はイベント
//! キューを通じて後続のフレームで結果が届きます。

use crate::breakpoint;
use crate::command::{Cmd, CmdKind, CmdParams, ParamSlots};
use crate::config::SessionConfig;
use crate::disasm::Disassembler;
use crate::entity::{EntityStore, MutationSignals};
use crate::history::History;
use crate::kind::{EntityFlags, EntityKind};
use crate::{Entity, Handle};
use shirube_ctrl::{
    ControlLayer, CtrlHandle, CtrlMsg, FreezeState, RunParams, StopCause, TrapList, Unwind,
};
use shirube_dwarf::DebugInfo;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// 直近の停止
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopInfo {
    pub cause: StopCause,
    pub thread: Handle,
    pub vaddr: u64,
    pub exception_code: u32,
    /// 停止を処理したフレーム番号
    pub frame: u64,
}

/// 設定書き出し要求の回数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigWrites {
    pub user: u64,
    pub project: u64,
}

/// 実行状態
#[derive(Debug, Default)]
pub(crate) struct RunState {
    /// Run / SingleStep を送ってから停止を受け取るまで
    pub(crate) running: bool,
    /// ソフト停止のために出した停止要求が未完了
    pub(crate) soft_halt_issued: bool,
    /// 停止後に同じ実行を再開する
    pub(crate) refresh_after_halt: bool,
    /// 最後に送った Run のパラメータ
    pub(crate) last_run: Option<RunParams>,
    /// 停止中に観測したレジスタ/メモリ世代
    pub(crate) reg_gen: u64,
    pub(crate) mem_gen: u64,
}

/// デバッグセッション
pub struct Session<C: ControlLayer> {
    pub(crate) config: SessionConfig,
    pub(crate) store: EntityStore,
    pub(crate) history: History,
    pub(crate) control: C,
    pub(crate) debug_info: Box<dyn DebugInfo>,
    pub(crate) disasm: Box<dyn Disassembler>,
    pub(crate) cmds: VecDeque<Cmd>,
    pub(crate) msgs: Vec<CtrlMsg>,
    pub(crate) run: RunState,
    pub(crate) frame_index: u64,
    pub(crate) msg_id_gen: u64,
    pub(crate) selected_thread: Handle,
    pub(crate) selected_unwind: u64,
    /// 選択フレーム内のインライン展開の深さ。スレッドやフレームの選択が変わると 0 に戻る
    pub(crate) selected_inline_depth: u64,
    pub(crate) solo_stepping: bool,
    /// スレッドごとのアンワインドと、取得時のレジスタ世代
    pub(crate) unwind_cache: HashMap<CtrlHandle, (Unwind, u64)>,
    pub(crate) last_stop: Option<StopInfo>,
    pub(crate) errors: Vec<String>,
    pub(crate) output: String,
    pub(crate) config_writes: ConfigWrites,
}

impl<C: ControlLayer> Session<C> {
    pub fn new(
        config: SessionConfig,
        control: C,
        debug_info: Box<dyn DebugInfo>,
        disasm: Box<dyn Disassembler>,
    ) -> Self {
        let solo_stepping = config.solo_stepping;
        Self {
            config,
            store: EntityStore::new(),
            history: History::new(),
            control,
            debug_info,
            disasm,
            cmds: VecDeque::new(),
            msgs: Vec::new(),
            run: RunState::default(),
            frame_index: 0,
            msg_id_gen: 0,
            selected_thread: Handle::ZERO,
            selected_unwind: 0,
            selected_inline_depth: 0,
            solo_stepping,
            unwind_cache: HashMap::new(),
            last_stop: None,
            errors: Vec::new(),
            output: String::new(),
            config_writes: ConfigWrites::default(),
        }
    }

    //- フレーム

    /// 1フレームぶん進める
    pub fn frame(&mut self) {
        self.begin_frame();
        self.process_commands();
        self.end_frame();
    }

    /// フレームを開始し、制御レイヤのイベントを適用する
    pub fn begin_frame(&mut self) {
        self.frame_index += 1;

        for event in self.control.poll_events() {
            self.apply_event(event);
        }

        if !self.run.running {
            let reg_gen = self.control.reg_gen();
            let mem_gen = self.control.mem_gen();
            if reg_gen != self.run.reg_gen || mem_gen != self.run.mem_gen {
                debug!(
                    "register/memory generation changed ({} -> {}, {} -> {}); dropping unwind cache",
                    self.run.reg_gen, reg_gen, self.run.mem_gen, mem_gen
                );
                self.unwind_cache.clear();
                self.run.reg_gen = reg_gen;
                self.run.mem_gen = mem_gen;
            }
        }
    }

    /// キューのコマンドを順に処理する
    ///
    /// コマンドが積んだ後続コマンドも同じフレーム内で処理されます。
    pub fn process_commands(&mut self) {
        self.consume_signals();
        while let Some(cmd) = self.cmds.pop_front() {
            debug!("process command: {}", cmd.kind);
            self.run_command(cmd);
        }
    }

    /// 停止要求の発行、メッセージの送信、削除予定エンティティの掃除
    pub fn end_frame(&mut self) {
        self.consume_signals();

        if !self.msgs.is_empty() {
            if self.control.send(self.msgs.clone()) {
                debug!("sent {} control message(s)", self.msgs.len());
                self.msgs.clear();
            } else {
                warn!(
                    "failed to send {} control message(s); retrying next frame",
                    self.msgs.len()
                );
            }
        }

        self.sweep_deletions();
    }

    /// エンティティ変更の通知を処理する
    fn consume_signals(&mut self) {
        let MutationSignals {
            soft_halt,
            debug_info_map,
            user_config,
            profile_config,
        } = self.store.take_signals();

        if soft_halt && self.run.running {
            self.request_soft_halt();
        }
        if debug_info_map {
            self.unwind_cache.clear();
        }
        if user_config {
            self.cmds.push_back(Cmd::bare(CmdKind::WriteUserData));
        }
        if profile_config {
            self.cmds.push_back(Cmd::bare(CmdKind::WriteProjectData));
        }
    }

    /// 実行中のターゲットを一旦止め、停止後に同じ実行を再開する
    pub(crate) fn request_soft_halt(&mut self) {
        if !self.run.running || self.run.soft_halt_issued {
            return;
        }
        info!("soft halt requested");
        self.run.soft_halt_issued = true;
        self.run.refresh_after_halt = true;
        self.control.halt();
    }

    /// 削除マークまたは死亡タイマー切れのエンティティを削除する
    ///
    /// ユーザー定義寿命の種別は履歴付きで論理削除し、それ以外と停止時に消える
    /// 一時エンティティは解放します。
    fn sweep_deletions(&mut self) {
        let root = self.store.root();
        let mut e = self.store.next_pre_order(root, root);
        while !e.is_nil() {
            if self.store.is_deleted(e) {
                e = self.store.next_after_subtree(e, root);
                continue;
            }
            let expired = self.store.tick_death_timer(e);
            if !expired && !self.store.is_marked_for_deletion(e) {
                e = self.store.next_pre_order(e, root);
                continue;
            }

            let next = self.store.next_after_subtree(e, root);
            let kind = self.store.kind(e);
            let transient = self.store.flags(e).contains(EntityFlags::DIES_ON_RUN_STOP);
            if kind.is_user_defined_lifetime() && !transient {
                debug!("soft delete {} {}", kind, self.store.handle_of(e));
                self.history.push_batch(&self.store, None);
                self.store.soft_delete(e, Some(&mut self.history));
            } else {
                debug!("release {} {}", kind, self.store.handle_of(e));
                self.store.release(e, None);
            }
            e = next;
        }
    }

    //- コマンドキュー

    pub fn push_cmd(&mut self, kind: CmdKind, params: CmdParams) {
        self.cmds.push_back(Cmd::new(kind, params));
    }

    pub fn push(&mut self, cmd: Cmd) {
        self.cmds.push_back(cmd);
    }

    pub(crate) fn push_error(&mut self, text: impl Into<String>) {
        self.cmds.push_back(Cmd::error(text));
    }

    pub(crate) fn next_msg_id(&mut self) -> u64 {
        self.msg_id_gen += 1;
        self.msg_id_gen
    }

    //- 共通ヘルパ

    /// パラメータの entity 欄、なければ id 欄からエンティティを得る
    pub(crate) fn param_entity(&self, params: &CmdParams) -> Entity {
        if params.has(ParamSlots::ENTITY) {
            self.store.entity_of(params.entity)
        } else if params.has(ParamSlots::ID) {
            self.store.entity_from_id(params.id)
        } else {
            Entity::NIL
        }
    }

    /// パラメータの thread 欄、なければ選択中のスレッド
    pub(crate) fn param_thread(&self, params: &CmdParams) -> Entity {
        let handle = if params.has(ParamSlots::THREAD) {
            params.thread
        } else {
            self.selected_thread
        };
        let thread = self.store.entity_of(handle);
        if self.store.kind(thread) == EntityKind::Thread {
            thread
        } else {
            Entity::NIL
        }
    }

    pub(crate) fn processes(&self) -> Vec<Entity> {
        self.store.entities_of_kind(EntityKind::Process)
    }

    /// 実行メッセージのパラメータを組み立てる
    ///
    /// 全スレッドが凍結されていて実行できない場合は None を返します。
    pub(crate) fn build_run_params(&mut self, thread: Entity, traps: TrapList) -> Option<RunParams> {
        let threads = self.store.entities_of_kind(EntityKind::Thread);
        let freeze = if self.solo_stepping && !thread.is_nil() {
            FreezeState {
                solo: true,
                threads: vec![(self.store.ctrl_machine(thread), self.store.ctrl_handle(thread))],
            }
        } else {
            let frozen: Vec<_> = threads
                .iter()
                .filter(|&&t| self.thread_is_frozen(t))
                .map(|&t| (self.store.ctrl_machine(t), self.store.ctrl_handle(t)))
                .collect();
            if !threads.is_empty() && frozen.len() == threads.len() {
                return None;
            }
            FreezeState {
                solo: false,
                threads: frozen,
            }
        };

        let process = self.store.ancestor_of_kind(thread, EntityKind::Process);
        Some(RunParams {
            msg_id: self.next_msg_id(),
            machine: self.store.ctrl_machine(thread),
            process: self.store.ctrl_handle(process),
            thread: self.store.ctrl_handle(thread),
            exception_filters: self.config.exception_filters,
            traps,
            user_breakpoints: breakpoint::user_breakpoints(&self.store),
            freeze,
        })
    }

    /// スレッド自身か、そのプロセス・マシンが凍結されているか
    pub(crate) fn thread_is_frozen(&self, thread: Entity) -> bool {
        let mut e = thread;
        while !e.is_nil() {
            if self.store.is_frozen(e) {
                return true;
            }
            e = self.store.parent(e);
        }
        false
    }

    pub(crate) fn send_run(&mut self, params: RunParams) {
        info!("run (traps: {}, breakpoints: {})", params.traps.len(), params.user_breakpoints.len());
        // 送るパラメータは現在のブレークポイントを含んでいる
        self.store.clear_soft_halt_signal();
        self.run.running = true;
        self.run.last_run = Some(params.clone());
        self.msgs.push(CtrlMsg::Run(params));
    }

    pub(crate) fn send_single_step(&mut self, params: RunParams) {
        info!("single step");
        self.store.clear_soft_halt_signal();
        self.run.running = true;
        self.msgs.push(CtrlMsg::SingleStep(params));
    }

    /// アンワインドを取得する（キャッシュ優先）
    pub(crate) fn thread_unwind(&mut self, thread: CtrlHandle) -> Option<(Unwind, u64)> {
        if let Some(cached) = self.unwind_cache.get(&thread) {
            return Some(cached.clone());
        }
        let unwind = self.control.unwind(thread)?;
        let reg_gen = self.control.reg_gen();
        self.unwind_cache.insert(thread, (unwind.clone(), reg_gen));
        Some((unwind, reg_gen))
    }

    //- 参照

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// ストアを直接操作する（ドライバやテスト用）
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    pub fn is_running(&self) -> bool {
        self.run.running
    }

    pub fn soft_halt_issued(&self) -> bool {
        self.run.soft_halt_issued
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn selected_thread(&self) -> Entity {
        self.store.entity_of(self.selected_thread)
    }

    pub fn selected_unwind(&self) -> u64 {
        self.selected_unwind
    }

    pub fn selected_inline_depth(&self) -> u64 {
        self.selected_inline_depth
    }

    pub fn solo_stepping(&self) -> bool {
        self.solo_stepping
    }

    pub fn last_stop(&self) -> Option<&StopInfo> {
        self.last_stop.as_ref()
    }

    pub fn pending_msgs(&self) -> &[CtrlMsg] {
        &self.msgs
    }

    pub fn pending_cmds(&self) -> usize {
        self.cmds.len()
    }

    pub fn config_writes(&self) -> ConfigWrites {
        self.config_writes
    }

    /// ユーザー向けエラーを取り出す
    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    /// デバッグ出力を取り出す
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}
