//! エンティティストア
//!
//! エンティティは固定長のフィールド列（u64 レーン）としてアリーナに並びます。
//! インデックス 0 は nil エンティティで、読み取りはすべて 0、書き込みは無視されます。
//! フィールドはバイトアドレスで参照できるため、履歴は任意のフィールドを
//! (アリーナ, オフセット, サイズ) で記録・再生できます。
//!
//! 解放されたスロットは種別の寿命に応じた2本のフリーリスト（システム観測の一時的な
//! 種別と、ユーザー定義寿命の種別）のどちらかに戻ります。

use crate::history::{Arena, DeltaTarget, History, StateAddr};
use crate::kind::{EntityFlags, EntityKind, KindFlags};
use crate::names::{NamePool, NameRef};
use crate::{Entity, Handle};
use shirube_ctrl::{Arch, CtrlHandle, MachineId};
use std::collections::VecDeque;
use std::ops::Range;

/// レーン1本のバイト数
const LANE_SIZE: u64 = 8;

/// エンティティのフィールド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Next,
    Prev,
    First,
    Last,
    Parent,
    Kind,
    Generation,
    Id,
    Flags,
    Deleted,
    Disabled,
    Frozen,
    Name,
    TextLine,
    TextColumn,
    LinkIndex,
    LinkGeneration,
    Value,
    Vaddr,
    VaddrMin,
    VaddrMax,
    Color,
    CtrlMachine,
    CtrlHandle,
    CtrlId,
    Arch,
    StackBase,
    TlsRoot,
    DeathTimer,
    Subkind,
    /// 子リストの構造スタンプ。子の連結・切り離しのたびに記録外でも更新される
    Shape,
}

const FIELD_COUNT: usize = 31;

/// 複製時にコピーするペイロード
const PAYLOAD_FIELDS: [Field; 12] = [
    Field::Flags,
    Field::Disabled,
    Field::TextLine,
    Field::TextColumn,
    Field::LinkIndex,
    Field::LinkGeneration,
    Field::Value,
    Field::Vaddr,
    Field::VaddrMin,
    Field::VaddrMax,
    Field::Color,
    Field::Subkind,
];

/// ストアの大域状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Global {
    Root,
    FreeEphemeral,
    FreeUser,
    FreeEphemeralCount,
    FreeUserCount,
    ActiveEphemeralCount,
    ActiveUserCount,
    FreeEphemeralStamp,
    FreeUserStamp,
    IdGen,
    StampGen,
}

const GLOBAL_COUNT: usize = 11;

/// 寿命の区分ごとのフリーリストとカウンタ
#[derive(Debug, Clone, Copy)]
struct Lifetime {
    head: Global,
    free: Global,
    active: Global,
    stamp: Global,
}

impl Lifetime {
    const EPHEMERAL: Lifetime = Lifetime {
        head: Global::FreeEphemeral,
        free: Global::FreeEphemeralCount,
        active: Global::ActiveEphemeralCount,
        stamp: Global::FreeEphemeralStamp,
    };
    const USER: Lifetime = Lifetime {
        head: Global::FreeUser,
        free: Global::FreeUserCount,
        active: Global::ActiveUserCount,
        stamp: Global::FreeUserStamp,
    };

    fn of(kind: EntityKind) -> Lifetime {
        if kind.is_user_defined_lifetime() {
            Self::USER
        } else {
            Self::EPHEMERAL
        }
    }

    fn addrs(self) -> [StateAddr; 4] {
        [
            EntityStore::global_addr(self.head),
            EntityStore::global_addr(self.free),
            EntityStore::global_addr(self.active),
            EntityStore::global_addr(self.stamp),
        ]
    }
}

/// エンティティ変更の通知によって立つフラグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSignals {
    /// 実行中のターゲットを一旦止めて実行状態を更新する必要がある
    pub soft_halt: bool,
    /// モジュールとデバッグ情報の対応が変わった
    pub debug_info_map: bool,
    /// ユーザー設定の書き出しが必要
    pub user_config: bool,
    /// プロジェクト設定の書き出しが必要
    pub profile_config: bool,
}

/// 子エンティティのイテレータ
pub struct Children<'a> {
    store: &'a EntityStore,
    next: Entity,
}

impl Iterator for Children<'_> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        if self.next.is_nil() {
            return None;
        }
        let current = self.next;
        self.next = self.store.next_sibling(current);
        Some(current)
    }
}

/// エンティティストア
#[derive(Debug)]
pub struct EntityStore {
    lanes: Vec<u64>,
    state: Vec<u64>,
    names: NamePool,
    signals: MutationSignals,
}

impl EntityStore {
    /// nil とルートだけを持つストアを作成する
    pub fn new() -> Self {
        let mut store = Self {
            lanes: vec![0; FIELD_COUNT],
            state: vec![0; GLOBAL_COUNT + EntityKind::COUNT],
            names: NamePool::new(),
            signals: MutationSignals::default(),
        };
        let root = store.push_slot();
        store.set(root, Field::Kind, EntityKind::Root as u64);
        store.set(root, Field::Generation, 1);
        store.set(root, Field::Id, 1);
        store.set_global(Global::IdGen, 1);
        store.set_global(Global::ActiveEphemeralCount, 1);
        store.set_global(Global::Root, root.0);
        store.bump_kind_gen(EntityKind::Root);
        store
    }

    //- レーン操作

    fn slot_count(&self) -> u64 {
        (self.lanes.len() / FIELD_COUNT) as u64
    }

    fn lane_index(&self, e: Entity, field: Field) -> Option<usize> {
        (e.0 < self.slot_count()).then(|| e.0 as usize * FIELD_COUNT + field as usize)
    }

    fn get(&self, e: Entity, field: Field) -> u64 {
        self.lane_index(e, field).map_or(0, |i| self.lanes[i])
    }

    fn set(&mut self, e: Entity, field: Field, value: u64) {
        if e.is_nil() {
            return;
        }
        if let Some(i) = self.lane_index(e, field) {
            self.lanes[i] = value;
        }
    }

    fn push_slot(&mut self) -> Entity {
        let index = self.slot_count();
        self.lanes.resize(self.lanes.len() + FIELD_COUNT, 0);
        Entity(index)
    }

    fn global(&self, g: Global) -> u64 {
        self.state[g as usize]
    }

    fn set_global(&mut self, g: Global, value: u64) {
        self.state[g as usize] = value;
    }

    /// 記録外でも単調に増えるスタンプを払い出す
    fn next_stamp(&mut self) -> u64 {
        let stamp = self.global(Global::StampGen) + 1;
        self.set_global(Global::StampGen, stamp);
        stamp
    }

    fn touch(&mut self, e: Entity) {
        let stamp = self.next_stamp();
        self.set(e, Field::Shape, stamp);
    }

    fn touch_global(&mut self, g: Global) {
        let stamp = self.next_stamp();
        self.set_global(g, stamp);
    }

    fn bump_kind_gen(&mut self, kind: EntityKind) {
        self.state[GLOBAL_COUNT + kind.index()] += 1;
    }

    /// フィールドのバイトアドレス
    pub fn field_addr(&self, e: Entity, field: Field) -> StateAddr {
        StateAddr::new(
            Arena::Entities,
            (e.0 * FIELD_COUNT as u64 + field as u64) * LANE_SIZE,
        )
    }

    fn global_addr(g: Global) -> StateAddr {
        StateAddr::new(Arena::State, g as u64 * LANE_SIZE)
    }

    fn kind_gen_addr(kind: EntityKind) -> StateAddr {
        StateAddr::new(Arena::State, (GLOBAL_COUNT + kind.index()) as u64 * LANE_SIZE)
    }

    fn journal(&self, hist: Option<&mut History>, e: Entity, fields: &[Field]) {
        let Some(hist) = hist else {
            return;
        };
        if e.is_nil() {
            return;
        }
        for &field in fields {
            hist.push_delta(self, self.field_addr(e, field), LANE_SIZE as usize);
        }
    }

    fn journal_state(&self, hist: Option<&mut History>, addrs: &[StateAddr]) {
        if let Some(hist) = hist {
            for &addr in addrs {
                hist.push_delta(self, addr, LANE_SIZE as usize);
            }
        }
    }

    /// 操作後のスタンプを履歴のガードとして登録する
    fn guard(&self, hist: Option<&mut History>, addrs: &[StateAddr]) {
        if let Some(hist) = hist {
            for &addr in addrs {
                hist.push_guard(self, addr);
            }
        }
    }

    fn shape_addr(&self, e: Entity) -> Option<StateAddr> {
        (!e.is_nil()).then(|| self.field_addr(e, Field::Shape))
    }

    //- ハンドル

    pub fn root(&self) -> Entity {
        Entity(self.global(Global::Root))
    }

    pub fn handle_of(&self, e: Entity) -> Handle {
        if e.is_nil() || e.0 >= self.slot_count() {
            return Handle::ZERO;
        }
        Handle::new(e.0, self.generation(e))
    }

    /// ハンドルを解決する。範囲外や世代不一致は nil
    pub fn entity_of(&self, handle: Handle) -> Entity {
        if handle.index == 0 || handle.index >= self.slot_count() {
            return Entity::NIL;
        }
        let e = Entity(handle.index);
        if self.generation(e) != handle.generation {
            return Entity::NIL;
        }
        e
    }

    /// 世代を無視してインデックスからエンティティを得る
    pub fn entity_at(&self, index: u64) -> Entity {
        if index < self.slot_count() {
            Entity(index)
        } else {
            Entity::NIL
        }
    }

    //- 読み取り

    pub fn kind(&self, e: Entity) -> EntityKind {
        EntityKind::from_u64(self.get(e, Field::Kind))
    }

    pub fn parent(&self, e: Entity) -> Entity {
        Entity(self.get(e, Field::Parent))
    }

    pub fn first_child(&self, e: Entity) -> Entity {
        Entity(self.get(e, Field::First))
    }

    pub fn last_child(&self, e: Entity) -> Entity {
        Entity(self.get(e, Field::Last))
    }

    pub fn next_sibling(&self, e: Entity) -> Entity {
        Entity(self.get(e, Field::Next))
    }

    pub fn prev_sibling(&self, e: Entity) -> Entity {
        Entity(self.get(e, Field::Prev))
    }

    pub fn generation(&self, e: Entity) -> u64 {
        self.get(e, Field::Generation)
    }

    pub fn id(&self, e: Entity) -> u64 {
        self.get(e, Field::Id)
    }

    pub fn flags(&self, e: Entity) -> EntityFlags {
        EntityFlags::from_bits_truncate(self.get(e, Field::Flags))
    }

    pub fn is_deleted(&self, e: Entity) -> bool {
        self.get(e, Field::Deleted) != 0
    }

    pub fn is_disabled(&self, e: Entity) -> bool {
        self.get(e, Field::Disabled) != 0
    }

    pub fn is_frozen(&self, e: Entity) -> bool {
        self.get(e, Field::Frozen) != 0
    }

    pub fn is_marked_for_deletion(&self, e: Entity) -> bool {
        self.flags(e).contains(EntityFlags::MARKED_FOR_DELETION)
    }

    pub fn name(&self, e: Entity) -> &str {
        self.names.get(NameRef::from_u64(self.get(e, Field::Name)))
    }

    pub fn text_point(&self, e: Entity) -> Option<(u64, u64)> {
        self.flags(e)
            .contains(EntityFlags::HAS_TEXT_POINT)
            .then(|| (self.get(e, Field::TextLine), self.get(e, Field::TextColumn)))
    }

    pub fn vaddr(&self, e: Entity) -> Option<u64> {
        self.flags(e)
            .contains(EntityFlags::HAS_VADDR)
            .then(|| self.get(e, Field::Vaddr))
    }

    pub fn vaddr_range(&self, e: Entity) -> Option<Range<u64>> {
        self.flags(e)
            .contains(EntityFlags::HAS_VADDR_RANGE)
            .then(|| self.get(e, Field::VaddrMin)..self.get(e, Field::VaddrMax))
    }

    pub fn value(&self, e: Entity) -> u64 {
        self.get(e, Field::Value)
    }

    pub fn color(&self, e: Entity) -> Option<u32> {
        self.flags(e)
            .contains(EntityFlags::HAS_COLOR)
            .then(|| self.get(e, Field::Color) as u32)
    }

    pub fn link(&self, e: Entity) -> Handle {
        if !self.flags(e).contains(EntityFlags::HAS_ENTITY_HANDLE) {
            return Handle::ZERO;
        }
        Handle::new(self.get(e, Field::LinkIndex), self.get(e, Field::LinkGeneration))
    }

    pub fn ctrl_machine(&self, e: Entity) -> MachineId {
        MachineId(self.get(e, Field::CtrlMachine))
    }

    pub fn ctrl_handle(&self, e: Entity) -> CtrlHandle {
        CtrlHandle(self.get(e, Field::CtrlHandle))
    }

    pub fn ctrl_id(&self, e: Entity) -> u64 {
        self.get(e, Field::CtrlId)
    }

    pub fn arch(&self, e: Entity) -> Arch {
        Arch::from_u64(self.get(e, Field::Arch))
    }

    pub fn stack_base(&self, e: Entity) -> u64 {
        self.get(e, Field::StackBase)
    }

    pub fn tls_root(&self, e: Entity) -> u64 {
        self.get(e, Field::TlsRoot)
    }

    pub fn death_timer(&self, e: Entity) -> u64 {
        self.get(e, Field::DeathTimer)
    }

    pub fn subkind(&self, e: Entity) -> u64 {
        self.get(e, Field::Subkind)
    }

    /// 種別ごとの確保世代（派生キャッシュの無効化判定用）
    pub fn kind_alloc_gen(&self, kind: EntityKind) -> u64 {
        self.state[GLOBAL_COUNT + kind.index()]
    }

    pub fn active_count(&self) -> u64 {
        self.global(Global::ActiveEphemeralCount) + self.global(Global::ActiveUserCount)
    }

    pub fn free_count(&self) -> u64 {
        self.global(Global::FreeEphemeralCount) + self.global(Global::FreeUserCount)
    }

    pub fn names(&self) -> &NamePool {
        &self.names
    }

    //- 確保と木構造

    fn link_last(&mut self, parent: Entity, e: Entity) {
        let last = self.last_child(parent);
        if last.is_nil() {
            self.set(parent, Field::First, e.0);
        } else {
            self.set(last, Field::Next, e.0);
        }
        self.set(e, Field::Prev, last.0);
        self.set(e, Field::Next, 0);
        self.set(parent, Field::Last, e.0);
        self.set(e, Field::Parent, parent.0);
        self.touch(parent);
    }

    fn unlink(&mut self, e: Entity) {
        let parent = self.parent(e);
        let prev = self.prev_sibling(e);
        let next = self.next_sibling(e);
        if prev.is_nil() {
            self.set(parent, Field::First, next.0);
        } else {
            self.set(prev, Field::Next, next.0);
        }
        if next.is_nil() {
            self.set(parent, Field::Last, prev.0);
        } else {
            self.set(next, Field::Prev, prev.0);
        }
        self.set(e, Field::Next, 0);
        self.set(e, Field::Prev, 0);
        self.set(e, Field::Parent, 0);
        self.touch(parent);
    }

    /// 付け替えで書き換わるリンクを記録する
    fn journal_unlink(&self, mut hist: Option<&mut History>, e: Entity) {
        let parent = self.parent(e);
        self.journal(hist.as_deref_mut(), parent, &[Field::First, Field::Last, Field::Shape]);
        self.journal(hist.as_deref_mut(), self.prev_sibling(e), &[Field::Next]);
        self.journal(hist.as_deref_mut(), self.next_sibling(e), &[Field::Prev]);
        self.journal(hist, e, &[Field::Next, Field::Prev, Field::Parent]);
    }

    fn journal_link_last(&self, mut hist: Option<&mut History>, parent: Entity, e: Entity) {
        self.journal(hist.as_deref_mut(), parent, &[Field::First, Field::Last, Field::Shape]);
        self.journal(hist.as_deref_mut(), self.last_child(parent), &[Field::Next]);
        self.journal(hist, e, &[Field::Next, Field::Prev, Field::Parent]);
    }

    /// エンティティを確保して `parent` の末尾の子にする
    ///
    /// `parent` が nil ならルートの子になります。ユーザー定義寿命の種別では、
    /// `hist` に構造フィールドの変更前の値を記録するため、確保全体を1つの操作として
    /// アンドゥできます。記録したバッチには親と自身の構造スタンプ、フリーリストの
    /// スタンプがガードとして付き、記録外の連結や確保が挟まると再生されません。
    pub fn alloc(&mut self, parent: Entity, kind: EntityKind, hist: Option<&mut History>) -> Entity {
        let mut hist = if kind.is_user_defined_lifetime() { hist } else { None };
        let parent = if parent.is_nil() { self.root() } else { parent };
        let lifetime = Lifetime::of(kind);

        self.journal_state(hist.as_deref_mut(), &lifetime.addrs());
        self.journal_state(hist.as_deref_mut(), &[Self::kind_gen_addr(kind)]);

        let head = Entity(self.global(lifetime.head));
        let e = if head.is_nil() {
            self.push_slot()
        } else {
            let next_free = self.get(head, Field::Next);
            self.set_global(lifetime.head, next_free);
            let free_count = self.global(lifetime.free).saturating_sub(1);
            self.set_global(lifetime.free, free_count);
            head
        };
        let active = self.global(lifetime.active) + 1;
        self.set_global(lifetime.active, active);
        self.touch_global(lifetime.stamp);

        self.journal(
            hist.as_deref_mut(),
            e,
            &[
                Field::Next,
                Field::Prev,
                Field::First,
                Field::Last,
                Field::Parent,
                Field::Generation,
                Field::Id,
                Field::Kind,
                Field::Shape,
            ],
        );
        self.journal_link_last(hist.as_deref_mut(), parent, e);

        // 世代以外をゼロにする
        let generation = self.generation(e);
        if let Some(start) = self.lane_index(e, Field::Next) {
            self.lanes[start..start + FIELD_COUNT].fill(0);
        }
        self.set(e, Field::Kind, kind as u64);
        self.link_last(parent, e);
        self.touch(e);

        let id = self.global(Global::IdGen) + 1;
        self.set_global(Global::IdGen, id);
        self.set(e, Field::Id, id);
        self.set(e, Field::Generation, generation + 1);
        self.bump_kind_gen(kind);

        let guards = [
            self.field_addr(parent, Field::Shape),
            self.field_addr(e, Field::Shape),
            Self::global_addr(lifetime.stamp),
        ];
        self.guard(hist, &guards);

        self.notify_mutation(e);
        e
    }

    /// `entity` を `old_parent` から `new_parent` の末尾へ付け替える
    ///
    /// `new_parent` が nil の場合は木から切り離すだけです。
    pub fn change_parent(
        &mut self,
        entity: Entity,
        old_parent: Entity,
        new_parent: Entity,
        mut hist: Option<&mut History>,
    ) {
        assert_eq!(
            self.parent(entity),
            old_parent,
            "change_parent: entity is not a child of old_parent"
        );
        if entity.is_nil() {
            return;
        }

        self.journal_unlink(hist.as_deref_mut(), entity);
        self.journal(
            hist.as_deref_mut(),
            new_parent,
            &[Field::First, Field::Last, Field::Shape],
        );
        self.journal(hist.as_deref_mut(), self.last_child(new_parent), &[Field::Next]);

        self.unlink(entity);
        if !new_parent.is_nil() {
            self.link_last(new_parent, entity);
        }

        let guards: Vec<StateAddr> = [old_parent, new_parent]
            .into_iter()
            .filter_map(|p| self.shape_addr(p))
            .collect();
        self.guard(hist, &guards);

        self.notify_mutation(entity);
        self.notify_mutation(new_parent);
        self.notify_mutation(old_parent);
    }

    /// `entity` とその子孫をすべて解放する
    ///
    /// 子孫は親より先に、前順走査の逆順で解放されます。解放した各エンティティの
    /// 解放前のハンドルを解放順に返します。履歴を渡さない場合は名前のチャンクも
    /// 解放します（履歴を渡す場合は、アンドゥで復元されうるため保持します）。
    pub fn release(&mut self, entity: Entity, mut hist: Option<&mut History>) -> Vec<Handle> {
        if entity.is_nil() || entity == self.root() || entity.0 >= self.slot_count() {
            return Vec::new();
        }

        let mut order = Vec::new();
        let mut n = entity;
        while !n.is_nil() {
            order.push(n);
            n = self.next_pre_order(n, entity);
        }

        let mut guards = Vec::new();
        let parent = self.parent(entity);
        if !parent.is_nil() {
            self.journal_unlink(hist.as_deref_mut(), entity);
            self.unlink(entity);
            guards.push(self.field_addr(parent, Field::Shape));
        }

        let mut freed = Vec::with_capacity(order.len());
        for &n in order.iter().rev() {
            let kind = self.kind(n);
            let lifetime = Lifetime::of(kind);

            self.journal(
                hist.as_deref_mut(),
                n,
                &[
                    Field::Next,
                    Field::Prev,
                    Field::First,
                    Field::Last,
                    Field::Parent,
                    Field::Generation,
                    Field::Frozen,
                    Field::Shape,
                ],
            );
            self.journal_state(hist.as_deref_mut(), &lifetime.addrs());
            self.journal_state(hist.as_deref_mut(), &[Self::kind_gen_addr(kind)]);

            freed.push(self.handle_of(n));

            if hist.is_none() {
                let name = NameRef::from_u64(self.get(n, Field::Name));
                self.names.release(name);
                self.set(n, Field::Name, 0);
            }
            self.set(n, Field::Frozen, 0);
            self.set(n, Field::First, 0);
            self.set(n, Field::Last, 0);
            self.set(n, Field::Prev, 0);
            self.set(n, Field::Parent, 0);
            let head = self.global(lifetime.head);
            self.set(n, Field::Next, head);
            self.set_global(lifetime.head, n.0);

            let free_count = self.global(lifetime.free) + 1;
            self.set_global(lifetime.free, free_count);
            let active = self.global(lifetime.active).saturating_sub(1);
            self.set_global(lifetime.active, active);
            self.touch_global(lifetime.stamp);
            self.touch(n);
            let generation = self.generation(n) + 1;
            self.set(n, Field::Generation, generation);
            self.bump_kind_gen(kind);

            guards.push(self.field_addr(n, Field::Shape));
            guards.push(Self::global_addr(lifetime.stamp));
        }
        self.guard(hist, &guards);
        freed
    }

    /// 論理削除する（ユーザー定義寿命の種別用）
    ///
    /// スロットは木に残り、世代が進むため古いハンドルは解決できなくなります。
    /// アンドゥで `deleted` と世代が戻ると、同じエンティティが元のハンドルで復活します。
    /// その間にスロットが解放・再利用されていれば、削除後の世代のガードで再生されません。
    pub fn soft_delete(&mut self, e: Entity, mut hist: Option<&mut History>) {
        if e.is_nil() {
            return;
        }
        let kind = self.kind(e);
        self.journal(hist.as_deref_mut(), e, &[Field::Deleted, Field::Generation]);
        self.journal_state(hist.as_deref_mut(), &[Self::kind_gen_addr(kind)]);

        self.set(e, Field::Deleted, 1);
        let generation = self.generation(e) + 1;
        self.set(e, Field::Generation, generation);
        self.clear_flags(e, EntityFlags::MARKED_FOR_DELETION);
        self.bump_kind_gen(kind);
        self.guard(hist, &[self.field_addr(e, Field::Generation)]);
        self.notify_mutation(e);
    }

    /// 部分木を幅優先で複製し、複製した根を返す
    pub fn duplicate(&mut self, src: Entity, mut hist: Option<&mut History>) -> Entity {
        if src.is_nil() || src == self.root() {
            return Entity::NIL;
        }
        let mut result = Entity::NIL;
        let mut queue = VecDeque::from([(src, self.parent(src))]);
        while let Some((s, dst_parent)) = queue.pop_front() {
            let d = self.alloc(dst_parent, self.kind(s), hist.as_deref_mut());
            for field in PAYLOAD_FIELDS {
                let value = self.get(s, field);
                self.set(d, field, value);
            }
            self.clear_flags(d, EntityFlags::MARKED_FOR_DELETION);
            let name = self.name(s).to_string();
            let name_ref = self.names.alloc(&name);
            self.set(d, Field::Name, name_ref.to_u64());

            if result.is_nil() {
                result = d;
            }
            let children: Vec<Entity> = self
                .children(s)
                .filter(|&c| !self.is_deleted(c))
                .collect();
            queue.extend(children.into_iter().map(|c| (c, d)));
        }
        self.notify_mutation(result);
        result
    }

    //- 走査

    pub fn children(&self, e: Entity) -> Children<'_> {
        Children {
            store: self,
            next: self.first_child(e),
        }
    }

    /// `subtree_root` 以下の前順走査で `e` の次
    pub fn next_pre_order(&self, e: Entity, subtree_root: Entity) -> Entity {
        let first = self.first_child(e);
        if !first.is_nil() {
            return first;
        }
        self.next_after_subtree(e, subtree_root)
    }

    /// `e` の部分木を飛ばした前順走査の次（削除しながらの走査に使う）
    pub fn next_after_subtree(&self, e: Entity, subtree_root: Entity) -> Entity {
        let mut p = e;
        while !p.is_nil() && p != subtree_root {
            let next = self.next_sibling(p);
            if !next.is_nil() {
                return next;
            }
            p = self.parent(p);
        }
        Entity::NIL
    }

    /// ルート以下を前順に列挙する（論理削除済みの部分木は除く）
    pub fn pre_order(&self) -> Vec<Entity> {
        let root = self.root();
        let mut out = Vec::new();
        let mut n = root;
        while !n.is_nil() {
            if self.is_deleted(n) {
                n = self.next_after_subtree(n, root);
                continue;
            }
            out.push(n);
            n = self.next_pre_order(n, root);
        }
        out
    }

    pub fn entities_of_kind(&self, kind: EntityKind) -> Vec<Entity> {
        self.pre_order()
            .into_iter()
            .filter(|&e| self.kind(e) == kind)
            .collect()
    }

    pub fn child_of_kind(&self, e: Entity, kind: EntityKind) -> Entity {
        self.children(e)
            .find(|&c| self.kind(c) == kind && !self.is_deleted(c))
            .unwrap_or(Entity::NIL)
    }

    pub fn ancestor_of_kind(&self, e: Entity, kind: EntityKind) -> Entity {
        let mut p = self.parent(e);
        while !p.is_nil() {
            if self.kind(p) == kind {
                return p;
            }
            p = self.parent(p);
        }
        Entity::NIL
    }

    pub fn child_from_name_and_kind(&self, parent: Entity, name: &str, kind: EntityKind) -> Entity {
        self.children(parent)
            .find(|&c| self.kind(c) == kind && !self.is_deleted(c) && self.name(c) == name)
            .unwrap_or(Entity::NIL)
    }

    pub fn entity_from_id(&self, id: u64) -> Entity {
        self.pre_order()
            .into_iter()
            .find(|&e| self.id(e) == id)
            .unwrap_or(Entity::NIL)
    }

    /// 制御レイヤのハンドルからエンティティを探す
    pub fn entity_from_ctrl(&self, machine: MachineId, handle: CtrlHandle) -> Entity {
        if handle.is_zero() {
            return Entity::NIL;
        }
        self.pre_order()
            .into_iter()
            .find(|&e| {
                self.flags(e).contains(EntityFlags::HAS_CTRL_HANDLE)
                    && self.ctrl_handle(e) == handle
                    && self.ctrl_machine(e) == machine
            })
            .unwrap_or(Entity::NIL)
    }

    /// マシンを問わず制御レイヤのハンドルからエンティティを探す
    pub fn entity_from_ctrl_any_machine(&self, handle: CtrlHandle) -> Entity {
        if handle.is_zero() {
            return Entity::NIL;
        }
        self.pre_order()
            .into_iter()
            .find(|&e| {
                self.flags(e).contains(EntityFlags::HAS_CTRL_HANDLE) && self.ctrl_handle(e) == handle
            })
            .unwrap_or(Entity::NIL)
    }

    pub fn machine_from_id(&self, machine: MachineId) -> Entity {
        self.entities_of_kind(EntityKind::Machine)
            .into_iter()
            .find(|&m| self.ctrl_machine(m) == machine)
            .unwrap_or(Entity::NIL)
    }

    /// プロセス内で `vaddr` を含むモジュール
    pub fn module_from_vaddr(&self, process: Entity, vaddr: u64) -> Entity {
        self.children(process)
            .find(|&m| {
                self.kind(m) == EntityKind::Module
                    && self.vaddr_range(m).is_some_and(|r| r.contains(&vaddr))
            })
            .unwrap_or(Entity::NIL)
    }

    //- フィールドの設定

    fn set_flags(&mut self, e: Entity, flags: EntityFlags) {
        let bits = self.flags(e) | flags;
        self.set(e, Field::Flags, bits.bits());
    }

    fn clear_flags(&mut self, e: Entity, flags: EntityFlags) {
        let bits = self.flags(e) - flags;
        self.set(e, Field::Flags, bits.bits());
    }

    /// 名前を設定する
    ///
    /// 履歴を渡した場合、古い名前のチャンクはアンドゥのために解放しません。
    pub fn equip_name(&mut self, e: Entity, name: &str, hist: Option<&mut History>) {
        if e.is_nil() {
            return;
        }
        let old = NameRef::from_u64(self.get(e, Field::Name));
        match hist {
            Some(hist) => self.journal(Some(hist), e, &[Field::Name]),
            None => self.names.release(old),
        }
        let new = self.names.alloc(name);
        self.set(e, Field::Name, new.to_u64());
        self.notify_mutation(e);
    }

    pub fn equip_text_point(&mut self, e: Entity, line: u64, column: u64, hist: Option<&mut History>) {
        self.journal(hist, e, &[Field::TextLine, Field::TextColumn, Field::Flags]);
        self.set(e, Field::TextLine, line);
        self.set(e, Field::TextColumn, column);
        self.set_flags(e, EntityFlags::HAS_TEXT_POINT);
        self.notify_mutation(e);
    }

    pub fn equip_vaddr(&mut self, e: Entity, vaddr: u64, hist: Option<&mut History>) {
        self.journal(hist, e, &[Field::Vaddr, Field::Flags]);
        self.set(e, Field::Vaddr, vaddr);
        self.set_flags(e, EntityFlags::HAS_VADDR);
        self.notify_mutation(e);
    }

    pub fn equip_disabled(&mut self, e: Entity, disabled: bool, hist: Option<&mut History>) {
        self.journal(hist, e, &[Field::Disabled]);
        self.set(e, Field::Disabled, disabled as u64);
        self.notify_mutation(e);
    }

    pub fn equip_vaddr_range(&mut self, e: Entity, range: Range<u64>) {
        self.set(e, Field::VaddrMin, range.start);
        self.set(e, Field::VaddrMax, range.end);
        self.set_flags(e, EntityFlags::HAS_VADDR_RANGE);
        self.notify_mutation(e);
    }

    pub fn equip_value(&mut self, e: Entity, value: u64) {
        self.set(e, Field::Value, value);
        self.set_flags(e, EntityFlags::HAS_U64);
        self.notify_mutation(e);
    }

    pub fn equip_color(&mut self, e: Entity, rgba: u32) {
        self.set(e, Field::Color, rgba as u64);
        self.set_flags(e, EntityFlags::HAS_COLOR);
        self.notify_mutation(e);
    }

    pub fn equip_link(&mut self, e: Entity, handle: Handle) {
        self.set(e, Field::LinkIndex, handle.index);
        self.set(e, Field::LinkGeneration, handle.generation);
        self.set_flags(e, EntityFlags::HAS_ENTITY_HANDLE);
        self.notify_mutation(e);
    }

    pub fn equip_ctrl_machine(&mut self, e: Entity, machine: MachineId) {
        self.set(e, Field::CtrlMachine, machine.0);
        self.set_flags(e, EntityFlags::HAS_CTRL_MACHINE_ID);
        self.notify_mutation(e);
    }

    pub fn equip_ctrl_handle(&mut self, e: Entity, handle: CtrlHandle) {
        self.set(e, Field::CtrlHandle, handle.0);
        self.set_flags(e, EntityFlags::HAS_CTRL_HANDLE);
        self.notify_mutation(e);
    }

    pub fn equip_ctrl_id(&mut self, e: Entity, id: u64) {
        self.set(e, Field::CtrlId, id);
        self.set_flags(e, EntityFlags::HAS_CTRL_ID);
        self.notify_mutation(e);
    }

    pub fn equip_arch(&mut self, e: Entity, arch: Arch) {
        self.set(e, Field::Arch, arch.to_u64());
        self.set_flags(e, EntityFlags::HAS_ARCH);
        self.notify_mutation(e);
    }

    pub fn equip_stack_base(&mut self, e: Entity, stack_base: u64) {
        self.set(e, Field::StackBase, stack_base);
        self.set_flags(e, EntityFlags::HAS_STACK_BASE);
    }

    pub fn equip_tls_root(&mut self, e: Entity, tls_root: u64) {
        self.set(e, Field::TlsRoot, tls_root);
        self.set_flags(e, EntityFlags::HAS_TLS_ROOT);
    }

    /// 指定フレーム数後に削除されるようにする
    pub fn equip_death_timer(&mut self, e: Entity, frames: u64) {
        self.set(e, Field::DeathTimer, frames);
        self.set_flags(e, EntityFlags::DIES_WITH_TIME);
    }

    pub fn equip_subkind(&mut self, e: Entity, subkind: u64) {
        self.set(e, Field::Subkind, subkind);
    }

    pub fn set_dies_on_run_stop(&mut self, e: Entity) {
        self.set_flags(e, EntityFlags::DIES_ON_RUN_STOP);
    }

    pub fn set_frozen(&mut self, e: Entity, frozen: bool) {
        self.set(e, Field::Frozen, frozen as u64);
    }

    pub fn mark_for_deletion(&mut self, e: Entity) {
        self.set_flags(e, EntityFlags::MARKED_FOR_DELETION);
    }

    /// 死亡タイマーを1つ進め、期限切れになったら true を返す
    pub fn tick_death_timer(&mut self, e: Entity) -> bool {
        if !self.flags(e).contains(EntityFlags::DIES_WITH_TIME) {
            return false;
        }
        let remaining = self.death_timer(e).saturating_sub(1);
        self.set(e, Field::DeathTimer, remaining);
        remaining == 0
    }

    //- 変更通知

    /// 変更されたエンティティから祖先をたどり、種別テーブルに従ってフラグを立てる
    pub fn notify_mutation(&mut self, entity: Entity) {
        let mut e = entity;
        let mut steps = 0;
        while !e.is_nil() && steps <= self.slot_count() {
            let flags = self.kind(e).flags();
            if e == entity {
                if flags.contains(KindFlags::LEAF_MUTATION_USER_CONFIG) {
                    self.signals.user_config = true;
                }
                if flags.contains(KindFlags::LEAF_MUTATION_PROFILE_CONFIG) {
                    self.signals.profile_config = true;
                }
                if flags.contains(KindFlags::LEAF_MUTATION_SOFT_HALT) {
                    self.signals.soft_halt = true;
                }
                if flags.contains(KindFlags::LEAF_MUTATION_DEBUG_INFO_MAP) {
                    self.signals.debug_info_map = true;
                }
            }
            if flags.contains(KindFlags::TREE_MUTATION_USER_CONFIG) {
                self.signals.user_config = true;
            }
            if flags.contains(KindFlags::TREE_MUTATION_PROFILE_CONFIG) {
                self.signals.profile_config = true;
            }
            if flags.contains(KindFlags::TREE_MUTATION_SOFT_HALT) {
                self.signals.soft_halt = true;
            }
            if flags.contains(KindFlags::TREE_MUTATION_DEBUG_INFO_MAP) {
                self.signals.debug_info_map = true;
            }
            e = self.parent(e);
            steps += 1;
        }
    }

    /// 溜まっている変更フラグを取り出してクリアする
    pub fn take_signals(&mut self) -> MutationSignals {
        std::mem::take(&mut self.signals)
    }

    pub fn signals(&self) -> MutationSignals {
        self.signals
    }

    /// ソフト停止フラグだけを下ろす
    pub fn clear_soft_halt_signal(&mut self) {
        self.signals.soft_halt = false;
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    fn arena_lanes(&self, arena: Arena) -> &[u64] {
        match arena {
            Arena::State => &self.state,
            Arena::Entities => &self.lanes,
        }
    }

    fn byte_range(&self, addr: StateAddr, size: usize) -> Option<Range<usize>> {
        let total = self.arena_lanes(addr.arena).len() * LANE_SIZE as usize;
        let start = usize::try_from(addr.offset).ok()?;
        let end = start.checked_add(size)?;
        (end <= total).then_some(start..end)
    }
}

impl DeltaTarget for EntityStore {
    fn read_bytes(&self, addr: StateAddr, size: usize) -> Option<Vec<u8>> {
        let range = self.byte_range(addr, size)?;
        let lanes = self.arena_lanes(addr.arena);
        Some(
            range
                .map(|b| lanes[b / 8].to_le_bytes()[b % 8])
                .collect(),
        )
    }

    fn write_bytes(&mut self, addr: StateAddr, bytes: &[u8]) -> bool {
        let Some(range) = self.byte_range(addr, bytes.len()) else {
            return false;
        };
        // nil スロットは書き込み不可
        if addr.arena == Arena::Entities && range.start < FIELD_COUNT * LANE_SIZE as usize {
            return false;
        }
        let lanes = match addr.arena {
            Arena::State => &mut self.state,
            Arena::Entities => &mut self.lanes,
        };
        for (b, &byte) in range.clone().zip(bytes) {
            let mut lane = lanes[b / 8].to_le_bytes();
            lane[b % 8] = byte;
            lanes[b / 8] = u64::from_le_bytes(lane);
        }
        if addr.arena == Arena::Entities {
            let slot = (range.start / (FIELD_COUNT * LANE_SIZE as usize)) as u64;
            self.notify_mutation(Entity(slot));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Side, WindOutcome};

    /// 前方・後方の子リストと親ポインタの整合性
    fn assert_tree_consistent(store: &EntityStore) {
        let mut n = store.root();
        while !n.is_nil() {
            let forward: Vec<Entity> = store.children(n).collect();
            let mut backward = Vec::new();
            let mut c = store.last_child(n);
            while !c.is_nil() {
                backward.push(c);
                c = store.prev_sibling(c);
            }
            backward.reverse();
            assert_eq!(forward, backward, "child lists differ for {:?}", n);
            for c in forward {
                assert_eq!(store.parent(c), n);
            }
            n = store.next_pre_order(n, store.root());
        }
    }

    #[test]
    fn test_new_store_has_root() {
        let store = EntityStore::new();
        let root = store.root();
        assert!(!root.is_nil());
        assert_eq!(store.kind(root), EntityKind::Root);
        assert_eq!(store.entity_of(store.handle_of(root)), root);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_alloc_links_under_root_and_parent() {
        let mut store = EntityStore::new();
        let machine = store.alloc(Entity::NIL, EntityKind::Machine, None);
        let process = store.alloc(machine, EntityKind::Process, None);
        let t1 = store.alloc(process, EntityKind::Thread, None);
        let t2 = store.alloc(process, EntityKind::Thread, None);

        assert_eq!(store.parent(machine), store.root());
        assert_eq!(store.children(process).collect::<Vec<_>>(), vec![t1, t2]);
        assert!(store.id(t2) > store.id(t1));
        assert_eq!(store.ancestor_of_kind(t1, EntityKind::Machine), machine);
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_handles_go_stale_after_release_and_reuse() {
        let mut store = EntityStore::new();
        let thread = store.alloc(Entity::NIL, EntityKind::Thread, None);
        let old = store.handle_of(thread);
        assert_eq!(store.entity_of(old), thread);

        store.release(thread, None);
        assert!(store.entity_of(old).is_nil());

        // 同じスロットが再利用されても古いハンドルは解決されない
        let reused = store.alloc(Entity::NIL, EntityKind::Thread, None);
        assert_eq!(reused, thread);
        assert!(store.generation(reused) > old.generation);
        assert!(store.entity_of(old).is_nil());
        assert_eq!(store.entity_of(store.handle_of(reused)), reused);
    }

    #[test]
    fn test_out_of_range_handle_is_nil() {
        let store = EntityStore::new();
        assert!(store.entity_of(Handle::new(999, 1)).is_nil());
        assert!(store.entity_of(Handle::ZERO).is_nil());
        assert!(store.handle_of(Entity::NIL).is_zero());
    }

    #[test]
    fn test_nil_is_inert() {
        let mut store = EntityStore::new();
        store.equip_name(Entity::NIL, "x", None);
        store.equip_vaddr(Entity::NIL, 0x1000, None);
        store.mark_for_deletion(Entity::NIL);
        assert_eq!(store.name(Entity::NIL), "");
        assert_eq!(store.kind(Entity::NIL), EntityKind::Nil);
        assert!(store.release(Entity::NIL, None).is_empty());
    }

    #[test]
    fn test_free_lists_split_by_lifetime() {
        let mut store = EntityStore::new();
        let thread = store.alloc(Entity::NIL, EntityKind::Thread, None);
        store.release(thread, None);

        // ユーザー定義寿命の種別は一時的な種別のスロットを再利用しない
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, None);
        assert_ne!(bp, thread);
        let thread2 = store.alloc(Entity::NIL, EntityKind::Thread, None);
        assert_eq!(thread2, thread);
    }

    #[test]
    fn test_release_subtree_children_first() {
        let mut store = EntityStore::new();
        let process = store.alloc(Entity::NIL, EntityKind::Process, None);
        let thread = store.alloc(process, EntityKind::Thread, None);
        let module = store.alloc(process, EntityKind::Module, None);
        let debug_path = store.alloc(module, EntityKind::DebugInfoPath, None);
        store.equip_name(debug_path, "/usr/lib/debug/libc.so", None);
        let live_names = store.names().live_count();

        let freed = store.release(process, None);
        let freed_slots: Vec<u64> = freed.iter().map(|h| h.index).collect();

        assert_eq!(freed.len(), 4);
        let pos = |e: Entity| freed_slots.iter().position(|&i| i == e.index()).unwrap();
        assert!(pos(thread) < pos(process));
        assert!(pos(module) < pos(process));
        assert!(pos(debug_path) < pos(module));
        let mut unique = freed_slots.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);

        for h in &freed {
            assert!(store.entity_of(*h).is_nil());
        }
        assert_eq!(store.names().live_count(), live_names - 1);
        assert!(store.children(store.root()).next().is_none());
        assert_eq!(store.free_count(), 4);
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_change_parent_relinks() {
        let mut store = EntityStore::new();
        let a = store.alloc(Entity::NIL, EntityKind::Target, None);
        let b = store.alloc(Entity::NIL, EntityKind::Target, None);
        let child = store.alloc(a, EntityKind::Executable, None);
        let sibling = store.alloc(a, EntityKind::Arguments, None);

        store.change_parent(child, a, b, None);
        assert_eq!(store.parent(child), b);
        assert_eq!(store.children(a).collect::<Vec<_>>(), vec![sibling]);
        assert_eq!(store.children(b).collect::<Vec<_>>(), vec![child]);
        assert_tree_consistent(&store);
    }

    #[test]
    #[should_panic(expected = "change_parent")]
    fn test_change_parent_with_wrong_old_parent_panics() {
        let mut store = EntityStore::new();
        let a = store.alloc(Entity::NIL, EntityKind::Target, None);
        let b = store.alloc(Entity::NIL, EntityKind::Target, None);
        let child = store.alloc(a, EntityKind::Executable, None);
        store.change_parent(child, b, a, None);
    }

    #[test]
    fn test_journaled_alloc_is_undoable() {
        let mut store = EntityStore::new();
        let mut hist = History::new();
        let target = store.alloc(Entity::NIL, EntityKind::Target, None);

        hist.push_batch(&store, None);
        let exe = store.alloc(target, EntityKind::Executable, Some(&mut hist));
        let handle = store.handle_of(exe);
        assert_eq!(store.children(target).count(), 1);

        assert_eq!(hist.wind(&mut store, Side::Min), WindOutcome::Replayed);
        assert_eq!(store.children(target).count(), 0);
        assert!(store.entity_of(handle).is_nil());
        assert_tree_consistent(&store);

        assert_eq!(hist.wind(&mut store, Side::Max), WindOutcome::Replayed);
        assert_eq!(store.children(target).collect::<Vec<_>>(), vec![exe]);
        assert_eq!(store.entity_of(handle), exe);
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_journaled_change_parent_is_undoable() {
        let mut store = EntityStore::new();
        let mut hist = History::new();
        let a = store.alloc(Entity::NIL, EntityKind::Target, None);
        let b = store.alloc(Entity::NIL, EntityKind::Target, None);
        let x = store.alloc(a, EntityKind::Executable, None);
        let y = store.alloc(a, EntityKind::Arguments, None);
        let z = store.alloc(a, EntityKind::ExecutionPath, None);

        hist.push_batch(&store, None);
        store.change_parent(y, a, b, Some(&mut hist));
        assert_eq!(store.children(a).collect::<Vec<_>>(), vec![x, z]);

        hist.wind(&mut store, Side::Min);
        assert_eq!(store.children(a).collect::<Vec<_>>(), vec![x, y, z]);
        assert!(store.children(b).next().is_none());
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_undo_alloc_dropped_after_unjournaled_sibling_link() {
        let mut store = EntityStore::new();
        let mut hist = History::new();

        hist.push_batch(&store, None);
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, Some(&mut hist));
        let machine = store.alloc(Entity::NIL, EntityKind::Machine, None);
        let process = store.alloc(machine, EntityKind::Process, None);

        assert_eq!(hist.wind(&mut store, Side::Min), WindOutcome::Dropped);
        assert_eq!(
            store.children(store.root()).collect::<Vec<_>>(),
            vec![bp, machine]
        );
        assert_eq!(store.parent(process), machine);
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_undo_alloc_dropped_after_unjournaled_sibling_release() {
        let mut store = EntityStore::new();
        let mut hist = History::new();
        let target = store.alloc(Entity::NIL, EntityKind::Target, None);
        let request = store.alloc(Entity::NIL, EntityKind::CtrlRequest, None);

        hist.push_batch(&store, None);
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, Some(&mut hist));
        store.release(request, None);

        assert_eq!(hist.wind(&mut store, Side::Min), WindOutcome::Dropped);
        assert_eq!(
            store.children(store.root()).collect::<Vec<_>>(),
            vec![target, bp]
        );
        assert_eq!(store.last_child(store.root()), bp);
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_undo_alloc_survives_unrelated_ephemeral_churn() {
        let mut store = EntityStore::new();
        let mut hist = History::new();
        let machine = store.alloc(Entity::NIL, EntityKind::Machine, None);
        let process = store.alloc(machine, EntityKind::Process, None);

        hist.push_batch(&store, None);
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, Some(&mut hist));
        let thread = store.alloc(process, EntityKind::Thread, None);
        store.release(thread, None);
        store.alloc(process, EntityKind::Module, None);

        assert_eq!(hist.wind(&mut store, Side::Min), WindOutcome::Replayed);
        assert_eq!(store.children(store.root()).collect::<Vec<_>>(), vec![machine]);
        assert_tree_consistent(&store);
        assert_eq!(store.active_count(), 4);

        assert_eq!(hist.wind(&mut store, Side::Max), WindOutcome::Replayed);
        assert_eq!(
            store.children(store.root()).collect::<Vec<_>>(),
            vec![machine, bp]
        );
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_stacked_allocs_under_one_parent_unwind_in_order() {
        let mut store = EntityStore::new();
        let mut hist = History::new();

        hist.push_batch(&store, None);
        let a = store.alloc(Entity::NIL, EntityKind::Target, Some(&mut hist));
        store.alloc(a, EntityKind::Executable, Some(&mut hist));
        hist.push_batch(&store, None);
        let b = store.alloc(Entity::NIL, EntityKind::Target, Some(&mut hist));

        assert_eq!(hist.wind(&mut store, Side::Min), WindOutcome::Replayed);
        assert_eq!(store.children(store.root()).collect::<Vec<_>>(), vec![a]);
        assert_eq!(hist.wind(&mut store, Side::Min), WindOutcome::Replayed);
        assert!(store.children(store.root()).next().is_none());
        assert_tree_consistent(&store);

        assert_eq!(hist.wind(&mut store, Side::Max), WindOutcome::Replayed);
        assert_eq!(hist.wind(&mut store, Side::Max), WindOutcome::Replayed);
        assert_eq!(store.children(store.root()).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(store.children(a).count(), 1);
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_undo_soft_delete_dropped_after_slot_release() {
        let mut store = EntityStore::new();
        let mut hist = History::new();
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, None);

        hist.push_batch(&store, None);
        store.soft_delete(bp, Some(&mut hist));
        store.release(bp, None);
        let reused = store.alloc(Entity::NIL, EntityKind::Breakpoint, None);
        assert_eq!(reused, bp);

        assert_eq!(hist.wind(&mut store, Side::Min), WindOutcome::Dropped);
        assert!(!store.is_deleted(reused));
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_journaled_rename_round_trip() {
        let mut store = EntityStore::new();
        let mut hist = History::new();
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, None);
        store.equip_name(bp, "before", None);

        hist.push_batch(&store, Some(store.field_addr(bp, Field::Generation)));
        store.equip_name(bp, "after", Some(&mut hist));
        assert_eq!(store.name(bp), "after");

        hist.wind(&mut store, Side::Min);
        assert_eq!(store.name(bp), "before");
        hist.wind(&mut store, Side::Max);
        assert_eq!(store.name(bp), "after");
    }

    #[test]
    fn test_soft_delete_then_undo_restores_same_entity() {
        let mut store = EntityStore::new();
        let mut hist = History::new();
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, None);
        let handle = store.handle_of(bp);

        hist.push_batch(&store, None);
        store.soft_delete(bp, Some(&mut hist));
        assert!(store.is_deleted(store.entity_at(handle.index)));
        assert!(store.entity_of(handle).is_nil());
        assert!(store.entities_of_kind(EntityKind::Breakpoint).is_empty());

        hist.wind(&mut store, Side::Min);
        assert!(!store.is_deleted(bp));
        assert_eq!(store.entity_of(handle), bp);
    }

    #[test]
    fn test_notify_mutation_walks_ancestors() {
        let mut store = EntityStore::new();
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, None);
        store.take_signals();

        let cond = store.alloc(bp, EntityKind::Condition, None);
        let signals = store.take_signals();
        assert!(signals.soft_halt);
        assert!(signals.profile_config);

        store.equip_name(cond, "x > 1", None);
        assert!(store.take_signals().soft_halt);

        let thread = store.alloc(Entity::NIL, EntityKind::Thread, None);
        store.take_signals();
        store.equip_name(thread, "worker", None);
        assert_eq!(store.take_signals(), MutationSignals::default());
    }

    #[test]
    fn test_duplicate_copies_subtree() {
        let mut store = EntityStore::new();
        let bp = store.alloc(Entity::NIL, EntityKind::Breakpoint, None);
        store.equip_text_point(bp, 42, 1, None);
        store.equip_name(bp, "label", None);
        let cond = store.alloc(bp, EntityKind::Condition, None);
        store.equip_name(cond, "i == 3", None);

        let copy = store.duplicate(bp, None);
        assert_ne!(copy, bp);
        assert_eq!(store.parent(copy), store.root());
        assert_eq!(store.text_point(copy), Some((42, 1)));
        assert_eq!(store.name(copy), "label");
        let copy_cond = store.child_of_kind(copy, EntityKind::Condition);
        assert_eq!(store.name(copy_cond), "i == 3");
        assert_ne!(copy_cond, cond);
        assert_tree_consistent(&store);
    }

    #[test]
    fn test_kind_alloc_gen_moves_on_alloc_and_release() {
        let mut store = EntityStore::new();
        let before = store.kind_alloc_gen(EntityKind::Module);
        let module = store.alloc(Entity::NIL, EntityKind::Module, None);
        assert_eq!(store.kind_alloc_gen(EntityKind::Module), before + 1);
        store.release(module, None);
        assert_eq!(store.kind_alloc_gen(EntityKind::Module), before + 2);
    }

    #[test]
    fn test_lookups() {
        let mut store = EntityStore::new();
        let machine = store.alloc(Entity::NIL, EntityKind::Machine, None);
        store.equip_ctrl_machine(machine, MachineId(3));
        let process = store.alloc(machine, EntityKind::Process, None);
        store.equip_ctrl_machine(process, MachineId(3));
        store.equip_ctrl_handle(process, CtrlHandle(0x10));
        let module = store.alloc(process, EntityKind::Module, None);
        store.equip_vaddr_range(module, 0x400000..0x401000);

        assert_eq!(store.machine_from_id(MachineId(3)), machine);
        assert_eq!(store.entity_from_ctrl(MachineId(3), CtrlHandle(0x10)), process);
        assert!(store.entity_from_ctrl(MachineId(4), CtrlHandle(0x10)).is_nil());
        assert_eq!(store.module_from_vaddr(process, 0x400800), module);
        assert!(store.module_from_vaddr(process, 0x401000).is_nil());
        assert_eq!(store.entity_from_id(store.id(module)), module);
    }

    #[test]
    fn test_death_timer() {
        let mut store = EntityStore::new();
        let pending = store.alloc(Entity::NIL, EntityKind::PendingThreadName, None);
        store.equip_death_timer(pending, 2);
        assert!(!store.tick_death_timer(pending));
        assert!(store.tick_death_timer(pending));
    }
}
