//! 状態差分によるアンドゥ/リドゥ履歴
//!
//! 変更前のバイト列を (アリーナ, オフセット, サイズ) をキーに記録します。
//! 履歴は記録内容の意味を知らないため、エンティティの確保・改名・親の付け替え・
//! 任意のフィールド書き込みをすべて同じ仕組みで巻き戻せます。

/// 差分を記録できる状態領域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arena {
    /// エンティティストアの大域状態（ルート、フリーリスト、カウンタ）
    State,
    /// エンティティのフィールド
    Entities,
}

/// 状態領域内のバイトアドレス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateAddr {
    pub arena: Arena,
    pub offset: u64,
}

impl StateAddr {
    pub fn new(arena: Arena, offset: u64) -> Self {
        Self { arena, offset }
    }
}

/// 差分の読み書き先
///
/// 範囲外の読み取りは None、範囲外の書き込みは false を返し、何も変更しません。
pub trait DeltaTarget {
    fn read_bytes(&self, addr: StateAddr, size: usize) -> Option<Vec<u8>>;
    fn write_bytes(&mut self, addr: StateAddr, bytes: &[u8]) -> bool;
}

/// 履歴の側
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// アンドゥ側
    Min,
    /// リドゥ側
    Max,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Min => 0,
            Side::Max => 1,
        }
    }

    pub fn flip(self) -> Side {
        match self {
            Side::Min => Side::Max,
            Side::Max => Side::Min,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Delta {
    addr: StateAddr,
    bytes: Vec<u8>,
}

/// バッチを開いた時点の世代カウンタの値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Guard {
    addr: StateAddr,
    value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Batch {
    guards: Vec<Guard>,
    deltas: Vec<Delta>,
}

impl Batch {
    fn guards_hold(&self, target: &impl DeltaTarget) -> bool {
        self.guards
            .iter()
            .all(|guard| read_u64(target, guard.addr) == Some(guard.value))
    }
}

/// 巻き戻しの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindOutcome {
    /// 取り出すバッチがなかった
    Empty,
    /// 差分を再生し、反対側にミラーバッチを積んだ
    Replayed,
    /// ガードの世代が一致せず、再生せずに捨てた
    Dropped,
}

fn read_u64(target: &impl DeltaTarget, addr: StateAddr) -> Option<u64> {
    let bytes = target.read_bytes(addr, 8)?;
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(array))
}

/// アンドゥ側とリドゥ側のバッチスタック
#[derive(Debug, Default)]
pub struct History {
    sides: [Vec<Batch>; 2],
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// アンドゥ側に新しいバッチを開く
    ///
    /// リドゥ側は破棄されます。`guard` を渡すと、その位置の u64 を世代として記録し、
    /// 巻き戻し時に値が変わっていればバッチを再生しません。
    pub fn push_batch(&mut self, target: &impl DeltaTarget, guard: Option<StateAddr>) {
        self.sides[Side::Max.index()].clear();
        self.sides[Side::Min.index()].push(Batch::default());
        if let Some(addr) = guard {
            self.push_guard(target, addr);
        }
    }

    /// 現在のアンドゥバッチに、`addr` の今の値をガードとして登録する
    ///
    /// 同じ位置のガードがあれば値を上書きします。構造を書き換える操作は、書き換えた
    /// 後のスタンプをここで登録し、記録外の変更が挟まったバッチを再生させません。
    pub fn push_guard(&mut self, target: &impl DeltaTarget, addr: StateAddr) {
        let Some(value) = read_u64(target, addr) else {
            tracing::warn!(?addr, "history guard out of range; not recorded");
            return;
        };
        if self.sides[Side::Min.index()].is_empty() {
            self.sides[Side::Min.index()].push(Batch::default());
        }
        let Some(batch) = self.sides[Side::Min.index()].last_mut() else {
            return;
        };
        match batch.guards.iter_mut().find(|g| g.addr == addr) {
            Some(guard) => guard.value = value,
            None => batch.guards.push(Guard { addr, value }),
        }
    }

    /// 現在のアンドゥバッチに変更前のバイト列を記録する
    ///
    /// バッチが開かれていなければ開きます。
    pub fn push_delta(&mut self, target: &impl DeltaTarget, addr: StateAddr, size: usize) {
        let Some(bytes) = target.read_bytes(addr, size) else {
            tracing::warn!(?addr, size, "delta out of range; not recorded");
            return;
        };
        if self.sides[Side::Min.index()].is_empty() {
            self.push_batch(target, None);
        }
        tracing::trace!(?addr, size, "push delta");
        if let Some(batch) = self.sides[Side::Min.index()].last_mut() {
            batch.deltas.push(Delta { addr, bytes });
        }
    }

    /// `side` から1バッチ取り出して再生する
    ///
    /// ガードがひとつでも記録時の値と異なれば、バッチは再生せずに捨てます。
    /// 差分は記録の新しい順に再生します。同じアドレスを複数回記録したバッチでは、
    /// 最も古い記録（バッチを開く前の値）が最後に書かれて残ります。各差分について、
    /// 現在のバイト列を反対側のミラーバッチに記録してから書き戻し、ミラーバッチは
    /// 同じガード位置について再生後の値を記録します。
    pub fn wind(&mut self, target: &mut impl DeltaTarget, side: Side) -> WindOutcome {
        let Some(batch) = self.sides[side.index()].pop() else {
            return WindOutcome::Empty;
        };

        if !batch.guards_hold(target) {
            tracing::debug!(?side, "history batch superseded; dropped");
            return WindOutcome::Dropped;
        }

        let mut mirror = Batch::default();
        for delta in batch.deltas.iter().rev() {
            let Some(current) = target.read_bytes(delta.addr, delta.bytes.len()) else {
                continue;
            };
            if target.write_bytes(delta.addr, &delta.bytes) {
                mirror.deltas.push(Delta {
                    addr: delta.addr,
                    bytes: current,
                });
            }
        }
        mirror.guards = batch
            .guards
            .iter()
            .filter_map(|guard| {
                read_u64(target, guard.addr).map(|value| Guard {
                    addr: guard.addr,
                    value,
                })
            })
            .collect();

        self.sides[side.flip().index()].push(mirror);
        WindOutcome::Replayed
    }

    /// 指定した側に積まれているバッチ数
    pub fn depth(&self, side: Side) -> usize {
        self.sides[side.index()].len()
    }

    /// 両側を解放する
    pub fn release(&mut self) {
        for side in &mut self.sides {
            side.clear();
            side.shrink_to_fit();
        }
    }
}
