//! エンティティ名のインターン
//!
//! 名前は2の累乗サイズのチャンクに格納します。16〜1024 バイトの各サイズクラスには
//! 解放済みチャンクのリストがあり、それより大きい名前は「特大」バケットから
//! 最も無駄の少ないチャンクを探して再利用します。

/// 通常バケットの数（16, 32, ..., 1024 バイト）
const SMALL_BUCKET_COUNT: usize = 7;
/// 特大バケットのインデックス
const OVERSIZE_BUCKET: usize = SMALL_BUCKET_COUNT;
const MIN_CHUNK_SIZE: usize = 16;

/// インターンされた名前への参照
///
/// エンティティのフィールドに u64 として格納できます。0 は空文字列です。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NameRef(u64);

impl NameRef {
    pub const EMPTY: NameRef = NameRef(0);

    fn new(chunk: usize, len: usize) -> Self {
        NameRef(((chunk as u64 + 1) << 32) | len as u64)
    }

    fn chunk(self) -> Option<usize> {
        let hi = self.0 >> 32;
        (hi != 0).then(|| (hi - 1) as usize)
    }

    fn len(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    pub fn is_empty(self) -> bool {
        self.chunk().is_none()
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(value: u64) -> Self {
        NameRef(value)
    }
}

/// 文字列長が属するバケット
pub fn bucket_index(size: usize) -> usize {
    let rounded = (size + 1).next_power_of_two().max(MIN_CHUNK_SIZE);
    match rounded {
        16 => 0,
        32 => 1,
        64 => 2,
        128 => 3,
        256 => 4,
        512 => 5,
        1024 => 6,
        _ => OVERSIZE_BUCKET,
    }
}

#[derive(Debug)]
struct Chunk {
    bytes: Box<[u8]>,
    live: bool,
}

/// 名前チャンクのプール
#[derive(Debug)]
pub struct NamePool {
    chunks: Vec<Chunk>,
    free: [Vec<usize>; SMALL_BUCKET_COUNT + 1],
}

impl NamePool {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            free: Default::default(),
        }
    }

    /// 名前をコピーして格納する
    pub fn alloc(&mut self, name: &str) -> NameRef {
        if name.is_empty() {
            return NameRef::EMPTY;
        }
        let size = name.len();
        let bucket = bucket_index(size);

        let reused = if bucket == OVERSIZE_BUCKET {
            self.take_best_fit(size)
        } else {
            self.free[bucket].pop()
        };

        let chunk = match reused {
            Some(chunk) => chunk,
            None => {
                let capacity = if bucket == OVERSIZE_BUCKET {
                    size.next_power_of_two()
                } else {
                    1 << (bucket + 4)
                };
                self.chunks.push(Chunk {
                    bytes: vec![0u8; capacity].into_boxed_slice(),
                    live: false,
                });
                self.chunks.len() - 1
            }
        };

        let slot = &mut self.chunks[chunk];
        slot.bytes[..size].copy_from_slice(name.as_bytes());
        slot.live = true;
        NameRef::new(chunk, size)
    }

    /// 特大バケットから、要求サイズ以上で最小のチャンクを取り出す
    fn take_best_fit(&mut self, size: usize) -> Option<usize> {
        let chunks = &self.chunks;
        let (pos, _) = self.free[OVERSIZE_BUCKET]
            .iter()
            .enumerate()
            .filter(|&(_, &c)| chunks[c].bytes.len() >= size)
            .min_by_key(|&(_, &c)| chunks[c].bytes.len())?;
        Some(self.free[OVERSIZE_BUCKET].swap_remove(pos))
    }

    /// 名前を解放する
    ///
    /// 同じ参照の二重解放は無視します。
    pub fn release(&mut self, name: NameRef) {
        let Some(chunk) = name.chunk() else {
            return;
        };
        let Some(slot) = self.chunks.get_mut(chunk) else {
            return;
        };
        if !slot.live {
            return;
        }
        slot.live = false;
        let capacity = slot.bytes.len();
        let bucket = if capacity > 1024 {
            OVERSIZE_BUCKET
        } else {
            bucket_index(capacity - 1)
        };
        self.free[bucket].push(chunk);
    }

    /// 参照先の文字列
    ///
    /// 解放済みのチャンクを指す参照は空文字列になります。
    pub fn get(&self, name: NameRef) -> &str {
        let Some(slot) = name.chunk().and_then(|c| self.chunks.get(c)) else {
            return "";
        };
        if !slot.live {
            return "";
        }
        let len = name.len().min(slot.bytes.len());
        std::str::from_utf8(&slot.bytes[..len]).unwrap_or_default()
    }

    /// 生存中のチャンク数
    pub fn live_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.live).count()
    }

    /// 解放済みで再利用待ちのチャンク数
    pub fn free_count(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }
}

impl Default for NamePool {
    fn default() -> Self {
        Self::new()
    }
}
