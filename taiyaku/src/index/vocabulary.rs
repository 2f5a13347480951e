//! 語彙の管理
//!
//! このモジュールは、単語文字列と密な整数IDの双方向マッピングを提供します。
//! IDは挿入順に0から割り当てられ、再利用されません。
//!
//! 順方向のマッピングは`Vec<Arc<str>>`(インデックス参照、ハッシュ不要)、
//! 逆方向のマッピングは`HashMap<Arc<str>, u32>`で保持し、文字列本体は
//! 両構造の間で共有されます。
//!
//! インデックス構築後、語彙は実質的に読み取り専用ですが、クエリ時に
//! 未知語が追加されることがあります。追加は読み取りと並行して安全に
//! 行えます(リーダーは古いテーブルか新しいテーブルのどちらかを観測し、
//! 中間状態を観測することはありません)。

use std::sync::{Arc, RwLock};

use hashbrown::HashMap;

/// プロセス全体で共有される「システム語彙」のスロット
///
/// デコーダなどの外部コンポーネントとIDをゼロコピーで共有する必要がある
/// 場合のみ使用します。内部の処理経路はすべてコンストラクタ経由で
/// 語彙を受け取ります。
static SYSTEM_VOCABULARY: RwLock<Option<Arc<Vocabulary>>> = RwLock::new(None);

/// システム語彙を設定します
///
/// 既に設定されている場合は置き換えます。通常はインデックスの初期化時に
/// 一度だけ呼び出されることを想定しています。
///
/// # 引数
///
/// * `v` - 共有する語彙への`Arc`参照
pub fn set_system(v: Arc<Vocabulary>) {
    *SYSTEM_VOCABULARY.write().unwrap() = Some(v);
}

/// システム語彙を取得します
///
/// # 戻り値
///
/// 設定されている場合は`Some(Arc<Vocabulary>)`、未設定の場合は`None`
pub fn system() -> Option<Arc<Vocabulary>> {
    SYSTEM_VOCABULARY.read().unwrap().clone()
}

/// 単語文字列と密な整数IDの双方向マッピング
///
/// IDは挿入順に`[0, len)`の範囲で割り当てられます。単調に増加し、
/// 削除や再利用はありません。
pub struct Vocabulary {
    inner: RwLock<VocabInner>,
}

struct VocabInner {
    words: Vec<Arc<str>>,
    map: HashMap<Arc<str>, u32>,
}

impl Vocabulary {
    /// 空の語彙を生成します
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(VocabInner {
                words: Vec::new(),
                map: HashMap::new(),
            }),
        }
    }

    /// 順序付きの単語リストから語彙を再構築します
    ///
    /// インデックス`i`の単語にID`i`が割り当てられます。
    /// デシリアライズ時に使用されます。
    ///
    /// # 引数
    ///
    /// * `words` - ID順に並んだ単語のスライス
    pub fn from_words(words: &[String]) -> Self {
        let mut forward = Vec::with_capacity(words.len());
        let mut map = HashMap::with_capacity(words.len());
        for (i, w) in words.iter().enumerate() {
            let s: Arc<str> = Arc::from(w.as_str());
            forward.push(Arc::clone(&s));
            map.insert(s, i as u32);
        }
        Self {
            inner: RwLock::new(VocabInner {
                words: forward,
                map,
            }),
        }
    }

    /// 語彙のサイズを返します
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().words.len()
    }

    /// 語彙が空かどうかを返します
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDに対応する単語を返します
    ///
    /// # 引数
    ///
    /// * `id` - 単語のID
    ///
    /// # 戻り値
    ///
    /// IDが範囲内なら`Some(単語)`、範囲外なら`None`
    pub fn get(&self, id: u32) -> Option<Arc<str>> {
        self.inner.read().unwrap().words.get(id as usize).cloned()
    }

    /// 単語に対応するIDを返します
    ///
    /// # 引数
    ///
    /// * `word` - 検索する単語
    ///
    /// # 戻り値
    ///
    /// 登録済みなら`Some(ID)`、未登録なら`None`
    pub fn lookup(&self, word: &str) -> Option<u32> {
        self.inner.read().unwrap().map.get(word).copied()
    }

    /// 単語を追加し、そのIDを返します
    ///
    /// 既に登録されている場合は既存のIDを返します。
    /// 追加は並行する読み取りに対してアトミックです。
    ///
    /// # 引数
    ///
    /// * `word` - 追加する単語
    ///
    /// # 戻り値
    ///
    /// 単語のID
    pub fn add(&self, word: &str) -> u32 {
        if let Some(id) = self.lookup(word) {
            return id;
        }
        let mut inner = self.inner.write().unwrap();
        // Another writer may have inserted the word before we took the lock.
        if let Some(&id) = inner.map.get(word) {
            return id;
        }
        let id = inner.words.len() as u32;
        let s: Arc<str> = Arc::from(word);
        inner.words.push(Arc::clone(&s));
        inner.map.insert(s, id);
        id
    }

    /// 現在の単語リストのスナップショットをID順に返します
    ///
    /// シリアライズ時に使用されます。
    pub fn words_snapshot(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .words
            .iter()
            .map(|w| w.to_string())
            .collect()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}
