//! 対訳コーパスの内部表現
//!
//! このモジュールは、単語アラインメント付き対訳コーパスをフラットな
//! 配列で保持するデータ構造を提供します。各側のコーパスは連結された
//! ID列と文長の前置和として格納され、アラインメントはパックされた
//! CSR形式で格納されます。
//!
//! 文への参照は(文インデックス, 単語位置)のペアで表現され、
//! [`SentenceView`]を通じてアクセスします。

use rkyv::{Archive, Deserialize, Serialize};

/// 片側(原言語側または目的言語側)のコーパス
///
/// すべての文のトークンIDを1本のベクタに連結して保持します。
/// `starts`は文長の前置和で、`starts[i]..starts[i+1]`が文`i`の
/// トークン範囲です。
#[derive(Archive, Serialize, Deserialize, Debug, Default)]
pub struct Side {
    pub(crate) ids: Vec<u32>,
    pub(crate) starts: Vec<u32>,
}

impl Side {
    /// 文数を返します
    #[inline(always)]
    pub fn num_sentences(&self) -> usize {
        self.starts.len().saturating_sub(1)
    }

    /// トークンの総数を返します
    #[inline(always)]
    pub fn num_tokens(&self) -> usize {
        self.ids.len()
    }

    /// 文`i`のトークンID列を返します
    #[inline(always)]
    pub fn sentence(&self, i: usize) -> &[u32] {
        let lo = self.starts[i] as usize;
        let hi = self.starts[i + 1] as usize;
        &self.ids[lo..hi]
    }

    /// 文`i`の先頭トークンのグローバル位置を返します
    #[inline(always)]
    pub(crate) fn sentence_base(&self, i: usize) -> usize {
        self.starts[i] as usize
    }
}

/// パックされたCSR形式のアラインメント
///
/// `offsets`はグローバルなトークン位置でインデックスされ、
/// `offsets[t]..offsets[t+1]`がトークン`t`のリンク行です。
/// リンクの値は反対側の文内位置(文ローカル)で、昇順に整列されています。
#[derive(Archive, Serialize, Deserialize, Debug, Default)]
pub struct AlignmentCsr {
    pub(crate) offsets: Vec<u32>,
    pub(crate) links: Vec<u32>,
}

impl AlignmentCsr {
    /// グローバルなトークン位置`t`のリンク行を返します
    #[inline(always)]
    pub(crate) fn row(&self, t: usize) -> &[u32] {
        let lo = self.offsets[t] as usize;
        let hi = self.offsets[t + 1] as usize;
        &self.links[lo..hi]
    }
}

/// 単語アラインメント付き対訳コーパス
///
/// # フィールド
///
/// * `src` - 原言語側のコーパス
/// * `tgt` - 目的言語側のコーパス
/// * `f2e` - 原言語の各トークンから目的言語の文内位置へのアラインメント
/// * `e2f` - 目的言語の各トークンから原言語の文内位置へのアラインメント
/// * `aligned_tgt` - アラインメントを持つ目的言語トークンのビット集合
///   (グローバル位置でインデックス)
///
/// `f2e`と`e2f`は互いの転置であることが不変条件です。
#[derive(Archive, Serialize, Deserialize, Debug, Default)]
pub struct ParallelCorpus {
    pub(crate) src: Side,
    pub(crate) tgt: Side,
    pub(crate) f2e: AlignmentCsr,
    pub(crate) e2f: AlignmentCsr,
    pub(crate) aligned_tgt: Vec<u64>,
}

impl ParallelCorpus {
    /// 文対の数を返します
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.src.num_sentences()
    }

    /// コーパスが空かどうかを返します
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 原言語側のコーパスを返します
    #[inline(always)]
    pub fn source(&self) -> &Side {
        &self.src
    }

    /// 目的言語側のコーパスを返します
    #[inline(always)]
    pub fn target(&self) -> &Side {
        &self.tgt
    }

    /// 文対`i`のビューを返します
    #[inline(always)]
    pub fn sentence(&self, i: usize) -> SentenceView<'_> {
        SentenceView {
            corpus: self,
            src_base: self.src.sentence_base(i),
            tgt_base: self.tgt.sentence_base(i),
            idx: i,
        }
    }
}

/// 1つの文対へのビュー
///
/// 文対はコーパスに所有されており、このビューは(文インデックス, 位置)の
/// ペアによるアクセスを提供します。アラインメントの添字はすべて
/// 文ローカルです。
#[derive(Clone, Copy)]
pub struct SentenceView<'a> {
    corpus: &'a ParallelCorpus,
    src_base: usize,
    tgt_base: usize,
    idx: usize,
}

impl<'a> SentenceView<'a> {
    /// この文対のコーパス内インデックスを返します
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.idx
    }

    /// 原言語側のトークンID列を返します
    #[inline(always)]
    pub fn source(&self) -> &'a [u32] {
        self.corpus.src.sentence(self.idx)
    }

    /// 目的言語側のトークンID列を返します
    #[inline(always)]
    pub fn target(&self) -> &'a [u32] {
        self.corpus.tgt.sentence(self.idx)
    }

    /// 原言語の位置`i`にアラインされた目的言語の位置(昇順)を返します
    #[inline(always)]
    pub fn f2e(&self, i: usize) -> &'a [u32] {
        self.corpus.f2e.row(self.src_base + i)
    }

    /// 目的言語の位置`j`にアラインされた原言語の位置(昇順)を返します
    #[inline(always)]
    pub fn e2f(&self, j: usize) -> &'a [u32] {
        self.corpus.e2f.row(self.tgt_base + j)
    }

    /// 目的言語の位置`j`がアラインメントを持つかを返します
    #[inline(always)]
    pub fn is_target_aligned(&self, j: usize) -> bool {
        let bit = self.tgt_base + j;
        self.corpus.aligned_tgt[bit / 64] & (1 << (bit % 64)) != 0
    }
}
