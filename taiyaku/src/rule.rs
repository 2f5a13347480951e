//! 抽出されたルールの表現
//!
//! このモジュールは、ルール抽出パイプラインを流れる3種類のデータを
//! 定義します:
//!
//! - [`SampledRule`]: 1つの文対から抽出されたフレーズ対。文への参照は
//!   ポインタではなく文インデックスで保持します。
//! - [`Rule`]: スコアリング済みのルール(ID列 + 素性ベクトル)。
//! - [`ConcreteRule`]: デコーダに返される、原言語カバレッジ付きのルール。

use std::ops::Range;
use std::sync::Arc;

/// 1つの文対から抽出されたフレーズ対
///
/// 原言語スパン`[src_start, src_end)`と目的言語スパン
/// `[tgt_start, tgt_end)`は、`sentence`が指す文対の中の位置です。
/// フレーズ対の同一性は両スパンのID列の連結で定義されます
/// ([`RuleKey`]がこれを実装します)。
///
/// `lex_f_e`と`lex_e_f`は、この出現におけるアラインメントから計算された
/// 語彙翻訳確率です。
#[derive(Clone, Copy, Debug)]
pub struct SampledRule {
    /// 原言語スパンの開始位置(含む)
    pub src_start: usize,
    /// 原言語スパンの終了位置(含まない)
    pub src_end: usize,
    /// 目的言語スパンの開始位置(含む)
    pub tgt_start: usize,
    /// 目的言語スパンの終了位置(含まない)
    pub tgt_end: usize,
    /// コーパス内の文対インデックス
    pub sentence: u32,
}

/// フレーズ対の同一性を表すキー
///
/// 等価性とハッシュは原言語ID列と目的言語ID列の内容に基づきます。
/// 異なる文対の異なるアラインメントから抽出された同じフレーズ対は
/// 同じキーになります。
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct RuleKey {
    pub(crate) src: Box<[u32]>,
    pub(crate) tgt: Box<[u32]>,
}

/// スコアリング済みのルール
///
/// 素性ベクトルは自然対数空間の32ビット浮動小数です。素性の本数は
/// [`FeatureTemplate`](crate::FeatureTemplate)で決まります。
#[derive(Clone, Debug)]
pub struct Rule {
    /// 原言語フレーズのID列
    pub src: Box<[u32]>,
    /// 目的言語フレーズのID列
    pub tgt: Box<[u32]>,
    /// 素性ベクトル
    pub scores: Box<[f32]>,
}

/// デコーダに返される、原言語カバレッジ付きのルール
///
/// キャッシュされたルールは複数のクエリの間で`Arc`経由で共有されます。
#[derive(Clone, Debug)]
pub struct ConcreteRule {
    /// スコアリング済みのルール
    pub rule: Arc<Rule>,
    /// 入力文中で覆われる原言語スパンの開始位置(含む)
    pub src_start: usize,
    /// 入力文中で覆われる原言語スパンの終了位置(含まない)
    pub src_end: usize,
    /// クエリ入力のID
    pub input_id: usize,
}

impl ConcreteRule {
    /// 入力文中で覆われる原言語の位置範囲を返します
    #[inline(always)]
    pub fn source_coverage(&self) -> Range<usize> {
        self.src_start..self.src_end
    }
}
