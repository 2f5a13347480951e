//! ルールのスコアリング
//!
//! このモジュールは、抽出されたルールのヒストグラムを素性ベクトルに
//! 変換します。素性はすべて自然対数空間の32ビット浮動小数です:
//!
//! - `phi_f_e`: フレーズ翻訳確率(順方向)。サンプル内の相対頻度
//! - `phi_e_f`: フレーズ翻訳確率(逆方向)。コーパス全体での目的言語
//!   フレーズの出現回数を使うGermannの近似
//! - `lex_f_e`, `lex_e_f`: 共起テーブルによるIBM-1風の語彙翻訳確率
//! - (拡張テンプレートのみ) `log(count)`と単独出現の指示素性

use hashbrown::HashMap;

use crate::index::corpus::SentenceView;
use crate::index::suffix_array::QueryResult;
use crate::index::Index;
use crate::model::cooc::{LexCoocTable, NULL_ID};
use crate::model::extractor::extract_rules;
use crate::rule::{Rule, RuleKey, SampledRule};

/// 語彙翻訳確率の下限
///
/// 共起テーブルに存在しない単語対の因子はこの値に置き換えられ、
/// 対数が発散することを防ぎます。
pub const MIN_LEX_PROB: f64 = 1e-5;

/// 素性名のプレフィックス付きテーブル
const DENSE_NAMES: [&str; 4] = ["TM.0", "TM.1", "TM.2", "TM.3"];
const DENSE_EXT_NAMES: [&str; 6] = ["TM.0", "TM.1", "TM.2", "TM.3", "TM.4", "TM.5"];

/// 密な素性テンプレート
///
/// 素性の並びは次のとおりです:
///
/// ```text
/// [0] := phi_f_e
/// [1] := lex_f_e
/// [2] := phi_e_f
/// [3] := lex_e_f
/// [4] := log(count)        (DenseExtのみ)
/// [5] := 1 if count == 1   (DenseExtのみ)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FeatureTemplate {
    /// 4素性: フレーズ翻訳確率と語彙翻訳確率の両方向
    #[default]
    Dense,
    /// 6素性: [`Dense`](Self::Dense)に対数カウントと単独出現指示を追加
    DenseExt,
}

impl FeatureTemplate {
    /// このテンプレートの素性数を返します
    #[inline(always)]
    pub fn width(self) -> usize {
        match self {
            Self::Dense => 4,
            Self::DenseExt => 6,
        }
    }

    /// このテンプレートの素性名を返します
    #[inline(always)]
    pub fn names(self) -> &'static [&'static str] {
        match self {
            Self::Dense => &DENSE_NAMES,
            Self::DenseExt => &DENSE_EXT_NAMES,
        }
    }
}

impl std::str::FromStr for FeatureTemplate {
    type Err = crate::errors::TaiyakuError;

    /// 文字列から素性テンプレートをパースします
    ///
    /// 未知のテンプレート名は設定エラーになります。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(Self::Dense),
            "dense-ext" => Ok(Self::DenseExt),
            _ => Err(crate::errors::TaiyakuError::invalid_argument(
                "feature_template",
                format!("Unknown feature template: {:?}", s),
            )),
        }
    }
}

/// 素性ベクトルを消費するシンク
///
/// デコーダ側の素性化・重み付けコンポーネントが実装します。
/// 抽出器への戻り値経路はありません。
pub trait FeatureScorer {
    /// 1ルール分の素性ベクトルを受け取ります
    ///
    /// # 引数
    ///
    /// * `features` - 素性ベクトル
    /// * `names` - 素性名(`features`と同じ長さ)
    fn score(&self, features: &[f32], names: &[&'static str]);
}

/// スコアリングに必要な読み取り専用の文脈
pub(crate) struct ScoringContext<'a> {
    pub(crate) index: &'a Index,
    pub(crate) cooc: &'a LexCoocTable,
    pub(crate) template: FeatureTemplate,
    pub(crate) max_target_phrase: usize,
}

#[derive(Default)]
struct HistogramEntry {
    count: u32,
    lex_f_e: f32,
    lex_e_f: f32,
}

/// サンプリングされた出現の集合からスコアリング済みルールを生成します
///
/// 各サンプルからルールを抽出してヒストグラムを作り、出現のたびに
/// 語彙翻訳確率を計算します。同じフレーズ対が異なるアラインメントで
/// 複数回現れた場合、保持される語彙確率対は両方向が同時に既存値を
/// 厳密に上回るときのみ更新されます。
///
/// # 引数
///
/// * `ctx` - スコアリング文脈
/// * `samples` - サンプリングされた出現
/// * `length` - 原言語フレーズの長さ
/// * `sample_rate` - `samples.len() / numHits`
pub(crate) fn samples_to_rules(
    ctx: &ScoringContext<'_>,
    samples: &[QueryResult],
    length: usize,
    sample_rate: f64,
) -> Vec<Rule> {
    let corpus = ctx.index.corpus();
    let mut histogram: HashMap<RuleKey, HistogramEntry> = HashMap::new();
    let mut extracted: Vec<SampledRule> = Vec::new();

    for query in samples {
        let sent = corpus.sentence(query.sentence as usize);
        extracted.clear();
        extract_rules(&sent, query, length, ctx.max_target_phrase, &mut extracted);
        for rule in &extracted {
            let (lex_e_f, lex_f_e) = score_lex(&sent, rule, ctx.cooc);
            let key = RuleKey {
                src: sent.source()[rule.src_start..rule.src_end].into(),
                tgt: sent.target()[rule.tgt_start..rule.tgt_end].into(),
            };
            let entry = histogram.entry(key).or_default();
            entry.count += 1;
            if entry.lex_e_f < lex_e_f && entry.lex_f_e < lex_f_e {
                entry.lex_e_f = lex_e_f;
                entry.lex_f_e = lex_f_e;
            }
        }
    }

    let denominator: f64 = histogram.values().map(|e| f64::from(e.count)).sum();

    histogram
        .into_iter()
        .map(|(key, entry)| {
            let count = f64::from(entry.count);
            let phi_f_e = (count.ln() - denominator.ln()) as f32;

            // U. Germann's approximation: estimate how often the target
            // phrase occurs with other source phrases from its total
            // corpus frequency and the sample rate.
            let target_hits = ctx.index.count_raw(&key.tgt, false) as f64;
            let other = target_hits - count * sample_rate;
            let phi_e_f = (count.ln() - (count + other).ln()) as f32;

            let mut scores = Vec::with_capacity(ctx.template.width());
            scores.push(phi_f_e);
            scores.push(f64::from(entry.lex_f_e).ln() as f32);
            scores.push(phi_e_f);
            scores.push(f64::from(entry.lex_e_f).ln() as f32);
            if ctx.template == FeatureTemplate::DenseExt {
                scores.push(count.ln() as f32);
                scores.push(if entry.count == 1 { 1.0 } else { 0.0 });
            }

            Rule {
                src: key.src,
                tgt: key.tgt,
                scores: scores.into_boxed_slice(),
            }
        })
        .collect()
}

/// 1つの出現に対する語彙翻訳確率を両方向で計算します
///
/// 順方向は原言語スパンの各単語について、アラインされた目的言語単語との
/// 共起確率の平均を取り、それらの積を返します。アラインメントを持たない
/// 単語は[`NULL_ID`]と対にします。ちょうど0になった因子は
/// [`MIN_LEX_PROB`]に置き換えます。逆方向は対称です。
///
/// # 戻り値
///
/// `(lex_e_f, lex_f_e)`のタプル
pub(crate) fn score_lex(
    sent: &SentenceView<'_>,
    rule: &SampledRule,
    cooc: &LexCoocTable,
) -> (f32, f32) {
    let source = sent.source();
    let target = sent.target();

    // Forward score.
    let mut lex_e_f = 1.0f64;
    for i in rule.src_start..rule.src_end {
        let src_id = source[i];
        let tgt_align = sent.f2e(i);
        let marginal = f64::from(cooc.src_marginal(src_id));
        let mut ef_sum = 0.0f64;
        if !tgt_align.is_empty() {
            for &j in tgt_align {
                let tgt_id = target[j as usize];
                let joint = f64::from(cooc.joint(src_id, tgt_id));
                debug_assert!(marginal > 0.0, "no marginal for source id {}", src_id);
                ef_sum += joint / marginal;
            }
            ef_sum /= tgt_align.len() as f64;
        } else if marginal > 0.0 {
            ef_sum = f64::from(cooc.joint(src_id, NULL_ID)) / marginal;
        }
        if ef_sum == 0.0 {
            ef_sum = MIN_LEX_PROB;
        }
        lex_e_f *= ef_sum;
    }

    // Backward score.
    let mut lex_f_e = 1.0f64;
    for j in rule.tgt_start..rule.tgt_end {
        let tgt_id = target[j];
        let src_align = sent.e2f(j);
        let marginal = f64::from(cooc.tgt_marginal(tgt_id));
        let mut fe_sum = 0.0f64;
        if !src_align.is_empty() {
            for &i in src_align {
                let src_id = source[i as usize];
                let joint = f64::from(cooc.joint(tgt_id, src_id));
                debug_assert!(marginal > 0.0, "no marginal for target id {}", tgt_id);
                fe_sum += joint / marginal;
            }
            fe_sum /= src_align.len() as f64;
        } else if marginal > 0.0 {
            fe_sum = f64::from(cooc.joint(tgt_id, NULL_ID)) / marginal;
        }
        if fe_sum == 0.0 {
            fe_sum = MIN_LEX_PROB;
        }
        lex_f_e *= fe_sum;
    }

    (lex_e_f as f32, lex_f_e as f32)
}
