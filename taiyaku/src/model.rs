//! 動的翻訳モデル
//!
//! このモジュールは、接尾辞配列インデックスに裏打ちされた動的な
//! 翻訳ルール抽出のファサードを提供します。クエリ時に原言語フレーズの
//! 出現をサンプリングし、サンプリングされた文脈からアラインされた
//! 目的言語フレーズを抽出し、抽出されたフレーズ対を密な素性で
//! スコアリングします。
//!
//! # 主要な構造体
//!
//! - [`TranslationModel`]: 抽出とスコアリングを統合するファサード
//! - [`QueryStats`]: クエリの計測フック
//!
//! # 例
//!
//! ```no_run
//! use taiyaku::{TranslationModel, DEFAULT_SAMPLE_SIZE};
//!
//! let mut tm = TranslationModel::load("path/to/index.bin")?;
//! tm.init(false, DEFAULT_SAMPLE_SIZE)?;
//!
//! let rules = tm.get_rules(&["a", "b", "c"], 0, None)?;
//! for rule in &rules {
//!     println!("{:?} {:?}", rule.source_coverage(), rule.rule.scores);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub(crate) mod cooc;
pub(crate) mod extractor;
pub mod scorer;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use rayon::prelude::*;

use crate::bitset::AtomicBitSet;
use crate::errors::{Result, TaiyakuError};
use crate::index::vocabulary::{self, Vocabulary};
use crate::index::{Index, LoadMode};
use crate::model::cooc::{LexCoocTable, NULL_ID};
use crate::model::scorer::{samples_to_rules, FeatureScorer, FeatureTemplate, ScoringContext};
use crate::rule::{ConcreteRule, Rule};

/// フレーズ長(両側)のデフォルト上限
pub const DEFAULT_MAX_PHRASE_LEN: usize = 7;

/// デフォルトのサンプルサイズ
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// ユニグラムルールキャッシュの対象となるヒット数の閾値
const CACHE_THRESHOLD: usize = 1000;

/// クエリの計測フック
///
/// [`TranslationModel::get_rules_with_stats`]に渡すと、スパンごとの
/// 処理内訳がアトミックカウンタに記録されます。ミス伝播の検証などに
/// 使用します。
#[derive(Default, Debug)]
pub struct QueryStats {
    spans_sampled: AtomicUsize,
    spans_skipped: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl QueryStats {
    /// 空の計測フックを生成します
    pub fn new() -> Self {
        Self::default()
    }

    /// サンプリングが実行されたスパン数を返します
    pub fn spans_sampled(&self) -> usize {
        self.spans_sampled.load(Ordering::Relaxed)
    }

    /// ミス伝播によってスキップされたスパン数を返します
    pub fn spans_skipped(&self) -> usize {
        self.spans_skipped.load(Ordering::Relaxed)
    }

    /// ユニグラムキャッシュから供給されたスパン数を返します
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

/// 初期化後は読み取り専用になるキャッシュ群
struct Caches {
    cooc: LexCoocTable,
    rules: HashMap<u32, Vec<Arc<Rule>>>,
}

/// 接尾辞配列に裏打ちされた動的翻訳モデル
///
/// インデックスを保持し、クエリごとに原言語スパンのサンプリング、
/// ルール抽出、スコアリングを実行します。[`init`](Self::init)で
/// 語彙共起キャッシュとユニグラムルールキャッシュを一度だけ構築し、
/// 以後は読み取り専用で共有されます。
pub struct TranslationModel {
    index: Arc<Index>,
    max_source_phrase: usize,
    max_target_phrase: usize,
    feature_template: FeatureTemplate,
    sample_size: usize,
    seed: u64,
    use_system_vocabulary: bool,
    parallel: bool,
    caches: Option<Caches>,
}

impl TranslationModel {
    /// インデックスからモデルを生成します
    ///
    /// このコンストラクタはキャッシュを構築*しません*。クエリの前に
    /// [`init`](Self::init)を呼び出す必要があります。
    ///
    /// # 引数
    ///
    /// * `index` - 対訳接尾辞配列インデックス
    pub fn new(index: Index) -> Self {
        Self::from_shared_index(Arc::new(index))
    }

    /// 共有されたインデックスからモデルを生成します
    ///
    /// 複数のモデルインスタンスがインデックスを再読み込みせずに共有する
    /// 場合に使用します。
    ///
    /// # 引数
    ///
    /// * `index` - インデックスへの`Arc`参照
    pub fn from_shared_index(index: Arc<Index>) -> Self {
        Self {
            index,
            max_source_phrase: DEFAULT_MAX_PHRASE_LEN,
            max_target_phrase: DEFAULT_MAX_PHRASE_LEN,
            feature_template: FeatureTemplate::Dense,
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: 0,
            use_system_vocabulary: false,
            parallel: true,
            caches: None,
        }
    }

    /// ファイルからモデルを読み込みます
    ///
    /// インデックスは完全検証([`LoadMode::Validate`])で読み込まれます。
    /// このメソッドもキャッシュを構築しません。
    ///
    /// # 引数
    ///
    /// * `path` - インデックスファイルへのパス
    ///
    /// # エラー
    ///
    /// ファイルが開けない場合、またはインデックスが破損している場合に
    /// エラーを返します。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Index::from_path(path, LoadMode::Validate)?))
    }

    /// インデックスへの参照を返します
    #[inline(always)]
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// 原言語フレーズの最大長を返します
    #[inline(always)]
    pub fn max_source_phrase(&self) -> usize {
        self.max_source_phrase
    }

    /// 目的言語フレーズの最大長を返します
    #[inline(always)]
    pub fn max_target_phrase(&self) -> usize {
        self.max_target_phrase
    }

    /// 現在のテンプレートの素性名を返します
    #[inline(always)]
    pub fn feature_names(&self) -> &'static [&'static str] {
        self.feature_template.names()
    }

    /// 素性テンプレートを設定します
    ///
    /// # エラー
    ///
    /// キャッシュが既に構築されている場合にエラーを返します。
    /// キャッシュされたルールは構築時のテンプレートでスコアリング
    /// されるため、後から変更することはできません。
    pub fn set_feature_template(&mut self, template: FeatureTemplate) -> Result<()> {
        self.ensure_not_initialized()?;
        self.feature_template = template;
        Ok(())
    }

    /// 原言語フレーズの最大長を設定します
    ///
    /// # エラー
    ///
    /// `n`が0の場合、またはキャッシュが既に構築されている場合に
    /// エラーを返します。
    pub fn set_max_source_phrase(&mut self, n: usize) -> Result<()> {
        self.ensure_not_initialized()?;
        if n == 0 {
            return Err(TaiyakuError::invalid_argument(
                "max_source_phrase",
                "The maximum phrase length must be positive.",
            ));
        }
        self.max_source_phrase = n;
        Ok(())
    }

    /// 目的言語フレーズの最大長を設定します
    ///
    /// # エラー
    ///
    /// `n`が0の場合、またはキャッシュが既に構築されている場合に
    /// エラーを返します。
    pub fn set_max_target_phrase(&mut self, n: usize) -> Result<()> {
        self.ensure_not_initialized()?;
        if n == 0 {
            return Err(TaiyakuError::invalid_argument(
                "max_target_phrase",
                "The maximum phrase length must be positive.",
            ));
        }
        self.max_target_phrase = n;
        Ok(())
    }

    /// サンプルサイズを設定します
    ///
    /// # エラー
    ///
    /// `k`が0の場合にエラーを返します。
    pub fn set_sample_size(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Err(TaiyakuError::invalid_argument(
                "sample_size",
                "The sample size must be positive.",
            ));
        }
        self.sample_size = k;
        Ok(())
    }

    /// サンプリングのグローバルシードを設定します
    ///
    /// 同じシードと同じ入力に対するクエリは同じ結果を返します。
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// 逐次実行モードを設定します
    ///
    /// `true`にするとキャッシュ構築とクエリが単一スレッドで実行されます。
    /// テストの再現性確認に使用します。デフォルトは並列実行です。
    pub fn set_serial(&mut self, yes: bool) {
        self.parallel = !yes;
    }

    fn ensure_not_initialized(&self) -> Result<()> {
        if self.caches.is_some() {
            return Err(TaiyakuError::invalid_state(
                "The caches are already initialized",
                "configuration must happen before init()",
            ));
        }
        Ok(())
    }

    /// キャッシュを構築します
    ///
    /// 語彙共起キャッシュを構築し、続いてユニグラムルールキャッシュを
    /// 構築します(ルールのスコアリングは共起キャッシュを参照するため、
    /// この順序は入れ替えられません)。両キャッシュはモデルの寿命の間
    /// 不変です。
    ///
    /// # 引数
    ///
    /// * `use_system_vocabulary` - `true`の場合、このインデックスの語彙を
    ///   プロセス全体のシステム語彙として公開し、以後のクエリの変換にも
    ///   システム語彙を使用します
    /// * `sample_size` - クエリごとのサンプル数の上限
    ///
    /// # エラー
    ///
    /// サンプルサイズが0の場合、または既に初期化されている場合に
    /// エラーを返します。
    pub fn init(&mut self, use_system_vocabulary: bool, sample_size: usize) -> Result<()> {
        self.ensure_not_initialized()?;
        self.set_sample_size(sample_size)?;
        self.use_system_vocabulary = use_system_vocabulary;
        if use_system_vocabulary {
            vocabulary::set_system(Arc::clone(self.index.vocabulary()));
        }

        // The lex cache must be created before the rule cache.
        let cooc = self.build_lex_cache();
        let rules = self.build_rule_cache(&cooc);
        self.caches = Some(Caches { cooc, rules });
        Ok(())
    }

    /// 語彙共起キャッシュを構築します
    fn build_lex_cache(&self) -> LexCoocTable {
        let vocabulary_size = self.index.vocabulary().len();
        let cooc = LexCoocTable::new(vocabulary_size);
        let corpus = self.index.corpus();

        let count_one = |id: u32| {
            let pattern = [id];

            // Every source occurrence.
            for query in self.index.query_raw(&pattern, true) {
                let sent = corpus.sentence(query.sentence as usize);
                let tgt_align = sent.f2e(query.position as usize);
                if tgt_align.is_empty() {
                    cooc.add_cooc(id, NULL_ID);
                    cooc.incr_src_marginal(id, 1);
                } else {
                    cooc.incr_src_marginal(id, tgt_align.len() as u32);
                    for &j in tgt_align {
                        cooc.add_cooc(id, sent.target()[j as usize]);
                    }
                }
            }

            // Every target occurrence.
            for query in self.index.query_raw(&pattern, false) {
                let sent = corpus.sentence(query.sentence as usize);
                let src_align = sent.e2f(query.position as usize);
                if src_align.is_empty() {
                    cooc.add_cooc(id, NULL_ID);
                    cooc.incr_tgt_marginal(id, 1);
                } else {
                    cooc.incr_tgt_marginal(id, src_align.len() as u32);
                    for &i in src_align {
                        cooc.add_cooc(id, sent.source()[i as usize]);
                    }
                }
            }
        };

        if self.parallel {
            (0..vocabulary_size as u32).into_par_iter().for_each(count_one);
        } else {
            (0..vocabulary_size as u32).for_each(count_one);
        }
        cooc
    }

    /// ユニグラムルールキャッシュを構築します
    ///
    /// ヒット数が閾値を超える原言語ユニグラムについて、全出現から
    /// (サンプリングレート1.0で)スコアリング済みルールを事前計算します。
    fn build_rule_cache(&self, cooc: &LexCoocTable) -> HashMap<u32, Vec<Arc<Rule>>> {
        let vocabulary_size = self.index.vocabulary().len() as u32;
        let ctx = ScoringContext {
            index: &self.index,
            cooc,
            template: self.feature_template,
            max_target_phrase: self.max_target_phrase,
        };

        let build_one = |id: u32| -> Option<(u32, Vec<Arc<Rule>>)> {
            let pattern = [id];
            if self.index.count_raw(&pattern, true) <= CACHE_THRESHOLD {
                return None;
            }
            let samples = self.index.query_raw(&pattern, true);
            let rules = samples_to_rules(&ctx, &samples, 1, 1.0);
            Some((id, rules.into_iter().map(Arc::new).collect()))
        };

        let entries: Vec<(u32, Vec<Arc<Rule>>)> = if self.parallel {
            (0..vocabulary_size)
                .into_par_iter()
                .filter_map(build_one)
                .collect()
        } else {
            (0..vocabulary_size).filter_map(build_one).collect()
        };
        log::info!(
            "Cached rules for {} frequent unigrams",
            entries.len()
        );
        entries.into_iter().collect()
    }

    /// 入力文のすべてのスパンに対するスコアリング済みルールを返します
    ///
    /// 各スパン長`L = 1..=min(max_source_phrase, |source|)`について、
    /// 開始位置ごとに並列に処理します:
    ///
    /// 1. 前の長さでミスになった位置を含むスパンはスキップし、ミスを
    ///    現在の長さへ伝播します(あるフレーズのヒット集合はその
    ///    部分フレーズのヒット集合に含まれるため、この枝刈りは安全です)
    /// 2. 長さ1でユニグラムキャッシュにあれば、キャッシュ済みルールを
    ///    返します
    /// 3. それ以外は接尾辞配列からサンプリングし、ヒットが0なら
    ///    このスパンをミスとして記録し、そうでなければルールを抽出・
    ///    スコアリングします
    ///
    /// 未知語やヒットのないスパンはエラーにならず、単に出力を
    /// 減らします。
    ///
    /// # 引数
    ///
    /// * `source` - 入力文のトークン列
    /// * `input_id` - クエリ入力のID(結果のルールに付与されます)
    /// * `scorer` - 素性ベクトルを受け取るシンク(省略可能)
    ///
    /// # エラー
    ///
    /// [`init`](Self::init)が呼ばれていない場合にエラーを返します。
    pub fn get_rules<S>(
        &self,
        source: &[S],
        input_id: usize,
        scorer: Option<&(dyn FeatureScorer + Sync)>,
    ) -> Result<Vec<ConcreteRule>>
    where
        S: AsRef<str>,
    {
        self.get_rules_inner(source, input_id, scorer, None)
    }

    /// 計測フック付きで[`get_rules`](Self::get_rules)を実行します
    pub fn get_rules_with_stats<S>(
        &self,
        source: &[S],
        input_id: usize,
        scorer: Option<&(dyn FeatureScorer + Sync)>,
        stats: &QueryStats,
    ) -> Result<Vec<ConcreteRule>>
    where
        S: AsRef<str>,
    {
        self.get_rules_inner(source, input_id, scorer, Some(stats))
    }

    fn get_rules_inner<S>(
        &self,
        source: &[S],
        input_id: usize,
        scorer: Option<&(dyn FeatureScorer + Sync)>,
        stats: Option<&QueryStats>,
    ) -> Result<Vec<ConcreteRule>>
    where
        S: AsRef<str>,
    {
        let Some(caches) = self.caches.as_ref() else {
            return Err(TaiyakuError::invalid_state(
                "The caches are not initialized",
                "call init() before get_rules()",
            ));
        };
        if source.is_empty() {
            return Ok(Vec::new());
        }

        let vocabulary = self.query_vocabulary()?;
        let ids: Vec<u32> = source.iter().map(|w| vocabulary.add(w.as_ref())).collect();
        let n = ids.len();

        let mut concrete_rules: Vec<ConcreteRule> = Vec::new();
        let mut misses = AtomicBitSet::new(n);
        let longest = self.max_source_phrase.min(n);

        for length in 1..=longest {
            let new_misses = AtomicBitSet::new(n);

            let process = |i: usize| -> Option<Vec<ConcreteRule>> {
                let j = i + length;

                // Propagate misses from shorter spans.
                if misses.any_set(i, j) {
                    new_misses.set_range(i, j);
                    if let Some(s) = stats {
                        s.spans_skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    return None;
                }

                // Frequent unigrams come from the cache.
                if length == 1 {
                    if let Some(cached) = caches.rules.get(&ids[i]) {
                        if let Some(s) = stats {
                            s.cache_hits.fetch_add(1, Ordering::Relaxed);
                        }
                        return Some(self.wrap_rules(cached, i, j, input_id, scorer));
                    }
                }

                // Sample from the suffix array.
                if let Some(s) = stats {
                    s.spans_sampled.fetch_add(1, Ordering::Relaxed);
                }
                let pattern = &ids[i..j];
                let sample = self
                    .index
                    .sample_raw(pattern, true, self.sample_size, self.seed);
                if sample.num_hits == 0 {
                    new_misses.set_range(i, j);
                    return None;
                }
                let sample_rate = sample.samples.len() as f64 / sample.num_hits as f64;
                let ctx = ScoringContext {
                    index: &self.index,
                    cooc: &caches.cooc,
                    template: self.feature_template,
                    max_target_phrase: self.max_target_phrase,
                };
                let scored: Vec<Arc<Rule>> =
                    samples_to_rules(&ctx, &sample.samples, length, sample_rate)
                        .into_iter()
                        .map(Arc::new)
                        .collect();
                Some(self.wrap_rules(&scored, i, j, input_id, scorer))
            };

            let span_rules: Vec<Option<Vec<ConcreteRule>>> = if self.parallel {
                (0..=n - length).into_par_iter().map(process).collect()
            } else {
                (0..=n - length).map(process).collect()
            };

            misses = new_misses;
            concrete_rules.extend(span_rules.into_iter().flatten().flatten());
        }

        Ok(concrete_rules)
    }

    /// クエリの変換に使用する語彙を返します
    fn query_vocabulary(&self) -> Result<Arc<Vocabulary>> {
        if self.use_system_vocabulary {
            vocabulary::system().ok_or_else(|| {
                TaiyakuError::invalid_state(
                    "The system vocabulary is not set",
                    "init(use_system_vocabulary = true) publishes it",
                )
            })
        } else {
            Ok(Arc::clone(self.index.vocabulary()))
        }
    }

    fn wrap_rules(
        &self,
        rules: &[Arc<Rule>],
        src_start: usize,
        src_end: usize,
        input_id: usize,
        scorer: Option<&(dyn FeatureScorer + Sync)>,
    ) -> Vec<ConcreteRule> {
        let names = self.feature_template.names();
        rules
            .iter()
            .map(|rule| {
                if let Some(s) = scorer {
                    s.score(&rule.scores, names);
                }
                ConcreteRule {
                    rule: Arc::clone(rule),
                    src_start,
                    src_end,
                    input_id,
                }
            })
            .collect()
    }
}
