//! 接尾辞配列
//!
//! このモジュールは、片側のコーパスに対する接尾辞配列を提供します。
//! 各エントリは(文インデックス, 単語位置)のペアで、その位置から始まる
//! 接尾辞の辞書式順序で整列されます。接尾辞は文境界で打ち切られ、
//! 文境界はすべての実IDより小さい番兵として扱われます。これにより
//! パターンが文境界をまたいでマッチすることはありません。

use std::cmp::Ordering;

use hashbrown::HashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rkyv::{Archive, Deserialize, Serialize};

use crate::index::corpus::Side;

/// 接尾辞配列の1エントリ
///
/// 接尾辞の開始位置を(文インデックス, 文内の単語位置)で表します。
#[derive(
    Archive, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Debug,
)]
#[rkyv(derive(Clone, Copy))]
pub struct SuffixEntry {
    /// 文のインデックス
    pub sentence: u32,
    /// 文内の単語位置
    pub position: u32,
}

/// クエリの1ヒット
///
/// パターンが始まる位置を(文インデックス, 単語位置)で表します。
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct QueryResult {
    /// 文のインデックス
    pub sentence: u32,
    /// パターンが始まる文内の単語位置
    pub position: u32,
}

/// サンプリングの結果
///
/// `samples`はヒット集合からの一様な部分集合で、`num_hits`は
/// コーパス全体でのヒット総数です。`samples.len() / num_hits`が
/// サンプリングレートになります。
#[derive(Debug)]
pub struct SuffixArraySample {
    /// サンプリングされたヒット
    pub samples: Vec<QueryResult>,
    /// ヒットの総数
    pub num_hits: usize,
}

/// 片側のコーパスに対する接尾辞配列
#[derive(Archive, Serialize, Deserialize, Debug, Default)]
pub struct SuffixArray {
    pub(crate) entries: Vec<SuffixEntry>,
}

impl SuffixArray {
    /// コーパスの片側から接尾辞配列を構築します
    ///
    /// 構築は比較ソートで行われ、等しい接尾辞は(文, 位置)のペアで
    /// タイブレークされます。これにより同一コーパスからの再構築は
    /// 常に同一の配列を生成します。
    ///
    /// # 引数
    ///
    /// * `side` - 対象のコーパス側
    pub(crate) fn build(side: &Side) -> Self {
        let mut entries = Vec::with_capacity(side.num_tokens());
        for s in 0..side.num_sentences() {
            for p in 0..side.sentence(s).len() {
                entries.push(SuffixEntry {
                    sentence: s as u32,
                    position: p as u32,
                });
            }
        }
        entries.par_sort_unstable_by(|a, b| {
            Self::suffix(side, a)
                .cmp(Self::suffix(side, b))
                .then_with(|| (a.sentence, a.position).cmp(&(b.sentence, b.position)))
        });
        Self { entries }
    }

    /// エントリの総数(= トークンの総数)を返します
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 配列が空かどうかを返します
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline(always)]
    fn suffix<'a>(side: &'a Side, e: &SuffixEntry) -> &'a [u32] {
        &side.sentence(e.sentence as usize)[e.position as usize..]
    }

    /// 接尾辞の先頭`pattern.len()`トークンとパターンを比較します
    ///
    /// 接尾辞がパターンより短い場合、文境界の番兵はすべての実IDより
    /// 小さいため`Less`になります。
    #[inline(always)]
    fn prefix_cmp(side: &Side, e: &SuffixEntry, pattern: &[u32]) -> Ordering {
        let suffix = Self::suffix(side, e);
        let n = suffix.len().min(pattern.len());
        match suffix[..n].cmp(&pattern[..n]) {
            Ordering::Equal if suffix.len() < pattern.len() => Ordering::Less,
            ordering => ordering,
        }
    }

    /// パターンに前方一致する接尾辞の半開区間を返します
    ///
    /// 2回の二分探索で下限と上限を求めます。パターンが出現しない場合は
    /// 空の区間を返します。語彙に存在しないIDを含むパターンも
    /// 単に空の区間になります。
    ///
    /// # 引数
    ///
    /// * `side` - この配列が構築されたコーパス側
    /// * `pattern` - 検索するID列(空であってはならない)
    pub(crate) fn locate(&self, side: &Side, pattern: &[u32]) -> std::ops::Range<usize> {
        debug_assert!(!pattern.is_empty());
        let lo = self
            .entries
            .partition_point(|e| Self::prefix_cmp(side, e, pattern) == Ordering::Less);
        let hi = lo
            + self.entries[lo..]
                .partition_point(|e| Self::prefix_cmp(side, e, pattern) != Ordering::Greater);
        lo..hi
    }

    /// パターンの出現回数を返します
    pub(crate) fn count(&self, side: &Side, pattern: &[u32]) -> usize {
        self.locate(side, pattern).len()
    }

    /// パターンのすべての出現位置を返します
    pub(crate) fn query(&self, side: &Side, pattern: &[u32]) -> Vec<QueryResult> {
        self.locate(side, pattern)
            .map(|i| {
                let e = self.entries[i];
                QueryResult {
                    sentence: e.sentence,
                    position: e.position,
                }
            })
            .collect()
    }

    /// パターンの出現から最大`k`個を一様にサンプリングします
    ///
    /// サンプリングは決定的です: 乱数シードはパターンの内容と
    /// グローバルシードから導出されます。抽選は区間`[lo, hi)`に対する
    /// `k`スロットのFisher–Yates法で行われ、重複なく選ばれます。
    /// 返される順序は規定されません。
    ///
    /// # 引数
    ///
    /// * `side` - この配列が構築されたコーパス側
    /// * `pattern` - 検索するID列(空であってはならない)
    /// * `k` - サンプル数の上限
    /// * `global_seed` - グローバルシード
    pub(crate) fn sample(
        &self,
        side: &Side,
        pattern: &[u32],
        k: usize,
        global_seed: u64,
    ) -> SuffixArraySample {
        let range = self.locate(side, pattern);
        let num_hits = range.len();
        if num_hits == 0 {
            return SuffixArraySample {
                samples: Vec::new(),
                num_hits: 0,
            };
        }
        let picks: Vec<usize> = if num_hits <= k {
            (0..num_hits).collect()
        } else {
            let mut rng = SmallRng::seed_from_u64(pattern_seed(pattern, global_seed));
            // Partial Fisher-Yates over k slots; the swap table keeps the
            // draw sparse so the full hit range is never materialized.
            let mut swaps: HashMap<usize, usize> = HashMap::new();
            let mut picks = Vec::with_capacity(k);
            for i in 0..k {
                let j = rng.gen_range(i..num_hits);
                let vi = swaps.get(&i).copied().unwrap_or(i);
                let vj = swaps.get(&j).copied().unwrap_or(j);
                picks.push(vj);
                swaps.insert(j, vi);
            }
            picks
        };
        let samples = picks
            .into_iter()
            .map(|p| {
                let e = self.entries[range.start + p];
                QueryResult {
                    sentence: e.sentence,
                    position: e.position,
                }
            })
            .collect();
        SuffixArraySample { samples, num_hits }
    }
}

/// パターンの内容とグローバルシードからサンプリング用のシードを導出します
///
/// FNV-1aでID列を畳み込み、グローバルシードと合成します。
#[inline]
fn pattern_seed(pattern: &[u32], global_seed: u64) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for &id in pattern {
        h ^= u64::from(id);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h ^ global_seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::IndexBuilder;
    use crate::index::Index;

    #[track_caller]
    fn build_test_index() -> Index {
        // Source corpus: "a b" appears in sentences 0, 1, and 2.
        IndexBuilder::from_readers(
            "a b c\na b\nc a b\nc c\n".as_bytes(),
            "A B C\nA B\nC A B\nC C\n".as_bytes(),
            "0-0 1-1 2-2\n0-0 1-1\n0-0 1-1 2-2\n0-0 1-1\n".as_bytes(),
        )
        .unwrap()
    }

    fn ids(index: &Index, words: &[&str]) -> Vec<u32> {
        words
            .iter()
            .map(|w| index.vocabulary().lookup(w).unwrap())
            .collect()
    }

    #[test]
    fn test_locate_matches_scan() {
        let index = build_test_index();
        let corpus = index.corpus();
        for pattern_words in [
            vec!["a"],
            vec!["b"],
            vec!["c"],
            vec!["a", "b"],
            vec!["a", "b", "c"],
            vec!["c", "a"],
            vec!["c", "c"],
            vec!["b", "c"],
        ] {
            let pattern = ids(&index, &pattern_words);
            let mut expected: Vec<QueryResult> = Vec::new();
            for s in 0..corpus.len() {
                let sent = corpus.source().sentence(s);
                for p in 0..sent.len() {
                    if sent[p..].starts_with(&pattern) {
                        expected.push(QueryResult {
                            sentence: s as u32,
                            position: p as u32,
                        });
                    }
                }
            }
            let mut got = index.query(&pattern, true).unwrap();
            got.sort_by_key(|q| (q.sentence, q.position));
            expected.sort_by_key(|q| (q.sentence, q.position));
            assert_eq!(got, expected, "pattern {:?}", pattern_words);
        }
    }

    #[test]
    fn test_pattern_does_not_cross_sentence_boundary() {
        let index = build_test_index();
        // "b c" occurs inside sentence 0 only; the boundary between
        // sentences 1 and 2 ("a b" / "c a b") must not produce a hit.
        let pattern = ids(&index, &["b", "c"]);
        assert_eq!(index.count(&pattern, true).unwrap(), 1);
    }

    #[test]
    fn test_oov_id_yields_empty_range() {
        let index = build_test_index();
        assert_eq!(index.count(&[9999], true).unwrap(), 0);
        assert_eq!(index.count(&[u32::MAX], true).unwrap(), 0);
        assert!(index.query(&[9999], true).unwrap().is_empty());
    }

    #[test]
    fn test_empty_pattern_fails() {
        let index = build_test_index();
        assert!(index.count(&[], true).is_err());
        assert!(index.query(&[], true).is_err());
        assert!(index.sample(&[], true, 10).is_err());
    }

    #[test]
    fn test_sample_is_deterministic_and_distinct() {
        let index = build_test_index();
        let pattern = ids(&index, &["a", "b"]);
        let s1 = index.sample(&pattern, true, 2).unwrap();
        let s2 = index.sample(&pattern, true, 2).unwrap();
        assert_eq!(s1.num_hits, 3);
        assert_eq!(s1.samples.len(), 2);
        assert_eq!(s1.samples, s2.samples);
        assert_ne!(s1.samples[0], s1.samples[1]);
        // Every sample must come from the true hit set.
        let hits = index.query(&pattern, true).unwrap();
        for q in &s1.samples {
            assert!(hits.contains(q));
        }
    }

    #[test]
    fn test_sample_returns_all_when_k_exceeds_hits() {
        let index = build_test_index();
        let pattern = ids(&index, &["a", "b"]);
        let s = index.sample(&pattern, true, 100).unwrap();
        assert_eq!(s.num_hits, 3);
        assert_eq!(s.samples.len(), 3);
    }

    #[test]
    fn test_sample_roughly_uniform() {
        // One long sentence with many occurrences of a unigram; draw
        // k-of-n samples under many different global seeds and check
        // that every hit is selected a comparable number of times.
        let n = 40usize;
        let src = vec!["x"; n].join(" ") + "\n";
        let tgt = vec!["X"; n].join(" ") + "\n";
        let align: String = (0..n)
            .map(|i| format!("{}-{}", i, i))
            .collect::<Vec<_>>()
            .join(" ")
            + "\n";
        let index =
            IndexBuilder::from_readers(src.as_bytes(), tgt.as_bytes(), align.as_bytes()).unwrap();
        let pattern = ids(&index, &["x"]);

        let trials = 2000usize;
        let k = 4usize;
        let mut counts = vec![0usize; n];
        for seed in 0..trials as u64 {
            let s = index
                .suffix_array(true)
                .sample(index.corpus().source(), &pattern, k, seed);
            assert_eq!(s.samples.len(), k);
            for q in &s.samples {
                counts[q.position as usize] += 1;
            }
        }
        let expected = (trials * k) as f64 / n as f64;
        // chi-squared against the uniform distribution; df = 39, the 0.999
        // quantile is ~73. Allow generous head room.
        let chi2: f64 = counts
            .iter()
            .map(|&c| {
                let d = c as f64 - expected;
                d * d / expected
            })
            .sum();
        assert!(chi2 < 100.0, "chi2 = {}", chi2);
    }

    #[test]
    fn test_miss_monotonicity() {
        let index = build_test_index();
        // "b a" never occurs; neither may any super-phrase of it.
        let pattern = ids(&index, &["b", "a"]);
        assert_eq!(index.count(&pattern, true).unwrap(), 0);
        let mut longer = pattern.clone();
        longer.push(ids(&index, &["c"])[0]);
        assert_eq!(index.count(&longer, true).unwrap(), 0);
    }
}
