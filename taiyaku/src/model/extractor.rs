//! 許容フレーズ対の抽出
//!
//! このモジュールは、サンプリングされた1つの出現から、標準的な
//! フレーズ抽出規則(Lopez 2008のパターンマッチング)に従って
//! すべての許容フレーズ対を列挙します:
//!
//! 1. 原言語スパンにアラインされた目的言語位置のタイトなスパンを求める
//! 2. 原言語スパンにアラインメントがなければルールなし
//! 3. タイトなスパンが最大フレーズ長以上ならルールなし
//! 4. タイトなスパンの内部に未カバーのアライン済み位置(穴)があれば
//!    ルールなし(非連続)
//! 5. それ以外の場合、タイトなスパンを*アラインされていない*目的言語
//!    位置の上でのみ外側に成長させ、各境界の組み合わせを1ルールとして
//!    出力する

use crate::bitset::BitSet;
use crate::index::corpus::SentenceView;
use crate::index::suffix_array::QueryResult;
use crate::rule::SampledRule;

/// 1つのサンプリングされた出現から許容フレーズ対を抽出します
///
/// 出力の順序は規定されません。下流は多重集合として扱います。
///
/// # 引数
///
/// * `sent` - 出現を含む文対のビュー
/// * `query` - 原言語フレーズの出現位置
/// * `length` - 原言語フレーズの長さ
/// * `max_target_phrase` - 目的言語フレーズの最大長
/// * `out` - 抽出されたルールの出力先(クリアされません)
pub(crate) fn extract_rules(
    sent: &SentenceView<'_>,
    query: &QueryResult,
    length: usize,
    max_target_phrase: usize,
    out: &mut Vec<SampledRule>,
) {
    let start_source = query.position as usize;
    let end_source = start_source + length;
    debug_assert!(end_source <= sent.source().len());

    let target_len = sent.target().len();

    // Find the tight target span.
    let mut min_target = usize::MAX;
    let mut max_target: Option<usize> = None;
    let mut target_coverage = BitSet::new(target_len);
    for source_pos in start_source..end_source {
        for &t in sent.f2e(source_pos) {
            let t = t as usize;
            min_target = min_target.min(t);
            max_target = Some(max_target.map_or(t, |m| m.max(t)));
            target_coverage.set(t);
        }
    }

    // No source word in the span is aligned.
    let Some(max_target) = max_target else {
        return;
    };

    // Tight span too wide.
    if max_target - min_target >= max_target_phrase {
        return;
    }

    // A hole in the tight span means the target side is non-contiguous.
    if target_coverage.next_clear_bit(min_target) <= max_target {
        return;
    }

    // Grow the left bound of the target over unaligned positions.
    let mut start_target = min_target;
    loop {
        if start_target + max_target_phrase <= max_target {
            break;
        }
        if start_target != min_target && sent.is_target_aligned(start_target) {
            break;
        }

        // Grow the right bound of the target over unaligned positions.
        let mut end_target = max_target;
        while end_target < target_len
            && end_target < start_target + max_target_phrase
            && (end_target == max_target || !sent.is_target_aligned(end_target))
        {
            out.push(SampledRule {
                src_start: start_source,
                src_end: end_source,
                tgt_start: start_target,
                tgt_end: end_target + 1,
                sentence: query.sentence,
            });
            end_target += 1;
        }

        if start_target == 0 {
            break;
        }
        start_target -= 1;
    }
}
