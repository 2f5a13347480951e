//! 語彙共起テーブル
//!
//! このモジュールは、単語レベルの共起統計を保持する並行テーブルを
//! 提供します。結合カウント`joint(a, b)`と両側の周辺カウントから
//! なり、キャッシュ構築中は複数のスレッドから同時に書き込まれます。
//!
//! すべての更新は単調増加であるため、トランザクションは不要です:
//! 周辺カウントは密なアトミックカウンタの配列、結合カウントは
//! エントリ単位で線形化される並行マップで表現します。

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

/// アラインメントを持たない位置を表す予約ID
///
/// 語彙IDは0から密に割り当てられるため、この値に到達することは
/// ありません。
pub const NULL_ID: u32 = u32::MAX;

/// 語彙共起テーブル
///
/// 周辺カウントは実IDのみをキーとし、結合カウントの内側のキーには
/// [`NULL_ID`]が現れることがあります(アラインメントされていない
/// 出現と対になる場合)。
pub(crate) struct LexCoocTable {
    src_marginals: Vec<AtomicU32>,
    tgt_marginals: Vec<AtomicU32>,
    joint: DashMap<(u32, u32), u32>,
}

impl LexCoocTable {
    /// 語彙サイズ分の周辺カウンタを持つ空のテーブルを生成します
    pub(crate) fn new(vocabulary_size: usize) -> Self {
        let mut src_marginals = Vec::with_capacity(vocabulary_size);
        src_marginals.resize_with(vocabulary_size, || AtomicU32::new(0));
        let mut tgt_marginals = Vec::with_capacity(vocabulary_size);
        tgt_marginals.resize_with(vocabulary_size, || AtomicU32::new(0));
        Self {
            src_marginals,
            tgt_marginals,
            joint: DashMap::new(),
        }
    }

    /// 結合カウント`(a, b)`を1増やします
    pub(crate) fn add_cooc(&self, a: u32, b: u32) {
        *self.joint.entry((a, b)).or_insert(0) += 1;
    }

    /// 原言語側の周辺カウントを`delta`増やします
    pub(crate) fn incr_src_marginal(&self, id: u32, delta: u32) {
        self.src_marginals[id as usize].fetch_add(delta, Ordering::Relaxed);
    }

    /// 目的言語側の周辺カウントを`delta`増やします
    pub(crate) fn incr_tgt_marginal(&self, id: u32, delta: u32) {
        self.tgt_marginals[id as usize].fetch_add(delta, Ordering::Relaxed);
    }

    /// 結合カウント`(a, b)`を返します
    pub(crate) fn joint(&self, a: u32, b: u32) -> u32 {
        self.joint.get(&(a, b)).map_or(0, |c| *c)
    }

    /// 原言語側の周辺カウントを返します
    ///
    /// テーブル構築後に語彙へ追加されたIDに対しては0を返します。
    pub(crate) fn src_marginal(&self, id: u32) -> u32 {
        self.src_marginals
            .get(id as usize)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// 目的言語側の周辺カウントを返します
    pub(crate) fn tgt_marginal(&self, id: u32) -> u32 {
        self.tgt_marginals
            .get(id as usize)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_monotone() {
        let t = LexCoocTable::new(4);
        t.add_cooc(0, 1);
        t.add_cooc(0, 1);
        t.add_cooc(0, NULL_ID);
        t.incr_src_marginal(0, 2);
        t.incr_src_marginal(0, 1);
        t.incr_tgt_marginal(1, 2);
        assert_eq!(t.joint(0, 1), 2);
        assert_eq!(t.joint(0, NULL_ID), 1);
        assert_eq!(t.joint(1, 0), 0);
        assert_eq!(t.src_marginal(0), 3);
        assert_eq!(t.tgt_marginal(1), 2);
        // Out-of-range ids read as zero.
        assert_eq!(t.src_marginal(100), 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        let t = Arc::new(LexCoocTable::new(2));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        t.add_cooc(0, 1);
                        t.incr_src_marginal(0, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.joint(0, 1), 4000);
        assert_eq!(t.src_marginal(0), 4000);
    }
}
