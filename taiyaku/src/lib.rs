//! # Taiyaku
//!
//! Taiyakuは、対訳接尾辞配列に基づく動的な翻訳ルール抽出の実装です。
//!
//! ## 概要
//!
//! このライブラリは、フレーズベース統計的機械翻訳デコーダのための
//! 動的翻訳モデルを提供します。単語アラインメント付き対訳コーパスを
//! 対訳接尾辞配列としてインデックス化し、クエリ時に原言語フレーズの
//! 出現をサンプリングして、アラインされた目的言語フレーズを抽出し、
//! フレーズ翻訳確率と語彙翻訳確率からなる密な素性でスコアリングします。
//!
//! ## 主な機能
//!
//! - **対訳接尾辞配列**: フレーズの完全一致の位置特定・計数・一様
//!   サンプリングを対数時間で実行
//! - **サンプリングベースのルール抽出**: 事前計算されたルールテーブルを
//!   持たず、クエリ時に標準的なフレーズ抽出規則でルールを導出
//! - **語彙共起キャッシュ**: IBM-1風の語彙翻訳確率のための並行構築
//!   される共起統計
//! - **データ並列クエリ**: スパン開始位置をまたぐ並列抽出と、ヒットの
//!   ないスパンの単調なミス伝播による枝刈り
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use taiyaku::{IndexBuilder, TranslationModel};
//!
//! let index = IndexBuilder::from_readers(
//!     "a b c\na b\n".as_bytes(),
//!     "A B C\nA B\n".as_bytes(),
//!     "0-0 1-1 2-2\n0-0 1-1\n".as_bytes(),
//! )?;
//!
//! let mut tm = TranslationModel::new(index);
//! tm.init(false, 100)?;
//!
//! let rules = tm.get_rules(&["a", "b"], 0, None)?;
//! assert!(!rules.is_empty());
//! for rule in &rules {
//!     assert!(rule.rule.scores.iter().all(|s| s.is_finite()));
//! }
//! # Ok(())
//! # }
//! ```

/// ビット集合のユーティリティ
mod bitset;

/// エラー型の定義
pub mod errors;

/// 対訳接尾辞配列インデックス
pub mod index;

/// 動的翻訳モデル
pub mod model;

/// 抽出されたルールの表現
pub mod rule;


// Re-exports
pub use index::builder::IndexBuilder;
pub use index::suffix_array::{QueryResult, SuffixArraySample};
pub use index::vocabulary::Vocabulary;
pub use index::{Index, LoadMode};
pub use model::scorer::{FeatureScorer, FeatureTemplate};
pub use model::{QueryStats, TranslationModel, DEFAULT_MAX_PHRASE_LEN, DEFAULT_SAMPLE_SIZE};
pub use rule::{ConcreteRule, Rule, SampledRule};

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
