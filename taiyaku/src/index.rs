//! 対訳接尾辞配列インデックス
//!
//! このモジュールは、単語アラインメント付き対訳コーパスに対する
//! 静的なインデックスを提供します。インデックスは以下から構成されます:
//!
//! - 語彙(文字列テーブル)
//! - 両側のコーパス(ID列 + 文長の前置和)
//! - パックされたCSR形式のf2e/e2fアラインメント
//! - 両側の接尾辞配列
//!
//! インデックスは一度構築された後は読み取り専用で、フレーズの完全一致の
//! 位置特定、出現回数の取得、出現の一様サンプリングを対数時間の
//! 二分探索で提供します。
//!
//! # インデックスの構築と読み込み
//!
//! - [`IndexBuilder`](crate::IndexBuilder): コーパスファイルからの構築
//! - [`Index::from_path`]: ファイルパスからの読み込み(`.zst`は透過的に展開)
//! - [`Index::read`]: リーダーからの読み込み

pub mod builder;
pub mod corpus;
pub mod suffix_array;
pub mod vocabulary;

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rkyv::api::serialize_using;
use rkyv::rancor::Error as RancorError;
use rkyv::ser::{allocator::Arena, sharing::Share, writer::IoWriter, Serializer};
use rkyv::util::{with_arena, AlignedVec};
use rkyv::{access, Archive, Deserialize, Serialize};

use crate::errors::{Result, TaiyakuError};
use crate::index::corpus::ParallelCorpus;
use crate::index::suffix_array::{QueryResult, SuffixArray, SuffixArraySample};
use crate::index::vocabulary::Vocabulary;

/// Taiyakuインデックスを識別するマジックバイト
///
/// 末尾の"0.1"はインデックスフォーマットのバージョンを示しており、
/// クレートのセマンティックバージョンからは切り離されています。
pub const MODEL_MAGIC: &[u8] = b"TaiyakuIndex 0.1\n";

const MODEL_MAGIC_LEN: usize = MODEL_MAGIC.len();
const RKYV_ALIGNMENT: usize = 16;
const PADDING_LEN: usize = (RKYV_ALIGNMENT - (MODEL_MAGIC_LEN % RKYV_ALIGNMENT)) % RKYV_ALIGNMENT;

/// インデックスの読み込みモード
///
/// 読み込み時の検証戦略を指定します。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// rkyvペイロードの検証に加えて、構造的不変条件
    /// (前置和の単調性、アラインメント添字の範囲、接尾辞配列の整列)を
    /// 完全に検証します。最も安全なモードです。
    Validate,
    /// rkyvペイロードの検証のみを行い、構造的不変条件の検査を
    /// スキップします。信頼できる自前のビルド成果物を繰り返し
    /// 読み込む場合に使用します。
    Trust,
}

/// シリアライズされるインデックスの内部データ
#[derive(Archive, Serialize, Deserialize)]
pub(crate) struct IndexInner {
    pub(crate) words: Vec<String>,
    pub(crate) corpus: ParallelCorpus,
    pub(crate) src_sa: SuffixArray,
    pub(crate) tgt_sa: SuffixArray,
}

/// 対訳接尾辞配列インデックス
///
/// 構築またはデシリアライズの後は読み取り専用です。ただし語彙だけは、
/// クエリが未知語を持ち込んだ場合に限り単調に成長します
/// ([`Vocabulary::add`]参照)。
pub struct Index {
    inner: IndexInner,
    vocabulary: Arc<Vocabulary>,
}

impl Index {
    /// 内部データからインデックスを生成します
    ///
    /// # 引数
    ///
    /// * `inner` - インデックスの内部データ
    /// * `validate` - 構造的不変条件を検証するかどうか
    pub(crate) fn from_inner(inner: IndexInner, validate: bool) -> Result<Self> {
        if validate {
            Self::validate(&inner)?;
        }
        let vocabulary = Arc::new(Vocabulary::from_words(&inner.words));
        Ok(Self { inner, vocabulary })
    }

    /// 語彙への参照を返します
    #[inline(always)]
    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    /// コーパスへの参照を返します
    #[inline(always)]
    pub fn corpus(&self) -> &ParallelCorpus {
        &self.inner.corpus
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> IndexInner {
        self.inner
    }

    #[inline(always)]
    pub(crate) fn suffix_array(&self, on_source: bool) -> &SuffixArray {
        if on_source {
            &self.inner.src_sa
        } else {
            &self.inner.tgt_sa
        }
    }

    #[inline(always)]
    fn side(&self, on_source: bool) -> &corpus::Side {
        if on_source {
            &self.inner.corpus.src
        } else {
            &self.inner.corpus.tgt
        }
    }

    /// パターンの出現回数を返します
    ///
    /// # 引数
    ///
    /// * `pattern` - 検索するID列
    /// * `on_source` - `true`なら原言語側、`false`なら目的言語側を検索
    ///
    /// # エラー
    ///
    /// パターンが空の場合にエラーを返します。語彙に存在しないIDを含む
    /// パターンはエラーにならず、出現回数0になります。
    pub fn count(&self, pattern: &[u32], on_source: bool) -> Result<usize> {
        check_pattern(pattern)?;
        Ok(self.count_raw(pattern, on_source))
    }

    /// パターンのすべての出現位置を返します
    ///
    /// # 引数
    ///
    /// * `pattern` - 検索するID列
    /// * `on_source` - `true`なら原言語側、`false`なら目的言語側を検索
    ///
    /// # エラー
    ///
    /// パターンが空の場合にエラーを返します。
    pub fn query(&self, pattern: &[u32], on_source: bool) -> Result<Vec<QueryResult>> {
        check_pattern(pattern)?;
        Ok(self.query_raw(pattern, on_source))
    }

    /// パターンの出現から最大`k`個を一様にサンプリングします
    ///
    /// サンプリングはパターンの内容とグローバルシードに対して決定的です。
    /// 詳細は[`suffix_array`]モジュールを参照してください。
    ///
    /// # 引数
    ///
    /// * `pattern` - 検索するID列
    /// * `on_source` - `true`なら原言語側、`false`なら目的言語側を検索
    /// * `k` - サンプル数の上限
    ///
    /// # エラー
    ///
    /// パターンが空の場合にエラーを返します。
    pub fn sample(&self, pattern: &[u32], on_source: bool, k: usize) -> Result<SuffixArraySample> {
        check_pattern(pattern)?;
        Ok(self.sample_raw(pattern, on_source, k, 0))
    }

    #[inline]
    pub(crate) fn count_raw(&self, pattern: &[u32], on_source: bool) -> usize {
        self.suffix_array(on_source)
            .count(self.side(on_source), pattern)
    }

    #[inline]
    pub(crate) fn query_raw(&self, pattern: &[u32], on_source: bool) -> Vec<QueryResult> {
        self.suffix_array(on_source)
            .query(self.side(on_source), pattern)
    }

    #[inline]
    pub(crate) fn sample_raw(
        &self,
        pattern: &[u32],
        on_source: bool,
        k: usize,
        global_seed: u64,
    ) -> SuffixArraySample {
        self.suffix_array(on_source)
            .sample(self.side(on_source), pattern, k, global_seed)
    }

    /// インデックスをrkyvフォーマットでライターにシリアライズします
    ///
    /// 出力はマジックバイト、アラインメント用のパディング、rkyvペイロードの
    /// 順に並びます。この出力は[`Index::read`]や[`Index::from_path`]が
    /// 期待する形式です。
    ///
    /// # エラー
    ///
    /// 書き込みに失敗した場合、またはシリアライゼーションに失敗した場合に
    /// エラーを返します。
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        wtr.write_all(MODEL_MAGIC)?;

        let padding_bytes = [0xFFu8; PADDING_LEN];
        wtr.write_all(&padding_bytes)?;

        with_arena(|arena: &mut Arena| {
            let writer = IoWriter::new(&mut wtr);
            let mut serializer = Serializer::new(writer, arena.acquire(), Share::new());
            serialize_using::<_, RancorError>(&self.inner, &mut serializer)
        })
        .map_err(|e| {
            TaiyakuError::invalid_state("rkyv serialization failed".to_string(), e.to_string())
        })?;

        Ok(())
    }

    /// リーダーからインデックスを読み込みます
    ///
    /// # 引数
    ///
    /// * `rdr` - `std::io::Read`を実装するリーダー
    /// * `mode` - 検証戦略を指定する[`LoadMode`]
    ///
    /// # エラー
    ///
    /// マジックナンバーが一致しない場合、rkyvペイロードが破損している場合、
    /// または(`LoadMode::Validate`時)構造的不変条件が破られている場合に
    /// エラーを返します。
    pub fn read<R: Read>(mut rdr: R, mode: LoadMode) -> Result<Self> {
        let mut magic = [0; MODEL_MAGIC_LEN];
        rdr.read_exact(&mut magic)?;

        if !magic.starts_with(MODEL_MAGIC) {
            return Err(TaiyakuError::invalid_argument(
                "rdr",
                "The magic number of the input index mismatches.",
            ));
        }

        let mut padding_buf = [0u8; PADDING_LEN];
        rdr.read_exact(&mut padding_buf)?;

        let mut buffer = Vec::new();
        rdr.read_to_end(&mut buffer)?;

        let mut aligned_bytes = AlignedVec::<RKYV_ALIGNMENT>::with_capacity(buffer.len());
        aligned_bytes.extend_from_slice(&buffer);

        let archived = access::<ArchivedIndexInner, RancorError>(&aligned_bytes).map_err(|e| {
            TaiyakuError::invalid_state(
                "rkyv validation failed. The index file may be corrupted or incompatible."
                    .to_string(),
                e.to_string(),
            )
        })?;

        let inner: IndexInner = rkyv::deserialize::<IndexInner, RancorError>(archived)?;

        Self::from_inner(inner, mode == LoadMode::Validate)
    }

    /// ファイルパスからインデックスを読み込みます
    ///
    /// 拡張子が`.zst`の場合、ペイロードは透過的にzstd展開されます。
    ///
    /// # 引数
    ///
    /// * `path` - インデックスファイルへのパス
    /// * `mode` - 検証戦略を指定する[`LoadMode`]
    ///
    /// # エラー
    ///
    /// ファイルが開けない場合、または[`Index::read`]と同じ条件で
    /// エラーを返します。
    pub fn from_path<P: AsRef<Path>>(path: P, mode: LoadMode) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            TaiyakuError::invalid_argument("path", format!("Failed to open index file: {}", e))
        })?;
        if path.extension().is_some_and(|e| e == "zst") {
            Self::read(zstd::stream::read::Decoder::new(file)?, mode)
        } else {
            Self::read(BufReader::new(file), mode)
        }
    }

    /// 構造的不変条件を検証します
    fn validate(inner: &IndexInner) -> Result<()> {
        let corpus = &inner.corpus;
        validate_side(&corpus.src, "source")?;
        validate_side(&corpus.tgt, "target")?;
        validate_alignment(corpus, true)?;
        validate_alignment(corpus, false)?;

        // aligned_tgt must agree with the e2f rows.
        if corpus.aligned_tgt.len() != corpus.tgt.num_tokens().div_ceil(64) {
            return Err(TaiyakuError::corrupt_index(
                "Aligned-target bitset has the wrong length",
            ));
        }
        for t in 0..corpus.tgt.num_tokens() {
            let bit = corpus.aligned_tgt[t / 64] & (1 << (t % 64)) != 0;
            if bit != !corpus.e2f.row(t).is_empty() {
                return Err(TaiyakuError::corrupt_index(format!(
                    "Aligned-target bit {} disagrees with the e2f row",
                    t
                )));
            }
        }

        validate_suffix_array(&inner.src_sa, &corpus.src, "source")?;
        validate_suffix_array(&inner.tgt_sa, &corpus.tgt, "target")?;
        Ok(())
    }
}

#[inline]
fn check_pattern(pattern: &[u32]) -> Result<()> {
    if pattern.is_empty() {
        return Err(TaiyakuError::invalid_argument(
            "pattern",
            "An empty pattern cannot be located.",
        ));
    }
    Ok(())
}

fn validate_side(side: &corpus::Side, name: &str) -> Result<()> {
    if side.starts.first() != Some(&0) {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} sentence prefix sums do not start at 0",
            name
        )));
    }
    if side.starts.last().copied() != Some(side.ids.len() as u32) {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} sentence prefix sums do not cover the corpus",
            name
        )));
    }
    if side.starts.windows(2).any(|w| w[0] > w[1]) {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} sentence prefix sums are not monotone",
            name
        )));
    }
    Ok(())
}

fn validate_alignment(corpus: &ParallelCorpus, forward: bool) -> Result<()> {
    let (this, other, csr, name) = if forward {
        (&corpus.src, &corpus.tgt, &corpus.f2e, "f2e")
    } else {
        (&corpus.tgt, &corpus.src, &corpus.e2f, "e2f")
    };
    if csr.offsets.len() != this.num_tokens() + 1 {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} offsets do not cover every token",
            name
        )));
    }
    if csr.offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} offsets are not monotone",
            name
        )));
    }
    if csr.offsets.last().copied() != Some(csr.links.len() as u32) {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} offsets do not cover every link",
            name
        )));
    }
    for s in 0..this.num_sentences() {
        let base = this.sentence_base(s);
        let other_len = other.sentence(s).len() as u32;
        for p in 0..this.sentence(s).len() {
            let row = csr.row(base + p);
            if row.iter().any(|&l| l >= other_len) {
                return Err(TaiyakuError::corrupt_index(format!(
                    "{} link out of range in sentence {}",
                    name, s
                )));
            }
            if row.windows(2).any(|w| w[0] >= w[1]) {
                return Err(TaiyakuError::corrupt_index(format!(
                    "{} row not strictly ascending in sentence {}",
                    name, s
                )));
            }
        }
    }
    Ok(())
}

fn validate_suffix_array(sa: &SuffixArray, side: &corpus::Side, name: &str) -> Result<()> {
    if sa.len() != side.num_tokens() {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} suffix array does not cover every token",
            name
        )));
    }
    for e in &sa.entries {
        if e.sentence as usize >= side.num_sentences()
            || e.position as usize >= side.sentence(e.sentence as usize).len()
        {
            return Err(TaiyakuError::corrupt_index(format!(
                "{} suffix entry out of range",
                name
            )));
        }
    }
    let sorted = sa.entries.windows(2).all(|w| {
        let a = &side.sentence(w[0].sentence as usize)[w[0].position as usize..];
        let b = &side.sentence(w[1].sentence as usize)[w[1].position as usize..];
        a <= b
    });
    if !sorted {
        return Err(TaiyakuError::corrupt_index(format!(
            "{} suffix array is not sorted",
            name
        )));
    }
    Ok(())
}
