//! インデックスのビルダー
//!
//! このモジュールは、トークン化済みの対訳コーパスとPharaoh形式の
//! アラインメント(`i-j`のペアを空白区切りで並べたもの)から
//! バイナリインデックスを構築する機能を提供します。

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::errors::{Result, TaiyakuError};
use crate::index::corpus::{AlignmentCsr, ParallelCorpus, Side};
use crate::index::suffix_array::SuffixArray;
use crate::index::vocabulary::Vocabulary;
use crate::index::{Index, IndexInner};

/// 対訳コーパスからインデックスを構築するビルダー
///
/// # 入力フォーマット
///
/// 3つの入力はすべて行単位で対応している必要があります:
///
/// - 原言語側テキスト: 1行1文、空白区切りのトークン列
/// - 目的言語側テキスト: 同上
/// - アラインメント: 1行1文、`i-j`形式のペアの空白区切り列。
///   `i`は原言語のトークン位置、`j`は目的言語のトークン位置(0始まり)
///
/// # 例
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use taiyaku::IndexBuilder;
///
/// let index = IndexBuilder::from_readers(
///     "a b c\n".as_bytes(),
///     "A B C\n".as_bytes(),
///     "0-0 1-1 2-2\n".as_bytes(),
/// )?;
/// assert_eq!(index.corpus().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct IndexBuilder {}

impl IndexBuilder {
    /// ファイルパスからインデックスを構築します
    ///
    /// # 引数
    ///
    /// * `source_path` - 原言語側テキストのパス
    /// * `target_path` - 目的言語側テキストのパス
    /// * `align_path` - アラインメントファイルのパス
    ///
    /// # エラー
    ///
    /// ファイルが開けない場合、または入力フォーマットが不正な場合に
    /// エラーを返します。
    pub fn from_paths<P1, P2, P3>(source_path: P1, target_path: P2, align_path: P3) -> Result<Index>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
        P3: AsRef<Path>,
    {
        Self::from_readers(
            BufReader::new(File::open(source_path)?),
            BufReader::new(File::open(target_path)?),
            BufReader::new(File::open(align_path)?),
        )
    }

    /// リーダーからインデックスを構築します
    ///
    /// # 引数
    ///
    /// * `source_rdr` - 原言語側テキストのリーダー
    /// * `target_rdr` - 目的言語側テキストのリーダー
    /// * `align_rdr` - アラインメントのリーダー
    ///
    /// # エラー
    ///
    /// 3つの入力の行数が一致しない場合、アラインメントのペアが
    /// パースできない場合、またはアラインメントの添字が文長を超える場合に
    /// エラーを返します。
    pub fn from_readers<R1, R2, R3>(
        mut source_rdr: R1,
        mut target_rdr: R2,
        mut align_rdr: R3,
    ) -> Result<Index>
    where
        R1: Read,
        R2: Read,
        R3: Read,
    {
        let mut source_buf = String::new();
        source_rdr.read_to_string(&mut source_buf)?;
        let mut target_buf = String::new();
        target_rdr.read_to_string(&mut target_buf)?;
        let mut align_buf = String::new();
        align_rdr.read_to_string(&mut align_buf)?;

        let source_lines: Vec<&str> = source_buf.lines().collect();
        let target_lines: Vec<&str> = target_buf.lines().collect();
        let align_lines: Vec<&str> = align_buf.lines().collect();

        if source_lines.len() != target_lines.len() || source_lines.len() != align_lines.len() {
            return Err(TaiyakuError::invalid_format(
                "corpus",
                format!(
                    "Line counts mismatch: {} source, {} target, {} alignment",
                    source_lines.len(),
                    target_lines.len(),
                    align_lines.len()
                ),
            ));
        }

        let vocabulary = Vocabulary::new();
        let mut src = Side {
            ids: Vec::new(),
            starts: vec![0],
        };
        let mut tgt = Side {
            ids: Vec::new(),
            starts: vec![0],
        };
        // Per-token alignment rows, sentence-local indices; flattened into
        // CSR once the corpus size is known.
        let mut f2e_rows: Vec<Vec<u32>> = Vec::new();
        let mut e2f_rows: Vec<Vec<u32>> = Vec::new();

        for (line_no, ((src_line, tgt_line), align_line)) in source_lines
            .iter()
            .zip(&target_lines)
            .zip(&align_lines)
            .enumerate()
        {
            let src_len = push_tokens(&vocabulary, src_line, &mut src.ids);
            let tgt_len = push_tokens(&vocabulary, tgt_line, &mut tgt.ids);
            src.starts.push(src.ids.len() as u32);
            tgt.starts.push(tgt.ids.len() as u32);

            let row_base_f = f2e_rows.len();
            let row_base_e = e2f_rows.len();
            f2e_rows.resize_with(row_base_f + src_len, Vec::new);
            e2f_rows.resize_with(row_base_e + tgt_len, Vec::new);

            for pair in align_line.split_whitespace() {
                let (i, j) = parse_align_pair(pair, line_no)?;
                if i >= src_len || j >= tgt_len {
                    return Err(TaiyakuError::invalid_format(
                        "alignment",
                        format!(
                            "Link {}-{} out of range at line {} ({} source, {} target tokens)",
                            i,
                            j,
                            line_no + 1,
                            src_len,
                            tgt_len
                        ),
                    ));
                }
                f2e_rows[row_base_f + i].push(j as u32);
                e2f_rows[row_base_e + j].push(i as u32);
            }
        }

        for row in f2e_rows.iter_mut().chain(e2f_rows.iter_mut()) {
            row.sort_unstable();
            row.dedup();
        }

        let aligned_tgt = aligned_bits(&e2f_rows);
        let corpus = ParallelCorpus {
            f2e: flatten_csr(f2e_rows),
            e2f: flatten_csr(e2f_rows),
            aligned_tgt,
            src,
            tgt,
        };

        let src_sa = SuffixArray::build(&corpus.src);
        let tgt_sa = SuffixArray::build(&corpus.tgt);

        Index::from_inner(
            IndexInner {
                words: vocabulary.words_snapshot(),
                corpus,
                src_sa,
                tgt_sa,
            },
            false,
        )
    }
}

fn push_tokens(vocabulary: &Vocabulary, line: &str, ids: &mut Vec<u32>) -> usize {
    let before = ids.len();
    for token in line.split_whitespace() {
        ids.push(vocabulary.add(token));
    }
    ids.len() - before
}

fn parse_align_pair(pair: &str, line_no: usize) -> Result<(usize, usize)> {
    let Some((i, j)) = pair.split_once('-') else {
        return Err(TaiyakuError::invalid_format(
            "alignment",
            format!("Expected i-j pair at line {}, got {:?}", line_no + 1, pair),
        ));
    };
    Ok((i.parse()?, j.parse()?))
}

fn flatten_csr(rows: Vec<Vec<u32>>) -> AlignmentCsr {
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    offsets.push(0);
    let mut links = Vec::new();
    for row in rows {
        links.extend_from_slice(&row);
        offsets.push(links.len() as u32);
    }
    AlignmentCsr { offsets, links }
}

fn aligned_bits(e2f_rows: &[Vec<u32>]) -> Vec<u64> {
    let mut bits = vec![0u64; e2f_rows.len().div_ceil(64)];
    for (j, row) in e2f_rows.iter().enumerate() {
        if !row.is_empty() {
            bits[j / 64] |= 1 << (j % 64);
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_insertion_order() {
        let index = IndexBuilder::from_readers(
            "b a\n".as_bytes(),
            "B A\n".as_bytes(),
            "0-0 1-1\n".as_bytes(),
        )
        .unwrap();
        // Ids are assigned in encounter order across both sides.
        assert_eq!(index.vocabulary().lookup("b"), Some(0));
        assert_eq!(index.vocabulary().lookup("a"), Some(1));
        assert_eq!(index.vocabulary().lookup("B"), Some(2));
        assert_eq!(index.vocabulary().lookup("A"), Some(3));
    }

    #[test]
    fn test_line_count_mismatch() {
        let result = IndexBuilder::from_readers(
            "a\nb\n".as_bytes(),
            "A\n".as_bytes(),
            "0-0\n".as_bytes(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_alignment_pair() {
        let result =
            IndexBuilder::from_readers("a\n".as_bytes(), "A\n".as_bytes(), "0:0\n".as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_alignment_out_of_range() {
        let result =
            IndexBuilder::from_readers("a\n".as_bytes(), "A\n".as_bytes(), "0-1\n".as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_links_are_deduplicated() {
        let index = IndexBuilder::from_readers(
            "a\n".as_bytes(),
            "A\n".as_bytes(),
            "0-0 0-0\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(index.corpus().sentence(0).f2e(0), &[0]);
    }

    #[test]
    fn test_empty_sentences_allowed() {
        let index =
            IndexBuilder::from_readers("a\n\n".as_bytes(), "A\n\n".as_bytes(), "0-0\n\n".as_bytes())
                .unwrap();
        assert_eq!(index.corpus().len(), 2);
        assert!(index.corpus().sentence(1).source().is_empty());
    }
}
