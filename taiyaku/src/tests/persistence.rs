//! インデックスの永続化に関するテスト
//!
//! マジックナンバーの検査、rkyvペイロードの往復、zstd展開、
//! 再構築の決定性を検証します。

use std::fs::File;
use std::io::Write;

use tempfile::tempdir;

use crate::errors::TaiyakuError;
use crate::{Index, IndexBuilder, LoadMode, TranslationModel};

const SRC: &str = "a b c\na b\nc a b\nc c\n";
const TGT: &str = "A B C\nA B\nC A B\nC C\n";
const ALIGN: &str = "0-0 1-1 2-2\n0-0 1-1\n0-0 1-1 2-2\n0-0 1-1\n";

#[track_caller]
fn build_index() -> Index {
    IndexBuilder::from_readers(SRC.as_bytes(), TGT.as_bytes(), ALIGN.as_bytes()).unwrap()
}

fn serialize(index: &Index) -> Vec<u8> {
    let mut buf = Vec::new();
    index.write(&mut buf).unwrap();
    buf
}

#[test]
fn test_round_trip_through_reader() {
    let index = build_index();
    let buf = serialize(&index);
    let loaded = Index::read(buf.as_slice(), LoadMode::Validate).unwrap();

    assert_eq!(loaded.corpus().len(), index.corpus().len());
    assert_eq!(loaded.vocabulary().len(), index.vocabulary().len());
    assert_eq!(loaded.vocabulary().lookup("a"), index.vocabulary().lookup("a"));

    let pattern = [loaded.vocabulary().lookup("a").unwrap()];
    assert_eq!(
        loaded.query(&pattern, true).unwrap(),
        index.query(&pattern, true).unwrap()
    );
}

#[test]
fn test_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corpus.bin");
    let index = build_index();
    index.write(File::create(&path).unwrap()).unwrap();

    let mut tm = TranslationModel::load(&path).unwrap();
    tm.set_serial(true);
    tm.init(false, 100).unwrap();
    let rules = tm.get_rules(&["a", "b"], 0, None).unwrap();
    assert!(!rules.is_empty());
}

#[test]
fn test_round_trip_through_zstd_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corpus.bin.zst");
    let index = build_index();
    let buf = serialize(&index);
    let compressed = zstd::stream::encode_all(buf.as_slice(), 0).unwrap();
    File::create(&path)
        .unwrap()
        .write_all(&compressed)
        .unwrap();

    let loaded = Index::from_path(&path, LoadMode::Validate).unwrap();
    assert_eq!(loaded.corpus().len(), 4);
}

#[test]
fn test_rebuild_is_byte_identical() {
    // Building the index twice over the same corpus must produce
    // byte-identical persisted output.
    let first = serialize(&build_index());
    let second = serialize(&build_index());
    assert_eq!(first, second);
}

#[test]
fn test_magic_mismatch_is_rejected() {
    let index = build_index();
    let mut buf = serialize(&index);
    buf[0] ^= 0xFF;
    let result = Index::read(buf.as_slice(), LoadMode::Validate);
    assert!(matches!(result, Err(TaiyakuError::InvalidArgument(_))));
}

#[test]
fn test_truncated_payload_is_rejected() {
    let index = build_index();
    let buf = serialize(&index);
    let result = Index::read(&buf[..buf.len() / 2], LoadMode::Validate);
    assert!(result.is_err());
}

#[test]
fn test_corrupted_payload_is_rejected() {
    let index = build_index();
    let mut buf = serialize(&index);
    // Flip a byte inside the rkyv payload.
    let target = buf.len() - 8;
    buf[target] ^= 0xFF;
    let result = Index::read(buf.as_slice(), LoadMode::Validate);
    assert!(result.is_err());
}

#[test]
fn test_structural_validation_catches_unsorted_suffix_array() {
    let mut inner = build_index().into_inner();
    let last = inner.src_sa.entries.len() - 1;
    inner.src_sa.entries.swap(0, last);
    let tampered = Index::from_inner(inner, false).unwrap();
    let buf = serialize(&tampered);
    let result = Index::read(buf.as_slice(), LoadMode::Validate);
    assert!(matches!(result, Err(TaiyakuError::CorruptIndex(_))));
}

#[test]
fn test_structural_validation_catches_bad_alignment_link() {
    let mut inner = build_index().into_inner();
    inner.corpus.f2e.links[0] = 99;
    let tampered = Index::from_inner(inner, false).unwrap();
    let buf = serialize(&tampered);
    let result = Index::read(buf.as_slice(), LoadMode::Validate);
    assert!(matches!(result, Err(TaiyakuError::CorruptIndex(_))));
}

#[test]
fn test_trust_mode_skips_structural_validation() {
    let mut inner = build_index().into_inner();
    inner.corpus.f2e.links[0] = 99;
    let tampered = Index::from_inner(inner, false).unwrap();
    let buf = serialize(&tampered);
    assert!(Index::read(buf.as_slice(), LoadMode::Trust).is_ok());
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let result = Index::from_path(dir.path().join("nothing.bin"), LoadMode::Validate);
    assert!(matches!(result, Err(TaiyakuError::InvalidArgument(_))));
}
