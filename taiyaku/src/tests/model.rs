//! 翻訳モデルのファサードに関するシナリオテスト
//!
//! ミス伝播、ユニグラムキャッシュ、並行クエリ、決定性を検証します。

use std::sync::Arc;

use crate::errors::TaiyakuError;
use crate::index::vocabulary;
use crate::{FeatureTemplate, IndexBuilder, QueryStats, TranslationModel};

#[track_caller]
fn build_model(src: &str, tgt: &str, align: &str) -> TranslationModel {
    let index =
        IndexBuilder::from_readers(src.as_bytes(), tgt.as_bytes(), align.as_bytes()).unwrap();
    let mut tm = TranslationModel::new(index);
    tm.set_serial(true);
    tm.init(false, 100).unwrap();
    tm
}

#[test]
fn test_configuration_errors() {
    let index = IndexBuilder::from_readers(
        "a\n".as_bytes(),
        "A\n".as_bytes(),
        "0-0\n".as_bytes(),
    )
    .unwrap();
    let mut tm = TranslationModel::new(index);

    assert!(tm.set_sample_size(0).is_err());
    assert!(tm.set_max_source_phrase(0).is_err());
    assert!(tm.set_max_target_phrase(0).is_err());
    assert!(matches!(
        tm.init(false, 0),
        Err(TaiyakuError::InvalidArgument(_))
    ));

    // Queries before init() are a state error.
    assert!(matches!(
        tm.get_rules(&["a"], 0, None),
        Err(TaiyakuError::InvalidState(_))
    ));

    tm.init(false, 100).unwrap();
    // Double init and post-init reconfiguration are state errors.
    assert!(matches!(
        tm.init(false, 100),
        Err(TaiyakuError::InvalidState(_))
    ));
    assert!(tm.set_feature_template(FeatureTemplate::DenseExt).is_err());
    assert!(tm.set_max_source_phrase(5).is_err());
}

#[test]
fn test_empty_source_yields_no_rules() {
    let tm = build_model("a\n", "A\n", "0-0\n");
    let rules = tm.get_rules::<&str>(&[], 0, None).unwrap();
    assert!(rules.is_empty());
}

#[test]
fn test_oov_query_degrades_silently() {
    let tm = build_model("a\n", "A\n", "0-0\n");
    let rules = tm.get_rules(&["never-seen"], 0, None).unwrap();
    assert!(rules.is_empty());
}

#[test]
fn test_miss_propagation_skips_superspans() {
    // Position 2 of the query is out of vocabulary. No rule may cover
    // it, and every longer span containing it must be skipped rather
    // than sampled.
    let tm = build_model("a b c d\n", "A B C D\n", "0-0 1-1 2-2 3-3\n");
    let stats = QueryStats::new();
    let rules = tm
        .get_rules_with_stats(&["a", "b", "zzz", "c", "d"], 7, None, &stats)
        .unwrap();

    for rule in &rules {
        assert!(
            !rule.source_coverage().contains(&2),
            "rule covers the OOV position: {:?}",
            rule.source_coverage()
        );
        assert_eq!(rule.input_id, 7);
    }

    // Length 1: all 5 spans sampled (the OOV span records the miss).
    // Length 2: spans [1,3) and [2,4) skipped; [0,2) and [3,5) sampled.
    // Lengths 3..=5: every span contains position 2 and is skipped.
    assert_eq!(stats.spans_sampled(), 7);
    assert_eq!(stats.spans_skipped(), 2 + 3 + 2 + 1);
    assert_eq!(stats.cache_hits(), 0);
}

#[test]
fn test_final_span_is_included() {
    // The driver loop must include the last start position of each
    // span length: querying [a b] over a two-word input produces a
    // rule covering the full span and one covering the final unigram.
    let tm = build_model("a b\n", "A B\n", "0-0 1-1\n");
    let rules = tm.get_rules(&["a", "b"], 0, None).unwrap();
    assert!(rules.iter().any(|r| r.source_coverage() == (0..2)));
    assert!(rules.iter().any(|r| r.source_coverage() == (1..2)));
}

#[test]
fn test_unigram_rule_cache_is_used() {
    // One long sentence pair with 1001 occurrences of x: above the
    // cache threshold, so the unigram is served from the cache.
    let n = 1001;
    let src = vec!["x"; n].join(" ") + "\n";
    let tgt = vec!["X"; n].join(" ") + "\n";
    let align = (0..n)
        .map(|i| format!("{}-{}", i, i))
        .collect::<Vec<_>>()
        .join(" ")
        + "\n";
    let tm = build_model(&src, &tgt, &align);

    let stats = QueryStats::new();
    let rules = tm
        .get_rules_with_stats(&["x"], 0, None, &stats)
        .unwrap();
    assert_eq!(stats.cache_hits(), 1);
    assert_eq!(stats.spans_sampled(), 0);
    assert_eq!(rules.len(), 1);
    // The cached rule was scored from all occurrences at sample rate 1.
    assert_eq!(rules[0].rule.scores.as_ref(), &[0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_determinism_at_fixed_seed() {
    // More hits than the sample size, so sampling actually kicks in.
    let mut src = String::new();
    let mut tgt = String::new();
    let mut align = String::new();
    for i in 0..50 {
        src.push_str("a b\n");
        tgt.push_str(if i % 3 == 0 { "A C\n" } else { "A B\n" });
        align.push_str("0-0 1-1\n");
    }
    let index =
        IndexBuilder::from_readers(src.as_bytes(), tgt.as_bytes(), align.as_bytes()).unwrap();
    let mut tm = TranslationModel::new(index);
    tm.set_serial(true);
    tm.set_seed(42);
    tm.init(false, 10).unwrap();

    let collect = |tm: &TranslationModel| {
        let mut rules: Vec<_> = tm
            .get_rules(&["a", "b"], 0, None)
            .unwrap()
            .into_iter()
            .map(|r| {
                (
                    r.src_start,
                    r.src_end,
                    r.rule.src.to_vec(),
                    r.rule.tgt.to_vec(),
                    r.rule.scores.to_vec(),
                )
            })
            .collect();
        rules.sort_by(|a, b| a.partial_cmp(b).unwrap());
        rules
    };

    assert_eq!(collect(&tm), collect(&tm));
}

#[test]
fn test_parallel_and_serial_agree() {
    let mut src = String::new();
    let mut tgt = String::new();
    let mut align = String::new();
    for i in 0..30 {
        src.push_str("a b c\n");
        tgt.push_str(if i % 2 == 0 { "A B C\n" } else { "A B D\n" });
        align.push_str("0-0 1-1 2-2\n");
    }
    let build = |serial: bool| {
        let index =
            IndexBuilder::from_readers(src.as_bytes(), tgt.as_bytes(), align.as_bytes()).unwrap();
        let mut tm = TranslationModel::new(index);
        tm.set_serial(serial);
        tm.set_seed(7);
        tm.init(false, 10).unwrap();
        let mut rules: Vec<_> = tm
            .get_rules(&["a", "b", "c"], 0, None)
            .unwrap()
            .into_iter()
            .map(|r| {
                (
                    r.src_start,
                    r.src_end,
                    r.rule.src.to_vec(),
                    r.rule.tgt.to_vec(),
                    r.rule.scores.to_vec(),
                )
            })
            .collect();
        rules.sort_by(|a, b| a.partial_cmp(b).unwrap());
        rules
    };
    assert_eq!(build(true), build(false));
}

#[test]
fn test_concurrent_queries_grow_vocabulary_consistently() {
    let index = IndexBuilder::from_readers(
        "a b\n".as_bytes(),
        "A B\n".as_bytes(),
        "0-0 1-1\n".as_bytes(),
    )
    .unwrap();
    let mut tm = TranslationModel::new(index);
    tm.init(false, 100).unwrap();
    let tm = Arc::new(tm);
    let initial = tm.index().vocabulary().len();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let tm = Arc::clone(&tm);
            std::thread::spawn(move || {
                let own = format!("fresh-{}", t);
                for _ in 0..20 {
                    let query = ["a", "fresh-x", "fresh-y", own.as_str()];
                    let rules = tm.get_rules(&query, 0, None).unwrap();
                    // The known unigram still resolves on every thread.
                    assert!(rules.iter().any(|r| r.source_coverage() == (0..1)));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // fresh-x, fresh-y, and fresh-0..=3: 6 distinct new words.
    assert_eq!(tm.index().vocabulary().len(), initial + 6);
}

#[test]
fn test_system_vocabulary_round_trip() {
    let index = IndexBuilder::from_readers(
        "a b\n".as_bytes(),
        "A B\n".as_bytes(),
        "0-0 1-1\n".as_bytes(),
    )
    .unwrap();
    let mut tm = TranslationModel::new(index);
    tm.set_serial(true);
    tm.init(true, 100).unwrap();

    let system = vocabulary::system().expect("system vocabulary must be published");
    assert_eq!(system.lookup("a"), tm.index().vocabulary().lookup("a"));

    let rules = tm.get_rules(&["a", "b"], 0, None).unwrap();
    assert!(rules.iter().any(|r| r.source_coverage() == (0..2)));
}
