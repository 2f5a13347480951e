//! 翻訳ルールを抽出するユーティリティ
//!
//! このバイナリは、インデックスを読み込んでキャッシュを初期化し、
//! 入力ファイル(または標準入力)から読み込んだ原言語文ごとに
//! スコアリング済みルールを抽出して、件数と所要時間を報告します。

use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use taiyaku::{FeatureTemplate, TranslationModel};

use clap::Parser;

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(name = "extract", about = "Extracts scored translation rules.", version)]
struct Args {
    /// Index file (a .zst extension is decompressed transparently).
    #[clap(short = 'i', long)]
    index: PathBuf,

    /// Tokenized source sentences, one per line. Reads stdin if omitted.
    #[clap(short = 'f', long)]
    input: Option<PathBuf>,

    /// Feature template. Choices are dense and dense-ext.
    #[clap(short = 'F', long, default_value = "dense")]
    feature_template: FeatureTemplate,

    /// Maximum number of sampled occurrences per source span.
    #[clap(short = 'k', long, default_value = "100")]
    sample_size: usize,

    /// Maximum source phrase length.
    #[clap(long, default_value = "7")]
    max_source_phrase: usize,

    /// Maximum target phrase length.
    #[clap(long, default_value = "7")]
    max_target_phrase: usize,

    /// Global sampling seed.
    #[clap(long, default_value = "0")]
    seed: u64,

    /// Publishes the index vocabulary as the process-wide system vocabulary.
    #[clap(short = 'S', long)]
    system_vocabulary: bool,

    /// Prints every extracted rule instead of per-segment counts only.
    #[clap(short = 'v', long)]
    verbose: bool,
}

/// メイン関数
///
/// インデックスの読み込み時間、キャッシュ構築時間、1文あたりの
/// クエリ時間を標準エラーに報告します。
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    eprintln!("Loading the index...");
    let start = Instant::now();
    let mut tm = TranslationModel::load(&args.index)?;
    tm.set_feature_template(args.feature_template)?;
    tm.set_max_source_phrase(args.max_source_phrase)?;
    tm.set_max_target_phrase(args.max_target_phrase)?;
    tm.set_seed(args.seed);
    eprintln!("Loading time: {:.3}s", start.elapsed().as_secs_f64());

    let start = Instant::now();
    tm.init(args.system_vocabulary, args.sample_size)?;
    eprintln!("Cache time: {:.3}s", start.elapsed().as_secs_f64());

    let lines: Vec<String> = match &args.input {
        Some(path) => BufReader::new(File::open(path)?)
            .lines()
            .collect::<io::Result<_>>()?,
        None => io::stdin().lock().lines().collect::<io::Result<_>>()?,
    };
    eprintln!("#source segments: {}", lines.len());

    let out = io::stdout();
    let mut out = BufWriter::new(out.lock());
    let vocabulary = tm.index().vocabulary().clone();
    let phrase = |ids: &[u32]| -> String {
        ids.iter()
            .map(|&id| vocabulary.get(id).map_or_else(|| "<unk>".into(), |w| w.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let start = Instant::now();
    for (input_id, line) in lines.iter().enumerate() {
        let source: Vec<&str> = line.split_whitespace().collect();
        let rules = tm.get_rules(&source, input_id, None)?;
        if args.verbose {
            for rule in &rules {
                writeln!(
                    out,
                    "{}\t[{}, {})\t{} ||| {}\t{:?}",
                    input_id,
                    rule.src_start,
                    rule.src_end,
                    phrase(&rule.rule.src),
                    phrase(&rule.rule.tgt),
                    rule.rule.scores,
                )?;
            }
        } else {
            writeln!(out, "{}\t{} rules", input_id, rules.len())?;
        }
    }
    out.flush()?;

    let elapsed = start.elapsed().as_secs_f64();
    eprintln!("Sample time:\t{:.3}s", elapsed);
    if !lines.is_empty() {
        eprintln!("Time/segment:\t{:.3}s", elapsed / lines.len() as f64);
    }

    Ok(())
}
