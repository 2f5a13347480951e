//! 対訳インデックスのコンパイラ
//!
//! このバイナリは、トークン化済みの対訳コーパスとPharaoh形式の
//! アラインメントからバイナリインデックスを構築し、ファイルに出力します。
//! 出力パスの拡張子が`.zst`の場合はzstdで圧縮されます。

use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;

use taiyaku::IndexBuilder;

use clap::Parser;

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(
    name = "compile",
    about = "A program to build the parallel suffix-array index.",
    version
)]
struct Args {
    /// Tokenized source-side text, one sentence per line.
    #[clap(short = 's', long)]
    source_in: PathBuf,

    /// Tokenized target-side text, one sentence per line.
    #[clap(short = 't', long)]
    target_in: PathBuf,

    /// Pharaoh-format word alignments (i-j pairs), one line per sentence.
    #[clap(short = 'a', long)]
    align_in: PathBuf,

    /// File to which the binary index is output.
    /// A .zst extension enables zstd compression.
    #[clap(short = 'o', long)]
    index_out: PathBuf,
}

/// メイン関数
///
/// コーパスを読み込んでインデックスを構築し、指定されたパスに
/// 書き出します。
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    eprintln!("Building the index...");
    let start = Instant::now();
    let index = IndexBuilder::from_paths(&args.source_in, &args.target_in, &args.align_in)?;
    eprintln!(
        "{} sentence pairs, {} source tokens, {} target tokens, {} vocabulary entries",
        index.corpus().len(),
        index.corpus().source().num_tokens(),
        index.corpus().target().num_tokens(),
        index.vocabulary().len(),
    );
    eprintln!("Build time: {:.3}s", start.elapsed().as_secs_f64());

    let start = Instant::now();
    let file = File::create(&args.index_out)?;
    if args.index_out.extension().is_some_and(|e| e == "zst") {
        let mut encoder = zstd::stream::write::Encoder::new(file, 19)?;
        index.write(&mut encoder)?;
        encoder.finish()?;
    } else {
        index.write(BufWriter::new(file))?;
    }
    eprintln!("Write time: {:.3}s", start.elapsed().as_secs_f64());

    Ok(())
}
