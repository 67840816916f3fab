use anyhow::Result;
use clap::Parser;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力CityGMLファイル、ZIPファイル、またはディレクトリ
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// 出力ディレクトリ
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,

    /// 1文書から抽出する建物数の上限
    #[arg(long, default_value_t = 2000)]
    max_buildings: usize,

    /// 入力座標のCRS識別子（EPSGコードなど）
    #[arg(long, default_value = "EPSG:4326")]
    source_crs: String,

    /// 建物要素が無いときの boundedBy 代替スキャンを無効にする
    #[arg(long)]
    no_fallback_scan: bool,

    /// ZIP内の複数ファイルを1つのGeoJSONに結合して出力
    #[arg(long)]
    merge: bool,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .expect("Failed to build thread pool");
    }

    // 出力ディレクトリの作成
    fs::create_dir_all(&args.output)?;

    // 入力パスの処理
    if args.input.is_file() {
        let ext = args
            .input
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");

        match ext {
            "zip" => {
                // ZIPファイルの処理
                info!("Processing ZIP file: {:?}", args.input);
                process_zip_file(&args.input, &args)?;
            }
            "gml" | "xml" => {
                // CityGMLファイルの処理
                info!("Processing CityGML file: {:?}", args.input);
                process_file(&args.input, &args)?;
            }
            _ => {
                error!("Unsupported file type: {:?}", args.input);
                anyhow::bail!("Input file must be .gml, .xml or .zip");
            }
        }
    } else if args.input.is_dir() {
        // ディレクトリの処理
        info!("Processing directory: {:?}", args.input);
        process_directory(&args.input, &args)?;
    } else {
        error!("Invalid input path: {:?}", args.input);
        anyhow::bail!("Input path must be a file or directory");
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}

fn build_options(args: &Args) -> plateau_buildings::ParseOptions {
    use plateau_buildings::{FallbackScan, ParseOptions};

    ParseOptions {
        max_buildings: args.max_buildings,
        source_crs: args.source_crs.clone(),
        fallback_scan: if args.no_fallback_scan {
            FallbackScan::Off
        } else {
            FallbackScan::BoundedBy
        },
    }
}

fn process_file(path: &Path, args: &Args) -> Result<()> {
    info!("Processing file: {:?}", path);

    use plateau_buildings::parser::parse_citygml_file;
    use plateau_buildings::GeoJsonWriter;

    // CityGMLファイルを解析
    let collection = parse_citygml_file(path, &build_options(args))?;

    info!(
        "Parsed successfully: {} buildings ({} candidates)",
        collection.len(),
        collection.candidates_seen
    );
    if collection.crs_fallback {
        warn!(
            "CRS reprojection from {} failed, coordinates written unchanged",
            collection.source_crs
        );
    }

    // 入力ファイル名に合わせてGeoJSONを出力
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("buildings");
    let output_path = args.output.join(format!("{}.geojson", stem));

    let writer = GeoJsonWriter::new();
    writer.write(&collection, &output_path)?;
    info!("Written GeoJSON: {:?}", output_path);

    Ok(())
}

fn process_directory(dir: &Path, args: &Args) -> Result<()> {
    use rayon::prelude::*;

    // GML/XML/ZIPファイルを再帰的に収集
    let input_files = collect_input_files(dir)?;
    info!("Found {} input files (GML/XML/ZIP)", input_files.len());

    // 並列処理でファイルを変換
    let results: Vec<Result<()>> = input_files
        .par_iter()
        .map(|(path, file_type)| match file_type {
            FileType::CityGml => process_file(path, args),
            FileType::Zip => process_zip_file(path, args),
        })
        .collect();

    // エラーをチェック
    let mut errors = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            errors.push(format!("{}: {}", input_files[i].0.display(), e));
        }
    }

    if !errors.is_empty() {
        error!("Failed to process {} files:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        anyhow::bail!("{} files failed to process", errors.len());
    }

    Ok(())
}

fn collect_input_files(dir: &Path) -> Result<Vec<(std::path::PathBuf, FileType)>> {
    use rayon::prelude::*;
    use std::sync::{Arc, Mutex};

    let files = Arc::new(Mutex::new(Vec::new()));

    // ディレクトリエントリを並列で収集
    let entries: Result<Vec<_>, _> = fs::read_dir(dir)?.collect();
    let entries = entries?;

    // エントリを並列処理
    entries
        .into_par_iter()
        .try_for_each(|entry| -> Result<()> {
            let path = entry.path();

            if path.is_dir() {
                // サブディレクトリを再帰的に探索
                let sub_files = collect_input_files(&path)?;
                if !sub_files.is_empty() {
                    let mut files_guard = files.lock().unwrap();
                    files_guard.extend(sub_files);
                }
            } else {
                match path.extension().and_then(|s| s.to_str()) {
                    Some("gml") | Some("xml") => {
                        let mut files_guard = files.lock().unwrap();
                        files_guard.push((path, FileType::CityGml));
                    }
                    Some("zip") => {
                        let mut files_guard = files.lock().unwrap();
                        files_guard.push((path, FileType::Zip));
                    }
                    _ => {}
                }
            }
            Ok(())
        })?;

    let files = Arc::try_unwrap(files).unwrap().into_inner().unwrap();
    Ok(files)
}

#[derive(Debug, Clone, Copy)]
enum FileType {
    CityGml,
    Zip,
}

fn process_zip_file(path: &Path, args: &Args) -> Result<()> {
    use plateau_buildings::{FeatureCollection, GeoJsonWriter, ZipHandler};

    let handler = ZipHandler::new(path);
    let results = handler.process_all(&build_options(args))?;

    if args.merge && results.len() > 1 {
        // 全エントリを1つのコレクションに結合して出力
        info!("Merging {} collections", results.len());
        let merged = FeatureCollection::merge(results.into_iter().map(|(_, c)| c).collect());

        if merged.crs_fallback {
            warn!("CRS reprojection failed for some entries, coordinates written unchanged");
        }

        // 出力ファイル名を生成（ZIPファイル名から.zipを除いたもの）
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("merged");
        let output_path = args.output.join(format!("{}.geojson", stem));

        let writer = GeoJsonWriter::new();
        writer.write(&merged, &output_path)?;
        info!("Written merged GeoJSON: {:?}", output_path);
    } else {
        // エントリごとに個別のGeoJSONを出力
        info!("Writing {} collections individually", results.len());

        let writer = GeoJsonWriter::new();
        for (name, collection) in results {
            // コードリストなど建物を含まないXMLはここで落ちる
            if collection.is_empty() {
                info!("Skipping empty result: {}", name);
                continue;
            }
            if collection.crs_fallback {
                warn!(
                    "CRS reprojection failed for {}, coordinates written unchanged",
                    name
                );
            }

            let stem = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("buildings");
            let output_path = args.output.join(format!("{}.geojson", stem));

            writer.write(&collection, &output_path)?;
            info!("Written GeoJSON: {:?}", output_path);
        }
    }

    Ok(())
}
