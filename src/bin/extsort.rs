//! Sorts a CSV file on disk.
//!
//! ```bash
//! extsort --columns "id:int,name:text,score:float" --order-by "score desc, id" \
//!     --input people.csv --output sorted.csv --buffer-pages 16 --stats
//! ```

use std::{error::Error, io, path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use log::{error, info};

use extsort::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "extsort", version, about = "External merge sort of CSV files")]
struct Args {
    /// Input CSV file
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Output CSV file (stdout when omitted)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Column list, `name:type` separated by commas (types: int, text, float)
    #[arg(short, long)]
    columns: String,

    /// ORDER BY list, e.g. "b desc, a + 1"; empty sorts on all columns
    #[arg(long, default_value = "")]
    order_by: String,

    /// The input has no header row
    #[arg(long)]
    no_header: bool,

    /// JSON configuration file; otherwise SORT_* environment variables apply
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    page_size: Option<usize>,

    #[arg(long)]
    buffer_pages: Option<usize>,

    /// Directory prefix of run files
    #[arg(long)]
    temp_prefix: Option<String>,

    /// Merge the groups of a pass in parallel
    #[arg(long)]
    parallel: bool,

    /// Emit each distinct row once
    #[arg(long)]
    distinct: bool,

    /// Check the output order before writing it
    #[arg(long)]
    verify: bool,

    /// Print sort statistics as JSON on stderr
    #[arg(long)]
    stats: bool,
}

fn parse_columns(list: &str) -> Result<Schema, ExecError> {
    let columns = list
        .split(',')
        .map(|col| {
            let (name, ty) = col
                .split_once(':')
                .ok_or_else(|| ExecError::Parse(format!("column {:?} has no type", col)))?;
            let ty = DataType::from_name(ty.trim())
                .ok_or_else(|| ExecError::Parse(format!("unknown type {:?}", ty)))?;
            Ok(ColumnDef::new(name.trim(), ty))
        })
        .collect::<Result<Vec<_>, ExecError>>()?;
    Ok(Schema::new(columns))
}

fn load_config(args: &Args) -> Result<SortConfig, ExecError> {
    let mut config = match &args.config {
        Some(path) => SortConfig::from_json_file(path)?,
        None => SortConfig::default().with_env_overrides()?,
    };
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    if let Some(buffer_pages) = args.buffer_pages {
        config.buffer_pages = buffer_pages;
    }
    if let Some(prefix) = &args.temp_prefix {
        config.temp_prefix = prefix.clone();
    }
    if args.parallel {
        config.merge_strategy = MergeStrategy::Parallel;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let schema: SchemaRef = Arc::new(parse_columns(&args.columns)?);
    let keys = if args.order_by.trim().is_empty() {
        Vec::new()
    } else {
        parse_order_by(&args.order_by)?
    };
    let config = load_config(&args)?;
    info!("sorting {} with {:?}", args.input.display(), config);

    let source = CsvSource::open(&args.input, schema.clone(), !args.no_header)?;
    let mut sort = OnDiskSort::new(source, keys, config, std::process::id())?;
    let mut plan = String::new();
    sort.print_inner(0, &mut plan);
    info!("plan: {}", plan.trim_end());

    sort.execute()?;

    let mut writer: csv::Writer<Box<dyn io::Write>> = match &args.output {
        Some(path) => csv::Writer::from_writer(Box::new(
            std::fs::File::create(path).map_err(|e| ExecError::io(path, e))?,
        )),
        None => csv::Writer::from_writer(Box::new(io::stdout().lock())),
    };
    if !args.no_header {
        writer.write_record(schema.columns().iter().map(|c| c.name()))?;
    }

    if let Some(run) = sort.result() {
        if args.verify {
            let rows = verify_sorted_scan(sort.comparator(), run.scan()?)?;
            info!("verified {} rows", rows);
        }
        let rows: Box<dyn Iterator<Item = Result<Tuple, ExecError>> + '_> = if args.distinct {
            Box::new(run.scan_distinct()?)
        } else {
            Box::new(run.scan()?)
        };
        for row in rows {
            let row = row?;
            writer.write_record(row.fields().iter().map(|f| f.to_string()))?;
        }
    }
    writer.flush()?;

    if args.stats {
        eprintln!("{}", serde_json::to_string_pretty(sort.stats())?);
    }
    Ok(())
}

fn main() -> ExitCode {
    let _ = env_logger::try_init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("extsort failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
