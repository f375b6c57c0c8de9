//! Command-line companion of the `spanscan` library.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment variables
//! (`SPANSCAN_*`), and CLI flags. Validates and prints the effective configuration, encodes
//! downsample filter definitions and renders the row key pattern of tag constraints.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use spanscan::config::{merge_into_scan_config, read_file_config};
use spanscan::key_pattern::GroupByValues;
use spanscan::{DownsampleFilter, IdWidths, KeyPattern, ScanConfig, TagPair};

// ---------- CLI ----------

/// Span scan tooling for time-series row keys.
#[derive(Parser, Debug)]
#[command(name = "spanscan", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `spanscan.toml` is loaded when present.
    #[arg(long, env = "SPANSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print it, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// Override the table name.
    #[arg(long)]
    pub table: Option<String>,

    /// Override the metric id width in bytes.
    #[arg(long)]
    pub metric_width: Option<usize>,

    /// Override the tag name id width in bytes.
    #[arg(long)]
    pub tag_name_width: Option<usize>,

    /// Override the tag value id width in bytes.
    #[arg(long)]
    pub tag_value_width: Option<usize>,

    /// Print the hex wire encoding of a downsample filter with this interval (seconds).
    #[arg(long, value_name = "SECS")]
    pub encode_downsample: Option<u32>,

    /// Required tag as hex ids, `NAME=VALUE`. Repeatable.
    #[arg(long = "tag", value_name = "NAME=VALUE")]
    pub tags: Vec<String>,

    /// Group-by tag name as hex id, optionally restricted: `NAME` or `NAME=V1,V2`. Repeatable.
    #[arg(long = "group-by", value_name = "NAME[=VALUES]")]
    pub group_bys: Vec<String>,
}

/// Load merged config. CLI overrides file/env.
fn load_config(cli: &Cli) -> Result<ScanConfig, String> {
    let path = if cli.no_config {
        None
    } else if let Some(ref path) = cli.config {
        Some(path.clone())
    } else {
        let default_path = PathBuf::from("spanscan.toml");
        default_path.exists().then_some(default_path)
    };

    let partial = read_file_config(path.as_deref()).map_err(|e| e.to_string())?;
    let mut config = ScanConfig::default();
    merge_into_scan_config(&mut config, &partial);

    if let Some(ref t) = cli.table {
        config.table = t.clone();
    }
    let w = config.id_widths.widths();
    config.id_widths = Arc::new(IdWidths::new(
        cli.metric_width.unwrap_or(w.metric),
        cli.tag_name_width.unwrap_or(w.tag_name),
        cli.tag_value_width.unwrap_or(w.tag_value),
    ));

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

// ---------- Argument parsing ----------

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s).map_err(|e| format!("invalid hex id {:?}: {}", s, e))
}

fn parse_tag(s: &str) -> Result<TagPair, String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("tag {:?} is not NAME=VALUE", s))?;
    Ok(TagPair::new(parse_hex(name)?, parse_hex(value)?))
}

fn parse_group_bys(args: &[String]) -> Result<(Vec<Vec<u8>>, GroupByValues), String> {
    let mut names = Vec::with_capacity(args.len());
    let mut values = GroupByValues::new();
    for arg in args {
        match arg.split_once('=') {
            None => names.push(parse_hex(arg)?),
            Some((name, list)) => {
                let name = parse_hex(name)?;
                let allowed = list
                    .split(',')
                    .filter(|v| !v.is_empty())
                    .map(parse_hex)
                    .collect::<Result<Vec<_>, _>>()?;
                values.insert(name.clone(), allowed);
                names.push(name);
            }
        }
    }
    Ok((names, values))
}

/// Renders wire pattern bytes as printable ASCII, escaping everything else as `\xHH`.
fn printable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7F).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}

// ---------- Main ----------

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = load_config(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        let w = config.id_widths.widths();
        println!("table={}", config.table);
        println!("family={}", String::from_utf8_lossy(&config.family));
        println!("max_rows_per_batch={}", config.max_rows_per_batch);
        println!("id_widths={}/{}/{}", w.metric, w.tag_name, w.tag_value);
        return Ok(());
    }

    let mut did_something = false;

    if let Some(interval) = cli.encode_downsample {
        println!("{}", hex::encode(DownsampleFilter::with_interval(interval).to_bytes()));
        did_something = true;
    }

    if !cli.tags.is_empty() || !cli.group_bys.is_empty() {
        let tags = cli
            .tags
            .iter()
            .map(|t| parse_tag(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                eprintln!("argument error: {}", e);
                e
            })?;
        let (group_bys, group_by_values) = parse_group_bys(&cli.group_bys).map_err(|e| {
            eprintln!("argument error: {}", e);
            e
        })?;
        let pattern = KeyPattern::build(
            &config.id_widths.widths(),
            &tags,
            &group_bys,
            &group_by_values,
        )
        .map_err(|e| {
            eprintln!("key pattern error: {}", e);
            e
        })?;
        println!("charset={}", pattern.charset());
        println!("pattern={}", printable(&pattern.to_wire()));
        did_something = true;
    }

    if !did_something {
        eprintln!("nothing to do; see --help");
        return Err("no action requested".into());
    }
    Ok(())
}
