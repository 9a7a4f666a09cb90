//! Ambient CLI surface: thin subcommand modules that wire flags to the core
//! builders and render results through `write.rs`'s `cs_*` macros. None of
//! this layer is exercised by the core's own tests; it is exercised by the
//! black-box suite under `tests/`. Grounded on the donor's
//! `src/cli.rs`/`src/main.rs`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[cfg(not(windows))]
pub const RULE_PREFIX: &str = "‣";

#[cfg(windows)]
pub const RULE_PREFIX: &str = "+";

#[derive(Parser)]
#[command(name = "tauscan", about = "Rule-driven triage engine for Windows forensic artefacts")]
pub struct Opts {
    #[command(subcommand)]
    pub cmd: Command,

    /// Suppress progress and diagnostic output.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Increase diagnostic verbosity (repeat for trace level).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write output to a file instead of stdout.
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Hunt for detections across one or more artefact files or directories.
    Hunt(hunt::Args),
    /// Analyse Shimcache/Amcache/SRUM artefacts.
    #[command(subcommand)]
    Analyse(analyse::Args),
}

/// Take whatever format the user asked for and the writer singleton already
/// knows about, and print `data` (either a table, or a structured value
/// serialised as JSON/YAML).
pub fn format_field_length(data: &str, full_output: bool, length: u32) -> String {
    let mut data = data
        .replace('\n', "")
        .replace('\r', "")
        .replace('\t', "")
        .replace("  ", " ")
        .chars()
        .collect::<Vec<char>>()
        .chunks(length as usize)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<String>>()
        .join("\n");

    const TRUNCATE_LEN: usize = 1000;
    if !full_output && data.len() > TRUNCATE_LEN {
        data.truncate(TRUNCATE_LEN);
        data.push_str("...\n\n(use --full to show all content)");
    }
    data
}

/// Recursively collect files under `path` matching `extensions` (empty set
/// matches everything). Grounded on the donor's `file::get_files`.
pub fn collect_files(
    path: &Path,
    extensions: &std::collections::HashSet<String>,
    skip_errors: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = vec![];
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if skip_errors => {
            cs_eyellowln!("[!] failed to get metadata for '{}' - {e}", path.display());
            return Ok(files);
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        let entries = std::fs::read_dir(path)?;
        for entry in entries {
            let entry = entry?;
            files.extend(collect_files(&entry.path(), extensions, skip_errors)?);
        }
    } else if extensions.is_empty() {
        files.push(path.to_path_buf());
    } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if extensions.contains(ext) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

pub mod hunt {
    use std::collections::HashSet;
    use std::path::PathBuf;

    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use chrono_tz::Tz;
    use clap::Args as ClapArgs;
    use prettytable::{cell, format, Row, Table};
    use serde::Serialize;
    use uuid::Uuid;

    use crate::hunt::{Detections, Kind as DetectionKind};
    use crate::rule::{Kind as RuleKind, Level, Rule, Status};
    use crate::{Decoders, Hunter};

    #[derive(ClapArgs)]
    pub struct Args {
        /// Files or directories to hunt through.
        pub path: Vec<PathBuf>,

        /// Chainsaw rule files or directories.
        #[arg(long)]
        pub rule: Vec<PathBuf>,

        /// Mapping files (for Sigma rules).
        #[arg(long)]
        pub mapping: Vec<PathBuf>,

        /// Restrict to these rule kinds.
        #[arg(long)]
        pub kind: Vec<RuleKind>,

        /// Restrict to these rule levels.
        #[arg(long)]
        pub level: Vec<Level>,

        /// Restrict to these rule statuses.
        #[arg(long)]
        pub status: Vec<Status>,

        /// Only consider events from this timestamp onwards.
        #[arg(long)]
        pub from: Option<NaiveDateTime>,

        /// Only consider events up to this timestamp.
        #[arg(long)]
        pub to: Option<NaiveDateTime>,

        /// Interpret naive timestamps as local time rather than UTC.
        #[arg(long)]
        pub local: bool,

        /// Interpret naive timestamps in this IANA timezone.
        #[arg(long)]
        pub timezone: Option<Tz>,

        /// Attempt to decode files with an unrecognised extension.
        #[arg(long)]
        pub load_unknown: bool,

        /// Skip files/records that fail to parse instead of aborting.
        #[arg(long)]
        pub skip_errors: bool,

        /// Emit detections as JSON instead of a table.
        #[arg(long)]
        pub json: bool,

        /// Column width used when rendering table cells.
        #[arg(long, default_value_t = 40)]
        pub column_width: u32,
    }

    #[derive(Serialize)]
    struct JsonDetection<'a> {
        name: &'a str,
        authors: &'a [String],
        level: &'a Level,
        status: &'a Status,
        timestamp: String,
        document: Option<serde_json::Value>,
    }

    fn localise(ts: &NaiveDateTime, local: bool, timezone: Option<Tz>) -> String {
        if let Some(tz) = timezone {
            tz.from_utc_datetime(ts).to_rfc3339()
        } else if local {
            Utc.from_local_datetime(ts).single().unwrap_or_else(|| Utc.from_utc_datetime(ts)).to_rfc3339()
        } else {
            DateTime::<Utc>::from_naive_utc_and_offset(*ts, Utc).to_rfc3339()
        }
    }

    pub fn run(args: Args, decoders: Decoders) -> anyhow::Result<()> {
        let kinds = (!args.kind.is_empty()).then(|| args.kind.iter().cloned().collect());
        let levels = (!args.level.is_empty()).then(|| args.level.iter().cloned().collect());
        let statuses = (!args.status.is_empty()).then(|| args.status.iter().cloned().collect());

        let mut rules = vec![];
        for path in &args.rule {
            for file in super::collect_files(path, &HashSet::new(), args.skip_errors)? {
                if file.extension().and_then(|e| e.to_str()).is_none_or(|e| e != "yml" && e != "yaml")
                {
                    continue;
                }
                // A rule file is either Chainsaw or Sigma; whichever format
                // doesn't match simply fails to parse and is ignored here.
                let mut loaded_any = false;
                let mut last_err = None;
                for kind in [RuleKind::Chainsaw, RuleKind::Sigma] {
                    match crate::rule::load(kind, &file, &kinds, &levels, &statuses) {
                        Ok(loaded) if !loaded.is_empty() => {
                            loaded_any = true;
                            rules.extend(loaded);
                        }
                        Ok(_) => loaded_any = true,
                        Err(e) => last_err = Some(e),
                    }
                }
                if !loaded_any {
                    let e = last_err.expect("at least one load attempt was made");
                    if args.skip_errors {
                        cs_eyellowln!("[!] failed to load rule '{}' - {e}", file.display())
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        cs_eprintln!("[+] Loaded {} rule(s)", rules.len());

        let mut builder = Hunter::builder().decoders(decoders).rules(rules).mappings(args.mapping);
        builder = builder.load_unknown(args.load_unknown).skip_errors(args.skip_errors).local(args.local);
        if let Some(from) = args.from {
            builder = builder.from(from);
        }
        if let Some(to) = args.to {
            builder = builder.to(to);
        }
        if let Some(timezone) = args.timezone {
            builder = builder.timezone(timezone);
        }
        let hunter = builder.build()?;
        cs_eprintln!("[+] Built {} hunt(s)", hunter.hunts());

        let mut files = vec![];
        for path in &args.path {
            files.extend(super::collect_files(path, &hunter.extensions(), args.skip_errors)?);
        }
        cs_eprintln!("[+] Hunting through {} file(s)", files.len());

        let mut detections = vec![];
        for file in &files {
            match hunter.hunt(file, &None) {
                Ok(found) => detections.extend(found),
                Err(e) if args.skip_errors => {
                    cs_eyellowln!("[!] failed to hunt '{}' - {e}", file.display())
                }
                Err(e) => return Err(e),
            }
        }

        if args.json {
            print_json(&detections, hunter.rules(), &args)?;
        } else {
            print_table(&detections, hunter.rules(), &args);
        }
        Ok(())
    }

    fn print_json(detections: &[Detections], rules: &std::collections::BTreeMap<Uuid, Rule>, args: &Args) -> anyhow::Result<()> {
        let mut rendered = vec![];
        for detection in detections {
            let document = match &detection.kind {
                DetectionKind::Individual { document } => serde_json::to_value(&document.data).ok(),
                _ => None,
            };
            for hit in &detection.hits {
                let Some(rule) = rules.get(&hit.rule) else { continue };
                rendered.push(JsonDetection {
                    name: rule.name(),
                    authors: rule.authors(),
                    level: rule.level(),
                    status: rule.status(),
                    timestamp: localise(&hit.timestamp, args.local, args.timezone),
                    document: document.clone(),
                });
            }
        }
        rendered.sort_by(|x, y| x.timestamp.cmp(&y.timestamp));
        cs_print_json!(&rendered)?;
        Ok(())
    }

    fn print_table(detections: &[Detections], rules: &std::collections::BTreeMap<Uuid, Rule>, args: &Args) {
        let format = format::FormatBuilder::new()
            .column_separator('│')
            .borders('│')
            .separators(&[format::LinePosition::Top], format::LineSeparator::new('─', '┬', '┌', '┐'))
            .separators(&[format::LinePosition::Intern], format::LineSeparator::new('─', '┼', '├', '┤'))
            .separators(&[format::LinePosition::Bottom], format::LineSeparator::new('─', '┴', '└', '┘'))
            .padding(1, 1)
            .build();

        let mut table = Table::new();
        table.set_format(format);
        table.add_row(Row::new(vec![
            cell!("timestamp").style_spec("c"),
            cell!("rule").style_spec("c"),
            cell!("level").style_spec("c"),
            cell!("document").style_spec("c"),
        ]));

        let mut rows: Vec<(NaiveDateTime, String, String, String)> = vec![];
        for detection in detections {
            let document = match &detection.kind {
                DetectionKind::Individual { document } => {
                    serde_json::to_string(&document.data).unwrap_or_default()
                }
                DetectionKind::Aggregate { documents } => format!("{} document(s)", documents.len()),
                DetectionKind::Cached { path, .. } => format!("cached in {}", path.display()),
            };
            for hit in &detection.hits {
                let Some(rule) = rules.get(&hit.rule) else { continue };
                rows.push((
                    hit.timestamp,
                    rule.name().clone(),
                    rule.level().to_string(),
                    super::format_field_length(&document, false, args.column_width),
                ));
            }
        }
        rows.sort_by(|x, y| x.0.cmp(&y.0));
        for (timestamp, name, level, document) in rows {
            table.add_row(Row::new(vec![
                cell!(localise(&timestamp, args.local, args.timezone)),
                cell!(format!("{} {name}", super::RULE_PREFIX)),
                cell!(level),
                cell!(document),
            ]));
        }
        cs_print_table!(table);
    }
}

pub mod analyse {
    use std::path::PathBuf;

    use clap::Subcommand;

    use crate::analyse::{shimcache::ShimcacheAnalyser, srum::SrumAnalyser};
    use crate::file::esedb::Opener as EsedbOpener;
    use crate::file::hve::registry::Opener as RegistryOpener;

    #[derive(Subcommand)]
    pub enum Args {
        /// Build a Shimcache/Amcache enrichment timeline.
        Shimcache(ShimcacheArgs),
        /// Parse a SRUM database and its retention metadata.
        Srum(SrumArgs),
    }

    #[derive(clap::Args)]
    pub struct ShimcacheArgs {
        /// Path to the `SYSTEM` hive.
        #[arg(long)]
        pub shimcache: PathBuf,

        /// Path to the `Amcache.hve` hive.
        #[arg(long)]
        pub amcache: Option<PathBuf>,

        /// Regex patterns used to anchor exact timestamps.
        #[arg(long)]
        pub pattern: Vec<String>,

        /// Enable the near shimcache/amcache timestamp pairing pass.
        #[arg(long)]
        pub near_ts_pair_matching: bool,
    }

    #[derive(clap::Args)]
    pub struct SrumArgs {
        /// Path to the `SRUDB.dat` ESE database.
        pub srum: PathBuf,

        /// Path to the `SOFTWARE` hive.
        pub software_hive: PathBuf,
    }

    pub fn run_shimcache(
        args: ShimcacheArgs,
        registry_opener: Option<RegistryOpener>,
    ) -> anyhow::Result<()> {
        let analyser = ShimcacheAnalyser::new(args.shimcache, args.amcache, registry_opener);
        let timeline = analyser.amcache_shimcache_timeline(&args.pattern, args.near_ts_pair_matching)?;
        cs_print_json!(&timeline.iter().map(display_entity).collect::<Vec<_>>())?;
        Ok(())
    }

    pub fn run_srum(
        args: SrumArgs,
        esedb_opener: Option<EsedbOpener>,
        registry_opener: Option<RegistryOpener>,
    ) -> anyhow::Result<()> {
        let analyser = SrumAnalyser::new(args.srum, args.software_hive, esedb_opener, registry_opener);
        let info = analyser.parse_srum_database()?;
        cs_eprintln!("[+] SRUM table retention:");
        let table = info.table_details;
        cs_print_table!(table);
        cs_print_json!(&info.db_content)?;
        Ok(())
    }

    fn display_entity(entity: &crate::analyse::shimcache::TimelineEntity) -> serde_json::Value {
        serde_json::json!({
            "shimcache_entry": entity.shimcache_entry.as_ref().and_then(|e| serde_json::to_value(e).ok()),
            "amcache_matched": entity.amcache_file.is_some() || entity.amcache_program.is_some(),
            "timestamp": format!("{:?}", entity.timestamp),
        })
    }
}
