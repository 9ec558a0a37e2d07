use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use ampliclust_lib::config::{num_cpus, FastidiousCheckMode, FilterMode, Scoring};
use ampliclust_lib::io::{read_amplicons, InputOptions};
use ampliclust_lib::{cluster, output, AmpliconPools, ClusterConfig};

/// Segment-filter variant (subset order matches the engine).
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum CliFilterMode {
    /// Scan by ascending length
    Forward,
    /// Scan by descending length
    Backward,
    /// Forward scan with backward re-check
    ForwardBackward,
    /// Backward scan with forward re-check
    BackwardForward,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum CliCheckMode {
    /// Neighbour pools scanned one after another
    Serial,
    /// Own pool on a helper thread, neighbours serial
    ParallelSelf,
    /// One thread per direction and distance
    PerDirection,
}

#[derive(Parser)]
#[command(name = "ampliclust")]
#[command(author = "ampliclust contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Amplicon clustering with a pigeonhole segment filter", long_about = None)]
struct Cli {
    /// Input FASTA file (plain or gzipped), or `-` for stdin
    input: PathBuf,

    /// Maximum number of differences for an in-OTU link
    #[arg(short = 'd', long, default_value = "1")]
    differences: usize,

    /// Extra segments of the pigeonhole filter
    #[arg(short = 'e', long, default_value = "1")]
    extra_segments: usize,

    /// Segment-filter variant
    #[arg(long, value_enum, default_value = "forward")]
    filter_mode: CliFilterMode,

    /// Verify candidates with the scoring function instead of edit distance
    #[arg(long)]
    use_score: bool,

    /// Reward for a nucleotide match (with --use-score)
    #[arg(short = 'm', long, default_value = "5")]
    match_reward: u64,

    /// Penalty for a nucleotide mismatch (with --use-score)
    #[arg(short = 'p', long, default_value = "4")]
    mismatch_penalty: u64,

    /// Penalty for opening a gap (with --use-score)
    #[arg(short = 'g', long, default_value = "12")]
    gap_opening_penalty: u64,

    /// Penalty for extending a gap (with --use-score)
    #[arg(short = 'x', long, default_value = "4")]
    gap_extension_penalty: u64,

    /// Never refuse an amplicon because of its abundance
    #[arg(short = 'n', long)]
    no_otu_breaking: bool,

    /// Group only identical sequences (threshold 0)
    #[arg(long)]
    dereplicate: bool,

    /// Run the second, fastidious clustering phase
    #[arg(short = 'f', long)]
    fastidious: bool,

    /// Threshold of the fastidious phase (0 = twice the main threshold)
    #[arg(long, default_value = "0")]
    fastidious_threshold: usize,

    /// Minimum mass of a heavy OTU in the fastidious phase
    #[arg(short = 'b', long, default_value = "3")]
    boundary: u64,

    /// Disable the q-gram pre-check of the fastidious phase
    #[arg(long)]
    no_qgram_filter: bool,

    /// Separator between identifier and abundance in FASTA headers
    #[arg(long, default_value = "_")]
    abundance_separator: String,

    /// Drop sequences shorter than this (0 = no limit)
    #[arg(long, default_value = "0")]
    min_length: usize,

    /// Drop sequences longer than this (0 = no limit)
    #[arg(long, default_value = "0")]
    max_length: usize,

    /// Explorer threads across pools (0 = auto-detect)
    #[arg(short = 't', long, default_value = "1")]
    threads: usize,

    /// Filter producer threads per pool
    #[arg(long, default_value = "1")]
    filter_threads: usize,

    /// Verifier threads per pool
    #[arg(long, default_value = "1")]
    verifier_threads: usize,

    /// Grafter threads of the fastidious phase
    #[arg(long, default_value = "1")]
    grafters: usize,

    /// Verifier threads per fastidious neighbour-pool check
    #[arg(long, default_value = "1")]
    check_threads: usize,

    /// Neighbour-pool scan layout of the fastidious phase
    #[arg(long, value_enum, default_value = "serial")]
    check_mode: CliCheckMode,

    /// OTU membership output file
    #[arg(short = 'o', long, value_name = "FILE")]
    output_otus: Option<PathBuf>,

    /// Write the membership list in mothur format
    #[arg(short = 'r', long)]
    mothur: bool,

    /// Statistics output file
    #[arg(short = 's', long, value_name = "FILE")]
    output_statistics: Option<PathBuf>,

    /// Seed FASTA output file
    #[arg(short = 'w', long, value_name = "FILE")]
    output_seeds: Option<PathBuf>,

    /// Internal-structure (parent/child link) output file
    #[arg(short = 'i', long, value_name = "FILE")]
    output_internal: Option<PathBuf>,

    /// uclust-style output file
    #[arg(short = 'u', long, value_name = "FILE")]
    output_uclust: Option<PathBuf>,
}

impl Cli {
    fn into_parts(self) -> (PathBuf, InputOptions, ClusterConfig, Outputs) {
        let threshold = if self.dereplicate { 0 } else { self.differences };
        let config = ClusterConfig {
            threshold,
            extra_segments: self.extra_segments,
            filter_mode: match self.filter_mode {
                CliFilterMode::Forward => FilterMode::Forward,
                CliFilterMode::Backward => FilterMode::Backward,
                CliFilterMode::ForwardBackward => FilterMode::ForwardBackward,
                CliFilterMode::BackwardForward => FilterMode::BackwardForward,
            },
            use_score: self.use_score,
            scoring: Scoring {
                match_reward: self.match_reward,
                mismatch_penalty: self.mismatch_penalty,
                gap_open_penalty: self.gap_opening_penalty,
                gap_extend_penalty: self.gap_extension_penalty,
            },
            no_otu_breaking: self.no_otu_breaking,
            dereplicate: self.dereplicate,
            fastidious: self.fastidious && !self.dereplicate,
            fastidious_threshold: self.fastidious_threshold,
            boundary: self.boundary,
            qgram_filter: !self.no_qgram_filter,
            explorers: if self.threads == 0 { num_cpus() } else { self.threads },
            filter_threads: self.filter_threads,
            verifier_threads: self.verifier_threads,
            grafters: self.grafters,
            check_threads: self.check_threads,
            check_mode: match self.check_mode {
                CliCheckMode::Serial => FastidiousCheckMode::Serial,
                CliCheckMode::ParallelSelf => FastidiousCheckMode::ParallelSelf,
                CliCheckMode::PerDirection => FastidiousCheckMode::PerDirection,
            },
            ..ClusterConfig::default()
        };
        let input_opts = InputOptions {
            abundance_separator: self.abundance_separator.clone(),
            min_length: self.min_length,
            max_length: self.max_length,
        };
        let outputs = Outputs {
            otus: self.output_otus,
            mothur: self.mothur,
            statistics: self.output_statistics,
            seeds: self.output_seeds,
            internal: self.output_internal,
            uclust: self.output_uclust,
            abundance_separator: self.abundance_separator,
        };
        (self.input, input_opts, config, outputs)
    }
}

struct Outputs {
    otus: Option<PathBuf>,
    mothur: bool,
    statistics: Option<PathBuf>,
    seeds: Option<PathBuf>,
    internal: Option<PathBuf>,
    uclust: Option<PathBuf>,
    abundance_separator: String,
}

impl Outputs {
    fn is_empty(&self) -> bool {
        self.otus.is_none()
            && self.statistics.is_none()
            && self.seeds.is_none()
            && self.internal.is_none()
            && self.uclust.is_none()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (input, input_opts, config, outputs) = cli.into_parts();
    if outputs.is_empty() {
        bail!("no output file specified (use -o, -s, -w, -i or -u)");
    }

    let records = read_amplicons(&input, &input_opts)?;
    info!(amplicons = records.len(), "input read");

    let pools = AmpliconPools::build(records, config.threshold)?;
    let otus = cluster(&pools, &config)?;

    if let Some(path) = &outputs.otus {
        if outputs.mothur {
            output::write_otus_mothur(
                path,
                &pools,
                &otus,
                config.threshold,
                &outputs.abundance_separator,
            )?;
        } else {
            output::write_otus(path, &pools, &otus, &outputs.abundance_separator)?;
        }
    }
    if let Some(path) = &outputs.statistics {
        output::write_statistics(path, &pools, &otus, config.dereplicate)?;
    }
    if let Some(path) = &outputs.seeds {
        output::write_seeds(path, &pools, &otus, &outputs.abundance_separator)?;
    }
    if let Some(path) = &outputs.internal {
        output::write_internal(path, &pools, &otus, config.dereplicate)?;
    }
    if let Some(path) = &outputs.uclust {
        output::write_uclust(
            path,
            &pools,
            &otus,
            &config.scoring,
            &outputs.abundance_separator,
        )?;
    }

    info!("done");
    Ok(())
}
