use anyhow::{bail, Result};

/// Direction(s) in which the segment filter probes the inverted indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    /// Scan the pool by ascending length; index shorter partners.
    Forward,
    /// Scan the pool by descending length; index longer partners.
    Backward,
    /// Forward scan with an immediate backward re-check of every survivor.
    ForwardBackward,
    /// Backward scan with an immediate forward re-check of every survivor.
    BackwardForward,
}

/// How one pool's graft search visits its neighbour pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastidiousCheckMode {
    /// All neighbour pools scanned one after another.
    Serial,
    /// The pool itself is scanned on a helper thread while the
    /// predecessor and successor pools are scanned serially.
    ParallelSelf,
    /// One thread per direction and distance, self pool on its own thread.
    PerDirection,
}

/// Alignment scoring used by the Gotoh verifier and the uclust writer.
///
/// All values are magnitudes: penalties are subtracted, the reward is
/// added. A gap of length L costs `gap_open + L * gap_extend`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scoring {
    pub match_reward: u64,
    pub mismatch_penalty: u64,
    pub gap_open_penalty: u64,
    pub gap_extend_penalty: u64,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            match_reward: 5,
            mismatch_penalty: 4,
            gap_open_penalty: 12,
            gap_extend_penalty: 4,
        }
    }
}

/// Full parameter set of the clustering engine.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Edit-distance threshold for an in-OTU link (Swarm's `-d`).
    pub threshold: usize,
    /// Extra segments of the pigeonhole filter (must be >= 1).
    pub extra_segments: usize,
    /// Segment-filter variant.
    pub filter_mode: FilterMode,
    /// Verify with the Gotoh scoring function instead of plain edit distance.
    pub use_score: bool,
    /// Scoring for `use_score` verification and CIGAR output.
    pub scoring: Scoring,
    /// Add amplicons to an OTU even when their abundance exceeds the
    /// subseed's abundance (Swarm's `-n`).
    pub no_otu_breaking: bool,
    /// Group only identical sequences (forces threshold 0, disables
    /// scoring and the fastidious phase).
    pub dereplicate: bool,
    /// Run the second, fastidious clustering phase.
    pub fastidious: bool,
    /// Threshold of the fastidious phase; 0 selects the default 2 * threshold.
    pub fastidious_threshold: usize,
    /// Minimum mass of a heavy OTU during the fastidious phase.
    pub boundary: u64,
    /// Run the q-gram lower-bound check before fastidious verification.
    pub qgram_filter: bool,
    /// Explorer threads: pools processed in parallel (filter -> verify -> explore).
    pub explorers: usize,
    /// Filter producer threads per pool (sub-pool partitioning).
    pub filter_threads: usize,
    /// Verifier threads per pool consuming the candidate buffers.
    pub verifier_threads: usize,
    /// Grafter threads: pools searched for graft candidates in parallel.
    pub grafters: usize,
    /// Verifier threads per fastidious neighbour-pool check.
    pub check_threads: usize,
    /// Neighbour-pool scan layout of the fastidious phase.
    pub check_mode: FastidiousCheckMode,
    /// Candidate batches buffered per verifier queue.
    pub buffer_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: 1,
            extra_segments: 1,
            filter_mode: FilterMode::Forward,
            use_score: false,
            scoring: Scoring::default(),
            no_otu_breaking: false,
            dereplicate: false,
            fastidious: false,
            fastidious_threshold: 0,
            boundary: 3,
            qgram_filter: true,
            explorers: 1,
            filter_threads: 1,
            verifier_threads: 1,
            grafters: 1,
            check_threads: 1,
            check_mode: FastidiousCheckMode::Serial,
            buffer_capacity: 16,
        }
    }
}

impl ClusterConfig {
    /// Threshold of the fastidious phase with the 2 * threshold default applied.
    pub fn effective_fastidious_threshold(&self) -> usize {
        if self.fastidious_threshold == 0 {
            2 * self.threshold
        } else {
            self.fastidious_threshold
        }
    }

    /// Check the parameter set before clustering starts.
    pub fn validate(&self) -> Result<()> {
        if self.dereplicate {
            if self.threshold != 0 {
                bail!("invalid parameter: dereplication requires threshold 0");
            }
            if self.use_score {
                bail!("invalid parameter: dereplication disables scored verification");
            }
            if self.fastidious {
                bail!("invalid parameter: dereplication disables the fastidious phase");
            }
        } else if self.threshold == 0 {
            bail!("invalid parameter: threshold must be at least 1 unless dereplicating");
        }
        if self.extra_segments == 0 {
            bail!("invalid parameter: the segment filter needs at least one extra segment");
        }
        if self.fastidious && self.effective_fastidious_threshold() < self.threshold {
            bail!(
                "invalid parameter: fastidious threshold {} is smaller than threshold {}",
                self.effective_fastidious_threshold(),
                self.threshold
            );
        }
        if self.fastidious && self.boundary == 0 {
            bail!("invalid parameter: the fastidious boundary must be positive");
        }
        for (name, value) in [
            ("explorers", self.explorers),
            ("filter_threads", self.filter_threads),
            ("verifier_threads", self.verifier_threads),
            ("grafters", self.grafters),
            ("check_threads", self.check_threads),
            ("buffer_capacity", self.buffer_capacity),
        ] {
            if value == 0 {
                bail!("invalid parameter: {name} must be at least 1");
            }
        }
        Ok(())
    }
}

pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
}
