//! Result formatters.
//!
//! All writers iterate the flattened OTU list, skip attached OTUs and
//! resolve amplicon ids through the owning pool. Generation-0 member
//! entries past the first mark a pool context switch left behind by
//! fastidious grafting. Identifiers are written as raw bytes.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::amplicon::AmpliconPools;
use crate::clustering::verify::gotoh_cigar;
use crate::clustering::Otu;
use crate::config::Scoring;

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path).with_context(|| {
        format!("failed to create output file {path:?}")
    })?))
}

/// One line per OTU: members separated by spaces, abundance attached to
/// each identifier.
pub fn write_otus(
    path: &Path,
    pools: &AmpliconPools,
    otus: &[Otu],
    sep_abundance: &str,
) -> Result<()> {
    let mut out = create(path)?;
    for otu in otus.iter().filter(|o| !o.attached) {
        let mut ac = pools.get(otu.pool_id);
        out.write_all(ac.id(otu.seed))?;
        write!(out, "{}{}", sep_abundance, ac.abundance(otu.seed))?;
        for member in &otu.members[1..] {
            if member.gen == 0 {
                ac = pools.get(member.parent_id);
            }
            out.write_all(b" ")?;
            out.write_all(ac.id(member.id))?;
            write!(out, "{}{}", sep_abundance, ac.abundance(member.id))?;
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// All OTUs on a single line, mothur list-file style.
pub fn write_otus_mothur(
    path: &Path,
    pools: &AmpliconPools,
    otus: &[Otu],
    threshold: usize,
    sep_abundance: &str,
) -> Result<()> {
    let mut out = create(path)?;
    let num_otus = otus.iter().filter(|o| !o.attached).count();
    write!(out, "swarm_{threshold}\t{num_otus}")?;
    for otu in otus.iter().filter(|o| !o.attached) {
        let mut ac = pools.get(otu.pool_id);
        out.write_all(b"\t")?;
        out.write_all(ac.id(otu.seed))?;
        write!(out, "{}{}", sep_abundance, ac.abundance(otu.seed))?;
        for member in &otu.members[1..] {
            if member.gen == 0 {
                ac = pools.get(member.parent_id);
            }
            out.write_all(b",")?;
            out.write_all(ac.id(member.id))?;
            write!(out, "{}{}", sep_abundance, ac.abundance(member.id))?;
        }
    }
    out.write_all(b"\n")?;
    Ok(())
}

/// Tab-separated per-OTU statistics: unique sequences, mass, seed id,
/// seed abundance, singletons, maximum generation, maximum radius.
pub fn write_statistics(
    path: &Path,
    pools: &AmpliconPools,
    otus: &[Otu],
    dereplicate: bool,
) -> Result<()> {
    let mut out = create(path)?;
    for otu in otus.iter().filter(|o| !o.attached) {
        let ac = pools.get(otu.pool_id);
        let (max_gen, max_rad) = if dereplicate { (0, 0) } else { (otu.max_gen, otu.max_rad) };
        write!(out, "{}\t{}\t", otu.num_unique, otu.mass)?;
        out.write_all(ac.id(otu.seed))?;
        writeln!(
            out,
            "\t{}\t{}\t{}\t{}",
            otu.seed_abundance, otu.num_singletons, max_gen, max_rad
        )?;
    }
    Ok(())
}

/// FASTA of the seed sequences, abundance replaced by the OTU mass.
pub fn write_seeds(
    path: &Path,
    pools: &AmpliconPools,
    otus: &[Otu],
    sep_abundance: &str,
) -> Result<()> {
    let mut out = create(path)?;
    for otu in otus.iter().filter(|o| !o.attached) {
        let ac = pools.get(otu.pool_id);
        out.write_all(b">")?;
        out.write_all(ac.id(otu.seed))?;
        write!(out, "{}{}", sep_abundance, otu.mass)?;
        out.write_all(b"\n")?;
        out.write_all(ac.seq(otu.seed))?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Parent/child links: parent id, child id, distance, OTU number,
/// generation; one line per non-seed member.
pub fn write_internal(
    path: &Path,
    pools: &AmpliconPools,
    otus: &[Otu],
    dereplicate: bool,
) -> Result<()> {
    let mut out = create(path)?;
    for (number, otu) in otus.iter().filter(|o| !o.attached).enumerate() {
        let mut ac = pools.get(otu.pool_id);
        for member in &otu.members[1..] {
            if member.gen == 0 {
                ac = pools.get(member.parent_id);
                continue;
            }
            let (dist, gen) = if dereplicate { (0, 0) } else { (member.parent_dist, member.gen) };
            out.write_all(ac.id(member.parent_id))?;
            out.write_all(b"\t")?;
            out.write_all(ac.id(member.id))?;
            writeln!(out, "\t{}\t{}\t{}", dist, number + 1, gen)?;
        }
    }
    Ok(())
}

/// uclust-style `.uc` records with CIGAR strings from the Gotoh aligner.
pub fn write_uclust(
    path: &Path,
    pools: &AmpliconPools,
    otus: &[Otu],
    scoring: &Scoring,
    sep_abundance: &str,
) -> Result<()> {
    let mut out = create(path)?;
    for (number, otu) in otus.iter().filter(|o| !o.attached).enumerate() {
        let mut ac = pools.get(otu.pool_id);
        let seed_pool = ac;
        let seed = otu.seed;

        write!(out, "C\t{}\t{}\t*\t*\t*\t*\t*\t", number, otu.size())?;
        out.write_all(seed_pool.id(seed))?;
        writeln!(out, "{}{}\t*", sep_abundance, seed_pool.abundance(seed))?;

        write!(out, "S\t{}\t{}\t*\t*\t*\t*\t*\t", number, seed_pool.length(seed))?;
        out.write_all(seed_pool.id(seed))?;
        writeln!(out, "{}{}\t*", sep_abundance, seed_pool.abundance(seed))?;

        for member in &otu.members[1..] {
            if member.gen == 0 {
                ac = pools.get(member.parent_id);
            }
            let info = gotoh_cigar(seed_pool.seq(seed), ac.seq(member.id), scoring);
            let identity = 100.0 * (info.length - info.num_diffs) as f64 / info.length as f64;
            let cigar = if info.num_diffs == 0 { "=" } else { info.cigar.as_str() };
            write!(
                out,
                "H\t{}\t{}\t{:.1}\t+\t0\t0\t{}\t",
                number,
                ac.length(member.id),
                identity,
                cigar
            )?;
            out.write_all(ac.id(member.id))?;
            write!(out, "{}{}\t", sep_abundance, ac.abundance(member.id))?;
            out.write_all(seed_pool.id(seed))?;
            writeln!(out, "{}{}", sep_abundance, seed_pool.abundance(seed))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplicon::InputRecord;
    use crate::clustering::cluster;
    use crate::config::ClusterConfig;
    use std::fs;
    use tempfile::TempDir;

    fn clustered() -> (AmpliconPools, Vec<Otu>, ClusterConfig) {
        let cfg = ClusterConfig::default();
        let pools = AmpliconPools::build(
            vec![
                InputRecord::new("s", b"ACGTACGTAC".to_vec(), 9),
                InputRecord::new("m", b"ACGTACGTAA".to_vec(), 4),
                InputRecord::new("x", b"TTTTTTTTTT".to_vec(), 2),
            ],
            cfg.threshold,
        )
        .unwrap();
        let otus = cluster(&pools, &cfg).unwrap();
        (pools, otus, cfg)
    }

    #[test]
    fn test_write_otus_lists_members_with_abundance() {
        let (pools, otus, _) = clustered();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("otus.txt");
        write_otus(&path, &pools, &otus, "_").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "s_9 m_4\nx_2\n");
    }

    #[test]
    fn test_write_mothur_single_line() {
        let (pools, otus, cfg) = clustered();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("otus.mothur");
        write_otus_mothur(&path, &pools, &otus, cfg.threshold, "_").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "swarm_1\t2\ts_9,m_4\tx_2\n");
    }

    #[test]
    fn test_write_statistics_columns() {
        let (pools, otus, _) = clustered();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.txt");
        write_statistics(&path, &pools, &otus, false).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "2\t13\ts\t9\t0\t1\t1");
        assert_eq!(lines[1], "1\t2\tx\t2\t0\t0\t0");
    }

    #[test]
    fn test_write_seeds_uses_otu_mass() {
        let (pools, otus, _) = clustered();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seeds.fasta");
        write_seeds(&path, &pools, &otus, "_").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, ">s_13\nACGTACGTAC\n>x_2\nTTTTTTTTTT\n");
    }

    #[test]
    fn test_write_internal_links() {
        let (pools, otus, _) = clustered();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("internal.txt");
        write_internal(&path, &pools, &otus, false).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "s\tm\t1\t1\t1\n");
    }

    #[test]
    fn test_write_uclust_records() {
        let (pools, otus, cfg) = clustered();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clusters.uc");
        write_uclust(&path, &pools, &otus, &cfg.scoring, "_").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // C + S per OTU, H per non-seed member
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("C\t0\t2\t"));
        assert!(lines[1].starts_with("S\t0\t10\t"));
        assert!(lines[2].starts_with("H\t0\t10\t90.0\t+\t0\t0\t10M\t"));
        assert!(lines[3].starts_with("C\t1\t1\t"));
    }
}
