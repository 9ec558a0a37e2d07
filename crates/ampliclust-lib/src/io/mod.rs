pub mod fasta;

pub use fasta::{read_amplicons, FastaReader, InputOptions};
