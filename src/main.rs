// ========================================================================================
//
//                         The command-line face of kindred
//
// ========================================================================================
//
// Thin orchestration only: parse arguments, load inputs, hand off to the
// library, write outputs. All estimator logic lives in the library crate.

#![deny(unused_imports)]

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use kindred::io::{load_genotypes, load_matrix, write_matrix};
use kindred::types::GenotypeSource;
use kindred::{KinshipConfig, KinshipMatrix, compute_kinship};
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[clap(
    name = "kindred",
    version,
    about = "A high-performance engine for centered-IBS genomic kinship computation."
)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute the kinship matrix of a genotype file.
    Compute {
        /// Tab-separated genotype file: taxa header, one line of diploid
        /// calls per site.
        genotypes: PathBuf,
        /// Where to write the annotated kinship matrix.
        #[clap(short, long)]
        output: PathBuf,
        /// How many of each site's most frequent alleles to evaluate (2-6).
        #[clap(long, default_value_t = 6)]
        max_alleles: usize,
        /// Worker threads; defaults to all available cores.
        #[clap(long)]
        threads: Option<usize>,
    },
    /// Recombine kinship matrices computed over disjoint site subsets.
    Add {
        /// Matrix files to combine, each weighted by its own sumpk.
        matrices: Vec<PathBuf>,
        #[clap(short, long)]
        output: PathBuf,
    },
    /// Remove disjoint subset matrices from a superset matrix.
    Subtract {
        /// Subset matrix files whose contribution is removed.
        matrices: Vec<PathBuf>,
        /// The matrix computed over the superset of all sites.
        #[clap(long)]
        superset: PathBuf,
        #[clap(short, long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Command::Compute {
            genotypes,
            output,
            max_alleles,
            threads,
        } => {
            let source = load_genotypes(&genotypes)?;
            log::info!(
                "loaded {} taxa x {} sites from {}",
                source.number_of_taxa(),
                source.number_of_sites(),
                genotypes.display()
            );

            let config = KinshipConfig {
                max_alleles,
                work_units: threads.unwrap_or_else(num_cpus::get),
            };

            let bar = progress_bar();
            let report = {
                let bar = bar.clone();
                move |percent: u8| bar.set_position(percent as u64)
            };

            let matrix = match threads {
                Some(threads) => rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?
                    .install(|| compute_kinship(&source, &config, Some(&report))),
                None => compute_kinship(&source, &config, Some(&report)),
            }?;
            bar.finish_and_clear();

            write_matrix(&output, &matrix)?;
            Ok(())
        }
        Command::Add { matrices, output } => {
            let loaded = matrices
                .iter()
                .map(|path| load_matrix(path))
                .collect::<Result<Vec<_>, _>>()?;
            let combined = KinshipMatrix::combine_add(&loaded)?;
            write_matrix(&output, &combined)?;
            Ok(())
        }
        Command::Subtract {
            matrices,
            superset,
            output,
        } => {
            let subsets = matrices
                .iter()
                .map(|path| load_matrix(path))
                .collect::<Result<Vec<_>, _>>()?;
            let superset = load_matrix(&superset)?;
            let result = KinshipMatrix::combine_subtract(&subsets, &superset)?;
            write_matrix(&output, &result)?;
            Ok(())
        }
    }
}

fn progress_bar() -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let bar = ProgressBar::with_draw_target(Some(100), draw_target);
    bar.set_style(
        ProgressStyle::with_template("> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    bar.set_message("computing kinship");
    bar
}
