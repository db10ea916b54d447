use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use quartet_support::config::{AnnotationMode, InferenceOptions};
use quartet_support::io::{
    create_output, read_gene_trees, read_individual_mapping, read_species_tree, write_tree,
};
use quartet_support::scorer::{QuartetInference, Score};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// Score a species tree against gene trees by quartet consistency and
/// annotate its branches with local posterior support.
#[derive(Parser, Debug)]
#[command(name = "quartet-support", version, about = "Quartet score and branch support of a species tree")]
struct Args {
    /// Gene trees, one Newick tree per line (.gz accepted)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Species tree to score
    #[arg(short = 'q', long = "species-tree")]
    species_tree: PathBuf,

    /// Individual mapping file, one `species:ind1,ind2` line per species
    #[arg(short = 'a', long = "mapping")]
    mapping: Option<PathBuf>,

    /// Branch annotation code (0,1,2,3,4,6,7,8,10,12,16,32)
    #[arg(short = 't', long = "annotation", default_value_t = 3)]
    annotation: u32,

    /// Rate of the Yule prior on branch lengths
    #[arg(short = 'c', long = "lambda", default_value_t = 0.5)]
    lambda: f64,

    /// Number of times each gene tree is repeated in the input
    #[arg(long = "gene-repeat", default_value_t = 1)]
    gene_repeat: u32,

    /// Directory for freqQuad.csv and its plotting script (annotation 16/32)
    #[arg(long = "freq-output")]
    freq_output: Option<PathBuf>,

    /// Output path for the annotated species tree (stdout when absent; .gz accepted)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Quiet mode: only warnings and errors on stderr
    #[arg(long = "quiet", default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let t0 = Instant::now();
    let gene_trees = read_gene_trees(&args.input)
        .with_context(|| format!("Failed to read gene trees from {:?}", args.input))?;
    let mut species = read_species_tree(&args.species_tree)
        .with_context(|| format!("Failed to read species tree from {:?}", args.species_tree))?;
    let mapping = args
        .mapping
        .as_ref()
        .map(|p| {
            read_individual_mapping(p)
                .with_context(|| format!("Failed to read individual mapping from {p:?}"))
        })
        .transpose()?;
    info!("Reading inputs {:.3}s", t0.elapsed().as_secs_f64());

    let mut options = InferenceOptions::default()
        .with_annotation(AnnotationMode::from_code(args.annotation)?)
        .with_lambda(args.lambda)
        .with_gene_repeat(args.gene_repeat);
    if let Some(dir) = &args.freq_output {
        options = options.with_freq_output(dir);
    }

    let t1 = Instant::now();
    let mut inference = QuartetInference::new(gene_trees, mapping, options)?;
    let report = inference
        .score_tree(&mut species, true)
        .context("Failed to score the species tree")?;
    info!("Scoring {:.3}s", t1.elapsed().as_secs_f64());
    if report.score == Score::NotComputed {
        info!("Rerun with annotation code 1 to score a tree with polytomies");
    }

    match &args.output {
        Some(path) => {
            let mut out = create_output(path)
                .with_context(|| format!("Failed to create output {path:?}"))?;
            write_tree(&mut out, &species)?;
            out.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            write_tree(&mut stdout.lock(), &species)?;
        }
    }
    Ok(())
}
