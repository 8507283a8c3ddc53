//! # msannotate
//!
//! Command-line access to adduct parsing, formula arithmetic and formula
//! database lookups.
//!
//! ```bash
//! msannotate adduct "[M+2H]2+"
//! msannotate formula C6H12O6 --charge -1
//! msannotate db-pack formulas.txt formulas.bin --compress
//! msannotate lookup-mz 203.0526 --adduct "[M+Na]+" --db formulas.bin
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use msannotate::config::AnnotationConfig;
use msannotate::database::FormulaDatabase;
use msannotate::lookup::{mass_to_formula, mz_to_formula, FormulaResult};
use msformula::chemistry::adduct::AdductRule;
use msformula::chemistry::formula::{ElementVector, Formula};
use msformula::data::tolerance::MzTolerance;

/// Molecular formula annotation tools
#[derive(Parser)]
#[command(name = "msannotate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LookupArgs {
    /// Formula database written by `db-pack`
    #[arg(long, value_name = "FILE")]
    db: PathBuf,

    /// Tolerance value, in ppm unless --da is given
    #[arg(long, default_value = "10")]
    tol: f64,

    /// Interpret --tol as Da
    #[arg(long)]
    da: bool,

    /// Allow Br, Cl, F and I
    #[arg(long)]
    halogen: bool,

    /// Minimum double bond equivalent
    #[arg(long, default_value = "0")]
    dbe_cutoff: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an adduct notation
    Adduct {
        #[arg(value_name = "ADDUCT")]
        adduct: String,

        /// Parse for negative ion mode
        #[arg(long)]
        negative: bool,

        /// Fail instead of falling back to the default adduct
        #[arg(long)]
        strict: bool,
    },

    /// Print mass and DBE of a formula
    Formula {
        #[arg(value_name = "FORMULA")]
        formula: String,

        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        charge: i32,
    },

    /// Print the validated configuration as JSON
    Config {
        /// Instrument preset: orbitrap, fticr or qtof
        #[arg(long)]
        instrument: Option<String>,

        /// Configuration JSON to validate instead of the defaults
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Pack a newline-separated formula list into a database file
    DbPack {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Compress with zstd
        #[arg(long)]
        compress: bool,
    },

    /// Find formulas for a neutral mass
    LookupMass {
        #[arg(value_name = "MASS")]
        mass: f64,

        #[command(flatten)]
        lookup: LookupArgs,
    },

    /// Find formulas for an ion m/z
    LookupMz {
        #[arg(value_name = "MZ")]
        mz: f64,

        #[arg(long, default_value = "[M+H]+", allow_hyphen_values = true)]
        adduct: String,

        #[command(flatten)]
        lookup: LookupArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Adduct { adduct, negative, strict } => run_adduct(&adduct, !negative, strict),
        Commands::Formula { formula, charge } => run_formula(&formula, charge),
        Commands::Config { instrument, file } => run_config(instrument, file),
        Commands::DbPack { input, output, compress } => run_db_pack(input, output, compress),
        Commands::LookupMass { mass, lookup } => {
            let db = FormulaDatabase::load(&lookup.db)
                .with_context(|| format!("failed to load {}", lookup.db.display()))?;
            let results = mass_to_formula(&db, mass, tolerance(&lookup), lookup.halogen, lookup.dbe_cutoff);
            print_results(&results);
            Ok(())
        }
        Commands::LookupMz { mz, adduct, lookup } => {
            let db = FormulaDatabase::load(&lookup.db)
                .with_context(|| format!("failed to load {}", lookup.db.display()))?;
            let results = mz_to_formula(&db, mz, &adduct, tolerance(&lookup), lookup.halogen, lookup.dbe_cutoff)?;
            print_results(&results);
            Ok(())
        }
    }
}

fn tolerance(args: &LookupArgs) -> MzTolerance {
    MzTolerance::new(args.tol, !args.da)
}

fn run_adduct(adduct: &str, pos_mode: bool, strict: bool) -> Result<()> {
    let parsed = AdductRule::parse(Some(adduct), pos_mode);
    let rule = if strict { parsed.into_strict()? } else { parsed.into_lenient() };

    println!("{}", rule);
    println!("net formula: {}", rule.net_formula.elements);
    match &rule.loss_formula {
        Some(loss) => println!("loss formula: {}", loss),
        None => println!("loss formula: none"),
    }
    Ok(())
}

fn run_formula(formula: &str, charge: i32) -> Result<()> {
    let elements: ElementVector = formula.parse().with_context(|| format!("invalid formula {}", formula))?;
    let formula = Formula::new(elements, charge);
    println!("formula: {}", formula);
    if charge == 0 {
        println!("mass: {:.6}", formula.mass);
    } else {
        println!("m/z: {:.6}", formula.mz()?);
    }
    println!("dbe: {}", formula.dbe);
    Ok(())
}

fn run_config(instrument: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let config = match (instrument, file) {
        (_, Some(path)) => {
            let text = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<AnnotationConfig>(&text)?.validated()
        }
        (Some(name), None) => AnnotationConfig::for_instrument(&name)?,
        (None, None) => AnnotationConfig::default().validated(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn run_db_pack(input: PathBuf, output: PathBuf, compress: bool) -> Result<()> {
    let text = fs::read_to_string(&input).with_context(|| format!("failed to read {}", input.display()))?;
    let vectors = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.parse::<ElementVector>().with_context(|| format!("invalid formula {}", line)))
        .collect::<Result<Vec<_>>>()?;

    info!("packing {} formulas from {}", vectors.len(), input.display());
    FormulaDatabase::from_element_vectors(vectors).save(&output, compress)?;
    Ok(())
}

fn print_results(results: &[FormulaResult]) {
    println!("formula\tmass\tmass_error");
    for r in results {
        println!("{}\t{:.6}\t{:.6}", r.formula, r.mass, r.mass_error);
    }
}
