use std::path::PathBuf;

use autobolt::{
    geometry::{GeoScriptExporter, SolidExporter},
    input::load_request,
    mesher::GmshMesher,
    pipeline::{build_assembly, Analysis},
    solver::ConjugateGradientSolver,
    AutoboltError,
};
use clap::Parser;
use log::{error, info};

/// Computes the factor of safety of a two-plate bolted assembly
#[derive(Parser, Debug)]
#[command(name = "autobolt", version, about)]
struct Args {
    /// Analysis request json
    request: PathBuf,

    /// Also write the assembly geometry script to this path
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write nodes.csv and elements.csv into this directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn run(args: &Args) -> Result<(), AutoboltError> {
    let request = load_request(&args.request)?;
    let solid = build_assembly(&request.parameters)?;

    if let Some(path) = &args.export {
        GeoScriptExporter.export(&solid, path)?;
        info!("exported assembly to {}", path.display());
    }

    let mut analysis = Analysis::with_stages(
        GeoScriptExporter,
        GmshMesher::new(request.mesh.clone().sized_for(&solid)),
        ConjugateGradientSolver::new(request.solver.clone()),
    )
    .with_classifier_tolerance(request.classifier_tolerance);
    if let Some(dir) = &args.output_dir {
        analysis = analysis.with_output_dir(dir);
    }

    let result = analysis.run(
        &solid,
        &request.material,
        request.yield_strength,
        &request.traction,
    )?;

    println!("max von Mises stress: {:.6e} Pa", result.max_von_mises_stress);
    if result.is_unbounded() {
        println!("factor of safety: unbounded (part carries no stress)");
    } else {
        println!("factor of safety: {:.4}", result.factor_of_safety);
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        error!("{err}");
        std::process::exit(1);
    }
}
