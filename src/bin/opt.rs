use std::{io::Read, path::PathBuf};

use anyhow::anyhow;
use stain_ir::{
    register_known_passes,
    taint::{report_to_string, run_taint_analysis, TaintConfig},
    PassGroup, PassManager, CONDMERGE_NAME, PRINT_MERGE_EDGES_NAME,
};

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut pass_mgr = PassManager::default();
    register_known_passes(&mut pass_mgr);

    let opts = Opts::parse(std::env::args().skip(1), &pass_mgr)?;

    let input = match &opts.input_path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let mut ir = stain_ir::parser::parse(&input)?;

    for step in &opts.steps {
        match step {
            Step::Pass(name) => {
                let mut group = PassGroup::default();
                group.append_pass(*name);
                pass_mgr.run(&mut ir, &group)?;
            }
            Step::Taint => {
                let taint_config = TaintConfig {
                    sources_and_sinks: opts
                        .sources_and_sinks
                        .clone()
                        .ok_or_else(|| anyhow!("the taint step needs --sources-and-sinks <path>"))?,
                    taint_copiers: opts
                        .taint_copiers
                        .clone()
                        .ok_or_else(|| anyhow!("the taint step needs --taint-copiers <path>"))?,
                    wrappers: opts.wrappers.clone(),
                };
                for module in ir.module_iter() {
                    let analysis = run_taint_analysis(&ir, module, &taint_config)?;
                    print!("{}", report_to_string(&analysis, &ir, module));
                }
            }
        }
    }

    let printed = String::from(ir);
    match &opts.output_path {
        Some(path) => std::fs::write(path, printed)?,
        None => println!("{printed}"),
    }

    Ok(())
}

enum Step {
    Pass(&'static str),
    Taint,
}

#[derive(Default)]
struct Opts {
    input_path: Option<PathBuf>,
    output_path: Option<PathBuf>,

    sources_and_sinks: Option<PathBuf>,
    taint_copiers: Option<PathBuf>,
    wrappers: Option<PathBuf>,

    steps: Vec<Step>,
}

impl Opts {
    /// Walk the arguments left to right.  Steps run in the order they were
    /// given, so they are kept as a list rather than folded into flags.
    fn parse(
        mut args: impl Iterator<Item = String>,
        pass_mgr: &PassManager,
    ) -> Result<Opts, anyhow::Error> {
        let mut opts = Opts::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-i" => opts.input_path = Some(next_path(&mut args, "-i")?),
                "-o" => opts.output_path = Some(next_path(&mut args, "-o")?),
                "--sources-and-sinks" => {
                    opts.sources_and_sinks = Some(next_path(&mut args, "--sources-and-sinks")?)
                }
                "--taint-copiers" => {
                    opts.taint_copiers = Some(next_path(&mut args, "--taint-copiers")?)
                }
                "--wrappers" => opts.wrappers = Some(next_path(&mut args, "--wrappers")?),
                "condmerge" => opts.steps.push(Step::Pass(CONDMERGE_NAME)),
                "print-merge-edges" => opts.steps.push(Step::Pass(PRINT_MERGE_EDGES_NAME)),
                "taint" => opts.steps.push(Step::Taint),
                other if other.starts_with('-') => {
                    return Err(anyhow!("unrecognised option '{other}'"))
                }
                other => {
                    return Err(anyhow!(
                        "unrecognised pass name '{other}'\n\n{}",
                        pass_mgr.help_text()
                    ))
                }
            }
        }
        Ok(opts)
    }
}

fn next_path(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<PathBuf, anyhow::Error> {
    args.next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("{flag} needs a path argument"))
}
