use anyhow::{Context as _, Result};
use check_diag::d_process::register_ctrlc_handler;
use check_diag::prelude::*;
use check_diag::{Cli, CompilerTestCase, TestContext, TestOutcome};
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::init();
    }
    register_ctrlc_handler()?;

    let dialect = cli.dialect.resolve();
    let options_override = cli
        .options
        .as_deref()
        .map(|opts| opts.split_whitespace().map(str::to_string).collect());

    let mut failures = 0usize;
    for source in &cli.sources {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "test".into());
        let work_dir = PathBuf::from("build").join(&stem);
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("failed to create work directory {}", work_dir.display()))?;

        let mut cx = TestContext::new(&cli.compiler, &work_dir);
        cx.compiler_path = cli.compiler_path.clone();
        cx.options_override = options_override.clone();
        cx.timeout = cli.timeout;
        cx.host = cli.host.clone().unwrap_or_default();
        cx.target = cli.target.clone().unwrap_or_default();
        cx.library_dirs = cli.library_path.clone();

        let report = CompilerTestCase::from_file(source, dialect)
            .and_then(|test| test.run(&cx))
            .with_context(|| format!("error while testing {}", source.display()))?;

        println!("{}: {}", report.outcome, source.display());
        if cli.verbose {
            for (key, value) in &report.annotations {
                println!("  -- {key}:");
                for line in value.lines() {
                    println!("     {line}");
                }
            }
        }

        match report.outcome {
            TestOutcome::Pass => {
                // Keep the directory around on failure for post-mortems.
                let _ = fs::remove_dir_all(&work_dir);
            }
            TestOutcome::Fail(_) => failures += 1,
            TestOutcome::Skipped(_) => {
                let _ = fs::remove_dir_all(&work_dir);
            }
        }
    }

    if failures > 0 {
        error!("{failures} test(s) failed");
        std::process::exit(1);
    }
    Ok(())
}
