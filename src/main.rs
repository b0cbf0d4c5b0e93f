use anyhow::{bail, Context, Result};
use clap::Parser;
use jsonrunner::pool::ThreadPool;
use jsonrunner::proc::{self, RunOpts};
use jsonrunner::report::Counters;
use jsonrunner::runner::{self, Test, TestResults};
use jsonrunner::runtime::Runtime;
use jsonrunner::strings::{counter_width, repr};
use jsonrunner::{commands, env, loader, presets, project};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "jsonrunner")]
#[command(about = "A declarative end-to-end test runner for command-line programs")]
#[command(version)]
struct Cli {
    /// CMake preset supplying the binary dir and build type
    #[arg(long, value_name = "NAME")]
    preset: String,

    /// Test directory, relative to the project's datasets root
    #[arg(long, value_name = "DIR")]
    tests: String,

    /// Only run tests with these ordinal indices
    #[arg(long, value_name = "ID")]
    run: Vec<usize>,

    /// Print command logs and prepared output even on success
    #[arg(long)]
    debug: bool,

    /// Reset each test's "expected" value to null and exit
    #[arg(long)]
    nullify: bool,

    /// With --nullify, also pin each test's "lang"
    #[arg(long, value_name = "ID")]
    lang: Option<String>,

    /// Keep per-test temp directories around
    #[arg(long)]
    keep_dirs: bool,

    /// Insert or refresh "$schema" in each test document
    #[arg(long, value_name = "URL")]
    schema: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match tool(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("\x1b[1;31merror: {err:#}\x1b[m");
            ExitCode::FAILURE
        }
    }
}

/// Stage the target: wipe and refill the staging prefix via
/// `cmake --install`, then run the project's extra installer lines.
fn install(
    copy_dir: &Path,
    binary_dir: &Path,
    build_type: &str,
    rt: &mut Runtime,
    info: &project::ProjectInfo,
) -> Result<()> {
    if !commands::rmtree(copy_dir) {
        bail!("cannot clear {}", copy_dir.display());
    }
    std::fs::create_dir_all(copy_dir)
        .with_context(|| format!("cannot create {}", copy_dir.display()))?;

    let base_args = vec![
        "--install".to_string(),
        binary_dir.display().to_string(),
        "--config".to_string(),
        build_type.to_string(),
        "--prefix".to_string(),
        copy_dir.display().to_string(),
    ];

    let component_runs: Vec<Vec<String>> = if info.install_components.is_empty() {
        vec![base_args.clone()]
    } else {
        info.install_components
            .iter()
            .map(|component| {
                let mut args = base_args.clone();
                args.push("--component".to_string());
                args.push(component.clone());
                args
            })
            .collect()
    };

    for args in &component_runs {
        let code = proc::call(RunOpts {
            args,
            ..RunOpts::new(Path::new("cmake"))
        });
        if code != 0 {
            bail!("cmake --install exited with {code}");
        }
    }

    rt.rt_target = copy_dir
        .join("bin")
        .join(rt.target.file_name().unwrap_or_default());

    for line in &info.installer {
        let Some((exec, args)) = line.split_first() else {
            continue;
        };
        let mut args = args.to_vec();
        args.push(copy_dir.display().to_string());
        let code = proc::call(RunOpts {
            args: &args,
            ..RunOpts::new(Path::new(exec))
        });
        if code != 0 {
            bail!("installer step `{exec}` exited with {code}");
        }
    }

    Ok(())
}

fn banner(rt: &Runtime, test_set_dir: &Path, info: &project::ProjectInfo) {
    let mut label_size = 10;
    for var in info.environment.keys() {
        label_size = label_size.max(var.len() + 1);
    }
    let mk_label = |label: &str, prefix: &str| {
        format!(
            "{prefix}{label}:{:width$}",
            ' ',
            width = label_size + 1 - (label.len() + prefix.len())
        )
    };

    println!(
        "{}{} {}",
        mk_label("target", ""),
        rt.target.display(),
        rt.version
    );
    println!("{}{}", mk_label("tests", ""), test_set_dir.display());
    for (var, value) in &info.environment {
        println!("{}{}", mk_label(var, "$"), value);
    }
    println!(
        "{}{}",
        mk_label("INST", "$"),
        rt.rt_target.parent().unwrap_or(Path::new("")).display()
    );
    println!("{}{}", mk_label("TMP", "$"), rt.temp_dir.display());
    if !info.common_patches.0.is_empty() {
        println!("common patches:");
        for (expr, replacement) in &info.common_patches.0 {
            println!("  - {} -> {}", repr(expr), repr(replacement));
        }
    }
}

fn report_and_cleanup(
    counters: &mut Counters,
    results: TestResults,
    keep_dirs: bool,
    debug: bool,
) {
    counters.report(
        &results.outcome,
        &results.ident,
        results.report.as_deref().unwrap_or(""),
        &results.prepare_log,
        debug,
    );
    if !keep_dirs {
        commands::rmtree(&results.temp_dir);
    }
}

fn tool(cli: Cli) -> Result<bool> {
    let info = project::ProjectInfo::load(Path::new(project::PROJECT_FILE))
        .context("cannot load the project description")?;

    let presets = presets::load_file(Path::new("CMakePresets.json"))?;
    let Some(preset) = presets.get(&cli.preset) else {
        bail!("preset `{}` is not found", cli.preset);
    };
    let Some(binary_dir) = preset.get_binary_dir(&presets) else {
        bail!("preset `{}` has no binaryDir attached to it", cli.preset);
    };
    let Some(build_type) = preset.get_build_type(&presets) else {
        bail!("preset `{}` has no CMAKE_BUILD_TYPE attached to it", cli.preset);
    };

    let test_dir = std::path::absolute(&info.datasets_dir)
        .with_context(|| format!("cannot resolve {}", info.datasets_dir))?;
    let mut tests_arg = cli.tests.clone();
    if let Some(default_dataset) = &info.default_dataset {
        if !test_dir.join(&tests_arg).is_dir()
            && test_dir.join(default_dataset).join(&tests_arg).is_dir()
        {
            tests_arg = format!("{default_dataset}/{tests_arg}");
        }
    }
    let test_set_dir = test_dir.join(&tests_arg);

    let target = binary_dir
        .join("bin")
        .join(format!("{}{}", info.target, std::env::consts::EXE_SUFFIX));
    if !target.is_file() {
        bail!(
            "cannot find {} in `{}`",
            info.target,
            binary_dir.join("bin").display()
        );
    }

    let quiet = cli.nullify;
    let discovery = loader::discover(
        &test_set_dir,
        &cli.run,
        cli.schema.as_deref(),
        |ordinal, path, err| match err {
            Some(err) => eprintln!("{}: {err}", path.display()),
            None if !quiet => println!("{ordinal}: {}", path.display()),
            None => {}
        },
    );

    if cli.nullify {
        for mut data in discovery.tests {
            data.nullify(cli.lang.as_deref());
        }
        return Ok(true);
    }

    let variables = Arc::new(env::get_env());
    let mut rt = Runtime {
        target,
        rt_target: PathBuf::new(),
        build_dir: binary_dir.clone(),
        temp_dir: std::env::temp_dir().join("jsonrunner"),
        version: presets::project_version(Path::new("CMakeLists.txt")),
        counter_total: discovery.unfiltered_count,
        counter_digits: counter_width(discovery.unfiltered_count),
        handlers: Arc::new(info.handlers()),
        variables: Arc::clone(&variables),
        project_env: Arc::new(info.environment.clone()),
        common_patches: Arc::new(info.common_patches.0.clone()),
        reportable_vars: Arc::new(info.reportable_vars.clone()),
        debug: cli.debug,
    };

    let copy_dir = std::path::absolute("build/.jsonrunner")?;
    install(&copy_dir, &binary_dir, &build_type, &mut rt, &info)
        .context("staging the target failed")?;

    banner(&rt, &test_set_dir, &info);

    let tests: Vec<Test> = discovery.tests.into_iter().map(Test::new).collect();
    let total = tests.len();
    let mut counters = Counters::default();

    let run_linear = variables.get("RUN_LINEAR").is_some_and(|value| value != "0");

    let mut linear_tests = Vec::new();
    if run_linear {
        linear_tests = tests;
    } else {
        let pool = ThreadPool::new();
        let mut results = Vec::new();
        for test in tests {
            if test.data.linear {
                linear_tests.push(test);
                continue;
            }
            let rt = rt.clone();
            let vars = Arc::clone(&variables);
            let mut test = test;
            results.push(pool.push(move || runner::execute(&mut test, &vars, &rt)));
        }

        for rx in results {
            match rx.recv() {
                Ok(results) => {
                    report_and_cleanup(&mut counters, results, cli.keep_dirs, cli.debug)
                }
                Err(_) => eprintln!("\x1b[1;31merror: a test worker died\x1b[m"),
            }
        }
    }

    for mut test in linear_tests {
        let results = runner::execute(&mut test, &variables, &rt);
        report_and_cleanup(&mut counters, results, cli.keep_dirs, cli.debug);
    }

    Ok(counters.summary(total))
}
