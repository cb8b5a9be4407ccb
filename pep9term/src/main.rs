#[macro_use]
extern crate clap;

use clap::{Arg, SubCommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use pep9::constants;
use pep9::cpu::StepOutcome;

fn main() {
    let max_steps_help = format!(
        "The maximum number of steps executed before aborting. Defaults to {}",
        constants::DEFAULT_MAX_STEPS
    );
    let matches = app_from_crate!()
        .subcommand(
            SubCommand::with_name("asm")
                .about("Assemble a Pep/9 source code program")
                .arg(
                    Arg::with_name("source")
                        .short("s")
                        .takes_value(true)
                        .value_name("SOURCE")
                        .required(true)
                        .help("Input Pep/9 source program for the assembler"),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .takes_value(true)
                        .value_name("OBJECT")
                        .required(true)
                        .help("Output object code generated from the source"),
                ),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run an object code program")
                .arg(
                    Arg::with_name("source")
                        .short("s")
                        .takes_value(true)
                        .value_name("OBJECT")
                        .required(true)
                        .help("Input Pep/9 object code program for the simulator"),
                )
                .arg(
                    Arg::with_name("input")
                        .short("i")
                        .takes_value(true)
                        .value_name("CHARIN")
                        .help("File buffered behind the charIn port"),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .takes_value(true)
                        .value_name("CHAROUT")
                        .required(true)
                        .help("File the charOut port is written to"),
                )
                .arg(
                    Arg::with_name("max_steps")
                        .short("m")
                        .takes_value(true)
                        .value_name("MAX_STEPS")
                        .help(max_steps_help.as_str()),
                ),
        )
        .get_matches();

    let code = match matches.subcommand() {
        ("asm", Some(sub)) => run_asm(
            Path::new(sub.value_of("source").unwrap()),
            Path::new(sub.value_of("output").unwrap()),
        ),
        ("run", Some(sub)) => {
            let max_steps = match sub.value_of("max_steps") {
                Some(text) => match text.parse() {
                    Ok(value) => value,
                    Err(_) => {
                        eprintln!("Invalid maximum step count: {}", text);
                        process::exit(2);
                    }
                },
                None => constants::DEFAULT_MAX_STEPS,
            };
            run_run(
                Path::new(sub.value_of("source").unwrap()),
                sub.value_of("input").map(Path::new),
                Path::new(sub.value_of("output").unwrap()),
                max_steps,
            )
        }
        _ => {
            eprintln!("A mode is required: asm or run.");
            2
        }
    };
    process::exit(code);
}

fn run_asm(source_path: &Path, object_path: &Path) -> i32 {
    let source = match fs::read_to_string(source_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not open file: {}: {}", source_path.display(), err);
            return 2;
        }
    };
    let os = pep9term::build_operating_system();
    match pep9term::assemble_source(&source, &os) {
        Ok((program, warnings)) => {
            report_diagnostics(&source, &warnings);
            if let Err(err) = pepo::write_file(object_path, &program.object_code()) {
                eprintln!("Could not open file: {}: {}", object_path.display(), err);
                return 2;
            }
            0
        }
        Err(errors) => {
            report_diagnostics(&source, &errors);
            let log_path = error_log_path(source_path);
            let mut log = String::new();
            for error in &errors {
                log.push_str(&format!("{} {}\n", error.line, error.message));
            }
            if let Err(err) = fs::write(&log_path, log) {
                eprintln!("Could not open file: {}: {}", log_path.display(), err);
            }
            eprintln!(
                "Errors/warnings encountered while generating output for file: {}.",
                source_path.display()
            );
            1
        }
    }
}

fn run_run(
    object_path: &Path,
    input_path: Option<&Path>,
    output_path: &Path,
    max_steps: u64,
) -> i32 {
    let object = match pepo::read_file(object_path) {
        Ok(object) => object,
        Err(err) => {
            eprintln!("Could not open file: {}: {}", object_path.display(), err);
            return 2;
        }
    };
    // A missing input file behaves as an empty one.
    let input = input_path
        .and_then(|path| fs::read_to_string(path).ok())
        .unwrap_or_default();

    let os = pep9term::build_operating_system();
    let result = pep9term::run_object(&object, &input, max_steps, &os);

    let mut output = result.output;
    let code = match result.status {
        Ok(StepOutcome::Stopped) => 0,
        Ok(_) => 0,
        Err(err) => {
            // Mirror the error into the output stream so a grader sees it.
            output.extend(format!("[[{}]]", err).into_bytes());
            eprintln!("The CPU failed for the following reason: {}", err);
            1
        }
    };
    if let Err(err) = fs::write(output_path, &output) {
        eprintln!("Could not open file: {}: {}", output_path.display(), err);
        return 2;
    }
    code
}

fn report_diagnostics(source: &str, diagnostics: &[pasm::SourceError]) {
    let lines: Vec<&str> = source.lines().collect();
    for diagnostic in diagnostics {
        let text = lines
            .get(diagnostic.line as usize)
            .copied()
            .unwrap_or_default();
        eprintln!("{} {}", text, diagnostic.message);
    }
}

fn error_log_path(source_path: &Path) -> PathBuf {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string());
    source_path.with_file_name(format!("{}_errLog.txt", stem))
}
