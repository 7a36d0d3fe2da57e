use anyhow::{bail, Context, Result};
use mrvpatcher::{PatchStatus, Patcher, PatcherOptions, SigningIdentity};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("\nError: {err:#}\n");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let mut inputs: Vec<PathBuf> = Vec::new();
    let mut options = PatcherOptions::default();
    let mut keystore: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => {
                options.output_dir = PathBuf::from(
                    args.next()
                        .context("`--output` requires a directory argument")?,
                );
            }
            "-f" | "--force" => options.force_overwrite = true,
            "-ks" | "--keystore" => {
                keystore = Some(PathBuf::from(
                    args.next().context("`--keystore` requires a path argument")?,
                ));
            }
            "-p" | "--patch" => options.force_patch = true,
            "-h" | "--help" => {
                usage();
                return Ok(ExitCode::SUCCESS);
            }
            _ if arg.starts_with('-') => bail!("unknown argument: {arg}"),
            _ => inputs.push(PathBuf::from(arg)),
        }
    }

    if inputs.is_empty() {
        eprintln!("\nError: Please provide apk files\n");
        usage();
        return Ok(ExitCode::FAILURE);
    }

    // Setup phase: unusable key material aborts before any input is read.
    let identity = match &keystore {
        Some(path) => SigningIdentity::from_path(path)
            .with_context(|| format!("Loading keystore `{}`", path.display()))?,
        None => SigningIdentity::bundled().context("Loading bundled keystore")?,
    };
    let patcher = Patcher::new(identity, options);

    let multiple = inputs.len() > 1;
    let mut summary: Vec<String> = Vec::new();
    let mut aborted = false;
    for input in &inputs {
        println!("\nSource: {}", input.display());
        let status = patcher.process(input);
        match &status {
            PatchStatus::Patched { output } => {
                println!(" -> patched");
                summary.push(format!("[patched] {}", relative(output)));
            }
            PatchStatus::Signed { output } => {
                println!(" -> resigned");
                summary.push(format!("[rsigned] {}", relative(output)));
            }
            PatchStatus::Skipped { cause } => {
                eprintln!("\nError: {cause}\n");
                if multiple {
                    println!("Skipping...");
                }
                summary.push(format!("[failed!] {}", input.display()));
            }
            PatchStatus::Failed { cause } => {
                eprintln!("\nError: {cause}\n");
                if multiple && !status.aborts_run() {
                    println!("Skipping...");
                }
                summary.push(format!("[failed!] {}", input.display()));
            }
        }
        if status.aborts_run() {
            println!("Aborting...");
            aborted = true;
            break;
        }
    }

    if summary.iter().any(|line| !line.starts_with("[failed!]")) {
        println!("\nOutput:");
        summary.sort();
        for line in &summary {
            println!(" {line}");
        }
        println!();
    }
    Ok(if aborted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn relative(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(&cwd).ok().map(Path::to_path_buf))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn usage() {
    println!(
        "Usage: mrvpatcher <apks...> [-o DIR] [-f] [-ks FILE] [-p]\n\
         \n\
         Options:\n\
           -o, --output DIR    Output directory (default: current directory)\n\
           -f, --force         Force overwrite existing output files\n\
           -ks, --keystore F   Sign with an external pem keystore file\n\
           -p, --patch         Patch forcibly, not just the default packages\n\
           -h, --help          Print this message"
    );
}
