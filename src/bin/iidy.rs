use std::{env, path::PathBuf, process::ExitCode};

use iidy::{render_json, render_yaml, transform_from_path};

#[derive(Clone, Copy, Debug)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Debug)]
struct RenderOptions {
    pretty: bool,
    format: OutputFormat,
}

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    if args.len() < 3 {
        return Err("not enough arguments".to_string());
    }

    let command = args[1].as_str();
    let file = PathBuf::from(&args[2]);

    match command {
        "render" => {
            let options = parse_render_options(&args[3..])?;
            run_render(&file, &options)
        }
        "validate" => {
            if let Some(extra) = args.get(3) {
                return Err(format!("unknown option '{extra}'"));
            }
            transform_from_path(&file).map_err(|e| e.to_string())?;
            println!("OK");
            Ok(())
        }
        _ => Err(format!("unknown command '{command}'")),
    }
}

fn run_render(file: &PathBuf, options: &RenderOptions) -> Result<(), String> {
    let doc = transform_from_path(file).map_err(|e| e.to_string())?;
    let output = match options.format {
        OutputFormat::Yaml => render_yaml(&doc),
        OutputFormat::Json => render_json(&doc, options.pretty),
    }
    .map_err(|e| e.to_string())?;
    println!("{output}");
    Ok(())
}

fn parse_render_options(args: &[String]) -> Result<RenderOptions, String> {
    let mut pretty = false;
    let mut format = OutputFormat::Yaml;
    let mut i = 0usize;

    while i < args.len() {
        match args[i].as_str() {
            "--pretty" => {
                pretty = true;
                i += 1;
            }
            "--yaml" => {
                format = OutputFormat::Yaml;
                i += 1;
            }
            "--json" => {
                format = OutputFormat::Json;
                i += 1;
            }
            "--format" => {
                if i + 1 >= args.len() {
                    return Err("missing value for --format (expected yaml or json)".to_string());
                }
                format = match args[i + 1].as_str() {
                    "yaml" => OutputFormat::Yaml,
                    "json" => OutputFormat::Json,
                    other => {
                        return Err(format!(
                            "invalid --format value '{other}' (expected yaml or json)"
                        ))
                    }
                };
                i += 2;
            }
            other => {
                return Err(format!("unknown option '{other}'"));
            }
        }
    }

    Ok(RenderOptions { pretty, format })
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  iidy render <file> [--format yaml|json] [--pretty]");
    eprintln!("  iidy render <file> [--yaml|--json]");
    eprintln!("  iidy validate <file>");
}
