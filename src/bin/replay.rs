// Standalone replay tool for CopperHead robot debug logs
//
// Usage:
//   cargo run --bin replay -- <log_file> [options]
//
// Options:
//   --ticks <t1,t2>        Replay specific ticks (comma-separated)
//   --difficulty <N>       Replay at this difficulty instead of the logged one
//   --verbose              Show detailed output for each tick
//   --config <path>        Path to Robot.toml (default: Robot.toml)

use std::env;
use std::process;

use copperhead_robot::config::Config;
use copperhead_robot::difficulty::Difficulty;
use copperhead_robot::replay::ReplayEngine;

fn print_usage() {
    eprintln!("CopperHead Robot Replay Tool");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("  replay <log_file> [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("  --ticks <T1,T2,...>     Replay specific ticks (comma-separated)");
    eprintln!("  --difficulty <N>        Replay at difficulty N (1-10)");
    eprintln!("  --verbose               Show detailed output for each tick");
    eprintln!("  --config <path>         Path to Robot.toml (default: Robot.toml)");
    eprintln!("  --help                  Show this help message");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("  replay copperhead_debug.jsonl");
    eprintln!("  replay copperhead_debug.jsonl --ticks 5,10,15 --verbose");
    eprintln!("  replay copperhead_debug.jsonl --difficulty 10");
}

fn parse_ticks(s: &str) -> Result<Vec<u64>, String> {
    s.split(',')
        .map(|t| {
            t.trim()
                .parse::<u64>()
                .map_err(|e| format!("Invalid tick number '{}': {}", t, e))
        })
        .collect()
}

/// Value following a flag, or exit with an error
fn flag_value(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires an argument", flag);
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "--help") {
        print_usage();
        process::exit(if args.iter().any(|a| a == "--help") { 0 } else { 1 });
    }

    let log_file = &args[1];
    let mut config_path = "Robot.toml".to_string();
    let mut verbose = false;
    let mut ticks: Option<Vec<u64>> = None;
    let mut difficulty: Option<Difficulty> = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--ticks" => {
                let value = flag_value(&args, i, "--ticks");
                ticks = Some(parse_ticks(&value).unwrap_or_else(|e| {
                    eprintln!("Error parsing ticks: {}", e);
                    process::exit(1);
                }));
                i += 1;
            }
            "--difficulty" => {
                let value = flag_value(&args, i, "--difficulty");
                let parsed = value
                    .parse::<i64>()
                    .map_err(|e| e.to_string())
                    .and_then(|level| Difficulty::new(level).map_err(|e| e.to_string()));
                difficulty = Some(parsed.unwrap_or_else(|e| {
                    eprintln!("Error: invalid difficulty '{}': {}", value, e);
                    process::exit(2);
                }));
                i += 1;
            }
            "--config" => {
                config_path = flag_value(&args, i, "--config");
                i += 1;
            }
            "--verbose" => {
                verbose = true;
            }
            _ => {
                eprintln!("Error: Unknown option '{}'", args[i]);
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    let config = Config::from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from '{}': {}", config_path, e);
        eprintln!("Using default configuration");
        Config::default_hardcoded()
    });

    println!("Replay log file: {}", log_file);

    let engine = ReplayEngine::new(config, difficulty, verbose);

    let records = match engine.load_log_file(log_file) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error loading log file: {}", e);
            process::exit(1);
        }
    };

    if records.is_empty() {
        eprintln!("Error: Log file is empty");
        process::exit(1);
    }

    let results = match ticks {
        Some(ticks) => {
            println!("Replaying {} specific tick(s)...", ticks.len());
            engine.replay_ticks(&records, &ticks).unwrap_or_else(|e| {
                eprintln!("Error during replay: {}", e);
                process::exit(1);
            })
        }
        None => {
            println!("Replaying all {} ticks...", records.len());
            engine.replay_all(&records)
        }
    };

    engine.print_report(&results);
}
