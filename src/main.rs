//! Emulator CLI
//!
//! Loads a configuration, spawns a generated workload, runs it to
//! completion and prints a utilization report.
//!
//! # Output
//!
//! The report goes to stdout (plain text, or JSON with `--json`). With
//! `--report=<path>` the plain-text report is also written to that file.
//! Logs go to stderr.
//!
//! # Exit Codes
//!
//! - `0`: every process finished
//! - `1`: the run timed out before the workload finished
//! - `2`: invalid arguments or configuration error

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use log::LevelFilter;
use os_emu::logging::{parse_level, StderrLogger};
use os_emu::{Config, Emulator};

const DEFAULT_PROCESSES: u32 = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 600;

fn print_usage(exe: &str) {
    eprintln!(
        "usage: {exe} [OPTIONS]

OPTIONS:
    --config=<path>      Configuration file (key-value text, or JSON if *.json)
    --processes=<N>      Processes to spawn up front (default: {DEFAULT_PROCESSES})
    --batch-ms=<N>       Also spawn one process every batch-process-freq x N ms
                         until the up-front workload finishes
    --timeout-secs=<N>   Give up after N seconds (default: {DEFAULT_TIMEOUT_SECS})
    --seed=<N>           Workload seed (default: random)
    --report=<path>      Write the text report to <path>
    --json               Print the report as JSON
    --log=<level>        off|error|warn|info|debug|trace (default: $OS_EMU_LOG or warn)
    --help, -h           Show this help message"
    );
}

struct Args {
    config: Option<PathBuf>,
    processes: u32,
    batch_ms: Option<u64>,
    timeout: Duration,
    seed: Option<u64>,
    report: Option<PathBuf>,
    json: bool,
    log: LevelFilter,
}

fn bad_arg(exe: &str, msg: &str) -> ! {
    eprintln!("{msg}");
    print_usage(exe);
    std::process::exit(2);
}

fn parse_num<T: std::str::FromStr>(exe: &str, flag: &str, value: &str) -> T {
    value
        .parse()
        .unwrap_or_else(|_| bad_arg(exe, &format!("invalid {flag} value: {value}")))
}

fn parse_args() -> Args {
    let mut args = env::args();
    let exe = args.next().unwrap_or_else(|| "os-emu".into());
    let env_level = env::var("OS_EMU_LOG").ok().and_then(|s| parse_level(&s));
    let mut out = Args {
        config: None,
        processes: DEFAULT_PROCESSES,
        batch_ms: None,
        timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        seed: None,
        report: None,
        json: false,
        log: env_level.unwrap_or(LevelFilter::Warn),
    };

    for arg in args {
        if let Some(v) = arg.strip_prefix("--config=") {
            out.config = Some(PathBuf::from(v));
        } else if let Some(v) = arg.strip_prefix("--processes=") {
            out.processes = parse_num(&exe, "--processes", v);
        } else if let Some(v) = arg.strip_prefix("--batch-ms=") {
            let ms: u64 = parse_num(&exe, "--batch-ms", v);
            if ms == 0 {
                bad_arg(&exe, "--batch-ms must be >= 1");
            }
            out.batch_ms = Some(ms);
        } else if let Some(v) = arg.strip_prefix("--timeout-secs=") {
            out.timeout = Duration::from_secs(parse_num(&exe, "--timeout-secs", v));
        } else if let Some(v) = arg.strip_prefix("--seed=") {
            out.seed = Some(parse_num(&exe, "--seed", v));
        } else if let Some(v) = arg.strip_prefix("--report=") {
            out.report = Some(PathBuf::from(v));
        } else if let Some(v) = arg.strip_prefix("--log=") {
            out.log = parse_level(v).unwrap_or_else(|| bad_arg(&exe, &format!("invalid --log value: {v}")));
        } else {
            match arg.as_str() {
                "--json" => out.json = true,
                "--help" | "-h" => {
                    print_usage(&exe);
                    std::process::exit(0);
                }
                _ => bad_arg(&exe, &format!("unknown argument: {arg}")),
            }
        }
    }
    out
}

fn main() -> ExitCode {
    let args = parse_args();
    if StderrLogger::install(args.log).is_err() {
        eprintln!("logger already installed");
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::from(2);
            }
        },
        None => Config::default(),
    };

    let emulator = match args.seed {
        Some(seed) => Emulator::with_seed(&config, seed),
        None => Emulator::new(&config),
    };
    let emulator = match emulator {
        Ok(emu) => emu,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    for _ in 0..args.processes {
        if let Err(e) = emulator.spawn_generated() {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    }
    emulator.start();

    if let Some(ms) = args.batch_ms {
        emulator.start_batch(Duration::from_millis(ms));
        // Let the spawner run while the up-front workload drains.
        let drained = wait_for_initial(&emulator, args.processes as usize, args.timeout);
        emulator.stop_batch();
        if !drained {
            log::warn!("up-front workload did not finish before the timeout");
        }
    }

    let finished = emulator.wait_until_idle(args.timeout);
    let metrics = emulator.stop();
    log::info!(
        "run: {} instructions, {} slices, {} preemptions, {} deferrals",
        metrics.instructions_executed,
        metrics.slices,
        metrics.preemptions,
        metrics.alloc_failures
    );

    let report = emulator.report();
    if let Some(path) = &args.report {
        match report.write_to(path) {
            Ok(()) => eprintln!("Report generated at {}!", path.display()),
            Err(e) => eprintln!("cannot write report to {}: {e}", path.display()),
        }
    }
    if args.json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("cannot serialize report: {e}"),
        }
    } else {
        print!("{}", report.render());
    }

    if finished {
        ExitCode::SUCCESS
    } else {
        eprintln!("timed out after {:?} with unfinished processes", args.timeout);
        ExitCode::from(1)
    }
}

/// Wait until the first `n` submitted processes have finished.
fn wait_for_initial(emulator: &Emulator, n: usize, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let done = emulator
            .scheduler()
            .finished_processes()
            .iter()
            .filter(|pid| pid.0 as usize <= n)
            .count();
        if done >= n {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
