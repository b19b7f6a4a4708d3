use std::path::PathBuf;

use reelfeed::app::RunOptions;

fn main() {
    let Some(options) = handle_cli_flags() else {
        return;
    };

    if let Err(err) = reelfeed::app::run_with(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Parses flags. `None` means a flag was fully handled and the program
/// should exit.
fn handle_cli_flags() -> Option<RunOptions> {
    let mut options = RunOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("reelfeed {}", reelfeed::VERSION);
                return None;
            }
            "--help" | "-h" => {
                println!(
                    "reelfeed - Browse location-tagged short videos from the terminal.\n\n  --version, -V          Show version and exit\n  --help,    -h          Show this help message\n  --headless             Print the first page of the feed and exit\n  --config,  -c <path>   Read configuration from <path>"
                );
                return None;
            }
            "--headless" => options.headless = true,
            "--config" | "-c" => match args.next() {
                Some(path) => options.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: {arg} needs a path");
                    std::process::exit(2);
                }
            },
            other => {
                eprintln!("error: unknown argument {other} (see --help)");
                std::process::exit(2);
            }
        }
    }
    Some(options)
}
