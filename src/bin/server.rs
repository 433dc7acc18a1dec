use std::env;
use std::path::Path;
use std::process::ExitCode;

use filestored::{logging, server};

fn main() -> ExitCode {
	logging::init();

	let args: Vec<String> = env::args().collect();
	if args.len() != 2 {
		eprintln!("Usage: {} <path-to-config.txt>", args.get(0).map(String::as_str).unwrap_or("filestored"));
		return ExitCode::FAILURE;
	}

	match server::run(Path::new(&args[1])) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("server error: {err}");
			ExitCode::FAILURE
		}
	}
}
