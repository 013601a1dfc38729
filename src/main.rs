// CLI entrypoint for asmf32.

use std::process;

use asmf32::assembler;

fn main() {
    match assembler::run() {
        Ok(report) => {
            for warning in report.warnings() {
                eprintln!("{}", warning.format());
            }
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}
