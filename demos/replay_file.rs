//! Replays a TS/M2TS file at broadcast pace and prints a running count of
//! payloads forwarded, until EOF or Ctrl-C.
//!
//! ```sh
//! cargo run --example replay_file -- path/to/recording.ts
//! ```

use std::env;
use std::process::ExitCode;

use tsreplay::queue::PopOutcome;
use tsreplay::{Engine, EngineConfig};

fn main() -> ExitCode {
    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: replay_file <path-to-ts-or-m2ts-file>");
        return ExitCode::FAILURE;
    };

    let config = EngineConfig::new(&path);
    let (mut engine, mut consumer) = match Engine::start(config) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("failed to start engine: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut forwarded = 0u64;
    loop {
        match consumer.pop() {
            Ok(PopOutcome::Payload(_packet)) => {
                forwarded += 1;
                if forwarded % 1000 == 0 {
                    println!("forwarded {forwarded} packets");
                }
            }
            Ok(PopOutcome::Eof) => {
                println!("end of stream after {forwarded} packets");
                break;
            }
            Err(e) => {
                eprintln!("consumer error: {e}");
                break;
            }
        }
    }

    engine.stop();
    ExitCode::SUCCESS
}
