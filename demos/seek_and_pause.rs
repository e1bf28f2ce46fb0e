//! Drives an M2TS file halfway, pauses for a second, then seeks to the
//! midpoint and resumes, printing the engine's reported length and the
//! pre-seek position returned by `set_position`.
//!
//! ```sh
//! cargo run --example seek_and_pause -- path/to/recording.m2ts
//! ```

use std::env;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use tsreplay::queue::PopOutcome;
use tsreplay::{Engine, EngineConfig};

fn main() -> ExitCode {
    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: seek_and_pause <path-to-m2ts-file>");
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

    println!("stream length: {} ms", engine.length());

    let control = thread::spawn({
        let pre_seek = Duration::from_secs(2);
        move || {
            thread::sleep(pre_seek);
            engine.pause(true);
            thread::sleep(Duration::from_secs(1));
            let pre_seek_position = engine.set_position(engine.length() / 2);
            println!("seeking to midpoint; was at {pre_seek_position} ms");
            engine.pause(false);
            engine
        }
    });

    let mut forwarded = 0u64;
    while let Ok(outcome) = consumer.pop() {
        match outcome {
            PopOutcome::Payload(_) => forwarded += 1,
            PopOutcome::Eof => break,
        }
    }

    let mut engine = control.join().expect("control thread panicked");
    engine.stop();
    println!("forwarded {forwarded} packets total");
    ExitCode::SUCCESS
}
