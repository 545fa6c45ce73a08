//! Mock TCP target for manual scenario runs and integration testing
//!
//! Accepts connections on a local port and answers every read. Echoes by
//! default; `--reply`/`--reply-hex` answer with fixed bytes instead and
//! `--hang-up` closes the connection on the first read.

use clap::Parser;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

#[derive(Parser)]
#[command(name = "mock-target", about = "TCP responder for tcp-scenario")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind; 0 picks a free port
    #[arg(long, short, default_value = "0")]
    port: u16,

    /// Answer every read with this text
    #[arg(long, conflicts_with = "reply_hex")]
    reply: Option<String>,

    /// Answer every read with these hex-encoded bytes
    #[arg(long)]
    reply_hex: Option<String>,

    /// Close each connection on its first read without answering
    #[arg(long)]
    hang_up: bool,
}

#[derive(Clone)]
enum Mode {
    Echo,
    Reply(Vec<u8>),
    HangUp,
}

fn main() {
    let args = Args::parse();

    let mode = if args.hang_up {
        Mode::HangUp
    } else if let Some(text) = args.reply {
        Mode::Reply(text.into_bytes())
    } else if let Some(encoded) = args.reply_hex {
        match hex::decode(encoded.trim()) {
            Ok(bytes) => Mode::Reply(bytes),
            Err(e) => {
                eprintln!("Error: invalid --reply-hex: {e}");
                std::process::exit(2);
            }
        }
    } else {
        Mode::Echo
    };

    let listener = match TcpListener::bind((args.host.as_str(), args.port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: cannot bind {}:{}: {e}", args.host, args.port);
            std::process::exit(1);
        }
    };

    // First stdout line is read by tests to discover the port
    match listener.local_addr() {
        Ok(addr) => println!("listening on {addr}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
    std::io::stdout().flush().ok();

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let mode = mode.clone();
                std::thread::spawn(move || serve(stream, &mode));
            }
            Err(e) => eprintln!("accept failed: {e}"),
        }
    }
}

fn serve(mut stream: TcpStream, mode: &Mode) {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };

        let written = match mode {
            Mode::Echo => stream.write_all(&buf[..n]),
            Mode::Reply(bytes) => stream.write_all(bytes),
            Mode::HangUp => return,
        };
        if written.is_err() {
            return;
        }
    }
}
