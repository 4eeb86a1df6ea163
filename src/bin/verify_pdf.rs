//! Verify the signatures of a PDF
//!
//! Prints the verification report as JSON.
//!
//! Usage:
//!   cargo run --release --bin verify_pdf -- signed.pdf
//!   cargo run --release --bin verify_pdf -- signed.pdf --password secret --offline

use pades_oxide::config::{RevocationMode, SignerConfig};
use pades_oxide::signatures::SignatureVerificationEngine;
use std::path::PathBuf;
use std::process::ExitCode;

struct VerifyConfig {
    path: PathBuf,
    password: Option<String>,
    offline: bool,
}

impl VerifyConfig {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let mut path = None;
        let mut password = None;
        let mut offline = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--password" | "-p" => {
                    i += 1;
                    password = Some(args.get(i).cloned().ok_or("--password needs a value")?);
                },
                "--offline" => offline = true,
                "--help" | "-h" => return Err(usage()),
                other if path.is_none() => path = Some(PathBuf::from(other)),
                other => return Err(format!("unexpected argument {}\n{}", other, usage())),
            }
            i += 1;
        }

        Ok(Self {
            path: path.ok_or_else(usage)?,
            password,
            offline,
        })
    }
}

fn usage() -> String {
    "usage: verify_pdf <file.pdf> [--password <pw>] [--offline]".to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = match VerifyConfig::from_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        },
    };

    let mut config = SignerConfig::new();
    if args.offline {
        config = config.with_revocation(RevocationMode::Offline);
    }
    let engine = match SignatureVerificationEngine::from_config(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("[{}] {}", e.code(), e);
            return ExitCode::FAILURE;
        },
    };

    match engine
        .verify_file(&args.path, args.password.as_deref().map(str::as_bytes))
        .await
    {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            },
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            },
        },
        Err(e) => {
            eprintln!("[{}] {}: {}", e.code(), args.path.display(), e);
            ExitCode::FAILURE
        },
    }
}
