//! assuan-connect - talk to an Assuan server from the terminal
//!
//! Reads one command per line from stdin and prints what comes back.
//! `/bye` or end of input ends the session.

use anyhow::{bail, Context, Result};
use assuan_ipc::{Inquiries, IpcError, Session};
use assuan_util::default_socket_path;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// assuan-connect - interactive Assuan client
#[derive(Parser, Debug)]
#[command(name = "assuan-connect")]
#[command(about = "Send Assuan commands from stdin", long_about = None)]
struct Args {
    /// Socket path (or set ASSUAN_SOCKET env var)
    #[arg(short, long, env = "ASSUAN_SOCKET")]
    socket: Option<PathBuf>,

    /// Spawn this server and talk to it over its stdin/stdout (overrides --socket)
    #[arg(long, value_name = "PROGRAM")]
    exec: Option<PathBuf>,

    /// Arguments for the spawned server, after `--`
    #[arg(last = true)]
    exec_args: Vec<String>,

    /// Answer inquiries for KEY with VALUE (repeatable)
    #[arg(short, long = "inquire", value_name = "KEY=VALUE", value_parser = parse_inquiry)]
    inquiries: Vec<(String, String)>,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn parse_inquiry(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}

/// Split an input line into command and parameters.
fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, params)) => (command, params),
        None => (line, ""),
    }
}

fn build_inquiries(answers: &[(String, String)]) -> Inquiries {
    answers
        .iter()
        .fold(Inquiries::new(), |inq, (key, value)| {
            inq.with_bytes(key.clone(), value.clone().into_bytes())
        })
}

async fn repl<R, W>(mut session: Session<R, W>, answers: &[(String, String)]) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    println!("# {}", session.greeting());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("/bye") {
            break;
        }

        let (command, params) = split_command(line);
        let mut inquiries = build_inquiries(answers);
        match session.transact(command, params, &mut inquiries).await {
            Ok(data) => {
                if !data.is_empty() {
                    println!("{}", String::from_utf8_lossy(&data));
                }
                println!("OK");
            }
            Err(IpcError::Assuan(err)) => {
                println!("ERR {} {} <{}>", err.packed(), err.message, err.source_name);
            }
            Err(IpcError::MissingInquiryData(keyword)) => {
                println!("CAN (no --inquire answer for {})", keyword);
            }
            Err(IpcError::Proto(e)) if !e.is_transport() => {
                println!("# protocol error: {}", e);
            }
            Err(e) => return Err(e).context("Session failed"),
        }
    }

    debug!("Closing session");
    session.close().await.context("Failed to close session")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(program) = &args.exec {
        let mut command = Command::new(program);
        command.args(&args.exec_args);
        info!(program = %program.display(), "Spawning server");

        let (session, mut child) = Session::spawn(command)
            .await
            .with_context(|| format!("Failed to start {:?}", program))?;
        repl(session, &args.inquiries).await?;

        let status = child.wait().await.context("Failed to wait for server")?;
        if !status.success() {
            bail!("Server exited with {}", status);
        }
        return Ok(());
    }

    let socket_path = args.socket.clone().unwrap_or_else(default_socket_path);
    let session = Session::connect(&socket_path)
        .await
        .with_context(|| format!("Failed to connect to {:?}", socket_path))?;
    repl(session, &args.inquiries).await
}
