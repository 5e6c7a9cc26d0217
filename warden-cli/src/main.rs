use clap::Parser;
use std::{
    io::Write,
    path::PathBuf,
    time::Duration,
};
use warden::{Cmd, Ward};

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    about = "Run a command under supervision, streaming its output as it arrives"
)]
struct Opt {
    /// Command to run. One shell line with --shell, an argv otherwise.
    #[arg(required = true)]
    cmd: Vec<String>,

    /// Run the command through /bin/sh -c
    #[arg(short, long)]
    shell: bool,

    /// Give up when no output arrives for this many seconds
    #[arg(long, value_name = "SECONDS")]
    chunk_timeout: Option<f64>,

    /// Give up when the whole run exceeds this many seconds
    #[arg(long, value_name = "SECONDS")]
    total_timeout: Option<f64>,

    /// Connect the child's stdin to a pseudo-terminal slave
    #[arg(long)]
    pty: bool,

    /// Working directory for the child
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Bytes requested per read syscall
    #[arg(long, default_value_t = 4096)]
    read_chunk: usize,

    /// Line to write to the child's stdin after start (repeatable)
    #[arg(short = 'i', long = "send", value_name = "LINE")]
    send: Vec<String>,

    /// Emit observations as JSON lines instead of raw bytes
    #[arg(long)]
    json: bool,

    /// Skip the host capability check
    #[arg(long)]
    skip_system_check: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = Opt::parse();

    if !opt.skip_system_check {
        let mut res = warden::CheckResult::new();
        warden::check(&mut res);
        if res.has_errors() {
            eprintln!("{}", res);
        }
    }

    let cmd = if opt.shell {
        Cmd::from(opt.cmd.join(" "))
    } else {
        Cmd::from(opt.cmd.clone())
    };
    let mut ward = Ward::new(cmd)
        .shell(opt.shell)
        .read_chunk(opt.read_chunk)
        .stdin_terminal(opt.pty);
    if let Some(dir) = &opt.cwd {
        ward = ward.current_dir(dir.clone());
    }

    ward.start()?;
    for line in &opt.send {
        ward.send_stdin(format!("{}\n", line).as_bytes())?;
    }

    let run = ward.iterate(
        opt.chunk_timeout.map(Duration::from_secs_f64),
        opt.total_timeout.map(Duration::from_secs_f64),
    )?;
    for item in run {
        match item {
            Ok(obs) => report(&obs, opt.json)?,
            Err(err) => {
                // The child is still running after a timeout; do not
                // leave it behind.
                let _ = ward.kill();
                return Err(err.into());
            }
        }
    }

    // Exit like the child exited; the shell convention for signal deaths
    // is 128 + signal number.
    let code = match ward.return_code() {
        Some(code) if code >= 0 => code,
        Some(code) => 128 - code,
        None => 1,
    };
    std::process::exit(code);
}

fn report(obs: &warden::Observation, json: bool) -> anyhow::Result<()> {
    if json {
        let line = serde_json::json!({
            "stdout": String::from_utf8_lossy(&obs.stdout),
            "stderr": String::from_utf8_lossy(&obs.stderr),
        });
        println!("{}", line);
        return Ok(());
    }
    if !obs.stdout.is_empty() {
        let mut out = std::io::stdout();
        out.write_all(&obs.stdout)?;
        out.flush()?;
    }
    if !obs.stderr.is_empty() {
        let mut err = std::io::stderr();
        err.write_all(&obs.stderr)?;
        err.flush()?;
    }
    Ok(())
}
