//! skillctl - CLI client for skilld
//!
//! Sends bus requests to a running skill manager.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod client;

use clap::{Parser, Subcommand};
use client::{Client, Reply};
use eyre::WrapErr;
use serde_json::Value;
use skill_core::config::DEFAULT_PORT;
use skill_core::protocol::{ProcessInfo, SkillRequest};

/// CLI client for the skilld skill manager.
#[derive(Parser)]
#[command(name = "skillctl")]
#[command(about = "Install, remove and inspect skills managed by skilld")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7810)
    #[arg(long, global = true, env = "SKILLD_ADDR")]
    addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install (or upgrade) a skill package and start it
    Add {
        /// Package identifier, e.g. owner/repo
        pkg: String,
    },

    /// Send a chat message as the communication relay would
    Msg {
        /// Message text, e.g. "/install owner/repo"
        text: String,

        /// Routing data echoed back on replies (JSON)
        #[arg(long)]
        addl: Option<String>,
    },

    /// Stop and delete an installed user skill
    Remove {
        /// Skill name as listed by `skillctl list`
        name: String,
    },

    /// List running skills
    List,
}

fn to_request(command: Command) -> eyre::Result<SkillRequest> {
    Ok(match command {
        Command::Add { pkg } => SkillRequest::Add { pkg: Some(pkg) },
        Command::Msg { text, addl } => {
            let addl = addl
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .wrap_err("--addl must be valid JSON")?;
            SkillRequest::Msg {
                msg: Some(text),
                addl,
            }
        }
        Command::Remove { name } => SkillRequest::Remove { name: Some(name) },
        Command::List => SkillRequest::List,
    })
}

/// Render a process list as aligned columns.
fn render_processes(processes: &[ProcessInfo]) -> String {
    if processes.is_empty() {
        return "no skills running".to_string();
    }
    let width = processes
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = format!("{:<width$}  {:>7}  LOG\n", "NAME", "PID");
    for p in processes {
        let pid = p.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string());
        out.push_str(&format!("{:<width$}  {:>7}  {}\n", p.name, pid, p.log_path));
    }
    out.trim_end().to_string()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "ok".to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

async fn run(cli: Cli) -> eyre::Result<()> {
    let addr = cli
        .addr
        .unwrap_or_else(|| format!("http://127.0.0.1:{DEFAULT_PORT}"));
    let client = Client::new(&addr);
    client.wait_for_ready().await?;

    let is_list = matches!(cli.command, Command::List);
    let request = to_request(cli.command)?;

    match client.send(&request).await? {
        Reply::Declined => println!("not a skill command"),
        Reply::Result(value) if is_list => {
            let processes: Vec<ProcessInfo> =
                serde_json::from_value(value).wrap_err("unexpected list reply")?;
            println!("{}", render_processes(&processes));
        }
        Reply::Result(value) => println!("{}", render_value(&value)),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn msg_with_addl_builds_chat_request() {
        let request = to_request(Command::Msg {
            text: "/install acme/greeter".into(),
            addl: Some(r#"{"chan":"cli"}"#.into()),
        })
        .unwrap();
        assert_eq!(
            serde_json::to_value(request).unwrap(),
            json!({ "type": "msg", "msg": "/install acme/greeter", "addl": { "chan": "cli" } })
        );
    }

    #[test]
    fn invalid_addl_is_rejected() {
        let result = to_request(Command::Msg {
            text: "hi".into(),
            addl: Some("{nope".into()),
        });
        assert!(result.is_err());
    }

    #[test]
    fn process_table_is_aligned() {
        let table = render_processes(&[
            ProcessInfo {
                name: "acme-greeter".into(),
                pid: Some(4242),
                log_path: "/logs/acme-greeter.log".into(),
            },
            ProcessInfo {
                name: "clock".into(),
                pid: None,
                log_path: "/logs/clock.log".into(),
            },
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "NAME              PID  LOG");
        assert_eq!(lines[1], "acme-greeter     4242  /logs/acme-greeter.log");
        assert_eq!(lines[2], "clock               -  /logs/clock.log");
    }

    #[test]
    fn empty_process_list() {
        assert_eq!(render_processes(&[]), "no skills running");
    }

    #[test]
    fn string_results_print_plainly() {
        assert_eq!(render_value(&json!("Request received")), "Request received");
        assert_eq!(render_value(&Value::Null), "ok");
    }
}
