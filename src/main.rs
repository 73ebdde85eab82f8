//! Switchboard CLI
//!
//! 用法：switchboard [--config PATH] [--channel sms|chat|web] [--json] MESSAGE...
//! 未给出 MESSAGE 时从 stdin 读取。默认只打印回复文本，--json 打印完整编排结果。

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use switchboard::agent::{create_agent_components, process_message};
use switchboard::config::load_config;
use switchboard::memory::ConversationMemory;
use switchboard::plan::{Channel, UserProfile};

struct CliArgs {
    config: Option<PathBuf>,
    channel: Channel,
    json: bool,
    message: Vec<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs {
        config: None,
        channel: Channel::default(),
        json: false,
        message: Vec::new(),
    };
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--channel" => {
                let value = args.next().context("--channel requires a value")?;
                parsed.channel = value.parse().map_err(anyhow::Error::msg)?;
            }
            "--json" => parsed.json = true,
            "--" => {
                parsed.message.extend(args.by_ref());
            }
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            _ => parsed.message.push(arg),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    switchboard::observability::init();

    let args = parse_args(std::env::args().skip(1))?;
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;

    let message = if args.message.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read message from stdin")?;
        buf
    } else {
        args.message.join(" ")
    };
    let message = message.trim();
    if message.is_empty() {
        bail!("empty message");
    }

    let components = create_agent_components(cfg);
    let mut conversation = ConversationMemory::new(components.config.app.max_context_turns);
    let profile = UserProfile {
        channel: args.channel,
        ..UserProfile::default()
    };

    let result = process_message(&components, &mut conversation, profile, Vec::new(), message).await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?
        );
    } else {
        println!("{}", result.response);
    }
    Ok(())
}
