mod monitor;
mod operator;

use anyhow::Result;
use console::style;
use std::sync::Arc;

use vigil::core::agent::{AgentRunner, DemoStrategy};
use vigil::core::config::VigilConfig;
use vigil::core::network::{ClashApi, ControlPlane, FailoverController};
use vigil::core::notify::{Notifier, WebhookNotifier};
use vigil::core::page::HttpPage;
use vigil::core::recovery::RecoveryManager;
use vigil::core::remote::RemoteControl;
use vigil::core::subscription::SubscriptionUpdater;
use vigil::core::terminal::{self, GuideSection};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Agent")
        .command("run", "Run the automation loop (default)")
        .command("monitor [once]", "Watch proxy health and fail over when needed")
        .print();

    GuideSection::new("Operator")
        .command("subscribe", "Fetch the subscription and reload the proxy")
        .command("status", "Show network and subscription status")
        .command("command <name>", "Queue a remote command for the agent")
        .command("pause", "Pause the agent loop")
        .command("resume", "Resume a paused agent loop")
        .print();

    println!(
        "\n {} {} <command> [args]\n",
        style("Usage:").bold(),
        style("vigil").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    Run,
    Monitor { once: bool },
    Subscribe,
    Status,
    Command(String),
    Pause,
    Resume,
    Help,
}

pub(crate) fn parse_cli_args(args: &[String]) -> Result<CliCommand, String> {
    let cmd = args.get(1).map(String::as_str).unwrap_or("run");
    match cmd {
        "run" => Ok(CliCommand::Run),
        "monitor" => {
            let once = args[2..].iter().any(|a| a == "once" || a == "--once");
            Ok(CliCommand::Monitor { once })
        }
        "subscribe" | "update" => Ok(CliCommand::Subscribe),
        "status" => Ok(CliCommand::Status),
        "command" | "cmd" => match args.get(2).map(|s| s.trim()) {
            Some(name) if !name.is_empty() => Ok(CliCommand::Command(name.to_string())),
            _ => Err("command name is required, e.g. 'vigil command update_subscribe'.".into()),
        },
        "pause" => Ok(CliCommand::Pause),
        "resume" => Ok(CliCommand::Resume),
        "help" | "--help" | "-h" => Ok(CliCommand::Help),
        other => Err(format!("Unknown command: {}", other)),
    }
}

fn control_plane(config: &VigilConfig) -> Arc<dyn ControlPlane> {
    Arc::new(ClashApi::new(config.api_url(), config.proxy.secret.clone()))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    run_with_args(&args).await
}

pub(crate) async fn run_with_args(args: &[String]) -> Result<()> {
    let command = match parse_cli_args(args) {
        Ok(command) => command,
        Err(msg) => {
            print_help();
            anyhow::bail!(msg);
        }
    };
    if command == CliCommand::Help {
        print_help();
        return Ok(());
    }

    let config = VigilConfig::from_env()?;
    let log_file = matches!(command, CliCommand::Run | CliCommand::Monitor { .. })
        .then(|| config.log_file());
    vigil::logging::init(&config.log_level, log_file.as_deref());

    let remote = RemoteControl::from_config(&config);
    match command {
        CliCommand::Run => run_agent(config).await,
        CliCommand::Monitor { once } => {
            let failover = FailoverController::new(control_plane(&config), config.proxy.group.clone());
            monitor::run_monitor(&failover, once).await
        }
        CliCommand::Subscribe => {
            let updater = SubscriptionUpdater::from_config(control_plane(&config), &config);
            operator::subscribe(&updater).await
        }
        CliCommand::Status => {
            let failover = FailoverController::new(control_plane(&config), config.proxy.group.clone());
            operator::status(&config, &failover, &remote).await
        }
        CliCommand::Command(name) => operator::send_command(&remote, &name),
        CliCommand::Pause => operator::pause(&remote),
        CliCommand::Resume => operator::resume(&remote),
        CliCommand::Help => Ok(()),
    }
}

async fn run_agent(config: VigilConfig) -> Result<()> {
    terminal::print_banner();
    terminal::print_status("Target", &config.target_url);
    terminal::print_status("Control plane", &config.api_url());
    terminal::print_status("Work dir", &config.work_dir.display().to_string());

    let plane = control_plane(&config);
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(config.notify_webhook.clone()));
    let updater = Arc::new(SubscriptionUpdater::from_config(plane.clone(), &config));
    let remote = RemoteControl::from_config(&config).with_updater(updater);
    let failover = FailoverController::new(plane, config.proxy.group.clone());
    let recovery = RecoveryManager::new(notifier.clone());

    let mut runner = AgentRunner::new(
        config,
        Arc::new(HttpPage::new()?),
        Box::new(DemoStrategy::default()),
        failover,
        remote,
        recovery,
        notifier,
    );
    runner.run().await?;
    terminal::print_goodbye();
    Ok(())
}
