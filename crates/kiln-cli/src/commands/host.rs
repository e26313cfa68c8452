//! Host command - host a unit interactively with optional hot reload.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use kiln_config::Config;
use kiln_host::{
    ContainerNotice, HostContainer, HostError, HostEvent, InputEvent, OpenHistory, Pipeline,
    ReloadOrchestrator, Surface,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::config_bridge;
use crate::history::RecentHistory;
use crate::theme::Theme;

/// Size of the surface `p` paints into.
const SURFACE_WIDTH: u32 = 320;
const SURFACE_HEIGHT: u32 = 240;

const HELP: &str = "commands: r reload | w toggle auto-reload | p paint | c <x> <y> click | \
                    k <code> key | s status | h help | q quit";

/// One line of interactive input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShellCommand {
    Reload,
    ToggleWatch,
    Paint,
    Input(InputEvent),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ShellCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let mut number = |what: &str| -> Result<i32, String> {
        let word = words
            .next()
            .ok_or_else(|| format!("missing {what}"))?;
        word.parse::<i32>()
            .map_err(|_| format!("{what} must be an integer, got '{word}'"))
    };
    let command = match head {
        "r" | "reload" => ShellCommand::Reload,
        "w" | "watch" => ShellCommand::ToggleWatch,
        "p" | "paint" => ShellCommand::Paint,
        "c" | "click" => {
            let x = number("x")?;
            let y = number("y")?;
            ShellCommand::Input(InputEvent::Click { x, y })
        },
        "k" | "key" => ShellCommand::Input(InputEvent::Key {
            code: number("key code")?,
        }),
        "s" | "status" => ShellCommand::Status,
        "h" | "help" | "?" => ShellCommand::Help,
        "q" | "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(command))
}

/// Host the unit at `root` until the user quits.
pub(crate) async fn run_host(
    root: &Path,
    cfg: &Config,
    watch: bool,
    history: Arc<RecentHistory>,
) -> anyhow::Result<()> {
    let mut reload_config = config_bridge::to_reload_config(cfg);
    reload_config.auto_reload |= watch;
    let mut watching = reload_config.auto_reload;

    let pipeline = Arc::new(Pipeline::new(reload_config.descriptor.clone())?);
    let (orchestrator, handle, mut events) = ReloadOrchestrator::new(
        reload_config,
        pipeline,
        Some(history as Arc<dyn OpenHistory>),
    );
    let actor = tokio::spawn(orchestrator.run());

    match handle.load_unit(root).await {
        Ok(unit) => {
            println!(
                "\n{}",
                Theme::header(&format!("Hosting {}::{}", unit.identity(), unit.entry_point()))
            );
            println!("{}", Theme::dimmed(&unit.root().display().to_string()));
            println!("{}", Theme::dimmed(HELP));
            println!("{}", Theme::separator());
        },
        Err(e) => {
            print_error(&e);
            handle.shutdown().await;
            let _ = actor.await;
            return Ok(());
        },
    }

    let container = handle.container();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let HostEvent::WatchStatus { watching: now, .. } = &event {
                    watching = *now;
                }
                if let Some(text) = render_event(&event) {
                    println!("{text}");
                }
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(None) => {},
                    Ok(Some(ShellCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = execute(command, &handle, &container, &mut watching).await {
                            print_error(&e);
                        }
                    },
                    Err(message) => println!("{}", Theme::warning(&message)),
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    let _ = actor.await;
    println!("{}", Theme::dimmed("bye"));
    Ok(())
}

async fn execute(
    command: ShellCommand,
    handle: &kiln_host::OrchestratorHandle,
    container: &Arc<Mutex<HostContainer>>,
    watching: &mut bool,
) -> Result<(), HostError> {
    match command {
        ShellCommand::Reload => handle.reload().await?,
        ShellCommand::ToggleWatch => {
            *watching = !*watching;
            handle.set_auto_reload(*watching).await?;
        },
        ShellCommand::Paint => {
            let mut surface = Surface::new(SURFACE_WIDTH, SURFACE_HEIGHT);
            let notices = {
                let mut guard = container.lock().unwrap_or_else(PoisonError::into_inner);
                guard.paint(&mut surface);
                guard.take_notices()
            };
            println!("{}", render_surface(&surface));
            print_notices(&notices);
        },
        ShellCommand::Input(event) => {
            let (consumed, notices) = {
                let mut guard = container.lock().unwrap_or_else(PoisonError::into_inner);
                let consumed = guard.dispatch(event);
                (consumed, guard.take_notices())
            };
            let verdict = if consumed { "handled" } else { "ignored" };
            println!("{}", Theme::info(&format!("{event:?} {verdict}")));
            print_notices(&notices);
        },
        ShellCommand::Status => {
            let guard = container.lock().unwrap_or_else(PoisonError::into_inner);
            let hosted = guard.hosted().map_or_else(
                || "nothing hosted".to_owned(),
                |info| format!("{} (#{})", info.display_name, info.serial),
            );
            println!("{}", Theme::info(&hosted));
            println!(
                "{}",
                Theme::info(&format!(
                    "auto-reload {}",
                    if *watching { "on" } else { "off" }
                ))
            );
            if let Some(message) = guard.error_message() {
                println!("{}", Theme::warning(message));
            }
        },
        ShellCommand::Help => println!("{}", Theme::dimmed(HELP)),
        ShellCommand::Quit => {},
    }
    Ok(())
}

fn print_notices(notices: &[ContainerNotice]) {
    for notice in notices {
        println!("{}", render_notice(notice));
    }
}

fn print_error(error: &HostError) {
    if error.diagnostics().is_empty() {
        println!("{}", Theme::error(&error.to_string()));
    }
    for diagnostic in error.diagnostics() {
        println!("{}", Theme::diagnostic(&diagnostic.to_string()));
    }
}

fn render_surface(surface: &Surface) -> String {
    let mut text = format!(
        "surface {}x{} fill #{:06X}",
        surface.width, surface.height, surface.fill
    );
    if let Some(overlay) = &surface.overlay {
        text.push_str(&format!(" \"{overlay}\""));
    }
    Theme::info(&text)
}

fn render_notice(notice: &ContainerNotice) -> String {
    match notice {
        ContainerNotice::Hosted(info) => {
            Theme::success(&format!("hosting {} (#{})", info.display_name, info.serial))
        },
        ContainerNotice::Cleared => Theme::dimmed("container cleared"),
        ContainerNotice::Faulted {
            display_name,
            message,
        } => Theme::warning(&format!("{display_name} faulted: {message}")),
        ContainerNotice::InstantiationFailed { diagnostic } => Theme::diagnostic(diagnostic),
    }
}

/// Text for an orchestrator event, or `None` for events only worth logging.
fn render_event(event: &HostEvent) -> Option<String> {
    let text = match event {
        HostEvent::Progress { percent, message, .. } => Theme::progress(*percent, message),
        HostEvent::Preflight { ok: true, message, .. } => Theme::success(message),
        HostEvent::Preflight { ok: false, .. } => return None,
        HostEvent::Completed { ok: true, hosted, .. } => match hosted {
            Some(info) => Theme::success(&format!(
                "reloaded {} (#{})",
                info.display_name, info.serial
            )),
            None => Theme::success("validation complete"),
        },
        HostEvent::Completed { ok: false, message, .. } => Theme::diagnostic(message),
        HostEvent::Container(notice) => render_notice(notice),
        HostEvent::StateChanged(state) => {
            debug!(%state, "Reload state");
            return None;
        },
        HostEvent::WatchStatus { watching: true, files } => {
            Theme::info(&format!("watching {files} file(s)"))
        },
        HostEvent::WatchStatus { watching: false, .. } => Theme::info("auto-reload off"),
        HostEvent::FileChanged { path } => {
            Theme::dimmed(&format!("changed: {}", path.display()))
        },
    };
    Some(text)
}
