//! Terminal page simulation.
//!
//! Runs a [`PageController`] against a surface that prints overlays instead
//! of drawing them. Input lines on stdin stand in for the page:
//!
//! - `d` doomscroll detected
//! - `h` / `v` page hidden / visible
//! - `c` / `t` / `b` reminder answer: continue, timer only, block
//! - `q` quit
//!
//! A reload request loads the same URL again, so a finished escalation
//! shows the block page on the next load.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use clap::Args;
use scrollguard_core::error::RenderError;
use scrollguard_core::surface::NodeId;
use scrollguard_core::{
    run_page, Config, Database, KvTimeManager, ListClassifier, OverlayId, OverlayKind,
    OverlayView, PageController, PageExit, PageInput, ReminderChoice, Surface, TimeManager,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::CommandResult;

#[derive(Args)]
pub struct SimulateArgs {
    /// Page URL or hostname
    url: String,
    /// Keep blocks and news time in memory instead of the shared database
    #[arg(long)]
    memory: bool,
    /// Start with the page hidden
    #[arg(long)]
    hidden: bool,
    /// Number of original page nodes
    #[arg(long, default_value = "12")]
    nodes: u64,
}

struct TerminalState {
    mounted: BTreeMap<OverlayId, OverlayKind>,
    attached: Vec<NodeId>,
    last_view: BTreeMap<OverlayId, OverlayView>,
}

/// Surface that prints every visible change to stdout.
struct TerminalSurface {
    next_overlay: AtomicU64,
    reloads: AtomicU64,
    state: Mutex<TerminalState>,
}

impl TerminalSurface {
    fn new(nodes: u64) -> Self {
        Self {
            next_overlay: AtomicU64::new(1),
            reloads: AtomicU64::new(0),
            state: Mutex::new(TerminalState {
                mounted: BTreeMap::new(),
                attached: (1..=nodes).collect(),
                last_view: BTreeMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TerminalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset the page for a fresh load.
    fn reload_page(&self, nodes: u64) {
        let mut state = self.state();
        state.mounted.clear();
        state.last_view.clear();
        state.attached = (1..=nodes).collect();
    }
}

fn describe(view: &OverlayView) -> Option<String> {
    match view {
        // Only the "on" phase of a flash is worth a line.
        OverlayView::Flash { visible: false } => None,
        OverlayView::Flash { visible: true } => Some("!! you are doomscrolling !!".to_string()),
        OverlayView::Countdown {
            message,
            seconds_left,
        } => Some(format!("{message} {seconds_left}")),
        OverlayView::Blocked { target, remaining } => {
            Some(format!("{target} is blocked, {remaining} left"))
        }
        OverlayView::Reminder {
            hostname,
            minutes_since_last,
        } => Some(format!(
            "You've been on {hostname} for {minutes_since_last} min. \
             [c]ontinue, [t]imer only, [b]lock?"
        )),
    }
}

impl Surface for TerminalSurface {
    fn mount_overlay(&self, kind: OverlayKind) -> Result<OverlayId, RenderError> {
        let id = OverlayId(self.next_overlay.fetch_add(1, Ordering::SeqCst));
        self.state().mounted.insert(id, kind);
        println!("[{id}] {kind:?} overlay");
        Ok(id)
    }

    fn render(&self, overlay: OverlayId, view: &OverlayView) -> Result<(), RenderError> {
        let mut state = self.state();
        if !state.mounted.contains_key(&overlay) {
            return Err(RenderError::UnknownOverlay(overlay.0));
        }
        if state.last_view.get(&overlay) == Some(view) {
            return Ok(());
        }
        state.last_view.insert(overlay, view.clone());
        if let Some(line) = describe(view) {
            println!("[{overlay}] {line}");
        }
        Ok(())
    }

    fn remove_overlay(&self, overlay: OverlayId) -> Result<(), RenderError> {
        let mut state = self.state();
        if state.mounted.remove(&overlay).is_none() {
            return Err(RenderError::UnknownOverlay(overlay.0));
        }
        state.last_view.remove(&overlay);
        println!("[{overlay}] removed");
        Ok(())
    }

    fn set_content_opacity(&self, opacity: f32) -> Result<(), RenderError> {
        println!("page opacity {:.0}%", opacity.clamp(0.0, 1.0) * 100.0);
        Ok(())
    }

    fn detach_page_content(&self) -> Result<Vec<NodeId>, RenderError> {
        let nodes = std::mem::take(&mut self.state().attached);
        if !nodes.is_empty() {
            println!("page content removed ({} nodes)", nodes.len());
        }
        Ok(nodes)
    }

    fn request_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        println!("-- reload --");
    }
}

fn parse_input(line: &str) -> Option<PageInput> {
    match line {
        "d" => Some(PageInput::Detected),
        "h" => Some(PageInput::Visibility(false)),
        "v" => Some(PageInput::Visibility(true)),
        "c" => Some(PageInput::Choice(ReminderChoice::Continue)),
        "t" => Some(PageInput::Choice(ReminderChoice::TimerOnly)),
        "b" => Some(PageInput::Choice(ReminderChoice::Block)),
        "q" => Some(PageInput::Shutdown),
        _ => None,
    }
}

fn spawn_stdin_reader(tx: mpsc::Sender<PageInput>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(input) = parse_input(line) else {
                eprintln!("unknown input '{line}' (d, h, v, c, t, b, q)");
                continue;
            };
            if tx.send(input).await.is_err() || input == PageInput::Shutdown {
                break;
            }
        }
    });
}

pub async fn run(args: SimulateArgs) -> CommandResult {
    let config = Config::load_or_default();
    let times: Arc<dyn TimeManager> = if args.memory {
        Arc::new(KvTimeManager::from_config(Database::open_memory()?, &config))
    } else {
        Arc::new(KvTimeManager::from_config(Database::open()?, &config))
    };
    let classifier = ListClassifier::from_config(&config.sites);
    let surface = Arc::new(TerminalSurface::new(args.nodes));

    let (tx, mut rx) = mpsc::channel(16);
    spawn_stdin_reader(tx);

    let mut visible = !args.hidden;
    loop {
        let mut page = PageController::for_url(
            &args.url,
            &classifier,
            &config,
            surface.clone(),
            times.clone(),
        )?;
        println!("loaded {} ({:?})", page.hostname(), page.site());
        page.load(Utc::now(), visible).await?;

        let exit = run_page(&mut page, &mut rx, |events| {
            for event in events {
                match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::warn!("Unprintable event {:?}: {}", event, e),
                }
            }
        })
        .await?;

        match exit {
            PageExit::Reload => {
                surface.reload_page(args.nodes);
                // A reloaded page comes back in the foreground.
                visible = true;
            }
            PageExit::Shutdown | PageExit::InputClosed => break,
        }
    }

    tracing::debug!("{} reloads", surface.reloads.load(Ordering::SeqCst));
    Ok(())
}
