use anyhow::{Context, Result};
use blockmirror_config::Config;
use blockmirror_engine::sync::open_page;
use blockmirror_engine::{
    Document, FileCache, InMemoryRemote, Plan, RecordNode, SyncHandle, SyncOptions, SyncSession,
};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

mod diff;

#[derive(Parser, Debug)]
#[command(name = "blockmirror")]
#[command(about = "Edit a block document as plain text and sync the changes back")]
#[command(version)]
struct Cli {
    /// Config file to use instead of ~/.config/blockmirror/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a page in its editable text form
    Render {
        /// Page export (JSON with page_id, title and records)
        page: PathBuf,
    },
    /// Show what syncing an edited text would do
    Plan {
        page: PathBuf,
        /// The rendered text after editing
        edited: PathBuf,
        /// Print the full plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply an edited text to an in-memory copy of the page and write the result
    Sync {
        page: PathBuf,
        edited: PathBuf,
        /// Where to write the updated page export (stdout when omitted)
        #[arg(long, short)]
        out: Option<PathBuf>,
        /// Apply deletions and unmatched lines without asking
        #[arg(long, short)]
        yes: bool,
    },
}

/// A page as exported from the remote service
#[derive(Debug, Serialize, Deserialize)]
struct PageFile {
    page_id: String,
    title: String,
    #[serde(default)]
    records: Vec<RecordNode>,
}

impl PageFile {
    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading page export {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing page export {}", path.display()))
    }

    fn remote(&self) -> InMemoryRemote {
        let remote = InMemoryRemote::new();
        remote.add_page(&self.page_id, &self.title, self.records.clone());
        remote
    }
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?
            .with_context(|| format!("config file {} does not exist", path.display()))?,
        None => Config::load()?,
    };
    log::debug!("using {config:?}");

    match cli.command {
        Command::Render { page } => render(&page, &config),
        Command::Plan { page, edited, json } => plan(&page, &edited, json, &config),
        Command::Sync {
            page,
            edited,
            out,
            yes,
        } => sync(&page, &edited, out.as_deref(), yes, &config),
    }
}

fn render(page: &Path, config: &Config) -> Result<()> {
    let page = PageFile::read(page)?;
    let session = SyncSession::open(
        page.page_id,
        page.title,
        &page.records,
        Document::default(),
        config.sync_options(),
    )?;
    if !session.editability().is_fully_editable() {
        eprintln!("{}", session.editability().describe());
    }
    print!("{}", session.text());
    Ok(())
}

fn plan(page: &Path, edited: &Path, json: bool, config: &Config) -> Result<()> {
    let page = PageFile::read(page)?;
    let mut session = SyncSession::open(
        page.page_id,
        page.title,
        &page.records,
        Document::default(),
        config.sync_options(),
    )?;
    apply_edits(&mut session, edited)?;
    let plan = session.preview();
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn sync(page: &Path, edited: &Path, out: Option<&Path>, yes: bool, config: &Config) -> Result<()> {
    let page = PageFile::read(page)?;
    let remote = page.remote();
    let options: SyncOptions = config.sync_options();
    let cache = config.cache_dir.as_ref().map(FileCache::new);

    futures::executor::block_on(async {
        let mut session = open_page(
            &remote,
            cache.as_ref(),
            &page.page_id,
            Document::default(),
            options,
        )
        .await?;
        apply_edits(&mut session, edited)?;

        let handle = SyncHandle::new(session);
        let report = handle
            .sync(&remote, |plan| {
                print_plan(plan);
                yes || confirm()
            })
            .await?;

        eprintln!("{report}");
        for failed in &report.failed {
            eprintln!(
                "  {} {} failed: {}{}",
                failed.operation,
                failed.block_id,
                failed.error,
                if failed.retryable { " (retryable)" } else { "" }
            );
        }

        let updated = PageFile {
            title: page.title.clone(),
            records: remote.tree(&page.page_id),
            page_id: page.page_id.clone(),
        };
        let content = serde_json::to_string_pretty(&updated)?;
        match out {
            Some(path) => std::fs::write(path, content)
                .with_context(|| format!("writing {}", path.display()))?,
            None => println!("{content}"),
        }
        anyhow::Ok(())
    })
}

/// Replay the edited file against the rendered text, then re-parse everything.
fn apply_edits(session: &mut SyncSession, edited: &Path) -> Result<()> {
    let new_text = std::fs::read_to_string(edited)
        .with_context(|| format!("reading edited text {}", edited.display()))?;
    let new_lines: Vec<String> = new_text.lines().map(str::to_string).collect();
    for cmd in diff::line_commands(&session.lines(), &new_lines) {
        session.apply(cmd);
    }
    session.leave_edit_mode();
    Ok(())
}

fn print_plan(plan: &Plan) {
    eprintln!("{}", plan.summary());
    for op in &plan.updates {
        eprintln!("  update {}: {:?}", op.block_id, op.content);
    }
    for op in &plan.type_changes {
        eprintln!(
            "  type change {}: {} -> {}{}",
            op.block_id,
            op.old_type,
            op.new_type,
            if op.has_children { " (children re-created)" } else { "" }
        );
    }
    for op in &plan.deletes {
        eprintln!("  delete {} ({}): {:?}", op.block_id, op.block_type, op.content);
    }
    for op in &plan.creates {
        let place = match (&op.parent_block_id, &op.after_block_id) {
            (Some(parent), _) => format!("under {parent}"),
            (None, Some(after)) => format!("after {after}"),
            (None, None) => "at the top".to_string(),
        };
        eprintln!("  create {} {}: {:?}", op.kind, place, op.content);
    }
    for unmatched in &plan.unmatched {
        eprintln!(
            "  unmatched lines {}..{}: {} ({:?})",
            unmatched.lines.start + 1,
            unmatched.lines.end,
            unmatched.reason,
            unmatched.text
        );
    }
}

fn confirm() -> bool {
    eprint!("Apply these changes? [y/N] ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}
