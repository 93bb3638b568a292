//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use std::path::Path;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tome_core::persistence::{FileSessionStore, SessionPersistence};
use tome_core::research::{ChapterStatus, progress};
use tome_core::{
    PhaseResult, ResearchEngine, ResearchEvent, ResearchSession, RunStatus, SessionHandle,
    StartRequest, TomeConfig,
};
use uuid::Uuid;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    model: Option<&str>,
) -> anyhow::Result<()> {
    match command {
        Commands::Research {
            subject,
            chapters,
            json,
        } => {
            let engine = ResearchEngine::from_config(&load(workspace, model)?)?;
            let mut request = StartRequest::new(subject);
            if let Some(count) = chapters {
                request = request.with_chapters(count);
            }
            let handle = engine.start_session(request)?;
            follow(&handle, json).await
        }
        Commands::Resume { id, json } => {
            let engine = ResearchEngine::from_config(&load(workspace, model)?)?;
            let handle = engine.resume_session(id).await?;
            follow(&handle, json).await
        }
        Commands::Status { id } => handle_status(id, &load(workspace, model)?).await,
        Commands::List => handle_list(&load(workspace, model)?).await,
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path, model: Option<&str>) -> anyhow::Result<TomeConfig> {
    let mut config = tome_core::config::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = model {
        config.llm.model = model.to_string();
    }
    Ok(config)
}

fn store(config: &TomeConfig) -> FileSessionStore {
    FileSessionStore::new(config.storage.sessions_dir())
}

/// Print events until the session stops. The first Ctrl-C requests
/// cancellation; the runner stops once the in-flight phase finishes.
async fn follow(handle: &SessionHandle, json: bool) -> anyhow::Result<()> {
    let mut rx = handle.subscribe();
    if !json {
        println!("Session {}", handle.id());
        println!("{}", handle.progress());
    }

    let wait = handle.wait();
    tokio::pin!(wait);
    let mut cancelling = false;

    let status = loop {
        tokio::select! {
            status = &mut wait => break status,
            event = rx.recv() => match event {
                Ok(event) => print_event(&event, json),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged; progress lines were dropped");
                }
                Err(RecvError::Closed) => break (&mut wait).await,
            },
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                eprintln!("Cancelling after the current phase finishes...");
                handle.cancel();
            }
        }
    };

    // Events published just before the status flipped.
    loop {
        match rx.try_recv() {
            Ok(event) => print_event(&event, json),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    match status {
        RunStatus::Completed => {
            if !json {
                println!("Research complete: {}", handle.id());
            }
            Ok(())
        }
        RunStatus::Cancelled => {
            if !json {
                println!("Cancelled. Resume with: tome resume {}", handle.id());
            }
            Ok(())
        }
        RunStatus::Failed { message } => Err(anyhow::anyhow!(
            "{}\nResume with: tome resume {}",
            message,
            handle.id()
        )),
        RunStatus::Running => Err(anyhow::anyhow!("session stopped reporting while running")),
    }
}

fn print_event(event: &ResearchEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        }
        return;
    }
    match event {
        ResearchEvent::PersistenceWarning { .. } | ResearchEvent::Error { .. } => {
            eprintln!("{}", render_event(event));
        }
        _ => println!("{}", render_event(event)),
    }
}

/// Human-readable line(s) for one event.
fn render_event(event: &ResearchEvent) -> String {
    match event {
        ResearchEvent::Started { subject, progress, .. } => {
            format!("{} Started: {}", progress, subject)
        }
        ResearchEvent::PhaseCompleted {
            result: PhaseResult::Planning { chapters },
            progress,
            ..
        } => {
            let mut out = format!("{}", progress);
            for (i, chapter) in chapters.iter().enumerate() {
                out.push_str(&format!("\n       {}. {}", i + 1, chapter.title));
            }
            out
        }
        ResearchEvent::PhaseCompleted { progress, .. } => progress.to_string(),
        ResearchEvent::PersistenceWarning { phase, message, .. } => {
            format!("warning: could not save {} result: {}", phase, message)
        }
        ResearchEvent::Error { message, progress, .. } => {
            format!("error at {}: {}", progress, message)
        }
        ResearchEvent::Cancelled { progress, .. } => format!("{} Cancelled", progress),
    }
}

async fn handle_status(id: Uuid, config: &TomeConfig) -> anyhow::Result<()> {
    let store = store(config);
    let session = store.load_session(id).await?;
    let events = store.load_events(id).await?;
    print!("{}", render_status(&session));
    println!("Phase events: {}", events.len());
    Ok(())
}

fn render_status(session: &ResearchSession) -> String {
    let mut out = format!(
        "Session:  {}\nSubject:  {}\nProgress: {}\nUpdated:  {}\n",
        session.id,
        session.subject,
        progress(session),
        session.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if session.is_planned() {
        out.push_str(&format!(
            "Chapters: {}/{} written\n",
            session.completed_count, session.total_count
        ));
        for chapter in session.ordered_chapters() {
            let marker = match chapter.status {
                ChapterStatus::Completed => "x",
                ChapterStatus::Pending => " ",
                ChapterStatus::Researching | ChapterStatus::Writing => ">",
            };
            out.push_str(&format!(
                "  [{}] {} ({})\n",
                marker, chapter.title, chapter.status
            ));
        }
    }
    out
}

async fn handle_list(config: &TomeConfig) -> anyhow::Result<()> {
    let store = store(config);
    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions in {}", store.dir().display());
        return Ok(());
    }
    for session in &sessions {
        let p = progress(session);
        println!(
            "{}  {:>3}%  {:<18}  {}",
            session.id,
            p.percent,
            session.current_phase.to_string(),
            session.subject
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let (path, created) = tome_core::config::init_workspace_config(workspace)?;
            if created {
                println!("Created default configuration at: {}", path.display());
            } else {
                println!("Configuration file already exists at: {}", path.display());
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, None)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
