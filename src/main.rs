mod backend;
mod ui;

use backend::cache::ImageCache;
use backend::prefetch::{FetchOutcome, ResolutionState, fetch_batches};
use backend::prefs::Preferences;
use backend::window::{ComicId, Window};
use backend::xkcd::{Comic, XkcdClient};
use image::DynamicImage;
use ui::ui::{App, AppState, FetchTarget, ui};

use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use env_logger::{Builder, Env};
use futures::StreamExt;
use log::warn;
use ratatui::{Terminal, backend::CrosstermBackend};
use std::collections::HashSet;
use std::{error::Error, io};
use tokio::sync::mpsc;

#[derive(clap::Parser)]
#[command(about = "Terminal viewer for xkcd comics")]
struct Args {
    /// Comic id to open at startup, instead of the last viewed one
    #[arg(short, long)]
    comic: Option<ComicId>,
}

enum BackgroundTask {
    LatestLoaded(Comic),
    ComicLoaded(Comic),
    ComicFailed(String),
    ImageLoaded { id: ComicId, image: DynamicImage },
    ListBatch(Vec<FetchOutcome>),
}

enum Nav {
    First,
    Prev,
    Next,
    Latest,
    Id(ComicId),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(Preferences::load());
    let client = XkcdClient::new();
    let cache = ImageCache::new();

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();

    app.set_loading("Fetching latest comic...");
    terminal.draw(|f| ui(f, &mut app))?;

    match client.fetch_latest().await {
        Ok(latest) => {
            app.latest_id = Some(latest.id);
            app.store.insert(latest.clone());

            let start = args
                .comic
                .or(app.prefs.last_viewed)
                .unwrap_or(latest.id)
                .clamp(1, latest.id);

            if start == latest.id {
                let _ = task_tx.send(BackgroundTask::ComicLoaded(latest));
            } else {
                app.set_loading("Fetching comic...");
                request_comic(&mut app, &client, FetchTarget::Id(start), &task_tx);
            }
        }
        Err(e) => {
            app.last_fetch = FetchTarget::Latest;
            app.set_error(e.to_string());
        }
    }

    let res = run_app(&mut terminal, &mut app, &client, &cache, &mut task_rx, task_tx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    client: &XkcdClient,
    cache: &ImageCache,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
    task_tx: mpsc::UnboundedSender<BackgroundTask>,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();
    // Comic ids whose image download is already underway.
    let mut pending_images: HashSet<ComicId> = HashSet::new();

    loop {
        app.expire_toast();
        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            // Tick so toasts expire and the spinner animates without input
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {}

            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if handle_key(app, key.code, client, cache, &mut pending_images, &task_tx) {
                        return Ok(());
                    }
                }
            }

            Some(task) = task_rx.recv() => {
                handle_task(app, task, client, cache, &mut pending_images, &task_tx);
            }
        }
    }
}

fn handle_task(
    app: &mut App,
    task: BackgroundTask,
    client: &XkcdClient,
    cache: &ImageCache,
    pending_images: &mut HashSet<ComicId>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    match task {
        BackgroundTask::LatestLoaded(comic) => {
            app.latest_id = Some(comic.id);
            app.store.insert(comic);
            if app.list_open {
                spawn_list_prefetch(app, client, task_tx);
            }
        }
        BackgroundTask::ComicLoaded(comic) => {
            app.fetching = false;
            app.set_ready();
            if app.last_fetch == FetchTarget::Latest {
                app.latest_id = Some(comic.id);
            }
            app.prefs.set_last_viewed(comic.id);
            app.store.insert(comic.clone());

            if !app.image_states.contains_key(&comic.id) && pending_images.insert(comic.id) {
                spawn_image_fetch(client, cache, comic.id, comic.image_url.clone(), task_tx);
            }

            app.current = Some(comic);

            if app.list_open {
                app.center_list_selection();
                spawn_list_prefetch(app, client, task_tx);
            }
        }
        BackgroundTask::ComicFailed(message) => {
            app.set_error(message);
        }
        BackgroundTask::ImageLoaded { id, image } => {
            pending_images.remove(&id);
            app.add_comic_image(id, image);
        }
        BackgroundTask::ListBatch(batch) => {
            app.store.apply(batch);
            // The selected entry may have just resolved; start its preview.
            if app.list_open {
                request_preview_image(app, client, cache, pending_images, task_tx);
            }
        }
    }
}

/// Returns true when the app should quit.
fn handle_key(
    app: &mut App,
    key: KeyCode,
    client: &XkcdClient,
    cache: &ImageCache,
    pending_images: &mut HashSet<ComicId>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> bool {
    if app.jump_input.is_some() {
        handle_jump_input(app, key, client, task_tx);
        return false;
    }

    if app.state == AppState::Error {
        return handle_error_input(app, key, client, task_tx);
    }

    if app.list_open {
        handle_list_input(app, key, client, cache, pending_images, task_tx)
    } else {
        handle_comic_input(app, key, client, cache, pending_images, task_tx)
    }
}

fn handle_jump_input(
    app: &mut App,
    key: KeyCode,
    client: &XkcdClient,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    match key {
        KeyCode::Char(c) if c.is_ascii_digit() => {
            if let Some(input) = app.jump_input.as_mut() {
                input.push(c);
            }
        }
        KeyCode::Backspace => {
            if let Some(input) = app.jump_input.as_mut() {
                input.pop();
            }
        }
        KeyCode::Enter => {
            let input = app.jump_input.take().unwrap_or_default();
            match input.trim().parse::<ComicId>() {
                Ok(id) if id > 0 => navigate(app, client, task_tx, Nav::Id(id)),
                _ => app.show_toast("Invalid comic id"),
            }
        }
        KeyCode::Esc => {
            app.jump_input = None;
        }
        _ => {}
    }
}

fn handle_error_input(
    app: &mut App,
    key: KeyCode,
    client: &XkcdClient,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> bool {
    match key {
        KeyCode::Char('q') => return true,
        KeyCode::Char('r') => {
            app.set_loading("Retrying...");
            request_comic(app, client, app.last_fetch, task_tx);
        }
        KeyCode::Char('G') => {
            app.set_loading("Fetching latest comic...");
            request_comic(app, client, FetchTarget::Latest, task_tx);
        }
        _ => {}
    }
    false
}

fn handle_list_input(
    app: &mut App,
    key: KeyCode,
    client: &XkcdClient,
    cache: &ImageCache,
    pending_images: &mut HashSet<ComicId>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> bool {
    let Some(window) = app.list_window() else {
        if matches!(key, KeyCode::Esc | KeyCode::Tab) {
            app.list_open = false;
        }
        return matches!(key, KeyCode::Char('q'));
    };
    let last_idx = (window.len() - 1) as usize;

    match key {
        KeyCode::Char('q') => return true,
        KeyCode::Up => {
            let sel = app.list_state.selected().unwrap_or(0);
            app.list_state.select(Some(sel.saturating_sub(1)));
            spawn_list_prefetch(app, client, task_tx);
            request_preview_image(app, client, cache, pending_images, task_tx);
        }
        KeyCode::Down => {
            let sel = app.list_state.selected().unwrap_or(0);
            app.list_state.select(Some((sel + 1).min(last_idx)));
            spawn_list_prefetch(app, client, task_tx);
            request_preview_image(app, client, cache, pending_images, task_tx);
        }
        KeyCode::PageUp => {
            let sel = app.list_state.selected().unwrap_or(0);
            app.list_state.select(Some(sel.saturating_sub(10)));
            spawn_list_prefetch(app, client, task_tx);
            request_preview_image(app, client, cache, pending_images, task_tx);
        }
        KeyCode::PageDown => {
            let sel = app.list_state.selected().unwrap_or(0);
            app.list_state.select(Some((sel + 10).min(last_idx)));
            spawn_list_prefetch(app, client, task_tx);
            request_preview_image(app, client, cache, pending_images, task_tx);
        }
        KeyCode::Enter => {
            if let Some(id) = app.selected_list_id() {
                navigate(app, client, task_tx, Nav::Id(id));
            }
        }
        KeyCode::Char('r') => {
            // Requeue the selected entry if its fetch failed.
            if let Some(id) = app.selected_list_id() {
                if app.store.state(id) == Some(ResolutionState::Failed) {
                    app.store.forget(id);
                    let ids = app.store.claim(Window { start: id, end: id });
                    spawn_batch_fetch(ids, client, task_tx);
                }
            }
        }
        KeyCode::Esc | KeyCode::Tab => {
            app.list_open = false;
        }
        _ => {}
    }
    false
}

fn handle_comic_input(
    app: &mut App,
    key: KeyCode,
    client: &XkcdClient,
    cache: &ImageCache,
    pending_images: &mut HashSet<ComicId>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> bool {
    match key {
        KeyCode::Char('q') => return true,
        KeyCode::Left | KeyCode::Char('h') => navigate(app, client, task_tx, Nav::Prev),
        KeyCode::Right | KeyCode::Char('l') => navigate(app, client, task_tx, Nav::Next),
        KeyCode::Char('g') => navigate(app, client, task_tx, Nav::First),
        KeyCode::Char('G') => navigate(app, client, task_tx, Nav::Latest),
        KeyCode::Char('j') => {
            app.jump_input = Some(String::new());
        }
        KeyCode::Tab => {
            open_list_panel(app, client, cache, pending_images, task_tx);
        }
        KeyCode::Char(' ') => {
            if let Some(comic) = &app.current {
                app.prefs.like(comic.id);
            }
        }
        KeyCode::Char('x') => {
            app.show_details = !app.show_details;
        }
        KeyCode::Char('t') => {
            app.prefs.toggle_theme();
        }
        KeyCode::Char('w') => {
            if let Some(comic) = &app.current {
                if let Err(e) = webbrowser::open(&comic.page_url()) {
                    warn!("failed to open browser: {e}");
                    app.show_toast("Could not open browser");
                }
            }
        }
        KeyCode::Char('i') => {
            // Re-request the image if the first download failed.
            if let Some(comic) = app.current.clone() {
                if !app.image_states.contains_key(&comic.id) && pending_images.insert(comic.id) {
                    spawn_image_fetch(client, cache, comic.id, comic.image_url, task_tx);
                }
            }
        }
        _ => {}
    }
    false
}

fn open_list_panel(
    app: &mut App,
    client: &XkcdClient,
    cache: &ImageCache,
    pending_images: &mut HashSet<ComicId>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    app.list_open = true;
    app.center_list_selection();
    // The corpus may have grown since startup; refresh the latest id.
    spawn_latest_fetch(client, task_tx);
    spawn_list_prefetch(app, client, task_tx);
    request_preview_image(app, client, cache, pending_images, task_tx);
}

/// Starts downloading the selected list entry's image so the preview pane
/// shows it once the metadata has resolved. A no-op while the entry is
/// still unresolved; the `ListBatch` handler retries it on resolution.
fn request_preview_image(
    app: &App,
    client: &XkcdClient,
    cache: &ImageCache,
    pending_images: &mut HashSet<ComicId>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    let Some((id, url)) = app
        .selected_list_id()
        .and_then(|id| app.store.get(id))
        .map(|comic| (comic.id, comic.image_url.clone()))
    else {
        return;
    };

    if !app.image_states.contains_key(&id) && pending_images.insert(id) {
        spawn_image_fetch(client, cache, id, url, task_tx);
    }
}

fn navigate(
    app: &mut App,
    client: &XkcdClient,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
    nav: Nav,
) {
    if app.fetching {
        return;
    }
    let Some(current_id) = app.current.as_ref().map(|c| c.id) else {
        return;
    };

    let target = match nav {
        Nav::First => FetchTarget::Id(1),
        Nav::Prev => FetchTarget::Id(current_id.saturating_sub(1).max(1)),
        Nav::Next => {
            if Some(current_id) == app.latest_id {
                app.show_toast("Back to first comic");
                FetchTarget::Id(1)
            } else {
                FetchTarget::Id(current_id + 1)
            }
        }
        Nav::Latest => FetchTarget::Latest,
        Nav::Id(id) => FetchTarget::Id(id),
    };

    if target == FetchTarget::Id(current_id) {
        return;
    }

    request_comic(app, client, target, task_tx);
}

fn request_comic(
    app: &mut App,
    client: &XkcdClient,
    target: FetchTarget,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    app.fetching = true;
    app.last_fetch = target;

    let client = client.clone();
    let tx = task_tx.clone();
    tokio::spawn(async move {
        let result = match target {
            FetchTarget::Latest => client.fetch_latest().await,
            FetchTarget::Id(id) => client.fetch_comic(id).await,
        };
        let msg = match result {
            Ok(comic) => BackgroundTask::ComicLoaded(comic),
            Err(e) => BackgroundTask::ComicFailed(e.to_string()),
        };
        let _ = tx.send(msg);
    });
}

fn spawn_latest_fetch(client: &XkcdClient, task_tx: &mpsc::UnboundedSender<BackgroundTask>) {
    let client = client.clone();
    let tx = task_tx.clone();
    tokio::spawn(async move {
        if let Ok(comic) = client.fetch_latest().await {
            let _ = tx.send(BackgroundTask::LatestLoaded(comic));
        }
    });
}

fn spawn_image_fetch(
    client: &XkcdClient,
    cache: &ImageCache,
    id: ComicId,
    image_url: String,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    let client = client.clone();
    let cache = cache.clone();
    let tx = task_tx.clone();
    tokio::spawn(async move {
        if let Some(image) = cache.get(id).await {
            let _ = tx.send(BackgroundTask::ImageLoaded { id, image });
            return;
        }
        if let Some(image) = client.fetch_image(&image_url).await {
            cache.insert(id, image.clone()).await;
            let _ = tx.send(BackgroundTask::ImageLoaded { id, image });
        }
    });
}

/// Claims up to 20 unresolved ids around the current comic and resolves
/// them in sequential batches of 5, publishing each settled batch back to
/// the event loop. Claimed ids are marked in-flight before the task
/// spawns, so re-triggering while batches are still settling never
/// duplicates a fetch.
fn spawn_list_prefetch(
    app: &mut App,
    client: &XkcdClient,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    let Some(window) = app.list_window() else {
        return;
    };
    let ids = app.store.claim(window);
    spawn_batch_fetch(ids, client, task_tx);
}

fn spawn_batch_fetch(
    ids: Vec<ComicId>,
    client: &XkcdClient,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    if ids.is_empty() {
        return;
    }

    let client = client.clone();
    let tx = task_tx.clone();
    tokio::spawn(async move {
        let fetch = |id: ComicId| {
            let client = client.clone();
            async move { client.fetch_comic_opt(id).await }
        };
        fetch_batches(ids, fetch, |batch| {
            let _ = tx.send(BackgroundTask::ListBatch(batch));
        })
        .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_test() {
        use clap::CommandFactory;
        Args::command().debug_assert()
    }

    fn comic(id: ComicId) -> Comic {
        Comic {
            id,
            title: format!("Comic {id}"),
            image_url: String::new(),
            alt_text: String::new(),
            day: "1".into(),
            month: "1".into(),
            year: "2020".into(),
            transcript: String::new(),
            news: String::new(),
        }
    }

    #[tokio::test]
    async fn retry_key_requeues_a_failed_list_entry() {
        let mut app = App::with_picker(Preferences::default(), None);
        app.latest_id = Some(250);
        app.current = Some(comic(125));
        app.list_open = true;

        let window = app.list_window().unwrap();
        let claimed = app.store.claim(window);
        app.store.apply(claimed.iter().map(|&id| (id, None)).collect());

        app.list_state.select(Some(0));
        let id = app.selected_list_id().unwrap();
        assert_eq!(app.store.state(id), Some(ResolutionState::Failed));

        let client = XkcdClient::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::with_dir(dir.path().to_path_buf());
        let mut pending = HashSet::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let quit = handle_list_input(
            &mut app,
            KeyCode::Char('r'),
            &client,
            &cache,
            &mut pending,
            &tx,
        );
        assert!(!quit);
        assert_eq!(
            app.store.state(id),
            Some(ResolutionState::InFlight)
        );

        // A second press while the retry is in flight does not reset it.
        handle_list_input(&mut app, KeyCode::Char('r'), &client, &cache, &mut pending, &tx);
        assert_eq!(
            app.store.state(id),
            Some(ResolutionState::InFlight)
        );
    }
}
