mod choropleth;
mod config;
mod curve;
mod data;
mod error;
mod fetch;
mod flows;
mod map_draw;
mod memo;
mod project;
mod state;
mod surface;
mod ui;

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{fs::File, io, sync::Mutex, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Args, Config};
use state::AppState;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_args(Args::parse())?;

    // terminal należy do UI, więc log idzie do pliku
    let log = File::create(&config.log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flow_atlas=info")))
        .with_writer(Mutex::new(log))
        .with_ansi(false)
        .init();
    info!(source = ?config.source, level = %config.level, "starting");

    let mut state = AppState::new(&config);
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    loop {
        state.tick();
        terminal.draw(|f| ui::draw(f, &mut state))?;

        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) => {
                    if state.handle_input(code) {
                        break;
                    }
                }
                Event::Mouse(mouse) => state.handle_mouse(mouse),
                _ => {}
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    info!("bye");
    Ok(())
}
