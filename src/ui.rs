use ratatui::{
    Frame,
    layout::{Constraint, Direction as LayoutDirection, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::{
    data::{GeoLevel, VisualFlow},
    flows::ALL,
    map_draw::MapView,
    state::{AppState, LoadStatus, Panel},
    surface::{CursorStyle, SurfaceState},
};

/// Kwota w czytelnych jednostkach
pub fn format_amount(value: f64) -> String {
    if value >= 1_000_000_000_000.0 {
        format!("{:.2} bln USD", value / 1_000_000_000_000.0)
    } else if value >= 1_000_000_000.0 {
        format!("{:.2} mld USD", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("{:.2} mln USD", value / 1_000_000.0)
    } else {
        format!("{:.2} USD", value)
    }
}

fn panel_block(title: &str, focused: bool) -> Block<'_> {
    let style = if focused { Style::default().fg(Color::Red) } else { Style::default() };
    Block::default().borders(Borders::ALL).title(title).border_style(style)
}

fn year_bound(y: Option<i32>) -> String {
    y.map(|y| y.to_string()).unwrap_or_else(|| "…".into())
}

fn stat(v: Option<f64>) -> String {
    v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "–".into())
}

fn flow_details(flow: &VisualFlow) -> String {
    format!("{} → {}\n{}\n{}", flow.origin_name, flow.dest_name, flow.agency, format_amount(flow.amount))
}

/// Wskaźnik stanu: ładowanie, brak danych i brak dopasowań to trzy różne komunikaty
fn status_line(state: &AppState) -> (String, Color) {
    match &state.status {
        LoadStatus::Loading { loaded, total: Some(total) } if *total > 0 => {
            (format!("Ładowanie danych… {}%", loaded * 100 / total), Color::Yellow)
        }
        LoadStatus::Loading { loaded, .. } => (format!("Ładowanie danych… {} kB", loaded / 1024), Color::Yellow),
        LoadStatus::Ready => (
            format!(
                "{} przepływów · skala {:?}{}{}",
                state.result.display.len(),
                state.scale,
                state.boundary_error().map(|_| " · brak granic").unwrap_or(""),
                if state.is_loading() { " · wczytywanie…" } else { "" }
            ),
            Color::Green,
        ),
        LoadStatus::Empty => ("Brak przepływów dla wybranych filtrów".into(), Color::Gray),
        LoadStatus::Unavailable(e) => (format!("Dane niedostępne: {}", e), Color::Red),
        LoadStatus::Corrupt(e) => (format!("Uszkodzone dane: {}", e), Color::Red),
    }
}

pub fn draw(f: &mut Frame, state: &mut AppState) {
    let chunks = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Percentage(20), Constraint::Percentage(60), Constraint::Percentage(20)])
        .split(f.area());

    // Lewy panel: filtry + lista przepływów
    let left = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(3)])
        .split(chunks[0]);

    let c = &state.criteria;
    let mut filters = format!(
        "Poziom: {}\nAgencja: {}\nStan: {}\nKierunek: {}",
        state.level().label(),
        c.agency,
        c.state,
        c.direction.label()
    );
    if state.level() == GeoLevel::State {
        filters.push_str(&format!("\nBranża: {}", c.industry));
    }
    if state.level().has_years() {
        filters.push_str(&format!("\nLata: {} – {}", year_bound(c.year_start), year_bound(c.year_end)));
    }
    f.render_widget(
        Paragraph::new(filters).block(panel_block("Filtry", false)).wrap(Wrap { trim: true }),
        left[0],
    );

    let items: Vec<ListItem> = state
        .result
        .display
        .flows
        .iter()
        .map(|fl| ListItem::new(format!("{} → {}  {}", fl.origin_name, fl.dest_name, format_amount(fl.amount))))
        .collect();
    let mut list_state = ListState::default();
    if !state.result.display.is_empty() {
        list_state.select(Some(state.list_selected));
    }
    let list = List::new(items)
        .block(panel_block("Przepływy", state.active_panel == Panel::Left))
        .highlight_symbol(">> ")
        .highlight_style(Style::default().fg(Color::Red));
    f.render_stateful_widget(list, left[1], &mut list_state);

    // Środek: mapa + pasek stanu
    let center = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(chunks[1]);
    let map_area = center[0];
    // wnętrze ramki – tam trafiają współrzędne myszy
    state.set_map_area(ratatui::layout::Rect {
        x: map_area.x + 1,
        y: map_area.y + 1,
        width: map_area.width.saturating_sub(2),
        height: map_area.height.saturating_sub(2),
    });
    let view = MapView::new(&state.surface);
    let title = match state.surface.state() {
        SurfaceState::Uninitialized => "Mapa – przygotowanie…".to_string(),
        SurfaceState::Ready => format!(
            "Mapa – {} ({}){}",
            state.level().label(),
            view.flow_count(),
            if state.surface.cursor() == CursorStyle::Pointer { " · kliknij, aby wybrać" } else { "" }
        ),
    };
    let highlight = state.selected.as_ref().map(|s| s.id.as_str());
    view.render(f, map_area, &title, state.active_panel == Panel::Center, highlight);

    let (status, color) = status_line(state);
    f.render_widget(
        Paragraph::new(status).style(Style::default().fg(color)).block(Block::default().borders(Borders::ALL)),
        center[1],
    );

    // Prawy panel: podsumowanie, szczegóły, kartogram, pomoc
    let right = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage(35),
            Constraint::Percentage(20),
            Constraint::Percentage(25),
            Constraint::Percentage(20),
        ])
        .split(chunks[2]);

    let s = &state.result.summary;
    let mut summary = format!(
        "Wszystkie dopasowane:\n  {} przepływów\n  {}\n  {} lokalizacji\nPokazane ({}):\n  {}",
        s.total_flows,
        format_amount(s.total_amount),
        s.unique_locations,
        state.result.display.len(),
        format_amount(state.stats.display_total),
    );
    if !state.stats.top_agencies.is_empty() {
        summary.push_str("\nNajwiększe agencje:");
        for (agency, amount) in &state.stats.top_agencies {
            summary.push_str(&format!("\n  {} {}", agency, format_amount(*amount)));
        }
    }
    if let Some((origin, amount)) = state.stats.top_origins.first() {
        summary.push_str(&format!("\nGłówne źródło: {} {}", origin, format_amount(*amount)));
    }
    if let Some((dest, amount)) = state.stats.top_destinations.first() {
        summary.push_str(&format!("\nGłówny cel: {} {}", dest, format_amount(*amount)));
    }
    f.render_widget(
        Paragraph::new(summary)
            .block(panel_block("Podsumowanie", state.active_panel == Panel::Right))
            .wrap(Wrap { trim: true }),
        right[0],
    );

    let details = match (&state.selected, &state.hover) {
        (Some(sel), _) => format!("Wybrany:\n{}", flow_details(sel)),
        (None, Some(h)) => format!("{} → {}\n{}\n{}", h.origin, h.dest, h.agency, format_amount(h.amount)),
        (None, None) if state.criteria.state != ALL => format!("Stan {} – Esc czyści wybór", state.criteria.state),
        (None, None) => "Najedź na łuk lub kliknij".to_string(),
    };
    f.render_widget(
        Paragraph::new(details).block(panel_block("Szczegóły", false)).wrap(Wrap { trim: true }),
        right[1],
    );

    let choropleth_text = match (&state.choropleth, state.dataset_error()) {
        (Some(ch), _) => {
            let mut text = format!(
                "{}: {}\nśr. {}  med. {}\nmin {}  max {}\nprogi: {}",
                ch.dataset.label(),
                ch.variable,
                stat(ch.stats.mean),
                stat(ch.stats.median),
                stat(ch.stats.min),
                stat(ch.stats.max),
                ch.thresholds.iter().map(|t| format!("{:.2}", t)).collect::<Vec<_>>().join(" / ")
            );
            for r in ch.top.iter().take(3) {
                text.push_str(&format!("\n↑ {} {:.2}", r.label, r.value));
            }
            for r in ch.bottom.iter().take(3) {
                text.push_str(&format!("\n↓ {} {:.2}", r.label, r.value));
            }
            text
        }
        (None, Some(e)) => format!("{}: {}", state.dataset.label(), e),
        (None, None) => format!("{}: ładowanie…", state.dataset.label()),
    };
    f.render_widget(
        Paragraph::new(choropleth_text).block(panel_block("Kartogram", false)).wrap(Wrap { trim: true }),
        right[2],
    );

    f.render_widget(
        Paragraph::new(AppState::HELP_TEXT).block(panel_block("Klawisze", false)).wrap(Wrap { trim: true }),
        right[3],
    );
}
