use crossterm::event::{KeyCode, MouseButton, MouseEvent, MouseEventKind};
use geojson::FeatureCollection;
use ratatui::layout::Rect as TuiRect;
use std::{
    collections::HashMap,
    sync::mpsc::{self, Receiver},
};
use tracing::{debug, info};

use crate::{
    choropleth::{self, Choropleth, Dataset, Row},
    config::Config,
    data::{FlowCache, GeoLevel, VisualFlow},
    error::LoadError,
    fetch::{Job, JobKind, LoadEvent, Loader, Payload},
    flows::{self, DisplayStats, FilterCriteria, FilterOptions, FlowResult, TableStatus},
    memo::Memo,
    project::{self, AmountRange, AmountScale, ProjectOptions},
    surface::{HoverInfo, MapSurface, SurfaceEvent, empty_collection},
};

#[derive(PartialEq)]
pub enum Panel { Left, Center, Right }

/// Stan danych przepływów widziany przez UI
#[derive(Clone, Debug, PartialEq)]
pub enum LoadStatus {
    Loading { loaded: u64, total: Option<u64> },
    Ready,
    /// dane są, ale nic nie pasuje do filtrów – to nie błąd
    Empty,
    Unavailable(String),
    Corrupt(String),
}

impl LoadStatus {
    fn from_error(e: &LoadError) -> Self {
        if e.is_unavailable() { LoadStatus::Unavailable(e.to_string()) } else { LoadStatus::Corrupt(e.to_string()) }
    }
}

pub struct AppState {
    pub cache: FlowCache,
    loader: Loader,
    pub criteria: FilterCriteria,
    pub options: HashMap<GeoLevel, FilterOptions>,
    pub status: LoadStatus,
    flow_errors: HashMap<GeoLevel, LoadError>,
    /// granice wczytane raz na poziom; stany są wspólne dla wszystkich poziomów
    boundaries: HashMap<GeoLevel, FeatureCollection>,
    boundary_errors: HashMap<GeoLevel, String>,
    pub result: FlowResult,
    pub stats: DisplayStats,
    agg_memo: Memo<FilterCriteria, FlowResult>,
    proj_memo: Memo<(FilterCriteria, AmountScale), (FeatureCollection, FeatureCollection)>,
    pub scale: AmountScale,
    segments: usize,
    pub surface: MapSurface,
    events: Receiver<SurfaceEvent>,
    pub hover: Option<HoverInfo>,
    pub selected: Option<VisualFlow>,
    pub list_selected: usize,
    pub dataset: Dataset,
    datasets: HashMap<(Dataset, GeoLevel), Vec<Row>>,
    pub variables: Vec<String>,
    pub variable: Option<String>,
    pub choropleth: Option<Choropleth>,
    dataset_errors: HashMap<(Dataset, GeoLevel), String>,
    pub map_area: TuiRect,
    pointer_inside: bool,
    pub active_panel: Panel,
}

impl AppState {
    pub const HELP_TEXT: &'static str = "\
l: poziom  a: agencja  s: stan  d: kierunek
i: branża  [ ]: rok od  { }: rok do  g: skala
c: zbiór danych  v: zmienna  ↑/↓ Enter: przepływ
Esc: odznacz  Tab: panel  q: wyjście";

    pub fn new(config: &Config) -> Self {
        let mut surface = MapSurface::new();
        surface.mount(120, 40);
        let (tx, events) = mpsc::channel();
        surface.bind_listeners(tx);

        let mut state = Self {
            cache: FlowCache::new(),
            loader: Loader::new(config.source.clone()),
            criteria: FilterCriteria::for_level(config.level),
            options: HashMap::new(),
            status: LoadStatus::Loading { loaded: 0, total: None },
            flow_errors: HashMap::new(),
            boundaries: HashMap::new(),
            boundary_errors: HashMap::new(),
            result: FlowResult::default(),
            stats: DisplayStats::default(),
            agg_memo: Memo::default(),
            proj_memo: Memo::default(),
            scale: config.scale,
            segments: config.segments,
            surface,
            events,
            hover: None,
            selected: None,
            list_selected: 0,
            dataset: config.dataset,
            datasets: HashMap::new(),
            variables: Vec::new(),
            variable: None,
            choropleth: None,
            dataset_errors: HashMap::new(),
            map_area: TuiRect::default(),
            pointer_inside: false,
            active_panel: Panel::Center,
        };
        state.enter_level(config.level);
        state
    }

    pub fn level(&self) -> GeoLevel {
        self.criteria.level
    }

    pub fn level_options(&self) -> FilterOptions {
        self.options.get(&self.level()).cloned().unwrap_or_default()
    }

    /// Błąd granic widocznych na bieżącym poziomie (stany albo nakładka)
    pub fn boundary_error(&self) -> Option<&str> {
        self.boundary_errors
            .get(&GeoLevel::State)
            .or_else(|| self.boundary_errors.get(&self.level()))
            .map(String::as_str)
    }

    pub fn dataset_error(&self) -> Option<&str> {
        self.dataset_errors.get(&(self.dataset, self.level())).map(String::as_str)
    }

    pub fn is_loading(&self) -> bool {
        [JobKind::Flows, JobKind::StateBorders, JobKind::Overlay]
            .into_iter()
            .any(|kind| self.loader.is_loading(kind))
    }

    /// Przejście na poziom: dane z cache albo żądania w tle
    fn enter_level(&mut self, level: GeoLevel) {
        self.criteria = FilterCriteria { direction: self.criteria.direction, ..FilterCriteria::for_level(level) };
        self.selected = None;
        self.hover = None;
        self.list_selected = 0;

        if !self.cache.contains(level) && !self.flow_errors.contains_key(&level) {
            self.status = LoadStatus::Loading { loaded: 0, total: None };
            self.loader.submit(Job::Flows(level));
        }
        self.request_boundaries(GeoLevel::State);
        if level != GeoLevel::State {
            self.request_boundaries(level);
        }
        self.show_boundaries();
        self.request_dataset();
        self.refresh();
    }

    fn request_boundaries(&mut self, level: GeoLevel) {
        let job = Job::Boundaries(level);
        if self.boundaries.contains_key(&level) || self.boundary_errors.contains_key(&level) {
            return;
        }
        // granice stanów są tylko jedne – trwające żądanie wystarczy
        if level == GeoLevel::State && self.loader.is_loading(job.kind()) {
            return;
        }
        self.loader.submit(job);
    }

    /// Rysuje granice z cache; brakujące (w drodze albo po błędzie) jako pusta kolekcja
    fn show_boundaries(&mut self) {
        let level = self.level();
        let states = self.boundaries.get(&GeoLevel::State).cloned().unwrap_or_else(empty_collection);
        let overlay = (level != GeoLevel::State)
            .then(|| self.boundaries.get(&level).cloned().unwrap_or_else(empty_collection));
        self.surface.set_boundaries(level, states, overlay);
        self.rebuild_choropleth();
    }

    fn request_dataset(&mut self) {
        let key = (self.dataset, self.level());
        if self.datasets.contains_key(&key) || self.dataset_errors.contains_key(&key) {
            self.rebuild_choropleth();
        } else {
            self.loader.submit(Job::Dataset(key.0, key.1));
        }
    }

    /// Nic z poprzedniego poziomu nie może zostać na ekranie ani być klikalne
    fn clear_flows(&mut self) {
        self.result = FlowResult::default();
        self.stats = DisplayStats::default();
        self.selected = None;
        self.hover = None;
        self.list_selected = 0;
        self.surface.set_flows(empty_collection(), empty_collection(), Vec::new());
    }

    /// Przelicza agregację i rzut po zmianie filtrów lub danych
    pub fn refresh(&mut self) {
        let result = match self.agg_memo.get(&self.criteria) {
            Some(hit) => hit.clone(),
            None => {
                let failure = self.flow_errors.get(&self.criteria.level);
                match flows::aggregate_cached(&self.cache, &self.criteria, failure) {
                    Ok(result) => {
                        self.agg_memo.put(self.criteria.clone(), result.clone());
                        result
                    }
                    Err(TableStatus::Loading) => {
                        if !matches!(self.status, LoadStatus::Loading { .. }) {
                            self.status = LoadStatus::Loading { loaded: 0, total: None };
                        }
                        self.clear_flows();
                        return;
                    }
                    Err(TableStatus::Failed(e)) => {
                        self.status = LoadStatus::from_error(e);
                        self.clear_flows();
                        return;
                    }
                }
            }
        };

        self.status = if result.is_empty() { LoadStatus::Empty } else { LoadStatus::Ready };
        self.stats = flows::display_stats(&result.display, 5);

        let flows = &result.display.flows;
        let focus = self.criteria.focus_state();
        let direction = self.criteria.direction;
        let opts = ProjectOptions { segments: self.segments, scale: self.scale };
        let (lines, points) = self
            .proj_memo
            .get_or_compute((self.criteria.clone(), self.scale), || {
                let range = AmountRange::of(flows);
                (project::project(flows, range, focus, direction, opts), project::endpoints(flows))
            })
            .clone();
        self.surface.set_flows(lines, points, flows.clone());

        if let Some(sel) = &self.selected {
            if result.display.find(&sel.id).is_none() {
                self.selected = None;
            }
        }
        self.list_selected = self.list_selected.min(result.display.len().saturating_sub(1));
        self.result = result;
    }

    fn rebuild_choropleth(&mut self) {
        let level = self.level();
        let Some(rows) = self.datasets.get(&(self.dataset, level)) else {
            self.choropleth = None;
            self.surface.set_choropleth(None);
            return;
        };
        self.variables = choropleth::variables(rows, level);
        if !self.variable.as_ref().is_some_and(|v| self.variables.contains(v)) {
            self.variable = self.variables.first().cloned();
        }
        let Some(variable) = self.variable.clone() else {
            self.choropleth = None;
            self.surface.set_choropleth(None);
            return;
        };
        let chart = Choropleth::build(self.dataset, rows, level, &variable);
        debug!(dataset = chart.dataset.key(), variable = %variable, records = chart.records.len(), "choropleth built");

        // kartogram maluje granice bieżącego poziomu
        let painted = self.boundaries.get(&level).map(|fc| chart.paint(fc));
        self.surface.set_choropleth(painted);
        self.choropleth = Some(chart);
    }

    fn apply_load(&mut self, job: Job, result: Result<Payload, LoadError>) {
        let current = self.level();
        match (job, result) {
            (_, Ok(Payload::Flows(table))) => {
                let level = table.level();
                self.options.insert(level, flows::filter_options(&table));
                self.cache.insert(table);
                if level == current {
                    self.refresh();
                }
            }
            (_, Ok(Payload::Boundaries { level, features })) => {
                self.boundary_errors.remove(&level);
                self.boundaries.insert(level, features);
                if level == GeoLevel::State || level == current {
                    self.show_boundaries();
                }
            }
            (_, Ok(Payload::Dataset { dataset, level, rows })) => {
                self.dataset_errors.remove(&(dataset, level));
                self.datasets.insert((dataset, level), rows);
                if (dataset, level) == (self.dataset, current) {
                    self.rebuild_choropleth();
                }
            }
            (Job::Flows(level), Err(e)) => {
                self.flow_errors.insert(level, e);
                if level == current {
                    self.refresh();
                }
            }
            (Job::Boundaries(level), Err(e)) => {
                // brakujące granice są już puste na mapie; tu tylko zapis błędu
                self.boundary_errors.insert(level, e.to_string());
            }
            (Job::Dataset(dataset, level), Err(e)) => {
                self.dataset_errors.insert((dataset, level), e.to_string());
                if (dataset, level) == (self.dataset, current) {
                    self.rebuild_choropleth();
                }
            }
        }
    }

    /// Jeden obrót pętli: wyniki pobierania, potem zdarzenia mapy
    pub fn tick(&mut self) {
        for event in self.loader.drain() {
            match event {
                LoadEvent::Progress { job: Job::Flows(level), loaded, total } => {
                    if level == self.level() && !self.cache.contains(level) {
                        self.status = LoadStatus::Loading { loaded, total };
                    }
                }
                LoadEvent::Progress { .. } => {}
                LoadEvent::Finished { job, result } => self.apply_load(job, result),
            }
        }
        while let Ok(event) = self.events.try_recv() {
            match event {
                SurfaceEvent::Hover(info) => self.hover = Some(info),
                SurfaceEvent::HoverClear => self.hover = None,
                SurfaceEvent::Select(flow) => {
                    info!(flow_id = %flow.id, "flow selected on map");
                    self.list_selected = self.result.display.flows.iter().position(|f| f.id == flow.id).unwrap_or(0);
                    self.selected = Some(flow);
                }
                SurfaceEvent::Deselect => self.selected = None,
            }
        }
    }

    /// Obszar wnętrza mapy ustawiany przy rysowaniu
    pub fn set_map_area(&mut self, area: TuiRect) {
        if area != self.map_area {
            self.map_area = area;
            self.surface.mount(area.width, area.height);
        }
    }

    fn set_criteria(&mut self, criteria: FilterCriteria) {
        if criteria != self.criteria {
            self.criteria = criteria;
            self.refresh();
        }
    }

    /// Krok po roku: brak ograniczenia → skraj zakresu → … → znów brak
    fn step_year(current: Option<i32>, span: Option<(i32, i32)>, delta: i32) -> Option<i32> {
        let (lo, hi) = span?;
        match current {
            None => Some(if delta > 0 { lo } else { hi }),
            Some(y) => Some(y + delta).filter(|y| (lo..=hi).contains(y)),
        }
    }

    pub fn handle_mouse(&mut self, ev: MouseEvent) {
        let a = self.map_area;
        let inside = ev.column >= a.x && ev.column < a.x + a.width && ev.row >= a.y && ev.row < a.y + a.height;
        if !inside {
            if self.pointer_inside {
                self.pointer_inside = false;
                self.surface.pointer_leave();
            }
            return;
        }
        self.pointer_inside = true;
        let (x, y) = (ev.column - a.x, ev.row - a.y);
        match ev.kind {
            MouseEventKind::Moved => self.surface.pointer_move(x, y),
            MouseEventKind::Down(MouseButton::Left) => self.surface.click(x, y),
            _ => {}
        }
    }

    /// Zwraca true, jeśli trzeba wyjść
    pub fn handle_input(&mut self, key: KeyCode) -> bool {
        use KeyCode::*;
        let opts = self.level_options();
        match key {
            Char('q') => return true,
            Tab => {
                self.active_panel = match self.active_panel {
                    Panel::Left   => Panel::Center,
                    Panel::Center => Panel::Right,
                    Panel::Right  => Panel::Left,
                };
            }
            Char('l') => {
                let next = self.level().next();
                info!(level = %next, "level changed");
                self.enter_level(next);
            }
            Char('a') => {
                let agency = flows::cycle(&opts.agencies, &self.criteria.agency);
                self.set_criteria(FilterCriteria { agency, ..self.criteria.clone() });
            }
            Char('s') => {
                let state = flows::cycle(&opts.states, &self.criteria.state);
                self.set_criteria(FilterCriteria { state, ..self.criteria.clone() });
            }
            Char('d') => {
                let direction = self.criteria.direction.next();
                self.set_criteria(FilterCriteria { direction, ..self.criteria.clone() });
            }
            Char('i') if self.level() == GeoLevel::State => {
                let industry = flows::cycle(&opts.industries, &self.criteria.industry);
                self.set_criteria(FilterCriteria { industry, ..self.criteria.clone() });
            }
            Char('[') | Char(']') if self.level().has_years() => {
                let delta = if key == Char(']') { 1 } else { -1 };
                let year_start = Self::step_year(self.criteria.year_start, opts.years, delta);
                self.set_criteria(FilterCriteria { year_start, ..self.criteria.clone() });
            }
            Char('{') | Char('}') if self.level().has_years() => {
                let delta = if key == Char('}') { 1 } else { -1 };
                let year_end = Self::step_year(self.criteria.year_end, opts.years, delta);
                self.set_criteria(FilterCriteria { year_end, ..self.criteria.clone() });
            }
            Char('g') => {
                self.scale = self.scale.next();
                self.refresh();
            }
            Char('c') => {
                self.dataset = self.dataset.next();
                self.request_dataset();
            }
            Char('v') => {
                if !self.variables.is_empty() {
                    let current = self.variable.clone().unwrap_or_default();
                    let idx = self.variables.iter().position(|v| *v == current).map(|i| (i + 1) % self.variables.len());
                    self.variable = self.variables.get(idx.unwrap_or(0)).cloned();
                    self.rebuild_choropleth();
                }
            }
            Up => if self.list_selected > 0 { self.list_selected -= 1 },
            Down => if self.list_selected + 1 < self.result.display.len() { self.list_selected += 1 },
            Enter => {
                self.selected = self.result.display.flows.get(self.list_selected).cloned();
            }
            Esc | Backspace => {
                if self.selected.take().is_none() && self.criteria.focus_state().is_some() {
                    info!("focus cleared");
                    self.set_criteria(FilterCriteria { state: flows::ALL.to_string(), ..self.criteria.clone() });
                }
            }
            _ => {}
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DataSource;
    use serde_json::json;
    use std::{fs, thread, time::Duration};

    fn config(dir: &std::path::Path) -> Config {
        Config {
            source: DataSource::Local(dir.to_path_buf()),
            level: GeoLevel::State,
            dataset: Dataset::Census,
            scale: AmountScale::Linear,
            segments: 8,
            log_file: dir.join("test.log"),
        }
    }

    fn settle(state: &mut AppState) {
        for _ in 0..200 {
            state.tick();
            if !state.is_loading() && !matches!(state.status, LoadStatus::Loading { .. }) {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("state_flows.json"),
            json!([
                { "origin_state": "CA", "dest_state": "TX", "total_amount": 100.0, "agency": "DOD", "origin_lon": -119.4, "origin_lat": 36.7, "dest_lon": -99.9, "dest_lat": 31.0 },
                { "origin_state": "CA", "dest_state": "CA", "total_amount": 999.0, "agency": "DOD" },
                { "origin_state": "TX", "dest_state": "CA", "total_amount": 50.0, "agency": "NASA", "origin_lon": -99.9, "origin_lat": 31.0, "dest_lon": -119.4, "dest_lat": 36.7 }
            ])
            .to_string(),
        )
        .unwrap();
        dir
    }

    #[test]
    fn loads_and_aggregates_on_start() {
        let dir = fixture();
        let mut state = AppState::new(&config(dir.path()));
        settle(&mut state);

        assert_eq!(state.status, LoadStatus::Ready);
        assert_eq!(state.result.summary.total_flows, 2);
        assert_eq!(state.result.summary.total_amount, 150.0);
        assert_eq!(state.stats.top_agencies[0].0, "DOD");
        assert_eq!(state.surface.displayed().len(), 2);
        // granice nie istnieją – pusta kolekcja i komunikat, bez paniki
        assert!(state.boundary_error().is_some());
    }

    #[test]
    fn filters_narrow_and_empty_is_not_failure() {
        let dir = fixture();
        let mut state = AppState::new(&config(dir.path()));
        settle(&mut state);

        state.handle_input(KeyCode::Char('s')); // CA
        state.handle_input(KeyCode::Char('d')); // wypływy
        assert_eq!(state.criteria.state, "CA");
        assert_eq!(state.result.display.len(), 1);
        assert_eq!(state.result.display.flows[0].dest_name, "TX");

        state.handle_input(KeyCode::Char('a')); // DOD
        state.handle_input(KeyCode::Char('a')); // NASA
        assert_eq!(state.criteria.agency, "NASA");
        assert_eq!(state.status, LoadStatus::Empty);
    }

    #[test]
    fn missing_level_data_reports_unavailable() {
        let dir = fixture();
        let mut state = AppState::new(&config(dir.path()));
        settle(&mut state);

        state.handle_input(KeyCode::Char('l'));
        settle(&mut state);
        assert_eq!(state.level(), GeoLevel::Congress);
        assert!(matches!(state.status, LoadStatus::Unavailable(_)));
        assert!(state.result.display.is_empty());

        // powrót: tabela stanowa z cache, bez ponownego pobierania
        state.handle_input(KeyCode::Char('l'));
        state.handle_input(KeyCode::Char('l'));
        assert_eq!(state.level(), GeoLevel::State);
        assert_eq!(state.status, LoadStatus::Ready);
    }

    fn write_states_geojson(dir: &std::path::Path) {
        fs::write(
            dir.join("states.geojson"),
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": { "id": "06" },
                    "geometry": { "type": "Polygon", "coordinates": [[[-124.0, 42.0], [-114.0, 42.0], [-114.0, 32.5], [-124.0, 42.0]]] }
                }]
            })
            .to_string(),
        )
        .unwrap();
    }

    fn state_border_count(state: &AppState) -> Option<usize> {
        state.surface.engine()?.source(crate::surface::STATE_SOURCE).map(|s| s.data.features.len())
    }

    fn tick_for(state: &mut AppState, ms: u64) {
        for _ in 0..ms / 10 {
            state.tick();
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn other_level_progress_leaves_cached_level_ready() {
        let dir = fixture();
        fs::write(
            dir.path().join("congress_flows.json"),
            json!([{ "origin_district": "CA-12", "dest_district": "TX-07", "amount": 5.0, "year": 2022 }]).to_string(),
        )
        .unwrap();
        fs::write(
            dir.path().join("county_flows.json"),
            json!([{ "origin_fips": "06037", "dest_fips": "48201", "subaward_amount": 7.0, "year": 2021 }]).to_string(),
        )
        .unwrap();
        let mut state = AppState::new(&config(dir.path()));
        settle(&mut state);

        // stan → okręgi → hrabstwa → stan, zanim cokolwiek dojdzie
        for _ in 0..3 {
            state.handle_input(KeyCode::Char('l'));
        }
        assert_eq!(state.level(), GeoLevel::State);
        tick_for(&mut state, 500);

        assert!(state.cache.contains(GeoLevel::County));
        assert_eq!(state.status, LoadStatus::Ready);
        assert_eq!(state.result.summary.total_flows, 2);
    }

    #[test]
    fn overlay_failure_keeps_state_borders() {
        let dir = fixture();
        write_states_geojson(dir.path());
        let mut state = AppState::new(&config(dir.path()));
        settle(&mut state);
        assert_eq!(state_border_count(&state), Some(1));
        assert!(state.boundary_error().is_none());

        // hrabstwa nie istnieją: błąd dochodzi, gdy już wróciliśmy na poziom stanów
        for _ in 0..3 {
            state.handle_input(KeyCode::Char('l'));
        }
        tick_for(&mut state, 500);
        assert_eq!(state.level(), GeoLevel::State);
        assert!(state.boundary_errors.contains_key(&GeoLevel::County));
        assert_eq!(state_border_count(&state), Some(1));
        assert!(state.boundary_error().is_none());

        // na poziomie z brakującą nakładką stany nadal są rysowane
        state.handle_input(KeyCode::Char('l'));
        settle(&mut state);
        assert_eq!(state.level(), GeoLevel::Congress);
        assert_eq!(state_border_count(&state), Some(1));
        assert!(state.boundary_error().is_some());
    }

    #[test]
    fn switching_to_loading_level_clears_previous_flows() {
        let dir = fixture();
        let mut state = AppState::new(&config(dir.path()));
        settle(&mut state);
        state.handle_input(KeyCode::Down);
        state.handle_input(KeyCode::Enter);
        assert!(state.selected.is_some());

        state.handle_input(KeyCode::Char('l'));
        assert!(matches!(state.status, LoadStatus::Loading { .. }));
        assert!(state.result.display.is_empty());
        assert_eq!(state.result.summary.total_flows, 0);
        assert_eq!(state.stats, DisplayStats::default());
        assert!(state.surface.displayed().is_empty());
        assert!(state.selected.is_none());
    }

    #[test]
    fn year_stepping_walks_the_span() {
        assert_eq!(AppState::step_year(None, Some((2019, 2021)), 1), Some(2019));
        assert_eq!(AppState::step_year(Some(2021), Some((2019, 2021)), 1), None);
        assert_eq!(AppState::step_year(None, Some((2019, 2021)), -1), Some(2021));
        assert_eq!(AppState::step_year(Some(2020), None, 1), None);
    }
}
